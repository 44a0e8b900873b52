//! Redis checkpoint backend

use super::CheckpointBackend;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use tokio::sync::RwLock;
use tracing::debug;

/// Redis backend configuration
#[derive(Debug, Clone)]
pub struct RedisBackendConfig {
    /// Redis URL (redis://host:port)
    pub url: String,
    /// Key prefix for namespacing
    pub key_prefix: String,
    /// Expiry in seconds, 0 disables expiry
    pub ttl_secs: u64,
}

impl Default for RedisBackendConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "groundline".to_string(),
            ttl_secs: 0,
        }
    }
}

/// Redis-backed checkpoint store
pub struct RedisBackend {
    connection: RwLock<MultiplexedConnection>,
    config: RedisBackendConfig,
}

impl RedisBackend {
    /// Connect to Redis
    pub async fn new(config: RedisBackendConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str()).map_err(|e| AppError::Persistence {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AppError::Persistence {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
            config,
        })
    }

    /// Build a prefixed key
    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.config.key_prefix, key)
    }
}

#[async_trait]
impl CheckpointBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        let value: Option<String> = conn.get(&full_key).await.map_err(|e| AppError::Persistence {
            message: format!("Failed to get key '{}': {}", full_key, e),
        })?;

        debug!(key = %full_key, hit = value.is_some(), "Checkpoint get");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let full_key = self.key(key);
        let mut conn = self.connection.write().await;

        // SET replaces the whole value in one command
        if self.config.ttl_secs > 0 {
            let _: () = conn
                .set_ex(&full_key, value, self.config.ttl_secs)
                .await
                .map_err(|e| AppError::Persistence {
                    message: format!("Failed to set key '{}': {}", full_key, e),
                })?;
        } else {
            let _: () = conn.set(&full_key, value).await.map_err(|e| AppError::Persistence {
                message: format!("Failed to set key '{}': {}", full_key, e),
            })?;
        }

        debug!(key = %full_key, ttl_secs = self.config.ttl_secs, "Checkpoint set");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.write().await;
        redis::cmd("PING")
            .query_async::<String>(&mut *conn)
            .await
            .map_err(|e| AppError::Persistence {
                message: format!("Redis ping failed: {}", e),
            })?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
