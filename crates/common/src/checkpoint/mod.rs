//! Checkpoint persistence backends
//!
//! A checkpoint backend is a durable key -> blob store. Every `set` fully
//! replaces the previous value for the key; there is no partial merge.
//!
//! Provides:
//! - Redis backend (multiplexed connection, optional TTL)
//! - File backend (one JSON file per key, atomic rename)
//! - In-memory backend for development and tests

mod file;
mod memory;
mod redis_backend;

pub use self::file::FileBackend;
pub use self::memory::MemoryBackend;
pub use self::redis_backend::{RedisBackend, RedisBackendConfig};

use crate::config::PersistenceConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Durable key -> blob store
#[async_trait]
pub trait CheckpointBackend: Send + Sync {
    /// Fetch the stored value for `key`, `None` when absent
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Replace the stored value for `key`
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Check backend connectivity
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Backend name for logs and health output
    fn name(&self) -> &'static str;
}

/// Checkpoint key builders
pub mod keys {
    /// Build a session checkpoint key
    pub fn session(session_id: &str) -> String {
        format!("session:{}", session_id)
    }
}

/// Create a backend based on configuration
pub async fn create_backend(config: &PersistenceConfig) -> Result<Arc<dyn CheckpointBackend>> {
    match config.backend.as_str() {
        "redis" => {
            let backend = RedisBackend::new(RedisBackendConfig {
                url: config.redis_url.clone(),
                key_prefix: config.key_prefix.clone(),
                ttl_secs: config.ttl_secs,
            })
            .await?;
            Ok(Arc::new(backend))
        }
        "file" => Ok(Arc::new(FileBackend::new(&config.directory).await?)),
        "memory" => {
            tracing::warn!("Using in-memory checkpoints, conversations are lost on restart");
            Ok(Arc::new(MemoryBackend::new()))
        }
        other => Err(AppError::Configuration {
            message: format!("unknown persistence backend '{}'", other),
        }),
    }
}
