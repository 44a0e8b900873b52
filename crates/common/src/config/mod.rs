//! Configuration management for Groundline services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Corpus location and search mode
    #[serde(default)]
    pub corpus: CorpusConfig,

    /// Embedding service configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Generation (LLM) backend configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Retrieval parameters
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Query rewriting
    #[serde(default)]
    pub rewriter: RewriterConfig,

    /// Grounded responder
    #[serde(default)]
    pub responder: ResponderConfig,

    /// Checkpoint persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

/// How the corpus is searched before diversification
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Embedding cosine similarity
    Vector,
    /// BM25 keyword scoring
    Lexical,
    /// RRF fusion of vector and lexical
    Hybrid,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorpusConfig {
    /// Path to the corpus JSON produced by the ingestion tooling
    #[serde(default = "default_corpus_path")]
    pub path: String,

    /// Search mode used to fetch candidates
    #[serde(default = "default_search_mode")]
    pub search_mode: SearchMode,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, hashing
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum attempts per embedding request
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Chat completions endpoint
    #[serde(default = "default_generation_endpoint")]
    pub endpoint: String,

    /// API key; empty selects the offline generator
    #[serde(default)]
    pub api_key: String,

    /// Model name
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Sampling temperature for answers
    #[serde(default = "default_generation_temperature")]
    pub temperature: f32,

    /// Maximum output tokens
    #[serde(default = "default_generation_max_tokens")]
    pub max_tokens: usize,

    /// Timeout in seconds
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Number of chunks handed to the assembler
    #[serde(default = "default_k")]
    pub k: usize,

    /// Candidate pool size before diversification
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,

    /// MMR lambda: 1.0 is pure relevance, 0.0 is pure diversity
    #[serde(default = "default_diversity_weight")]
    pub diversity_weight: f32,

    /// Re-sort the selection by ascending page number
    #[serde(default = "default_enabled")]
    pub page_priority: bool,

    /// Candidates whose pre-fusion score falls below this are never selected
    #[serde(default = "default_min_relevance")]
    pub min_relevance: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RewriterConfig {
    /// Rewrite follow-up questions into standalone queries
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Number of trailing turns shown to the rewriter
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResponderConfig {
    /// Chunk text shorter than this (non-whitespace chars, labels excluded) counts as empty
    #[serde(default = "default_min_context_chars")]
    pub min_context_chars: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistenceConfig {
    /// Backend: redis, file, memory
    #[serde(default = "default_persistence_backend")]
    pub backend: String,

    /// Redis URL (redis backend)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Key prefix for namespacing
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Checkpoint expiry in seconds, 0 keeps checkpoints forever (redis backend)
    #[serde(default)]
    pub ttl_secs: u64,

    /// Checkpoint directory (file backend)
    #[serde(default = "default_checkpoint_dir")]
    pub directory: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Expose /metrics (Prometheus)
    #[serde(default = "default_enabled")]
    pub metrics_enabled: bool,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8000 }
fn default_request_timeout() -> u64 { 120 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_concurrent() -> usize { 64 }
fn default_corpus_path() -> String { "data/corpus.json".to_string() }
fn default_search_mode() -> SearchMode { SearchMode::Hybrid }
fn default_embedding_provider() -> String { "hashing".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_embedding_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_batch_size() -> usize { 64 }
fn default_generation_endpoint() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_generation_model() -> String { "gpt-4o-mini".to_string() }
fn default_generation_temperature() -> f32 { 0.2 }
fn default_generation_max_tokens() -> usize { 1024 }
fn default_generation_timeout() -> u64 { 60 }
fn default_k() -> usize { 4 }
fn default_fetch_k() -> usize { 50 }
fn default_diversity_weight() -> f32 { 0.5 }
fn default_history_turns() -> usize { 4 }
fn default_min_relevance() -> f32 { 0.3 }
fn default_min_context_chars() -> usize { 10 }
fn default_persistence_backend() -> String { "file".to_string() }
fn default_redis_url() -> String { "redis://localhost:6379".to_string() }
fn default_key_prefix() -> String { "groundline".to_string() }
fn default_checkpoint_dir() -> String { "data/checkpoints".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_service_name() -> String { "groundline".to_string() }
fn default_rate_limit() -> u32 { 20 }
fn default_burst() -> u32 { 40 }
fn default_enabled() -> bool { true }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: default_corpus_path(),
            search_mode: default_search_mode(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_embedding_timeout(),
            max_retries: default_embedding_retries(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_generation_endpoint(),
            api_key: String::new(),
            model: default_generation_model(),
            temperature: default_generation_temperature(),
            max_tokens: default_generation_max_tokens(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            fetch_k: default_fetch_k(),
            diversity_weight: default_diversity_weight(),
            page_priority: default_enabled(),
            min_relevance: default_min_relevance(),
        }
    }
}

impl Default for RewriterConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            history_turns: default_history_turns(),
        }
    }
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            min_context_chars: default_min_context_chars(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            backend: default_persistence_backend(),
            redis_url: default_redis_url(),
            key_prefix: default_key_prefix(),
            ttl_secs: 0,
            directory: default_checkpoint_dir(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_enabled: default_enabled(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            corpus: CorpusConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            retrieval: RetrievalConfig::default(),
            rewriter: RewriterConfig::default(),
            responder: ResponderConfig::default(),
            persistence: PersistenceConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__RETRIEVAL__K=6
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject settings the pipeline cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.retrieval.k == 0 {
            return Err(AppError::Configuration {
                message: "retrieval.k must be at least 1".to_string(),
            });
        }

        if !(0.0..=1.0).contains(&self.retrieval.diversity_weight) {
            return Err(AppError::Configuration {
                message: format!(
                    "retrieval.diversity_weight must be within [0, 1], got {}",
                    self.retrieval.diversity_weight
                ),
            });
        }

        if !(0.0..=1.0).contains(&self.retrieval.min_relevance) {
            return Err(AppError::Configuration {
                message: format!(
                    "retrieval.min_relevance must be within [0, 1], got {}",
                    self.retrieval.min_relevance
                ),
            });
        }

        if !matches!(self.persistence.backend.as_str(), "redis" | "file" | "memory") {
            return Err(AppError::Configuration {
                message: format!("unknown persistence backend '{}'", self.persistence.backend),
            });
        }

        if self.embedding.dimension == 0 {
            return Err(AppError::Configuration {
                message: "embedding.dimension must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.retrieval.k, 4);
        assert_eq!(config.retrieval.fetch_k, 50);
        assert_eq!(config.rewriter.history_turns, 4);
        assert_eq!(config.corpus.search_mode, SearchMode::Hybrid);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_lambda() {
        let mut config = AppConfig::default();
        config.retrieval.diversity_weight = 1.5;
        assert!(matches!(config.validate(), Err(AppError::Configuration { .. })));
    }

    #[test]
    fn test_validate_rejects_out_of_range_min_relevance() {
        let mut config = AppConfig::default();
        assert!((config.retrieval.min_relevance - 0.3).abs() < f32::EPSILON);

        config.retrieval.min_relevance = -0.1;
        assert!(matches!(config.validate(), Err(AppError::Configuration { .. })));
    }

    #[test]
    fn test_validate_rejects_unknown_backend() {
        let mut config = AppConfig::default();
        config.persistence.backend = "sqlite".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("groundline.toml");
        std::fs::write(&path, "[retrieval]\nk = 6\npage_priority = false\n").unwrap();

        let config = AppConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.retrieval.k, 6);
        assert!(!config.retrieval.page_priority);
        assert_eq!(config.retrieval.fetch_k, 50);
        assert_eq!(config.persistence.backend, "file");
    }
}
