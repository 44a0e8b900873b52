//! Groundline Common Library
//!
//! Shared code for the Groundline workspace including:
//! - Conversation and corpus data model
//! - Embedding client abstraction
//! - Generation (LLM) client abstraction
//! - Checkpoint persistence backends
//! - Error types and handling
//! - Configuration management
//! - Metrics and observability

pub mod checkpoint;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod models;

// Re-export commonly used types
pub use checkpoint::CheckpointBackend;
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};
pub use llm::{ChatMessage, Generator, MessageRole};
pub use models::{Chunk, Role, ScoredChunk, Session, Turn};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
