//! Data model shared across the pipeline
//!
//! Corpus fragments (`Chunk`) are immutable records produced by the
//! ingestion tooling. Conversations are append-only `Session` logs that
//! serialize to a versioned `Checkpoint`.

mod chunk;
mod session;

pub use chunk::{Chunk, ScoredChunk};
pub use session::{Checkpoint, Role, Session, Turn, CHECKPOINT_VERSION};
