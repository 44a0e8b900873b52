//! Corpus file loading
//!
//! The corpus is produced by external ingestion tooling as a single JSON
//! document: `{"chunks": [{text, source_id, page_number?, chunk_index,
//! document_summary?, embedding?}]}`.

use groundline_common::errors::{AppError, Result};
use groundline_common::models::Chunk;
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// A corpus chunk with its precomputed embedding, if any
#[derive(Debug, Clone, Deserialize)]
pub struct CorpusEntry {
    #[serde(flatten)]
    pub chunk: Chunk,

    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
}

impl CorpusEntry {
    pub fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            embedding: None,
        }
    }
}

#[derive(Deserialize)]
struct CorpusFile {
    #[serde(default)]
    chunks: Vec<CorpusEntry>,
}

/// Read and parse the corpus file.
///
/// A missing or unparsable file is `CorpusUnavailable`; an empty chunk
/// list is a valid (empty) corpus.
pub async fn load_corpus(path: impl AsRef<Path>) -> Result<Vec<CorpusEntry>> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AppError::CorpusUnavailable {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;

    let file: CorpusFile = serde_json::from_str(&raw).map_err(|e| AppError::CorpusUnavailable {
        message: format!("cannot parse {}: {}", path.display(), e),
    })?;

    let embedded = file.chunks.iter().filter(|c| c.embedding.is_some()).count();
    info!(
        path = %path.display(),
        chunks = file.chunks.len(),
        embedded,
        "Corpus loaded"
    );

    Ok(file.chunks)
}
