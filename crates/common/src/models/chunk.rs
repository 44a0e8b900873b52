//! Corpus fragment with positional metadata

use serde::{Deserialize, Serialize};

/// A fragment of a source document
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Fragment text
    pub text: String,

    /// Source document identifier (usually a file path or name)
    pub source_id: String,

    /// Page the fragment was extracted from, when the source is paginated
    #[serde(default)]
    pub page_number: Option<u32>,

    /// Position of the fragment within its source
    pub chunk_index: u32,

    /// Optional summary of the whole source document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_summary: Option<String>,
}

impl Chunk {
    pub fn new(text: impl Into<String>, source_id: impl Into<String>, chunk_index: u32) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            page_number: None,
            chunk_index,
            document_summary: None,
        }
    }

    pub fn with_page(mut self, page_number: u32) -> Self {
        self.page_number = Some(page_number);
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.document_summary = Some(summary.into());
        self
    }

    /// Stable identity of the fragment within a corpus
    pub fn key(&self) -> (&str, u32) {
        (self.source_id.as_str(), self.chunk_index)
    }
}

/// A chunk paired with its relevance to a query
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,

    /// Relevance score, higher is better
    pub score: f32,
}
