//! Diversified corpus retrieval
//!
//! Provides three corpus search modes:
//! - Vector search (semantic similarity via embeddings)
//! - BM25 search (lexical matching)
//! - Hybrid search (RRF fusion of vector + BM25)
//!
//! and the [`Retriever`] that turns a wide candidate pool into at most `k`
//! diverse chunks via MMR, optionally ordered by page.

mod bm25;
mod fusion;
mod hybrid;
pub mod mmr;
mod ordering;
mod service;
mod vector;

pub use bm25::Bm25Index;
pub use fusion::{FusionResult, RRFusion};
pub use hybrid::HybridSearch;
pub use ordering::prioritize_pages;
pub use service::Retriever;
pub use vector::VectorIndex;

use groundline_common::config::{RetrievalConfig, SearchMode};
use groundline_common::errors::Result;
use groundline_common::models::{Chunk, ScoredChunk};
use serde::{Deserialize, Serialize};

/// Smallest candidate pool fetched before diversification
pub const MIN_FETCH_K: usize = 50;

/// A corpus search hit, before diversification
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk: Chunk,

    /// Ranking score, higher is better. Fused hits carry the normalized RRF score.
    pub score: f32,

    /// Match strength before fusion: cosine for vector hits, saturated
    /// BM25 for lexical ones. Fusion keeps the stronger side.
    pub relevance: f32,

    /// Chunk embedding, when the search mode has one
    pub embedding: Option<Vec<f32>>,
}

/// Retrieval mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    /// Vector similarity search
    Vector,
    /// BM25 lexical search
    Lexical,
    /// Combined hybrid search
    Hybrid,
}

impl RetrievalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Vector => "vector",
            RetrievalMode::Lexical => "lexical",
            RetrievalMode::Hybrid => "hybrid",
        }
    }
}

impl From<SearchMode> for RetrievalMode {
    fn from(mode: SearchMode) -> Self {
        match mode {
            SearchMode::Vector => RetrievalMode::Vector,
            SearchMode::Lexical => RetrievalMode::Lexical,
            SearchMode::Hybrid => RetrievalMode::Hybrid,
        }
    }
}

/// Ranked search over the corpus
#[async_trait::async_trait]
pub trait CorpusSearch: Send + Sync {
    /// Up to `k` candidates ordered by descending relevance
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Candidate>>;

    /// Get the retrieval mode
    fn mode(&self) -> RetrievalMode;

    /// Number of indexed chunks
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Retrieval parameters
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    /// Chunks returned
    pub k: usize,

    /// Requested candidate pool size
    pub fetch_k: usize,

    /// MMR lambda in [0, 1]
    pub diversity_weight: f32,

    /// Sort the selection by ascending page number
    pub page_priority: bool,

    /// Floor on [`Candidate::relevance`]
    pub min_relevance: f32,
}

impl RetrievalParams {
    /// Candidate pool actually fetched: `max(fetch_k, 3k, 50)`
    pub fn effective_fetch_k(&self) -> usize {
        self.fetch_k.max(self.k.saturating_mul(3)).max(MIN_FETCH_K)
    }
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self::from(&RetrievalConfig::default())
    }
}

impl From<&RetrievalConfig> for RetrievalParams {
    fn from(config: &RetrievalConfig) -> Self {
        Self {
            k: config.k,
            fetch_k: config.fetch_k,
            diversity_weight: config.diversity_weight.clamp(0.0, 1.0),
            page_priority: config.page_priority,
            min_relevance: config.min_relevance,
        }
    }
}

/// Ordered chunks selected for one query, at most `k` long.
///
/// An empty result is a normal outcome, not an error.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalResult {
    chunks: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn new(chunks: Vec<ScoredChunk>) -> Self {
        Self { chunks }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScoredChunk> {
        self.chunks.iter()
    }

    pub fn chunks(&self) -> &[ScoredChunk] {
        &self.chunks
    }

    pub fn into_inner(self) -> Vec<ScoredChunk> {
        self.chunks
    }
}

impl<'a> IntoIterator for &'a RetrievalResult {
    type Item = &'a ScoredChunk;
    type IntoIter = std::slice::Iter<'a, ScoredChunk>;

    fn into_iter(self) -> Self::IntoIter {
        self.chunks.iter()
    }
}
