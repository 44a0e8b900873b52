//! Hybrid search combining vector and BM25 indexes
//!
//! Uses RRF fusion to combine results from both indexes

use super::{
    bm25::Bm25Index, fusion::RRFusion, vector::VectorIndex, Candidate, CorpusSearch,
    RetrievalMode,
};
use crate::corpus::CorpusEntry;
use groundline_common::embeddings::Embedder;
use groundline_common::errors::Result;
use std::sync::Arc;
use tracing::warn;

/// Hybrid search combining vector and BM25
pub struct HybridSearch {
    vector: VectorIndex,
    bm25: Bm25Index,
    fusion: RRFusion,
}

impl HybridSearch {
    pub fn new(vector: VectorIndex, bm25: Bm25Index) -> Self {
        Self {
            vector,
            bm25,
            fusion: RRFusion::default(),
        }
    }

    /// Build both indexes; the lexical side reuses the computed embeddings
    pub async fn build(entries: Vec<CorpusEntry>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let vector = VectorIndex::build(entries, embedder).await?;
        let bm25 = Bm25Index::new(vector.entries());
        Ok(Self::new(vector, bm25))
    }

    /// Create with custom fusion weights
    pub fn with_fusion(mut self, fusion: RRFusion) -> Self {
        self.fusion = fusion;
        self
    }
}

#[async_trait::async_trait]
impl CorpusSearch for HybridSearch {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Candidate>> {
        // Fetch more results from each index for better fusion
        let expanded_limit = k.saturating_mul(2);

        // Execute both searches in parallel
        let (vector_results, bm25_results) = tokio::join!(
            self.vector.search(query, expanded_limit),
            self.bm25.search(query, expanded_limit)
        );

        let vector_results = vector_results.unwrap_or_else(|e| {
            warn!(error = %e, "Vector side of hybrid search failed");
            Vec::new()
        });
        let bm25_results = bm25_results.unwrap_or_else(|e| {
            warn!(error = %e, "Lexical side of hybrid search failed");
            Vec::new()
        });

        Ok(self
            .fusion
            .fuse(vector_results, bm25_results, k)
            .into_iter()
            .map(|r| r.candidate)
            .collect())
    }

    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Hybrid
    }

    fn len(&self) -> usize {
        self.vector.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundline_common::embeddings::HashingEmbedder;
    use groundline_common::models::Chunk;

    #[tokio::test]
    async fn test_hybrid_candidates_carry_embeddings() {
        let entries = vec![
            CorpusEntry::new(Chunk::new("Author: David Torres", "thesis.pdf", 0).with_page(1)),
            CorpusEntry::new(Chunk::new("Chapter two covers methodology", "thesis.pdf", 1).with_page(5)),
            CorpusEntry::new(Chunk::new("Campus map and parking", "guide.pdf", 0)),
        ];
        let search = HybridSearch::build(entries, Arc::new(HashingEmbedder::new(128)))
            .await
            .unwrap();

        let hits = search.search("thesis author", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk.text, "Author: David Torres");
        assert!(hits.iter().all(|h| h.embedding.is_some()));
        assert_eq!(search.mode(), RetrievalMode::Hybrid);
        assert_eq!(search.len(), 3);
    }
}
