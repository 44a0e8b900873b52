//! In-memory vector similarity search
//!
//! Provides semantic search via embedding cosine similarity

use super::{Candidate, CorpusSearch, RetrievalMode};
use crate::corpus::CorpusEntry;
use groundline_common::embeddings::Embedder;
use groundline_common::errors::{AppError, Result};
use std::sync::Arc;
use tracing::info;

/// Vector index over corpus embeddings
pub struct VectorIndex {
    entries: Vec<CorpusEntry>,
    embedder: Arc<dyn Embedder>,
}

impl VectorIndex {
    /// Build the index, embedding every entry that arrived without a vector
    pub async fn build(mut entries: Vec<CorpusEntry>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let missing: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.embedding.is_none())
            .map(|(i, _)| i)
            .collect();

        if !missing.is_empty() {
            let texts: Vec<String> = missing.iter().map(|&i| entries[i].chunk.text.clone()).collect();
            let vectors = embedder.embed_batch(&texts).await?;
            if vectors.len() != missing.len() {
                return Err(AppError::CorpusUnavailable {
                    message: format!(
                        "embedder returned {} vectors for {} chunks",
                        vectors.len(),
                        missing.len()
                    ),
                });
            }
            for (i, vector) in missing.iter().zip(vectors) {
                entries[*i].embedding = Some(vector);
            }
            info!(
                embedded = missing.len(),
                model = embedder.model_name(),
                "Embedded corpus chunks"
            );
        }

        let dimension = embedder.dimension();
        if let Some(bad) = entries
            .iter()
            .find(|e| e.embedding.as_ref().map(Vec::len) != Some(dimension))
        {
            return Err(AppError::CorpusUnavailable {
                message: format!(
                    "chunk {}#{} has embedding dimension {}, expected {}",
                    bad.chunk.source_id,
                    bad.chunk.chunk_index,
                    bad.embedding.as_ref().map(Vec::len).unwrap_or(0),
                    dimension
                ),
            });
        }

        Ok(Self { entries, embedder })
    }

    /// Indexed entries, all carrying embeddings
    pub fn entries(&self) -> &[CorpusEntry] {
        &self.entries
    }
}

/// Cosine similarity; 0.0 for mismatched or zero-magnitude vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut mag_a, mut mag_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }
    let denom = mag_a.sqrt() * mag_b.sqrt();
    if denom < f64::EPSILON {
        0.0
    } else {
        (dot / denom).clamp(-1.0, 1.0) as f32
    }
}

#[async_trait::async_trait]
impl CorpusSearch for VectorIndex {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Candidate>> {
        if self.entries.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        let query_embedding = self.embedder.embed(query).await?;

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| {
                let embedding = e.embedding.as_ref()?;
                Some((i, cosine_similarity(&query_embedding, embedding)))
            })
            .collect();

        // Stable sort keeps corpus order among equal scores
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| Candidate {
                chunk: self.entries[i].chunk.clone(),
                score,
                relevance: score,
                embedding: self.entries[i].embedding.clone(),
            })
            .collect())
    }

    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Vector
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
