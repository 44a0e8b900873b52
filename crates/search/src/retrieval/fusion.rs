//! Reciprocal Rank Fusion (RRF) for combining search results
//!
//! RRF is a simple but effective fusion method that:
//! - Doesn't require score normalization
//! - Works well with different scoring distributions
//! - Is robust to outliers

use super::Candidate;
use std::collections::HashMap;

/// RRF fusion parameters
#[derive(Debug, Clone)]
pub struct RRFusion {
    /// Constant k (typically 60)
    pub k: f32,

    /// Weight for vector results
    pub vector_weight: f32,

    /// Weight for BM25 results
    pub bm25_weight: f32,
}

impl Default for RRFusion {
    fn default() -> Self {
        Self {
            k: 60.0,
            vector_weight: 0.6,
            bm25_weight: 0.4,
        }
    }
}

/// Result of fusion
#[derive(Debug, Clone)]
pub struct FusionResult {
    pub candidate: Candidate,
    pub vector_rank: Option<usize>,
    pub bm25_rank: Option<usize>,
    pub rrf_score: f32,
}

impl RRFusion {
    /// Create with custom weights
    pub fn with_weights(vector_weight: f32, bm25_weight: f32) -> Self {
        Self {
            k: 60.0,
            vector_weight,
            bm25_weight,
        }
    }

    /// Fuse vector and BM25 results using RRF.
    ///
    /// Chunks are identified by `(source_id, chunk_index)`. When a chunk
    /// appears on both sides the vector candidate, with its embedding, is
    /// kept, along with the higher of the two pre-fusion relevances.
    /// Equal fused scores keep first-seen order, vector side first.
    pub fn fuse(
        &self,
        vector_results: Vec<Candidate>,
        bm25_results: Vec<Candidate>,
        limit: usize,
    ) -> Vec<FusionResult> {
        let mut positions: HashMap<(String, u32), usize> = HashMap::new();
        let mut merged: Vec<(Candidate, Option<usize>, Option<usize>)> = Vec::new();

        // Add vector results with ranks
        for (rank, candidate) in vector_results.into_iter().enumerate() {
            let key = (candidate.chunk.source_id.clone(), candidate.chunk.chunk_index);
            if positions.contains_key(&key) {
                continue;
            }
            positions.insert(key, merged.len());
            merged.push((candidate, Some(rank + 1), None));
        }

        // Add or update with BM25 results
        for (rank, candidate) in bm25_results.into_iter().enumerate() {
            let key = (candidate.chunk.source_id.clone(), candidate.chunk.chunk_index);
            match positions.get(&key) {
                Some(&pos) => {
                    let (existing, _, bm25_rank) = &mut merged[pos];
                    if bm25_rank.is_none() {
                        *bm25_rank = Some(rank + 1);
                    }
                    existing.relevance = existing.relevance.max(candidate.relevance);
                    if existing.embedding.is_none() {
                        existing.embedding = candidate.embedding;
                    }
                }
                None => {
                    positions.insert(key, merged.len());
                    merged.push((candidate, None, Some(rank + 1)));
                }
            }
        }

        // Calculate RRF scores
        let mut results: Vec<FusionResult> = merged
            .into_iter()
            .map(|(mut candidate, vector_rank, bm25_rank)| {
                let vector_rrf = vector_rank
                    .map(|r| self.vector_weight / (self.k + r as f32))
                    .unwrap_or(0.0);

                let bm25_rrf = bm25_rank
                    .map(|r| self.bm25_weight / (self.k + r as f32))
                    .unwrap_or(0.0);

                let rrf_score = vector_rrf + bm25_rrf;
                candidate.score = rrf_score;

                FusionResult {
                    candidate,
                    vector_rank,
                    bm25_rank,
                    rrf_score,
                }
            })
            .collect();

        // Sort by RRF score descending
        results.sort_by(|a, b| {
            b.rrf_score
                .partial_cmp(&a.rrf_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        results.truncate(limit);

        // Normalize scores to 0-1 range
        if let Some(max_score) = results.first().map(|r| r.rrf_score) {
            if max_score > 0.0 {
                for result in &mut results {
                    result.rrf_score /= max_score;
                    result.candidate.score = result.rrf_score;
                }
            }
        }

        results
    }
}
