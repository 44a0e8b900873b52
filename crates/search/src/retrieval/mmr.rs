//! Maximal Marginal Relevance selection
//!
//! Each step picks the candidate maximizing
//! `lambda * relevance - (1 - lambda) * max_similarity(candidate, selected)`.

use super::vector::cosine_similarity;
use super::Candidate;
use groundline_common::embeddings::tokenize;
use std::collections::HashSet;

/// Similarity between two candidates.
///
/// Cosine over embeddings when both carry one of equal length, otherwise
/// Jaccard overlap of their token sets.
pub fn similarity(a: &Candidate, b: &Candidate) -> f32 {
    match (&a.embedding, &b.embedding) {
        (Some(x), Some(y)) if x.len() == y.len() && !x.is_empty() => cosine_similarity(x, y),
        _ => lexical_overlap(&a.chunk.text, &b.chunk.text),
    }
}

/// Jaccard similarity of lowercase token sets
pub fn lexical_overlap(a: &str, b: &str) -> f32 {
    let a: HashSet<String> = tokenize(a).collect();
    let b: HashSet<String> = tokenize(b).collect();
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(&b).count() as f32;
    let union = a.union(&b).count() as f32;
    shared / union
}

/// Choose up to `k` candidate indices.
///
/// `candidates` must be in descending relevance order; among equal MMR
/// scores the better-ranked candidate wins. The returned indices are in
/// selection order.
pub fn select(candidates: &[Candidate], k: usize, lambda: f32) -> Vec<usize> {
    let lambda = lambda.clamp(0.0, 1.0);
    let target = k.min(candidates.len());
    let mut selected: Vec<usize> = Vec::with_capacity(target);
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < target {
        let mut best: Option<(usize, f32)> = None;

        for (slot, &idx) in remaining.iter().enumerate() {
            let max_sim = selected
                .iter()
                .map(|&s| similarity(&candidates[idx], &candidates[s]))
                .fold(None, |acc: Option<f32>, v| Some(acc.map_or(v, |a| a.max(v))))
                .unwrap_or(0.0);

            let score = lambda * candidates[idx].score - (1.0 - lambda) * max_sim;
            if best.map_or(true, |(_, b)| score > b) {
                best = Some((slot, score));
            }
        }

        match best {
            Some((slot, _)) => selected.push(remaining.remove(slot)),
            None => break,
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundline_common::models::Chunk;

    fn candidate(text: &str, index: u32, score: f32, embedding: Option<Vec<f32>>) -> Candidate {
        Candidate {
            chunk: Chunk::new(text, "doc.pdf", index),
            score,
            relevance: score,
            embedding,
        }
    }

    #[test]
    fn test_prefers_diverse_over_near_duplicate() {
        let candidates = vec![
            candidate("a", 0, 0.95, Some(vec![1.0, 0.0])),
            candidate("b", 1, 0.94, Some(vec![0.99, 0.01])),
            candidate("c", 2, 0.80, Some(vec![0.0, 1.0])),
        ];

        assert_eq!(select(&candidates, 2, 0.5), vec![0, 2]);
    }

    #[test]
    fn test_lambda_one_is_pure_relevance() {
        let candidates = vec![
            candidate("a", 0, 0.95, Some(vec![1.0, 0.0])),
            candidate("b", 1, 0.94, Some(vec![1.0, 0.0])),
            candidate("c", 2, 0.80, Some(vec![0.0, 1.0])),
        ];

        assert_eq!(select(&candidates, 3, 1.0), vec![0, 1, 2]);
    }

    #[test]
    fn test_ties_broken_by_rank() {
        let candidates = vec![
            candidate("alpha", 0, 0.5, None),
            candidate("beta", 1, 0.5, None),
            candidate("gamma", 2, 0.5, None),
        ];

        assert_eq!(select(&candidates, 3, 0.5), vec![0, 1, 2]);
    }

    #[test]
    fn test_bounded_by_k_and_pool() {
        let candidates: Vec<Candidate> = (0..10)
            .map(|i| candidate(&format!("text {}", i), i, 1.0 - i as f32 * 0.05, None))
            .collect();

        assert_eq!(select(&candidates, 4, 0.5).len(), 4);
        assert_eq!(select(&candidates[..2], 4, 0.5).len(), 2);
        assert!(select(&[], 4, 0.5).is_empty());
        assert!(select(&candidates, 0, 0.5).is_empty());
    }

    #[test]
    fn test_lexical_fallback_without_embeddings() {
        let candidates = vec![
            candidate("vacation days accrue monthly", 0, 0.9, None),
            candidate("vacation days accrue monthly for staff", 1, 0.89, None),
            candidate("parking permits are issued yearly", 2, 0.7, None),
        ];

        assert_eq!(select(&candidates, 2, 0.5), vec![0, 2]);
    }

    #[test]
    fn test_lexical_overlap() {
        assert!((lexical_overlap("a b", "a b") - 1.0).abs() < 1e-6);
        assert_eq!(lexical_overlap("a b", "c d"), 0.0);
        assert_eq!(lexical_overlap("", ""), 0.0);
    }
}
