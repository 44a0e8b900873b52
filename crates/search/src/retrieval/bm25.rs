//! BM25 lexical search over an in-memory inverted index
//!
//! Provides keyword-based search with ranking

use super::{Candidate, CorpusSearch, RetrievalMode};
use crate::corpus::CorpusEntry;
use groundline_common::embeddings::content_terms;
use groundline_common::errors::Result;
use std::collections::HashMap;

/// Term frequency saturation
const K1: f32 = 1.2;

/// Length normalization strength
const B: f32 = 0.75;

struct Document {
    entry: CorpusEntry,
    term_freqs: HashMap<String, u32>,
    length: usize,
}

/// BM25 index
pub struct Bm25Index {
    documents: Vec<Document>,
    doc_freqs: HashMap<String, usize>,
    avg_length: f32,
}

impl Bm25Index {
    /// Index a set of corpus entries
    pub fn new(entries: &[CorpusEntry]) -> Self {
        let mut doc_freqs: HashMap<String, usize> = HashMap::new();
        let mut documents = Vec::with_capacity(entries.len());

        for entry in entries {
            let mut term_freqs: HashMap<String, u32> = HashMap::new();
            let mut length = 0;
            for token in content_terms(&entry.chunk.text) {
                *term_freqs.entry(token).or_default() += 1;
                length += 1;
            }
            for term in term_freqs.keys() {
                *doc_freqs.entry(term.clone()).or_default() += 1;
            }
            documents.push(Document {
                entry: entry.clone(),
                term_freqs,
                length,
            });
        }

        let total: usize = documents.iter().map(|d| d.length).sum();
        let avg_length = if documents.is_empty() {
            0.0
        } else {
            total as f32 / documents.len() as f32
        };

        Self {
            documents,
            doc_freqs,
            avg_length,
        }
    }

    fn idf(&self, term: &str) -> f32 {
        let n = self.documents.len() as f32;
        let df = self.doc_freqs.get(term).copied().unwrap_or(0) as f32;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score(&self, document: &Document, terms: &[String]) -> f32 {
        let length_ratio = if self.avg_length > 0.0 {
            document.length as f32 / self.avg_length
        } else {
            1.0
        };

        terms
            .iter()
            .filter_map(|term| {
                let tf = *document.term_freqs.get(term)? as f32;
                let norm = tf * (K1 + 1.0) / (tf + K1 * (1.0 - B + B * length_ratio));
                Some(self.idf(term) * norm)
            })
            .sum()
    }
}

#[async_trait::async_trait]
impl CorpusSearch for Bm25Index {
    async fn search(&self, query: &str, k: usize) -> Result<Vec<Candidate>> {
        let mut terms: Vec<String> = content_terms(query).collect();
        terms.sort();
        terms.dedup();

        if terms.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        let mut scored: Vec<(usize, f32)> = self
            .documents
            .iter()
            .enumerate()
            .map(|(i, d)| (i, self.score(d, &terms)))
            .filter(|(_, s)| *s > 0.0)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| {
                let entry = &self.documents[i].entry;
                // Normalize score to 0-1 range
                let score = score / (score + 1.0);
                Candidate {
                    chunk: entry.chunk.clone(),
                    score,
                    relevance: score,
                    embedding: entry.embedding.clone(),
                }
            })
            .collect())
    }

    fn mode(&self) -> RetrievalMode {
        RetrievalMode::Lexical
    }

    fn len(&self) -> usize {
        self.documents.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundline_common::models::Chunk;

    fn index(texts: &[&str]) -> Bm25Index {
        let entries: Vec<CorpusEntry> = texts
            .iter()
            .enumerate()
            .map(|(i, t)| CorpusEntry::new(Chunk::new(*t, "rules.pdf", i as u32)))
            .collect();
        Bm25Index::new(&entries)
    }

    #[tokio::test]
    async fn test_ranks_matching_documents() {
        let index = index(&[
            "Students must register for exams two weeks in advance",
            "The cafeteria serves lunch from noon",
            "Exams are held in the main hall; exams last three hours",
        ]);

        let hits = index.search("exams", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.chunk_index, 2);
        assert!(hits.iter().all(|h| h.score > 0.0 && h.score < 1.0));
    }

    #[tokio::test]
    async fn test_no_overlap_returns_empty() {
        let index = index(&["The cafeteria serves lunch from noon"]);
        assert!(index.search("thesis author", 5).await.unwrap().is_empty());
        assert!(index.search("  ", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_respects_limit() {
        let index = index(&["leave policy", "leave request", "leave balance"]);
        assert_eq!(index.search("leave", 2).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_index() {
        let index = Bm25Index::new(&[]);
        assert!(index.search("anything", 3).await.unwrap().is_empty());
    }
}
