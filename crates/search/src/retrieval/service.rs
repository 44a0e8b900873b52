//! Retrieval stage: wide fetch, MMR selection, page ordering

use super::{mmr, prioritize_pages, CorpusSearch, RetrievalParams, RetrievalResult};
use groundline_common::metrics;
use groundline_common::models::ScoredChunk;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Retrieves at most `k` diverse chunks for a query
pub struct Retriever {
    corpus: Arc<dyn CorpusSearch>,
    params: RetrievalParams,
}

impl Retriever {
    pub fn new(corpus: Arc<dyn CorpusSearch>, params: RetrievalParams) -> Self {
        Self { corpus, params }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Number of chunks in the underlying corpus
    pub fn corpus_size(&self) -> usize {
        self.corpus.len()
    }

    /// Run one retrieval.
    ///
    /// Candidates below `min_relevance` are dropped before selection, so an
    /// unrelated query yields an empty result. A corpus search error is
    /// logged and counted, and also yields an empty result.
    #[instrument(skip(self), fields(mode = self.corpus.mode().as_str(), k = self.params.k))]
    pub async fn retrieve(&self, query: &str) -> RetrievalResult {
        let start = Instant::now();
        let mode = self.corpus.mode().as_str();
        let fetch_k = self.params.effective_fetch_k();

        let mut candidates = match self.corpus.search(query, fetch_k).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "Corpus search failed, continuing with no results");
                metrics::record_retrieval_failure(mode);
                Vec::new()
            }
        };

        let fetched = candidates.len();
        candidates.retain(|c| c.relevance >= self.params.min_relevance);

        let selected = mmr::select(&candidates, self.params.k, self.params.diversity_weight);

        let mut chunks: Vec<ScoredChunk> = selected
            .into_iter()
            .map(|i| ScoredChunk {
                chunk: candidates[i].chunk.clone(),
                score: candidates[i].score,
            })
            .collect();

        if self.params.page_priority {
            prioritize_pages(&mut chunks);
        }

        debug!(
            fetched,
            candidates = candidates.len(),
            selected = chunks.len(),
            "Retrieval complete"
        );
        metrics::record_retrieval(start.elapsed().as_secs_f64(), mode, chunks.len());

        RetrievalResult::new(chunks)
    }
}
