//! Groundline Search Library
//!
//! Corpus loading and the retrieval stage of the pipeline:
//! - In-memory vector, BM25, and hybrid (RRF) corpus search
//! - Maximal Marginal Relevance selection
//! - Page-priority ordering of the final selection

pub mod corpus;
pub mod retrieval;

pub use corpus::{load_corpus, CorpusEntry};
pub use retrieval::{
    Bm25Index, Candidate, CorpusSearch, HybridSearch, RetrievalMode, RetrievalParams,
    RetrievalResult, Retriever, VectorIndex,
};
