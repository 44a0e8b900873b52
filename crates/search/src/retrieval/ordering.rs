//! Page-priority ordering of a selection

use groundline_common::models::ScoredChunk;

/// Stable ascending sort by page number, chunks without a page last
pub fn prioritize_pages(chunks: &mut [ScoredChunk]) {
    chunks.sort_by_key(|c| (c.chunk.page_number.is_none(), c.chunk.page_number));
}
