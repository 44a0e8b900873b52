//! Context assembly
//!
//! Merges the retrieved chunks into one numbered grounding block and a
//! de-duplicated citation list.

use groundline_search::RetrievalResult;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Visible separator between chunk entries
pub const SEPARATOR: &str = "\n---\n";

/// A human-readable source reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Humanized source name
    pub source: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl fmt::Display for Citation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.page {
            Some(page) => write!(f, "{} (page {})", self.source, page),
            None => write!(f, "{}", self.source),
        }
    }
}

/// Grounding text plus the citations backing it
#[derive(Debug, Clone, PartialEq)]
pub struct GroundingBlock {
    pub text: String,
    pub citations: Vec<Citation>,

    /// Non-whitespace characters of the chunk texts alone, labels excluded
    pub content_chars: usize,
}

/// Output of the assembly stage.
///
/// `NoResults` is its own variant so an empty retrieval can never be
/// confused with a short or blank block.
#[derive(Debug, Clone, PartialEq)]
pub enum AssembledContext {
    NoResults,
    Grounded(GroundingBlock),
}

impl AssembledContext {
    pub fn citations(&self) -> &[Citation] {
        match self {
            AssembledContext::NoResults => &[],
            AssembledContext::Grounded(block) => &block.citations,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ContextAssembler;

impl ContextAssembler {
    pub fn new() -> Self {
        Self
    }

    pub fn assemble(&self, result: &RetrievalResult) -> AssembledContext {
        if result.is_empty() {
            return AssembledContext::NoResults;
        }

        let mut entries = Vec::with_capacity(result.len());
        let mut citations: Vec<Citation> = Vec::new();
        let mut content_chars = 0;

        for (i, scored) in result.iter().enumerate() {
            let chunk = &scored.chunk;
            let source = display_name(&chunk.source_id);
            content_chars += chunk.text.chars().filter(|c| !c.is_whitespace()).count();

            let mut entry = match chunk.page_number {
                Some(page) => format!(
                    "[{}] (page {}) {}\n[Source: {}, page {}]",
                    i + 1,
                    page,
                    chunk.text.trim(),
                    source,
                    page
                ),
                None => format!("[{}] {}\n[Source: {}]", i + 1, chunk.text.trim(), source),
            };
            if let Some(summary) = chunk.document_summary.as_deref().filter(|s| !s.trim().is_empty()) {
                entry.push_str(&format!("\nDocument summary: {}", summary.trim()));
            }
            entries.push(entry);

            let citation = Citation {
                source,
                page: chunk.page_number,
            };
            if !citations.contains(&citation) {
                citations.push(citation);
            }
        }

        AssembledContext::Grounded(GroundingBlock {
            text: entries.join(SEPARATOR),
            citations,
            content_chars,
        })
    }
}

/// Humanize a source id: file name only, extension stripped, words split
/// on `_`/`-` and capitalized. `docs/tesis_de_grado.pdf` → `Tesis De Grado`.
pub fn display_name(source_id: &str) -> String {
    let file_name = source_id
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source_id);
    let stem = match file_name.rfind('.') {
        Some(dot) if dot > 0 => &file_name[..dot],
        _ => file_name,
    };

    let name = stem
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");

    if name.is_empty() {
        source_id.to_string()
    } else {
        name
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groundline_common::models::{Chunk, ScoredChunk};

    fn scored(chunk: Chunk) -> ScoredChunk {
        ScoredChunk { chunk, score: 0.9 }
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name("docs/tesis_de_grado.pdf"), "Tesis De Grado");
        assert_eq!(display_name("C:\\files\\student-handbook.v2.pdf"), "Student Handbook.v2");
        assert_eq!(display_name("reglamento"), "Reglamento");
        assert_eq!(display_name(".hidden"), ".hidden");
    }

    #[test]
    fn test_empty_result_is_no_results() {
        let context = ContextAssembler::new().assemble(&RetrievalResult::empty());
        assert_eq!(context, AssembledContext::NoResults);
        assert!(context.citations().is_empty());
    }

    #[test]
    fn test_block_format() {
        let result = RetrievalResult::new(vec![
            scored(Chunk::new("Author: David Torres", "thesis.pdf", 0).with_page(1)),
            scored(Chunk::new("Campus map", "guide.pdf", 3)),
        ]);

        let AssembledContext::Grounded(block) = ContextAssembler::new().assemble(&result) else {
            panic!("expected grounded context");
        };

        assert_eq!(
            block.text,
            "[1] (page 1) Author: David Torres\n[Source: Thesis, page 1]\n---\n[2] Campus map\n[Source: Guide]"
        );
        assert_eq!(block.citations.len(), 2);
        assert_eq!(block.citations[0].to_string(), "Thesis (page 1)");
        assert_eq!(block.citations[1].to_string(), "Guide");
        assert_eq!(block.content_chars, "Author:DavidTorres".len() + "Campusmap".len());
    }

    #[test]
    fn test_citations_deduplicated_in_first_seen_order() {
        let result = RetrievalResult::new(vec![
            scored(Chunk::new("a", "rules.pdf", 0).with_page(2)),
            scored(Chunk::new("b", "thesis.pdf", 1).with_page(1)),
            scored(Chunk::new("c", "rules.pdf", 2).with_page(2)),
            scored(Chunk::new("d", "rules.pdf", 3).with_page(4)),
        ]);

        let context = ContextAssembler::new().assemble(&result);
        let citations: Vec<String> = context.citations().iter().map(|c| c.to_string()).collect();

        assert_eq!(citations, vec!["Rules (page 2)", "Thesis (page 1)", "Rules (page 4)"]);
    }

    #[test]
    fn test_summary_included() {
        let result = RetrievalResult::new(vec![scored(
            Chunk::new("Article 4", "rules.pdf", 0)
                .with_page(3)
                .with_summary("University bylaws"),
        )]);

        let AssembledContext::Grounded(block) = ContextAssembler::new().assemble(&result) else {
            panic!("expected grounded context");
        };
        assert!(block.text.ends_with("Document summary: University bylaws"));
    }
}
