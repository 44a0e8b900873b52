//! Grounded answer generation
//!
//! The responder only ever calls the generator with a non-trivial
//! grounding block. Everything else gets the fixed refusal.

use crate::assembler::{AssembledContext, Citation, GroundingBlock};
use groundline_common::config::ResponderConfig;
use groundline_common::llm::{ChatMessage, Generator, CONTEXT_MARKER};
use groundline_common::metrics;
use groundline_common::models::{Role, Turn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Answer when the documents hold nothing relevant
pub const REFUSAL_MESSAGE: &str = "I could not find information about that in the available \
documents, so I can't answer it. Please ask about a topic covered by the document collection.";

/// Answer when generation fails
pub const GENERATION_FAILURE_MESSAGE: &str =
    "Sorry, I couldn't put together an answer right now. Please try asking again in a moment.";

/// Heading of the source list closing every grounded answer
pub const SOURCES_HEADING: &str = "SOURCES CONSULTED:";

/// How the answer was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// Generated from retrieved context
    Grounded,
    /// Fixed refusal, no generation call
    Refused,
    /// Generation failed, fixed apology
    Degraded,
}

impl ResponseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::Grounded => "grounded",
            ResponseKind::Refused => "refused",
            ResponseKind::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroundedResponse {
    pub text: String,
    pub kind: ResponseKind,
}

impl GroundedResponse {
    fn refused() -> Self {
        Self {
            text: REFUSAL_MESSAGE.to_string(),
            kind: ResponseKind::Refused,
        }
    }

    fn degraded() -> Self {
        Self {
            text: GENERATION_FAILURE_MESSAGE.to_string(),
            kind: ResponseKind::Degraded,
        }
    }
}

pub struct GroundedResponder {
    generator: Arc<dyn Generator>,
    temperature: f32,
    min_context_chars: usize,
}

impl GroundedResponder {
    pub fn new(generator: Arc<dyn Generator>, temperature: f32, config: &ResponderConfig) -> Self {
        Self {
            generator,
            temperature,
            min_context_chars: config.min_context_chars,
        }
    }

    /// Answer `question` from `context` only.
    ///
    /// `history` is the full conversation so far, oldest first.
    pub async fn respond(
        &self,
        question: &str,
        history: &[Turn],
        context: &AssembledContext,
    ) -> GroundedResponse {
        let block = match context {
            AssembledContext::Grounded(block) if self.has_substance(block) => block,
            AssembledContext::Grounded(_) => {
                debug!("Grounding block too short, refusing");
                metrics::record_refusal();
                return GroundedResponse::refused();
            }
            AssembledContext::NoResults => {
                debug!("No retrieval results, refusing");
                metrics::record_refusal();
                return GroundedResponse::refused();
            }
        };

        let messages = build_messages(block, history, question);

        match self.generator.generate(&messages, self.temperature).await {
            Ok(answer) if !answer.trim().is_empty() => GroundedResponse {
                text: with_sources(answer.trim(), &block.citations),
                kind: ResponseKind::Grounded,
            },
            Ok(_) => {
                warn!(model = self.generator.model_name(), "Generator returned an empty answer");
                metrics::record_generation_failure();
                GroundedResponse::degraded()
            }
            Err(e) => {
                warn!(model = self.generator.model_name(), error = %e, "Generation failed");
                metrics::record_generation_failure();
                GroundedResponse::degraded()
            }
        }
    }

    fn has_substance(&self, block: &GroundingBlock) -> bool {
        block.content_chars >= self.min_context_chars
    }
}

/// System rules followed by the grounding block
pub fn system_instruction(block: &GroundingBlock) -> String {
    let mut instruction = String::from(
        "You are an assistant that answers questions about a private document collection.\n\n\
         RULES:\n\
         1. Use ONLY the information in the CONTEXT section below to answer.\n\
         2. Never use outside knowledge, even if you believe you know the answer.\n\
         3. If the context does not contain the answer, or you are uncertain, say that the fact is not specified in the documents.\n\
         4. End your answer with a section titled \"SOURCES CONSULTED:\" listing, one per line, the sources you used.\n\n\
         Available sources:\n",
    );
    for citation in &block.citations {
        instruction.push_str(&format!("- {}\n", citation));
    }
    instruction.push_str(&format!("\n{}\n{}", CONTEXT_MARKER, block.text));
    instruction
}

fn build_messages(block: &GroundingBlock, history: &[Turn], question: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_instruction(block)));
    messages.extend(history.iter().map(|turn| match turn.role {
        Role::User => ChatMessage::user(turn.text.clone()),
        Role::Assistant => ChatMessage::assistant(turn.text.clone()),
    }));
    messages.push(ChatMessage::user(question));
    messages
}

/// Ensure the answer ends with a sources section
fn with_sources(answer: &str, citations: &[Citation]) -> String {
    if answer.to_uppercase().contains(SOURCES_HEADING) {
        return answer.to_string();
    }

    let mut text = format!("{}\n\n{}", answer, SOURCES_HEADING);
    for citation in citations {
        text.push_str(&format!("\n- {}", citation));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use groundline_common::errors::{AppError, Result};
    use std::sync::Mutex;

    /// Records the messages it receives and replies with a fixed answer
    struct Recording {
        reply: Option<String>,
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl Recording {
        fn new(reply: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.map(str::to_string),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Generator for Recording {
        async fn generate(&self, messages: &[ChatMessage], _temperature: f32) -> Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.reply.clone().ok_or_else(|| AppError::Generation {
                message: "upstream 503".to_string(),
            })
        }

        fn model_name(&self) -> &str {
            "recording"
        }
    }

    fn grounded(text: &str, citations: Vec<Citation>) -> AssembledContext {
        AssembledContext::Grounded(GroundingBlock {
            text: text.to_string(),
            citations,
            content_chars: text.chars().filter(|c| !c.is_whitespace()).count(),
        })
    }

    fn thesis_page_1() -> Citation {
        Citation {
            source: "Thesis".to_string(),
            page: Some(1),
        }
    }

    fn responder(generator: Arc<dyn Generator>) -> GroundedResponder {
        GroundedResponder::new(generator, 0.2, &ResponderConfig::default())
    }

    #[tokio::test]
    async fn test_no_results_refuses_without_generation() {
        let generator = Recording::new(Some("The sun is yellow."));
        let response = responder(generator.clone())
            .respond("What color is the sun?", &[], &AssembledContext::NoResults)
            .await;

        assert_eq!(response.text, REFUSAL_MESSAGE);
        assert_eq!(response.kind, ResponseKind::Refused);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_short_context_refuses() {
        let generator = Recording::new(Some("anything"));
        let response = responder(generator.clone())
            .respond("q", &[], &grounded("[1]  \n ", vec![]))
            .await;

        assert_eq!(response.kind, ResponseKind::Refused);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_labels_do_not_count_toward_minimum() {
        use crate::assembler::ContextAssembler;
        use groundline_common::models::{Chunk, ScoredChunk};
        use groundline_search::RetrievalResult;

        let result = RetrievalResult::new(vec![ScoredChunk {
            chunk: Chunk::new("ok fine", "docs/reglamento_estudiantil.pdf", 0).with_page(14),
            score: 1.0,
        }]);
        let context = ContextAssembler::new().assemble(&result);
        let AssembledContext::Grounded(block) = &context else {
            panic!("expected grounded context");
        };
        assert!(block.text.chars().filter(|c| !c.is_whitespace()).count() >= 20);

        let generator = Recording::new(Some("anything"));
        let response = responder(generator.clone()).respond("q", &[], &context).await;

        assert_eq!(response.kind, ResponseKind::Refused);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_grounded_answer_gets_sources_appended() {
        let generator = Recording::new(Some("The author was David Torres."));
        let context = grounded(
            "[1] (page 1) Author: David Torres\n[Source: Thesis, page 1]",
            vec![thesis_page_1()],
        );
        let history = vec![Turn::user("hello"), Turn::assistant("hi there")];

        let response = responder(generator.clone())
            .respond("Who was the thesis author?", &history, &context)
            .await;

        assert_eq!(response.kind, ResponseKind::Grounded);
        assert_eq!(
            response.text,
            "The author was David Torres.\n\nSOURCES CONSULTED:\n- Thesis (page 1)"
        );

        let seen = generator.seen.lock().unwrap();
        let messages = &seen[0];
        assert_eq!(messages.len(), 4);
        assert!(messages[0].content.contains("Use ONLY the information"));
        assert!(messages[0].content.contains("Never use outside knowledge"));
        assert!(messages[0].content.contains("not specified in the documents"));
        assert!(messages[0].content.contains(SOURCES_HEADING));
        assert!(messages[0].content.contains("Author: David Torres"));
        assert_eq!(messages[1], ChatMessage::user("hello"));
        assert_eq!(messages[2], ChatMessage::assistant("hi there"));
        assert_eq!(messages[3], ChatMessage::user("Who was the thesis author?"));
    }

    #[tokio::test]
    async fn test_existing_sources_section_kept() {
        let answer = "David Torres.\n\nSources consulted:\n- Thesis (page 1)";
        let generator = Recording::new(Some(answer));
        let context = grounded("[1] (page 1) Author: David Torres", vec![thesis_page_1()]);

        let response = responder(generator).respond("Who?", &[], &context).await;
        assert_eq!(response.text, answer);
    }

    #[tokio::test]
    async fn test_generation_error_degrades() {
        let generator = Recording::new(None);
        let context = grounded("[1] (page 1) Author: David Torres", vec![thesis_page_1()]);

        let response = responder(generator).respond("Who?", &[], &context).await;
        assert_eq!(response.text, GENERATION_FAILURE_MESSAGE);
        assert_eq!(response.kind, ResponseKind::Degraded);
    }
}
