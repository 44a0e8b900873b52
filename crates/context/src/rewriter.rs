//! Follow-up question rewriting
//!
//! Turns a context-dependent follow-up ("and how long does it last?") into
//! a standalone query suitable for corpus search.

use groundline_common::config::RewriterConfig;
use groundline_common::llm::{Generator, FOLLOW_UP_MARKER};
use groundline_common::metrics;
use groundline_common::models::{Role, Turn};
use std::sync::Arc;
use tracing::{debug, warn};

const REWRITE_TEMPERATURE: f32 = 0.0;

pub struct QueryRewriter {
    generator: Arc<dyn Generator>,
    history_turns: usize,
    enabled: bool,
}

impl QueryRewriter {
    pub fn new(generator: Arc<dyn Generator>, config: &RewriterConfig) -> Self {
        Self {
            generator,
            history_turns: config.history_turns,
            enabled: config.enabled,
        }
    }

    /// Number of trailing turns the rewriter looks at
    pub fn history_turns(&self) -> usize {
        self.history_turns
    }

    /// Standalone form of `query`.
    ///
    /// With no history (or rewriting disabled) the query is returned
    /// unchanged and no generation call is made. Generation errors and
    /// empty answers fall back to the raw query.
    pub async fn rewrite(&self, query: &str, history: &[Turn]) -> String {
        let start = history.len().saturating_sub(self.history_turns);
        let history = &history[start..];

        if !self.enabled || history.is_empty() {
            return query.to_string();
        }

        let prompt = build_prompt(query, history);

        match self.generator.complete(&prompt, REWRITE_TEMPERATURE).await {
            Ok(answer) => match clean(&answer) {
                Some(rewritten) => {
                    debug!(original = query, rewritten = %rewritten, "Query rewritten");
                    rewritten
                }
                None => {
                    warn!("Rewriter returned an empty answer, using raw query");
                    metrics::record_rewrite_fallback("empty");
                    query.to_string()
                }
            },
            Err(e) => {
                warn!(error = %e, "Rewrite failed, using raw query");
                metrics::record_rewrite_fallback("error");
                query.to_string()
            }
        }
    }
}

fn build_prompt(query: &str, history: &[Turn]) -> String {
    let mut prompt = String::from(
        "Given the chat history and a follow-up question, rephrase the follow-up \
         question into a standalone question that can be understood without the \
         chat history. Resolve pronouns and references using the history. Do NOT \
         answer the question; return only the rephrased question, or the question \
         unchanged if it is already standalone.\n\nChat history:\n",
    );

    for turn in history {
        let speaker = match turn.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        prompt.push_str(&format!("{}: {}\n", speaker, turn.text.trim()));
    }

    prompt.push_str(&format!(
        "\n{} {}\nStandalone question:",
        FOLLOW_UP_MARKER,
        query.trim()
    ));
    prompt
}

/// Trim labels and wrapping quotes a model may add
fn clean(answer: &str) -> Option<String> {
    let mut text = answer.trim();
    if let Some(rest) = text.strip_prefix("Standalone question:") {
        text = rest.trim();
    }
    for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”')] {
        if text.len() >= 2 && text.starts_with(open) && text.ends_with(close) {
            text = text[open.len_utf8()..text.len() - close.len_utf8()].trim();
        }
    }

    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use groundline_common::errors::{AppError, Result};
    use groundline_common::llm::ChatMessage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replies with a fixed answer and counts calls
    struct Scripted {
        reply: Result<String>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn ok(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(reply.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(AppError::Generation {
                    message: "timeout".to_string(),
                }),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Generator for Scripted {
        async fn generate(&self, _messages: &[ChatMessage], temperature: f32) -> Result<String> {
            assert_eq!(temperature, 0.0);
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(AppError::Generation {
                    message: "timeout".to_string(),
                }),
            }
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn history() -> Vec<Turn> {
        vec![
            Turn::user("What is the vacation policy?"),
            Turn::assistant("Employees get 22 days."),
        ]
    }

    fn rewriter(generator: Arc<dyn Generator>) -> QueryRewriter {
        QueryRewriter::new(generator, &RewriterConfig::default())
    }

    #[tokio::test]
    async fn test_empty_history_is_identity_without_call() {
        let generator = Scripted::ok("something else");
        let out = rewriter(generator.clone()).rewrite("How long is it?", &[]).await;

        assert_eq!(out, "How long is it?");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rewrites_with_history() {
        let generator = Scripted::ok("\"How many vacation days do employees get?\"");
        let out = rewriter(generator.clone()).rewrite("How many?", &history()).await;

        assert_eq!(out, "How many vacation days do employees get?");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_raw() {
        let out = rewriter(Scripted::failing()).rewrite("How many?", &history()).await;
        assert_eq!(out, "How many?");
    }

    #[tokio::test]
    async fn test_empty_answer_falls_back_to_raw() {
        let out = rewriter(Scripted::ok("  \n")).rewrite("How many?", &history()).await;
        assert_eq!(out, "How many?");
    }

    #[tokio::test]
    async fn test_disabled_is_identity() {
        let generator = Scripted::ok("rewritten");
        let config = RewriterConfig {
            enabled: false,
            ..RewriterConfig::default()
        };
        let out = QueryRewriter::new(generator.clone(), &config)
            .rewrite("How many?", &history())
            .await;

        assert_eq!(out, "How many?");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_prompt_contains_history_and_question() {
        let prompt = build_prompt("How many?", &history());
        assert!(prompt.contains("User: What is the vacation policy?"));
        assert!(prompt.contains("Assistant: Employees get 22 days."));
        assert!(prompt.contains("Follow-up question: How many?"));
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean("Standalone question: 'Where?'").as_deref(), Some("Where?"));
        assert_eq!(clean("“Quoted”").as_deref(), Some("Quoted"));
        assert_eq!(clean("\"\""), None);
    }
}
