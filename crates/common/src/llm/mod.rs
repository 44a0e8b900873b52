//! Generation (LLM) client abstraction
//!
//! Provides:
//! - OpenAI-compatible chat completions client
//! - Offline deterministic generator used when no API key is configured

use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Prompt marker preceding the question to rephrase
pub const FOLLOW_UP_MARKER: &str = "Follow-up question:";

/// Prompt marker preceding the retrieved context block
pub const CONTEXT_MARKER: &str = "CONTEXT:";

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One message of a chat completion request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Text generation backend
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate a reply to a sequence of messages
    async fn generate(&self, messages: &[ChatMessage], temperature: f32) -> Result<String>;

    /// Generate a reply to a single instruction
    async fn complete(&self, instruction: &str, temperature: f32) -> Result<String> {
        self.generate(&[ChatMessage::user(instruction)], temperature)
            .await
    }

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat completions client
pub struct OpenAICompatibleGenerator {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: usize,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: usize,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl OpenAICompatibleGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl Generator for OpenAICompatibleGenerator {
    async fn generate(&self, messages: &[ChatMessage], temperature: f32) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AppError::Generation {
                message: format!("LLM API request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Generation {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        let chat_response: ChatResponse =
            response.json().await.map_err(|e| AppError::Generation {
                message: format!("Failed to parse LLM response: {}", e),
            })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::Generation {
                message: "Empty response from LLM".to_string(),
            })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Offline generator.
///
/// Rephrasing prompts, sent as a single user instruction, get the follow-up
/// question back unchanged. Grounded prompts get the context line sharing
/// the most words with the last user message. Anything else, including a
/// context with no shared words, gets a fixed "not specified" answer.
#[derive(Debug, Default, Clone)]
pub struct MockGenerator;

impl MockGenerator {
    pub fn new() -> Self {
        Self
    }

    fn follow_up(messages: &[ChatMessage]) -> Option<String> {
        let [instruction] = messages else {
            return None;
        };
        if instruction.role != MessageRole::User {
            return None;
        }

        let start = instruction.content.rfind(FOLLOW_UP_MARKER)? + FOLLOW_UP_MARKER.len();
        let line = instruction.content[start..]
            .lines()
            .find(|l| !l.trim().is_empty())?;
        Some(line.trim().to_string())
    }

    fn grounded_answer(messages: &[ChatMessage]) -> Option<String> {
        let context = messages.iter().find_map(|m| {
            let start = m.content.find(CONTEXT_MARKER)? + CONTEXT_MARKER.len();
            Some(&m.content[start..])
        })?;

        let question = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let wanted: HashSet<String> = words(question).collect();

        let best = context
            .lines()
            .map(str::trim)
            .filter(|l| l.starts_with('['))
            .filter(|l| !l.starts_with("[Source:"))
            .enumerate()
            .map(|(i, line)| {
                let overlap = words(line).filter(|w| wanted.contains(w)).count();
                (overlap, std::cmp::Reverse(i), line)
            })
            .max()
            .filter(|(overlap, _, _)| *overlap > 0)?;

        Some(format!("According to the documents: {}", best.2))
    }
}

fn words(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
        .map(|w| w.to_lowercase())
}

#[async_trait]
impl Generator for MockGenerator {
    async fn generate(&self, messages: &[ChatMessage], _temperature: f32) -> Result<String> {
        if let Some(question) = Self::follow_up(messages) {
            return Ok(question);
        }

        Ok(Self::grounded_answer(messages).unwrap_or_else(|| {
            "That information is not specified in the documents.".to_string()
        }))
    }

    fn model_name(&self) -> &str {
        "mock-generator"
    }
}

/// Create a generator based on configuration
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    if config.api_key.is_empty() {
        tracing::warn!("generation.api_key not set, using offline mock generator");
        return Ok(Arc::new(MockGenerator::new()));
    }

    Ok(Arc::new(OpenAICompatibleGenerator::new(config)?))
}
