//! Text-generation backend abstraction
//!
//! The engine treats the backend as a black-box chat completion
//! function: ordered messages in, free text out, with no structural
//! guarantee on the output. Every consumer extracts structured data
//! defensively through the helpers in this module and turns parse
//! failures into typed results rather than propagated errors.

mod openai;
mod stub;

pub use openai::OpenAiTextGenerator;
pub use stub::StubTextGenerator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::config::{LlmConfig, ProviderKind};

/// Error type for backend failures (transport, protocol, exhaustion).
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM request failed: {0}")]
    Http(String),

    #[error("LLM API error: {0}")]
    Api(String),

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("LLM provider misconfigured: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message in the conversation sent to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Abstract interface for text-generation backends.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for the given conversation. The returned
    /// text carries no structural guarantees.
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String, LlmError>;

    /// Short provider name for logging.
    fn name(&self) -> &str;
}

/// Creates a backend from configuration.
pub struct TextGeneratorFactory;

impl TextGeneratorFactory {
    pub fn create(config: &LlmConfig) -> Result<Arc<dyn TextGenerator>, LlmError> {
        match config.provider {
            ProviderKind::Stub => Ok(Arc::new(StubTextGenerator::new())),
            ProviderKind::OpenAi => Ok(Arc::new(OpenAiTextGenerator::new(config.clone())?)),
        }
    }
}

/// Strip an optional fenced code block wrapper (``` or ```json) from a
/// model response, returning the inner text. Text without a fence is
/// returned trimmed.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the language tag line if present
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    match rest.rfind("```") {
        Some(idx) => rest[..idx].trim(),
        None => rest.trim(),
    }
}

/// Slice out the outermost JSON object from a free-text response.
/// Falls back to the trimmed input when no braces are found.
pub fn extract_json_object(text: &str) -> &str {
    let text = text.trim();
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if end > start {
            return &text[start..=end];
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_fence_with_language_tag() {
        let fenced = "```json\n{\"status\": \"SUCCESS\"}\n```";
        assert_eq!(strip_code_fence(fenced), "{\"status\": \"SUCCESS\"}");
    }

    #[test]
    fn test_strip_code_fence_without_fence() {
        let bare = "  {\"status\": \"SUCCESS\"}  ";
        assert_eq!(strip_code_fence(bare), "{\"status\": \"SUCCESS\"}");
    }

    #[test]
    fn test_fenced_and_bare_parse_identically() {
        let payload = "{\"status\":\"SUCCESS\",\"parameters\":[]}";
        let fenced = format!("```json\n{}\n```", payload);
        let a: serde_json::Value = serde_json::from_str(strip_code_fence(&fenced)).unwrap();
        let b: serde_json::Value = serde_json::from_str(strip_code_fence(payload)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_extract_json_object_from_chatter() {
        let noisy = "Sure! Here is the result:\n{\"ids\": \"1,2\"}\nLet me know.";
        assert_eq!(extract_json_object(noisy), "{\"ids\": \"1,2\"}");
    }

    #[test]
    fn test_extract_json_object_no_braces() {
        assert_eq!(extract_json_object("  plain text  "), "plain text");
    }
}
