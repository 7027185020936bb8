//! Language model abstraction.
//!
//! The doctor pipeline talks to the model through the [`ChatModel`] trait so the
//! provider can be swapped (or scripted in tests). [`OpenAiChatModel`] is the
//! production implementation for OpenAI-compatible chat completion endpoints.

mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use openai::{mask_token, OpenAiChatModel};

/// Role of a prompt message, one-to-one with the chat completion `role` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageRole {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(LlmError::InvalidRole(other.to_string())),
        }
    }
}

/// A single message of a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: MessageRole,
    pub content: String,
}

impl PromptMessage {
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

/// Model reply with the usage metadata we persist alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: String,
    pub tokens_used: Option<u32>,
    pub model: String,
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider request failed: {0}")]
    Provider(#[from] async_openai::error::OpenAIError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider returned an empty response")]
    EmptyResponse,

    #[error("Unknown message role: {0}")]
    InvalidRole(String),
}

/// Chat completion interface used by the doctor service.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Returns the model reply for the given prompt.
    async fn complete(&self, messages: &[PromptMessage]) -> Result<Completion, LlmError>;

    /// Model identifier, recorded with each assistant message.
    fn model_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [MessageRole::System, MessageRole::User, MessageRole::Assistant] {
            assert_eq!(role.as_str().parse::<MessageRole>().unwrap(), role);
        }
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let err = "tool".parse::<MessageRole>().unwrap_err();
        assert!(matches!(err, LlmError::InvalidRole(r) if r == "tool"));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&PromptMessage::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }
}
