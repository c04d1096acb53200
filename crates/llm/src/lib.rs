//! Text-generation gateway for Accord
//!
//! The engine consumes generated text through the [`LlmService`] trait:
//! either atomically via [`LlmService::complete`] or as an incremental
//! token stream via [`LlmService::complete_stream`]. The gateway is
//! stateless per call — conversation history is always resent — and is
//! treated as unreliable: callers must surface [`LlmError::Unavailable`]
//! for explicit retry rather than retrying silently.

pub mod anthropic;
pub mod mock;

use std::pin::Pin;
use std::sync::Arc;

use accord_common::{Config, LlmProvider};
use futures::Stream;
use serde::{Deserialize, Serialize};

pub use anthropic::AnthropicService;
pub use mock::MockLlmService;

/// Errors from the text-generation gateway
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The gateway could not be reached or returned a server error.
    /// Distinguished from [`LlmError::Empty`] so callers can offer retry.
    #[error("LLM service unavailable: {0}")]
    Unavailable(String),

    #[error("LLM rate limit exceeded")]
    RateLimit,

    #[error("LLM request error: {0}")]
    Request(String),

    #[error("LLM response error: {0}")]
    Response(String),

    /// The gateway answered but produced no text
    #[error("LLM returned an empty response")]
    Empty,
}

/// Role tag on a message sent to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    User,
    Assistant,
}

/// One entry of the role-tagged message list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::Assistant,
            content: content.into(),
        }
    }
}

/// Request for a completion
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model to use; empty string selects the provider default
    pub model: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<LlmMessage>,
    pub max_tokens: Option<u32>,
}

/// Atomic completion response
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub model: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub stop_reason: String,
}

/// Incremental text chunks, terminated by the stream ending.
/// An `Err` item aborts the stream.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// LLM provider configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub default_model: String,
    pub max_tokens: u32,
    pub base_url: Option<String>,
}

impl LlmConfig {
    pub fn new(api_key: String, default_model: String) -> Self {
        Self {
            api_key,
            default_model,
            max_tokens: 4096,
            base_url: None,
        }
    }
}

/// Text-generation service contract
#[async_trait::async_trait]
pub trait LlmService: Send + Sync {
    /// Complete atomically: the full response text in one shot
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Complete as a stream of text chunks. The stream ends when the
    /// provider signals completion; callers own both persistence and
    /// fan-out of the chunks.
    async fn complete_stream(&self, request: CompletionRequest) -> Result<TextStream, LlmError>;

    fn default_model(&self) -> &str;
}

/// Construct the configured LLM service
pub struct LlmServiceFactory;

impl LlmServiceFactory {
    pub fn create(config: &Config) -> Arc<dyn LlmService> {
        match config.llm_provider {
            LlmProvider::Anthropic => Arc::new(AnthropicService::new(LlmConfig::new(
                config.anthropic_api_key.clone(),
                config.llm_model.clone(),
            ))),
            LlmProvider::Mock => Arc::new(MockLlmService::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_message_constructors() {
        let m = LlmMessage::user("hi");
        assert_eq!(m.role, LlmRole::User);
        assert_eq!(m.content, "hi");

        let m = LlmMessage::assistant("hello");
        assert_eq!(m.role, LlmRole::Assistant);
    }

    #[test]
    fn test_llm_config_defaults() {
        let cfg = LlmConfig::new("key".to_string(), "model-x".to_string());
        assert_eq!(cfg.max_tokens, 4096);
        assert!(cfg.base_url.is_none());
    }

    #[test]
    fn test_llm_error_display_distinguishes_unavailable_from_empty() {
        let unavailable = LlmError::Unavailable("connect refused".to_string());
        assert!(unavailable.to_string().contains("unavailable"));
        assert!(LlmError::Empty.to_string().contains("empty"));
    }
}
