//! Mock LLM Service Implementation
//!
//! Minimal mock used by `LlmServiceFactory` when provider is `"mock"`.
//! Returns deterministic responses, optionally scripted ahead of time,
//! and can be told to fail to exercise unavailable-gateway paths.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use futures::stream;

use crate::{CompletionRequest, CompletionResponse, LlmError, LlmService, TextStream};

/// Mock LLM service for testing
#[derive(Debug, Default)]
pub struct MockLlmService {
    scripted: Mutex<VecDeque<String>>,
    unavailable: AtomicBool,
}

impl MockLlmService {
    /// Create a new mock LLM service
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock pre-loaded with scripted responses, consumed in order
    pub fn with_responses(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            scripted: Mutex::new(responses.into_iter().map(Into::into).collect()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Queue another scripted response
    pub fn push_response(&self, response: impl Into<String>) {
        self.scripted.lock().unwrap().push_back(response.into());
    }

    /// Make every subsequent call fail with [`LlmError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn next_content(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(LlmError::Unavailable("mock gateway is down".to_string()));
        }

        if let Some(scripted) = self.scripted.lock().unwrap().pop_front() {
            return Ok(scripted);
        }

        // Fall back to a simple echo of the last user message
        let last_message = request
            .messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or("empty");

        Ok(format!("Mock response to: {}", last_message))
    }
}

#[async_trait::async_trait]
impl LlmService for MockLlmService {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        tracing::info!("Mock LLM service processing completion request");

        let model = if request.model.is_empty() {
            "mock-model".to_string()
        } else {
            request.model.clone()
        };

        let content = self.next_content(&request)?;
        let input_tokens = request
            .messages
            .iter()
            .map(|m| m.content.len() as i32 / 4)
            .sum::<i32>();
        let output_tokens = content.len() as i32 / 4;

        Ok(CompletionResponse {
            content,
            model,
            input_tokens,
            output_tokens,
            stop_reason: "end_turn".to_string(),
        })
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<TextStream, LlmError> {
        let content = self.next_content(&request)?;

        // Word-sized chunks give consumers a realistic multi-chunk stream
        let chunks: Vec<Result<String, LlmError>> = content
            .split_inclusive(' ')
            .map(|piece| Ok(piece.to_string()))
            .collect();

        Ok(Box::pin(stream::iter(chunks)))
    }

    fn default_model(&self) -> &str {
        "mock-model"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LlmMessage;
    use futures::StreamExt;

    fn request(content: &str) -> CompletionRequest {
        CompletionRequest {
            model: String::new(),
            system_prompt: None,
            messages: vec![LlmMessage::user(content)],
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn test_mock_llm_service() {
        let service = MockLlmService::new();

        let response = service.complete(request("Hello, world!")).await.unwrap();

        assert!(response.content.contains("Hello, world!"));
        assert_eq!(response.model, "mock-model");
        assert_eq!(response.stop_reason, "end_turn");
        assert!(response.input_tokens > 0);
        assert!(response.output_tokens > 0);
    }

    #[tokio::test]
    async fn test_mock_scripted_responses_consumed_in_order() {
        let service = MockLlmService::with_responses(["first", "second"]);

        assert_eq!(
            service.complete(request("a")).await.unwrap().content,
            "first"
        );
        assert_eq!(
            service.complete(request("b")).await.unwrap().content,
            "second"
        );
        // Exhausted script falls back to echo
        assert!(service
            .complete(request("c"))
            .await
            .unwrap()
            .content
            .contains("Mock response"));
    }

    #[tokio::test]
    async fn test_mock_stream_reassembles_to_full_text() {
        let service = MockLlmService::with_responses(["Both of you want to feel heard"]);

        let mut stream = service.complete_stream(request("go")).await.unwrap();
        let mut assembled = String::new();
        while let Some(chunk) = stream.next().await {
            assembled.push_str(&chunk.unwrap());
        }

        assert_eq!(assembled, "Both of you want to feel heard");
    }

    #[tokio::test]
    async fn test_mock_unavailable() {
        let service = MockLlmService::new();
        service.set_unavailable(true);

        let result = service.complete(request("hi")).await;
        assert!(matches!(result, Err(LlmError::Unavailable(_))));

        let result = service.complete_stream(request("hi")).await;
        assert!(matches!(result, Err(LlmError::Unavailable(_))));

        service.set_unavailable(false);
        assert!(service.complete(request("hi")).await.is_ok());
    }

    #[test]
    fn test_mock_default_model() {
        let service = MockLlmService::new();
        assert_eq!(service.default_model(), "mock-model");
    }
}
