//! Anthropic Claude API Implementation
//!
//! Calls the Anthropic Messages API (https://api.anthropic.com/v1/messages)
//! using reqwest HTTP client, atomically or as a server-sent-event stream.

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{CompletionRequest, CompletionResponse, LlmConfig, LlmError, LlmService, TextStream};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

/// Anthropic Messages API request body
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<MessageBody>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct MessageBody {
    role: String,
    content: String,
}

/// Anthropic Messages API response body
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: String,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: i32,
    output_tokens: i32,
}

/// One server-sent event payload from the streaming endpoint
#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    event_type: String,
    delta: Option<StreamDelta>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    text: Option<String>,
}

/// Anthropic API error response
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Anthropic LLM service implementation
pub struct AnthropicService {
    client: Client,
    config: LlmConfig,
    base_url: String,
}

impl AnthropicService {
    /// Create a new Anthropic service
    pub fn new(config: LlmConfig) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Self {
            client: Client::new(),
            config,
            base_url,
        }
    }

    fn build_body(&self, request: CompletionRequest, stream: bool) -> (String, MessagesRequest) {
        let model = if request.model.is_empty() {
            self.config.default_model.clone()
        } else {
            request.model
        };

        let max_tokens = request.max_tokens.unwrap_or(self.config.max_tokens);

        let messages: Vec<MessageBody> = request
            .messages
            .iter()
            .map(|m| MessageBody {
                role: match m.role {
                    crate::LlmRole::User => "user".to_string(),
                    crate::LlmRole::Assistant => "assistant".to_string(),
                },
                content: m.content.clone(),
            })
            .collect();

        let body = MessagesRequest {
            model: model.clone(),
            max_tokens,
            system: request.system_prompt,
            messages,
            stream,
        };

        (model, body)
    }

    async fn send(&self, body: &MessagesRequest) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::Unavailable(format!("HTTP request failed: {}", e)))?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimit);
        }

        if status.is_server_error() {
            return Err(LlmError::Unavailable(format!(
                "Anthropic API returned {}",
                status
            )));
        }

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());

            // Try to parse as API error
            if let Ok(error_response) = serde_json::from_str::<ErrorResponse>(&error_body) {
                return Err(LlmError::Response(format!(
                    "Anthropic API error ({}): {}",
                    error_response.error.error_type, error_response.error.message
                )));
            }

            return Err(LlmError::Response(format!(
                "Anthropic API returned {}: {}",
                status, error_body
            )));
        }

        Ok(response)
    }
}

/// Extract the text chunk (if any) from one SSE `data:` payload.
/// Returns `Err` for provider-reported stream errors.
fn parse_stream_data(data: &str) -> Result<Option<String>, LlmError> {
    let event: StreamEvent = serde_json::from_str(data)
        .map_err(|e| LlmError::Response(format!("Malformed stream event: {}", e)))?;

    match event.event_type.as_str() {
        "content_block_delta" => Ok(event.delta.and_then(|d| d.text)),
        "error" => {
            let detail = event
                .error
                .map(|e| format!("{}: {}", e.error_type, e.message))
                .unwrap_or_else(|| "unknown stream error".to_string());
            Err(LlmError::Response(detail))
        }
        // message_start, content_block_start, ping, message_delta, message_stop
        _ => Ok(None),
    }
}

#[async_trait::async_trait]
impl LlmService for AnthropicService {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (model, body) = self.build_body(request, false);

        tracing::debug!(model = %model, "Sending Anthropic API request");

        let response = self.send(&body).await?;

        let api_response: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Response(format!("Failed to parse response: {}", e)))?;

        // Extract text content from response blocks
        let content = api_response
            .content
            .iter()
            .filter_map(|block| {
                if block.content_type == "text" {
                    block.text.clone()
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("");

        if content.is_empty() {
            return Err(LlmError::Empty);
        }

        Ok(CompletionResponse {
            content,
            model: api_response.model,
            input_tokens: api_response.usage.input_tokens,
            output_tokens: api_response.usage.output_tokens,
            stop_reason: api_response
                .stop_reason
                .unwrap_or_else(|| "end_turn".to_string()),
        })
    }

    async fn complete_stream(&self, request: CompletionRequest) -> Result<TextStream, LlmError> {
        let (model, body) = self.build_body(request, true);

        tracing::debug!(model = %model, "Sending Anthropic streaming API request");

        let response = self.send(&body).await?;

        let (tx, rx) = mpsc::channel::<Result<String, LlmError>>(32);

        // The reader task outlives the caller on purpose: a dropped
        // consumer must not abort the upstream read (send just fails).
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx
                            .send(Err(LlmError::Unavailable(format!(
                                "Stream interrupted: {}",
                                e
                            ))))
                            .await;
                        return;
                    }
                };

                buffer.push_str(&String::from_utf8_lossy(&chunk));

                // SSE frames are newline-delimited; hold back any
                // incomplete trailing line until the next chunk.
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim_end_matches('\r').to_string();
                    buffer.drain(..=pos);

                    let Some(data) = line.strip_prefix("data:") else {
                        continue;
                    };

                    match parse_stream_data(data.trim()) {
                        Ok(Some(text)) => {
                            if tx.send(Ok(text)).await.is_err() {
                                // Consumer gone; keep draining so the
                                // connection closes cleanly.
                                continue;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }
}
