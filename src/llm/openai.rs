//! OpenAI-compatible completion client
//!
//! Direct HTTP client for an OpenAI-style `chat/completions` endpoint.
//! Supports blocking completions and SSE streaming (`stream: true`), with
//! the base URL taken from configuration so tests can point it at a mock
//! server.

use crate::config::CompletionConfig;
use crate::error::AppError;
use crate::llm::{ChatMessage, CompletionBridge, CompletionStream};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Completion bridge backed by an OpenAI-compatible HTTP API
pub struct OpenAiBridge {
    client: reqwest::Client,
    config: CompletionConfig,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiBridge {
    /// Create a bridge from completion configuration
    ///
    /// The configured timeout bounds the entire upstream call, including
    /// the time spent draining a streamed response body.
    pub fn new(config: CompletionConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Upstream(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// Send a chat-completions request and return the raw HTTP response
    ///
    /// Shared by both modes: status handling and error-body reporting are
    /// identical whether or not the body will be streamed.
    async fn send_request(
        &self,
        messages: &[ChatMessage],
        stream: bool,
    ) -> Result<reqwest::Response, AppError> {
        if self.config.api_key.is_empty() {
            return Err(AppError::Upstream("API key is empty".to_string()));
        }

        let url = format!("{}/chat/completions", self.config.base_url);
        let request_body = ChatCompletionRequest {
            model: &self.config.model,
            messages,
            stream,
        };

        tracing::debug!(
            url = %url,
            model = %self.config.model,
            stream = stream,
            message_count = messages.len(),
            "Calling completion API"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to send HTTP request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());

            tracing::error!(
                status_code = status_code,
                error_body = %error_body,
                "Completion API returned error status"
            );

            if status_code == 429 {
                return Err(AppError::Upstream(format!(
                    "Completion API rate limit exceeded (HTTP {}): {}",
                    status_code, error_body
                )));
            }

            return Err(AppError::Upstream(format!(
                "Completion API returned error status {}: {}",
                status_code, error_body
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl CompletionBridge for OpenAiBridge {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, AppError> {
        let response = self.send_request(messages, false).await?;

        let response_body = response
            .text()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to read response body: {}", e)))?;

        let parsed: ChatCompletionResponse = serde_json::from_str(&response_body).map_err(|e| {
            AppError::Upstream(format!(
                "Failed to parse JSON response: {} - Response body: {}",
                e, response_body
            ))
        })?;

        let choice = parsed
            .choices
            .first()
            .ok_or_else(|| AppError::Upstream("Response contains no choices".to_string()))?;

        let text = choice
            .message
            .content
            .clone()
            .unwrap_or_default();
        if text.is_empty() {
            return Err(AppError::Upstream("Response text is empty".to_string()));
        }

        tracing::debug!(response_len = text.len(), "Received completion");
        Ok(text)
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<CompletionStream, AppError> {
        let response = self.send_request(messages, true).await?;
        let mut byte_stream = response.bytes_stream();

        let stream = async_stream::stream! {
            // SSE frames can split anywhere, including inside a UTF-8
            // sequence, so buffer raw bytes and cut on newlines.
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(AppError::Upstream(format!("Stream read failed: {}", e)));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();

                    let payload = match line.strip_prefix("data:") {
                        Some(payload) => payload.trim(),
                        None => continue,
                    };

                    if payload == "[DONE]" {
                        return;
                    }

                    let parsed: ChatCompletionChunk = match serde_json::from_str(payload) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            yield Err(AppError::Upstream(format!(
                                "Failed to parse stream chunk: {}",
                                e
                            )));
                            return;
                        }
                    };

                    for choice in &parsed.choices {
                        if let Some(content) = &choice.delta.content {
                            if !content.is_empty() {
                                yield Ok(content.clone());
                            }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use serial_test::serial;

    fn test_config(base_url: String) -> CompletionConfig {
        CompletionConfig {
            api_key: "test-key".to_string(),
            base_url,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 5,
        }
    }

    fn test_messages() -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: "system".to_string(),
                content: "You are a diet planning assistant.".to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: "I want to lose weight".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn test_complete_empty_api_key() {
        let mut config = test_config("http://localhost:1".to_string());
        config.api_key = String::new();
        let bridge = OpenAiBridge::new(config).unwrap();
        let result = bridge.complete(&test_messages()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key is empty"));
    }

    #[tokio::test]
    #[serial]
    async fn test_complete_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_header("content-type", "application/json")
            .with_status(200)
            .with_body(
                r#"{
                    "choices": [{
                        "message": {
                            "role": "assistant",
                            "content": "Let's start with your goals."
                        }
                    }]
                }"#,
            )
            .create_async()
            .await;

        let bridge = OpenAiBridge::new(test_config(server.url())).unwrap();
        let result = bridge.complete(&test_messages()).await;

        mock.assert_async().await;
        assert_eq!(result.unwrap(), "Let's start with your goals.");
    }

    #[tokio::test]
    #[serial]
    async fn test_complete_empty_choices() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices": []}"#)
            .create_async()
            .await;

        let bridge = OpenAiBridge::new(test_config(server.url())).unwrap();
        let result = bridge.complete(&test_messages()).await;

        mock.assert_async().await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("no choices"));
    }

    #[tokio::test]
    #[serial]
    async fn test_complete_rate_limit() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error": "Rate limit exceeded"}"#)
            .create_async()
            .await;

        let bridge = OpenAiBridge::new(test_config(server.url())).unwrap();
        let result = bridge.complete(&test_messages()).await;

        mock.assert_async().await;
        let error_msg = result.unwrap_err().to_string();
        assert!(error_msg.contains("rate limit") || error_msg.contains("429"));
    }

    #[tokio::test]
    #[serial]
    async fn test_complete_invalid_json() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body("This is not JSON")
            .create_async()
            .await;

        let bridge = OpenAiBridge::new(test_config(server.url())).unwrap();
        let result = bridge.complete(&test_messages()).await;

        mock.assert_async().await;
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Failed to parse JSON"));
    }

    #[tokio::test]
    #[serial]
    async fn test_stream_yields_deltas_until_done() {
        let mut server = Server::new_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Let's \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"start \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"here.\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{}}]}\n\n",
            "data: [DONE]\n\n",
        );
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let bridge = OpenAiBridge::new(test_config(server.url())).unwrap();
        let mut stream = bridge.stream(&test_messages()).await.unwrap();

        let mut deltas = Vec::new();
        while let Some(delta) = stream.next().await {
            deltas.push(delta.unwrap());
        }

        mock.assert_async().await;
        assert_eq!(deltas, vec!["Let's ", "start ", "here."]);
    }

    #[tokio::test]
    #[serial]
    async fn test_stream_http_error_fails_before_streaming() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(500)
            .with_body(r#"{"error": "boom"}"#)
            .create_async()
            .await;

        let bridge = OpenAiBridge::new(test_config(server.url())).unwrap();
        let result = bridge.stream(&test_messages()).await;

        mock.assert_async().await;
        assert!(matches!(result, Err(AppError::Upstream(_))));
    }

    #[tokio::test]
    #[serial]
    async fn test_stream_malformed_chunk_yields_error() {
        let mut server = Server::new_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
            "data: not json\n\n",
        );
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let bridge = OpenAiBridge::new(test_config(server.url())).unwrap();
        let mut stream = bridge.stream(&test_messages()).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), "ok");
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("Failed to parse stream chunk"));
        assert!(stream.next().await.is_none());

        mock.assert_async().await;
    }
}
