// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for OpenAI-compatible chat completion servers.
//!
//! Provides [`ChatClient`] which handles request construction, optional
//! bearer authentication, per-request timeouts, and transient error retry.

use std::time::Duration;

use lorebook_core::LorebookError;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, warn};

use crate::types::{ApiErrorResponse, ChatRequest, ChatResponse};

/// Pause between a transient failure and the next attempt.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// HTTP client for chat completions.
///
/// Retries 429/500/502/503 up to `max_retries` times. With the default of
/// zero retries a failed call is reported once and never repeated.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
}

impl ChatClient {
    /// Creates a new client for the given endpoint URL.
    pub fn new(
        url: String,
        api_key: Option<&str>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Self, LorebookError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = api_key.filter(|k| !k.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {key}")).map_err(|e| {
                    LorebookError::Config(format!("invalid API key header value: {e}"))
                })?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| LorebookError::Provider {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            url,
            timeout,
            max_retries,
            retry_delay: RETRY_DELAY,
        })
    }

    /// Endpoint this client posts to.
    pub fn url(&self) -> &str {
        &self.url
    }

    #[cfg(test)]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sends a completion request and returns the parsed response.
    pub async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LorebookError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                warn!(attempt, "retrying completion request after transient error");
                tokio::time::sleep(self.retry_delay).await;
            }

            let response = match self.client.post(&self.url).json(request).send().await {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    return Err(LorebookError::Timeout {
                        duration: self.timeout,
                    });
                }
                Err(e) => {
                    return Err(LorebookError::Provider {
                        message: format!("HTTP request failed: {e}"),
                        source: Some(Box::new(e)),
                    });
                }
            };

            let status = response.status();
            debug!(status = %status, attempt, "completion response received");

            if status.is_success() {
                let body = response.text().await.map_err(|e| LorebookError::Provider {
                    message: format!("failed to read response body: {e}"),
                    source: Some(Box::new(e)),
                })?;
                return serde_json::from_str::<ChatResponse>(&body).map_err(|e| {
                    LorebookError::MalformedResponse(format!(
                        "failed to parse completion response: {e}"
                    ))
                });
            }

            let body = response.text().await.unwrap_or_default();
            if is_transient_error(status) && attempt < self.max_retries {
                warn!(status = %status, body = %body, "transient error, will retry");
                last_error = Some(LorebookError::Provider {
                    message: format!("server returned {status}: {body}"),
                    source: None,
                });
                continue;
            }

            let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
                Ok(api_err) => format!(
                    "completion server error ({}): {}",
                    api_err.error.type_.as_deref().unwrap_or("unknown"),
                    api_err.error.message
                ),
                Err(_) => format!("server returned {status}: {body}"),
            };
            return Err(LorebookError::Provider {
                message,
                source: None,
            });
        }

        Err(last_error.unwrap_or_else(|| LorebookError::Provider {
            message: "completion request failed after retries".into(),
            source: None,
        }))
    }
}

/// Returns true for HTTP status codes that indicate transient errors worth retrying.
fn is_transient_error(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer, api_key: Option<&str>, retries: u32) -> ChatClient {
        ChatClient::new(
            format!("{}/v1/chat/completions", server.uri()),
            api_key,
            Duration::from_secs(5),
            retries,
        )
        .unwrap()
        .with_retry_delay(Duration::from_millis(10))
    }

    fn test_request() -> ChatRequest {
        ChatRequest {
            model: "qwen".into(),
            messages: vec![ChatMessage::system("extract"), ChatMessage::user("hello")],
            temperature: 0.1,
            max_tokens: 100,
        }
    }

    fn ok_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": text}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
        })
    }

    #[tokio::test]
    async fn complete_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(serde_json::json!({"model": "qwen", "max_tokens": 100})))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("[]")))
            .mount(&server)
            .await;

        let resp = test_client(&server, None, 0)
            .complete(&test_request())
            .await
            .unwrap();
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("[]"));
        assert_eq!(resp.usage.map(|u| u.prompt_tokens), Some(12));
    }

    #[tokio::test]
    async fn no_retry_by_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client(&server, None, 0)
            .complete(&test_request())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"), "got: {err}");
    }

    #[tokio::test]
    async fn retries_on_429_when_enabled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("after retry")))
            .mount(&server)
            .await;

        let resp = test_client(&server, None, 1)
            .complete(&test_request())
            .await
            .unwrap();
        assert_eq!(
            resp.choices[0].message.content.as_deref(),
            Some("after retry")
        );
    }

    #[tokio::test]
    async fn fails_on_400_with_error_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "context too long", "type": "invalid_request_error"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client(&server, None, 3)
            .complete(&test_request())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("context too long"), "got: {err}");
    }

    #[tokio::test]
    async fn non_json_success_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = test_client(&server, None, 0)
            .complete(&test_request())
            .await
            .unwrap_err();
        assert!(matches!(err, LorebookError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn sends_bearer_token_when_configured() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer sk-local"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body("ok")))
            .mount(&server)
            .await;

        let result = test_client(&server, Some("sk-local"), 0)
            .complete(&test_request())
            .await;
        assert!(result.is_ok(), "headers should match: {result:?}");
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(ok_body("late"))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = ChatClient::new(
            format!("{}/v1/chat/completions", server.uri()),
            None,
            Duration::from_millis(50),
            0,
        )
        .unwrap();
        let err = client.complete(&test_request()).await.unwrap_err();
        assert!(matches!(err, LorebookError::Timeout { .. }), "got: {err}");
    }
}
