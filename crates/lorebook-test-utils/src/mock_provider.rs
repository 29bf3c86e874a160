// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock completion adapter for deterministic testing.
//!
//! `MockProvider` implements `CompletionAdapter` with pre-configured replies,
//! so chunking and extraction can be exercised without a model server.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use lorebook_core::traits::{CompletionAdapter, PluginAdapter};
use lorebook_core::types::{
    AdapterType, CompletionRequest, CompletionResponse, HealthStatus, TokenUsage,
};
use lorebook_core::LorebookError;

/// One scripted outcome for a `complete` call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return this text as the completion.
    Text(String),
    /// Fail with a provider error carrying this message.
    Fail(String),
}

impl From<&str> for MockReply {
    fn from(s: &str) -> Self {
        MockReply::Text(s.to_string())
    }
}

impl From<String> for MockReply {
    fn from(s: String) -> Self {
        MockReply::Text(s)
    }
}

/// A mock completion endpoint that returns pre-configured replies.
///
/// Replies are popped from a FIFO queue. When the queue is empty,
/// a default "mock response" text is returned. Every request is recorded.
#[derive(Clone)]
pub struct MockProvider {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
    delay: Option<Duration>,
}

impl MockProvider {
    /// Create a new mock provider with an empty reply queue.
    pub fn new() -> Self {
        Self {
            replies: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            delay: None,
        }
    }

    /// Create a mock provider pre-loaded with the given replies.
    pub fn with_responses<R: Into<MockReply>>(replies: Vec<R>) -> Self {
        let provider = Self::new();
        let queue: VecDeque<MockReply> = replies.into_iter().map(Into::into).collect();
        Self {
            replies: Arc::new(Mutex::new(queue)),
            ..provider
        }
    }

    /// Sleep this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Add a reply to the end of the queue.
    pub async fn add_response(&self, reply: impl Into<MockReply>) {
        self.replies.lock().await.push_back(reply.into());
    }

    /// Queue a failure.
    pub async fn add_failure(&self, message: &str) {
        self.replies
            .lock()
            .await
            .push_back(MockReply::Fail(message.to_string()));
    }

    /// All requests received so far, in call order.
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    /// Number of `complete` calls received so far.
    pub async fn call_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    async fn next_reply(&self) -> MockReply {
        self.replies
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| MockReply::Text("mock response".to_string()))
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockProvider {
    fn name(&self) -> &str {
        "mock-provider"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Completion
    }

    async fn health_check(&self) -> Result<HealthStatus, LorebookError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), LorebookError> {
        Ok(())
    }
}

#[async_trait]
impl CompletionAdapter for MockProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LorebookError> {
        self.requests.lock().await.push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.next_reply().await {
            MockReply::Text(content) => Ok(CompletionResponse {
                content,
                usage: Some(TokenUsage {
                    input_tokens: 10,
                    output_tokens: 20,
                }),
            }),
            MockReply::Fail(message) => Err(LorebookError::Provider {
                message,
                source: None,
            }),
        }
    }
}
