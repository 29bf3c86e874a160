// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! OpenAI-compatible completion adapter for Lorebook.
//!
//! Implements [`CompletionAdapter`] on top of any server speaking the
//! `/v1/chat/completions` protocol (llama.cpp, vLLM, Ollama, hosted APIs).

pub mod client;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use lorebook_config::model::LlmConfig;
use lorebook_core::error::LorebookError;
use lorebook_core::traits::{CompletionAdapter, PluginAdapter};
use lorebook_core::types::{
    AdapterType, CompletionRequest, CompletionResponse, HealthStatus, TokenUsage,
};
use tracing::{debug, info};

use crate::client::ChatClient;
use crate::types::{ChatMessage, ChatRequest};

/// Completion adapter backed by an OpenAI-compatible chat endpoint.
pub struct OpenAiCompatProvider {
    client: ChatClient,
    model: String,
}

impl OpenAiCompatProvider {
    /// Creates a provider from the `[llm]` configuration section.
    pub fn new(config: &LlmConfig) -> Result<Self, LorebookError> {
        let client = ChatClient::new(
            config.base_url.clone(),
            config.api_key.as_deref(),
            Duration::from_secs(config.timeout_secs),
            config.max_retries,
        )?;

        info!(
            url = config.base_url,
            model = config.model,
            "completion provider initialized"
        );

        Ok(Self {
            client,
            model: config.model.clone(),
        })
    }

    fn to_chat_request(&self, request: CompletionRequest) -> ChatRequest {
        ChatRequest {
            model: request.model.unwrap_or_else(|| self.model.clone()),
            messages: vec![
                ChatMessage::system(request.system_prompt),
                ChatMessage::user(request.input),
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

#[async_trait]
impl PluginAdapter for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Completion
    }

    async fn health_check(&self) -> Result<HealthStatus, LorebookError> {
        // Avoids spending tokens; reachability is discovered on first use.
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), LorebookError> {
        debug!("completion provider shutting down");
        Ok(())
    }
}

#[async_trait]
impl CompletionAdapter for OpenAiCompatProvider {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LorebookError> {
        let chat_request = self.to_chat_request(request);
        let response = self.client.complete(&chat_request).await?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                LorebookError::MalformedResponse("response contained no choices".into())
            })?;

        Ok(CompletionResponse {
            content: content.trim().to_string(),
            usage: response.usage.map(|u| TokenUsage {
                input_tokens: u.prompt_tokens,
                output_tokens: u.completion_tokens,
            }),
        })
    }
}
