// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Completion adapter trait for LLM integrations consumed by chunking and extraction.

use async_trait::async_trait;

use crate::error::LorebookError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{CompletionRequest, CompletionResponse};

/// Adapter for single-shot language model completions.
///
/// Responses are free-form text; callers own parsing and treat malformed
/// output as an upstream failure.
#[async_trait]
pub trait CompletionAdapter: PluginAdapter {
    /// Sends a completion request and returns the full response.
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, LorebookError>;
}
