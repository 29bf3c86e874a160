// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for Lorebook.

use thiserror::Error;

/// The primary error type used across all Lorebook adapter traits and core operations.
///
/// No variant is fatal to the hosting process. Callers decide how to degrade:
/// upstream and index failures shrink functionality, storage failures are
/// reported back to whoever requested the write.
#[derive(Debug, Error)]
pub enum LorebookError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Durable write or read could not complete. Nothing partial was left behind.
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// LLM provider errors (connection failure, non-success status, bad body).
    #[error("provider error: {message}")]
    Provider {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The model answered, but not in the documented textual schema.
    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    /// The embedding backend or vector index cannot serve requests.
    #[error("vector index unavailable: {message}")]
    IndexUnavailable { message: String },

    /// A guild's one-time migration into the vector index failed.
    #[error("migration failed for guild {guild_id}: {source}")]
    Migration {
        guild_id: String,
        source: Box<LorebookError>,
    },

    /// Input violated a data-model invariant (empty text, foreign guild, bad id).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LorebookError {
    /// True for failures of the external model call (error, timeout, or garbage output).
    pub fn is_transient_upstream(&self) -> bool {
        matches!(
            self,
            LorebookError::Provider { .. }
                | LorebookError::Timeout { .. }
                | LorebookError::MalformedResponse(_)
        )
    }

    /// Wraps any storage-layer error.
    pub fn storage<E>(e: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        LorebookError::Storage {
            source: Box::new(e),
        }
    }
}
