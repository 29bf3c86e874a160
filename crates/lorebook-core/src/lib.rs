// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for Lorebook.
//!
//! This crate provides the foundational trait definitions, error types, and
//! common types used throughout the Lorebook workspace. The completion client
//! and the embedding backend implement traits defined here.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::LorebookError;
pub use types::{AdapterType, GuildId, HealthStatus};

pub use traits::{CompletionAdapter, EmbeddingAdapter, PluginAdapter};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_upstream_classification() {
        let provider = LorebookError::Provider {
            message: "503".into(),
            source: None,
        };
        let timeout = LorebookError::Timeout {
            duration: std::time::Duration::from_secs(30),
        };
        let malformed = LorebookError::MalformedResponse("not json".into());
        assert!(provider.is_transient_upstream());
        assert!(timeout.is_transient_upstream());
        assert!(malformed.is_transient_upstream());

        let storage = LorebookError::storage(std::io::Error::other("disk full"));
        let index = LorebookError::IndexUnavailable {
            message: "model missing".into(),
        };
        assert!(!storage.is_transient_upstream());
        assert!(!index.is_transient_upstream());
    }

    #[test]
    fn migration_error_mentions_guild_and_cause() {
        let err = LorebookError::Migration {
            guild_id: "42".into(),
            source: Box::new(LorebookError::IndexUnavailable {
                message: "onnx session closed".into(),
            }),
        };
        let msg = err.to_string();
        assert!(msg.contains("42"), "got: {msg}");
        assert!(msg.contains("onnx session closed"), "got: {msg}");
    }

    #[test]
    fn adapter_type_round_trip() {
        use std::str::FromStr;

        for variant in [
            AdapterType::Completion,
            AdapterType::Embedding,
            AdapterType::Storage,
        ] {
            let s = variant.to_string();
            let parsed = AdapterType::from_str(&s).expect("should parse back");
            assert_eq!(variant, parsed);
        }
    }

    #[test]
    fn guild_id_path_safety() {
        assert!(GuildId::from(123456789012345678u64).is_path_safe());
        assert!(GuildId::from("team-alpha_2").is_path_safe());
        assert!(!GuildId::from("").is_path_safe());
        assert!(!GuildId::from("../etc").is_path_safe());
        assert!(!GuildId::from("a/b").is_path_safe());
    }

    #[test]
    fn guild_id_serializes_transparently() {
        let id = GuildId::from("987");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"987\"");
        let back: GuildId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn all_traits_are_exported() {
        fn _assert_plugin_adapter<T: PluginAdapter>() {}
        fn _assert_completion_adapter<T: CompletionAdapter>() {}
        fn _assert_embedding_adapter<T: EmbeddingAdapter>() {}
    }
}
