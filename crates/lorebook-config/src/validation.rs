// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Checks ranges and cross-field constraints that serde attributes cannot
//! express: thresholds in `[0, 1]`, chunk sizes, and the channel regex.

use crate::diagnostic::ConfigError;
use crate::model::LorebookConfig;

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &LorebookConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let k = &config.knowledge;

    let unit_ranges = [
        ("knowledge.confidence_threshold", k.confidence_threshold),
        ("knowledge.keyword_match_threshold", k.keyword_match_threshold),
        ("knowledge.dedup_overlap_threshold", k.dedup_overlap_threshold),
        ("vector.similarity_threshold", config.vector.similarity_threshold),
    ];
    for (key, value) in unit_ranges {
        if !(0.0..=1.0).contains(&value) {
            errors.push(ConfigError::Validation {
                message: format!("{key} must be between 0.0 and 1.0, got {value}"),
            });
        }
    }

    if !(k.verified_boost > 1.0) {
        errors.push(ConfigError::Validation {
            message: format!(
                "knowledge.verified_boost must be greater than 1.0, got {}",
                k.verified_boost
            ),
        });
    }

    if k.max_context_facts == 0 {
        errors.push(ConfigError::Validation {
            message: "knowledge.max_context_facts must be at least 1".to_string(),
        });
    }

    if k.chunk_max_size < 50 {
        errors.push(ConfigError::Validation {
            message: format!(
                "knowledge.chunk_max_size must be at least 50, got {}",
                k.chunk_max_size
            ),
        });
    }

    if k.chunk_max_size >= k.chunk_threshold {
        errors.push(ConfigError::Validation {
            message: format!(
                "knowledge.chunk_max_size ({}) must be smaller than knowledge.chunk_threshold ({})",
                k.chunk_max_size, k.chunk_threshold
            ),
        });
    }

    if k.extraction_max_input_tokens == 0 {
        errors.push(ConfigError::Validation {
            message: "knowledge.extraction_max_input_tokens must be at least 1".to_string(),
        });
    }

    if k.guild_cache_size == 0 {
        errors.push(ConfigError::Validation {
            message: "knowledge.guild_cache_size must be at least 1".to_string(),
        });
    }

    if k.data_dir.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "knowledge.data_dir must not be empty".to_string(),
        });
    }

    if let Err(e) = regex::Regex::new(&k.channel_pattern) {
        errors.push(ConfigError::Validation {
            message: format!("knowledge.channel_pattern is not a valid regex: {e}"),
        });
    }

    if config.vector.model_name.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "vector.model_name must not be empty".to_string(),
        });
    }

    if config.vector.database_file.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "vector.database_file must not be empty".to_string(),
        });
    }

    if config.llm.base_url.trim().is_empty() {
        errors.push(ConfigError::Validation {
            message: "llm.base_url must not be empty".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn messages(config: &LorebookConfig) -> Vec<String> {
        match validate_config(config) {
            Ok(()) => Vec::new(),
            Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&LorebookConfig::default()).is_ok());
    }

    #[test]
    fn rejects_thresholds_outside_unit_range() {
        let mut config = LorebookConfig::default();
        config.knowledge.confidence_threshold = 1.2;
        config.vector.similarity_threshold = -0.1;
        let msgs = messages(&config);
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].contains("confidence_threshold"));
        assert!(msgs[1].contains("similarity_threshold"));
    }

    #[test]
    fn boost_must_exceed_one() {
        let mut config = LorebookConfig::default();
        config.knowledge.verified_boost = 1.0;
        assert!(messages(&config)[0].contains("verified_boost"));

        config.knowledge.verified_boost = f64::NAN;
        assert!(messages(&config)[0].contains("verified_boost"));
    }

    #[test]
    fn chunk_size_must_fit_under_threshold() {
        let mut config = LorebookConfig::default();
        config.knowledge.chunk_max_size = 3000;
        let msgs = messages(&config);
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].contains("chunk_threshold"));
    }

    #[test]
    fn rejects_bad_channel_regex() {
        let mut config = LorebookConfig::default();
        config.knowledge.channel_pattern = "knowledge(".to_string();
        assert!(messages(&config)[0].contains("channel_pattern"));
    }

    #[test]
    fn collects_every_error() {
        let mut config = LorebookConfig::default();
        config.knowledge.max_context_facts = 0;
        config.knowledge.guild_cache_size = 0;
        config.knowledge.data_dir = "  ".to_string();
        config.vector.model_name = String::new();
        assert_eq!(messages(&config).len(), 4);
    }
}
