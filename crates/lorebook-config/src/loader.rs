// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./lorebook.toml` > `~/.config/lorebook/lorebook.toml` > `/etc/lorebook/lorebook.toml`
//! with environment variable overrides via `LOREBOOK_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};

use crate::model::LorebookConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/lorebook/lorebook.toml` (system-wide)
/// 3. `~/.config/lorebook/lorebook.toml` (user XDG config)
/// 4. `./lorebook.toml` (local directory)
/// 5. `LOREBOOK_*` environment variables
pub fn load_config() -> Result<LorebookConfig, figment::Error> {
    build_figment().extract()
}

/// Load configuration from a TOML string only (no XDG lookup, no env vars).
///
/// Used for testing and explicit configuration.
pub fn load_config_from_str(toml_content: &str) -> Result<LorebookConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(LorebookConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<LorebookConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(LorebookConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Build the Figment used internally for config loading (exposed for diagnostic use).
pub fn build_figment() -> Figment {
    Figment::new()
        .merge(Serialized::defaults(LorebookConfig::default()))
        .merge(Toml::file("/etc/lorebook/lorebook.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("lorebook/lorebook.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("lorebook.toml"))
        .merge(env_provider())
}

/// Top-level config sections addressable from the environment.
const SECTIONS: &[&str] = &["agent", "llm", "knowledge", "vector"];

/// Environment provider mapping `LOREBOOK_<SECTION>_<KEY>` to `section.key`.
///
/// Only the leading section name is split off, since key names themselves
/// contain underscores: `LOREBOOK_KNOWLEDGE_CONFIDENCE_THRESHOLD` must map to
/// `knowledge.confidence_threshold`.
fn env_provider() -> Env {
    Env::prefixed("LOREBOOK_").map(|key| env_key_to_path(key.as_str()).into())
}

fn env_key_to_path(key: &str) -> String {
    for section in SECTIONS {
        if let Some(rest) = key
            .strip_prefix(section)
            .and_then(|rest| rest.strip_prefix('_'))
        {
            return format!("{section}.{rest}");
        }
    }
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_keys_split_on_section_only() {
        assert_eq!(
            env_key_to_path("knowledge_confidence_threshold"),
            "knowledge.confidence_threshold"
        );
        assert_eq!(env_key_to_path("vector_enabled"), "vector.enabled");
        assert_eq!(env_key_to_path("agent_log_level"), "agent.log_level");
        assert_eq!(env_key_to_path("unknownsection_x"), "unknownsection_x");
    }
}
