// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `lorebook config` command implementation.

use lorebook_config::LorebookConfig;
use lorebook_core::LorebookError;

/// Render the effective configuration as TOML. Secrets are masked.
pub fn render_config(config: &LorebookConfig) -> Result<String, LorebookError> {
    let mut shown = config.clone();
    if shown.llm.api_key.is_some() {
        shown.llm.api_key = Some("********".to_string());
    }
    toml::to_string_pretty(&shown)
        .map_err(|e| LorebookError::Config(format!("failed to serialize config: {e}")))
}

/// Run the `lorebook config` command.
pub fn run_config(config: &LorebookConfig) -> Result<(), LorebookError> {
    println!("{}", render_config(config)?);
    Ok(())
}
