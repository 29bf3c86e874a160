// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Knowledge channel detection.

use std::sync::LazyLock;

use lorebook_config::KnowledgeConfig;
use lorebook_core::LorebookError;
use regex::{Regex, RegexBuilder};

static TOPIC_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)rag:\s*true").expect("valid topic tag regex"));

/// Decides whether messages in a channel produce verified facts.
///
/// A channel qualifies when its topic carries `rag: true` or its name matches
/// the configured pattern, both case-insensitive.
#[derive(Debug, Clone)]
pub struct KnowledgeChannelMatcher {
    enabled: bool,
    name_pattern: Regex,
}

impl KnowledgeChannelMatcher {
    pub fn new(enabled: bool, pattern: &str) -> Result<Self, LorebookError> {
        let name_pattern = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| LorebookError::Config(format!("invalid channel_pattern: {e}")))?;
        Ok(Self {
            enabled,
            name_pattern,
        })
    }

    pub fn from_config(config: &KnowledgeConfig) -> Result<Self, LorebookError> {
        Self::new(config.channel_enabled, &config.channel_pattern)
    }

    pub fn is_knowledge_channel(&self, channel_name: &str, channel_topic: Option<&str>) -> bool {
        if !self.enabled {
            return false;
        }
        if channel_topic.is_some_and(|topic| TOPIC_TAG.is_match(topic)) {
            return true;
        }
        self.name_pattern.is_match(channel_name)
    }
}
