// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! LLM-based fact extraction from chat messages.
//!
//! One completion call per segment. Every failure mode (upstream error,
//! timeout, unparseable output) yields an empty result and a log line; the
//! caller never sees an error from here.

use std::sync::Arc;

use lorebook_config::model::KnowledgeConfig;
use lorebook_core::traits::CompletionAdapter;
use lorebook_core::types::CompletionRequest;
use serde_json::Value;
use tracing::{debug, warn};

use crate::keywords::normalize_keywords;
use crate::metrics;
use crate::types::{truncate_chars, Category, FactDraft};

/// Characters per token used to bound the input segment.
const CHARS_PER_TOKEN: usize = 4;

/// Recent conversation turns included as context.
const MAX_CONTEXT_TURNS: usize = 5;

const EXTRACTION_PROMPT: &str = r#"Extract factual information from the following message. Return ONLY a JSON array of facts.
Each fact should have:
- content: The fact as a complete sentence
- category: One of [birthday, location, contact, preference, general]
- confidence: A score from 0 to 1 indicating your confidence in the fact
- keywords: Array of searchable keywords (lowercase, no stopwords)
- entities: Object with extracted entities (e.g., {"person": "John", "date": "May 15, 1990"})

Return [] if no facts are found. Do not include conversational or hypothetical statements."#;

/// Who wrote the segment and what was said just before it.
#[derive(Debug, Clone, Default)]
pub struct ExtractionContext {
    pub author_name: String,
    /// Oldest first. Only the last few are sent.
    pub recent_turns: Vec<String>,
}

/// Turns text segments into candidate facts.
pub struct Extractor {
    provider: Arc<dyn CompletionAdapter>,
    max_tokens: u32,
    max_input_chars: usize,
    temperature: f32,
}

impl Extractor {
    pub fn new(
        provider: Arc<dyn CompletionAdapter>,
        config: &KnowledgeConfig,
        temperature: f32,
    ) -> Self {
        Self {
            provider,
            max_tokens: config.extraction_max_tokens,
            max_input_chars: config.extraction_max_input_tokens.saturating_mul(CHARS_PER_TOKEN),
            temperature,
        }
    }

    /// Extract candidate facts from one segment. Never fails.
    pub async fn extract(&self, segment: &str, context: &ExtractionContext) -> Vec<FactDraft> {
        let segment = segment.trim();
        if segment.is_empty() {
            return Vec::new();
        }

        let request = CompletionRequest {
            model: None,
            system_prompt: EXTRACTION_PROMPT.to_string(),
            input: self.build_input(segment, context),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        let response = match self.provider.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "fact extraction call failed, skipping segment");
                metrics::record_extraction_failure("extract");
                return Vec::new();
            }
        };

        match parse_extraction_response(&response.content) {
            Some(drafts) => {
                debug!(count = drafts.len(), "facts extracted from segment");
                drafts
            }
            None => {
                warn!(
                    response = truncate_chars(&response.content, 200),
                    "extraction response was not a JSON array"
                );
                metrics::record_extraction_failure("parse");
                Vec::new()
            }
        }
    }

    fn build_input(&self, segment: &str, context: &ExtractionContext) -> String {
        let segment = truncate_chars(segment, self.max_input_chars);
        let mut input = String::new();
        let turns = &context.recent_turns;
        if !turns.is_empty() {
            input.push_str("Recent conversation (context only, do not extract from it):\n");
            for turn in &turns[turns.len().saturating_sub(MAX_CONTEXT_TURNS)..] {
                input.push_str(truncate_chars(turn, 300));
                input.push('\n');
            }
            input.push('\n');
        }
        let author = if context.author_name.is_empty() {
            "unknown"
        } else {
            context.author_name.as_str()
        };
        input.push_str(&format!("Message: \"{segment}\"\nAuthor: {author}"));
        input
    }
}

/// Parse the model's JSON array into drafts.
///
/// Tolerates code fences and surrounding prose. Returns `None` when no JSON
/// array can be found; malformed individual items are skipped. Confidence is
/// clamped into `[0, 1]` and defaults to 0 when missing.
pub fn parse_extraction_response(response: &str) -> Option<Vec<FactDraft>> {
    let trimmed = response.trim();
    let start = trimmed.find('[')?;
    let end = trimmed.rfind(']')?;
    if end < start {
        return None;
    }
    let items: Vec<Value> = serde_json::from_str(&trimmed[start..=end]).ok()?;
    Some(items.into_iter().filter_map(draft_from_value).collect())
}

fn draft_from_value(item: Value) -> Option<FactDraft> {
    let Value::Object(mut obj) = item else {
        return None;
    };
    let content = match obj.remove("content") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => return None,
    };
    let confidence = match obj.get("confidence") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    let confidence = if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let category = obj
        .get("category")
        .and_then(Value::as_str)
        .map(Category::from_str_value)
        .unwrap_or_default();
    let keywords: Vec<String> = match obj.get("keywords") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };
    let entities = match obj.remove("entities") {
        Some(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };

    Some(FactDraft {
        content,
        category,
        confidence,
        keywords: normalize_keywords(&keywords),
        entities,
    })
}
