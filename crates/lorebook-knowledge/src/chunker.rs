// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Context-preserving splitting of oversized messages.
//!
//! Long pastes are sent to the language model once, which returns a JSON
//! array of self-contained segments with implicit subjects made explicit.
//! When that fails the text is split locally on paragraph, line, then
//! sentence boundaries.

use std::sync::Arc;

use lorebook_config::model::KnowledgeConfig;
use lorebook_core::traits::CompletionAdapter;
use lorebook_core::types::CompletionRequest;
use tracing::{debug, warn};

use crate::metrics;

/// Output token budget for one chunking call.
const CHUNK_MAX_TOKENS: u32 = 2000;

fn chunk_prompt(max_size: usize) -> String {
    format!(
        r#"Split the following message into smaller chunks where each chunk is self-contained and preserves context.

Rules:
1. Keep all information about one person/entity together in the same chunk
2. Add context where needed (e.g., "Email: bella@gmail.com" -> "Bella Liu's email is bella@gmail.com")
3. Each chunk should be under {max_size} characters
4. Return a JSON array of strings, one per chunk
5. Preserve all original information - don't summarize or omit anything

Example input:
"Bella Liu's birthday is January 17, 2005. Email: bellaliu208@gmail.com. Mobile: (949) 351-9388. Nicholas Liu's birthday is December 6, 2006."

Example output:
[
  "Bella Liu's birthday is January 17, 2005. Bella Liu's email is bellaliu208@gmail.com. Bella Liu's mobile is (949) 351-9388.",
  "Nicholas Liu's birthday is December 6, 2006."
]"#
    )
}

/// Splits long text into segments before extraction.
pub struct Chunker {
    provider: Arc<dyn CompletionAdapter>,
    enabled: bool,
    threshold: usize,
    max_size: usize,
    temperature: f32,
}

impl Chunker {
    pub fn new(provider: Arc<dyn CompletionAdapter>, config: &KnowledgeConfig, temperature: f32) -> Self {
        Self {
            provider,
            enabled: config.chunking_enabled,
            threshold: config.chunk_threshold,
            max_size: config.chunk_max_size,
            temperature,
        }
    }

    /// Split `text` into ordered segments.
    ///
    /// Below-threshold input (or chunking disabled) comes back as one segment.
    pub async fn chunk(&self, text: &str) -> Vec<String> {
        if !self.enabled || text.chars().count() < self.threshold {
            return vec![text.to_string()];
        }

        let request = CompletionRequest {
            model: None,
            system_prompt: chunk_prompt(self.max_size),
            input: text.to_string(),
            max_tokens: CHUNK_MAX_TOKENS,
            temperature: self.temperature,
        };

        match self.provider.complete(request).await {
            Ok(response) => match parse_chunk_response(&response.content) {
                Some(chunks) if covers_input(&chunks, text) => {
                    let chunks = bound_chunks(chunks, self.max_size);
                    debug!(count = chunks.len(), "message split into contextual chunks");
                    return chunks;
                }
                _ => {
                    warn!("chunking response unusable, splitting locally");
                    metrics::record_extraction_failure("chunk");
                }
            },
            Err(e) => {
                warn!(error = %e, "chunking call failed, splitting locally");
                metrics::record_extraction_failure("chunk");
            }
        }

        split_fallback(text, self.max_size)
    }
}

/// Parse a JSON array of non-empty strings, tolerating surrounding prose.
pub fn parse_chunk_response(response: &str) -> Option<Vec<String>> {
    let start = response.find('[')?;
    let end = response.rfind(']')?;
    if end < start {
        return None;
    }
    let items: Vec<serde_json::Value> = serde_json::from_str(&response[start..=end]).ok()?;
    if items.is_empty() {
        return None;
    }
    items
        .into_iter()
        .map(|item| match item {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        })
        .collect()
}

/// Reject model output that dropped most of the input.
fn covers_input(chunks: &[String], input: &str) -> bool {
    let produced: usize = chunks.iter().map(|c| c.chars().count()).sum();
    produced * 2 >= input.trim().chars().count()
}

/// Re-split any model chunk longer than `max_size`.
fn bound_chunks(chunks: Vec<String>, max_size: usize) -> Vec<String> {
    chunks
        .into_iter()
        .flat_map(|chunk| {
            if len(&chunk) <= max_size {
                vec![chunk]
            } else {
                split_fallback(&chunk, max_size)
            }
        })
        .collect()
}

/// Greedy local split: paragraphs, then lines, then sentences.
///
/// Units are packed up to `max_size` characters. A unit is never cut, so a
/// single sentence longer than `max_size` becomes its own segment.
pub fn split_fallback(text: &str, max_size: usize) -> Vec<String> {
    let mut units: Vec<&str> = Vec::new();
    for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        if len(paragraph) <= max_size {
            units.push(paragraph);
            continue;
        }
        for line in paragraph.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if len(line) <= max_size {
                units.push(line);
            } else {
                units.extend(split_sentences(line));
            }
        }
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for unit in units {
        if !current.is_empty() && len(&current) + 1 + len(unit) > max_size {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(unit);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    if chunks.is_empty() {
        chunks.push(text.to_string());
    }
    chunks
}

/// Split after `.`, `!` or `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?')
            && chars.peek().is_some_and(|(_, next)| next.is_whitespace())
        {
            let end = idx + c.len_utf8();
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = end;
        }
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

fn len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorebook_test_utils::MockProvider;

    fn config(threshold: usize, max_size: usize) -> KnowledgeConfig {
        KnowledgeConfig {
            chunk_threshold: threshold,
            chunk_max_size: max_size,
            ..KnowledgeConfig::default()
        }
    }

    fn long_text() -> String {
        (0..40)
            .map(|i| format!("Member {i} joined the guild in spring."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[tokio::test]
    async fn short_input_passes_through_without_call() {
        let provider = Arc::new(MockProvider::new());
        let chunker = Chunker::new(provider.clone(), &config(2000, 500), 0.1);
        let out = chunker.chunk("short note").await;
        assert_eq!(out, vec!["short note"]);
        assert_eq!(provider.call_count().await, 0);
    }

    #[tokio::test]
    async fn model_chunks_are_used_when_usable() {
        let text = long_text();
        let half = text.len() / 2;
        let reply = serde_json::to_string(&vec![&text[..half], &text[half..]]).unwrap();
        let provider = Arc::new(MockProvider::with_responses(vec![reply]));
        let chunker = Chunker::new(provider.clone(), &config(100, 1000), 0.1);

        let out = chunker.chunk(&text).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], text[..half].trim());
        let requests = provider.requests().await;
        assert_eq!(requests[0].input, text);
        assert!(requests[0].system_prompt.contains("under 1000 characters"));
    }

    #[tokio::test]
    async fn oversized_model_chunks_are_split_again() {
        let text = long_text();
        let half = text.len() / 2;
        let reply = serde_json::to_string(&vec![&text[..half], &text[half..]]).unwrap();
        let provider = Arc::new(MockProvider::with_responses(vec![reply]));
        let chunker = Chunker::new(provider, &config(100, 500), 0.1);

        let out = chunker.chunk(&text).await;
        assert!(out.len() > 2);
        assert!(out.iter().all(|c| c.chars().count() <= 500));
        assert!(out[0].starts_with("Member 0 joined"));
    }

    #[tokio::test]
    async fn truncated_model_output_falls_back() {
        let text = long_text();
        let provider = Arc::new(MockProvider::with_responses(vec![r#"["Member 0 joined."]"#]));
        let chunker = Chunker::new(provider, &config(100, 200), 0.1);

        let out = chunker.chunk(&text).await;
        assert!(out.len() > 1);
        assert!(out.iter().all(|c| c.chars().count() <= 200));
    }

    #[tokio::test]
    async fn provider_failure_falls_back() {
        let provider = Arc::new(MockProvider::new());
        provider.add_failure("connection refused").await;
        let chunker = Chunker::new(provider, &config(100, 200), 0.1);
        let out = chunker.chunk(&long_text()).await;
        assert!(out.len() > 1);
    }

    #[test]
    fn parse_rejects_non_string_items() {
        assert_eq!(
            parse_chunk_response("Here you go:\n[\"a\", \"b\"]\n"),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(parse_chunk_response("[\"a\", 3]"), None);
        assert_eq!(parse_chunk_response("[\"a\", \"  \"]"), None);
        assert_eq!(parse_chunk_response("[]"), None);
        assert_eq!(parse_chunk_response("no array"), None);
    }

    #[test]
    fn fallback_prefers_paragraphs() {
        let text = "First paragraph here.\n\nSecond paragraph here.\n\nThird one.";
        let out = split_fallback(text, 30);
        assert_eq!(
            out,
            vec!["First paragraph here.", "Second paragraph here.", "Third one."]
        );
    }

    #[test]
    fn fallback_packs_small_units() {
        let text = "a b.\n\nc d.\n\ne f.";
        assert_eq!(split_fallback(text, 100), vec!["a b.\nc d.\ne f."]);
    }

    #[test]
    fn long_sentence_kept_whole() {
        let sentence = format!("{} end.", "word ".repeat(30));
        let text = format!("{sentence} Short one.");
        let out = split_fallback(&text, 50);
        assert_eq!(out[0], sentence.trim());
        assert_eq!(out[1], "Short one.");
    }

    #[test]
    fn sentence_split_keeps_decimals() {
        assert_eq!(
            split_sentences("Pi is 3.14 roughly. Next!"),
            vec!["Pi is 3.14 roughly.", "Next!"]
        );
    }
}
