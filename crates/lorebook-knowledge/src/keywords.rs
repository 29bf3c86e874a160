// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Keyword extraction and overlap scoring.
//!
//! Keywords are lowercase, diacritic-folded word tokens longer than two
//! characters with English stopwords removed.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::types::Fact;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("static regex"));

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "as", "is", "was", "are", "were", "be", "been", "being", "have", "has", "had", "do",
    "does", "did", "will", "would", "should", "could", "may", "might", "can", "what", "when",
    "where", "who", "how", "why", "which", "this", "that", "these", "those", "i", "you", "he",
    "she", "it", "we", "they", "my", "your", "his", "her", "its", "our", "their",
];

/// Lowercase and strip combining marks (`Café` → `cafe`).
pub fn fold(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Extract unique keywords in first-seen order.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let folded = fold(text);
    let mut seen = HashSet::new();
    WORD.find_iter(&folded)
        .map(|m| m.as_str())
        .filter(|t| t.chars().count() > 2 && !STOPWORDS.contains(t))
        .filter(|t| seen.insert(*t))
        .map(str::to_string)
        .collect()
}

/// Normalize model-supplied keywords the same way query keywords are built.
pub fn normalize_keywords(raw: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .flat_map(|k| extract_keywords(k))
        .filter(|k| seen.insert(k.clone()))
        .collect()
}

/// Searchable terms for a fact: its stored keywords plus words of its text.
pub fn fact_terms(fact: &Fact) -> HashSet<String> {
    let mut terms: HashSet<String> = normalize_keywords(&fact.keywords).into_iter().collect();
    terms.extend(extract_keywords(&fact.content));
    terms
}

/// Fraction of `reference` keywords that also appear in `other`.
///
/// Returns 0.0 when `reference` is empty.
pub fn keyword_overlap(reference: &[String], other: &HashSet<String>) -> f64 {
    let reference: HashSet<&String> = reference.iter().collect();
    if reference.is_empty() {
        return 0.0;
    }
    let hits = reference.iter().filter(|k| other.contains(k.as_str())).count();
    hits as f64 / reference.len() as f64
}
