// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Knowledge domain types: facts, provenance, guild documents.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use lorebook_core::GuildId;
use serde::{Deserialize, Serialize};

/// A single atomic piece of guild knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// `fact_` followed by 8 hex chars. Unique within the guild.
    pub id: String,
    /// Owning guild. Older documents omit it; the store fills it on load.
    #[serde(default)]
    pub guild_id: GuildId,
    /// Standalone statement of the fact.
    pub content: String,
    #[serde(default)]
    pub category: Category,
    /// Lowercase, stopword-free search terms.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Free-form entities reported by the extraction model.
    #[serde(default)]
    pub entities: serde_json::Map<String, serde_json::Value>,
    /// Extraction confidence in `[0, 1]`.
    pub confidence: f64,
    /// Sourced from a knowledge channel or a pinned message.
    #[serde(default)]
    pub verified: bool,
    #[serde(rename = "extracted_from")]
    pub source: SourceRef,
    pub created_at: DateTime<Utc>,
    /// Populated by the vector index only; never written to the guild document.
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

/// Coarse fact category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Birthday,
    Location,
    Contact,
    Preference,
    #[default]
    #[serde(other)]
    General,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Birthday => "birthday",
            Category::Location => "location",
            Category::Contact => "contact",
            Category::Preference => "preference",
            Category::General => "general",
        }
    }

    /// Parse a model-supplied label. Anything unrecognized is `General`.
    pub fn from_str_value(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "birthday" => Category::Birthday,
            "location" => Category::Location,
            "contact" => Category::Contact,
            "preference" => Category::Preference,
            _ => Category::General,
        }
    }
}

/// Where a fact came from. Provenance only, never a uniqueness key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    #[serde(default)]
    pub message_id: String,
    #[serde(default)]
    pub author_id: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub channel_name: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    /// First 200 characters of the originating message.
    #[serde(default)]
    pub original_message: String,
}

/// Maximum characters of the original message kept in a [`SourceRef`].
pub const ORIGINAL_MESSAGE_CHARS: usize = 200;

/// A candidate fact produced by the extractor, before filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct FactDraft {
    pub content: String,
    pub category: Category,
    pub confidence: f64,
    pub keywords: Vec<String>,
    pub entities: serde_json::Map<String, serde_json::Value>,
}

/// A fact with its retrieval score (already boosted when verified).
#[derive(Debug, Clone)]
pub struct ScoredFact {
    pub fact: Fact,
    pub score: f64,
}

/// Persisted per-guild document (`guild_<id>.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildDocument {
    pub guild_id: GuildId,
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub facts: Vec<Fact>,
    #[serde(default)]
    pub metadata: GuildMetadata,
}

impl GuildDocument {
    pub fn empty(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            last_updated: Utc::now(),
            facts: Vec::new(),
            metadata: GuildMetadata::default(),
        }
    }

    /// Recompute derived metadata from the fact list.
    pub fn refresh_metadata(&mut self) {
        self.metadata.total_facts = self.facts.len();
        let mut categories = BTreeMap::new();
        for fact in &self.facts {
            *categories
                .entry(fact.category.as_str().to_string())
                .or_insert(0) += 1;
        }
        self.metadata.categories = categories;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildMetadata {
    #[serde(default)]
    pub total_facts: usize,
    /// Messages that stored or promoted at least one fact.
    #[serde(default)]
    pub total_messages_processed: u64,
    #[serde(default)]
    pub categories: BTreeMap<String, usize>,
}

/// Snapshot returned by `FactStore::stats`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuildStats {
    pub guild_id: GuildId,
    pub total_facts: usize,
    pub verified: usize,
    pub unverified: usize,
    pub total_messages_processed: u64,
    pub categories: BTreeMap<String, usize>,
    pub last_updated: DateTime<Utc>,
}

/// Generate a new fact id.
pub fn new_fact_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("fact_{}", &hex[..8])
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Convert f32 vector to bytes for SQLite BLOB storage.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    vec.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Convert SQLite BLOB back to f32 vector. Trailing partial bytes are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity. Mismatched lengths and zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
