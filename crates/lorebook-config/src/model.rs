// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for Lorebook.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Lorebook configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LorebookConfig {
    /// Process identity and logging.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Language model endpoint used for chunking and extraction.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Fact extraction, storage, and retrieval settings.
    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    /// Semantic index settings.
    #[serde(default)]
    pub vector: VectorConfig,
}

/// Process identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    /// Display name used in logs.
    #[serde(default = "default_agent_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_agent_name() -> String {
    "lorebook".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// OpenAI-compatible chat completions endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    /// Full URL of the chat completions endpoint.
    #[serde(default = "default_llm_url")]
    pub base_url: String,

    /// Model identifier sent with each request.
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Bearer token. Local servers usually need none.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Sampling temperature for chunking and extraction.
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,

    /// Retries on 429/5xx. Zero keeps delivery at-most-once.
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_url(),
            model: default_llm_model(),
            api_key: None,
            timeout_secs: default_llm_timeout_secs(),
            temperature: default_llm_temperature(),
            max_retries: 0,
        }
    }
}

fn default_llm_url() -> String {
    "http://localhost:8080/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "qwen".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_llm_temperature() -> f32 {
    0.1
}

/// Knowledge base configuration: extraction, filtering, chunking, retrieval.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct KnowledgeConfig {
    /// Master switch for the knowledge base.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding `guild_<id>.json` documents and the vector database.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Run LLM extraction on ingested text.
    #[serde(default = "default_true")]
    pub extraction_enabled: bool,

    /// Minimum extraction confidence for unverified facts (0.0-1.0).
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Maximum facts injected into a prompt (K).
    #[serde(default = "default_max_context_facts")]
    pub max_context_facts: usize,

    /// Minimum keyword overlap ratio for a fact to qualify (0.0-1.0).
    #[serde(default = "default_keyword_match_threshold")]
    pub keyword_match_threshold: f64,

    /// Score multiplier applied to verified facts. Must exceed 1.0.
    #[serde(default = "default_verified_boost")]
    pub verified_boost: f64,

    /// Output token budget for one extraction call.
    #[serde(default = "default_extraction_max_tokens")]
    pub extraction_max_tokens: u32,

    /// Input token budget for the segment sent to the extraction model.
    #[serde(default = "default_extraction_max_input_tokens")]
    pub extraction_max_input_tokens: usize,

    /// Split oversized messages before extraction.
    #[serde(default = "default_true")]
    pub chunking_enabled: bool,

    /// Message length (chars) at which chunking kicks in.
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: usize,

    /// Target maximum chunk length (chars).
    #[serde(default = "default_chunk_max_size")]
    pub chunk_max_size: usize,

    /// Keyword overlap above which a new fact counts as a duplicate.
    #[serde(default = "default_dedup_overlap_threshold")]
    pub dedup_overlap_threshold: f64,

    /// Detect designated knowledge channels by name/topic.
    #[serde(default = "default_true")]
    pub channel_enabled: bool,

    /// Regex matched (case-insensitively) against channel names.
    #[serde(default = "default_channel_pattern")]
    pub channel_pattern: String,

    /// Number of guild documents kept in memory.
    #[serde(default = "default_guild_cache_size")]
    pub guild_cache_size: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            data_dir: default_data_dir(),
            extraction_enabled: true,
            confidence_threshold: default_confidence_threshold(),
            max_context_facts: default_max_context_facts(),
            keyword_match_threshold: default_keyword_match_threshold(),
            verified_boost: default_verified_boost(),
            extraction_max_tokens: default_extraction_max_tokens(),
            extraction_max_input_tokens: default_extraction_max_input_tokens(),
            chunking_enabled: true,
            chunk_threshold: default_chunk_threshold(),
            chunk_max_size: default_chunk_max_size(),
            dedup_overlap_threshold: default_dedup_overlap_threshold(),
            channel_enabled: true,
            channel_pattern: default_channel_pattern(),
            guild_cache_size: default_guild_cache_size(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_data_dir() -> String {
    dirs::data_dir()
        .map(|p| p.join("lorebook"))
        .unwrap_or_else(|| std::path::PathBuf::from("./data"))
        .display()
        .to_string()
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_max_context_facts() -> usize {
    5
}

fn default_keyword_match_threshold() -> f64 {
    0.3
}

fn default_verified_boost() -> f64 {
    1.5
}

fn default_extraction_max_tokens() -> u32 {
    1500
}

fn default_extraction_max_input_tokens() -> usize {
    2000
}

fn default_chunk_threshold() -> usize {
    2000
}

fn default_chunk_max_size() -> usize {
    500
}

fn default_dedup_overlap_threshold() -> f64 {
    0.7
}

fn default_channel_pattern() -> String {
    "knowledge|facts|rag|info".to_string()
}

fn default_guild_cache_size() -> usize {
    10
}

/// Semantic index configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VectorConfig {
    /// Use vector similarity for retrieval. When false only keyword scoring runs.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Name of the local sentence-transformer model.
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// Minimum (boosted) cosine similarity for a fact to qualify (0.0-1.0).
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// SQLite file (relative to `knowledge.data_dir`) holding embeddings.
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model_name: default_model_name(),
            similarity_threshold: default_similarity_threshold(),
            database_file: default_database_file(),
        }
    }
}

fn default_model_name() -> String {
    "all-MiniLM-L6-v2".to_string()
}

fn default_similarity_threshold() -> f64 {
    0.35
}

fn default_database_file() -> String {
    "vectors.db".to_string()
}
