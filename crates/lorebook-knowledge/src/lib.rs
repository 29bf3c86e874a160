// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-guild knowledge base for chat communities.
//!
//! Turns chat messages into discrete facts, stores them per guild, and
//! retrieves the most relevant ones for prompt injection.
//!
//! ## Architecture
//!
//! - **FactStore**: one crash-safe JSON document per guild, LRU cached
//! - **Chunker**: LLM-assisted splitting of long pasted text
//! - **Extractor**: LLM-based fact extraction with confidence scores
//! - **VectorIndex**: SQLite BLOB embeddings with cosine search
//! - **MigrationManager**: lazy single-flight backfill of the vector index
//! - **Retriever**: vector or keyword scoring with a verified boost
//! - **KnowledgeBase**: ingestion pipeline and query facade
//! - **OnnxEmbedder** / **ModelManager**: local sentence-transformer inference

pub mod channel;
pub mod chunker;
pub mod context;
pub mod embedder;
pub mod extractor;
pub mod ingest;
pub mod keywords;
pub mod metrics;
pub mod migration;
pub mod model_manager;
pub mod registry;
pub mod retriever;
pub mod store;
pub mod types;
pub mod vector;

pub use channel::KnowledgeChannelMatcher;
pub use chunker::Chunker;
pub use context::format_context;
pub use embedder::OnnxEmbedder;
pub use extractor::{ExtractionContext, Extractor};
pub use ingest::{IncomingMessage, IngestReport, IngestTrigger, KnowledgeBase};
pub use migration::{MigrationManager, MigrationState};
pub use model_manager::ModelManager;
pub use registry::{GuildContext, GuildRegistry};
pub use retriever::{rank_facts, RankingParams, Retriever, ScoringStrategy, VectorBackend};
pub use store::FactStore;
pub use types::*;
pub use vector::VectorIndex;
