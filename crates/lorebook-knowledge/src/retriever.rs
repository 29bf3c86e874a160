// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Hybrid fact retrieval.
//!
//! One [`ScoringStrategy`] is chosen per query. Vector similarity is used
//! when the index is available and the guild migrates cleanly; any failure on
//! that path degrades to keyword overlap for the query.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use lorebook_config::{KnowledgeConfig, VectorConfig};
use lorebook_core::{GuildId, LorebookError};
use tracing::{debug, warn};

use crate::keywords::{extract_keywords, fact_terms, keyword_overlap};
use crate::metrics;
use crate::migration::MigrationManager;
use crate::store::FactStore;
use crate::types::{Fact, ScoredFact};
use crate::vector::VectorIndex;

/// How facts are scored for one query.
#[derive(Debug, Clone)]
pub enum ScoringStrategy {
    /// Fraction of query keywords found in the fact's terms.
    Keyword { query_terms: Vec<String> },
    /// Cosine similarity from the vector index, keyed by fact id.
    Vector { similarities: HashMap<String, f32> },
}

impl ScoringStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Keyword { .. } => "keyword",
            Self::Vector { .. } => "vector",
        }
    }

    /// Raw score for a fact, or `None` when the strategy has nothing to say.
    fn score(&self, fact: &Fact) -> Option<f64> {
        match self {
            Self::Keyword { query_terms } => {
                Some(keyword_overlap(query_terms, &fact_terms(fact)))
            }
            // Hits without a backing fact never reach here; facts without a hit are skipped.
            Self::Vector { similarities } => similarities.get(&fact.id).map(|s| f64::from(*s)),
        }
    }
}

/// Ranking knobs shared by both strategies.
#[derive(Debug, Clone, Copy)]
pub struct RankingParams {
    pub verified_boost: f64,
    pub keyword_threshold: f64,
    pub similarity_threshold: f64,
}

impl RankingParams {
    pub fn from_config(knowledge: &KnowledgeConfig, vector: &VectorConfig) -> Self {
        Self {
            verified_boost: knowledge.verified_boost,
            keyword_threshold: knowledge.keyword_match_threshold,
            similarity_threshold: vector.similarity_threshold,
        }
    }

    fn threshold(&self, strategy: &ScoringStrategy) -> f64 {
        match strategy {
            ScoringStrategy::Keyword { .. } => self.keyword_threshold,
            ScoringStrategy::Vector { .. } => self.similarity_threshold,
        }
    }
}

/// Score, boost, filter, sort and truncate.
///
/// Verified facts get `verified_boost` applied before the threshold check.
/// Ties on score go to the newer fact. The result is never padded.
pub fn rank_facts(
    facts: Vec<Fact>,
    strategy: &ScoringStrategy,
    params: &RankingParams,
    k: usize,
) -> Vec<ScoredFact> {
    if matches!(strategy, ScoringStrategy::Keyword { query_terms } if query_terms.is_empty()) {
        return Vec::new();
    }
    let threshold = params.threshold(strategy);

    let mut scored: Vec<ScoredFact> = facts
        .into_iter()
        .filter_map(|fact| {
            let raw = strategy.score(&fact)?;
            let score = if fact.verified {
                raw * params.verified_boost
            } else {
                raw
            };
            (score >= threshold).then_some(ScoredFact { fact, score })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.fact.created_at.cmp(&a.fact.created_at))
    });
    scored.truncate(k);
    scored
}

/// Vector index plus the migration manager that keeps it populated.
pub struct VectorBackend {
    pub index: Arc<VectorIndex>,
    pub migrations: Arc<MigrationManager>,
}

/// Ranks a guild's facts against a free-text query.
pub struct Retriever {
    store: Arc<FactStore>,
    vector: Option<VectorBackend>,
    params: RankingParams,
}

impl Retriever {
    /// `vector` is `None` when semantic search is disabled or unavailable.
    pub fn new(store: Arc<FactStore>, vector: Option<VectorBackend>, params: RankingParams) -> Self {
        Self {
            store,
            vector,
            params,
        }
    }

    /// Top-`k` facts for `query`, best first.
    pub async fn retrieve(
        &self,
        guild_id: &GuildId,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredFact>, LorebookError> {
        if k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let facts = self.store.list(guild_id).await?;
        if facts.is_empty() {
            return Ok(Vec::new());
        }

        let strategy = self.choose_strategy(guild_id, &facts, query, k).await;
        metrics::record_retrieval(strategy.name());

        let results = rank_facts(facts, &strategy, &self.params, k);
        debug!(
            guild_id = %guild_id,
            strategy = strategy.name(),
            count = results.len(),
            "retrieval complete"
        );
        Ok(results)
    }

    async fn choose_strategy(
        &self,
        guild_id: &GuildId,
        facts: &[Fact],
        query: &str,
        k: usize,
    ) -> ScoringStrategy {
        if let Some(backend) = &self.vector {
            match self.vector_strategy(backend, guild_id, facts, query, k).await {
                Ok(strategy) => return strategy,
                Err(e) => {
                    warn!(guild_id = %guild_id, error = %e, "vector search unavailable, using keyword scoring");
                }
            }
        }
        ScoringStrategy::Keyword {
            query_terms: extract_keywords(query),
        }
    }

    async fn vector_strategy(
        &self,
        backend: &VectorBackend,
        guild_id: &GuildId,
        facts: &[Fact],
        query: &str,
        k: usize,
    ) -> Result<ScoringStrategy, LorebookError> {
        backend.migrations.ensure_migrated(guild_id).await?;
        backend.migrations.index_missing(guild_id, facts).await?;
        let pool = k.saturating_mul(4).max(20);
        let hits = backend.index.search(guild_id, query, pool).await?;
        Ok(ScoringStrategy::Vector {
            similarities: hits.into_iter().collect(),
        })
    }
}
