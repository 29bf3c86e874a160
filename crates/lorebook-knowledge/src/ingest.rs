// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingestion pipeline and the `KnowledgeBase` facade.
//!
//! Inbound text flows chunker → extractor → confidence filter → dedup →
//! `FactStore`, then stored facts are upserted into the vector index in the
//! background. Queries go through the [`Retriever`], which migrates a guild's
//! facts into the index on first use.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use lorebook_config::LorebookConfig;
use lorebook_core::traits::{CompletionAdapter, EmbeddingAdapter};
use lorebook_core::{GuildId, LorebookError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::channel::KnowledgeChannelMatcher;
use crate::chunker::Chunker;
use crate::context::format_context;
use crate::embedder::OnnxEmbedder;
use crate::extractor::{ExtractionContext, Extractor};
use crate::keywords::{extract_keywords, fact_terms, keyword_overlap};
use crate::metrics;
use crate::migration::{MigrationManager, MigrationState};
use crate::model_manager::ModelManager;
use crate::registry::GuildRegistry;
use crate::retriever::{RankingParams, Retriever, VectorBackend};
use crate::store::{validate_new_fact, FactStore};
use crate::types::{
    new_fact_id, truncate_chars, Fact, FactDraft, GuildDocument, GuildStats, ScoredFact, SourceRef,
    ORIGINAL_MESSAGE_CHARS,
};
use crate::vector::VectorIndex;

/// Why a message is being ingested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestTrigger {
    /// Ordinary chat. Facts must clear the confidence threshold.
    Conversation,
    /// Posted in a knowledge channel. Facts are verified.
    KnowledgeChannel,
    /// The message was pinned. Facts are verified and earlier facts from the
    /// same message are promoted.
    Pin,
}

impl IngestTrigger {
    fn verified(self) -> bool {
        !matches!(self, Self::Conversation)
    }
}

/// A chat message handed to the knowledge base by the hosting bot.
#[derive(Debug, Clone, Default)]
pub struct IncomingMessage {
    pub guild_id: GuildId,
    pub message_id: String,
    pub channel_id: String,
    pub channel_name: String,
    pub channel_topic: Option<String>,
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    /// Preceding turns, oldest first, used only as extraction context.
    pub recent_turns: Vec<String>,
}

impl IncomingMessage {
    fn source_ref(&self) -> SourceRef {
        SourceRef {
            message_id: self.message_id.clone(),
            author_id: self.author_id.clone(),
            author_name: self.author_name.clone(),
            channel_id: self.channel_id.clone(),
            channel_name: self.channel_name.clone(),
            timestamp: self.timestamp,
            original_message: truncate_chars(&self.content, ORIGINAL_MESSAGE_CHARS).to_string(),
        }
    }
}

/// What one ingest call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    /// Ids of newly stored facts.
    pub stored: Vec<String>,
    pub skipped_low_confidence: usize,
    pub skipped_duplicate: usize,
    /// Existing facts promoted to verified.
    pub promoted: usize,
}

impl IngestReport {
    fn absorb(&mut self, other: IngestReport) {
        self.stored.extend(other.stored);
        self.skipped_low_confidence += other.skipped_low_confidence;
        self.skipped_duplicate += other.skipped_duplicate;
        self.promoted += other.promoted;
    }
}

/// Facade over the whole knowledge pipeline for a process.
pub struct KnowledgeBase {
    enabled: bool,
    extraction_enabled: bool,
    confidence_threshold: f64,
    dedup_threshold: f64,
    max_context_facts: usize,
    registry: Arc<GuildRegistry>,
    store: Arc<FactStore>,
    index: Option<Arc<VectorIndex>>,
    migrations: Option<Arc<MigrationManager>>,
    chunker: Chunker,
    extractor: Extractor,
    retriever: Retriever,
    matcher: KnowledgeChannelMatcher,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl KnowledgeBase {
    /// Build the knowledge base.
    ///
    /// With `embedder` set and vectors enabled, the index database is opened
    /// under the data directory. If that fails, retrieval runs keyword-only.
    pub async fn open(
        config: &LorebookConfig,
        provider: Arc<dyn CompletionAdapter>,
        embedder: Option<Arc<dyn EmbeddingAdapter>>,
    ) -> Result<Self, LorebookError> {
        metrics::register_metrics();
        let knowledge = &config.knowledge;
        let data_dir = PathBuf::from(&knowledge.data_dir);
        let registry = Arc::new(GuildRegistry::new());
        let store = Arc::new(
            FactStore::open(data_dir.clone(), knowledge.guild_cache_size, Arc::clone(&registry)).await?,
        );

        let index = match embedder {
            Some(embedder) if config.vector.enabled => {
                let path = data_dir.join(&config.vector.database_file);
                match VectorIndex::open(&path, embedder).await {
                    Ok(index) => Some(Arc::new(index)),
                    Err(e) => {
                        warn!(error = %e, path = %path.display(), "vector index unavailable, retrieval is keyword-only");
                        None
                    }
                }
            }
            _ => None,
        };
        let migrations = index.as_ref().map(|index| {
            Arc::new(MigrationManager::new(
                Arc::clone(&store),
                Arc::clone(index),
                Arc::clone(&registry),
            ))
        });
        let backend = index
            .as_ref()
            .zip(migrations.as_ref())
            .map(|(index, migrations)| VectorBackend {
                index: Arc::clone(index),
                migrations: Arc::clone(migrations),
            });

        let temperature = config.llm.temperature;
        let retriever = Retriever::new(
            Arc::clone(&store),
            backend,
            RankingParams::from_config(knowledge, &config.vector),
        );

        info!(
            data_dir = %data_dir.display(),
            vector = index.is_some(),
            "knowledge base ready"
        );

        Ok(Self {
            enabled: knowledge.enabled,
            extraction_enabled: knowledge.extraction_enabled,
            confidence_threshold: knowledge.confidence_threshold,
            dedup_threshold: knowledge.dedup_overlap_threshold,
            max_context_facts: knowledge.max_context_facts,
            registry,
            store,
            index,
            migrations,
            chunker: Chunker::new(Arc::clone(&provider), knowledge, temperature),
            extractor: Extractor::new(provider, knowledge, temperature),
            retriever,
            matcher: KnowledgeChannelMatcher::from_config(knowledge)?,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Like [`open`](Self::open), loading the local ONNX embedder first.
    ///
    /// The model is downloaded on first run. Any failure along the way leaves
    /// the knowledge base keyword-only.
    pub async fn open_with_local_embeddings(
        config: &LorebookConfig,
        provider: Arc<dyn CompletionAdapter>,
    ) -> Result<Self, LorebookError> {
        let embedder = if config.vector.enabled {
            match load_local_embedder(config).await {
                Ok(embedder) => Some(embedder),
                Err(e) => {
                    warn!(error = %e, "embedding model unavailable, retrieval is keyword-only");
                    None
                }
            }
        } else {
            None
        };
        Self::open(config, provider, embedder).await
    }

    pub fn store(&self) -> &Arc<FactStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<GuildRegistry> {
        &self.registry
    }

    /// Migration state of a guild. Always `NotMigrated` without a vector index.
    pub fn migration_state(&self, guild_id: &GuildId) -> MigrationState {
        self.migrations
            .as_ref()
            .map_or(MigrationState::NotMigrated, |m| m.state(guild_id))
    }

    pub fn is_knowledge_channel(&self, channel_name: &str, channel_topic: Option<&str>) -> bool {
        self.matcher.is_knowledge_channel(channel_name, channel_topic)
    }

    /// Extract and store facts from one message.
    ///
    /// Conversation messages posted in a knowledge channel are treated as
    /// knowledge-channel messages. Upstream failures drop the affected
    /// segment; only storage failures are returned.
    pub async fn ingest(
        &self,
        message: &IncomingMessage,
        trigger: IngestTrigger,
    ) -> Result<IngestReport, LorebookError> {
        if !self.enabled {
            return Ok(IngestReport::default());
        }
        let trigger = match trigger {
            IngestTrigger::Conversation
                if self.is_knowledge_channel(&message.channel_name, message.channel_topic.as_deref()) =>
            {
                IngestTrigger::KnowledgeChannel
            }
            other => other,
        };
        let guild_id = &message.guild_id;

        if trigger == IngestTrigger::Pin {
            let promoted = self
                .store
                .mark_message_verified(guild_id, &message.message_id)
                .await?;
            if promoted > 0 {
                info!(guild_id = %guild_id, count = promoted, "pinned message promoted existing facts");
                return Ok(IngestReport {
                    promoted,
                    ..IngestReport::default()
                });
            }
        }

        if !self.extraction_enabled || message.content.trim().is_empty() {
            return Ok(IngestReport::default());
        }

        let context = ExtractionContext {
            author_name: message.author_name.clone(),
            recent_turns: message.recent_turns.clone(),
        };
        let mut drafts = Vec::new();
        for segment in self.chunker.chunk(&message.content).await {
            if self.cancel.is_cancelled() {
                debug!(guild_id = %guild_id, "ingest cancelled before commit");
                return Ok(IngestReport::default());
            }
            drafts.extend(self.extractor.extract(&segment, &context).await);
        }
        if drafts.is_empty() {
            return Ok(IngestReport::default());
        }

        let verified = trigger.verified();
        let (candidates, skipped_low_confidence) =
            filter_drafts(drafts, verified, self.confidence_threshold);
        metrics::record_facts_dropped("low_confidence", skipped_low_confidence);

        let source = message.source_ref();
        let now = Utc::now();
        let facts: Vec<Fact> = candidates
            .into_iter()
            .map(|draft| draft_to_fact(draft, guild_id, &source, verified, now))
            .collect();

        let mut report = if facts.is_empty() {
            IngestReport::default()
        } else {
            let threshold = self.dedup_threshold;
            let (stored, report) = self
                .store
                .commit(guild_id, move |doc| Ok(merge_facts(doc, facts, threshold)))
                .await?;
            metrics::record_facts_stored(stored.len());
            metrics::record_facts_dropped("duplicate", report.skipped_duplicate);
            self.index_in_background(stored);
            report
        };
        report.skipped_low_confidence = skipped_low_confidence;

        if !report.stored.is_empty() || report.promoted > 0 {
            info!(
                guild_id = %guild_id,
                count = report.stored.len(),
                promoted = report.promoted,
                verified,
                channel = %message.channel_name,
                "facts ingested"
            );
        }
        Ok(report)
    }

    /// Fire-and-forget [`ingest`](Self::ingest). Failures surface only in logs and metrics.
    pub fn spawn_ingest(self: &Arc<Self>, message: IncomingMessage, trigger: IngestTrigger) {
        let this = Arc::clone(self);
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(guild_id = %message.guild_id, "background ingest cancelled");
                }
                result = this.ingest(&message, trigger) => {
                    if let Err(e) = result {
                        warn!(guild_id = %message.guild_id, error = %e, "background ingest failed");
                    }
                }
            }
        });
    }

    /// Accept every currently pinned message, typically once at startup.
    pub async fn backfill_pins(&self, pins: Vec<IncomingMessage>) -> IngestReport {
        let mut total = IngestReport::default();
        for pin in pins {
            match self.ingest(&pin, IngestTrigger::Pin).await {
                Ok(report) => total.absorb(report),
                Err(e) => {
                    warn!(guild_id = %pin.guild_id, error = %e, "pin backfill failed for message");
                }
            }
        }
        info!(
            count = total.stored.len(),
            promoted = total.promoted,
            "pin backfill complete"
        );
        total
    }

    /// Top-`k` facts for a query.
    pub async fn retrieve(
        &self,
        guild_id: &GuildId,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredFact>, LorebookError> {
        if !self.enabled {
            return Ok(Vec::new());
        }
        self.retriever.retrieve(guild_id, query, k).await
    }

    /// Prompt block for a query, using `max_context_facts`.
    ///
    /// Errors are logged and produce no context.
    pub async fn context_for(&self, guild_id: &GuildId, query: &str) -> Option<String> {
        match self.retrieve(guild_id, query, self.max_context_facts).await {
            Ok(facts) => format_context(&facts),
            Err(e) => {
                warn!(guild_id = %guild_id, error = %e, "context retrieval failed");
                None
            }
        }
    }

    pub async fn stats(&self, guild_id: &GuildId) -> Result<GuildStats, LorebookError> {
        self.store.stats(guild_id).await
    }

    /// Wait until every background task spawned so far has finished.
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel background work and wait for it to stop.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("knowledge base shut down");
    }

    fn index_in_background(&self, facts: Vec<Fact>) {
        let Some(index) = &self.index else {
            return;
        };
        if facts.is_empty() {
            return;
        }
        let index = Arc::clone(index);
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move {
            for fact in facts {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    result = index.upsert(&fact) => {
                        if let Err(e) = result {
                            warn!(guild_id = %fact.guild_id, fact_id = %fact.id, error = %e, "vector upsert failed");
                        }
                    }
                }
            }
        });
    }
}

async fn load_local_embedder(config: &LorebookConfig) -> Result<Arc<dyn EmbeddingAdapter>, LorebookError> {
    let manager = ModelManager::new(
        PathBuf::from(&config.knowledge.data_dir),
        config.vector.model_name.clone(),
    );
    let model_path = manager.ensure_model().await?;
    let embedder = tokio::task::spawn_blocking(move || OnnxEmbedder::new(&model_path))
        .await
        .map_err(|e| LorebookError::Internal(format!("embedder loader task failed: {e}")))??;
    Ok(Arc::new(embedder))
}

/// Split drafts into those worth keeping and a count of low-confidence drops.
///
/// Verified drafts always pass. Empty content never does.
pub fn filter_drafts(drafts: Vec<FactDraft>, verified: bool, threshold: f64) -> (Vec<FactDraft>, usize) {
    let mut skipped = 0;
    let kept = drafts
        .into_iter()
        .filter(|d| !d.content.trim().is_empty())
        .filter(|d| {
            let keep = verified || d.confidence >= threshold;
            if !keep {
                skipped += 1;
            }
            keep
        })
        .collect();
    (kept, skipped)
}

fn draft_to_fact(
    draft: FactDraft,
    guild_id: &GuildId,
    source: &SourceRef,
    verified: bool,
    created_at: DateTime<Utc>,
) -> Fact {
    let content = draft.content.trim().to_string();
    let keywords = if draft.keywords.is_empty() {
        extract_keywords(&content)
    } else {
        draft.keywords
    };
    Fact {
        id: new_fact_id(),
        guild_id: guild_id.clone(),
        content,
        category: draft.category,
        keywords,
        entities: draft.entities,
        confidence: draft.confidence.clamp(0.0, 1.0),
        verified,
        source: source.clone(),
        created_at,
        embedding: None,
    }
}

/// Add `facts` to `doc`, skipping near-duplicates.
///
/// A candidate is a duplicate when more than `threshold` of its keywords
/// appear in an existing fact, including facts accepted earlier in the same
/// batch. A verified duplicate of an unverified fact promotes that fact
/// instead. Returns the stored facts, a report, and whether `doc` changed.
fn merge_facts(
    doc: &mut GuildDocument,
    facts: Vec<Fact>,
    threshold: f64,
) -> ((Vec<Fact>, IngestReport), bool) {
    let mut stored = Vec::new();
    let mut report = IngestReport::default();

    for mut fact in facts {
        let duplicate = doc
            .facts
            .iter()
            .position(|existing| keyword_overlap(&fact.keywords, &fact_terms(existing)) > threshold);

        if let Some(pos) = duplicate {
            let existing = &mut doc.facts[pos];
            if fact.verified && !existing.verified {
                existing.verified = true;
                report.promoted += 1;
            } else {
                report.skipped_duplicate += 1;
            }
            continue;
        }

        while doc.facts.iter().any(|f| f.id == fact.id) {
            fact.id = new_fact_id();
        }
        if let Err(e) = validate_new_fact(doc, &fact) {
            warn!(error = %e, "discarding invalid candidate fact");
            continue;
        }
        report.stored.push(fact.id.clone());
        stored.push(fact.clone());
        doc.facts.push(fact);
    }

    let changed = !stored.is_empty() || report.promoted > 0;
    if changed {
        doc.metadata.total_messages_processed += 1;
    }
    ((stored, report), changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;

    fn draft(content: &str, confidence: f64) -> FactDraft {
        FactDraft {
            content: content.to_string(),
            category: Category::General,
            confidence,
            keywords: vec![],
            entities: serde_json::Map::new(),
        }
    }

    fn fact(content: &str, verified: bool) -> Fact {
        draft_to_fact(
            draft(content, 0.9),
            &GuildId::from("1"),
            &SourceRef::default(),
            verified,
            Utc::now(),
        )
    }

    #[test]
    fn filter_respects_threshold_and_verification() {
        let drafts = vec![draft("a fact", 0.69), draft("b fact", 0.7), draft("  ", 1.0)];
        let (kept, skipped) = filter_drafts(drafts.clone(), false, 0.7);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].content, "b fact");
        assert_eq!(skipped, 1);

        let (kept, skipped) = filter_drafts(drafts, true, 0.7);
        assert_eq!(kept.len(), 2);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn draft_keywords_default_to_content_words() {
        let f = fact("Maria lives in Lisbon", false);
        assert_eq!(f.keywords, vec!["maria", "lives", "lisbon"]);
        assert!(f.id.starts_with("fact_"));
    }

    #[test]
    fn merge_skips_duplicates_within_batch() {
        let mut doc = GuildDocument::empty(GuildId::from("1"));
        let batch = vec![
            fact("Maria lives in Lisbon", false),
            fact("Maria lives in Lisbon now", false),
            fact("Raid night is Thursday", false),
        ];
        let ((stored, report), changed) = merge_facts(&mut doc, batch, 0.7);
        assert!(changed);
        assert_eq!(stored.len(), 2);
        assert_eq!(report.skipped_duplicate, 1);
        assert_eq!(doc.facts.len(), 2);
        assert_eq!(doc.metadata.total_messages_processed, 1);
    }

    #[test]
    fn verified_duplicate_promotes_existing() {
        let mut doc = GuildDocument::empty(GuildId::from("1"));
        doc.facts.push(fact("Maria lives in Lisbon", false));
        let ((stored, report), changed) =
            merge_facts(&mut doc, vec![fact("Maria lives in Lisbon", true)], 0.7);
        assert!(changed);
        assert!(stored.is_empty());
        assert_eq!(report.promoted, 1);
        assert!(doc.facts[0].verified);
    }

    #[test]
    fn all_duplicates_leave_document_unchanged() {
        let mut doc = GuildDocument::empty(GuildId::from("1"));
        doc.facts.push(fact("Maria lives in Lisbon", true));
        let ((_, report), changed) =
            merge_facts(&mut doc, vec![fact("Maria lives in Lisbon", false)], 0.7);
        assert!(!changed);
        assert_eq!(report.skipped_duplicate, 1);
        assert_eq!(doc.metadata.total_messages_processed, 0);
    }
}
