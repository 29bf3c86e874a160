// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vector migration and vector-backed retrieval.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lorebook_core::{GuildId, LorebookError};
use lorebook_knowledge::{
    new_fact_id, Category, Fact, FactStore, GuildRegistry, MigrationManager, MigrationState,
    RankingParams, Retriever, SourceRef, VectorBackend, VectorIndex,
};
use lorebook_test_utils::MockEmbedder;
use tempfile::TempDir;

struct Harness {
    _dir: TempDir,
    store: Arc<FactStore>,
    index: Arc<VectorIndex>,
    migrations: Arc<MigrationManager>,
    embedder: MockEmbedder,
}

async fn harness(embedder: MockEmbedder) -> Harness {
    let dir = TempDir::new().unwrap();
    let registry = Arc::new(GuildRegistry::new());
    let store = Arc::new(FactStore::open(dir.path(), 10, Arc::clone(&registry)).await.unwrap());
    let index = Arc::new(
        VectorIndex::open(&dir.path().join("vectors.db"), Arc::new(embedder.clone()))
            .await
            .unwrap(),
    );
    let migrations = Arc::new(MigrationManager::new(
        Arc::clone(&store),
        Arc::clone(&index),
        registry,
    ));
    Harness {
        _dir: dir,
        store,
        index,
        migrations,
        embedder,
    }
}

fn fact(guild: &str, content: &str, verified: bool) -> Fact {
    Fact {
        id: new_fact_id(),
        guild_id: GuildId::from(guild),
        content: content.to_string(),
        category: Category::General,
        keywords: vec![],
        entities: serde_json::Map::new(),
        confidence: 0.9,
        verified,
        source: SourceRef::default(),
        created_at: Utc::now(),
        embedding: None,
    }
}

async fn seed(h: &Harness, guild: &str, contents: &[&str]) {
    for content in contents {
        h.store.append(fact(guild, content, false)).await.unwrap();
    }
}

#[tokio::test]
async fn concurrent_first_queries_run_one_pass() {
    let h = harness(MockEmbedder::new().with_delay(Duration::from_millis(20))).await;
    let guild = GuildId::from("1");
    seed(&h, "1", &["raid on thursday", "bank run by bo", "pizza night friday"]).await;

    let (a, b) = tokio::join!(
        h.migrations.ensure_migrated(&guild),
        h.migrations.ensure_migrated(&guild)
    );
    a.unwrap();
    b.unwrap();

    assert_eq!(h.migrations.state(&guild), MigrationState::Migrated);
    assert_eq!(h.embedder.texts_embedded(), 3);
    assert_eq!(h.index.count(&guild).await.unwrap(), 3);
}

#[tokio::test]
async fn migrated_guild_is_not_migrated_again() {
    let h = harness(MockEmbedder::new()).await;
    let guild = GuildId::from("1");
    seed(&h, "1", &["raid on thursday", "bank run by bo"]).await;

    h.migrations.ensure_migrated(&guild).await.unwrap();
    let calls = h.embedder.call_count();
    h.migrations.ensure_migrated(&guild).await.unwrap();
    assert_eq!(h.embedder.call_count(), calls);

    // A fresh process sees the persisted marker and skips the pass.
    let restarted = MigrationManager::new(
        Arc::clone(&h.store),
        Arc::clone(&h.index),
        Arc::new(GuildRegistry::new()),
    );
    assert_eq!(restarted.state(&guild), MigrationState::NotMigrated);
    restarted.ensure_migrated(&guild).await.unwrap();
    assert_eq!(restarted.state(&guild), MigrationState::Migrated);
    assert_eq!(h.embedder.call_count(), calls);
}

#[tokio::test]
async fn stale_marker_triggers_another_pass() {
    let h = harness(MockEmbedder::new()).await;
    let guild = GuildId::from("1");
    seed(&h, "1", &["raid on thursday", "bank run by bo"]).await;
    h.migrations.ensure_migrated(&guild).await.unwrap();

    // Committed while no index was attached.
    seed(&h, "1", &["pizza night friday"]).await;
    assert_eq!(h.index.count(&guild).await.unwrap(), 2);

    let restarted = MigrationManager::new(
        Arc::clone(&h.store),
        Arc::clone(&h.index),
        Arc::new(GuildRegistry::new()),
    );
    restarted.ensure_migrated(&guild).await.unwrap();
    assert_eq!(restarted.state(&guild), MigrationState::Migrated);
    assert_eq!(h.index.count(&guild).await.unwrap(), 3);
}

#[tokio::test]
async fn index_missing_adds_only_unindexed_facts() {
    let h = harness(MockEmbedder::new()).await;
    let guild = GuildId::from("1");
    seed(&h, "1", &["raid on thursday"]).await;
    h.migrations.ensure_migrated(&guild).await.unwrap();
    seed(&h, "1", &["officers meet sunday"]).await;

    let embedded = h.embedder.texts_embedded();
    let facts = h.store.list(&guild).await.unwrap();
    assert_eq!(h.migrations.index_missing(&guild, &facts).await.unwrap(), 1);
    assert_eq!(h.embedder.texts_embedded(), embedded + 1);
    assert_eq!(h.migrations.index_missing(&guild, &facts).await.unwrap(), 0);
    assert_eq!(h.index.count(&guild).await.unwrap(), 2);
}

#[tokio::test]
async fn failed_pass_reverts_and_retries() {
    let h = harness(MockEmbedder::new()).await;
    let guild = GuildId::from("9");
    seed(&h, "9", &["officers meet sunday"]).await;

    h.embedder.set_failing(true);
    let err = h.migrations.ensure_migrated(&guild).await.unwrap_err();
    assert!(matches!(err, LorebookError::Migration { ref guild_id, .. } if guild_id == "9"));
    assert_eq!(h.migrations.state(&guild), MigrationState::NotMigrated);
    assert!(!h.index.is_migrated(&guild).await.unwrap());

    h.embedder.set_failing(false);
    h.migrations.ensure_migrated(&guild).await.unwrap();
    assert_eq!(h.migrations.state(&guild), MigrationState::Migrated);
}

#[tokio::test]
async fn migration_prunes_orphaned_rows() {
    let h = harness(MockEmbedder::new()).await;
    let guild = GuildId::from("1");
    seed(&h, "1", &["kept fact"]).await;
    h.index.upsert(&fact("1", "deleted long ago", false)).await.unwrap();
    assert_eq!(h.index.count(&guild).await.unwrap(), 1);

    h.migrations.ensure_migrated(&guild).await.unwrap();
    let live = h.store.list(&guild).await.unwrap();
    assert_eq!(h.index.count(&guild).await.unwrap(), live.len());
}

#[tokio::test]
async fn vector_retrieval_is_guild_scoped_and_boosted() {
    let h = harness(MockEmbedder::new()).await;
    let retriever = Retriever::new(
        Arc::clone(&h.store),
        Some(VectorBackend {
            index: Arc::clone(&h.index),
            migrations: Arc::clone(&h.migrations),
        }),
        RankingParams {
            verified_boost: 1.5,
            keyword_threshold: 0.3,
            similarity_threshold: 0.1,
        },
    );

    h.store.append(fact("a", "raid starts thursday evening", false)).await.unwrap();
    h.store.append(fact("a", "raid starts thursday night", true)).await.unwrap();
    h.store.append(fact("b", "raid starts thursday evening", false)).await.unwrap();

    let hits = retriever
        .retrieve(&GuildId::from("a"), "raid starts thursday evening", 5)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.fact.guild_id == GuildId::from("a")));
    // The verified fact is less similar but boosted above the exact match.
    assert!(hits[0].fact.verified);

    let b_hits = retriever
        .retrieve(&GuildId::from("b"), "raid starts thursday evening", 5)
        .await
        .unwrap();
    assert_eq!(b_hits.len(), 1);
    assert_eq!(b_hits[0].fact.guild_id, GuildId::from("b"));
}

#[tokio::test]
async fn huge_k_does_not_overflow_candidate_pool() {
    let h = harness(MockEmbedder::new()).await;
    let retriever = Retriever::new(
        Arc::clone(&h.store),
        Some(VectorBackend {
            index: Arc::clone(&h.index),
            migrations: Arc::clone(&h.migrations),
        }),
        RankingParams {
            verified_boost: 1.5,
            keyword_threshold: 0.3,
            similarity_threshold: 0.1,
        },
    );
    seed(&h, "1", &["raid starts thursday evening"]).await;
    let hits = retriever
        .retrieve(&GuildId::from("1"), "raid thursday", usize::MAX)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn top_k_of_five_returns_two_best() {
    let h = harness(MockEmbedder::new()).await;
    let retriever = Retriever::new(
        Arc::clone(&h.store),
        None,
        RankingParams {
            verified_boost: 1.5,
            keyword_threshold: 0.1,
            similarity_threshold: 0.35,
        },
    );
    let guild = GuildId::from("1");
    for content in [
        "alpha beta gamma delta",
        "alpha beta gamma",
        "alpha beta",
        "alpha",
        "alpha beta gamma delta epsilon",
    ] {
        h.store.append(fact("1", content, false)).await.unwrap();
    }

    let hits = retriever
        .retrieve(&guild, "alpha beta gamma delta epsilon", 2)
        .await
        .unwrap();
    let contents: Vec<&str> = hits.iter().map(|h| h.fact.content.as_str()).collect();
    assert_eq!(contents, vec!["alpha beta gamma delta epsilon", "alpha beta gamma delta"]);
}
