// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite-backed per-guild vector index.
//!
//! Embeddings are stored as little-endian f32 BLOBs keyed by
//! `(guild_id, fact_id)`. Search is an exact cosine scan over one guild's
//! rows. The `guild_migrations` table records guilds whose flat store has been
//! fully indexed.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use lorebook_core::traits::EmbeddingAdapter;
use lorebook_core::types::EmbeddingInput;
use lorebook_core::{GuildId, LorebookError};
use rusqlite::OpenFlags;
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::types::{blob_to_vec, cosine_similarity, vec_to_blob, Fact};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS fact_vectors (
    guild_id   TEXT NOT NULL,
    fact_id    TEXT NOT NULL,
    content    TEXT NOT NULL,
    embedding  BLOB NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (guild_id, fact_id)
);
CREATE TABLE IF NOT EXISTS guild_migrations (
    guild_id    TEXT PRIMARY KEY,
    fact_count  INTEGER NOT NULL,
    migrated_at TEXT NOT NULL
);
";

/// Convert tokio-rusqlite errors to `LorebookError::IndexUnavailable`.
fn map_tr_err(e: tokio_rusqlite::Error<rusqlite::Error>) -> LorebookError {
    LorebookError::IndexUnavailable {
        message: format!("vector database error: {e}"),
    }
}

/// Opening a connection fails with a plain rusqlite error.
fn map_open_err(e: rusqlite::Error) -> LorebookError {
    LorebookError::IndexUnavailable {
        message: format!("cannot open vector database: {e}"),
    }
}

/// Semantic index mapping fact id to embedding, partitioned by guild.
pub struct VectorIndex {
    conn: Connection,
    embedder: Arc<dyn EmbeddingAdapter>,
}

impl VectorIndex {
    /// Open (or create) the index database file.
    pub async fn open(path: &Path, embedder: Arc<dyn EmbeddingAdapter>) -> Result<Self, LorebookError> {
        let conn = Connection::open(path).await.map_err(map_open_err)?;
        Self::with_connection(conn, embedder).await
    }

    /// In-memory index, for tests and ephemeral runs.
    pub async fn open_in_memory(embedder: Arc<dyn EmbeddingAdapter>) -> Result<Self, LorebookError> {
        let conn = Connection::open_in_memory().await.map_err(map_open_err)?;
        Self::with_connection(conn, embedder).await
    }

    async fn with_connection(
        conn: Connection,
        embedder: Arc<dyn EmbeddingAdapter>,
    ) -> Result<Self, LorebookError> {
        conn.call(|conn| conn.execute_batch(SCHEMA))
            .await
            .map_err(map_tr_err)?;
        Ok(Self { conn, embedder })
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, LorebookError> {
        let output = self
            .embedder
            .embed(EmbeddingInput {
                texts: vec![text.to_string()],
            })
            .await?;
        output
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| LorebookError::IndexUnavailable {
                message: "embedder returned no vectors".to_string(),
            })
    }

    /// Embed (unless the fact already carries a vector) and store one fact.
    pub async fn upsert(&self, fact: &Fact) -> Result<(), LorebookError> {
        let embedding = match &fact.embedding {
            Some(v) => v.clone(),
            None => self.embed_one(&fact.content).await?,
        };
        let guild_id = fact.guild_id.as_str().to_string();
        let fact_id = fact.id.clone();
        let content = fact.content.clone();
        let blob = vec_to_blob(&embedding);
        let now = Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO fact_vectors (guild_id, fact_id, content, embedding, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT (guild_id, fact_id) DO UPDATE SET
                        content = excluded.content,
                        embedding = excluded.embedding,
                        updated_at = excluded.updated_at",
                    rusqlite::params![guild_id, fact_id, content, blob, now],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Top-`k` facts of `guild_id` by cosine similarity to `query`.
    pub async fn search(
        &self,
        guild_id: &GuildId,
        query: &str,
        k: usize,
    ) -> Result<Vec<(String, f32)>, LorebookError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embed_one(query).await?;
        let guild = guild_id.as_str().to_string();

        let hits = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT fact_id, embedding FROM fact_vectors WHERE guild_id = ?1")?;
                let mut scored = stmt
                    .query_map(rusqlite::params![guild], |row| {
                        let id: String = row.get(0)?;
                        let blob: Vec<u8> = row.get(1)?;
                        Ok((id, cosine_similarity(&query_vec, &blob_to_vec(&blob))))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
                scored.truncate(k);
                Ok(scored)
            })
            .await
            .map_err(map_tr_err)?;

        debug!(guild_id = %guild_id, hits = hits.len(), "vector search complete");
        Ok(hits)
    }

    /// Delete rows of `guild_id` whose fact id is not in `live`. Returns rows removed.
    pub async fn retain(
        &self,
        guild_id: &GuildId,
        live: HashSet<String>,
    ) -> Result<usize, LorebookError> {
        let guild = guild_id.as_str().to_string();
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let stale: Vec<String> = {
                    let mut stmt = tx.prepare("SELECT fact_id FROM fact_vectors WHERE guild_id = ?1")?;
                    let ids = stmt
                        .query_map(rusqlite::params![guild], |row| row.get::<_, String>(0))?
                        .collect::<Result<Vec<_>, _>>()?;
                    ids.into_iter().filter(|id| !live.contains(id)).collect()
                };
                for id in &stale {
                    tx.execute(
                        "DELETE FROM fact_vectors WHERE guild_id = ?1 AND fact_id = ?2",
                        rusqlite::params![guild, id],
                    )?;
                }
                tx.commit()?;
                Ok(stale.len())
            })
            .await
            .map_err(map_tr_err)
    }

    /// Fact ids of the guild that have an index row.
    pub async fn indexed_ids(&self, guild_id: &GuildId) -> Result<HashSet<String>, LorebookError> {
        let guild = guild_id.as_str().to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare("SELECT fact_id FROM fact_vectors WHERE guild_id = ?1")?;
                let ids = stmt
                    .query_map(rusqlite::params![guild], |row| row.get::<_, String>(0))?
                    .collect::<Result<HashSet<_>, _>>()?;
                Ok(ids)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Number of indexed facts for the guild.
    pub async fn count(&self, guild_id: &GuildId) -> Result<usize, LorebookError> {
        let guild = guild_id.as_str().to_string();
        self.conn
            .call(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM fact_vectors WHERE guild_id = ?1",
                    rusqlite::params![guild],
                    |row| row.get(0),
                )?;
                Ok(n as usize)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Whether a completed migration has been recorded for the guild.
    pub async fn is_migrated(&self, guild_id: &GuildId) -> Result<bool, LorebookError> {
        let guild = guild_id.as_str().to_string();
        self.conn
            .call(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM guild_migrations WHERE guild_id = ?1",
                    rusqlite::params![guild],
                    |row| row.get(0),
                )?;
                Ok(n > 0)
            })
            .await
            .map_err(map_tr_err)
    }

    /// Persist the migration marker.
    pub async fn mark_migrated(&self, guild_id: &GuildId, fact_count: usize) -> Result<(), LorebookError> {
        let guild = guild_id.as_str().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO guild_migrations (guild_id, fact_count, migrated_at)
                     VALUES (?1, ?2, ?3)",
                    rusqlite::params![guild, fact_count as i64, now],
                )?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }
}

/// Per-guild row counts from an index file, opened read-only.
pub async fn read_vector_counts(path: &Path) -> Result<BTreeMap<String, usize>, LorebookError> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .await
    .map_err(map_open_err)?;
    conn.call(|conn| {
        let mut stmt =
            conn.prepare("SELECT guild_id, COUNT(*) FROM fact_vectors GROUP BY guild_id")?;
        let rows = stmt
            .query_map([], |row| {
                let guild: String = row.get(0)?;
                let n: i64 = row.get(1)?;
                Ok((guild, n as usize))
            })?
            .collect::<Result<BTreeMap<_, _>, _>>()?;
        Ok(rows)
    })
    .await
    .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{new_fact_id, Category, SourceRef};
    use lorebook_test_utils::MockEmbedder;

    fn fact(guild: &str, content: &str) -> Fact {
        Fact {
            id: new_fact_id(),
            guild_id: GuildId::from(guild),
            content: content.to_string(),
            category: Category::General,
            keywords: vec![],
            entities: serde_json::Map::new(),
            confidence: 0.9,
            verified: false,
            source: SourceRef::default(),
            created_at: Utc::now(),
            embedding: None,
        }
    }

    async fn index() -> (VectorIndex, MockEmbedder) {
        let embedder = MockEmbedder::new();
        let idx = VectorIndex::open_in_memory(Arc::new(embedder.clone()))
            .await
            .unwrap();
        (idx, embedder)
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let (idx, _) = index().await;
        let raid = fact("1", "weekly raid starts thursday evening");
        let pizza = fact("1", "pizza night menu voting");
        idx.upsert(&raid).await.unwrap();
        idx.upsert(&pizza).await.unwrap();

        let hits = idx.search(&GuildId::from("1"), "when does the raid start thursday", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, raid.id);
        assert!(hits[0].1 > hits[1].1);
    }

    #[tokio::test]
    async fn search_is_guild_scoped() {
        let (idx, _) = index().await;
        let a = fact("a", "secret base location north");
        idx.upsert(&a).await.unwrap();
        idx.upsert(&fact("b", "secret base location south")).await.unwrap();

        let hits = idx.search(&GuildId::from("a"), "secret base location", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, a.id);
        assert_eq!(idx.count(&GuildId::from("b")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let (idx, embedder) = index().await;
        let f = fact("1", "guild bank is managed by Ana");
        idx.upsert(&f).await.unwrap();
        idx.upsert(&f).await.unwrap();
        assert_eq!(idx.count(&GuildId::from("1")).await.unwrap(), 1);
        assert_eq!(embedder.texts_embedded(), 2);

        let mut precomputed = fact("1", "has a vector");
        precomputed.embedding = Some(MockEmbedder::vector_for("has a vector"));
        idx.upsert(&precomputed).await.unwrap();
        assert_eq!(embedder.texts_embedded(), 2);
    }

    #[tokio::test]
    async fn retain_prunes_orphans() {
        let (idx, _) = index().await;
        let keep = fact("1", "keep me");
        let stale = fact("1", "drop me");
        idx.upsert(&keep).await.unwrap();
        idx.upsert(&stale).await.unwrap();
        idx.upsert(&fact("2", "other guild")).await.unwrap();

        let live: HashSet<String> = [keep.id.clone()].into_iter().collect();
        assert_eq!(idx.retain(&GuildId::from("1"), live).await.unwrap(), 1);
        assert_eq!(idx.count(&GuildId::from("1")).await.unwrap(), 1);
        assert_eq!(idx.count(&GuildId::from("2")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn indexed_ids_lists_guild_rows() {
        let (idx, _) = index().await;
        let a = fact("1", "first");
        idx.upsert(&a).await.unwrap();
        idx.upsert(&fact("2", "elsewhere")).await.unwrap();
        let ids = idx.indexed_ids(&GuildId::from("1")).await.unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains(&a.id));
    }

    #[tokio::test]
    async fn unopenable_path_is_index_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("vectors.db");
        let result = VectorIndex::open(&path, Arc::new(MockEmbedder::new())).await;
        assert!(matches!(result, Err(LorebookError::IndexUnavailable { .. })));
    }

    #[tokio::test]
    async fn embedder_failure_is_index_unavailable() {
        let (idx, embedder) = index().await;
        embedder.set_failing(true);
        let err = idx.upsert(&fact("1", "anything")).await.unwrap_err();
        assert!(matches!(err, LorebookError::IndexUnavailable { .. }));
    }

    #[tokio::test]
    async fn migration_marker_persists_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.db");
        let g = GuildId::from("77");
        {
            let idx = VectorIndex::open(&path, Arc::new(MockEmbedder::new())).await.unwrap();
            assert!(!idx.is_migrated(&g).await.unwrap());
            idx.upsert(&fact("77", "persist me")).await.unwrap();
            idx.mark_migrated(&g, 1).await.unwrap();
        }
        let idx = VectorIndex::open(&path, Arc::new(MockEmbedder::new())).await.unwrap();
        assert!(idx.is_migrated(&g).await.unwrap());

        let counts = read_vector_counts(&path).await.unwrap();
        assert_eq!(counts.get("77"), Some(&1));
    }
}
