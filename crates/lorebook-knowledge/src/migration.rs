// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lazy, single-flight migration of a guild's flat store into the vector index.
//!
//! The first query for a guild triggers one pass that upserts every stored
//! fact, prunes index rows without a backing fact, and persists a marker in
//! the index database. Concurrent callers wait on the guild's gate and then
//! observe the outcome. A failed or cancelled pass reverts the guild to
//! `NotMigrated` so the next query retries.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use lorebook_core::{GuildId, LorebookError};
use tracing::{debug, info, warn};

use crate::metrics;
use crate::registry::GuildRegistry;
use crate::store::FactStore;
use crate::types::Fact;
use crate::vector::VectorIndex;

/// Migration progress of one guild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MigrationState {
    #[default]
    NotMigrated,
    Migrating,
    Migrated,
}

/// Per-guild migration gate and state, owned by the guild context.
#[derive(Debug, Default)]
pub struct MigrationCell {
    gate: tokio::sync::Mutex<()>,
    state: Mutex<MigrationState>,
}

impl MigrationCell {
    pub fn state(&self) -> MigrationState {
        *lock_state(&self.state)
    }

    fn set(&self, next: MigrationState) {
        *lock_state(&self.state) = next;
    }
}

fn lock_state(state: &Mutex<MigrationState>) -> MutexGuard<'_, MigrationState> {
    // The guarded value is a plain enum; a poisoned lock still holds a valid state.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reverts `Migrating` to `NotMigrated` unless the pass completed.
struct RevertOnDrop<'a> {
    cell: &'a MigrationCell,
    completed: bool,
}

impl Drop for RevertOnDrop<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.cell.set(MigrationState::NotMigrated);
        }
    }
}

/// Drives migrations for all guilds.
pub struct MigrationManager {
    store: Arc<FactStore>,
    index: Arc<VectorIndex>,
    registry: Arc<GuildRegistry>,
}

impl MigrationManager {
    pub fn new(store: Arc<FactStore>, index: Arc<VectorIndex>, registry: Arc<GuildRegistry>) -> Self {
        Self {
            store,
            index,
            registry,
        }
    }

    /// Current in-process state for the guild.
    pub fn state(&self, guild_id: &GuildId) -> MigrationState {
        self.registry.context(guild_id).migration.state()
    }

    /// Make sure the guild's facts are in the vector index.
    ///
    /// No-op when already migrated. Otherwise at most one pass runs per guild
    /// at a time; callers that arrive during a pass wait for it and return its
    /// result without starting another.
    pub async fn ensure_migrated(&self, guild_id: &GuildId) -> Result<(), LorebookError> {
        let ctx = self.registry.context(guild_id);
        let cell = &ctx.migration;
        if cell.state() == MigrationState::Migrated {
            return Ok(());
        }

        let _gate = cell.gate.lock().await;
        if cell.state() == MigrationState::Migrated {
            return Ok(());
        }

        match self.marker_in_step(guild_id).await {
            Ok(true) => {
                debug!(guild_id = %guild_id, "migration marker found, skipping pass");
                cell.set(MigrationState::Migrated);
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => return Err(self.failed(guild_id, e)),
        }

        cell.set(MigrationState::Migrating);
        let mut guard = RevertOnDrop {
            cell,
            completed: false,
        };

        match self.run_pass(guild_id).await {
            Ok(count) => {
                guard.completed = true;
                cell.set(MigrationState::Migrated);
                metrics::record_migration("success");
                info!(guild_id = %guild_id, count, "guild migrated to vector index");
                Ok(())
            }
            Err(e) => Err(self.failed(guild_id, e)),
        }
    }

    /// Index any of `facts` that have no row yet. Returns how many were added.
    ///
    /// Covers facts committed after the guild migrated whose background
    /// upsert failed, was cancelled, or never ran.
    pub async fn index_missing(&self, guild_id: &GuildId, facts: &[Fact]) -> Result<usize, LorebookError> {
        let indexed = self.index.indexed_ids(guild_id).await?;
        let mut added = 0;
        for fact in facts.iter().filter(|f| !indexed.contains(&f.id)) {
            self.index.upsert(fact).await?;
            added += 1;
        }
        if added > 0 {
            info!(guild_id = %guild_id, count = added, "indexed facts missing from vector index");
        }
        Ok(added)
    }

    /// A persisted marker only counts when the index still holds one row per fact.
    async fn marker_in_step(&self, guild_id: &GuildId) -> Result<bool, LorebookError> {
        if !self.index.is_migrated(guild_id).await? {
            return Ok(false);
        }
        let stored = self.store.list(guild_id).await?.len();
        let indexed = self.index.count(guild_id).await?;
        if stored != indexed {
            info!(guild_id = %guild_id, stored, indexed, "vector index out of step with store, migrating again");
            return Ok(false);
        }
        Ok(true)
    }

    async fn run_pass(&self, guild_id: &GuildId) -> Result<usize, LorebookError> {
        let facts = self.store.list(guild_id).await?;
        let mut live = HashSet::with_capacity(facts.len());
        for fact in &facts {
            self.index.upsert(fact).await?;
            live.insert(fact.id.clone());
        }
        let pruned = self.index.retain(guild_id, live).await?;
        if pruned > 0 {
            debug!(guild_id = %guild_id, count = pruned, "pruned orphaned index rows");
        }
        self.index.mark_migrated(guild_id, facts.len()).await?;
        Ok(facts.len())
    }

    fn failed(&self, guild_id: &GuildId, e: LorebookError) -> LorebookError {
        metrics::record_migration("failure");
        warn!(guild_id = %guild_id, error = %e, "vector migration failed");
        LorebookError::Migration {
            guild_id: guild_id.as_str().to_string(),
            source: Box::new(e),
        }
    }
}
