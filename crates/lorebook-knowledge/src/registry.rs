// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-guild runtime state, created on first use.

use std::sync::Arc;

use dashmap::DashMap;
use lorebook_core::GuildId;
use tokio::sync::Mutex;

use crate::migration::MigrationCell;

/// Runtime state for one guild.
///
/// The write lock serializes read-modify-write cycles on the guild document.
/// Different guilds never share a lock.
#[derive(Debug, Default)]
pub struct GuildContext {
    pub(crate) write_lock: Mutex<()>,
    pub(crate) migration: MigrationCell,
}

/// Table of guild contexts. Passed explicitly to the components that need it.
#[derive(Debug, Default)]
pub struct GuildRegistry {
    contexts: DashMap<GuildId, Arc<GuildContext>>,
}

impl GuildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the guild's context, creating it on first use.
    pub fn context(&self, guild_id: &GuildId) -> Arc<GuildContext> {
        if let Some(ctx) = self.contexts.get(guild_id) {
            return Arc::clone(ctx.value());
        }
        Arc::clone(
            self.contexts
                .entry(guild_id.clone())
                .or_insert_with(|| Arc::new(GuildContext::default()))
                .value(),
        )
    }

    /// Number of guilds seen by this process.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }
}
