// SPDX-FileCopyrightText: 2026 Lorebook Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-guild JSON fact store with atomic writes and an LRU document cache.
//!
//! Each guild lives in `<data_dir>/guild_<id>.json`. Writes go to a temp file
//! in the same directory, are fsynced, then renamed over the target.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use lorebook_core::{GuildId, LorebookError};
use tracing::{debug, warn};

use crate::registry::GuildRegistry;
use crate::types::{Fact, GuildDocument, GuildStats};

const FILE_PREFIX: &str = "guild_";
const FILE_SUFFIX: &str = ".json";

/// Durable, guild-isolated fact storage. No scoring happens here.
pub struct FactStore {
    data_dir: PathBuf,
    registry: Arc<GuildRegistry>,
    cache: Mutex<DocumentCache>,
}

impl FactStore {
    /// Open (and create if needed) the data directory.
    pub async fn open(
        data_dir: impl Into<PathBuf>,
        cache_size: usize,
        registry: Arc<GuildRegistry>,
    ) -> Result<Self, LorebookError> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(LorebookError::storage)?;
        Ok(Self {
            data_dir,
            registry,
            cache: Mutex::new(DocumentCache::new(cache_size)),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Validate and commit one fact.
    pub async fn append(&self, fact: Fact) -> Result<(), LorebookError> {
        let guild_id = fact.guild_id.clone();
        self.commit(&guild_id, move |doc| {
            validate_new_fact(doc, &fact)?;
            doc.facts.push(fact);
            Ok(((), true))
        })
        .await
    }

    /// Every fact of the guild, in insertion order.
    pub async fn list(&self, guild_id: &GuildId) -> Result<Vec<Fact>, LorebookError> {
        Ok(self.load(guild_id).await?.facts)
    }

    pub async fn get(
        &self,
        guild_id: &GuildId,
        fact_id: &str,
    ) -> Result<Option<Fact>, LorebookError> {
        let doc = self.load(guild_id).await?;
        Ok(doc.facts.into_iter().find(|f| f.id == fact_id))
    }

    /// Mark one fact verified. Returns whether the fact exists.
    pub async fn mark_verified(
        &self,
        guild_id: &GuildId,
        fact_id: &str,
    ) -> Result<bool, LorebookError> {
        let fact_id = fact_id.to_string();
        self.commit(guild_id, move |doc| {
            match doc.facts.iter_mut().find(|f| f.id == fact_id) {
                Some(fact) if fact.verified => Ok((true, false)),
                Some(fact) => {
                    fact.verified = true;
                    Ok((true, true))
                }
                None => Ok((false, false)),
            }
        })
        .await
    }

    /// Promote every fact extracted from `message_id`. Returns how many changed.
    pub async fn mark_message_verified(
        &self,
        guild_id: &GuildId,
        message_id: &str,
    ) -> Result<usize, LorebookError> {
        let message_id = message_id.to_string();
        self.commit(guild_id, move |doc| {
            let mut promoted = 0;
            for fact in doc
                .facts
                .iter_mut()
                .filter(|f| f.source.message_id == message_id && !f.verified)
            {
                fact.verified = true;
                promoted += 1;
            }
            if promoted > 0 {
                doc.metadata.total_messages_processed += 1;
            }
            Ok((promoted, promoted > 0))
        })
        .await
    }

    /// Bump the processed-message counter.
    pub async fn record_message_processed(&self, guild_id: &GuildId) -> Result<(), LorebookError> {
        self.commit(guild_id, |doc| {
            doc.metadata.total_messages_processed += 1;
            Ok(((), true))
        })
        .await
    }

    pub async fn stats(&self, guild_id: &GuildId) -> Result<GuildStats, LorebookError> {
        let doc = self.load(guild_id).await?;
        let verified = doc.facts.iter().filter(|f| f.verified).count();
        Ok(GuildStats {
            guild_id: doc.guild_id.clone(),
            total_facts: doc.facts.len(),
            verified,
            unverified: doc.facts.len() - verified,
            total_messages_processed: doc.metadata.total_messages_processed,
            categories: doc.metadata.categories.clone(),
            last_updated: doc.last_updated,
        })
    }

    /// Guilds with a persisted document, sorted by id.
    pub async fn list_guilds(&self) -> Result<Vec<GuildId>, LorebookError> {
        list_guild_files(&self.data_dir).await
    }

    /// Run a read-modify-write cycle under the guild's write lock.
    ///
    /// `mutate` returns its result plus whether the document changed; the
    /// document is only rewritten when it did. On a failed write the cached
    /// copy is discarded so nothing partial is ever observed.
    pub(crate) async fn commit<F, R>(&self, guild_id: &GuildId, mutate: F) -> Result<R, LorebookError>
    where
        F: FnOnce(&mut GuildDocument) -> Result<(R, bool), LorebookError>,
    {
        let path = self.path_for(guild_id)?;
        let ctx = self.registry.context(guild_id);
        let _guard = ctx.write_lock.lock().await;

        let mut doc = self.load_locked(guild_id, path.clone()).await?;
        let (result, changed) = mutate(&mut doc)?;
        if !changed {
            return Ok(result);
        }

        doc.refresh_metadata();
        doc.last_updated = Utc::now();

        self.cache_lock().remove(guild_id);
        let dir = self.data_dir.clone();
        let doc = tokio::task::spawn_blocking(move || {
            write_document(&dir, &path, &doc).map(|()| doc)
        })
        .await
        .map_err(|e| LorebookError::Internal(format!("document writer task failed: {e}")))??;

        debug!(guild_id = %guild_id, facts = doc.facts.len(), "guild document saved");
        self.cache_lock().put(guild_id.clone(), doc);
        Ok(result)
    }

    /// Cached document, or a fresh read on a miss.
    ///
    /// The cache is only filled under the guild's write lock, so a read that
    /// races a commit can never put an older document back after it.
    async fn load(&self, guild_id: &GuildId) -> Result<GuildDocument, LorebookError> {
        let path = self.path_for(guild_id)?;
        if let Some(doc) = self.cache_lock().get(guild_id) {
            return Ok(doc);
        }
        let ctx = self.registry.context(guild_id);
        let _guard = ctx.write_lock.lock().await;
        self.load_locked(guild_id, path).await
    }

    /// Caller must hold the guild's write lock.
    async fn load_locked(&self, guild_id: &GuildId, path: PathBuf) -> Result<GuildDocument, LorebookError> {
        if let Some(doc) = self.cache_lock().get(guild_id) {
            return Ok(doc);
        }

        let owner = guild_id.clone();
        let doc = tokio::task::spawn_blocking(move || read_document(&path, owner))
            .await
            .map_err(|e| LorebookError::Internal(format!("document reader task failed: {e}")))??;

        self.cache_lock().put(guild_id.clone(), doc.clone());
        Ok(doc)
    }

    fn path_for(&self, guild_id: &GuildId) -> Result<PathBuf, LorebookError> {
        if !guild_id.is_path_safe() {
            return Err(LorebookError::InvalidInput(format!(
                "guild id `{guild_id}` is not usable as a file name"
            )));
        }
        Ok(self
            .data_dir
            .join(format!("{FILE_PREFIX}{guild_id}{FILE_SUFFIX}")))
    }

    fn cache_lock(&self) -> std::sync::MutexGuard<'_, DocumentCache> {
        // A poisoned cache only ever holds whole documents, so keep using it.
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Check invariants for a fact about to join `doc`.
pub(crate) fn validate_new_fact(doc: &GuildDocument, fact: &Fact) -> Result<(), LorebookError> {
    if fact.content.trim().is_empty() {
        return Err(LorebookError::InvalidInput("fact content is empty".into()));
    }
    if !(0.0..=1.0).contains(&fact.confidence) {
        return Err(LorebookError::InvalidInput(format!(
            "fact confidence {} is outside [0, 1]",
            fact.confidence
        )));
    }
    if fact.guild_id != doc.guild_id {
        return Err(LorebookError::InvalidInput(format!(
            "fact belongs to guild {} but was written to guild {}",
            fact.guild_id, doc.guild_id
        )));
    }
    if doc.facts.iter().any(|f| f.id == fact.id) {
        return Err(LorebookError::InvalidInput(format!(
            "fact id {} already exists",
            fact.id
        )));
    }
    Ok(())
}

/// Read a guild document. Missing files yield an empty document; unparseable
/// ones are moved to `<file>.backup` first.
fn read_document(path: &Path, guild_id: GuildId) -> Result<GuildDocument, LorebookError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(GuildDocument::empty(guild_id));
        }
        Err(e) => return Err(LorebookError::storage(e)),
    };

    match serde_json::from_str::<GuildDocument>(&raw) {
        Ok(mut doc) => {
            for fact in &mut doc.facts {
                if fact.guild_id.as_str().is_empty() {
                    fact.guild_id = guild_id.clone();
                }
            }
            doc.guild_id = guild_id;
            Ok(doc)
        }
        Err(e) => {
            let mut backup = path.as_os_str().to_owned();
            backup.push(".backup");
            let backup = PathBuf::from(backup);
            warn!(
                guild_id = %guild_id,
                error = %e,
                backup = %backup.display(),
                "corrupted guild document, moving aside and starting empty"
            );
            std::fs::rename(path, &backup).map_err(LorebookError::storage)?;
            Ok(GuildDocument::empty(guild_id))
        }
    }
}

fn write_document(dir: &Path, path: &Path, doc: &GuildDocument) -> Result<(), LorebookError> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(LorebookError::storage)?;
    serde_json::to_writer_pretty(&mut tmp, doc)
        .map_err(|e| LorebookError::Internal(format!("failed to serialize guild document: {e}")))?;
    tmp.flush().map_err(LorebookError::storage)?;
    tmp.as_file().sync_all().map_err(LorebookError::storage)?;
    tmp.persist(path).map_err(|e| LorebookError::storage(e.error))?;
    Ok(())
}

/// Enumerate `guild_<id>.json` files in `data_dir`.
pub async fn list_guild_files(data_dir: &Path) -> Result<Vec<GuildId>, LorebookError> {
    let mut entries = match tokio::fs::read_dir(data_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(LorebookError::storage(e)),
    };

    let mut guilds = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(LorebookError::storage)? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(id) = name
            .strip_prefix(FILE_PREFIX)
            .and_then(|rest| rest.strip_suffix(FILE_SUFFIX))
        {
            let id = GuildId::from(id);
            if id.is_path_safe() {
                guilds.push(id);
            }
        }
    }
    guilds.sort();
    Ok(guilds)
}

/// Read a guild document without going through a store. Never writes.
pub async fn read_guild_file(
    data_dir: &Path,
    guild_id: &GuildId,
) -> Result<GuildDocument, LorebookError> {
    if !guild_id.is_path_safe() {
        return Err(LorebookError::InvalidInput(format!(
            "guild id `{guild_id}` is not usable as a file name"
        )));
    }
    let path = data_dir.join(format!("{FILE_PREFIX}{guild_id}{FILE_SUFFIX}"));
    let raw = tokio::fs::read_to_string(&path)
        .await
        .map_err(LorebookError::storage)?;
    serde_json::from_str(&raw).map_err(|e| {
        LorebookError::Internal(format!("{} is not a valid guild document: {e}", path.display()))
    })
}

/// Small LRU of guild documents.
struct DocumentCache {
    capacity: usize,
    entries: HashMap<GuildId, GuildDocument>,
    order: VecDeque<GuildId>,
}

impl DocumentCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&mut self, id: &GuildId) -> Option<GuildDocument> {
        let doc = self.entries.get(id)?.clone();
        self.touch(id);
        Some(doc)
    }

    fn put(&mut self, id: GuildId, doc: GuildDocument) {
        self.entries.insert(id.clone(), doc);
        self.touch(&id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    fn remove(&mut self, id: &GuildId) {
        self.entries.remove(id);
        self.order.retain(|g| g != id);
    }

    fn touch(&mut self, id: &GuildId) {
        self.order.retain(|g| g != id);
        self.order.push_back(id.clone());
    }

    #[cfg(test)]
    fn cached_ids(&self) -> std::collections::HashSet<GuildId> {
        self.entries.keys().cloned().collect()
    }
}
