//! In-memory entry/vector/tag store
//!
//! Keeps everything in plaintext behind a `parking_lot` lock. Used by the
//! test-suite and the CLI; real deployments plug in their encrypted stores.

use super::{
    DecryptionContext, Entry, EntryId, EntryStore, StoreError, TagHit, TagStore, UserId,
    VectorRecord, VectorStore,
};
use ahash::AHashMap;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
struct UserData {
    entries: BTreeMap<EntryId, Entry>,
    /// Keyed by (parent entry id, chunk index)
    vectors: BTreeMap<(EntryId, u32), VectorRecord>,
}

/// Store implementing [`EntryStore`], [`VectorStore`] and [`TagStore`]
#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<AHashMap<UserId, UserData>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entry
    pub fn insert_entry(&self, entry: Entry) {
        let mut users = self.users.write();
        users
            .entry(entry.user_id)
            .or_default()
            .entries
            .insert(entry.id, entry);
    }

    /// Delete an entry together with its vectors
    pub fn delete_entry(&self, user_id: UserId, entry_id: EntryId) {
        let mut users = self.users.write();
        if let Some(data) = users.get_mut(&user_id) {
            data.entries.remove(&entry_id);
            data.vectors.retain(|(parent, _), _| *parent != entry_id);
        }
    }

    pub fn entry_count(&self, user_id: UserId) -> usize {
        self.users
            .read()
            .get(&user_id)
            .map(|data| data.entries.len())
            .unwrap_or(0)
    }

    pub fn vector_count(&self, user_id: UserId) -> usize {
        self.users
            .read()
            .get(&user_id)
            .map(|data| data.vectors.len())
            .unwrap_or(0)
    }

    /// Simulate an outage: every call fails with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }

    fn newest_entries<F>(&self, user_id: UserId, limit: usize, keep: F) -> Vec<Entry>
    where
        F: Fn(EntryId) -> bool,
    {
        self.users
            .read()
            .get(&user_id)
            .map(|data| {
                data.entries
                    .iter()
                    .rev()
                    .filter(|(id, _)| keep(**id))
                    .take(limit)
                    .map(|(_, entry)| entry.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn newest_vectors<F>(&self, user_id: UserId, limit: usize, keep: F) -> Vec<VectorRecord>
    where
        F: Fn(EntryId) -> bool,
    {
        let users = self.users.read();
        let Some(data) = users.get(&user_id) else {
            return Vec::new();
        };

        // Entries newest first, chunks of one entry in chunk order
        let mut out = Vec::new();
        let mut current: Option<EntryId> = None;
        let mut group: Vec<VectorRecord> = Vec::new();
        for ((entry_id, _), record) in data.vectors.iter().rev() {
            if !keep(*entry_id) {
                continue;
            }
            if current != Some(*entry_id) {
                group.reverse();
                out.append(&mut group);
                current = Some(*entry_id);
            }
            group.push(record.clone());
        }
        group.reverse();
        out.append(&mut group);
        out.truncate(limit);
        out
    }
}

#[async_trait]
impl EntryStore for MemoryStore {
    async fn get_latest_entries(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Entry>, StoreError> {
        self.check_available()?;
        Ok(self.newest_entries(user_id, limit, |_| true))
    }

    async fn get_entries_older_than(
        &self,
        user_id: UserId,
        cursor_id: EntryId,
        limit: usize,
    ) -> Result<Vec<Entry>, StoreError> {
        self.check_available()?;
        Ok(self.newest_entries(user_id, limit, |id| id < cursor_id))
    }

    async fn get_entries_by_ids(
        &self,
        user_id: UserId,
        _ctx: &DecryptionContext,
        ids: &[EntryId],
    ) -> Result<Vec<Entry>, StoreError> {
        self.check_available()?;
        let users = self.users.read();
        let Some(data) = users.get(&user_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| data.entries.get(id).cloned())
            .collect())
    }

    async fn get_user_latest_entry_id(
        &self,
        user_id: UserId,
    ) -> Result<Option<EntryId>, StoreError> {
        self.check_available()?;
        Ok(self
            .users
            .read()
            .get(&user_id)
            .and_then(|data| data.entries.keys().next_back().copied()))
    }
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn get_latest_vectors(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<VectorRecord>, StoreError> {
        self.check_available()?;
        Ok(self.newest_vectors(user_id, limit, |_| true))
    }

    async fn get_vectors_older_than(
        &self,
        user_id: UserId,
        cursor_id: EntryId,
        limit: usize,
    ) -> Result<Vec<VectorRecord>, StoreError> {
        self.check_available()?;
        Ok(self.newest_vectors(user_id, limit, |id| id < cursor_id))
    }

    async fn store_vectors_batch(&self, records: &[VectorRecord]) -> Result<(), StoreError> {
        self.check_available()?;
        let mut users = self.users.write();
        for record in records {
            users
                .entry(record.owner_user_id)
                .or_default()
                .vectors
                .insert((record.parent_entry_id, record.chunk_index), record.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl TagStore for MemoryStore {
    async fn recent_entries_for_tags(
        &self,
        user_id: UserId,
        tags: &[String],
        limit: usize,
    ) -> Result<Vec<TagHit>, StoreError> {
        self.check_available()?;
        let users = self.users.read();
        let Some(data) = users.get(&user_id) else {
            return Ok(Vec::new());
        };

        let mut hits = Vec::new();
        for entry in data.entries.values().rev() {
            for tag in &entry.tags {
                let tag = tag.trim_start_matches('#').to_lowercase();
                if tags.iter().any(|wanted| *wanted == tag) {
                    hits.push(TagHit {
                        entry_id: entry.id,
                        tag,
                    });
                }
            }
            if hits.len() >= limit {
                break;
            }
        }
        hits.truncate(limit);
        Ok(hits)
    }
}
