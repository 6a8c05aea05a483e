//! Persistence collaborators consumed by the index
//!
//! Entries, vectors and tag associations live in external stores that encrypt
//! at rest. The index only sees them through the async traits below; the
//! [`memory`] module provides a reference implementation for tests and the CLI.

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Owner of a set of entries
pub type UserId = i64;

/// Entry identifier, monotonically increasing with creation time
pub type EntryId = i64;

/// Identifier of one embedded chunk, derived from (entry_id, chunk_index)
pub type VectorId = u64;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store backend failure: {0}")]
    Backend(String),

    #[error("Malformed record: {0}")]
    Malformed(String),
}

/// A user's private entry as returned (decrypted) by the entry store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entry {
    pub id: EntryId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// One persisted embedding for a chunk of an entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub vector_id: VectorId,
    pub parent_entry_id: EntryId,
    pub chunk_index: u32,
    pub dimension: usize,
    pub embedding: Vec<f32>,
    pub owner_user_id: UserId,
}

impl VectorRecord {
    pub fn new(
        owner_user_id: UserId,
        parent_entry_id: EntryId,
        chunk_index: u32,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            vector_id: vector_id(parent_entry_id, chunk_index),
            parent_entry_id,
            chunk_index,
            dimension: embedding.len(),
            embedding,
            owner_user_id,
        }
    }
}

/// Derive the stable vector id for a chunk of an entry.
///
/// Chunking is deterministic, so re-embedding the same entry text yields the
/// same ids and upserts replace rather than duplicate.
pub fn vector_id(entry_id: EntryId, chunk_index: u32) -> VectorId {
    let hash = blake3::hash(format!("{}:{}", entry_id, chunk_index).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Entry known to carry one of the queried tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagHit {
    pub entry_id: EntryId,
    pub tag: String,
}

/// Opaque handle the entry store uses to decrypt content for presentation.
///
/// The index never inspects it; it only forwards it to hydration calls.
#[derive(Clone)]
pub struct DecryptionContext {
    token: Arc<str>,
}

impl DecryptionContext {
    pub fn new(token: impl Into<Arc<str>>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Context for stores that keep plaintext (tests, local tooling)
    pub fn plaintext() -> Self {
        Self::new("plaintext")
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for DecryptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DecryptionContext(..)")
    }
}

/// Encrypted-at-rest entry text, queried by recency cursor
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Most recent entries, newest first
    async fn get_latest_entries(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<Entry>, StoreError>;

    /// Entries with id strictly below `cursor_id`, newest first
    async fn get_entries_older_than(
        &self,
        user_id: UserId,
        cursor_id: EntryId,
        limit: usize,
    ) -> Result<Vec<Entry>, StoreError>;

    /// Hydrate entries for presentation; unknown ids are skipped
    async fn get_entries_by_ids(
        &self,
        user_id: UserId,
        ctx: &DecryptionContext,
        ids: &[EntryId],
    ) -> Result<Vec<Entry>, StoreError>;

    async fn get_user_latest_entry_id(&self, user_id: UserId)
        -> Result<Option<EntryId>, StoreError>;
}

/// Encrypted-at-rest chunk vectors, the durable source of truth for the index
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Most recent vectors ordered by parent entry id descending
    async fn get_latest_vectors(
        &self,
        user_id: UserId,
        limit: usize,
    ) -> Result<Vec<VectorRecord>, StoreError>;

    /// Vectors whose parent entry id is strictly below `cursor_id`, newest first
    async fn get_vectors_older_than(
        &self,
        user_id: UserId,
        cursor_id: EntryId,
        limit: usize,
    ) -> Result<Vec<VectorRecord>, StoreError>;

    /// Upsert by vector id
    async fn store_vectors_batch(&self, records: &[VectorRecord]) -> Result<(), StoreError>;
}

/// Recent entry/tag associations
#[async_trait]
pub trait TagStore: Send + Sync {
    /// Hits for entries carrying any of `tags`, most recent entries first
    async fn recent_entries_for_tags(
        &self,
        user_id: UserId,
        tags: &[String],
        limit: usize,
    ) -> Result<Vec<TagHit>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_id_is_deterministic() {
        assert_eq!(vector_id(42, 0), vector_id(42, 0));
        assert_ne!(vector_id(42, 0), vector_id(42, 1));
        assert_ne!(vector_id(42, 0), vector_id(43, 0));
    }

    #[test]
    fn test_vector_record_dimension() {
        let record = VectorRecord::new(1, 7, 2, vec![0.0; 16]);
        assert_eq!(record.dimension, 16);
        assert_eq!(record.vector_id, vector_id(7, 2));
    }

    #[test]
    fn test_decryption_context_debug_hides_token() {
        let ctx = DecryptionContext::new("secret-key-handle");
        assert_eq!(ctx.token(), "secret-key-handle");
        assert!(!format!("{:?}", ctx).contains("secret"));
    }
}
