//! Service container wiring the index store and retrieval pipeline

use crate::config::{Config, ConfigValidator};
use crate::embedding::{BatchEmbedder, BatchItem, EmbeddingProvider};
use crate::error::Result;
use crate::events::{EventSink, TracingEventSink};
use crate::index::{BulkIndexReport, IndexStore, MaintenanceReport};
use crate::retrieval::{RetrievalPipeline, SearchHit, SearchQuery};
use crate::store::{DecryptionContext, EntryId, EntryStore, MemoryStore, TagStore, UserId, VectorStore};
use std::sync::Arc;

/// External services the index depends on
#[derive(Clone)]
pub struct Collaborators {
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub entries: Arc<dyn EntryStore>,
    pub vectors: Arc<dyn VectorStore>,
    pub tags: Arc<dyn TagStore>,
    pub events: Arc<dyn EventSink>,
}

impl Collaborators {
    /// Every store backed by one in-memory store, events logged via tracing
    pub fn in_memory(store: Arc<MemoryStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            entries: store.clone(),
            vectors: store.clone(),
            tags: store,
            events: Arc::new(TracingEventSink),
        }
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }
}

/// Per-user semantic index with progressive retrieval
pub struct SemanticIndex {
    store: Arc<IndexStore>,
    pipeline: RetrievalPipeline,
}

impl SemanticIndex {
    pub fn new(config: &Config, collaborators: Collaborators) -> Result<Self> {
        ConfigValidator::validate(config)?;

        let embedder = Arc::new(BatchEmbedder::new(
            collaborators.embedder,
            config.chunking.clone(),
            config.embedding.batch_size,
        ));
        let store = IndexStore::new(
            config,
            Arc::clone(&embedder),
            Arc::clone(&collaborators.entries),
            collaborators.vectors,
            collaborators.events,
        )?;
        let pipeline = RetrievalPipeline::new(
            config,
            Arc::clone(&store),
            embedder,
            collaborators.entries,
            collaborators.tags,
        )?;

        Ok(Self { store, pipeline })
    }

    /// Up to `k2` entries most relevant to `query`, best first
    pub async fn search(
        &self,
        user_id: UserId,
        ctx: &DecryptionContext,
        query: &str,
        k1: usize,
        k2: usize,
    ) -> Result<Vec<SearchHit>> {
        let query = SearchQuery::new(user_id, query, k2).with_breadth(k1);
        self.pipeline.search(&query, ctx).await
    }

    /// Index a newly written entry; returns the number of vectors persisted
    pub async fn append(&self, user_id: UserId, entry_id: EntryId, text: &str) -> Result<usize> {
        self.store.index_entry(user_id, entry_id, text).await
    }

    pub async fn append_many(&self, items: &[BatchItem]) -> Result<BulkIndexReport> {
        self.store.bulk_index(items).await
    }

    /// Drop entries from the user's live index
    pub async fn remove(&self, user_id: UserId, entry_ids: &[EntryId]) -> usize {
        self.store.remove_entries(user_id, entry_ids).await
    }

    /// Rate-limited eviction pass; `None` when called too soon
    pub fn maintenance_tick(&self) -> Option<MaintenanceReport> {
        self.store.maintenance()
    }

    pub fn index_store(&self) -> &Arc<IndexStore> {
        &self.store
    }
}
