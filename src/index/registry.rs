/// Process-wide registry of per-user graph indexes
use super::graph::{GraphIndex, GraphParams, Neighbor};
use crate::config::{Config, IndexConfig, RegistrySettings};
use crate::embedding::{BatchEmbedder, BatchItem, FailedItem};
use crate::error::{Result, SemdexError};
use crate::events::{BudgetPressure, EventSink, BUDGET_PRESSURE};
use crate::store::{Entry, EntryId, EntryStore, UserId, VectorRecord, VectorStore};
use ahash::AHashMap;
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Entries fetched per page when walking entries in the backfill
const MIN_ENTRY_PAGE: usize = 64;

/// How far back a user's index has been filled from the stores
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillCursor {
    /// Oldest parent entry whose persisted vectors are loaded
    pub vector_cursor: Option<EntryId>,
    pub vectors_exhausted: bool,
    /// Oldest entry considered for on-demand embedding
    pub entry_cursor: Option<EntryId>,
    pub entries_exhausted: bool,
}

impl BackfillCursor {
    /// Cursors only ever move toward older entries
    fn advance_vectors(&mut self, oldest: EntryId) {
        self.vector_cursor = Some(self.vector_cursor.map_or(oldest, |c| c.min(oldest)));
    }

    fn advance_entries(&mut self, oldest: EntryId) {
        self.entry_cursor = Some(self.entry_cursor.map_or(oldest, |c| c.min(oldest)));
    }
}

/// One user's resident index
pub struct UserIndex {
    user_id: UserId,
    graph: RwLock<GraphIndex>,
    /// Serializes every mutation of this user's index and cursor
    backfill: AsyncMutex<BackfillCursor>,
    loaded: OnceCell<()>,
    last_used: Mutex<Instant>,
}

impl UserIndex {
    fn new(user_id: UserId, graph: GraphIndex) -> Self {
        Self {
            user_id,
            graph: RwLock::new(graph),
            backfill: AsyncMutex::new(BackfillCursor::default()),
            loaded: OnceCell::new(),
            last_used: Mutex::new(Instant::now()),
        }
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.graph.read().search(query, k)
    }

    /// Live vectors
    pub fn len(&self) -> usize {
        self.graph.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry_count(&self) -> usize {
        self.graph.read().entry_count()
    }

    pub fn contains_entry(&self, entry_id: EntryId) -> bool {
        self.graph.read().contains_entry(entry_id)
    }

    pub fn estimated_bytes(&self) -> usize {
        self.graph.read().estimated_bytes()
    }

    /// Read access to the underlying graph
    pub fn graph(&self) -> RwLockReadGuard<'_, GraphIndex> {
        self.graph.read()
    }

    /// Snapshot of the backfill cursor
    pub async fn cursor(&self) -> BackfillCursor {
        self.backfill.lock().await.clone()
    }

    pub fn last_used(&self) -> Instant {
        *self.last_used.lock()
    }

    fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }
}

/// Outcome of [`IndexStore::bulk_index`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkIndexReport {
    pub indexed_entries: usize,
    pub indexed_vectors: usize,
    pub failed: Vec<FailedEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedEntry {
    pub user_id: UserId,
    pub entry_id: EntryId,
    pub reason: String,
}

impl From<FailedItem> for FailedEntry {
    fn from(item: FailedItem) -> Self {
        Self {
            user_id: item.user_id,
            entry_id: item.entry_id,
            reason: item.reason,
        }
    }
}

/// Outcome of a maintenance pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub idle_evicted: Vec<UserId>,
    pub budget_evicted: Vec<UserId>,
    pub active_count: usize,
    pub total_bytes: u64,
}

/// Registry of per-user indexes backed by the entry and vector stores.
///
/// Indexes are created lazily on first use, warmed from persisted vectors,
/// extended backwards on demand, and evicted when idle or over the memory
/// budget. Eviction only drops memory: everything is rebuilt from the stores.
pub struct IndexStore {
    settings: RegistrySettings,
    params: GraphParams,
    dimension: usize,
    embed_batch: usize,
    embedder: Arc<BatchEmbedder>,
    entries: Arc<dyn EntryStore>,
    vectors: Arc<dyn VectorStore>,
    events: Arc<dyn EventSink>,
    users: Mutex<AHashMap<UserId, Arc<UserIndex>>>,
    warmups: Mutex<AHashMap<UserId, JoinHandle<()>>>,
    last_maintenance: Mutex<Option<Instant>>,
}

impl IndexStore {
    pub fn new(
        config: &Config,
        embedder: Arc<BatchEmbedder>,
        entries: Arc<dyn EntryStore>,
        vectors: Arc<dyn VectorStore>,
        events: Arc<dyn EventSink>,
    ) -> Result<Arc<Self>> {
        let settings = RegistrySettings::resolve(&config.registry)?;
        let dimension = embedder.dimension();
        if dimension != config.embedding.dimension {
            return Err(SemdexError::DimensionMismatch {
                expected: config.embedding.dimension,
                actual: dimension,
            });
        }

        Ok(Arc::new(Self {
            params: graph_params(&config.index, &settings),
            settings,
            dimension,
            embed_batch: config.embedding.batch_size.max(1),
            embedder,
            entries,
            vectors,
            events,
            users: Mutex::new(AHashMap::new()),
            warmups: Mutex::new(AHashMap::new()),
            last_maintenance: Mutex::new(None),
        }))
    }

    /// Resident index for the user, creating and loading it if needed.
    ///
    /// Loading pulls the latest persisted vectors; embedding of entries that
    /// have no vectors yet continues in a background warm-up task.
    pub async fn ensure_index(self: &Arc<Self>, user_id: UserId) -> Result<Arc<UserIndex>> {
        let index = {
            let mut users = self.users.lock();
            match users.get(&user_id) {
                Some(index) => {
                    index.touch();
                    Arc::clone(index)
                }
                None => {
                    let graph = GraphIndex::new(self.dimension, self.params.clone());
                    let index = Arc::new(UserIndex::new(user_id, graph));
                    users.insert(user_id, Arc::clone(&index));
                    debug!(user_id, "Created user index");
                    index
                }
            }
        };

        index
            .loaded
            .get_or_try_init(|| self.load_persisted(&index))
            .await?;

        Ok(index)
    }

    /// Resident index without creating or loading one
    pub fn resident(&self, user_id: UserId) -> Option<Arc<UserIndex>> {
        let users = self.users.lock();
        let index = users.get(&user_id)?;
        index.touch();
        Some(Arc::clone(index))
    }

    pub fn active_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.users.lock().keys().copied().collect();
        users.sort_unstable();
        users
    }

    pub fn total_estimated_bytes(&self) -> u64 {
        self.users
            .lock()
            .values()
            .map(|index| index.estimated_bytes() as u64)
            .sum()
    }

    /// Backfill cursor of a resident index
    pub async fn cursor(&self, user_id: UserId) -> Option<BackfillCursor> {
        let index = self.users.lock().get(&user_id).cloned()?;
        Some(index.cursor().await)
    }

    /// Wait for the user's warm-up task, if one is running
    pub async fn await_warmup(&self, user_id: UserId) -> Result<()> {
        let handle = self.warmups.lock().remove(&user_id);
        let Some(handle) = handle else {
            return Ok(());
        };

        match handle.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(SemdexError::Other(anyhow::anyhow!(
                "Warm-up task for user {} failed: {}",
                user_id,
                e
            ))),
        }
    }

    /// Add up to `batch_size` older vectors to the user's index.
    ///
    /// Persisted vectors older than the vector cursor come first; once those
    /// run out, entries without vectors are embedded, persisted and added.
    /// Returns the number of vectors added, 0 when nothing older remains.
    pub async fn expand_older(self: &Arc<Self>, user_id: UserId, batch_size: usize) -> Result<usize> {
        let index = self.ensure_index(user_id).await?;
        let mut cursor = index.backfill.lock().await;
        let batch_size = batch_size.max(1);
        let mut added = 0;

        while added < batch_size && !cursor.vectors_exhausted {
            let Some(vector_cursor) = cursor.vector_cursor else {
                cursor.vectors_exhausted = true;
                break;
            };
            let limit = batch_size - added;
            let page = self
                .vectors
                .get_vectors_older_than(user_id, vector_cursor, limit)
                .await?;
            if page.is_empty() {
                cursor.vectors_exhausted = true;
                break;
            }

            let full = page.len() >= limit;
            let (records, oldest) = self.whole_entries(user_id, page, full).await?;
            added += index.graph.write().add_batch(&records)?;
            if let Some(oldest) = oldest {
                cursor.advance_vectors(oldest);
            }
            if !full {
                cursor.vectors_exhausted = true;
            }
        }

        let page_size = batch_size.max(MIN_ENTRY_PAGE);
        while added < batch_size && !cursor.entries_exhausted {
            let page = match cursor.entry_cursor {
                Some(entry_cursor) => {
                    self.entries
                        .get_entries_older_than(user_id, entry_cursor, page_size)
                        .await?
                }
                None => self.entries.get_latest_entries(user_id, page_size).await?,
            };
            let Some(last) = page.last().map(|e| e.id) else {
                cursor.entries_exhausted = true;
                break;
            };

            let remaining = batch_size - added;
            let mut considered = None;
            let todo: Vec<BatchItem> = {
                let graph = index.graph.read();
                let mut todo = Vec::new();
                for entry in &page {
                    if todo.len() >= remaining {
                        break;
                    }
                    considered = Some(entry.id);
                    if !graph.contains_entry(entry.id) {
                        todo.push(batch_item(entry));
                    }
                }
                todo
            };

            if !todo.is_empty() {
                let records = self.embed_and_persist(&todo).await?;
                added += index.graph.write().add_batch(&records)?;
            }

            if let Some(oldest) = considered {
                cursor.advance_entries(oldest);
            }
            if page.len() < page_size && considered == Some(last) {
                cursor.entries_exhausted = true;
            }
        }

        debug!(user_id, added, "Expanded user index");
        Ok(added)
    }

    /// Embed and persist one entry, adding it to the index if resident.
    ///
    /// Returns the number of vectors persisted. Any embedding or store
    /// failure is returned to the caller.
    pub async fn index_entry(&self, user_id: UserId, entry_id: EntryId, text: &str) -> Result<usize> {
        let item = BatchItem {
            user_id,
            entry_id,
            text: text.to_string(),
        };

        let records = match self.embedder.embed_items(&[item]).await.into_strict() {
            Ok(records) => records,
            Err(e) => {
                error!(user_id, entry_id, error = %e, "Failed to index entry");
                return Err(e.into());
            }
        };
        if let Err(e) = self.vectors.store_vectors_batch(&records).await {
            error!(user_id, entry_id, error = %e, "Failed to persist entry vectors");
            return Err(e.into());
        }

        if let Some(index) = self.resident(user_id) {
            let _cursor = index.backfill.lock().await;
            index.graph.write().add_batch(&records)?;
        }

        Ok(records.len())
    }

    /// Index many entries, grouped by user.
    ///
    /// Per-entry failures are collected in the report instead of aborting
    /// the whole batch. A dimension mismatch is still fatal.
    pub async fn bulk_index(&self, items: &[BatchItem]) -> Result<BulkIndexReport> {
        let mut by_user: BTreeMap<UserId, Vec<BatchItem>> = BTreeMap::new();
        for item in items {
            by_user.entry(item.user_id).or_default().push(item.clone());
        }

        let mut report = BulkIndexReport::default();
        for (user_id, user_items) in by_user {
            let result = self.embedder.embed_items(&user_items).await;
            let failed_count = result.failed.len();
            report
                .failed
                .extend(result.failed.into_iter().map(FailedEntry::from));
            let records = result.records;

            if let Err(e) = self.vectors.store_vectors_batch(&records).await {
                let reason = e.to_string();
                for item in &user_items {
                    error!(user_id, entry_id = item.entry_id, error = %reason, "Failed to persist entry vectors");
                }
                let failed: std::collections::BTreeSet<EntryId> =
                    records.iter().map(|r| r.parent_entry_id).collect();
                report
                    .failed
                    .extend(failed.into_iter().map(|entry_id| FailedEntry {
                        user_id,
                        entry_id,
                        reason: reason.clone(),
                    }));
                continue;
            }

            if let Some(index) = self.resident(user_id) {
                let _cursor = index.backfill.lock().await;
                index.graph.write().add_batch(&records)?;
            }

            report.indexed_entries += user_items.len() - failed_count;
            report.indexed_vectors += records.len();
        }

        info!(
            entries = report.indexed_entries,
            vectors = report.indexed_vectors,
            failed = report.failed.len(),
            "Bulk index complete"
        );
        Ok(report)
    }

    /// Drop entries from a resident index; persisted vectors are untouched
    pub async fn remove_entries(&self, user_id: UserId, entry_ids: &[EntryId]) -> usize {
        let Some(index) = self.resident(user_id) else {
            return 0;
        };
        let _cursor = index.backfill.lock().await;
        let removed = index.graph.write().remove_entries(entry_ids);
        removed
    }

    /// Evict idle and over-budget indexes, at most once per maintenance interval
    pub fn maintenance(&self) -> Option<MaintenanceReport> {
        let now = Instant::now();
        {
            let mut last = self.last_maintenance.lock();
            if let Some(previous) = *last {
                if now.saturating_duration_since(previous) < self.settings.maintenance_interval {
                    return None;
                }
            }
            *last = Some(now);
        }
        Some(self.run_maintenance(now))
    }

    /// Run a maintenance pass regardless of the rate limit
    pub fn force_maintenance(&self) -> MaintenanceReport {
        let now = Instant::now();
        *self.last_maintenance.lock() = Some(now);
        self.run_maintenance(now)
    }

    fn run_maintenance(&self, now: Instant) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();
        let budget = self.settings.memory_budget_bytes;
        let mut pressure = None;

        {
            let mut users = self.users.lock();

            let mut idle: Vec<UserId> = users
                .iter()
                .filter(|(_, index)| {
                    now.saturating_duration_since(index.last_used()) > self.settings.idle_ttl
                })
                .map(|(user_id, _)| *user_id)
                .collect();
            idle.sort_unstable();
            for user_id in &idle {
                users.remove(user_id);
            }
            report.idle_evicted = idle;

            let mut usage: Vec<(Instant, UserId, u64)> = users
                .iter()
                .map(|(user_id, index)| {
                    (index.last_used(), *user_id, index.estimated_bytes() as u64)
                })
                .collect();
            let mut total: u64 = usage.iter().map(|(_, _, bytes)| bytes).sum();

            if total > budget {
                let before = total;
                usage.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
                for (_, user_id, bytes) in usage {
                    if total <= budget {
                        break;
                    }
                    users.remove(&user_id);
                    total -= bytes;
                    report.budget_evicted.push(user_id);
                }
                pressure = Some(BudgetPressure {
                    budget_bytes: budget,
                    total_bytes: before,
                    pressure_ratio: before as f64 / budget.max(1) as f64,
                    evicted_count: report.budget_evicted.len(),
                    active_count: users.len(),
                });
            }

            report.active_count = users.len();
            report.total_bytes = total;
        }

        {
            let mut warmups = self.warmups.lock();
            for user_id in report.idle_evicted.iter().chain(&report.budget_evicted) {
                if let Some(handle) = warmups.remove(user_id) {
                    handle.abort();
                }
            }
            warmups.retain(|_, handle| !handle.is_finished());
        }

        if let Some(pressure) = pressure {
            warn!(
                budget_bytes = pressure.budget_bytes,
                total_bytes = pressure.total_bytes,
                evicted = pressure.evicted_count,
                "Memory budget exceeded, evicted least recently used indexes"
            );
            self.events.emit(BUDGET_PRESSURE, pressure.to_payload());
        }

        if !report.idle_evicted.is_empty() || !report.budget_evicted.is_empty() {
            info!(
                idle = report.idle_evicted.len(),
                budget = report.budget_evicted.len(),
                active = report.active_count,
                "Evicted user indexes"
            );
        }

        report
    }

    async fn load_persisted(self: &Arc<Self>, index: &Arc<UserIndex>) -> Result<()> {
        let user_id = index.user_id;
        let mut cursor = index.backfill.lock().await;

        let limit = self.settings.warm_limit.max(1);
        let page = self.vectors.get_latest_vectors(user_id, limit).await?;
        let full = page.len() >= limit;
        let (records, oldest) = self.whole_entries(user_id, page, full).await?;
        let newest = records.iter().map(|r| r.parent_entry_id).max();

        let added = index.graph.write().add_batch(&records)?;
        if let Some(oldest) = oldest {
            cursor.advance_vectors(oldest);
        }
        if !full {
            cursor.vectors_exhausted = true;
        }
        drop(cursor);

        info!(user_id, vectors = added, "Loaded persisted vectors");
        self.schedule_warmup(index, newest);
        Ok(())
    }

    /// Start the background warm-up unless one is already running
    fn schedule_warmup(self: &Arc<Self>, index: &Arc<UserIndex>, newest_vector: Option<EntryId>) {
        let user_id = index.user_id;
        let mut warmups = self.warmups.lock();
        if let Some(handle) = warmups.get(&user_id) {
            if !handle.is_finished() {
                debug!(user_id, "Warm-up already running");
                return;
            }
        }

        let store = Arc::clone(self);
        let index = Arc::clone(index);
        let handle = tokio::spawn(async move {
            if let Err(e) = store.run_warmup(&index, newest_vector).await {
                warn!(user_id, error = %e, "Warm-up failed");
            }
        });
        warmups.insert(user_id, handle);
    }

    /// Embed recent entries that have no persisted vectors.
    ///
    /// With vectors present, only entries newer than the newest vector are
    /// embedded. Without any, the latest `warm_limit` entries are.
    async fn run_warmup(&self, index: &UserIndex, newest_vector: Option<EntryId>) -> Result<()> {
        let user_id = index.user_id;
        if let Some(newest) = newest_vector {
            let latest_id = self.entries.get_user_latest_entry_id(user_id).await?;
            if latest_id.map_or(true, |id| id <= newest) {
                debug!(user_id, "Persisted vectors are current");
                return Ok(());
            }
        }

        let latest = self
            .entries
            .get_latest_entries(user_id, self.settings.warm_limit.max(1))
            .await?;

        let pending: Vec<Entry> = match newest_vector {
            Some(newest) => latest.into_iter().filter(|e| e.id > newest).collect(),
            None => latest,
        };
        if pending.is_empty() {
            return Ok(());
        }

        info!(user_id, entries = pending.len(), "Warming user index");
        let mut embedded = 0;
        for batch in pending.chunks(self.embed_batch) {
            let mut cursor = index.backfill.lock().await;

            // Backfill may have covered some of these while we waited
            let todo: Vec<BatchItem> = {
                let graph = index.graph.read();
                batch
                    .iter()
                    .filter(|e| !graph.contains_entry(e.id))
                    .map(batch_item)
                    .collect()
            };

            if !todo.is_empty() {
                let records = self.embed_and_persist(&todo).await?;
                embedded += index.graph.write().add_batch(&records)?;
            }

            if newest_vector.is_none() {
                if let Some(oldest) = batch.iter().map(|e| e.id).min() {
                    cursor.advance_entries(oldest);
                }
            }
            drop(cursor);

            tokio::task::yield_now().await;
        }

        info!(user_id, vectors = embedded, "Warm-up complete");
        Ok(())
    }

    async fn embed_and_persist(&self, items: &[BatchItem]) -> Result<Vec<VectorRecord>> {
        let records = match self.embedder.embed_items(items).await.into_strict() {
            Ok(records) => records,
            Err(e) => {
                for item in items {
                    error!(
                        user_id = item.user_id,
                        entry_id = item.entry_id,
                        error = %e,
                        "Failed to embed entry"
                    );
                }
                return Err(e.into());
            }
        };
        if records.is_empty() {
            return Ok(records);
        }

        if let Err(e) = self.vectors.store_vectors_batch(&records).await {
            for item in items {
                error!(
                    user_id = item.user_id,
                    entry_id = item.entry_id,
                    error = %e,
                    "Failed to persist entry vectors"
                );
            }
            return Err(e.into());
        }
        Ok(records)
    }

    /// Make sure a vector page only holds whole entries.
    ///
    /// A full page may cut the oldest entry's chunks short, so the rest of
    /// that entry is fetched before the cursor moves past it. Returns the
    /// records and their oldest parent id.
    async fn whole_entries(
        &self,
        user_id: UserId,
        mut page: Vec<VectorRecord>,
        full: bool,
    ) -> Result<(Vec<VectorRecord>, Option<EntryId>)> {
        let Some(oldest) = page.iter().map(|r| r.parent_entry_id).min() else {
            return Ok((page, None));
        };
        if !full {
            return Ok((page, Some(oldest)));
        }

        let mut fetch = MIN_ENTRY_PAGE;
        loop {
            let tail = self
                .vectors
                .get_vectors_older_than(user_id, oldest.saturating_add(1), fetch)
                .await?;
            let complete =
                tail.len() < fetch || tail.iter().any(|r| r.parent_entry_id < oldest);
            if complete {
                page.retain(|r| r.parent_entry_id != oldest);
                page.extend(tail.into_iter().filter(|r| r.parent_entry_id == oldest));
                return Ok((page, Some(oldest)));
            }
            fetch = fetch.saturating_mul(2);
        }
    }
}

fn graph_params(index: &IndexConfig, settings: &RegistrySettings) -> GraphParams {
    GraphParams::from_config(index, settings.node_overhead_bytes)
}

fn batch_item(entry: &Entry) -> BatchItem {
    BatchItem {
        user_id: entry.user_id,
        entry_id: entry.id,
        text: entry.content.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::events::RecordingEventSink;
    use crate::store::{vector_id, MemoryStore, StoreError};
    use chrono::Utc;

    const DIM: usize = 32;

    fn config() -> Config {
        let mut config = Config::default();
        config.embedding.dimension = DIM;
        config.embedding.batch_size = 8;
        config.index.initial_capacity = 64;
        config.registry.warm_limit = 10;
        config
    }

    fn build(config: &Config, store: &Arc<MemoryStore>) -> Arc<IndexStore> {
        let embedder = Arc::new(BatchEmbedder::new(
            Arc::new(HashingEmbedder::new(DIM)),
            config.chunking.clone(),
            config.embedding.batch_size,
        ));
        IndexStore::new(
            config,
            embedder,
            store.clone(),
            store.clone(),
            Arc::new(RecordingEventSink::new()),
        )
        .unwrap()
    }

    fn entry(user_id: UserId, id: EntryId) -> Entry {
        Entry {
            id,
            user_id,
            created_at: Utc::now(),
            role: "user".to_string(),
            content: format!("note number {} about topic {}", id, id % 7),
            tags: Vec::new(),
        }
    }

    fn chunked_config() -> Config {
        let mut config = config();
        config.chunking.max_chars = 20;
        config.chunking.overlap_chars = 0;
        config.index.allow_growth = true;
        config
    }

    /// Entry 1 spans several chunks, every other entry one
    async fn seed_chunked(registry: &Arc<IndexStore>, store: &Arc<MemoryStore>) -> usize {
        let mut long = entry(1, 1);
        long.content = "alpha beta gamma. delta epsilon zeta. eta theta iota. kappa lambda mu. nu xi omicron.".to_string();
        store.insert_entry(long.clone());
        let chunks = registry.index_entry(1, 1, &long.content).await.unwrap();

        for id in 2..=10 {
            let mut e = entry(1, id);
            e.content = format!("short {}", id);
            store.insert_entry(e.clone());
            registry.index_entry(1, id, &e.content).await.unwrap();
        }
        chunks
    }

    #[tokio::test]
    async fn test_whole_entries_fetches_cut_entry() {
        let config = chunked_config();
        let store = Arc::new(MemoryStore::new());
        let registry = build(&config, &store);
        let chunks = seed_chunked(&registry, &store).await;
        assert!(chunks > 2);

        // Page of entry 2 plus the first chunk of entry 1
        let page = store.get_vectors_older_than(1, 3, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        let (records, oldest) = registry.whole_entries(1, page, true).await.unwrap();
        assert_eq!(oldest, Some(1));
        assert_eq!(records.len(), chunks + 1);

        // Single-entry page holding part of entry 1
        let page = store.get_vectors_older_than(1, 2, 2).await.unwrap();
        let (records, oldest) = registry.whole_entries(1, page, true).await.unwrap();
        assert_eq!(oldest, Some(1));
        assert_eq!(records.len(), chunks);
        assert!(records.iter().all(|r| r.parent_entry_id == 1));

        let page = store.get_vectors_older_than(1, 11, 100).await.unwrap();
        let (records, oldest) = registry.whole_entries(1, page, false).await.unwrap();
        assert_eq!(records.len(), chunks + 9);
        assert_eq!(oldest, Some(1));

        let (records, oldest) = registry.whole_entries(1, Vec::new(), true).await.unwrap();
        assert!(records.is_empty());
        assert_eq!(oldest, None);
    }

    #[tokio::test]
    async fn test_expand_older_loads_every_chunk_across_pages() {
        let mut config = chunked_config();
        config.registry.warm_limit = 3;
        let store = Arc::new(MemoryStore::new());
        let registry = build(&config, &store);
        let chunks = seed_chunked(&registry, &store).await;

        registry.ensure_index(1).await.unwrap();
        assert!(registry.expand_older(1, 7).await.unwrap() > 0);
        while registry.expand_older(1, 2).await.unwrap() > 0 {}

        let index = registry.resident(1).unwrap();
        let graph = index.graph();
        let loaded = (0..chunks as u32)
            .filter(|c| graph.contains(vector_id(1, *c)))
            .count();
        assert_eq!(loaded, chunks);
        assert_eq!(graph.entry_count(), 10);
        assert_eq!(graph.len(), store.vector_count(1));
        graph.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn test_warm_load_completes_entry_larger_than_limit() {
        let mut config = chunked_config();
        config.registry.warm_limit = 2;
        let store = Arc::new(MemoryStore::new());
        let registry = build(&config, &store);

        let mut long = entry(1, 1);
        long.content = "one two three. four five six. seven eight nine. ten eleven twelve.".to_string();
        store.insert_entry(long.clone());
        let chunks = registry.index_entry(1, 1, &long.content).await.unwrap();
        assert!(chunks > 2);

        let index = registry.ensure_index(1).await.unwrap();
        assert_eq!(index.len(), chunks);
        assert_eq!(index.cursor().await.vector_cursor, Some(1));
    }

    /// Reads pass through, writes always fail
    struct ReadOnlyVectors(Arc<MemoryStore>);

    #[async_trait::async_trait]
    impl VectorStore for ReadOnlyVectors {
        async fn get_latest_vectors(
            &self,
            user_id: UserId,
            limit: usize,
        ) -> std::result::Result<Vec<VectorRecord>, StoreError> {
            self.0.get_latest_vectors(user_id, limit).await
        }

        async fn get_vectors_older_than(
            &self,
            user_id: UserId,
            cursor_id: EntryId,
            limit: usize,
        ) -> std::result::Result<Vec<VectorRecord>, StoreError> {
            self.0.get_vectors_older_than(user_id, cursor_id, limit).await
        }

        async fn store_vectors_batch(
            &self,
            _records: &[VectorRecord],
        ) -> std::result::Result<(), StoreError> {
            Err(StoreError::Backend("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_expand_older_write_failure_keeps_cursor() {
        let config = config();
        let store = Arc::new(MemoryStore::new());
        let embedder = Arc::new(BatchEmbedder::new(
            Arc::new(HashingEmbedder::new(DIM)),
            config.chunking.clone(),
            config.embedding.batch_size,
        ));
        let registry = IndexStore::new(
            &config,
            embedder,
            store.clone(),
            Arc::new(ReadOnlyVectors(store.clone())),
            Arc::new(RecordingEventSink::new()),
        )
        .unwrap();
        for id in 1..=5 {
            store.insert_entry(entry(1, id));
        }

        // The warm-up cannot persist anything either
        let index = registry.ensure_index(1).await.unwrap();
        registry.await_warmup(1).await.unwrap();
        assert!(index.is_empty());
        let before = index.cursor().await;
        assert_eq!(before.entry_cursor, None);

        let result = registry.expand_older(1, 3).await;
        assert!(matches!(result, Err(SemdexError::Store(_))));
        assert_eq!(index.cursor().await, before);
        assert!(index.is_empty());
    }

    #[test]
    fn test_cursor_only_moves_back() {
        let mut cursor = BackfillCursor::default();
        cursor.advance_entries(50);
        cursor.advance_entries(80);
        assert_eq!(cursor.entry_cursor, Some(50));
        cursor.advance_vectors(10);
        cursor.advance_vectors(5);
        assert_eq!(cursor.vector_cursor, Some(5));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected_at_startup() {
        let mut config = config();
        config.embedding.dimension = DIM + 1;
        let store = Arc::new(MemoryStore::new());
        let embedder = Arc::new(BatchEmbedder::new(
            Arc::new(HashingEmbedder::new(DIM)),
            config.chunking.clone(),
            8,
        ));
        let result = IndexStore::new(
            &config,
            embedder,
            store.clone(),
            store.clone(),
            Arc::new(RecordingEventSink::new()),
        );
        assert!(matches!(result, Err(SemdexError::DimensionMismatch { .. })));
    }

    #[tokio::test]
    async fn test_ensure_index_loads_latest_vectors() {
        let config = config();
        let store = Arc::new(MemoryStore::new());
        let registry = build(&config, &store);

        for id in 1..=25 {
            store.insert_entry(entry(1, id));
            registry
                .index_entry(1, id, &entry(1, id).content)
                .await
                .unwrap();
        }

        let index = registry.ensure_index(1).await.unwrap();
        assert_eq!(index.entry_count(), 10);
        assert!(index.contains_entry(25));
        assert!(index.contains_entry(16));
        assert!(!index.contains_entry(15));

        let cursor = index.cursor().await;
        assert_eq!(cursor.vector_cursor, Some(16));
        assert!(!cursor.vectors_exhausted);
    }

    #[tokio::test]
    async fn test_expand_older_uses_persisted_vectors_first() {
        let config = config();
        let store = Arc::new(MemoryStore::new());
        let registry = build(&config, &store);

        for id in 1..=25 {
            store.insert_entry(entry(1, id));
            registry
                .index_entry(1, id, &entry(1, id).content)
                .await
                .unwrap();
        }
        let vectors_before = store.vector_count(1);

        registry.ensure_index(1).await.unwrap();
        assert_eq!(registry.expand_older(1, 5).await.unwrap(), 5);
        assert_eq!(registry.expand_older(1, 100).await.unwrap(), 10);
        assert_eq!(registry.expand_older(1, 100).await.unwrap(), 0);

        // Nothing was re-embedded
        assert_eq!(store.vector_count(1), vectors_before);
        let index = registry.resident(1).unwrap();
        assert_eq!(index.entry_count(), 25);
    }

    #[tokio::test]
    async fn test_expand_older_embeds_missing_entries() {
        let config = config();
        let store = Arc::new(MemoryStore::new());
        let registry = build(&config, &store);
        for id in 1..=30 {
            store.insert_entry(entry(1, id));
        }

        registry.ensure_index(1).await.unwrap();
        let mut total = 0;
        loop {
            let added = registry.expand_older(1, 7).await.unwrap();
            if added == 0 {
                break;
            }
            total += added;
        }
        registry.await_warmup(1).await.unwrap();

        let index = registry.resident(1).unwrap();
        assert_eq!(index.entry_count(), 30);
        assert!(total <= 30);
        assert_eq!(store.vector_count(1), 30);
        let cursor = index.cursor().await;
        assert!(cursor.entries_exhausted);
        assert_eq!(cursor.entry_cursor, Some(1));
    }

    #[tokio::test]
    async fn test_index_entry_skips_graph_when_not_resident() {
        let config = config();
        let store = Arc::new(MemoryStore::new());
        let registry = build(&config, &store);

        store.insert_entry(entry(3, 1));
        assert_eq!(registry.index_entry(3, 1, "hello there").await.unwrap(), 1);
        assert!(registry.resident(3).is_none());
        assert_eq!(store.vector_count(3), 1);

        let index = registry.ensure_index(3).await.unwrap();
        store.insert_entry(entry(3, 2));
        registry.index_entry(3, 2, "second entry").await.unwrap();
        assert!(index.contains_entry(2));
    }

    #[tokio::test]
    async fn test_bulk_index_reports_store_failure() {
        let config = config();
        let store = Arc::new(MemoryStore::new());
        let registry = build(&config, &store);

        let items: Vec<BatchItem> = (1..=3)
            .map(|id| BatchItem {
                user_id: if id == 3 { 2 } else { 1 },
                entry_id: id,
                text: format!("entry {}", id),
            })
            .collect();

        let report = registry.bulk_index(&items).await.unwrap();
        assert_eq!(report.indexed_entries, 3);
        assert_eq!(report.indexed_vectors, 3);
        assert!(report.failed.is_empty());

        store.set_unavailable(true);
        let report = registry.bulk_index(&items).await.unwrap();
        assert_eq!(report.indexed_entries, 0);
        assert_eq!(report.failed.len(), 3);
    }

    #[tokio::test]
    async fn test_remove_entries() {
        let config = config();
        let store = Arc::new(MemoryStore::new());
        let registry = build(&config, &store);
        for id in 1..=3 {
            store.insert_entry(entry(1, id));
            registry.index_entry(1, id, "same words").await.unwrap();
        }

        assert_eq!(registry.remove_entries(1, &[2]).await, 0);
        let index = registry.ensure_index(1).await.unwrap();
        assert_eq!(registry.remove_entries(1, &[2]).await, 1);
        assert!(!index.contains_entry(2));
        index.graph().check_invariants().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_maintenance_is_rate_limited() {
        let config = config();
        let store = Arc::new(MemoryStore::new());
        let registry = build(&config, &store);

        assert!(registry.maintenance().is_some());
        assert!(registry.maintenance().is_none());
        tokio::time::advance(std::time::Duration::from_secs(61)).await;
        assert!(registry.maintenance().is_some());
    }
}
