//! Integration tests for the retrieval pipeline
//!
//! End-to-end searches through `SemanticIndex` with the hashing embedder and
//! in-memory stores, plus failing collaborators for the error paths.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use semdex::config::{Config, RetrievalSettings};
use semdex::embedding::{
    BatchEmbedder, EmbeddingError, EmbeddingProvider, HashingEmbedder,
};
use semdex::events::RecordingEventSink;
use semdex::index::IndexStore;
use semdex::retrieval::CandidateGenerator;
use semdex::store::{
    DecryptionContext, Entry, EntryId, EntryStore, MemoryStore, StoreError, UserId,
};
use semdex::{Collaborators, SemanticIndex, SemdexError};
use std::sync::Arc;

const DIM: usize = 128;

fn test_config() -> Config {
    let mut config = Config::default();
    config.embedding.dimension = DIM;
    config.index.initial_capacity = 128;
    config.index.hnsw_ef_construction = 64;
    config
}

fn entry(user_id: UserId, id: EntryId, content: &str, tags: &[&str]) -> Entry {
    Entry {
        id,
        user_id,
        created_at: Utc::now() - ChronoDuration::hours(100 - id),
        role: "user".to_string(),
        content: content.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
    }
}

fn service(config: &Config, store: &Arc<MemoryStore>) -> SemanticIndex {
    let collaborators =
        Collaborators::in_memory(store.clone(), Arc::new(HashingEmbedder::new(DIM)));
    SemanticIndex::new(config, collaborators).unwrap()
}

async fn append_all(index: &SemanticIndex, store: &MemoryStore, entries: Vec<Entry>) {
    for e in entries {
        store.insert_entry(e.clone());
        index.append(e.user_id, e.id, &e.content).await.unwrap();
    }
}

#[tokio::test]
async fn test_search_empty_history() {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let index = service(&config, &store);

    let hits = index
        .search(42, &DecryptionContext::plaintext(), "anything", 40, 10)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_search_ranks_matching_entry_first() {
    println!("\n=== Search over three distinct entries ===\n");

    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let index = service(&config, &store);

    append_all(
        &index,
        &store,
        vec![
            entry(1, 1, "Booked the dentist appointment for next Tuesday morning", &[]),
            entry(
                1,
                2,
                "Went hiking up the mountain trail with my sister and saw an eagle",
                &[],
            ),
            entry(
                1,
                3,
                "Finished reading a novel about space exploration and distant planets",
                &[],
            ),
        ],
    )
    .await;

    let hits = index
        .search(
            1,
            &DecryptionContext::plaintext(),
            "hiking mountain trail eagle",
            10,
            3,
        )
        .await
        .unwrap();

    for hit in &hits {
        println!("  [{:.3}] #{} {}", hit.score, hit.id, hit.preview(40));
    }
    assert!(!hits.is_empty());
    assert_eq!(hits[0].id, 2);
    assert!(hits.len() <= 3);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test]
async fn test_tag_match_outranks_equal_similarity() {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let index = service(&config, &store);

    // Identical text gives identical similarity; the untagged entry is newer
    append_all(
        &index,
        &store,
        vec![
            entry(1, 1, "Lunch at the corner spot with Sam", &["cafe"]),
            entry(1, 2, "Lunch at the corner spot with Sam", &[]),
        ],
    )
    .await;

    let hits = index
        .search(1, &DecryptionContext::plaintext(), "cafe lunch with Sam", 10, 2)
        .await
        .unwrap();

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, 1);
    assert!(hits[0].score > hits[1].score);
}

#[tokio::test]
async fn test_tag_only_entry_is_returned() {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let index = service(&config, &store);

    // Entry 2 is never embedded, so only its tag can surface it
    append_all(
        &index,
        &store,
        vec![entry(1, 1, "Morning run along the river", &[])],
    )
    .await;
    store.insert_entry(entry(1, 2, "Quick note", &["marathon"]));

    let mut config = config;
    config.retrieval.max_rounds = 0;
    let index = service(&config, &store);

    let hits = index
        .search(1, &DecryptionContext::plaintext(), "marathon training", 10, 5)
        .await
        .unwrap();
    assert!(hits.iter().any(|h| h.id == 2));
}

#[tokio::test]
async fn test_search_backfills_older_history() {
    let mut config = test_config();
    config.registry.warm_limit = 20;
    config.retrieval.expansion_batch = 50;
    config.retrieval.max_rounds = 10;
    config.retrieval.max_duration = "30s".to_string();
    let store = Arc::new(MemoryStore::new());

    // The only relevant entry is the oldest one and has no vector yet
    store.insert_entry(entry(1, 1, "Adopted a grey kitten named Pixel", &[]));
    for id in 2..=80 {
        store.insert_entry(entry(
            1,
            id,
            &format!("Routine work log {} spreadsheets meetings", id),
            &[],
        ));
    }
    let index = service(&config, &store);

    let hits = index
        .search(1, &DecryptionContext::plaintext(), "grey kitten Pixel", 20, 1)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, 1);
}

#[tokio::test]
async fn test_candidates_grow_monotonically_with_expansion() {
    let mut config = test_config();
    config.registry.warm_limit = 10;
    let store = Arc::new(MemoryStore::new());
    let embedder = Arc::new(BatchEmbedder::new(
        Arc::new(HashingEmbedder::new(DIM)),
        config.chunking.clone(),
        config.embedding.batch_size,
    ));
    let registry = IndexStore::new(
        &config,
        embedder.clone(),
        store.clone(),
        store.clone(),
        Arc::new(RecordingEventSink::new()),
    )
    .unwrap();

    for id in 1..=50 {
        let e = entry(3, id, &format!("garden note {} tomatoes basil {}", id, id % 4), &[]);
        store.insert_entry(e.clone());
        registry.index_entry(3, id, &e.content).await.unwrap();
    }

    let query = embedder.embed_query("tomatoes basil garden").await.unwrap();

    let mut settings = RetrievalSettings::resolve(&config.retrieval).unwrap();
    settings.max_rounds = 0;
    let before = CandidateGenerator::new(registry.clone(), settings.clone())
        .generate(3, &query, 64, 64)
        .await
        .unwrap();
    assert_eq!(before.rounds, 0);

    // A gate that can never pass forces every round to expand
    settings.max_rounds = 20;
    settings.poor_match_threshold = 1.1;
    let after = CandidateGenerator::new(registry.clone(), settings)
        .generate(3, &query, 64, 64)
        .await
        .unwrap();

    assert!(after.expanded > 0);
    assert!(!after.gate_passed);
    assert!(after.len() > before.len());
    for (id, candidate) in &before.candidates {
        let later = after.candidates.get(id).expect("candidate lost after expansion");
        assert!(later.similarity >= candidate.similarity - 1e-6);
    }
}

#[tokio::test]
async fn test_invalid_query_rejected() {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let index = service(&config, &store);

    let err = index
        .search(1, &DecryptionContext::plaintext(), "   ", 10, 5)
        .await
        .unwrap_err();
    assert!(matches!(err, SemdexError::InvalidQuery(_)));
}

#[tokio::test]
async fn test_dimension_mismatch_is_fatal() {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let collaborators =
        Collaborators::in_memory(store, Arc::new(HashingEmbedder::new(DIM / 2)));
    let result = SemanticIndex::new(&config, collaborators);
    assert!(matches!(
        result,
        Err(SemdexError::DimensionMismatch { expected, actual }) if expected == DIM && actual == DIM / 2
    ));
}

/// Embedder that is always down
struct OfflineEmbedder;

#[async_trait]
impl EmbeddingProvider for OfflineEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Unavailable("connection refused".to_string()))
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "offline"
    }
}

#[tokio::test]
async fn test_embedder_failure_propagates() {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    store.insert_entry(entry(1, 1, "hello world", &[]));
    let index = SemanticIndex::new(
        &config,
        Collaborators::in_memory(store.clone(), Arc::new(OfflineEmbedder)),
    )
    .unwrap();

    let err = index.append(1, 1, "hello world").await.unwrap_err();
    assert!(err.is_collaborator_failure());
    assert_eq!(store.vector_count(1), 0);

    let err = index
        .search(1, &DecryptionContext::plaintext(), "hello", 10, 5)
        .await
        .unwrap_err();
    assert!(err.is_collaborator_failure());
}

/// Entry store whose recency queries fail while hydration still works
struct NoBackfillEntries {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl EntryStore for NoBackfillEntries {
    async fn get_latest_entries(
        &self,
        _user_id: UserId,
        _limit: usize,
    ) -> Result<Vec<Entry>, StoreError> {
        Err(StoreError::Unavailable("replica lagging".to_string()))
    }

    async fn get_entries_older_than(
        &self,
        _user_id: UserId,
        _cursor_id: EntryId,
        _limit: usize,
    ) -> Result<Vec<Entry>, StoreError> {
        Err(StoreError::Unavailable("replica lagging".to_string()))
    }

    async fn get_entries_by_ids(
        &self,
        user_id: UserId,
        ctx: &DecryptionContext,
        ids: &[EntryId],
    ) -> Result<Vec<Entry>, StoreError> {
        self.inner.get_entries_by_ids(user_id, ctx, ids).await
    }

    async fn get_user_latest_entry_id(
        &self,
        user_id: UserId,
    ) -> Result<Option<EntryId>, StoreError> {
        self.inner.get_user_latest_entry_id(user_id).await
    }
}

#[tokio::test]
async fn test_failed_backfill_returns_best_effort_results() {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let seed = service(&config, &store);
    append_all(
        &seed,
        &store,
        vec![
            entry(1, 1, "Painted the fence blue", &[]),
            entry(1, 2, "Called grandma about the holidays", &[]),
        ],
    )
    .await;

    let mut collaborators =
        Collaborators::in_memory(store.clone(), Arc::new(HashingEmbedder::new(DIM)));
    collaborators.entries = Arc::new(NoBackfillEntries {
        inner: store.clone(),
    });
    let index = SemanticIndex::new(&config, collaborators).unwrap();

    // The gate fails (too few candidates) and expansion errors out
    let hits = index
        .search(1, &DecryptionContext::plaintext(), "fence painted blue", 40, 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].id, 1);
}

#[tokio::test]
async fn test_removed_entries_disappear_from_results() {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let index = service(&config, &store);
    append_all(
        &index,
        &store,
        vec![
            entry(1, 1, "Bought fresh bread at the bakery", &[]),
            entry(1, 2, "Bakery bread was sold out today", &[]),
        ],
    )
    .await;

    let ctx = DecryptionContext::plaintext();
    let hits = index.search(1, &ctx, "bakery bread", 10, 5).await.unwrap();
    assert_eq!(hits.len(), 2);

    assert_eq!(index.remove(1, &[2]).await, 1);
    store.delete_entry(1, 2);
    let hits = index.search(1, &ctx, "bakery bread", 10, 5).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, 1);
}
