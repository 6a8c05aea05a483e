//! Retrieval pipeline: normalize, generate candidates, enrich, rerank

use super::candidates::CandidateGenerator;
use super::hits::SearchHit;
use super::normalizer::normalize_query;
use super::reranker::rerank;
use super::tags::TagEnricher;
use super::SearchQuery;
use crate::config::{Config, RetrievalSettings};
use crate::embedding::BatchEmbedder;
use crate::error::Result;
use crate::index::IndexStore;
use crate::store::{DecryptionContext, EntryId, EntryStore, TagStore};
use std::sync::Arc;
use tracing::{debug, info};

pub struct RetrievalPipeline {
    embedder: Arc<BatchEmbedder>,
    entries: Arc<dyn EntryStore>,
    generator: CandidateGenerator,
    tags: TagEnricher,
}

impl RetrievalPipeline {
    pub fn new(
        config: &Config,
        store: Arc<IndexStore>,
        embedder: Arc<BatchEmbedder>,
        entries: Arc<dyn EntryStore>,
        tags: Arc<dyn TagStore>,
    ) -> Result<Self> {
        let settings = RetrievalSettings::resolve(&config.retrieval)?;
        Ok(Self {
            embedder,
            entries,
            generator: CandidateGenerator::new(store, settings),
            tags: TagEnricher::new(tags, config.tags.clone())?,
        })
    }

    /// Run a search for one user.
    ///
    /// Fewer than `k2` results is not an error; an unknown or empty history
    /// yields an empty list.
    pub async fn search(
        &self,
        query: &SearchQuery,
        ctx: &DecryptionContext,
    ) -> Result<Vec<SearchHit>> {
        let normalized =
            normalize_query(&query.text, self.generator.settings().max_query_chars)?;
        if normalized.truncated {
            debug!(user_id = query.user_id, "Query truncated");
        }
        if query.k2 == 0 {
            return Ok(Vec::new());
        }

        // Step 1: Embed the query
        let vector = self.embedder.embed_query(&normalized.text).await?;

        // Step 2: Progressive candidate generation
        let mut generated = self
            .generator
            .generate(query.user_id, &vector, query.k1, query.k2)
            .await?;

        // Step 3: Tag enrichment
        self.tags
            .enrich(query.user_id, &normalized.text, &mut generated.candidates)
            .await;

        // Step 4: Hydrate entries
        let ids: Vec<EntryId> = generated.candidates.keys().copied().collect();
        let entries = if ids.is_empty() {
            Vec::new()
        } else {
            self.entries
                .get_entries_by_ids(query.user_id, ctx, &ids)
                .await?
        };

        // Step 5: Rerank
        let hits = rerank(&generated.candidates, entries, query.k2);

        info!(
            user_id = query.user_id,
            candidates = generated.candidates.len(),
            rounds = generated.rounds,
            results = hits.len(),
            "Search complete"
        );
        Ok(hits)
    }
}
