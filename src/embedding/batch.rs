/// Batch embedding of entry chunks
use super::chunker::chunk;
use super::{EmbeddingError, EmbeddingProvider};
use crate::config::ChunkingConfig;
use crate::store::{EntryId, UserId, VectorRecord};
use ahash::AHashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Item to be embedded (entry text with its owner)
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub user_id: UserId,
    pub entry_id: EntryId,
    pub text: String,
}

/// Entry whose chunks could not be embedded
#[derive(Debug, Clone)]
pub struct FailedItem {
    pub user_id: UserId,
    pub entry_id: EntryId,
    pub reason: String,
}

/// Result of batch processing
#[derive(Debug, Default)]
pub struct BatchResult {
    pub records: Vec<VectorRecord>,
    pub failed: Vec<FailedItem>,
    pub duration_ms: u64,
    first_error: Option<EmbeddingError>,
}

impl BatchResult {
    /// Records only if every batch succeeded
    pub fn into_strict(self) -> Result<Vec<VectorRecord>, EmbeddingError> {
        match self.first_error {
            Some(err) => Err(err),
            None => Ok(self.records),
        }
    }
}

struct PendingChunk {
    item: usize,
    chunk_index: u32,
    text: String,
}

/// Chunks entries and embeds the chunk texts in provider-sized batches
///
/// The runtime gets a yield point between batches so a large warm-up does
/// not starve other users' requests.
pub struct BatchEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl BatchEmbedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        chunking: ChunkingConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            provider,
            chunking,
            batch_size: batch_size.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// Embed a single query string
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.provider.embed(&[text.to_string()]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| EmbeddingError::GenerationError("No embedding generated".to_string()))?;
        self.check_dimension(&vector)?;
        Ok(vector)
    }

    /// Chunk and embed every item.
    ///
    /// A failing batch marks every entry with a chunk in it as failed and
    /// drops that entry's other chunks, so no entry is ever half indexed.
    pub async fn embed_items(&self, items: &[BatchItem]) -> BatchResult {
        let start = std::time::Instant::now();

        let pending: Vec<PendingChunk> = items
            .iter()
            .enumerate()
            .flat_map(|(item, batch_item)| {
                chunk(
                    &batch_item.text,
                    self.chunking.max_chars,
                    self.chunking.overlap_chars,
                )
                .into_iter()
                .map(move |c| PendingChunk {
                    item,
                    chunk_index: c.chunk_index,
                    text: c.text,
                })
            })
            .collect();

        let mut result = BatchResult::default();
        let mut failed_items: AHashSet<usize> = AHashSet::new();

        for (batch_no, batch) in pending.chunks(self.batch_size).enumerate() {
            if batch_no > 0 {
                tokio::task::yield_now().await;
            }

            match self.embed_batch(batch).await {
                Ok(vectors) => {
                    for (pending, embedding) in batch.iter().zip(vectors) {
                        let item = &items[pending.item];
                        result.records.push(VectorRecord::new(
                            item.user_id,
                            item.entry_id,
                            pending.chunk_index,
                            embedding,
                        ));
                    }
                    debug!(chunks = batch.len(), "Embedded chunk batch");
                }
                Err(err) => {
                    let reason = err.to_string();
                    for pending in batch {
                        if failed_items.insert(pending.item) {
                            let item = &items[pending.item];
                            warn!(
                                user_id = item.user_id,
                                entry_id = item.entry_id,
                                error = %reason,
                                "Failed to embed entry"
                            );
                            result.failed.push(FailedItem {
                                user_id: item.user_id,
                                entry_id: item.entry_id,
                                reason: reason.clone(),
                            });
                        }
                    }
                    if result.first_error.is_none() {
                        result.first_error = Some(err);
                    }
                }
            }
        }

        if !failed_items.is_empty() {
            let failed_entries: AHashSet<(UserId, EntryId)> = failed_items
                .iter()
                .map(|idx| (items[*idx].user_id, items[*idx].entry_id))
                .collect();
            result
                .records
                .retain(|r| !failed_entries.contains(&(r.owner_user_id, r.parent_entry_id)));
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    async fn embed_batch(&self, batch: &[PendingChunk]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        let embeddings = self.provider.embed(&texts).await?;

        if embeddings.len() != batch.len() {
            return Err(EmbeddingError::GenerationError(format!(
                "Embedding count mismatch: expected {}, got {}",
                batch.len(),
                embeddings.len()
            )));
        }
        for embedding in &embeddings {
            self.check_dimension(embedding)?;
        }

        Ok(embeddings)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), EmbeddingError> {
        let expected = self.provider.dimension();
        if vector.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}
