//! Embedding: chunking, providers and batched vector generation
//!
//! Architecture:
//! - EmbeddingProvider trait for the external text→vector service
//! - HashingEmbedder for deterministic offline embedding
//! - FastEmbedProvider for local models (`fastembed` feature)
//! - Chunker splitting long entries into overlapping windows
//! - BatchEmbedder turning entries into persisted-vector records
mod batch;
pub mod chunker;
mod provider;

pub use batch::{BatchEmbedder, BatchItem, BatchResult, FailedItem};
pub use chunker::{chunk, Chunk};
#[cfg(feature = "fastembed")]
pub use provider::FastEmbedProvider;
pub use provider::{EmbeddingError, EmbeddingProvider, HashingEmbedder};

use crate::config::EmbeddingConfig;
use crate::error::{Result, SemdexError};
use std::sync::Arc;

/// Build the provider named in the configuration
pub fn provider_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dimension))),
        #[cfg(feature = "fastembed")]
        "fastembed" => {
            let provider = FastEmbedProvider::new(&config.model)?;
            if provider.dimension() != config.dimension {
                return Err(SemdexError::DimensionMismatch {
                    expected: config.dimension,
                    actual: provider.dimension(),
                });
            }
            Ok(Arc::new(provider))
        }
        other => Err(SemdexError::Config(format!(
            "Embedding provider '{}' is not available in this build",
            other
        ))),
    }
}
