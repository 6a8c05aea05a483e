//! Progressive retrieval
//!
//! Query normalization, quality-gated candidate generation with on-demand
//! backfill, tag enrichment and boosted reranking.

mod candidates;
mod hits;
mod normalizer;
mod pipeline;
mod reranker;
mod tags;

pub use candidates::{passes_quality_gate, CandidateGenerator, CandidateSet};
pub use hits::{Candidate, SearchHit};
pub use normalizer::{normalize_query, NormalizedQuery};
pub use pipeline::RetrievalPipeline;
pub use reranker::rerank;
pub use tags::TagEnricher;

use crate::store::UserId;
use serde::{Deserialize, Serialize};

/// Default search breadth as a multiple of the requested count
pub const DEFAULT_BREADTH_MULTIPLIER: usize = 4;

/// Search request for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub user_id: UserId,

    /// Query text
    pub text: String,

    /// Neighbors requested from the index per round
    pub k1: usize,

    /// Maximum number of results
    pub k2: usize,
}

impl SearchQuery {
    pub fn new(user_id: UserId, text: impl Into<String>, limit: usize) -> Self {
        Self {
            user_id,
            text: text.into(),
            k1: limit.saturating_mul(DEFAULT_BREADTH_MULTIPLIER),
            k2: limit,
        }
    }

    pub fn with_breadth(mut self, k1: usize) -> Self {
        self.k1 = k1;
        self
    }
}
