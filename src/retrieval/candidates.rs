//! Progressive candidate generation
//!
//! Searches the resident index first and, while the results look poor,
//! backfills older history and searches again. Each round is bounded by the
//! round limit and the time budget.

use super::hits::Candidate;
use crate::config::RetrievalSettings;
use crate::error::{Result, SemdexError};
use crate::index::{IndexStore, Neighbor};
use crate::store::{EntryId, UserId};
use indexmap::IndexMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Candidates gathered across rounds, in first-seen order
#[derive(Debug, Default)]
pub struct CandidateSet {
    pub candidates: IndexMap<EntryId, Candidate>,
    /// Backfill rounds run
    pub rounds: usize,
    /// Vectors added by backfill
    pub expanded: usize,
    /// Search breadth of the final round
    pub k1: usize,
    pub gate_passed: bool,
}

impl CandidateSet {
    /// Fold neighbors in, keeping each entry's best similarity.
    ///
    /// Entries are never removed and similarities never decrease.
    pub fn merge(&mut self, neighbors: &[Neighbor]) {
        for neighbor in neighbors {
            let similarity = neighbor.similarity();
            self.candidates
                .entry(neighbor.entry_id)
                .and_modify(|c| {
                    if similarity > c.similarity {
                        c.similarity = similarity;
                    }
                })
                .or_insert_with(|| Candidate::semantic(neighbor.entry_id, similarity));
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Whether the candidates are good enough to stop backfilling.
///
/// Needs at least `k2` candidates, a best match at or above `threshold`, and
/// `min(min_good_hits, k2)` candidates at or above it.
pub fn passes_quality_gate(
    candidates: &IndexMap<EntryId, Candidate>,
    k2: usize,
    threshold: f32,
    min_good_hits: usize,
) -> bool {
    if candidates.len() < k2 || candidates.is_empty() {
        return false;
    }

    let best = candidates
        .values()
        .map(|c| c.similarity)
        .fold(f32::NEG_INFINITY, f32::max);
    if best < threshold {
        return false;
    }

    let needed = min_good_hits.min(k2.max(1));
    let good = candidates
        .values()
        .filter(|c| c.similarity >= threshold)
        .count();
    good >= needed
}

pub struct CandidateGenerator {
    store: Arc<IndexStore>,
    settings: RetrievalSettings,
}

impl CandidateGenerator {
    pub fn new(store: Arc<IndexStore>, settings: RetrievalSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Collect up to `k1` neighbors per round, expanding until the gate passes.
    ///
    /// Backfill failures end the loop early with what was found so far; a
    /// dimension mismatch is returned.
    pub async fn generate(
        &self,
        user_id: UserId,
        query: &[f32],
        k1: usize,
        k2: usize,
    ) -> Result<CandidateSet> {
        let started = Instant::now();
        let mut k1 = k1.max(k2).max(1);
        let mut broadened = false;

        let index = self.store.ensure_index(user_id).await?;
        let mut set = CandidateSet::default();
        set.merge(&index.search(query, k1)?);

        while !self.gate(&set, k2) {
            if set.rounds >= self.settings.max_rounds {
                debug!(user_id, rounds = set.rounds, "Round limit reached");
                break;
            }
            if started.elapsed() >= self.settings.max_duration {
                debug!(user_id, rounds = set.rounds, "Time budget exhausted");
                break;
            }

            set.rounds += 1;
            let added = match self
                .store
                .expand_older(user_id, self.settings.expansion_batch)
                .await
            {
                Ok(added) => added,
                Err(e @ SemdexError::DimensionMismatch { .. }) => return Err(e),
                Err(e) => {
                    warn!(user_id, error = %e, "Backfill failed, using current candidates");
                    break;
                }
            };
            if added == 0 {
                debug!(user_id, "No older history left");
                break;
            }
            set.expanded += added;

            if !broadened {
                k1 = k1.saturating_mul(2).min(self.settings.max_k1.max(k1));
                broadened = true;
            }

            // Maintenance may have evicted the index while we were expanding
            let index = self.store.ensure_index(user_id).await?;
            set.merge(&index.search(query, k1)?);
        }

        set.k1 = k1;
        set.gate_passed = self.gate(&set, k2);
        debug!(
            user_id,
            candidates = set.len(),
            rounds = set.rounds,
            expanded = set.expanded,
            gate_passed = set.gate_passed,
            "Generated candidates"
        );
        Ok(set)
    }

    fn gate(&self, set: &CandidateSet, k2: usize) -> bool {
        passes_quality_gate(
            &set.candidates,
            k2,
            self.settings.poor_match_threshold,
            self.settings.min_good_hits,
        )
    }
}
