//! Final ordering of hydrated candidates

use super::hits::{Candidate, SearchHit};
use crate::store::{Entry, EntryId};
use ahash::AHashMap;
use indexmap::IndexMap;
use std::cmp::Ordering;

/// Order candidates by boosted score and keep the top `limit`.
///
/// Ties go to the newer entry (`created_at`, then id). Candidates without a
/// hydrated entry are dropped, and each entry appears at most once.
pub fn rerank(
    candidates: &IndexMap<EntryId, Candidate>,
    entries: Vec<Entry>,
    limit: usize,
) -> Vec<SearchHit> {
    let mut hydrated: AHashMap<EntryId, Entry> =
        entries.into_iter().map(|e| (e.id, e)).collect();

    let mut hits: Vec<SearchHit> = candidates
        .values()
        .filter_map(|candidate| {
            hydrated
                .remove(&candidate.entry_id)
                .map(|entry| SearchHit::from_entry(entry, candidate.score()))
        })
        .collect();

    hits.sort_by(compare_hits);
    hits.truncate(limit);
    hits
}

fn compare_hits(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.created_at.cmp(&a.created_at))
        .then_with(|| b.id.cmp(&a.id))
}
