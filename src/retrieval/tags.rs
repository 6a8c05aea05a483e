//! Tag enrichment
//!
//! Tag-like terms in the query are looked up in the tag store. Entries
//! carrying those tags get a multiplicative boost; tagged entries the
//! semantic search missed join the candidates with a nominal similarity.

use super::hits::Candidate;
use crate::config::TagConfig;
use crate::error::{Result, SemdexError};
use crate::store::{EntryId, TagStore, UserId};
use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

const TERM_PATTERN: &str = r"#?[\p{L}\p{N}_-]{3,}";

const STOP_WORDS: &[&str] = &[
    "about", "after", "again", "all", "and", "any", "are", "but", "can", "did", "does", "for",
    "from", "had", "has", "have", "her", "his", "how", "into", "its", "just", "not", "now", "our",
    "out", "she", "that", "the", "their", "them", "then", "there", "these", "they", "this",
    "was", "were", "what", "when", "where", "which", "who", "why", "will", "with", "you",
    "your",
];

pub struct TagEnricher {
    tags: Arc<dyn TagStore>,
    config: TagConfig,
    term_pattern: Regex,
}

impl TagEnricher {
    pub fn new(tags: Arc<dyn TagStore>, config: TagConfig) -> Result<Self> {
        let term_pattern = Regex::new(TERM_PATTERN)
            .map_err(|e| SemdexError::Config(format!("Invalid tag term pattern: {}", e)))?;
        Ok(Self {
            tags,
            config,
            term_pattern,
        })
    }

    /// Lowercased tag candidates from the query, in order of appearance
    pub fn extract_terms(&self, query: &str) -> Vec<String> {
        let mut seen = AHashSet::new();
        self.term_pattern
            .find_iter(query)
            .map(|m| m.as_str().trim_start_matches('#').to_lowercase())
            .filter(|term| term.chars().count() >= 3)
            .filter(|term| !STOP_WORDS.contains(&term.as_str()))
            .filter(|term| seen.insert(term.clone()))
            .take(self.config.max_terms)
            .collect()
    }

    /// Boost factor for an entry matching `matches` query terms
    pub fn boost_for(&self, matches: usize) -> f32 {
        (matches as f32 * self.config.boost_per_match).min(self.config.max_boost)
    }

    /// Distinct query terms matched per entry; store failures yield no matches
    pub async fn lookup(&self, user_id: UserId, terms: &[String]) -> AHashMap<EntryId, usize> {
        if !self.config.enabled || terms.is_empty() {
            return AHashMap::new();
        }

        let hits = match self
            .tags
            .recent_entries_for_tags(user_id, terms, self.config.recent_limit)
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(user_id, error = %e, "Tag lookup failed, skipping enrichment");
                return AHashMap::new();
            }
        };

        let mut matched: AHashMap<EntryId, AHashSet<String>> = AHashMap::new();
        for hit in hits {
            let tag = hit.tag.trim_start_matches('#').to_lowercase();
            if terms.contains(&tag) {
                matched.entry(hit.entry_id).or_default().insert(tag);
            }
        }

        matched
            .into_iter()
            .map(|(entry_id, tags)| (entry_id, tags.len()))
            .collect()
    }

    /// Apply boosts and add tag-only candidates.
    ///
    /// Returns how many candidates were added.
    pub fn apply(
        &self,
        candidates: &mut IndexMap<EntryId, Candidate>,
        matches: &AHashMap<EntryId, usize>,
    ) -> usize {
        let mut ordered: Vec<(EntryId, usize)> = matches.iter().map(|(id, n)| (*id, *n)).collect();
        // Newest first so tag-only entries are appended deterministically
        ordered.sort_by(|a, b| b.0.cmp(&a.0));

        let mut added = 0;
        for (entry_id, count) in ordered {
            let candidate = candidates.entry(entry_id).or_insert_with(|| {
                added += 1;
                Candidate::tag_only(entry_id, self.config.tag_only_similarity)
            });
            candidate.tag_matches = count;
            candidate.boost = self.boost_for(count);
        }
        added
    }

    /// Extract terms, look them up and apply the results
    pub async fn enrich(
        &self,
        user_id: UserId,
        query: &str,
        candidates: &mut IndexMap<EntryId, Candidate>,
    ) {
        let terms = self.extract_terms(query);
        let matches = self.lookup(user_id, &terms).await;
        if matches.is_empty() {
            return;
        }
        let added = self.apply(candidates, &matches);
        debug!(
            user_id,
            terms = terms.len(),
            matched = matches.len(),
            added,
            "Applied tag enrichment"
        );
    }
}
