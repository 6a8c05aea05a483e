//! Candidate and result structures

use crate::store::{Entry, EntryId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entry considered for the final result set
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub entry_id: EntryId,
    /// Best similarity over the entry's chunks
    pub similarity: f32,
    /// Query tag terms found on the entry
    pub tag_matches: usize,
    pub boost: f32,
}

impl Candidate {
    pub fn semantic(entry_id: EntryId, similarity: f32) -> Self {
        Self {
            entry_id,
            similarity,
            tag_matches: 0,
            boost: 0.0,
        }
    }

    /// Candidate found only through tags, given a nominal similarity
    pub fn tag_only(entry_id: EntryId, similarity: f32) -> Self {
        Self::semantic(entry_id, similarity)
    }

    /// Final ranking score: similarity scaled by the tag boost
    pub fn score(&self) -> f32 {
        self.similarity.max(0.0) * (1.0 + self.boost)
    }
}

/// Search result returned to callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: EntryId,
    pub created_at: DateTime<Utc>,
    pub role: String,
    pub content: String,
    pub score: f32,
}

impl SearchHit {
    pub fn from_entry(entry: Entry, score: f32) -> Self {
        Self {
            id: entry.id,
            created_at: entry.created_at,
            role: entry.role,
            content: entry.content,
            score,
        }
    }

    /// Get a short preview of the content (first N characters)
    pub fn preview(&self, max_chars: usize) -> String {
        if self.content.chars().count() <= max_chars {
            self.content.clone()
        } else {
            let cut: String = self.content.chars().take(max_chars).collect();
            format!("{}...", cut)
        }
    }
}
