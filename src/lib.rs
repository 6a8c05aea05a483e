//! Semdex - per-user semantic index with progressive retrieval
//!
//! Keeps an approximate nearest neighbor index per user over their entries,
//! warms it from persisted vectors, backfills older history on demand when a
//! search comes back with poor matches, and ranks results with tag boosts.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod events;
pub mod index;
pub mod retrieval;
pub mod service;
pub mod store;

pub use error::{Result, SemdexError};
pub use service::{Collaborators, SemanticIndex};
