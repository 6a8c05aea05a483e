//! Per-user approximate nearest neighbor indexes
//!
//! - GraphIndex: HNSW graph with slot recycling, growth and eviction
//! - IndexStore: registry that loads, backfills and evicts user indexes
mod graph;
mod registry;

pub use graph::{GraphIndex, GraphParams, Neighbor};
pub use registry::{
    BackfillCursor, BulkIndexReport, FailedEntry, IndexStore, MaintenanceReport, UserIndex,
};
