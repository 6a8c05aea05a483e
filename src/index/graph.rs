/// Per-user HNSW graph index with slot recycling and capacity growth
use crate::config::IndexConfig;
use crate::error::{Result, SemdexError};
use crate::store::{EntryId, VectorId, VectorRecord};
use ahash::{AHashMap, AHashSet};
use hnsw_rs::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// hnsw_rs caps the layer count at 16
const MAX_LAYERS: usize = 16;

/// Tombstones tolerated before the graph is rebuilt from live slots
const MIN_STALE_FOR_COMPACTION: usize = 64;

/// Tunables shared by every user's graph
#[derive(Debug, Clone)]
pub struct GraphParams {
    pub initial_capacity: usize,
    pub max_capacity: usize,
    pub allow_growth: bool,
    pub hnsw_m: usize,
    pub ef_construction: usize,
    pub ef_search_floor: usize,
    pub ef_search_multiplier: usize,
    pub node_overhead_bytes: usize,
}

impl GraphParams {
    pub fn from_config(config: &IndexConfig, node_overhead_bytes: usize) -> Self {
        Self {
            initial_capacity: config.initial_capacity.max(1),
            max_capacity: config.max_capacity.max(config.initial_capacity.max(1)),
            allow_growth: config.allow_growth,
            hnsw_m: config.hnsw_m,
            ef_construction: config.hnsw_ef_construction,
            ef_search_floor: config.ef_search_floor,
            ef_search_multiplier: config.ef_search_multiplier,
            node_overhead_bytes,
        }
    }
}

/// Nearest neighbor returned by [`GraphIndex::search`]
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub vector_id: VectorId,
    pub entry_id: EntryId,
    /// Cosine distance (0.0 identical, 2.0 opposite)
    pub distance: f32,
}

impl Neighbor {
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

struct LiveSlot {
    vector_id: VectorId,
    entry_id: EntryId,
    vector: Vec<f32>,
}

enum Slot {
    Live(LiveSlot),
    /// `tombstoned` while the graph still holds the removed node
    Vacant { tombstoned: bool },
}

/// HNSW graph over one user's chunk vectors.
///
/// Slots are arena indices and double as hnsw data ids. hnsw_rs cannot delete
/// points, so a removed slot keeps its node in the graph (tombstone) while the
/// slot itself goes back to the free list. Search results are re-scored from
/// the arena, which makes stale nodes behind a recycled slot harmless. A
/// rebuild (growth or compaction) makes the graph forget tombstones.
pub struct GraphIndex {
    hnsw: Hnsw<'static, f32, DistCosine>,
    params: GraphParams,
    dimension: usize,
    capacity: usize,
    growth_enabled: bool,
    slots: Vec<Slot>,
    free_list: Vec<usize>,
    id_to_slot: AHashMap<VectorId, usize>,
    /// Ordered so eviction can take the oldest entries first
    entry_slots: BTreeMap<EntryId, Vec<usize>>,
    stale_nodes: usize,
}

impl GraphIndex {
    pub fn new(dimension: usize, params: GraphParams) -> Self {
        let capacity = params.initial_capacity;
        let growth_enabled = params.allow_growth && capacity < params.max_capacity;
        Self {
            hnsw: new_hnsw(&params, capacity),
            params,
            dimension,
            capacity,
            growth_enabled,
            slots: Vec::new(),
            free_list: Vec::new(),
            id_to_slot: AHashMap::new(),
            entry_slots: BTreeMap::new(),
            stale_nodes: 0,
        }
    }

    /// Insert records whose vector ids are not yet present.
    ///
    /// Returns the number of vectors actually added. Items that cannot fit
    /// once growth and eviction are exhausted are dropped with a warning.
    pub fn add_batch(&mut self, records: &[VectorRecord]) -> Result<usize> {
        for record in records {
            if record.embedding.len() != self.dimension {
                return Err(SemdexError::DimensionMismatch {
                    expected: self.dimension,
                    actual: record.embedding.len(),
                });
            }
        }

        let mut seen = AHashSet::new();
        let mut fresh: Vec<&VectorRecord> = records
            .iter()
            .filter(|r| !self.id_to_slot.contains_key(&r.vector_id) && seen.insert(r.vector_id))
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        let needed = fresh.len();
        if needed > self.available_slots() && self.growth_enabled {
            let required = self.slots.len() + needed - self.free_list.len();
            self.grow(required);
        }

        // Newest first so that, without room, older items are the ones dropped
        fresh.sort_by(|a, b| {
            b.parent_entry_id
                .cmp(&a.parent_entry_id)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });

        // An entry goes in whole or not at all
        let mut added = 0;
        let mut dropped = 0;
        for group in fresh.chunk_by(|a, b| a.parent_entry_id == b.parent_entry_id) {
            if !self.make_room(group[0].parent_entry_id, group.len()) {
                dropped += group.len();
                continue;
            }
            for record in group {
                self.insert(record);
            }
            added += group.len();
        }

        if dropped > 0 {
            warn!(
                dropped,
                capacity = self.capacity,
                "Graph index full, dropped vectors"
            );
        }

        Ok(added)
    }

    /// At most `k` nearest live vectors by cosine distance, closest first
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(SemdexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let live = self.len();
        if live == 0 || k == 0 {
            return Ok(Vec::new());
        }

        let k = k.min(live);
        // Ask for extra neighbors to make up for tombstones the graph may return
        let knbn = (k + self.stale_nodes).min(live + self.stale_nodes);
        let ef = self
            .params
            .ef_search_floor
            .max(knbn.saturating_mul(self.params.ef_search_multiplier));

        let found = self.hnsw.search(query, knbn, ef);

        let mut seen = AHashSet::new();
        let mut neighbors: Vec<Neighbor> = found
            .into_iter()
            .filter(|n| seen.insert(n.d_id))
            .filter_map(|n| match self.slots.get(n.d_id) {
                Some(Slot::Live(slot)) => Some(Neighbor {
                    vector_id: slot.vector_id,
                    entry_id: slot.entry_id,
                    distance: cosine_distance(query, &slot.vector),
                }),
                _ => None,
            })
            .collect();

        neighbors.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.vector_id.cmp(&b.vector_id))
        });
        neighbors.truncate(k);

        Ok(neighbors)
    }

    /// Remove every slot owned by the given entries; returns slots freed
    pub fn remove_entries(&mut self, entry_ids: &[EntryId]) -> usize {
        let mut removed = 0;
        for entry_id in entry_ids {
            removed += self.release_entry(*entry_id);
        }

        if removed > 0 {
            debug!(removed, "Removed vectors from graph index");
            self.maybe_compact();
        }

        removed
    }

    /// Number of live vectors
    pub fn len(&self) -> usize {
        self.id_to_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entry_count(&self) -> usize {
        self.entry_slots.len()
    }

    pub fn contains(&self, vector_id: VectorId) -> bool {
        self.id_to_slot.contains_key(&vector_id)
    }

    pub fn contains_entry(&self, entry_id: EntryId) -> bool {
        self.entry_slots.contains_key(&entry_id)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn growth_enabled(&self) -> bool {
        self.growth_enabled
    }

    /// Toggle growth; enabling has no effect once the capacity cap is reached
    pub fn set_growth(&mut self, enabled: bool) {
        self.growth_enabled = enabled && self.capacity < self.params.max_capacity;
    }

    /// Nodes the graph still holds for removed vectors
    pub fn stale_nodes(&self) -> usize {
        self.stale_nodes
    }

    pub fn slot_of(&self, vector_id: VectorId) -> Option<usize> {
        self.id_to_slot.get(&vector_id).copied()
    }

    pub fn id_at(&self, slot: usize) -> Option<VectorId> {
        match self.slots.get(slot) {
            Some(Slot::Live(live)) => Some(live.vector_id),
            _ => None,
        }
    }

    /// Heuristic footprint: capacity times vector payload plus link overhead
    pub fn estimated_bytes(&self) -> usize {
        let per_node = self.dimension * std::mem::size_of::<f32>()
            + self.params.hnsw_m * 2 * std::mem::size_of::<usize>()
            + self.params.node_overhead_bytes;
        self.capacity * per_node
    }

    /// Verify the id↔slot bookkeeping; returns a description of the first violation
    pub fn check_invariants(&self) -> std::result::Result<(), String> {
        let live_slots = self
            .slots
            .iter()
            .filter(|s| matches!(s, Slot::Live(_)))
            .count();
        if live_slots != self.id_to_slot.len() {
            return Err(format!(
                "{} live slots but {} id mappings",
                live_slots,
                self.id_to_slot.len()
            ));
        }

        for (vector_id, slot) in &self.id_to_slot {
            if self.id_at(*slot) != Some(*vector_id) {
                return Err(format!("id {} maps to slot {} which disagrees", vector_id, slot));
            }
        }

        let mut free = AHashSet::new();
        for slot in &self.free_list {
            if !free.insert(*slot) {
                return Err(format!("slot {} is on the free list twice", slot));
            }
            if !matches!(self.slots.get(*slot), Some(Slot::Vacant { .. })) {
                return Err(format!("free slot {} is not vacant", slot));
            }
        }
        if free.len() + live_slots != self.slots.len() {
            return Err("vacant slot missing from the free list".to_string());
        }

        let owned: usize = self.entry_slots.values().map(Vec::len).sum();
        if owned != live_slots {
            return Err(format!(
                "entries own {} slots but {} are live",
                owned, live_slots
            ));
        }
        if self.slots.len() > self.capacity {
            return Err("slot count exceeds capacity".to_string());
        }

        Ok(())
    }

    fn available_slots(&self) -> usize {
        self.free_list.len() + self.capacity.saturating_sub(self.slots.len())
    }

    fn insert(&mut self, record: &VectorRecord) {
        let slot = match self.free_list.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot::Vacant { tombstoned: false });
                self.slots.len() - 1
            }
        };

        self.hnsw.insert_slice((record.embedding.as_slice(), slot));
        self.slots[slot] = Slot::Live(LiveSlot {
            vector_id: record.vector_id,
            entry_id: record.parent_entry_id,
            vector: record.embedding.clone(),
        });
        self.id_to_slot.insert(record.vector_id, slot);
        self.entry_slots
            .entry(record.parent_entry_id)
            .or_default()
            .push(slot);
    }

    fn release_entry(&mut self, entry_id: EntryId) -> usize {
        let Some(slots) = self.entry_slots.remove(&entry_id) else {
            return 0;
        };

        for slot in &slots {
            let previous = std::mem::replace(
                &mut self.slots[*slot],
                Slot::Vacant { tombstoned: true },
            );
            if let Slot::Live(live) = previous {
                self.id_to_slot.remove(&live.vector_id);
            }
            self.free_list.push(*slot);
            self.stale_nodes += 1;
        }

        slots.len()
    }

    /// Free `needed` slots for `incoming`, evicting only entries older than it.
    ///
    /// Nothing is evicted when even that would not free enough room.
    fn make_room(&mut self, incoming: EntryId, needed: usize) -> bool {
        let available = self.available_slots();
        if available >= needed {
            return true;
        }

        let reclaimable: usize = self
            .entry_slots
            .range(..incoming)
            .map(|(_, slots)| slots.len())
            .sum();
        if available + reclaimable < needed {
            return false;
        }

        while self.available_slots() < needed {
            if !self.evict_older_than(incoming) {
                return false;
            }
        }
        true
    }

    /// Evict the oldest entry if it is older than `incoming`
    fn evict_older_than(&mut self, incoming: EntryId) -> bool {
        let Some(oldest) = self.entry_slots.keys().next().copied() else {
            return false;
        };
        if oldest >= incoming {
            return false;
        }

        let freed = self.release_entry(oldest);
        debug!(entry_id = oldest, freed, "Evicted oldest entry to make room");
        freed > 0
    }

    fn grow(&mut self, required: usize) {
        let target = (self.capacity * 2)
            .max(required)
            .min(self.params.max_capacity);
        if target <= self.capacity {
            self.growth_enabled = false;
            return;
        }

        info!(
            from = self.capacity,
            to = target,
            live = self.len(),
            "Growing graph index"
        );
        self.capacity = target;
        self.rebuild();

        if self.capacity >= self.params.max_capacity {
            info!(capacity = self.capacity, "Graph index reached max capacity, growth disabled");
            self.growth_enabled = false;
        }
    }

    fn maybe_compact(&mut self) {
        if self.stale_nodes > MIN_STALE_FOR_COMPACTION && self.stale_nodes > self.len() {
            debug!(
                stale = self.stale_nodes,
                live = self.len(),
                "Compacting graph index"
            );
            self.rebuild();
        }
    }

    /// Build a fresh graph from live slots and swap it in
    fn rebuild(&mut self) {
        let hnsw = new_hnsw(&self.params, self.capacity);
        for (slot, state) in self.slots.iter_mut().enumerate() {
            match state {
                Slot::Live(live) => hnsw.insert_slice((live.vector.as_slice(), slot)),
                Slot::Vacant { tombstoned } => *tombstoned = false,
            }
        }
        self.hnsw = hnsw;
        self.stale_nodes = 0;
    }
}

fn new_hnsw(params: &GraphParams, capacity: usize) -> Hnsw<'static, f32, DistCosine> {
    Hnsw::<f32, DistCosine>::new(
        params.hnsw_m,
        capacity,
        MAX_LAYERS,
        params.ef_construction,
        DistCosine,
    )
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}
