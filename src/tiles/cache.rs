//! Decoded tile cache with need-based eviction

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tracing::debug;

use super::cell_key::CellKey;
use super::decode::DecodedTile;

#[derive(Debug)]
struct CacheEntry {
    tile: Arc<DecodedTile>,
    last_needed: u64,
}

/// Tiles keyed by `CellKey`. A tile in the current needed set is never
/// evicted, and a tile that stopped being needed last tick gets one tick of
/// grace. Everything else is dropped least-recently-needed first once the
/// cache holds more than `limit` tiles.
#[derive(Debug)]
pub struct TileCache {
    entries: HashMap<CellKey, CacheEntry>,
    limit: usize,
}

impl TileCache {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: HashMap::new(),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &CellKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &CellKey) -> Option<&Arc<DecodedTile>> {
        self.entries.get(key).map(|entry| &entry.tile)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CellKey> {
        self.entries.keys()
    }

    pub fn insert(&mut self, key: CellKey, tile: Arc<DecodedTile>, tick: u64) {
        self.entries.insert(key, CacheEntry { tile, last_needed: tick });
    }

    /// Refresh the need stamp of every cached key in `needed`.
    pub fn touch(&mut self, needed: &BTreeSet<CellKey>, tick: u64) {
        for key in needed {
            if let Some(entry) = self.entries.get_mut(key) {
                entry.last_needed = tick;
            }
        }
    }

    /// Nearest cached ancestor of `key`, used as a stand-in while `key` loads.
    pub fn donor(&self, key: &CellKey) -> Option<(CellKey, Arc<DecodedTile>)> {
        key.ancestors()
            .find_map(|ancestor| self.get(&ancestor).map(|tile| (ancestor.clone(), tile.clone())))
    }

    /// Drop unneeded tiles until the cache fits its limit. Returns the evicted
    /// keys, oldest need first.
    pub fn evict(&mut self, needed: &BTreeSet<CellKey>, tick: u64) -> Vec<CellKey> {
        if self.entries.len() <= self.limit {
            return Vec::new();
        }
        let mut candidates: Vec<(u64, CellKey)> = self
            .entries
            .iter()
            .filter(|(key, entry)| !needed.contains(*key) && entry.last_needed + 1 < tick)
            .map(|(key, entry)| (entry.last_needed, key.clone()))
            .collect();
        candidates.sort();

        let excess = self.entries.len() - self.limit;
        let evicted: Vec<CellKey> = candidates
            .into_iter()
            .take(excess)
            .map(|(_, key)| key)
            .collect();
        for key in &evicted {
            self.entries.remove(key);
        }
        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), remaining = self.entries.len(), "tile cache eviction");
        }
        evicted
    }
}
