//! LRU Tracker Module
//!
//! Usage order of removable entries, consulted when a trim has to evict
//! beyond what has already expired.

use std::collections::BTreeMap;

// == LRU Tracker ==
/// Tracks access order for LRU eviction strategy.
///
/// Every touch hands out a fresh, strictly increasing tick:
/// - Lowest tick = Least recently used
/// - Highest tick = Most recently used
///
/// The shard stores the current tick next to each entry so that a touch
/// or removal never has to search the order.
#[derive(Debug, Default)]
pub struct LruTracker {
    /// Keys by last-use tick
    order: BTreeMap<u64, String>,
    next_tick: u64,
}

impl LruTracker {
    // == Constructor ==
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as recently used and returns its new tick.
    ///
    /// `previous` is the tick the key held before, if it was tracked.
    pub fn touch(&mut self, key: &str, previous: Option<u64>) -> u64 {
        let key = match previous.and_then(|tick| self.order.remove(&tick)) {
            Some(existing) => existing,
            None => key.to_string(),
        };
        let tick = self.next_tick;
        self.next_tick += 1;
        self.order.insert(tick, key);
        tick
    }

    // == Remove ==
    pub fn remove(&mut self, tick: u64) -> Option<String> {
        self.order.remove(&tick)
    }

    // == Evict Oldest ==
    /// Returns and removes the least recently used key.
    pub fn evict_oldest(&mut self) -> Option<String> {
        self.order.pop_first().map(|(_, key)| key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }
}
