//! Cache Store Module
//!
//! One shard of a memory cache: a key/entry table, an expiration index and
//! an LRU order behind a single lock. Entries that leave the shard are
//! handed back to the caller as `Released` so callbacks and monitor
//! disposal run after the lock is dropped.

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::entry::CacheEntry;
use crate::cache::expires::ExpiresIndex;
use crate::cache::lru::LruTracker;
use crate::cache::policy::CacheEntryRemovedReason;
use crate::cache::stats::CacheCounters;

// == Store Results ==
/// An entry that left the shard and the reason it left.
pub struct Released<V> {
    pub entry: Arc<CacheEntry<V>>,
    pub reason: CacheEntryRemovedReason,
}

/// Outcome of an insert attempt.
pub enum Insert<V> {
    /// Inserted; carries whatever it displaced.
    Inserted(Vec<Released<V>>),
    /// A live entry already held the key and was left untouched.
    Existing(Arc<CacheEntry<V>>),
    /// The shard was disposed; nothing was inserted.
    Disposed,
}

/// Result of an expiration scan.
pub struct Scan<V> {
    /// Plain entries whose deadline passed, already removed
    pub expired: Vec<Released<V>>,
    /// Updatable entries whose sentinel deadline passed; still stored
    pub fired: Vec<Arc<CacheEntry<V>>>,
    /// Entries with monitors still to be polled outside the lock
    pub monitored: Vec<Arc<CacheEntry<V>>>,
}

impl<V> Default for Scan<V> {
    fn default() -> Self {
        Self {
            expired: Vec::new(),
            fired: Vec::new(),
            monitored: Vec::new(),
        }
    }
}

// == Slot ==
struct Slot<V> {
    entry: Arc<CacheEntry<V>>,
    /// Deadline currently held in the expiration index
    expires_at: Option<DateTime<Utc>>,
    /// Tick currently held in the LRU order (removable entries only)
    lru_tick: Option<u64>,
}

impl<V> Slot<V> {
    /// Updatable entries keep their value past the sentinel deadline.
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.entry.is_updatable()
            && self.expires_at.is_some_and(|at| self.entry.is_due(at, now))
    }
}

struct ShardState<V> {
    entries: HashMap<String, Slot<V>>,
    expires: ExpiresIndex,
    lru: LruTracker,
    disposed: bool,
}

impl<V> ShardState<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            expires: ExpiresIndex::new(),
            lru: LruTracker::new(),
            disposed: false,
        }
    }

    fn insert(&mut self, entry: Arc<CacheEntry<V>>, now: DateTime<Utc>) {
        let expires_at = entry.initial_expiry(now);
        if let Some(at) = expires_at {
            self.expires.insert(at, entry.id(), entry.key());
        }
        let lru_tick = if entry.is_removable() {
            Some(self.lru.touch(entry.key(), None))
        } else {
            None
        };
        self.entries.insert(
            entry.key().to_string(),
            Slot {
                entry,
                expires_at,
                lru_tick,
            },
        );
    }

    /// Unlinks the slot from every structure and flags the entry removed.
    fn take(&mut self, key: &str) -> Option<Arc<CacheEntry<V>>> {
        let slot = self.entries.remove(key)?;
        if let Some(at) = slot.expires_at {
            self.expires.remove(at, slot.entry.id());
        }
        if let Some(tick) = slot.lru_tick {
            self.lru.remove(tick);
        }
        slot.entry.mark_removed();
        Some(slot.entry)
    }

    /// Refreshes sliding expiration and LRU position after a use.
    fn touch(&mut self, key: &str, now: DateTime<Utc>) -> Option<Arc<CacheEntry<V>>> {
        let slot = self.entries.get_mut(key)?;
        if let (Some(window), Some(at)) = (slot.entry.sliding_expiration(), slot.expires_at) {
            let next = now + window;
            self.expires.reschedule(at, next, slot.entry.id());
            slot.expires_at = Some(next);
        }
        if let Some(tick) = slot.lru_tick {
            slot.lru_tick = Some(self.lru.touch(key, Some(tick)));
        }
        Some(Arc::clone(&slot.entry))
    }
}

// == Shard Store ==
/// A single independently locked shard.
pub struct ShardStore<V> {
    state: Mutex<ShardState<V>>,
    counters: Arc<CacheCounters>,
}

impl<V> ShardStore<V> {
    // == Constructor ==
    pub fn new(counters: Arc<CacheCounters>) -> Self {
        Self {
            state: Mutex::new(ShardState::new()),
            counters,
        }
    }

    fn release(&self, entry: Arc<CacheEntry<V>>, reason: CacheEntryRemovedReason) -> Released<V> {
        self.counters.record_removal(reason);
        Released { entry, reason }
    }

    // == Get ==
    /// Looks up a live entry, refreshing its sliding expiration and LRU
    /// position. An entry found past its deadline is removed inline and
    /// returned as released instead.
    ///
    /// Change monitors are not polled here; the caller does that after the
    /// lock is gone.
    pub fn get(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> (Option<Arc<CacheEntry<V>>>, Option<Released<V>>) {
        let mut state = self.state.lock();
        if state.disposed {
            return (None, None);
        }

        let expired = match state.entries.get(key) {
            Some(slot) => slot.is_expired(now),
            None => return (None, None),
        };

        if expired {
            let released = state
                .take(key)
                .map(|entry| self.release(entry, CacheEntryRemovedReason::Expired));
            return (None, released);
        }

        (state.touch(key, now), None)
    }

    // == Set ==
    /// Inserts unconditionally, releasing any previous entry as `Removed`.
    pub fn set(&self, entry: Arc<CacheEntry<V>>, now: DateTime<Utc>) -> Insert<V> {
        let mut state = self.state.lock();
        if state.disposed {
            return Insert::Disposed;
        }

        let mut released = Vec::new();
        if let Some(old) = state.take(entry.key()) {
            released.push(self.release(old, CacheEntryRemovedReason::Removed));
        }
        state.insert(entry, now);
        self.counters.record_insert();

        Insert::Inserted(released)
    }

    // == Add Or Get Existing ==
    /// Inserts only if no live entry holds the key. An expired holder is
    /// released as `Expired` and replaced; a live one is touched and returned.
    pub fn add_or_get_existing(&self, entry: Arc<CacheEntry<V>>, now: DateTime<Utc>) -> Insert<V> {
        let mut state = self.state.lock();
        if state.disposed {
            return Insert::Disposed;
        }

        let mut released = Vec::new();
        match state.entries.get(entry.key()).map(|slot| slot.is_expired(now)) {
            Some(false) => {
                if let Some(existing) = state.touch(entry.key(), now) {
                    return Insert::Existing(existing);
                }
            }
            Some(true) => {
                if let Some(old) = state.take(entry.key()) {
                    released.push(self.release(old, CacheEntryRemovedReason::Expired));
                }
            }
            None => {}
        }

        state.insert(entry, now);
        self.counters.record_insert();
        Insert::Inserted(released)
    }

    // == Remove ==
    /// Removes the entry under `key`. With `expected`, removes only if that
    /// exact entry is still the one stored.
    pub fn remove(
        &self,
        key: &str,
        expected: Option<&Arc<CacheEntry<V>>>,
        reason: CacheEntryRemovedReason,
    ) -> Option<Released<V>> {
        let mut state = self.state.lock();
        if state.disposed {
            return None;
        }

        let matches = match state.entries.get(key) {
            Some(slot) => expected.map_or(true, |e| Arc::ptr_eq(e, &slot.entry)),
            None => false,
        };
        if !matches {
            return None;
        }

        state.take(key).map(|entry| self.release(entry, reason))
    }

    // == Flush Expired ==
    /// Expiration scan: removes due plain entries, fires due sentinels and
    /// collects entries whose monitors still need polling.
    pub fn flush_expired(&self, now: DateTime<Utc>) -> Scan<V> {
        let mut state = self.state.lock();
        if state.disposed {
            return Scan::default();
        }
        self.scan_locked(&mut state, now)
    }

    fn scan_locked(&self, state: &mut ShardState<V>, now: DateTime<Utc>) -> Scan<V> {
        let mut scan = Scan::default();

        let mut not_yet = Vec::new();
        for (id, key) in state.expires.drain_due(now) {
            let fired = match state.entries.get_mut(&key) {
                Some(slot) if slot.entry.id() == id => {
                    if let Some(at) = slot.expires_at.filter(|at| !slot.entry.is_due(*at, now)) {
                        not_yet.push((at, id, key));
                        continue;
                    }
                    slot.expires_at = None;
                    if slot.entry.is_updatable() {
                        Some(Arc::clone(&slot.entry))
                    } else {
                        None
                    }
                }
                _ => continue,
            };

            match fired {
                Some(entry) => {
                    if entry.sentinel().is_some_and(|s| s.try_fire()) {
                        scan.fired.push(entry);
                    }
                }
                None => {
                    if let Some(entry) = state.take(&key) {
                        scan.expired
                            .push(self.release(entry, CacheEntryRemovedReason::Expired));
                    }
                }
            }
        }

        for (at, id, key) in not_yet {
            state.expires.insert(at, id, &key);
        }

        scan.monitored = state
            .entries
            .values()
            .filter(|slot| slot.entry.has_monitors())
            .filter(|slot| !slot.entry.sentinel().is_some_and(|s| s.has_fired()))
            .map(|slot| Arc::clone(&slot.entry))
            .collect();

        scan
    }

    // == Trim ==
    /// Flushes expired entries, then evicts least recently used removable
    /// entries until `budget` entries are gone, expired ones included.
    /// NotRemovable entries are never evicted here.
    pub fn trim(&self, budget: usize, now: DateTime<Utc>) -> (Scan<V>, Vec<Released<V>>) {
        let mut state = self.state.lock();
        if state.disposed {
            return (Scan::default(), Vec::new());
        }

        let scan = self.scan_locked(&mut state, now);
        let remaining = budget.saturating_sub(scan.expired.len());

        let mut evicted = Vec::with_capacity(remaining);
        while evicted.len() < remaining {
            let Some(key) = state.lru.evict_oldest() else {
                break;
            };
            if let Some(slot) = state.entries.get_mut(&key) {
                slot.lru_tick = None;
            }
            if let Some(entry) = state.take(&key) {
                evicted.push(self.release(entry, CacheEntryRemovedReason::Evicted));
            }
        }

        if !evicted.is_empty() || !scan.expired.is_empty() {
            debug!(
                expired = scan.expired.len(),
                evicted = evicted.len(),
                budget,
                "shard trimmed"
            );
        }

        (scan, evicted)
    }

    /// Entries trim may evict, expired ones not yet scanned included.
    pub fn removable_len(&self) -> usize {
        self.state.lock().lru.len()
    }

    // == Removed Flag ==
    /// Removed-flag of the live entry under `key`, for entry monitors.
    pub fn removed_flag(&self, key: &str, now: DateTime<Utc>) -> Option<Arc<AtomicBool>> {
        let state = self.state.lock();
        if state.disposed {
            return None;
        }
        state
            .entries
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| slot.entry.removed_flag())
    }

    // == Length ==
    /// Entries currently stored, including expired ones not yet scanned.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    // == Dispose ==
    /// One-shot teardown. Releases every entry as `CacheSpecificEviction`;
    /// afterwards every operation on this shard is a no-op.
    pub fn dispose(&self) -> Vec<Released<V>> {
        let mut state = self.state.lock();
        if state.disposed {
            return Vec::new();
        }
        state.disposed = true;
        state.expires.clear();
        state.lru.clear();

        let drained: Vec<Slot<V>> = state.entries.drain().map(|(_, slot)| slot).collect();
        drained
            .into_iter()
            .map(|slot| {
                slot.entry.mark_removed();
                self.release(slot.entry, CacheEntryRemovedReason::CacheSpecificEviction)
            })
            .collect()
    }
}

impl<V: Clone> ShardStore<V> {
    // == Snapshot ==
    /// Live key/value pairs, skipping anything already past its deadline.
    pub fn snapshot(&self, now: DateTime<Utc>) -> Vec<(String, V)> {
        let state = self.state.lock();
        state
            .entries
            .iter()
            .filter(|(_, slot)| !slot.is_expired(now))
            .map(|(key, slot)| (key.clone(), slot.entry.value().clone()))
            .collect()
    }
}
