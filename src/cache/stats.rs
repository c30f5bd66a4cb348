//! Cache Statistics Module
//!
//! Shared performance counters, the serializable snapshot built from them,
//! and the trim advisor the maintenance task consults.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::cache::policy::CacheEntryRemovedReason;

// == Cache Counters ==
/// Counters shared by every shard of one cache.
#[derive(Debug, Default)]
pub struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    removals: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
    monitor_changes: AtomicU64,
    disposal_evictions: AtomicU64,
    update_callbacks: AtomicU64,
    trims: AtomicU64,
}

impl CacheCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_update_callback(&self) {
        self.update_callbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trim(&self) {
        self.trims.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an entry leaving its shard under the given reason.
    pub fn record_removal(&self, reason: CacheEntryRemovedReason) {
        let counter = match reason {
            CacheEntryRemovedReason::Removed => &self.removals,
            CacheEntryRemovedReason::Expired => &self.expirations,
            CacheEntryRemovedReason::Evicted => &self.evictions,
            CacheEntryRemovedReason::ChangeMonitorChanged => &self.monitor_changes,
            CacheEntryRemovedReason::CacheSpecificEviction => &self.disposal_evictions,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    pub fn snapshot(&self, total_entries: u64) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            monitor_changes: self.monitor_changes.load(Ordering::Relaxed),
            disposal_evictions: self.disposal_evictions.load(Ordering::Relaxed),
            update_callbacks: self.update_callbacks.load(Ordering::Relaxed),
            trims: self.trims.load(Ordering::Relaxed),
            total_entries,
        }
    }
}

// == Cache Stats ==
/// Point-in-time view of the counters. Not transactionally consistent
/// across shards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Successful lookups
    pub hits: u64,
    /// Lookups that found nothing or an expired entry
    pub misses: u64,
    /// Entries inserted by set or add
    pub inserts: u64,
    /// Explicit removals and replacements
    pub removals: u64,
    /// Entries removed because their expiration elapsed
    pub expirations: u64,
    /// Entries trimmed for capacity
    pub evictions: u64,
    /// Entries removed because a change monitor fired
    pub monitor_changes: u64,
    /// Entries released when the cache was disposed
    pub disposal_evictions: u64,
    /// Update callbacks invoked
    pub update_callbacks: u64,
    /// Trim passes run
    pub trims: u64,
    /// Live entry count across all shards
    pub total_entries: u64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Trim Advisor ==
/// Decides whether proactive trimming should happen. Consulted on every
/// maintenance tick; returns the percentage to trim, 0 for none.
pub trait TrimAdvisor: Send + Sync {
    fn trim_percent(&self, stats: &CacheStats) -> u8;
}

/// Never asks for a trim.
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverTrim;

impl TrimAdvisor for NeverTrim {
    fn trim_percent(&self, _stats: &CacheStats) -> u8 {
        0
    }
}

/// Asks for enough trimming to bring the entry count back under a limit.
#[derive(Debug, Clone, Copy)]
pub struct EntryLimitAdvisor {
    limit: u64,
}

impl EntryLimitAdvisor {
    /// A limit of 0 disables trimming.
    pub fn new(limit: u64) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }
}

impl TrimAdvisor for EntryLimitAdvisor {
    fn trim_percent(&self, stats: &CacheStats) -> u8 {
        let total = stats.total_entries;
        if self.limit == 0 || total <= self.limit {
            return 0;
        }
        let over = total - self.limit;
        let percent = (over * 100).div_ceil(total);
        percent.clamp(1, 100) as u8
    }
}
