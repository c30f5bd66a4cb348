//! Memory Cache Module
//!
//! The public façade: routes every key to its shard, owns the shards and
//! the disposal lifecycle, and runs removal and update callbacks once the
//! shard lock that produced them has been released.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::cache::clock::{Clock, SharedClock, SystemClock};
use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;
use crate::cache::monitor::CacheEntryChangeMonitor;
use crate::cache::policy::{
    CacheEntryRemovedArguments, CacheEntryRemovedReason, CacheEntryUpdateArguments,
    CacheItemPolicy, UpdatedCacheItem,
};
use crate::cache::stats::{CacheCounters, CacheStats};
use crate::cache::store::{Insert, Released, Scan, ShardStore};
use crate::cache::{DEFAULT_CACHE_NAME, DEFAULT_POLLING_INTERVAL_SECS};
use crate::error::{CacheError, Result};

// == Cache Options ==
/// Construction-time settings of a cache.
#[derive(Clone)]
pub struct CacheOptions {
    /// Number of shards; `None` uses the available parallelism
    pub shard_count: Option<usize>,
    /// Return `CacheError::Disposed` after disposal instead of no-op defaults
    pub throw_on_disposed: bool,
    /// Time source for every expiration decision
    pub clock: SharedClock,
    /// Interval a host should run expiration scans at
    pub polling_interval: Duration,
}

impl CacheOptions {
    pub fn shard_count(mut self, count: usize) -> Self {
        self.shard_count = Some(count);
        self
    }

    pub fn throw_on_disposed(mut self, throw: bool) -> Self {
        self.throw_on_disposed = throw;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            shard_count: None,
            throw_on_disposed: false,
            clock: Arc::new(SystemClock),
            polling_interval: Duration::from_secs(DEFAULT_POLLING_INTERVAL_SECS),
        }
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("shard_count", &self.shard_count)
            .field("throw_on_disposed", &self.throw_on_disposed)
            .field("polling_interval", &self.polling_interval)
            .finish_non_exhaustive()
    }
}

fn default_shard_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

// == Cache Item ==
/// A key and the value stored under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheItem<V> {
    pub key: String,
    pub value: V,
}

// == Default Cache ==
/// Value type of the process-wide default cache.
pub type SharedValue = Arc<dyn Any + Send + Sync>;

static DEFAULT_CACHE: OnceCell<MemoryCache<SharedValue>> = OnceCell::new();

/// The process-wide cache named "Default", built on first use.
///
/// Prefer passing an explicit `MemoryCache` handle where one is available.
pub fn default_cache() -> MemoryCache<SharedValue> {
    DEFAULT_CACHE
        .get_or_init(|| MemoryCache::build(DEFAULT_CACHE_NAME.to_string(), CacheOptions::default()))
        .clone()
}

// == Scan Outcome ==
/// What became of a fired sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UpdateOutcome {
    /// The entry was already gone, or someone else removed it first.
    Skipped,
    Renewed,
    Removed,
}

/// Tally of one processed scan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Swept {
    removed: u64,
    renewed: u64,
}

impl Swept {
    fn record(&mut self, outcome: UpdateOutcome) {
        match outcome {
            UpdateOutcome::Skipped => {}
            UpdateOutcome::Renewed => self.renewed += 1,
            UpdateOutcome::Removed => self.removed += 1,
        }
    }
}

/// Splits `floor(total * percent / 100)` over the shards in proportion to
/// their removable counts. Rounding leftovers go to the shards with the
/// largest remainders, one each, so no shard is asked for more than it holds.
fn trim_budgets(counts: &[usize], percent: usize) -> Vec<usize> {
    let total: usize = counts.iter().sum();
    let target = total * percent / 100;
    let mut budgets: Vec<usize> = counts.iter().map(|c| c * percent / 100).collect();
    let mut leftover = target - budgets.iter().sum::<usize>();

    let mut order: Vec<usize> = (0..counts.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(counts[i] * percent % 100));
    for i in order {
        if leftover == 0 || counts[i] * percent % 100 == 0 {
            break;
        }
        budgets[i] += 1;
        leftover -= 1;
    }
    budgets
}

// == Memory Cache ==
struct CacheInner<V> {
    name: String,
    shards: Box<[ShardStore<V>]>,
    counters: Arc<CacheCounters>,
    disposed: AtomicBool,
    throw_on_disposed: bool,
    clock: SharedClock,
    polling_interval: Duration,
}

/// A sharded in-memory cache. Cloning yields another handle to the same
/// cache.
pub struct MemoryCache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for MemoryCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for MemoryCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCache")
            .field("name", &self.inner.name)
            .field("shards", &self.inner.shards.len())
            .field("disposed", &self.inner.disposed.load(Ordering::Acquire))
            .finish()
    }
}

impl<V> MemoryCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    // == Constructors ==
    pub fn new(name: &str) -> Result<Self> {
        Self::with_options(name, CacheOptions::default())
    }

    /// Builds a named cache. The name must be non-empty and "default" is
    /// reserved for `default_cache()`.
    pub fn with_options(name: &str, options: CacheOptions) -> Result<Self> {
        if name.is_empty() {
            return Err(CacheError::invalid("cache name must not be empty"));
        }
        if name.eq_ignore_ascii_case(DEFAULT_CACHE_NAME) {
            return Err(CacheError::invalid(format!(
                "the name '{}' is reserved for the default cache",
                name
            )));
        }
        Ok(Self::build(name.to_string(), options))
    }

    fn build(name: String, options: CacheOptions) -> Self {
        let shard_count = options
            .shard_count
            .filter(|count| *count > 0)
            .unwrap_or_else(default_shard_count);
        let counters = Arc::new(CacheCounters::new());
        let shards = (0..shard_count)
            .map(|_| ShardStore::new(Arc::clone(&counters)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        info!(cache = %name, shards = shard_count, "memory cache created");

        Self {
            inner: Arc::new(CacheInner {
                name,
                shards,
                counters,
                disposed: AtomicBool::new(false),
                throw_on_disposed: options.throw_on_disposed,
                clock: options.clock,
                polling_interval: options.polling_interval,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn shard_count(&self) -> usize {
        self.inner.shards.len()
    }

    pub fn polling_interval(&self) -> Duration {
        self.inner.polling_interval
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// `Ok(true)` when disposed and configured for silent no-ops.
    fn disposed_or_err(&self) -> Result<bool> {
        if !self.is_disposed() {
            return Ok(false);
        }
        if self.inner.throw_on_disposed {
            return Err(CacheError::Disposed(self.inner.name.clone()));
        }
        Ok(true)
    }

    fn store(&self, key: &CacheKey) -> &ShardStore<V> {
        &self.inner.shards[key.shard_index(self.inner.shards.len())]
    }

    /// Current time according to the cache's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    // == Regions ==
    /// Region-scoped access. Regions are not implemented, so any region
    /// name is rejected.
    pub fn in_region(&self, region: Option<&str>) -> Result<&Self> {
        match region {
            Some(_) => Err(CacheError::RegionNotSupported),
            None => Ok(self),
        }
    }

    // == Get ==
    pub fn get(&self, key: &str) -> Result<Option<V>> {
        Ok(self.get_entry(key)?.map(|entry| entry.value().clone()))
    }

    pub fn get_cache_item(&self, key: &str) -> Result<Option<CacheItem<V>>> {
        Ok(self.get(key)?.map(|value| CacheItem {
            key: key.to_string(),
            value,
        }))
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get_entry(key)?.is_some())
    }

    /// Looks up a live entry. Expired entries are removed on the spot; plain
    /// entries whose monitors fired are removed before anything is returned.
    pub fn get_entry(&self, key: &str) -> Result<Option<Arc<CacheEntry<V>>>> {
        if self.disposed_or_err()? {
            return Ok(None);
        }
        let key = CacheKey::new(key);
        let store = self.store(&key);

        let (entry, expired) = store.get(key.key(), self.now());
        if let Some(released) = expired {
            self.dispatch(vec![released]);
        }

        let entry = match entry {
            Some(entry) if !entry.is_updatable() && entry.monitors_changed() => {
                self.remove_exact(&entry, CacheEntryRemovedReason::ChangeMonitorChanged);
                None
            }
            other => other,
        };

        match entry {
            Some(_) => self.inner.counters.record_hit(),
            None => self.inner.counters.record_miss(),
        }
        Ok(entry)
    }

    /// Values of every live key in `keys`; absent keys are left out.
    pub fn get_values<I, K>(&self, keys: I) -> Result<HashMap<String, V>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let mut values = HashMap::new();
        if self.disposed_or_err()? {
            return Ok(values);
        }
        for key in keys {
            let key = key.as_ref();
            if let Some(value) = self.get(key)? {
                values.insert(key.to_string(), value);
            }
        }
        Ok(values)
    }

    // == Set ==
    /// Stores `value`, replacing whatever the key held. A policy with an
    /// update callback installs an updatable entry instead.
    pub fn set(&self, key: &str, value: V, policy: CacheItemPolicy<V>) -> Result<()> {
        policy.validate_or_dispose()?;
        if policy.update_callback.is_some()
            && policy.change_monitors.is_empty()
            && policy.absolute_expiration.is_none()
            && policy.effective_sliding().is_none()
        {
            return Err(CacheError::invalid(
                "an update callback needs an absolute expiration, a sliding expiration or change monitors",
            ));
        }
        if self.is_disposed() {
            policy.dispose_monitors();
            self.disposed_or_err()?;
            return Ok(());
        }

        let key = CacheKey::new(key);
        let store = self.store(&key);
        let entry = Arc::new(CacheEntry::new(key.into_key(), value, policy, self.now()));

        match store.set(Arc::clone(&entry), self.now()) {
            Insert::Inserted(released) => self.dispatch(released),
            Insert::Existing(_) | Insert::Disposed => {
                entry.release_monitors();
                return Ok(());
            }
        }
        self.check_inserted(&entry);
        Ok(())
    }

    /// Stores `value` with an absolute expiration, `None` meaning infinite.
    pub fn set_absolute(&self, key: &str, value: V, at: Option<DateTime<Utc>>) -> Result<()> {
        let policy = CacheItemPolicy {
            absolute_expiration: at,
            ..CacheItemPolicy::default()
        };
        self.set(key, value, policy)
    }

    // == Add Or Get Existing ==
    /// Inserts only when no live entry holds the key. Returns the value
    /// already stored, or `None` when this call inserted.
    pub fn add_or_get_existing(
        &self,
        key: &str,
        value: V,
        policy: CacheItemPolicy<V>,
    ) -> Result<Option<V>> {
        policy.validate_or_dispose()?;
        if policy.update_callback.is_some() {
            policy.dispose_monitors();
            return Err(CacheError::invalid(
                "update callbacks are not supported by add_or_get_existing",
            ));
        }
        if self.is_disposed() {
            policy.dispose_monitors();
            self.disposed_or_err()?;
            return Ok(None);
        }

        let key = CacheKey::new(key);
        let store = self.store(&key);
        let entry = Arc::new(CacheEntry::new(key.into_key(), value, policy, self.now()));

        loop {
            match store.add_or_get_existing(Arc::clone(&entry), self.now()) {
                Insert::Inserted(released) => {
                    self.dispatch(released);
                    self.check_inserted(&entry);
                    return Ok(None);
                }
                Insert::Existing(existing) => {
                    if !existing.is_updatable() && existing.monitors_changed() {
                        self.remove_exact(&existing, CacheEntryRemovedReason::ChangeMonitorChanged);
                        continue;
                    }
                    // The new entry was never inserted: no callback, just its monitors
                    entry.release_monitors();
                    return Ok(Some(existing.value().clone()));
                }
                Insert::Disposed => {
                    entry.release_monitors();
                    return Ok(None);
                }
            }
        }
    }

    /// Returns true when this call inserted the value.
    pub fn add(&self, key: &str, value: V, policy: CacheItemPolicy<V>) -> Result<bool> {
        Ok(self.add_or_get_existing(key, value, policy)?.is_none())
    }

    // == Remove ==
    pub fn remove(&self, key: &str) -> Result<Option<V>> {
        self.remove_with_reason(key, CacheEntryRemovedReason::Removed)
    }

    /// Removes the key, reporting `reason` to its removal callback.
    pub fn remove_with_reason(
        &self,
        key: &str,
        reason: CacheEntryRemovedReason,
    ) -> Result<Option<V>> {
        if self.disposed_or_err()? {
            return Ok(None);
        }
        let key = CacheKey::new(key);
        let Some(released) = self.store(&key).remove(key.key(), None, reason) else {
            return Ok(None);
        };
        let value = released.entry.value().clone();
        self.dispatch(vec![released]);
        Ok(Some(value))
    }

    /// Removes `entry` only if it is still the one stored under its key.
    /// Removes `entry` only if it is still the one stored under its key.
    /// Returns whether it was removed.
    fn remove_exact(&self, entry: &Arc<CacheEntry<V>>, reason: CacheEntryRemovedReason) -> bool {
        let key = CacheKey::new(entry.key());
        match self.store(&key).remove(key.key(), Some(entry), reason) {
            Some(released) => {
                self.dispatch(vec![released]);
                true
            }
            None => false,
        }
    }

    // == Trim ==
    /// Removes `percent` of the cache's removable entries, rounded down,
    /// expired ones first. Entries a monitor invalidated during the pass
    /// are removed too. Returns how many entries left the cache.
    pub fn trim(&self, percent: u8) -> Result<u64> {
        if self.disposed_or_err()? {
            return Ok(0);
        }
        let percent = percent.min(100);
        self.inner.counters.record_trim();
        let now = self.now();

        let counts: Vec<usize> = self
            .inner
            .shards
            .iter()
            .map(ShardStore::removable_len)
            .collect();
        let budgets = trim_budgets(&counts, usize::from(percent));

        let mut trimmed = 0u64;
        for (store, budget) in self.inner.shards.iter().zip(budgets) {
            let (scan, evicted) = store.trim(budget, now);
            trimmed += evicted.len() as u64;
            self.dispatch(evicted);
            trimmed += self.process_scan(store, scan).removed;
        }

        debug!(cache = %self.inner.name, percent, trimmed, "cache trimmed");
        Ok(trimmed)
    }

    // == Flush Expired ==
    /// Runs the expiration scan over every shard. Returns how many entries
    /// were removed, or renewed by their update callback.
    pub fn flush_expired(&self) -> Result<u64> {
        if self.disposed_or_err()? {
            return Ok(0);
        }
        let now = self.now();
        let mut flushed = 0u64;
        for store in self.inner.shards.iter() {
            let scan = store.flush_expired(now);
            let swept = self.process_scan(store, scan);
            flushed += swept.removed + swept.renewed;
        }
        Ok(flushed)
    }

    fn process_scan(&self, store: &ShardStore<V>, scan: Scan<V>) -> Swept {
        let Scan {
            expired,
            fired,
            monitored,
        } = scan;

        let mut swept = Swept {
            removed: expired.len() as u64,
            ..Swept::default()
        };
        self.dispatch(expired);

        for entry in fired {
            swept.record(self.run_update(&entry, CacheEntryRemovedReason::Expired));
        }

        for entry in monitored {
            if !entry.monitors_changed() {
                continue;
            }
            match entry.sentinel() {
                Some(sentinel) => {
                    if sentinel.try_fire() {
                        let reason = CacheEntryRemovedReason::ChangeMonitorChanged;
                        swept.record(self.run_update(&entry, reason));
                    }
                }
                None => {
                    let reason = CacheEntryRemovedReason::ChangeMonitorChanged;
                    if let Some(released) = store.remove(entry.key(), Some(&entry), reason) {
                        self.dispatch(vec![released]);
                        swept.removed += 1;
                    }
                }
            }
        }
        swept
    }

    // == Count / Enumerate ==
    /// Sum of the shard counts. Not consistent across shards.
    pub fn get_count(&self) -> Result<u64> {
        if self.disposed_or_err()? {
            return Ok(0);
        }
        Ok(self.inner.shards.iter().map(|s| s.len() as u64).sum())
    }

    /// Every live key/value pair, shard by shard.
    pub fn entries(&self) -> Result<Vec<(String, V)>> {
        if self.disposed_or_err()? {
            return Ok(Vec::new());
        }
        let now = self.now();
        Ok(self
            .inner
            .shards
            .iter()
            .flat_map(|store| store.snapshot(now))
            .collect())
    }

    pub fn stats(&self) -> CacheStats {
        let total = if self.is_disposed() {
            0
        } else {
            self.inner.shards.iter().map(|s| s.len() as u64).sum()
        };
        self.inner.counters.snapshot(total)
    }

    // == Entry Monitors ==
    /// A monitor that fires once any of `keys` leaves this cache.
    pub fn create_cache_entry_change_monitor<I, K>(&self, keys: I) -> Result<CacheEntryChangeMonitor>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys: Vec<String> = keys.into_iter().map(|k| k.as_ref().to_string()).collect();
        if keys.is_empty() {
            return Err(CacheError::invalid("keys must not be empty"));
        }
        let now = self.now();
        let watched = keys
            .iter()
            .map(|k| {
                let key = CacheKey::new(k.as_str());
                self.store(&key).removed_flag(key.key(), now)
            })
            .collect();
        Ok(CacheEntryChangeMonitor::new(
            self.inner.name.clone(),
            keys,
            watched,
        ))
    }

    // == Dispose ==
    /// Disposes the cache once; later calls do nothing. Every stored entry
    /// is released as `CacheSpecificEviction`.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(cache = %self.inner.name, "disposing memory cache");
        for store in self.inner.shards.iter() {
            let released = store.dispose();
            self.dispatch(released);
        }
    }

    // == Callbacks ==
    /// Disposes the monitors of released entries and invokes their removal
    /// callbacks. Must be called without any shard lock held.
    fn dispatch(&self, released: Vec<Released<V>>) {
        for Released { entry, reason } in released {
            entry.release_monitors();
            let Some(callback) = entry.removed_callback() else {
                continue;
            };
            let args = CacheEntryRemovedArguments {
                cache: self,
                reason,
                key: entry.key(),
                value: entry.value(),
            };
            if catch_unwind(AssertUnwindSafe(|| callback(&args))).is_err() {
                warn!(cache = %self.inner.name, key = %entry.key(), ?reason, "removed callback panicked");
            }
        }
    }

    /// Runs the update callback of a fired sentinel and either re-arms the
    /// key with the returned value or removes it. A panicking callback
    /// removes the key; the panic does not reach the caller.
    fn run_update(&self, entry: &Arc<CacheEntry<V>>, reason: CacheEntryRemovedReason) -> UpdateOutcome {
        let Some(sentinel) = entry.sentinel() else {
            return UpdateOutcome::Skipped;
        };
        // Removed or replaced out-of-band: drop the sentinel silently
        if entry.is_removed() {
            debug!(cache = %self.inner.name, key = %entry.key(), "updatable entry already gone");
            entry.release_monitors();
            return UpdateOutcome::Skipped;
        }

        self.inner.counters.record_update_callback();
        let callback = Arc::clone(sentinel.update_callback());
        let args = CacheEntryUpdateArguments {
            cache: self,
            reason,
            key: entry.key(),
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| callback(&args)));
        entry.release_monitors();

        let removed = match outcome {
            Ok(UpdatedCacheItem {
                value: Some(value),
                policy: Some(policy),
            }) => {
                if policy.is_renewable() {
                    match self.set(entry.key(), value, policy) {
                        Ok(()) => return UpdateOutcome::Renewed,
                        Err(err) => {
                            warn!(cache = %self.inner.name, key = %entry.key(), %err, "update rejected");
                        }
                    }
                }
                self.remove_exact(entry, CacheEntryRemovedReason::Removed)
            }
            Ok(item) => {
                if let Some(policy) = item.policy {
                    policy.dispose_monitors();
                }
                self.remove_exact(entry, CacheEntryRemovedReason::Removed)
            }
            Err(_) => {
                warn!(cache = %self.inner.name, key = %entry.key(), "update callback panicked; removing entry");
                self.remove_exact(entry, CacheEntryRemovedReason::Removed)
            }
        };
        if removed {
            UpdateOutcome::Removed
        } else {
            UpdateOutcome::Skipped
        }
    }

    /// Polls the monitors of a freshly inserted entry: one that already
    /// fired invalidates the entry right away.
    fn check_inserted(&self, entry: &Arc<CacheEntry<V>>) {
        if !entry.monitors_changed() {
            return;
        }
        match entry.sentinel() {
            Some(sentinel) => {
                if sentinel.try_fire() {
                    self.run_update(entry, CacheEntryRemovedReason::ChangeMonitorChanged);
                }
            }
            None => {
                self.remove_exact(entry, CacheEntryRemovedReason::ChangeMonitorChanged);
            }
        }
    }
}
