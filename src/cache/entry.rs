//! Cache Entry Module
//!
//! Defines the immutable record stored in a shard. Entries are never
//! mutated in place: a later set replaces the whole `Arc`, so a reader
//! holding the old one never sees a half-updated entry.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};

use crate::cache::monitor::{any_changed, dispose_all, SharedMonitor};
use crate::cache::policy::{CacheItemPolicy, CacheItemPriority, RemovedCallback, UpdateCallback};

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

// == Entry Kind ==
/// Plain entries expire on their own schedule. Updatable entries keep their
/// value indefinitely and hand expiration to their sentinel, which asks the
/// update callback for a replacement.
pub enum EntryKind<V> {
    Plain,
    Updatable(SentinelEntry<V>),
}

// == Sentinel Entry ==
/// Expiration, dependencies and update callback of an updatable entry.
pub struct SentinelEntry<V> {
    /// Absolute deadline, or insertion time plus the sliding window.
    deadline: Option<DateTime<Utc>>,
    /// The deadline came from a sliding window.
    sliding: bool,
    change_monitors: Vec<SharedMonitor>,
    update_callback: UpdateCallback<V>,
    fired: AtomicBool,
}

impl<V> SentinelEntry<V> {
    pub fn update_callback(&self) -> &UpdateCallback<V> {
        &self.update_callback
    }

    /// Returns true for the single caller allowed to run the update.
    pub fn try_fire(&self) -> bool {
        !self.fired.swap(true, Ordering::AcqRel)
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

// == Cache Entry ==
/// A stored key/value pair and the policy it was inserted with.
pub struct CacheEntry<V> {
    id: u64,
    key: String,
    value: V,
    absolute_expiration: Option<DateTime<Utc>>,
    sliding_expiration: Option<TimeDelta>,
    priority: CacheItemPriority,
    change_monitors: Vec<SharedMonitor>,
    removed_callback: Option<RemovedCallback<V>>,
    kind: EntryKind<V>,
    /// Set once, when the entry leaves its shard.
    removed: Arc<AtomicBool>,
}

impl<V> CacheEntry<V> {
    // == Constructor ==
    /// Builds an entry from an already validated policy.
    ///
    /// A policy carrying an update callback produces an updatable entry:
    /// the value itself is NotRemovable and never expires, the policy's
    /// expiration and monitors move to the sentinel.
    pub fn new(key: String, value: V, policy: CacheItemPolicy<V>, now: DateTime<Utc>) -> Self {
        let sliding = policy.effective_sliding();
        let CacheItemPolicy {
            absolute_expiration,
            priority,
            change_monitors,
            removed_callback,
            update_callback,
            ..
        } = policy;

        let id = NEXT_ENTRY_ID.fetch_add(1, Ordering::Relaxed);
        let removed = Arc::new(AtomicBool::new(false));

        match update_callback {
            Some(update_callback) => Self {
                id,
                key,
                value,
                absolute_expiration: None,
                sliding_expiration: None,
                priority: CacheItemPriority::NotRemovable,
                change_monitors: Vec::new(),
                removed_callback: None,
                kind: EntryKind::Updatable(SentinelEntry {
                    deadline: absolute_expiration.or_else(|| sliding.map(|w| now + w)),
                    sliding: absolute_expiration.is_none() && sliding.is_some(),
                    change_monitors,
                    update_callback,
                    fired: AtomicBool::new(false),
                }),
                removed,
            },
            None => Self {
                id,
                key,
                value,
                absolute_expiration,
                sliding_expiration: sliding,
                priority,
                change_monitors,
                removed_callback,
                kind: EntryKind::Plain,
                removed,
            },
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn absolute_expiration(&self) -> Option<DateTime<Utc>> {
        self.absolute_expiration
    }

    pub fn sliding_expiration(&self) -> Option<TimeDelta> {
        self.sliding_expiration
    }

    pub fn priority(&self) -> CacheItemPriority {
        self.priority
    }

    pub fn is_removable(&self) -> bool {
        self.priority == CacheItemPriority::Default
    }

    pub fn removed_callback(&self) -> Option<&RemovedCallback<V>> {
        self.removed_callback.as_ref()
    }

    pub fn sentinel(&self) -> Option<&SentinelEntry<V>> {
        match &self.kind {
            EntryKind::Updatable(sentinel) => Some(sentinel),
            EntryKind::Plain => None,
        }
    }

    pub fn is_updatable(&self) -> bool {
        matches!(self.kind, EntryKind::Updatable(_))
    }

    // == Expiration ==
    /// Deadline the expiration index should hold for a fresh insert.
    pub fn initial_expiry(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.kind {
            EntryKind::Plain => self
                .absolute_expiration
                .or_else(|| self.sliding_expiration.map(|w| now + w)),
            EntryKind::Updatable(sentinel) => sentinel.deadline,
        }
    }

    /// Whether `deadline` has passed at `now`. A sliding window expires
    /// only once the gap exceeds it; an absolute deadline expires on reach.
    pub fn is_due(&self, deadline: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let sliding = match &self.kind {
            EntryKind::Plain => self.sliding_expiration.is_some(),
            EntryKind::Updatable(sentinel) => sentinel.sliding,
        };
        if sliding {
            deadline < now
        } else {
            deadline <= now
        }
    }

    /// Whether the entry's own monitors report a change. For an updatable
    /// entry these are the sentinel's monitors.
    pub fn monitors_changed(&self) -> bool {
        match &self.kind {
            EntryKind::Plain => any_changed(&self.change_monitors),
            EntryKind::Updatable(sentinel) => any_changed(&sentinel.change_monitors),
        }
    }

    pub fn has_monitors(&self) -> bool {
        match &self.kind {
            EntryKind::Plain => !self.change_monitors.is_empty(),
            EntryKind::Updatable(sentinel) => !sentinel.change_monitors.is_empty(),
        }
    }

    // == Removal State ==
    /// Flips the removed flag. Only the first call returns true.
    pub(crate) fn mark_removed(&self) -> bool {
        !self.removed.swap(true, Ordering::AcqRel)
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    pub(crate) fn removed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.removed)
    }

    /// Disposes every monitor the entry holds.
    pub(crate) fn release_monitors(&self) {
        dispose_all(&self.change_monitors);
        if let EntryKind::Updatable(sentinel) = &self.kind {
            dispose_all(&sentinel.change_monitors);
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::policy::UpdatedCacheItem;
    use crate::cache::{ChangeMonitor, SignalMonitor};

    fn entry(policy: CacheItemPolicy<&'static str>, now: DateTime<Utc>) -> CacheEntry<&'static str> {
        CacheEntry::new("k".to_string(), "v", policy, now)
    }

    #[test]
    fn test_infinite_entry_has_no_expiry() {
        let now = Utc::now();
        let e = entry(CacheItemPolicy::new(), now);
        assert!(e.initial_expiry(now).is_none());
        assert!(e.is_removable());
        assert!(!e.is_updatable());
    }

    #[test]
    fn test_sliding_expiry_from_now() {
        let now = Utc::now();
        let e = entry(
            CacheItemPolicy::new().sliding_expiration(TimeDelta::seconds(2)),
            now,
        );
        assert_eq!(e.initial_expiry(now), Some(now + TimeDelta::seconds(2)));
    }

    #[test]
    fn test_sliding_due_only_past_window() {
        let now = Utc::now();
        let deadline = now + TimeDelta::seconds(2);
        let sliding = entry(
            CacheItemPolicy::new().sliding_expiration(TimeDelta::seconds(2)),
            now,
        );
        assert!(!sliding.is_due(deadline, deadline));
        assert!(sliding.is_due(deadline, deadline + TimeDelta::milliseconds(1)));

        let absolute = entry(CacheItemPolicy::new().absolute_expiration(deadline), now);
        assert!(absolute.is_due(deadline, deadline));
        assert!(!absolute.is_due(deadline, now));
    }

    #[test]
    fn test_zero_sliding_is_none() {
        let now = Utc::now();
        let e = entry(
            CacheItemPolicy::new().sliding_expiration(TimeDelta::zero()),
            now,
        );
        assert!(e.sliding_expiration().is_none());
        assert!(e.initial_expiry(now).is_none());
    }

    #[test]
    fn test_update_policy_builds_sentinel() {
        let now = Utc::now();
        let monitor = SignalMonitor::shared();
        let policy = CacheItemPolicy::new()
            .absolute_expiration(now + TimeDelta::seconds(10))
            .change_monitor(monitor.clone())
            .on_update(|_| UpdatedCacheItem::remove());
        let e = entry(policy, now);

        assert!(e.is_updatable());
        assert_eq!(e.priority(), CacheItemPriority::NotRemovable);
        assert!(e.absolute_expiration().is_none());
        assert_eq!(e.initial_expiry(now), Some(now + TimeDelta::seconds(10)));
        assert!(e.has_monitors());
        assert!(!e.monitors_changed());

        monitor.signal_changed();
        assert!(e.monitors_changed());

        let sentinel = e.sentinel().unwrap();
        assert!(sentinel.try_fire());
        assert!(!sentinel.try_fire());
    }

    #[test]
    fn test_mark_removed_once() {
        let e = entry(CacheItemPolicy::new(), Utc::now());
        let flag = e.removed_flag();
        assert!(e.mark_removed());
        assert!(!e.mark_removed());
        assert!(flag.load(Ordering::Acquire));
    }

    #[test]
    fn test_release_disposes_monitors() {
        let monitor = SignalMonitor::shared();
        let e = entry(
            CacheItemPolicy::new().change_monitor(monitor.clone()),
            Utc::now(),
        );
        e.release_monitors();
        assert!(monitor.is_disposed());
    }

    #[test]
    fn test_entry_ids_unique() {
        let now = Utc::now();
        let a = entry(CacheItemPolicy::new(), now);
        let b = entry(CacheItemPolicy::new(), now);
        assert_ne!(a.id(), b.id());
    }
}
