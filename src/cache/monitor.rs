//! Change Monitor Module
//!
//! Dependency capability consumed by the cache. A monitor reports whether
//! some outside condition has changed; the cache polls it on reads and
//! during expiration scans, never while a shard lock is held, and disposes
//! it once the entry carrying it is gone.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// External dependency an entry can be invalidated by.
///
/// `has_changed` must be monotonic: once it returns `true` it keeps doing so.
pub trait ChangeMonitor: Send + Sync {
    fn has_changed(&self) -> bool;

    /// Releases whatever the monitor holds. Must be idempotent.
    fn dispose(&self);

    fn is_disposed(&self) -> bool;
}

/// Shared monitor handle. The policy owns one reference, callers may keep
/// others to drive the monitor.
pub type SharedMonitor = Arc<dyn ChangeMonitor>;

pub(crate) fn any_changed(monitors: &[SharedMonitor]) -> bool {
    monitors.iter().any(|m| m.has_changed())
}

pub(crate) fn dispose_all(monitors: &[SharedMonitor]) {
    for monitor in monitors {
        monitor.dispose();
    }
}

// == Signal Monitor ==
/// A monitor flipped by hand, e.g. from a file watcher or a config reload.
#[derive(Debug, Default)]
pub struct SignalMonitor {
    changed: AtomicBool,
    disposed: AtomicBool,
}

impl SignalMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn signal_changed(&self) {
        self.changed.store(true, Ordering::Release);
    }
}

impl ChangeMonitor for SignalMonitor {
    fn has_changed(&self) -> bool {
        self.changed.load(Ordering::Acquire)
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

// == Cache Entry Change Monitor ==
/// Watches entries of a cache by key.
///
/// Reports a change once any entry that was live when the monitor was
/// created leaves the cache (removed, expired, evicted or replaced). A key
/// with no live entry at creation counts as already changed.
#[derive(Debug)]
pub struct CacheEntryChangeMonitor {
    keys: Vec<String>,
    cache_name: String,
    watched: Vec<Option<Arc<AtomicBool>>>,
    disposed: AtomicBool,
}

impl CacheEntryChangeMonitor {
    /// `watched[i]` is the removed-flag of the entry live under `keys[i]`.
    pub(crate) fn new(
        cache_name: String,
        keys: Vec<String>,
        watched: Vec<Option<Arc<AtomicBool>>>,
    ) -> Self {
        debug_assert_eq!(keys.len(), watched.len());
        Self {
            keys,
            cache_name,
            watched,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }
}

impl ChangeMonitor for CacheEntryChangeMonitor {
    fn has_changed(&self) -> bool {
        self.watched.iter().any(|flag| match flag {
            Some(removed) => removed.load(Ordering::Acquire),
            None => true,
        })
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_monitor_is_monotonic() {
        let monitor = SignalMonitor::new();
        assert!(!monitor.has_changed());
        monitor.signal_changed();
        assert!(monitor.has_changed());
        assert!(monitor.has_changed());
    }

    #[test]
    fn test_dispose_all() {
        let a = SignalMonitor::shared();
        let b = SignalMonitor::shared();
        let monitors: Vec<SharedMonitor> = vec![a.clone(), b.clone()];

        assert!(!any_changed(&monitors));
        b.signal_changed();
        assert!(any_changed(&monitors));

        dispose_all(&monitors);
        assert!(a.is_disposed());
        assert!(b.is_disposed());
    }

    #[test]
    fn test_entry_monitor_missing_key_is_changed() {
        let monitor = CacheEntryChangeMonitor::new(
            "test".to_string(),
            vec!["gone".to_string()],
            vec![None],
        );
        assert!(monitor.has_changed());
    }

    #[test]
    fn test_entry_monitor_tracks_removed_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let monitor = CacheEntryChangeMonitor::new(
            "test".to_string(),
            vec!["a".to_string()],
            vec![Some(flag.clone())],
        );
        assert!(!monitor.has_changed());

        flag.store(true, Ordering::Release);
        assert!(monitor.has_changed());
        assert_eq!(monitor.keys(), ["a".to_string()]);
    }
}
