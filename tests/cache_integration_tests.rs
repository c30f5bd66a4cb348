//! Integration Tests for the Cache Library
//!
//! Exercises the public `MemoryCache` surface the way an embedding
//! application would.

use std::sync::Arc;

use chrono::TimeDelta;
use parking_lot::Mutex;
use shard_cache::cache::{
    default_cache, CacheEntryRemovedReason, CacheItemPolicy, CacheItemPriority, CacheOptions,
    ChangeMonitor, Clock, ManualClock, MemoryCache, SharedValue, SignalMonitor, UpdatedCacheItem,
};
use shard_cache::CacheError;

type Policy = CacheItemPolicy<String>;

fn cache() -> (MemoryCache<String>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::starting_now());
    let options = CacheOptions::default().shard_count(8).clock(clock.clone());
    (MemoryCache::with_options("integration", options).unwrap(), clock)
}

#[test]
fn test_sliding_expiration_refresh() {
    let (cache, clock) = cache();
    let policy = Policy::new().sliding_expiration(TimeDelta::seconds(2));
    cache.set("s", "v".to_string(), policy).unwrap();

    for _ in 0..10 {
        clock.advance(TimeDelta::seconds(1));
        assert_eq!(cache.get("s").unwrap().as_deref(), Some("v"));
    }

    clock.advance(TimeDelta::seconds(3));
    assert_eq!(cache.get("s").unwrap(), None);
}

#[test]
fn test_expiration_reasons_reported_by_scan() {
    let (cache, clock) = cache();
    let reasons = Arc::new(Mutex::new(Vec::new()));

    for i in 0..5 {
        let sink = reasons.clone();
        let policy = Policy::new()
            .absolute_expiration(clock.now() + TimeDelta::seconds(1))
            .on_removed(move |args| sink.lock().push(args.reason));
        cache.set(&format!("k{}", i), i.to_string(), policy).unwrap();
    }

    clock.advance(TimeDelta::seconds(5));
    assert_eq!(cache.flush_expired().unwrap(), 5);
    assert_eq!(
        *reasons.lock(),
        vec![CacheEntryRemovedReason::Expired; 5]
    );
    assert_eq!(cache.stats().expirations, 5);
    assert_eq!(cache.get_count().unwrap(), 0);
}

#[test]
fn test_dependent_entries_via_entry_monitor() {
    let (cache, _) = cache();
    cache.set("config", "v1".to_string(), Policy::new()).unwrap();

    let monitor = Arc::new(cache.create_cache_entry_change_monitor(["config"]).unwrap());
    assert_eq!(monitor.cache_name(), "integration");
    let derived = Policy::new().change_monitor(monitor.clone());
    cache.set("rendered", "page(v1)".to_string(), derived).unwrap();

    cache.remove("config").unwrap();
    assert!(monitor.has_changed());

    // The scan drops dependants without a read
    assert_eq!(cache.flush_expired().unwrap(), 1);
    assert_eq!(cache.get_count().unwrap(), 0);
    assert!(monitor.is_disposed());
}

#[test]
fn test_entry_monitor_on_missing_key_fires_immediately() {
    let (cache, _) = cache();
    let monitor = Arc::new(cache.create_cache_entry_change_monitor(["absent"]).unwrap());
    cache
        .set("dependant", "v".to_string(), Policy::new().change_monitor(monitor))
        .unwrap();
    assert_eq!(cache.get("dependant").unwrap(), None);
}

#[test]
fn test_refresh_ahead_with_update_callback() {
    let (cache, clock) = cache();
    let refreshes = Arc::new(Mutex::new(0u32));
    let counter = refreshes.clone();

    fn refresh_policy(
        at: chrono::DateTime<chrono::Utc>,
        counter: Arc<Mutex<u32>>,
    ) -> CacheItemPolicy<String> {
        CacheItemPolicy::<String>::new().absolute_expiration(at).on_update(move |args| {
            let mut count = counter.lock();
            *count += 1;
            if *count >= 3 {
                return UpdatedCacheItem::remove();
            }
            let next = args.cache.now() + TimeDelta::seconds(10);
            UpdatedCacheItem::replace(format!("v{}", *count + 1), refresh_policy(next, counter.clone()))
        })
    }

    cache
        .set("feed", "v1".to_string(), refresh_policy(clock.now() + TimeDelta::seconds(10), counter))
        .unwrap();

    for expected in ["v2", "v3"] {
        clock.advance(TimeDelta::seconds(11));
        cache.flush_expired().unwrap();
        assert_eq!(cache.get("feed").unwrap().as_deref(), Some(expected));
    }

    clock.advance(TimeDelta::seconds(11));
    cache.flush_expired().unwrap();
    assert_eq!(cache.get("feed").unwrap(), None);
    assert_eq!(*refreshes.lock(), 3);
    assert_eq!(cache.stats().update_callbacks, 3);
}

#[test]
fn test_replacing_updatable_entry_drops_its_sentinel() {
    let (cache, clock) = cache();
    let monitor = SignalMonitor::shared();
    let policy = Policy::new()
        .absolute_expiration(clock.now() + TimeDelta::seconds(1))
        .change_monitor(monitor.clone())
        .on_update(|_| UpdatedCacheItem::replace("never".to_string(), Policy::new()));
    cache.set("k", "first".to_string(), policy).unwrap();

    cache.set("k", "second".to_string(), Policy::new()).unwrap();
    assert!(monitor.is_disposed());

    clock.advance(TimeDelta::seconds(5));
    cache.flush_expired().unwrap();
    assert_eq!(cache.get("k").unwrap().as_deref(), Some("second"));
}

#[test]
fn test_not_removable_survives_trim_until_removed() {
    let (cache, _) = cache();
    let pinned = Policy::new().priority(CacheItemPriority::NotRemovable);
    cache.set("pinned", "p".to_string(), pinned).unwrap();

    for _ in 0..3 {
        cache.trim(100).unwrap();
    }
    assert!(cache.contains("pinned").unwrap());

    assert_eq!(cache.remove("pinned").unwrap().as_deref(), Some("p"));
    assert!(!cache.contains("pinned").unwrap());
}

#[test]
fn test_remove_with_reason() {
    let (cache, _) = cache();
    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = reasons.clone();
    cache
        .set(
            "k",
            "v".to_string(),
            Policy::new().on_removed(move |args| sink.lock().push(args.reason)),
        )
        .unwrap();

    cache
        .remove_with_reason("k", CacheEntryRemovedReason::Evicted)
        .unwrap();
    assert_eq!(*reasons.lock(), vec![CacheEntryRemovedReason::Evicted]);
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn test_get_cache_item_and_regions() {
    let (cache, _) = cache();
    cache.set("k", "v".to_string(), Policy::new()).unwrap();

    let item = cache.in_region(None).unwrap().get_cache_item("k").unwrap().unwrap();
    assert_eq!(item.key, "k");
    assert_eq!(item.value, "v");

    assert_eq!(
        cache.in_region(Some("eu")).unwrap_err(),
        CacheError::RegionNotSupported
    );
}

#[test]
fn test_get_entry_exposes_stored_policy() {
    let (cache, clock) = cache();
    let deadline = clock.now() + TimeDelta::minutes(5);
    let policy = Policy::new()
        .absolute_expiration(deadline)
        .priority(CacheItemPriority::NotRemovable);
    cache.set("k", "v".to_string(), policy).unwrap();

    let entry = cache.get_entry("k").unwrap().unwrap();
    assert_eq!(entry.key(), "k");
    assert_eq!(entry.absolute_expiration(), Some(deadline));
    assert_eq!(entry.priority(), CacheItemPriority::NotRemovable);
    assert!(entry.sliding_expiration().is_none());
    assert!(!entry.is_updatable());

    // Refresh-ahead entries keep their value pinned; expiration lives on the sentinel
    let policy = Policy::new()
        .absolute_expiration(deadline)
        .on_update(|_| UpdatedCacheItem::remove());
    cache.set("u", "v".to_string(), policy).unwrap();
    let entry = cache.get_entry("u").unwrap().unwrap();
    assert!(entry.absolute_expiration().is_none());
    assert!(entry.sentinel().is_some_and(|s| !s.has_fired()));
}

#[test]
fn test_default_cache_holds_any_value() {
    let cache = default_cache();
    assert_eq!(cache.name(), "Default");

    let value: SharedValue = Arc::new(42u64);
    cache
        .set("integration-answer", value, CacheItemPolicy::new())
        .unwrap();

    let stored = default_cache().get("integration-answer").unwrap().unwrap();
    assert_eq!(stored.downcast_ref::<u64>(), Some(&42));
    default_cache().remove("integration-answer").unwrap();
}

#[test]
fn test_named_caches_are_independent() {
    let a = MemoryCache::<String>::new("a").unwrap();
    let b = MemoryCache::<String>::new("b").unwrap();

    a.set("k", "from a".to_string(), Policy::new()).unwrap();
    assert_eq!(b.get("k").unwrap(), None);

    a.dispose();
    b.set("k", "from b".to_string(), Policy::new()).unwrap();
    assert_eq!(b.get("k").unwrap().as_deref(), Some("from b"));
}
