//! Cache Maintenance Task
//!
//! Background task that periodically runs the expiration scan over every
//! shard and trims when the configured advisor asks for it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{MemoryCache, TrimAdvisor};

/// Spawns the maintenance loop for `cache`.
///
/// Every `interval` the task flushes expired entries (firing update
/// callbacks and polling change monitors), then consults `advisor` and
/// trims by the percentage it returns. The loop ends on its own once the
/// cache has been disposed.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cache = MemoryCache::<String>::new("sessions")?;
/// let handle = spawn_maintenance_task(cache.clone(), cache.polling_interval(), Arc::new(NeverTrim));
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_maintenance_task<V>(
    cache: MemoryCache<V>,
    interval: Duration,
    advisor: Arc<dyn TrimAdvisor>,
) -> JoinHandle<()>
where
    V: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        info!(
            cache = %cache.name(),
            "Starting cache maintenance task with interval of {:?}",
            interval
        );

        loop {
            tokio::time::sleep(interval).await;

            if cache.is_disposed() {
                info!(cache = %cache.name(), "Cache disposed, stopping maintenance task");
                break;
            }

            match cache.flush_expired() {
                Ok(0) => debug!("Maintenance: no expired entries found"),
                Ok(flushed) => info!("Maintenance: flushed {} expired entries", flushed),
                Err(err) => {
                    warn!(%err, "Maintenance: expiration scan failed");
                    continue;
                }
            }

            let percent = advisor.trim_percent(&cache.stats());
            if percent == 0 {
                continue;
            }
            match cache.trim(percent) {
                Ok(trimmed) => info!("Maintenance: trimmed {} entries ({}%)", trimmed, percent),
                Err(err) => warn!(%err, "Maintenance: trim failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheItemPolicy, CacheOptions, EntryLimitAdvisor, NeverTrim};
    use chrono::{TimeDelta, Utc};

    fn cache() -> MemoryCache<String> {
        let options = CacheOptions::default().shard_count(2);
        MemoryCache::with_options("maintenance", options).unwrap()
    }

    #[tokio::test]
    async fn test_maintenance_flushes_expired_entries() {
        let cache = cache();
        let policy = CacheItemPolicy::new().absolute_expiration(Utc::now() + TimeDelta::milliseconds(200));
        cache.set("expire_soon", "value".to_string(), policy).unwrap();

        let handle = spawn_maintenance_task(cache.clone(), Duration::from_millis(100), Arc::new(NeverTrim));

        tokio::time::sleep(Duration::from_millis(600)).await;

        // Counted by the scan, not by a read
        assert_eq!(cache.stats().expirations, 1);
        assert_eq!(cache.get_count().unwrap(), 0);

        handle.abort();
    }

    #[tokio::test]
    async fn test_maintenance_preserves_valid_entries() {
        let cache = cache();
        let policy = CacheItemPolicy::new().absolute_expiration(Utc::now() + TimeDelta::hours(1));
        cache.set("long_lived", "value".to_string(), policy).unwrap();

        let handle = spawn_maintenance_task(cache.clone(), Duration::from_millis(50), Arc::new(NeverTrim));
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(cache.get("long_lived").unwrap(), Some("value".to_string()));
        handle.abort();
    }

    #[tokio::test]
    async fn test_maintenance_trims_over_limit() {
        let cache = cache();
        for i in 0..20 {
            cache.set(&format!("k{}", i), i.to_string(), CacheItemPolicy::new()).unwrap();
        }

        let advisor = Arc::new(EntryLimitAdvisor::new(10));
        let handle = spawn_maintenance_task(cache.clone(), Duration::from_millis(50), advisor);
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(cache.get_count().unwrap() <= 10);
        assert!(cache.stats().evictions >= 10);
        handle.abort();
    }

    #[tokio::test]
    async fn test_maintenance_stops_after_dispose() {
        let cache = cache();
        let handle = spawn_maintenance_task(cache.clone(), Duration::from_millis(20), Arc::new(NeverTrim));

        cache.dispose();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handle.is_finished(), "Task should stop once the cache is disposed");
    }

    #[tokio::test]
    async fn test_maintenance_can_be_aborted() {
        let handle = spawn_maintenance_task(cache(), Duration::from_secs(1), Arc::new(NeverTrim));

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
