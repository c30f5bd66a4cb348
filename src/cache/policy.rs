//! Cache Item Policy Module
//!
//! Expiration, priority, dependency and callback settings supplied with an
//! insert, together with the validation every insert goes through.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::cache::monitor::{any_changed, dispose_all, ChangeMonitor, SharedMonitor};
use crate::cache::{MemoryCache, MAX_SLIDING_EXPIRATION_DAYS};
use crate::error::{CacheError, Result};

// == Priority ==
/// Eviction priority. `NotRemovable` entries are never trimmed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum CacheItemPriority {
    #[default]
    Default,
    NotRemovable,
}

impl FromStr for CacheItemPriority {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(CacheItemPriority::Default),
            "notremovable" | "not_removable" | "not-removable" => {
                Ok(CacheItemPriority::NotRemovable)
            }
            other => Err(CacheError::invalid(format!(
                "priority must be Default or NotRemovable, got '{}'",
                other
            ))),
        }
    }
}

impl TryFrom<i32> for CacheItemPriority {
    type Error = CacheError;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(CacheItemPriority::Default),
            1 => Ok(CacheItemPriority::NotRemovable),
            other => Err(CacheError::invalid(format!(
                "priority must be between 0 (Default) and 1 (NotRemovable), got {}",
                other
            ))),
        }
    }
}

// == Removed Reason ==
/// Why an entry left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CacheEntryRemovedReason {
    /// Explicit removal or replacement by a later set
    Removed,
    /// Absolute or sliding expiration elapsed
    Expired,
    /// Trimmed to relieve capacity pressure
    Evicted,
    /// A change monitor the entry depends on fired
    ChangeMonitorChanged,
    /// Released because the cache itself was disposed
    CacheSpecificEviction,
}

// == Callback Arguments ==
/// Passed to a removal callback after the entry has left its shard.
pub struct CacheEntryRemovedArguments<'a, V> {
    pub cache: &'a MemoryCache<V>,
    pub reason: CacheEntryRemovedReason,
    pub key: &'a str,
    pub value: &'a V,
}

/// Passed to an update callback when the entry's expiration or one of its
/// monitors fires.
pub struct CacheEntryUpdateArguments<'a, V> {
    pub cache: &'a MemoryCache<V>,
    pub reason: CacheEntryRemovedReason,
    pub key: &'a str,
}

/// What an update callback hands back. A value plus a renewable policy
/// re-arms the entry; anything else removes it.
pub struct UpdatedCacheItem<V> {
    pub value: Option<V>,
    pub policy: Option<CacheItemPolicy<V>>,
}

impl<V> UpdatedCacheItem<V> {
    /// Drop the entry.
    pub fn remove() -> Self {
        Self {
            value: None,
            policy: None,
        }
    }

    pub fn replace(value: V, policy: CacheItemPolicy<V>) -> Self {
        Self {
            value: Some(value),
            policy: Some(policy),
        }
    }
}

impl<V> Default for UpdatedCacheItem<V> {
    fn default() -> Self {
        Self::remove()
    }
}

pub type RemovedCallback<V> = Arc<dyn Fn(&CacheEntryRemovedArguments<'_, V>) + Send + Sync>;

pub type UpdateCallback<V> =
    Arc<dyn Fn(&CacheEntryUpdateArguments<'_, V>) -> UpdatedCacheItem<V> + Send + Sync>;

// == Cache Item Policy ==
/// Per-entry settings. `None` absolute expiration means infinite; `None`
/// or zero sliding expiration means no sliding.
pub struct CacheItemPolicy<V> {
    pub absolute_expiration: Option<DateTime<Utc>>,
    pub sliding_expiration: Option<TimeDelta>,
    pub priority: CacheItemPriority,
    pub change_monitors: Vec<SharedMonitor>,
    pub removed_callback: Option<RemovedCallback<V>>,
    pub update_callback: Option<UpdateCallback<V>>,
}

impl<V> CacheItemPolicy<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absolute_expiration(mut self, at: DateTime<Utc>) -> Self {
        self.absolute_expiration = Some(at);
        self
    }

    pub fn sliding_expiration(mut self, window: TimeDelta) -> Self {
        self.sliding_expiration = Some(window);
        self
    }

    pub fn priority(mut self, priority: CacheItemPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn change_monitor(mut self, monitor: Arc<dyn ChangeMonitor>) -> Self {
        self.change_monitors.push(monitor);
        self
    }

    pub fn on_removed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CacheEntryRemovedArguments<'_, V>) + Send + Sync + 'static,
    {
        self.removed_callback = Some(Arc::new(callback));
        self
    }

    pub fn on_update<F>(mut self, callback: F) -> Self
    where
        F: Fn(&CacheEntryUpdateArguments<'_, V>) -> UpdatedCacheItem<V> + Send + Sync + 'static,
    {
        self.update_callback = Some(Arc::new(callback));
        self
    }

    /// Sliding window if one is configured, `None` for zero.
    pub(crate) fn effective_sliding(&self) -> Option<TimeDelta> {
        self.sliding_expiration.filter(|w| !w.is_zero())
    }

    // == Validate ==
    /// Checks the policy without side effects.
    pub fn validate(&self) -> Result<()> {
        let sliding = self.sliding_expiration.unwrap_or_else(TimeDelta::zero);

        if self.absolute_expiration.is_some() && !sliding.is_zero() {
            return Err(CacheError::invalid(
                "absolute and sliding expiration cannot both be set",
            ));
        }

        if sliding < TimeDelta::zero() || sliding > TimeDelta::days(MAX_SLIDING_EXPIRATION_DAYS) {
            return Err(CacheError::invalid(format!(
                "sliding expiration must be between 0 and {} days",
                MAX_SLIDING_EXPIRATION_DAYS
            )));
        }

        if self.removed_callback.is_some() && self.update_callback.is_some() {
            return Err(CacheError::invalid(
                "removed callback and update callback cannot both be set",
            ));
        }

        Ok(())
    }

    /// Validates, disposing the policy's monitors on rejection since the
    /// caller handed them over either way.
    pub(crate) fn validate_or_dispose(&self) -> Result<()> {
        self.validate().inspect_err(|_| dispose_all(&self.change_monitors))
    }

    pub(crate) fn dispose_monitors(&self) {
        dispose_all(&self.change_monitors);
    }

    /// True when an update callback result may re-arm its entry: it must
    /// carry an update callback and none of its monitors may have fired
    /// already, or the new entry would fire again immediately. Monitors of
    /// a non-renewable policy are disposed.
    pub(crate) fn is_renewable(&self) -> bool {
        if self.update_callback.is_some() && !any_changed(&self.change_monitors) {
            return true;
        }
        self.dispose_monitors();
        false
    }
}

impl<V> Default for CacheItemPolicy<V> {
    fn default() -> Self {
        Self {
            absolute_expiration: None,
            sliding_expiration: None,
            priority: CacheItemPriority::Default,
            change_monitors: Vec::new(),
            removed_callback: None,
            update_callback: None,
        }
    }
}

impl<V> Clone for CacheItemPolicy<V> {
    fn clone(&self) -> Self {
        Self {
            absolute_expiration: self.absolute_expiration,
            sliding_expiration: self.sliding_expiration,
            priority: self.priority,
            change_monitors: self.change_monitors.clone(),
            removed_callback: self.removed_callback.clone(),
            update_callback: self.update_callback.clone(),
        }
    }
}

impl<V> fmt::Debug for CacheItemPolicy<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheItemPolicy")
            .field("absolute_expiration", &self.absolute_expiration)
            .field("sliding_expiration", &self.sliding_expiration)
            .field("priority", &self.priority)
            .field("change_monitors", &self.change_monitors.len())
            .field("removed_callback", &self.removed_callback.is_some())
            .field("update_callback", &self.update_callback.is_some())
            .finish()
    }
}
