//! Cache Module
//!
//! Sharded in-memory object cache with absolute and sliding expiration,
//! change-monitor invalidation, removal and update callbacks, and
//! percentage trimming.

mod clock;
mod entry;
mod expires;
mod key;
mod lru;
mod memory_cache;
mod monitor;
mod policy;
mod stats;
mod store;


// Re-export public types
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use entry::{CacheEntry, SentinelEntry};
pub use key::CacheKey;
pub use memory_cache::{default_cache, CacheItem, CacheOptions, MemoryCache, SharedValue};
pub use monitor::{CacheEntryChangeMonitor, ChangeMonitor, SharedMonitor, SignalMonitor};
pub use policy::{
    CacheEntryRemovedArguments, CacheEntryRemovedReason, CacheEntryUpdateArguments,
    CacheItemPolicy, CacheItemPriority, RemovedCallback, UpdateCallback, UpdatedCacheItem,
};
pub use stats::{CacheCounters, CacheStats, EntryLimitAdvisor, NeverTrim, TrimAdvisor};

// == Public Constants ==
/// Longest sliding expiration a policy may carry
pub const MAX_SLIDING_EXPIRATION_DAYS: i64 = 365;

/// Name reserved for the process-wide default cache
pub const DEFAULT_CACHE_NAME: &str = "Default";

/// Expiration scan interval hosts use unless configured otherwise
pub const DEFAULT_POLLING_INTERVAL_SECS: u64 = 20;
