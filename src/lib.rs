//! Shard Cache - A sharded in-memory object cache
//!
//! Keys are spread over independently locked shards. Entries carry
//! absolute or sliding expiration, change-monitor dependencies, removal or
//! update callbacks, and a priority that shields them from trimming.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::{default_cache, CacheItemPolicy, MemoryCache};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::spawn_maintenance_task;
