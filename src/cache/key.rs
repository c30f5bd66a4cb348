//! Cache Key Module
//!
//! Immutable key + precomputed hash used to route an operation to a shard.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

// == Cache Key ==
/// A key paired with its 32-bit hash, computed once per operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    key: String,
    hash: i32,
}

impl CacheKey {
    // == Constructor ==
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        let hash = string_hash(&key);
        Self { key, hash }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn hash(&self) -> i32 {
        self.hash
    }

    pub fn into_key(self) -> String {
        self.key
    }

    // == Shard Index ==
    /// Returns `abs(hash) mod shard_count`; `i32::MIN` routes to shard 0.
    pub fn shard_index(&self, shard_count: usize) -> usize {
        let hash = if self.hash == i32::MIN {
            0
        } else {
            self.hash.unsigned_abs()
        };
        hash as usize % shard_count.max(1)
    }
}

/// Deterministic hash of the string content, folded to 32 bits.
fn string_hash(key: &str) -> i32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let h = hasher.finish();
    (h ^ (h >> 32)) as u32 as i32
}
