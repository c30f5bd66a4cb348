//! Request DTOs for the cache admin API
//!
//! Defines the structure of incoming HTTP request bodies and how they map
//! onto cache item policies.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;

use crate::cache::{CacheItemPolicy, CacheItemPriority};
use crate::error::{CacheError, Result};

/// Maximum accepted key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Expiration and priority settings shared by the write endpoints.
///
/// Both expirations are given in seconds; the absolute one is relative to
/// the moment the request is handled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyFields {
    #[serde(default)]
    pub absolute_expiration_secs: Option<u64>,
    #[serde(default)]
    pub sliding_expiration_secs: Option<u64>,
    /// "Default" or "NotRemovable"
    #[serde(default)]
    pub priority: Option<String>,
}

fn seconds(secs: u64, field: &str) -> Result<TimeDelta> {
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .ok_or_else(|| CacheError::invalid(format!("{} is out of range", field)))
}

impl PolicyFields {
    /// Builds the item policy. Combination rules are left to the cache.
    pub fn to_policy<V>(&self, now: DateTime<Utc>) -> Result<CacheItemPolicy<V>> {
        let mut policy = CacheItemPolicy::new();
        if let Some(secs) = self.absolute_expiration_secs {
            let at = now
                .checked_add_signed(seconds(secs, "absolute_expiration_secs")?)
                .ok_or_else(|| CacheError::invalid("absolute_expiration_secs is out of range"))?;
            policy = policy.absolute_expiration(at);
        }
        if let Some(secs) = self.sliding_expiration_secs {
            policy = policy.sliding_expiration(seconds(secs, "sliding_expiration_secs")?);
        }
        if let Some(priority) = &self.priority {
            policy = policy.priority(priority.parse::<CacheItemPriority>()?);
        }
        Ok(policy)
    }
}

fn validate_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("Key cannot be empty".to_string());
    }
    if key.len() > MAX_KEY_LENGTH {
        return Some(format!(
            "Key exceeds maximum length of {} characters",
            MAX_KEY_LENGTH
        ));
    }
    None
}

/// Request body for the SET operation (PUT /set)
#[derive(Debug, Clone, Deserialize)]
pub struct SetRequest {
    /// The cache key
    pub key: String,
    /// The value to store
    pub value: String,
    #[serde(flatten)]
    pub policy: PolicyFields,
}

impl SetRequest {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        validate_key(&self.key)
    }
}

/// Request body for the ADD operation (POST /add)
///
/// Inserts only when the key holds no live entry.
#[derive(Debug, Clone, Deserialize)]
pub struct AddRequest {
    pub key: String,
    pub value: String,
    #[serde(flatten)]
    pub policy: PolicyFields,
}

impl AddRequest {
    pub fn validate(&self) -> Option<String> {
        validate_key(&self.key)
    }
}

/// Request body for the TRIM operation (POST /trim)
#[derive(Debug, Clone, Deserialize)]
pub struct TrimRequest {
    /// Percentage of removable entries to evict, 0 to 100
    pub percent: u8,
}

impl TrimRequest {
    pub fn validate(&self) -> Option<String> {
        if self.percent > 100 {
            return Some("Percent must be between 0 and 100".to_string());
        }
        None
    }
}
