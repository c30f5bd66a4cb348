//! Configuration Module
//!
//! Handles loading the hosted cache's configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{CacheOptions, DEFAULT_POLLING_INTERVAL_SECS};

/// Host configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the hosted cache
    pub cache_name: String,
    /// Shard count; 0 means one per available core
    pub shard_count: usize,
    /// Fail operations on a disposed cache instead of ignoring them
    pub throw_on_disposed: bool,
    /// Maintenance task interval in seconds
    pub polling_interval: u64,
    /// Entry count the maintenance task trims back to; 0 disables trimming
    pub entry_limit: u64,
    /// HTTP server port
    pub server_port: u16,
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_NAME` - Hosted cache name (default: "host")
    /// - `SHARD_COUNT` - Shards, 0 for one per core (default: 0)
    /// - `THROW_ON_DISPOSED` - Error on use after disposal (default: false)
    /// - `POLLING_INTERVAL` - Maintenance frequency in seconds (default: 20)
    /// - `ENTRY_LIMIT` - Trim threshold, 0 disables (default: 0)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_name: env::var("CACHE_NAME")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.cache_name),
            shard_count: env_or("SHARD_COUNT", defaults.shard_count),
            throw_on_disposed: env_or("THROW_ON_DISPOSED", defaults.throw_on_disposed),
            polling_interval: env_or("POLLING_INTERVAL", defaults.polling_interval),
            entry_limit: env_or("ENTRY_LIMIT", defaults.entry_limit),
            server_port: env_or("SERVER_PORT", defaults.server_port),
        }
    }

    /// Cache construction options derived from this configuration.
    pub fn cache_options(&self) -> CacheOptions {
        let mut options = CacheOptions::default()
            .throw_on_disposed(self.throw_on_disposed)
            .polling_interval(Duration::from_secs(self.polling_interval.max(1)));
        if self.shard_count > 0 {
            options = options.shard_count(self.shard_count);
        }
        options
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_name: "host".to_string(),
            shard_count: 0,
            throw_on_disposed: false,
            polling_interval: DEFAULT_POLLING_INTERVAL_SECS,
            entry_limit: 0,
            server_port: 3000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.cache_name, "host");
        assert_eq!(config.shard_count, 0);
        assert!(!config.throw_on_disposed);
        assert_eq!(config.polling_interval, 20);
        assert_eq!(config.entry_limit, 0);
        assert_eq!(config.server_port, 3000);
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars to test defaults
        env::remove_var("CACHE_NAME");
        env::remove_var("SHARD_COUNT");
        env::remove_var("THROW_ON_DISPOSED");
        env::remove_var("POLLING_INTERVAL");
        env::remove_var("ENTRY_LIMIT");
        env::remove_var("SERVER_PORT");

        let config = Config::from_env();
        assert_eq!(config.cache_name, "host");
        assert_eq!(config.polling_interval, 20);
        assert_eq!(config.server_port, 3000);
    }

    #[test]
    fn test_cache_options() {
        let config = Config {
            shard_count: 3,
            throw_on_disposed: true,
            polling_interval: 0,
            ..Config::default()
        };
        let options = config.cache_options();
        assert_eq!(options.shard_count, Some(3));
        assert!(options.throw_on_disposed);
        assert_eq!(options.polling_interval, Duration::from_secs(1));

        assert_eq!(Config::default().cache_options().shard_count, None);
    }
}
