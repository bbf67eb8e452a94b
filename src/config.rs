//! Configuration Module
//!
//! Handles loading and managing cache and server configuration from
//! environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::CacheBuilder;

/// Cache and server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of entries the cache can hold (0 = unbounded)
    pub max_entries: usize,
    /// Default TTL in seconds for `set` (0 = never expires)
    pub default_ttl: u64,
    /// Grace window in seconds during which expired values are still served
    pub expire_delay: u64,
    /// Synchronous set timeout in milliseconds (0 = asynchronous sets)
    pub sync_set_timeout_ms: u64,
    /// Whether deletes wait for the pipeline
    pub sync_delete: bool,
    /// Timer wheel tick in milliseconds
    pub timer_tick_ms: u64,
    /// Buckets per timer wheel level
    pub timer_slots: usize,
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
    /// - `MAX_ENTRIES` - Maximum cache entries (default: 1000)
    /// - `DEFAULT_TTL` - Default TTL in seconds (default: 300)
    /// - `EXPIRE_DELAY` - Stale grace window in seconds (default: 0)
    /// - `SYNC_SET_TIMEOUT_MS` - Synchronous set bound (default: 0, asynchronous)
    /// - `SYNC_DELETE` - Synchronous deletes (default: false)
    /// - `TIMER_TICK_MS` - Timer wheel tick (default: 1000)
    /// - `TIMER_SLOTS` - Timer wheel slots per level (default: 60)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_entries: env_or("MAX_ENTRIES", defaults.max_entries),
            default_ttl: env_or("DEFAULT_TTL", defaults.default_ttl),
            expire_delay: env_or("EXPIRE_DELAY", defaults.expire_delay),
            sync_set_timeout_ms: env_or("SYNC_SET_TIMEOUT_MS", defaults.sync_set_timeout_ms),
            sync_delete: env_or("SYNC_DELETE", defaults.sync_delete),
            timer_tick_ms: env_or("TIMER_TICK_MS", defaults.timer_tick_ms),
            timer_slots: env_or("TIMER_SLOTS", defaults.timer_slots),
            server_port: env_or("SERVER_PORT", defaults.server_port),
        }
    }

    /// Maps the configuration onto cache construction options.
    pub fn cache_builder<V: Clone + Send + Sync + 'static>(&self) -> CacheBuilder<V> {
        CacheBuilder::new()
            .capacity(self.max_entries)
            .default_ttl(Duration::from_secs(self.default_ttl))
            .expire_delay(Duration::from_secs(self.expire_delay))
            .sync_set_timeout(Some(Duration::from_millis(self.sync_set_timeout_ms)))
            .sync_delete(self.sync_delete)
            .timer_tick(Duration::from_millis(self.timer_tick_ms))
            .timer_slots(self.timer_slots)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            default_ttl: 300,
            expire_delay: 0,
            sync_set_timeout_ms: 0,
            sync_delete: false,
            timer_tick_ms: 1000,
            timer_slots: 60,
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
        assert_eq!(config.max_entries, 1000);
        assert_eq!(config.default_ttl, 300);
        assert_eq!(config.expire_delay, 0);
        assert!(!config.sync_delete);
        assert_eq!(config.timer_tick_ms, 1000);
        assert_eq!(config.server_port, 3000);
    }

    #[test]
    fn test_env_or_parses_and_falls_back() {
        env::set_var("LOCALCACHE_TEST_PORT", "8080");
        env::set_var("LOCALCACHE_TEST_BAD", "not-a-number");

        assert_eq!(env_or("LOCALCACHE_TEST_PORT", 1u16), 8080);
        assert_eq!(env_or("LOCALCACHE_TEST_BAD", 7u64), 7);
        assert!(!env_or("LOCALCACHE_TEST_UNSET", false));

        env::remove_var("LOCALCACHE_TEST_PORT");
        env::remove_var("LOCALCACHE_TEST_BAD");
    }

    #[test]
    fn test_cache_builder_from_config() {
        let config = Config {
            max_entries: 2,
            sync_set_timeout_ms: 500,
            timer_tick_ms: 50,
            ..Config::default()
        };
        let cache = config.cache_builder::<String>().build().unwrap();

        // synchronous sets: eviction is applied before set returns
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.set("c", "3".to_string());
        assert_eq!(cache.len(), 2);
        cache.close();
    }
}
