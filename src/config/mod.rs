//! # Configuration
//!
//! Serde-backed configuration for every component of the cache layer. Each
//! section has defaults suitable for production; [`CacheSyncConfig::for_test`]
//! returns a preset with short intervals for fast test feedback.
//!
//! Loading (defaults → optional TOML file → `CACHE_SYNC__*` environment
//! variables) lives in [`loader`].
//!
//! ```toml
//! backend = "redis"
//!
//! [redis]
//! url = "redis://localhost:6379"
//! pool_size = 10
//!
//! [cache]
//! compression_threshold_bytes = 1024
//!
//! [circuit_breaker]
//! failure_threshold = 5
//! reset_timeout_seconds = 60
//! ```

pub mod loader;

use crate::error::{CacheError, CacheResult};
use crate::resilience::CircuitBreakerConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use loader::ConfigLoader;

/// Top-level configuration for a cache node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSyncConfig {
    /// Backing store: "redis" (alias "dragonfly") or "memory"
    pub backend: String,
    pub redis: RedisConfig,
    pub memory: MemoryConfig,
    pub cache: CacheCoreConfig,
    pub circuit_breaker: CircuitBreakerSettings,
    pub sync: SyncConfig,
    pub warmup: WarmupConfig,
    pub reconcile: ReconcileConfig,
    pub health: HealthConfig,
}

impl Default for CacheSyncConfig {
    fn default() -> Self {
        Self {
            backend: "redis".to_string(),
            redis: RedisConfig::default(),
            memory: MemoryConfig::default(),
            cache: CacheCoreConfig::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            sync: SyncConfig::default(),
            warmup: WarmupConfig::default(),
            reconcile: ReconcileConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl CacheSyncConfig {
    /// Test preset: in-memory backend, short timeouts and intervals
    pub fn for_test() -> Self {
        Self {
            backend: "memory".to_string(),
            cache: CacheCoreConfig {
                operation_timeout_ms: 500,
                version_refresh_interval_ms: 50,
                retry: RetryConfig {
                    max_attempts: 2,
                    base_delay_ms: 1,
                    max_delay_ms: 5,
                },
                ..CacheCoreConfig::default()
            },
            sync: SyncConfig {
                resubscribe_delay_ms: 50,
                ..SyncConfig::default()
            },
            reconcile: ReconcileConfig {
                interval_seconds: 1,
                ..ReconcileConfig::default()
            },
            health: HealthConfig {
                enabled: false,
                probe_interval_seconds: 1,
            },
            ..Self::default()
        }
    }

    /// Reject values that would make a component spin or never act
    pub fn validate(&self) -> CacheResult<()> {
        match self.backend.as_str() {
            "redis" | "dragonfly" | "memory" | "in-memory" => {}
            other => {
                return Err(CacheError::Configuration(format!(
                    "unknown backend '{other}' (expected redis, dragonfly or memory)"
                )))
            }
        }

        if self.redis.pool_size == 0 {
            return Err(CacheError::Configuration(
                "redis.pool_size must be greater than 0".to_string(),
            ));
        }
        if self.cache.operation_timeout_ms == 0 {
            return Err(CacheError::Configuration(
                "cache.operation_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.cache.retry.max_attempts == 0 {
            return Err(CacheError::Configuration(
                "cache.retry.max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.cache.key_prefix.is_empty()
            || self.cache.key_prefix.contains(['*', '?', '[', ']', '\\'])
        {
            return Err(CacheError::Configuration(
                "cache.key_prefix must be non-empty and free of glob characters".to_string(),
            ));
        }
        if self.warmup.concurrency == 0 {
            return Err(CacheError::Configuration(
                "warmup.concurrency must be greater than 0".to_string(),
            ));
        }
        if self.warmup.queue_capacity == Some(0) {
            return Err(CacheError::Configuration(
                "warmup.queue_capacity must be greater than 0 when set".to_string(),
            ));
        }
        if self.reconcile.interval_seconds == 0 {
            return Err(CacheError::Configuration(
                "reconcile.interval_seconds must be greater than 0".to_string(),
            ));
        }
        if self.health.probe_interval_seconds == 0 {
            return Err(CacheError::Configuration(
                "health.probe_interval_seconds must be greater than 0".to_string(),
            ));
        }

        self.circuit_breaker
            .to_resilience_config()
            .validate()
            .map_err(CacheError::Configuration)
    }
}

/// Redis / Dragonfly connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// Number of multiplexed connections opened at startup
    pub pool_size: usize,
    pub connection_timeout_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            connection_timeout_seconds: 5,
        }
    }
}

impl RedisConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }
}

/// In-process backend settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    pub max_capacity: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_capacity: 100_000,
        }
    }
}

/// Settings for `CacheCore` and the store-call wrapper
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheCoreConfig {
    /// Namespace prefix for every key written by this layer
    pub key_prefix: String,
    /// Serialized payloads larger than this are gzip-compressed
    pub compression_threshold_bytes: usize,
    /// TTL applied when a caller passes none; `None` means no expiry
    pub default_ttl_seconds: Option<u64>,
    /// Upper bound for a single store round-trip
    pub operation_timeout_ms: u64,
    /// How long the local version token is trusted before re-reading it
    pub version_refresh_interval_ms: u64,
    pub retry: RetryConfig,
}

impl Default for CacheCoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "cache".to_string(),
            compression_threshold_bytes: 1024,
            default_ttl_seconds: None,
            operation_timeout_ms: 5_000,
            version_refresh_interval_ms: 5_000,
            retry: RetryConfig::default(),
        }
    }
}

impl CacheCoreConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_seconds.map(Duration::from_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn version_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.version_refresh_interval_ms)
    }
}

/// Exponential backoff for transient store errors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 25,
            max_delay_ms: 500,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.base_delay_ms
                .saturating_mul(factor)
                .min(self.max_delay_ms),
        )
    }
}

/// Circuit breaker settings as they appear in config files
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_seconds: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_seconds: 60,
        }
    }
}

impl CircuitBreakerSettings {
    pub fn to_resilience_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            reset_timeout: Duration::from_secs(self.reset_timeout_seconds),
        }
    }
}

/// Cross-instance synchronization settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub enabled: bool,
    pub channel: String,
    /// Fixed instance id; a random UUID is used when unset
    pub instance_id: Option<String>,
    pub resubscribe_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channel: "cache:sync".to_string(),
            instance_id: None,
            resubscribe_delay_ms: 1_000,
        }
    }
}

impl SyncConfig {
    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }
}

/// Warmup queue settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WarmupConfig {
    /// Worker tasks pulling from the queue
    pub concurrency: usize,
    /// Maximum queued items; `None` leaves the queue unbounded
    pub queue_capacity: Option<usize>,
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            queue_capacity: None,
        }
    }
}

/// Reconciliation loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconcileConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    /// Drop tag memberships whose entry no longer exists on every tick
    pub prune_tags: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            prune_tags: true,
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

/// Store health prober settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub probe_interval_seconds: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_interval_seconds: 15,
        }
    }
}

impl HealthConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = CacheSyncConfig::default();
        assert_eq!(config.cache.compression_threshold_bytes, 1024);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.reset_timeout_seconds, 60);
        assert_eq!(config.redis.pool_size, 10);
        assert_eq!(config.reconcile.interval_seconds, 60);
        assert_eq!(config.cache.operation_timeout(), Duration::from_secs(5));
        assert!(config.cache.default_ttl().is_none());
        assert!(config.warmup.queue_capacity.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_test_preset_is_valid() {
        let config = CacheSyncConfig::for_test();
        assert_eq!(config.backend, "memory");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = CacheSyncConfig {
            backend: "memcached".to_string(),
            ..CacheSyncConfig::default()
        };
        assert!(config.validate().is_err());

        config = CacheSyncConfig::default();
        config.redis.pool_size = 0;
        assert!(config.validate().is_err());

        config = CacheSyncConfig::default();
        config.warmup.queue_capacity = Some(0);
        assert!(config.validate().is_err());

        config = CacheSyncConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(config.validate().is_err());

        config = CacheSyncConfig::default();
        config.cache.key_prefix = "cache*".to_string();
        assert!(config.validate().is_err());
        config.cache.key_prefix = "cache[1]".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            base_delay_ms: 10,
            max_delay_ms: 35,
        };
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(20));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(35));
        assert_eq!(retry.delay_for_attempt(30), Duration::from_millis(35));
    }
}
