//! # Backing Stores
//!
//! Adapters from the [`BackingStore`] primitives to concrete stores, plus
//! [`StoreBackend`], the enum the rest of the crate holds.
//!
//! - **Redis/Dragonfly**: shared state across instances, pub/sub for sync
//! - **Memory**: single process (tests, local development); several memory
//!   stores can share one [`PubSubHub`] to stand in for a cluster
//! - **NoOp**: fallback when the configuration names no usable store; it
//!   stores nothing and reports itself unhealthy

pub mod memory;
pub mod noop;
pub mod pattern;
pub mod redis;
pub mod traits;

pub use memory::{MemoryStore, PubSubHub};
pub use noop::NoOpStore;
pub use pattern::GlobPattern;
pub use self::redis::RedisStore;
pub use traits::{BackingStore, MessageStream};

use crate::config::CacheSyncConfig;
use crate::error::{StoreError, StoreResult};
use std::time::Duration;
use tracing::{info, warn};

/// Store selected by configuration, dispatched without trait objects
#[derive(Debug, Clone)]
pub enum StoreBackend {
    /// Redis or Dragonfly (boxed to keep the enum small)
    Redis(Box<RedisStore>),
    Memory(MemoryStore),
    /// Always miss, never healthy
    NoOp(NoOpStore),
}

impl StoreBackend {
    /// Build the configured store, failing if it cannot be reached
    pub async fn from_config(config: &CacheSyncConfig) -> StoreResult<Self> {
        match config.backend.as_str() {
            "memory" | "in-memory" => Ok(Self::Memory(MemoryStore::new(
                config.memory.max_capacity,
            ))),
            "redis" | "dragonfly" => Ok(Self::Redis(Box::new(
                RedisStore::from_config(&config.redis).await?,
            ))),
            other => Err(StoreError::Backend(format!("unknown backend '{other}'"))),
        }
    }

    /// Build the configured store without requiring it to be up
    ///
    /// A node never fails to start because of its cache. An unreachable
    /// Redis is kept as the backend: calls fail (and trip the breaker) until
    /// it answers, then the pool opens on the next call. Only a configuration
    /// that names no usable store degrades to NoOp.
    pub async fn from_config_graceful(config: &CacheSyncConfig) -> Self {
        let backend = match config.backend.as_str() {
            "redis" | "dragonfly" => RedisStore::new(&config.redis).map(Self::from),
            _ => Self::from_config(config).await,
        };

        match backend {
            Ok(Self::Redis(store)) => {
                if let Err(e) = store.connect().await {
                    warn!(
                        error = %e,
                        "Redis unreachable at startup, connecting on first use"
                    );
                }
                info!(provider = "redis", pool_size = store.pool_size(), "Backing store ready");
                Self::Redis(store)
            }
            Ok(backend) => {
                info!(
                    provider = backend.provider_name(),
                    pool_size = backend.pool_size(),
                    "Backing store ready"
                );
                backend
            }
            Err(e) => {
                warn!(
                    backend = %config.backend,
                    error = %e,
                    "No usable backing store configured, caching disabled"
                );
                Self::NoOp(NoOpStore::new())
            }
        }
    }

    /// Whether anything is actually being stored
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::NoOp(_))
    }
}

impl From<MemoryStore> for StoreBackend {
    fn from(store: MemoryStore) -> Self {
        Self::Memory(store)
    }
}

impl From<RedisStore> for StoreBackend {
    fn from(store: RedisStore) -> Self {
        Self::Redis(Box::new(store))
    }
}

impl BackingStore for StoreBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match self {
            Self::Redis(s) => s.get(key).await,
            Self::Memory(s) => s.get(key).await,
            Self::NoOp(s) => s.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        match self {
            Self::Redis(s) => s.set(key, value, ttl).await,
            Self::Memory(s) => s.set(key, value, ttl).await,
            Self::NoOp(s) => s.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        match self {
            Self::Redis(s) => s.delete(keys).await,
            Self::Memory(s) => s.delete(keys).await,
            Self::NoOp(s) => s.delete(keys).await,
        }
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        match self {
            Self::Redis(s) => s.exists(key).await,
            Self::Memory(s) => s.exists(key).await,
            Self::NoOp(s) => s.exists(key).await,
        }
    }

    async fn scan(&self, pattern: &str) -> StoreResult<Vec<String>> {
        match self {
            Self::Redis(s) => s.scan(pattern).await,
            Self::Memory(s) => s.scan(pattern).await,
            Self::NoOp(s) => s.scan(pattern).await,
        }
    }

    async fn set_add(&self, key: &str, members: &[String]) -> StoreResult<()> {
        match self {
            Self::Redis(s) => s.set_add(key, members).await,
            Self::Memory(s) => s.set_add(key, members).await,
            Self::NoOp(s) => s.set_add(key, members).await,
        }
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> StoreResult<()> {
        match self {
            Self::Redis(s) => s.set_remove(key, members).await,
            Self::Memory(s) => s.set_remove(key, members).await,
            Self::NoOp(s) => s.set_remove(key, members).await,
        }
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        match self {
            Self::Redis(s) => s.set_members(key).await,
            Self::Memory(s) => s.set_members(key).await,
            Self::NoOp(s) => s.set_members(key).await,
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<u64> {
        match self {
            Self::Redis(s) => s.publish(channel, payload).await,
            Self::Memory(s) => s.publish(channel, payload).await,
            Self::NoOp(s) => s.publish(channel, payload).await,
        }
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<MessageStream> {
        match self {
            Self::Redis(s) => s.subscribe(channel).await,
            Self::Memory(s) => s.subscribe(channel).await,
            Self::NoOp(s) => s.subscribe(channel).await,
        }
    }

    async fn health_check(&self) -> StoreResult<bool> {
        match self {
            Self::Redis(s) => s.health_check().await,
            Self::Memory(s) => s.health_check().await,
            Self::NoOp(s) => s.health_check().await,
        }
    }

    fn provider_name(&self) -> &'static str {
        match self {
            Self::Redis(s) => s.provider_name(),
            Self::Memory(s) => s.provider_name(),
            Self::NoOp(s) => s.provider_name(),
        }
    }

    fn pool_size(&self) -> usize {
        match self {
            Self::Redis(s) => s.pool_size(),
            Self::Memory(s) => s.pool_size(),
            Self::NoOp(s) => s.pool_size(),
        }
    }
}
