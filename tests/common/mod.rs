//! Shared helpers for the integration tests
//!
//! Everything runs against the in-memory backend. Peer instances share a
//! [`PubSubHub`] so their sync traffic meets; each keeps its own values,
//! like separate processes attached to separate store replicas.

#![allow(dead_code)]

pub mod strategies;

use cache_sync_core::config::CacheSyncConfig;
use cache_sync_core::store::{MemoryStore, PubSubHub, StoreBackend};
use cache_sync_core::CacheService;
use std::future::Future;
use std::time::Duration;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("cache_sync_core=debug")
        .with_test_writer()
        .try_init();
}

/// Test config with sync switched off
pub fn standalone_config() -> CacheSyncConfig {
    let mut config = CacheSyncConfig::for_test();
    config.sync.enabled = false;
    config
}

/// A service over a fresh memory store, plus a handle to that store
pub fn memory_service(config: CacheSyncConfig) -> (CacheService, MemoryStore) {
    let store = MemoryStore::new(config.memory.max_capacity);
    let service = CacheService::with_store(config, StoreBackend::from(store.clone()));
    (service, store)
}

/// Service on its own store whose pub/sub traffic goes through `hub`
pub fn peer_service(hub: &PubSubHub, instance_id: &str) -> (CacheService, MemoryStore) {
    let mut config = CacheSyncConfig::for_test();
    config.sync.instance_id = Some(instance_id.to_string());
    let store = MemoryStore::with_hub(config.memory.max_capacity, hub.clone());
    let service = CacheService::with_store(config, StoreBackend::from(store.clone()));
    (service, store)
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn tags(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| (*s).to_string()).collect()
}
