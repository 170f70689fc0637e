//! # CacheService
//!
//! The facade the request layer holds: one per process, shared by `Arc`.
//! Wires the store, circuit breaker, core, tag index, sync bus and the
//! background schedulers together.
//!
//! Every operation is fail-open. Reads degrade to `None`, writes to `false`;
//! nothing here returns a cache error. Successful local writes and deletes
//! are broadcast to peer instances when sync is enabled.
//!
//! ```rust,no_run
//! use cache_sync_core::config::CacheSyncConfig;
//! use cache_sync_core::service::CacheService;
//! use std::time::Duration;
//!
//! # async fn example() {
//! let cache = CacheService::from_config(CacheSyncConfig::default()).await;
//! cache.start().await;
//!
//! cache.set("user:42", &"Ada", Some(Duration::from_secs(60))).await;
//! let name: Option<String> = cache.get("user:42").await;
//!
//! cache.shutdown().await;
//! # }
//! ```

use crate::cache::{CacheCore, KeySpace, ProtectedStore, TagIndex, VersionManager};
use crate::config::CacheSyncConfig;
use crate::metrics::{MetricsCollector, StatsSnapshot};
use crate::resilience::CircuitBreaker;
use crate::scheduler::{HealthProber, ReconcileScheduler, Reconciler, WarmupItem, WarmupScheduler};
use crate::store::{BackingStore, StoreBackend};
use crate::sync::DistributedSyncBus;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Component name of the store circuit breaker in logs and metrics
const BREAKER_NAME: &str = "cache_store";

#[derive(Debug)]
pub struct CacheService {
    config: CacheSyncConfig,
    core: Arc<CacheCore>,
    tags: Arc<TagIndex>,
    sync: DistributedSyncBus,
    warmup: WarmupScheduler,
    reconcile: ReconcileScheduler,
    health: HealthProber,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<MetricsCollector>,
}

impl CacheService {
    /// Build from configuration without waiting for the store to be up
    ///
    /// An unreachable Redis stays the backend and is connected on first use;
    /// only an unusable configuration degrades to the no-op store.
    pub async fn from_config(config: CacheSyncConfig) -> Self {
        let store = StoreBackend::from_config_graceful(&config).await;
        Self::with_store(config, store)
    }

    /// Build around an already constructed store
    pub fn with_store(config: CacheSyncConfig, store: StoreBackend) -> Self {
        let metrics = Arc::new(MetricsCollector::new());
        metrics.set_connection_pool_size(store.pool_size());

        let breaker = Arc::new(CircuitBreaker::new(
            BREAKER_NAME,
            config.circuit_breaker.to_resilience_config(),
        ));
        let protected = ProtectedStore::new(
            store,
            breaker.clone(),
            metrics.clone(),
            config.cache.operation_timeout(),
            config.cache.retry.clone(),
        );

        let versions = Arc::new(VersionManager::new(
            protected.clone(),
            KeySpace::new(config.cache.key_prefix.clone()),
            config.cache.version_refresh_interval(),
            metrics.clone(),
        ));
        let core = Arc::new(CacheCore::new(
            &config.cache,
            protected.clone(),
            versions,
            metrics.clone(),
        ));
        let tags = Arc::new(TagIndex::new(core.clone()));

        let instance_id = config
            .sync
            .instance_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let sync = DistributedSyncBus::new(core.clone(), &config.sync, instance_id);
        let warmup = WarmupScheduler::new(core.clone(), config.warmup.clone());
        let reconcile = ReconcileScheduler::new(core.clone(), tags.clone(), config.reconcile.clone());
        let health = HealthProber::new(protected, metrics.clone(), config.health.probe_interval());

        debug!(
            instance_id = %sync.instance_id(),
            provider = core.store().inner().provider_name(),
            "Cache service assembled"
        );

        Self {
            config,
            core,
            tags,
            sync,
            warmup,
            reconcile,
            health,
            breaker,
            metrics,
        }
    }

    pub fn config(&self) -> &CacheSyncConfig {
        &self.config
    }

    pub fn instance_id(&self) -> &str {
        self.sync.instance_id()
    }

    pub fn core(&self) -> &Arc<CacheCore> {
        &self.core
    }

    pub fn tag_index(&self) -> &Arc<TagIndex> {
        &self.tags
    }

    pub fn sync_bus(&self) -> &DistributedSyncBus {
        &self.sync
    }

    pub fn warmup_scheduler(&self) -> &WarmupScheduler {
        &self.warmup
    }

    pub fn reconcile_scheduler(&self) -> &ReconcileScheduler {
        &self.reconcile
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    // -- reads and writes -------------------------------------------------

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.core.get(key).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!(key = key, error = %e, "Cached value has an unexpected shape");
                self.metrics.record_error("get", "serialization");
                None
            }
        }
    }

    /// Store `value`, then broadcast it to peers
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        let Some(value) = self.to_value(key, value) else {
            return false;
        };
        self.set_value(key, &value, ttl).await
    }

    /// Store `value` and tag it in one call
    pub async fn set_with_tags<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        tags: &[String],
    ) -> bool {
        self.set(key, value, ttl).await && self.tags.add_tags(key, tags).await
    }

    async fn set_value(&self, key: &str, value: &Value, ttl: Option<Duration>) -> bool {
        if !self.core.set(key, value, ttl).await {
            return false;
        }
        if self.config.sync.enabled {
            self.sync
                .broadcast_update(key, value, self.core.effective_ttl(ttl))
                .await;
        }
        true
    }

    fn to_value<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Option<Value> {
        match serde_json::to_value(value) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = key, error = %e, "Value cannot be cached as a JSON document");
                self.metrics.record_error("set", "serialization");
                None
            }
        }
    }

    /// Delete locally, then broadcast the invalidation to peers
    pub async fn delete(&self, key: &str) -> bool {
        if !self.core.delete(key).await {
            return false;
        }
        if self.config.sync.enabled {
            self.sync.broadcast_invalidate(key).await;
        }
        true
    }

    /// Alias of [`delete`](Self::delete)
    pub async fn invalidate(&self, key: &str) -> bool {
        self.delete(key).await
    }

    /// Delete every entry whose key matches `glob` (`*`, `?`, `[..]`)
    ///
    /// Peers sharing the backing store see the deletion directly; nothing is
    /// broadcast.
    pub async fn clear_pattern(&self, glob: &str) -> bool {
        self.core.clear_pattern(glob).await
    }

    /// Alias of [`clear_pattern`](Self::clear_pattern)
    pub async fn invalidate_pattern(&self, glob: &str) -> bool {
        self.clear_pattern(glob).await
    }

    /// Cached value, or the producer's value (which is then cached and broadcast)
    ///
    /// Concurrent misses on one key each run the producer; the last write
    /// wins. Only producer errors are returned.
    pub async fn get_or_set<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        producer: F,
    ) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(cached) = self.get::<T>(key).await {
            return Ok(cached);
        }

        let produced = producer().await?;
        self.set(key, &produced, ttl).await;
        Ok(produced)
    }

    // -- tags -------------------------------------------------------------

    pub async fn add_tags(&self, key: &str, tags: &[String]) -> bool {
        self.tags.add_tags(key, tags).await
    }

    pub async fn remove_tags(&self, key: &str, tags: &[String]) -> bool {
        self.tags.remove_tags(key, tags).await
    }

    pub async fn get_keys_by_tag(&self, tag: &str) -> Vec<String> {
        self.tags.get_keys_by_tag(tag).await
    }

    /// Delete every entry carrying `tag` and tell peers about each key
    pub async fn invalidate_by_tag(&self, tag: &str) -> bool {
        let Some(keys) = self.tags.invalidate_by_tag(tag).await else {
            return false;
        };
        if self.config.sync.enabled {
            for key in &keys {
                self.sync.broadcast_invalidate(key).await;
            }
        }
        true
    }

    /// Remove a tag set without touching its entries
    pub async fn clear_tag(&self, tag: &str) -> bool {
        self.tags.clear_tag(tag).await
    }

    // -- versions ---------------------------------------------------------

    pub async fn get_version(&self) -> String {
        self.core.versions().get_version().await
    }

    /// Orphan every entry written so far
    pub async fn increment_version(&self) -> String {
        self.core.versions().increment_version().await
    }

    /// Eagerly delete entries written under an old version
    pub async fn invalidate_by_version(&self, old_version: &str) -> u64 {
        self.core.versions().invalidate_by_version(old_version).await
    }

    // -- warmup and reconcile ---------------------------------------------

    /// Queue items for background population; returns how many were accepted
    pub fn warm_cache(&self, items: Vec<WarmupItem>) -> usize {
        items
            .into_iter()
            .map(|item| self.warmup.add_to_warmup(item))
            .filter(|accepted| *accepted)
            .count()
    }

    pub fn set_reconciler(&self, reconciler: Arc<dyn Reconciler>) {
        self.reconcile.set_reconciler(reconciler);
    }

    // -- lifecycle ---------------------------------------------------------

    pub async fn start_distributed_sync(&self) {
        self.sync.start().await;
    }

    pub async fn stop_distributed_sync(&self) {
        self.sync.stop().await;
    }

    /// Start every enabled background loop
    pub async fn start(&self) {
        if self.config.sync.enabled {
            self.sync.start().await;
        }
        self.warmup.start().await;
        if self.config.reconcile.enabled {
            self.reconcile.start().await;
        }
        if self.config.health.enabled {
            self.health.start().await;
        }

        info!(
            instance_id = %self.instance_id(),
            provider = self.core.store().inner().provider_name(),
            sync = self.config.sync.enabled,
            reconcile = self.config.reconcile.enabled,
            health_probe = self.config.health.enabled,
            "✅ Cache service started"
        );
    }

    /// Stop every background loop and wait for each to exit
    pub async fn shutdown(&self) {
        self.sync.stop().await;
        self.warmup.stop().await;
        self.reconcile.stop().await;
        self.health.stop().await;
        info!(instance_id = %self.instance_id(), "Cache service stopped");
    }

    // -- observability -----------------------------------------------------

    pub fn stats(&self) -> StatsSnapshot {
        self.metrics.snapshot(self.breaker.metrics())
    }

    /// Ping the store now and record the result
    pub async fn health_check(&self) -> bool {
        self.health.probe().await
    }
}

/// Invalidation tags for a request path
///
/// `/api/v1/users?page=2` yields `path:api`, `path:v1`, `path:users`,
/// `path_hierarchy:api`, `path_hierarchy:api/v1` and
/// `path_hierarchy:api/v1/users`.
pub fn tags_for_path(path: &str) -> Vec<String> {
    let path = path.split(['?', '#']).next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let mut tags: Vec<String> = segments.iter().map(|s| format!("path:{s}")).collect();
    tags.extend(
        (1..=segments.len()).map(|depth| format!("path_hierarchy:{}", segments[..depth].join("/"))),
    );
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_for_path() {
        assert_eq!(
            tags_for_path("/api/v1/users?page=2"),
            vec![
                "path:api",
                "path:v1",
                "path:users",
                "path_hierarchy:api",
                "path_hierarchy:api/v1",
                "path_hierarchy:api/v1/users",
            ]
        );
    }

    #[test]
    fn test_tags_for_root_path() {
        assert!(tags_for_path("/").is_empty());
        assert!(tags_for_path("").is_empty());
        assert_eq!(
            tags_for_path("//docs//"),
            vec!["path:docs", "path_hierarchy:docs"]
        );
    }
}
