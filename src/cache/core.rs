//! CacheCore: fail-open get/set/delete over the protected store
//!
//! Public operations never return errors. Failures are logged, counted on the
//! metrics collector (the breaker has already seen them) and collapse to
//! "absent" or `false`. The `try_*` variants keep the error for internal
//! callers that must tell "absent" from "unknown".

use super::codec::PayloadCodec;
use super::keys::KeySpace;
use super::protected::ProtectedStore;
use super::version::VersionManager;
use crate::config::CacheCoreConfig;
use crate::error::{CacheError, CacheResult, StoreError};
use crate::metrics::MetricsCollector;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug)]
pub struct CacheCore {
    store: ProtectedStore,
    keys: KeySpace,
    codec: PayloadCodec,
    versions: Arc<VersionManager>,
    metrics: Arc<MetricsCollector>,
    default_ttl: Option<Duration>,
}

impl CacheCore {
    pub fn new(
        config: &CacheCoreConfig,
        store: ProtectedStore,
        versions: Arc<VersionManager>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            keys: KeySpace::new(config.key_prefix.clone()),
            codec: PayloadCodec::new(config.compression_threshold_bytes),
            versions,
            metrics,
            default_ttl: config.default_ttl(),
        }
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn store(&self) -> &ProtectedStore {
        &self.store
    }

    pub fn versions(&self) -> &Arc<VersionManager> {
        &self.versions
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Explicit TTL, else the configured default, else none
    pub fn effective_ttl(&self, ttl: Option<Duration>) -> Option<Duration> {
        ttl.or(self.default_ttl)
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        let start = Instant::now();
        let result = self.try_get(key).await;
        self.metrics.record_latency("get", start.elapsed());

        match result {
            Ok(Some(value)) => {
                self.metrics.record_hit();
                debug!(key = key, "Cache HIT");
                Some(value)
            }
            Ok(None) => {
                self.metrics.record_miss();
                debug!(key = key, "Cache MISS");
                None
            }
            Err(e) => {
                self.metrics.record_miss();
                self.record_failure("get", key, &e);
                None
            }
        }
    }

    pub async fn try_get(&self, key: &str) -> CacheResult<Option<Value>> {
        let version = self.versions.get_version().await;
        match self.store.get(&self.keys.entry(&version, key)).await? {
            Some(payload) => self.codec.decode(&payload).map(Some),
            None => Ok(None),
        }
    }

    /// Store `value`; `false` on any failure
    pub async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> bool {
        let start = Instant::now();
        let result = self.try_set(key, value, ttl).await;
        self.metrics.record_latency("set", start.elapsed());

        match result {
            Ok(compressed) => {
                debug!(key = key, compressed = compressed, "Cache SET");
                true
            }
            Err(e) => {
                self.record_failure("set", key, &e);
                false
            }
        }
    }

    /// Returns whether the payload was compressed
    pub async fn try_set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> CacheResult<bool> {
        if !self.store.inner().is_enabled() {
            return Err(StoreError::Unavailable("no backing store configured".to_string()).into());
        }
        let payload = self.codec.encode(value)?;
        let version = self.versions.get_version().await;
        self.store
            .set(
                &self.keys.entry(&version, key),
                &payload.bytes,
                self.effective_ttl(ttl),
            )
            .await?;
        Ok(payload.compressed)
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.delete_many(&[key.to_string()]).await
    }

    /// Delete several logical keys in one store round-trip
    pub async fn delete_many(&self, keys: &[String]) -> bool {
        if keys.is_empty() {
            return true;
        }
        let start = Instant::now();
        let version = self.versions.get_version().await;
        let physical: Vec<String> = keys
            .iter()
            .map(|key| self.keys.entry(&version, key))
            .collect();
        let result = self.store.delete(&physical).await;
        self.metrics.record_latency("delete", start.elapsed());

        match result {
            Ok(deleted) => {
                debug!(requested = keys.len(), deleted = deleted, "Cache DEL");
                true
            }
            Err(e) => {
                let label = keys.first().map(String::as_str).unwrap_or_default();
                self.record_failure("delete", label, &e);
                false
            }
        }
    }

    /// Delete every current-version entry whose logical key matches `glob`
    ///
    /// Scan then bulk delete; not atomic.
    pub async fn clear_pattern(&self, glob: &str) -> bool {
        let start = Instant::now();
        let result = self.try_clear_pattern(glob).await;
        self.metrics.record_latency("clear_pattern", start.elapsed());

        match result {
            Ok(deleted) => {
                debug!(pattern = glob, deleted = deleted, "Cache pattern DEL");
                true
            }
            Err(e) => {
                self.record_failure("clear_pattern", glob, &e);
                false
            }
        }
    }

    pub async fn try_clear_pattern(&self, glob: &str) -> CacheResult<u64> {
        let version = self.versions.get_version().await;
        let keys = self
            .store
            .scan(&self.keys.entry_pattern(&version, glob))
            .await?;
        if keys.is_empty() {
            return Ok(0);
        }
        self.store.delete(&keys).await
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self.try_exists(key).await {
            Ok(exists) => exists,
            Err(e) => {
                self.record_failure("exists", key, &e);
                false
            }
        }
    }

    pub async fn try_exists(&self, key: &str) -> CacheResult<bool> {
        let version = self.versions.get_version().await;
        self.store.exists(&self.keys.entry(&version, key)).await
    }

    /// Return the cached value, or run `producer`, cache its result and return it
    ///
    /// Concurrent callers missing on the same key all run their producer;
    /// the last write wins. No timeout is applied to the producer. Only
    /// producer errors are returned; cache failures degrade to "miss" and
    /// "not stored".
    pub async fn get_or_set<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        producer: F,
    ) -> anyhow::Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Value>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let value = producer().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }

    fn record_failure(&self, operation: &'static str, key: &str, error: &CacheError) {
        self.metrics.record_error(operation, error.kind());
        match error {
            // Already logged by the breaker; one line per rejected call is noise
            CacheError::CircuitOpen { .. } => {
                debug!(operation = operation, key = key, "Cache bypassed (circuit open)");
            }
            _ => {
                warn!(operation = operation, key = key, error = %error, "Cache operation failed");
            }
        }
    }
}
