//! Global version token for bulk invalidation
//!
//! Every entry key embeds the token current at write time. Replacing the
//! token orphans all earlier entries at once; the store's TTL reclaims them
//! eventually, or [`VersionManager::invalidate_by_version`] deletes them
//! eagerly.
//!
//! The local copy is trusted for `refresh_interval`, after which it is
//! re-read so that an increment made by another instance is picked up.
//! Increments and refreshes are serialized by one async mutex; reads of a
//! fresh token only take the read lock.

use super::keys::KeySpace;
use super::protected::ProtectedStore;
use crate::metrics::MetricsCollector;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenOrigin {
    /// Read from or written to the store
    Persisted,
    /// Made up locally because the store was unreachable; the store's token
    /// wins once it can be read
    Ephemeral,
    /// Local increment whose write failed; written once the store is back
    PendingWrite,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    origin: TokenOrigin,
    checked_at: Instant,
}

#[derive(Debug)]
pub struct VersionManager {
    store: ProtectedStore,
    keys: KeySpace,
    refresh_interval: Duration,
    cached: RwLock<Option<CachedToken>>,
    update_lock: Mutex<()>,
    metrics: Arc<MetricsCollector>,
}

impl VersionManager {
    pub fn new(
        store: ProtectedStore,
        keys: KeySpace,
        refresh_interval: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            keys,
            refresh_interval,
            cached: RwLock::new(None),
            update_lock: Mutex::new(()),
            metrics,
        }
    }

    /// Current token, creating one on first use
    ///
    /// Never fails: with the store unreachable the last known token (or an
    /// ephemeral one) is returned.
    pub async fn get_version(&self) -> String {
        if let Some(token) = self.fresh_token() {
            return token;
        }

        let _guard = self.update_lock.lock().await;
        // Another caller may have refreshed while we waited
        if let Some(token) = self.fresh_token() {
            return token;
        }
        self.refresh_locked().await
    }

    /// Replace the token, orphaning every entry written under the old one
    pub async fn increment_version(&self) -> String {
        let _guard = self.update_lock.lock().await;
        let previous = self.cached.read().as_ref().map(|c| c.token.clone());
        let token = new_token();

        let origin = match self
            .store
            .set(&self.keys.version_key(), token.as_bytes(), None)
            .await
        {
            Ok(()) => TokenOrigin::Persisted,
            Err(e) => {
                warn!(
                    error = %e,
                    "Could not persist new cache version, applying locally until the store recovers"
                );
                TokenOrigin::PendingWrite
            }
        };

        self.remember(token.clone(), origin);
        self.metrics.record_version_change();

        info!(
            previous_version = previous.as_deref().unwrap_or("none"),
            version = %token,
            "Cache version incremented"
        );
        token
    }

    /// Delete every entry written under `old_version`, returning the count
    pub async fn invalidate_by_version(&self, old_version: &str) -> u64 {
        let pattern = self.keys.entry_pattern(old_version, "*");

        let keys = match self.store.scan(&pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(version = old_version, error = %e, "Version cleanup scan failed");
                return 0;
            }
        };
        if keys.is_empty() {
            return 0;
        }

        match self.store.delete(&keys).await {
            Ok(deleted) => {
                info!(version = old_version, deleted = deleted, "Orphaned version entries deleted");
                deleted
            }
            Err(e) => {
                warn!(version = old_version, error = %e, "Version cleanup delete failed");
                0
            }
        }
    }

    /// Locally cached token without touching the store
    pub fn cached_version(&self) -> Option<String> {
        self.cached.read().as_ref().map(|c| c.token.clone())
    }

    fn fresh_token(&self) -> Option<String> {
        self.cached.read().as_ref().and_then(|cached| {
            (cached.checked_at.elapsed() < self.refresh_interval).then(|| cached.token.clone())
        })
    }

    fn remember(&self, token: String, origin: TokenOrigin) {
        *self.cached.write() = Some(CachedToken {
            token,
            origin,
            checked_at: Instant::now(),
        });
    }

    /// Re-read the token from the store; caller holds `update_lock`
    async fn refresh_locked(&self) -> String {
        let local = self.cached.read().clone();
        let version_key = self.keys.version_key();

        // A failed increment is pushed before anything is read back
        if let Some(pending) = local
            .as_ref()
            .filter(|c| c.origin == TokenOrigin::PendingWrite)
        {
            return match self
                .store
                .set(&version_key, pending.token.as_bytes(), None)
                .await
            {
                Ok(()) => {
                    info!(version = %pending.token, "Pending cache version persisted");
                    self.remember(pending.token.clone(), TokenOrigin::Persisted);
                    pending.token.clone()
                }
                Err(_) => {
                    self.remember(pending.token.clone(), TokenOrigin::PendingWrite);
                    pending.token.clone()
                }
            };
        }

        match self.store.get(&version_key).await {
            Ok(Some(bytes)) => match String::from_utf8(bytes) {
                Ok(token) if !token.is_empty() => {
                    if local.as_ref().is_some_and(|c| c.token != token) {
                        debug!(version = %token, "Cache version changed by another instance");
                    }
                    self.remember(token.clone(), TokenOrigin::Persisted);
                    token
                }
                _ => {
                    warn!("Stored cache version is not a valid token, replacing it");
                    self.create_locked(local).await
                }
            },
            Ok(None) => self.create_locked(local).await,
            Err(e) => {
                let (token, origin) = match local {
                    Some(cached) => (cached.token, cached.origin),
                    None => {
                        warn!(error = %e, "Cache version unavailable, using an ephemeral version");
                        (new_token(), TokenOrigin::Ephemeral)
                    }
                };
                // Restart the clock so a dead store is not hit on every read
                self.remember(token.clone(), origin);
                token
            }
        }
    }

    /// No token in the store: publish ours (an ephemeral one keeps its entries)
    async fn create_locked(&self, local: Option<CachedToken>) -> String {
        let token = local.map(|c| c.token).unwrap_or_else(new_token);
        let origin = match self
            .store
            .set(&self.keys.version_key(), token.as_bytes(), None)
            .await
        {
            Ok(()) => {
                debug!(version = %token, "Cache version created");
                TokenOrigin::Persisted
            }
            Err(_) => TokenOrigin::Ephemeral,
        };
        self.remember(token.clone(), origin);
        token
    }
}

fn new_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};
    use crate::store::{BackingStore, MemoryStore, StoreBackend};

    fn manager(memory: &MemoryStore, refresh: Duration) -> VersionManager {
        let metrics = Arc::new(MetricsCollector::new());
        let store = ProtectedStore::new(
            StoreBackend::from(memory.clone()),
            Arc::new(CircuitBreaker::new("cache", CircuitBreakerConfig::default())),
            metrics.clone(),
            Duration::from_millis(200),
            RetryConfig {
                max_attempts: 1,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
        );
        VersionManager::new(store, KeySpace::new("cache"), refresh, metrics)
    }

    #[tokio::test]
    async fn test_version_created_lazily_and_persisted() {
        let memory = MemoryStore::new(100);
        let versions = manager(&memory, Duration::from_secs(5));
        assert!(versions.cached_version().is_none());

        let token = versions.get_version().await;
        assert_eq!(versions.get_version().await, token);
        assert_eq!(
            memory.get("cache:version").await.unwrap(),
            Some(token.into_bytes())
        );
    }

    #[tokio::test]
    async fn test_increment_replaces_token() {
        let memory = MemoryStore::new(100);
        let versions = manager(&memory, Duration::from_secs(5));

        let first = versions.get_version().await;
        let second = versions.increment_version().await;
        assert_ne!(first, second);
        assert_eq!(versions.get_version().await, second);
        assert_eq!(versions.metrics.snapshot(Default::default()).version_changes, 1);
    }

    #[tokio::test]
    async fn test_peer_increment_observed_after_refresh() {
        let memory = MemoryStore::new(100);
        let a = manager(&memory, Duration::from_millis(20));
        let b = manager(&memory, Duration::from_millis(20));

        let original = b.get_version().await;
        let bumped = a.increment_version().await;
        assert_ne!(original, bumped);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(b.get_version().await, bumped);
    }

    #[tokio::test]
    async fn test_unreachable_store_yields_ephemeral_token() {
        let memory = MemoryStore::new(100);
        memory.simulate_outage(true);
        let versions = manager(&memory, Duration::from_millis(10));

        let token = versions.get_version().await;
        assert!(!token.is_empty());

        // Recovery publishes the ephemeral token instead of discarding it
        memory.simulate_outage(false);
        versions.breaker_reset();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(versions.get_version().await, token);
        assert_eq!(
            memory.get("cache:version").await.unwrap(),
            Some(token.into_bytes())
        );
    }

    #[tokio::test]
    async fn test_failed_increment_is_written_on_recovery() {
        let memory = MemoryStore::new(100);
        let versions = manager(&memory, Duration::from_millis(10));
        let original = versions.get_version().await;

        memory.simulate_outage(true);
        let bumped = versions.increment_version().await;
        assert_ne!(original, bumped);

        memory.simulate_outage(false);
        versions.breaker_reset();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(versions.get_version().await, bumped);
        assert_eq!(
            memory.get("cache:version").await.unwrap(),
            Some(bumped.into_bytes())
        );
    }

    #[tokio::test]
    async fn test_invalidate_by_version_deletes_old_entries() {
        let memory = MemoryStore::new(100);
        let versions = manager(&memory, Duration::from_secs(5));
        let old = versions.get_version().await;

        memory.set(&format!("cache:v{old}:a"), b"1", None).await.unwrap();
        memory.set(&format!("cache:v{old}:b"), b"2", None).await.unwrap();
        let new = versions.increment_version().await;
        memory.set(&format!("cache:v{new}:a"), b"3", None).await.unwrap();

        assert_eq!(versions.invalidate_by_version(&old).await, 2);
        assert!(memory.exists(&format!("cache:v{new}:a")).await.unwrap());
    }

    impl VersionManager {
        fn breaker_reset(&self) {
            self.store.breaker().record_success();
        }
    }
}
