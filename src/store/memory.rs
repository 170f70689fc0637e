//! In-process store adapter
//!
//! Values live in a `moka` future cache with per-entry expiry; sets live in a
//! `DashMap`. Pub/sub is a tokio broadcast hub which can be shared between
//! several stores, so multiple cache nodes inside one process observe each
//! other's messages the way they would through Redis.
//!
//! An outage switch makes every operation fail with
//! [`StoreError::Unavailable`], which is how fail-open behaviour is exercised
//! without a real Redis.

use super::pattern::GlobPattern;
use super::traits::{BackingStore, MessageStream};
use crate::error::{StoreError, StoreResult};
use dashmap::DashMap;
use futures::StreamExt;
use moka::future::Cache;
use moka::Expiry;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, warn};

const HUB_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Arc<[u8]>,
    ttl: Option<Duration>,
}

/// Expires each entry after its own TTL; a rewrite restarts the clock
struct PerEntryTtl;

impl Expiry<String, StoredValue> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredValue,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-process publish/subscribe hub
///
/// Clones share the same underlying channel.
#[derive(Debug, Clone)]
pub struct PubSubHub {
    sender: broadcast::Sender<(String, String)>,
}

impl Default for PubSubHub {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSubHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HUB_CAPACITY);
        Self { sender }
    }

    fn publish(&self, channel: &str, payload: &str) -> u64 {
        // Err only means nobody is listening right now
        self.sender
            .send((channel.to_string(), payload.to_string()))
            .map(|n| n as u64)
            .unwrap_or(0)
    }

    fn subscribe(&self, channel: &str) -> MessageStream {
        let receiver = self.sender.subscribe();
        let channel = channel.to_string();

        futures::stream::unfold((receiver, channel), |(mut rx, channel)| async move {
            loop {
                match rx.recv().await {
                    Ok((ch, payload)) if ch == channel => return Some((payload, (rx, channel))),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(channel = %channel, skipped = skipped, "Subscriber lagged, messages dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .boxed()
    }
}

/// In-memory store with moka-backed values and an in-process pub/sub hub
#[derive(Clone)]
pub struct MemoryStore {
    values: Cache<String, StoredValue>,
    sets: Arc<DashMap<String, HashSet<String>>>,
    hub: PubSubHub,
    outage: Arc<AtomicBool>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entry_count", &self.values.entry_count())
            .field("set_count", &self.sets.len())
            .field("outage", &self.outage.load(Ordering::Relaxed))
            .finish()
    }
}

impl MemoryStore {
    /// Standalone store with its own pub/sub hub
    pub fn new(max_capacity: u64) -> Self {
        Self::with_hub(max_capacity, PubSubHub::new())
    }

    /// Store whose pub/sub traffic goes through a shared hub
    pub fn with_hub(max_capacity: u64, hub: PubSubHub) -> Self {
        let values = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();

        debug!(max_capacity = max_capacity, "Memory store created");

        Self {
            values,
            sets: Arc::new(DashMap::new()),
            hub,
            outage: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The hub this store publishes to
    pub fn hub(&self) -> PubSubHub {
        self.hub.clone()
    }

    /// Make every subsequent operation fail until switched back
    pub fn simulate_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
        if down {
            warn!("Memory store outage simulated");
        } else {
            debug!("Memory store outage cleared");
        }
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.outage.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable(
                "memory store outage simulated".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl BackingStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check_available()?;
        Ok(self.values.get(key).await.map(|v| v.bytes.to_vec()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> StoreResult<()> {
        self.check_available()?;
        let stored = StoredValue {
            bytes: Arc::from(value),
            ttl,
        };
        self.values.insert(key.to_string(), stored).await;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        self.check_available()?;
        let mut deleted = 0;
        for key in keys {
            let removed_value = self.values.remove(key).await.is_some();
            let removed_set = self.sets.remove(key).is_some();
            if removed_value || removed_set {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self.values.get(key).await.is_some() || self.sets.contains_key(key))
    }

    async fn scan(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.check_available()?;
        let glob = GlobPattern::new(pattern);

        let mut keys: Vec<String> = self
            .values
            .iter()
            .filter(|(key, _)| glob.matches(key))
            .map(|(key, _)| key.as_ref().clone())
            .collect();
        keys.extend(
            self.sets
                .iter()
                .filter(|entry| glob.matches(entry.key()))
                .map(|entry| entry.key().clone()),
        );
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    async fn set_add(&self, key: &str, members: &[String]) -> StoreResult<()> {
        self.check_available()?;
        if members.is_empty() {
            return Ok(());
        }
        self.sets
            .entry(key.to_string())
            .or_default()
            .extend(members.iter().cloned());
        Ok(())
    }

    async fn set_remove(&self, key: &str, members: &[String]) -> StoreResult<()> {
        self.check_available()?;
        let now_empty = match self.sets.get_mut(key) {
            Some(mut set) => {
                for member in members {
                    set.remove(member);
                }
                set.is_empty()
            }
            None => false,
        };
        // Redis drops a set once its last member is removed
        if now_empty {
            self.sets.remove_if(key, |_, set| set.is_empty());
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> StoreResult<Vec<String>> {
        self.check_available()?;
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<u64> {
        self.check_available()?;
        Ok(self.hub.publish(channel, payload))
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<MessageStream> {
        self.check_available()?;
        Ok(self.hub.subscribe(channel))
    }

    async fn health_check(&self) -> StoreResult<bool> {
        self.check_available()?;
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }

    fn pool_size(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_get_set_delete() {
        let store = MemoryStore::new(100);
        store.set("k", b"value", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"value".to_vec()));
        assert!(store.exists("k").await.unwrap());

        assert_eq!(store.delete(&["k".to_string()]).await.unwrap(), 1);
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.delete(&["k".to_string()]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_entry_expires_after_ttl() {
        let store = MemoryStore::new(100);
        store
            .set("short", b"v", Some(Duration::from_millis(50)))
            .await
            .unwrap();
        store.set("forever", b"v", None).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(store.get("short").await.unwrap(), None);
        assert!(store.get("forever").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_memory_scan_matches_values_and_sets() {
        let store = MemoryStore::new(100);
        store.set("app:v1:a", b"1", None).await.unwrap();
        store.set("app:v1:b", b"2", None).await.unwrap();
        store.set("app:v2:a", b"3", None).await.unwrap();
        store
            .set_add("app:tag:x", &["app:v1:a".to_string()])
            .await
            .unwrap();

        let mut keys = store.scan("app:v1:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["app:v1:a", "app:v1:b"]);

        assert_eq!(store.scan("app:tag:*").await.unwrap(), vec!["app:tag:x"]);
    }

    #[tokio::test]
    async fn test_memory_sets() {
        let store = MemoryStore::new(100);
        let members = vec!["a".to_string(), "b".to_string()];
        store.set_add("s", &members).await.unwrap();
        store.set_add("s", &["a".to_string()]).await.unwrap();

        let mut got = store.set_members("s").await.unwrap();
        got.sort();
        assert_eq!(got, members);

        store.set_remove("s", &members).await.unwrap();
        assert!(store.set_members("s").await.unwrap().is_empty());
        assert!(!store.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_outage_switch_fails_every_operation() {
        let store = MemoryStore::new(100);
        store.set("k", b"v", None).await.unwrap();

        store.simulate_outage(true);
        assert!(matches!(
            store.get("k").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.set("k", b"v", None).await.is_err());
        assert!(store.publish("c", "m").await.is_err());
        assert!(store.health_check().await.is_err());

        store.simulate_outage(false);
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_shared_hub_delivers_across_stores() {
        let hub = PubSubHub::new();
        let a = MemoryStore::with_hub(100, hub.clone());
        let b = MemoryStore::with_hub(100, hub);

        let mut stream = b.subscribe("sync").await.unwrap();
        let mut other = b.subscribe("other").await.unwrap();

        assert_eq!(a.publish("sync", "hello").await.unwrap(), 2);
        assert_eq!(stream.next().await.as_deref(), Some("hello"));

        a.publish("other", "second").await.unwrap();
        // "hello" went to a different channel and is skipped
        assert_eq!(other.next().await.as_deref(), Some("second"));
    }
}
