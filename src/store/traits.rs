//! Backing store trait definition

use crate::error::StoreResult;
use futures::stream::BoxStream;
use std::future::Future;
use std::time::Duration;

/// Stream of payloads received on a subscribed channel
///
/// The stream ends when the underlying subscription is lost.
pub type MessageStream = BoxStream<'static, String>;

/// Primitives the cache layer needs from a key/value store
///
/// Any store offering TTL'd values, pattern scans, sets and pub/sub can be
/// adapted. Keys arriving here are already fully namespaced; adapters apply
/// no prefixing of their own.
pub trait BackingStore: Send + Sync {
    /// Fetch a raw payload; `Ok(None)` on miss or expiry
    fn get(&self, key: &str) -> impl Future<Output = StoreResult<Option<Vec<u8>>>> + Send;

    /// Store a payload, expiring after `ttl` when given, never otherwise
    fn set(
        &self,
        key: &str,
        value: &[u8],
        ttl: Option<Duration>,
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Delete keys of any type, returning how many existed
    fn delete(&self, keys: &[String]) -> impl Future<Output = StoreResult<u64>> + Send;

    fn exists(&self, key: &str) -> impl Future<Output = StoreResult<bool>> + Send;

    /// All keys matching a Redis-style glob (`*`, `?`, `[abc]`, `\` escapes)
    fn scan(&self, pattern: &str) -> impl Future<Output = StoreResult<Vec<String>>> + Send;

    /// Add members to the set stored at `key`
    fn set_add(
        &self,
        key: &str,
        members: &[String],
    ) -> impl Future<Output = StoreResult<()>> + Send;

    /// Remove members from the set stored at `key`
    fn set_remove(
        &self,
        key: &str,
        members: &[String],
    ) -> impl Future<Output = StoreResult<()>> + Send;

    fn set_members(&self, key: &str) -> impl Future<Output = StoreResult<Vec<String>>> + Send;

    /// Publish to a channel, returning the number of receivers reached
    fn publish(
        &self,
        channel: &str,
        payload: &str,
    ) -> impl Future<Output = StoreResult<u64>> + Send;

    /// Open a dedicated subscription to `channel`
    fn subscribe(&self, channel: &str) -> impl Future<Output = StoreResult<MessageStream>> + Send;

    /// Check if the store answers
    fn health_check(&self) -> impl Future<Output = StoreResult<bool>> + Send;

    /// Get the name of the store adapter
    fn provider_name(&self) -> &'static str;

    /// Number of pooled connections held by the adapter
    fn pool_size(&self) -> usize;
}
