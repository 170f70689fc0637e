//! No-op store adapter
//!
//! Used when the configuration names no usable store. Reads miss, writes are
//! discarded, subscriptions never yield and the health check reports the
//! store as down, so the node keeps serving (uncached) instead of refusing to
//! start while stats show that nothing is being cached.

use super::traits::{BackingStore, MessageStream};
use crate::error::StoreResult;
use futures::StreamExt;
use std::time::Duration;

/// Store that never stores anything
#[derive(Debug, Clone, Default)]
pub struct NoOpStore;

impl NoOpStore {
    pub fn new() -> Self {
        Self
    }
}

impl BackingStore for NoOpStore {
    async fn get(&self, _key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &[u8], _ttl: Option<Duration>) -> StoreResult<()> {
        Ok(())
    }

    async fn delete(&self, _keys: &[String]) -> StoreResult<u64> {
        Ok(0)
    }

    async fn exists(&self, _key: &str) -> StoreResult<bool> {
        Ok(false)
    }

    async fn scan(&self, _pattern: &str) -> StoreResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn set_add(&self, _key: &str, _members: &[String]) -> StoreResult<()> {
        Ok(())
    }

    async fn set_remove(&self, _key: &str, _members: &[String]) -> StoreResult<()> {
        Ok(())
    }

    async fn set_members(&self, _key: &str) -> StoreResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn publish(&self, _channel: &str, _payload: &str) -> StoreResult<u64> {
        Ok(0)
    }

    async fn subscribe(&self, _channel: &str) -> StoreResult<MessageStream> {
        Ok(futures::stream::pending::<String>().boxed())
    }

    async fn health_check(&self) -> StoreResult<bool> {
        Ok(false)
    }

    fn provider_name(&self) -> &'static str {
        "noop"
    }

    fn pool_size(&self) -> usize {
        0
    }
}
