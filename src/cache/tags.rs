//! Tag → key-set index for grouped invalidation
//!
//! Each tag is a store set of logical keys. Invalidating a tag deletes the
//! entries but keeps the set, so repopulating a key restores the association
//! without re-tagging. Members whose entry has gone are removed by
//! [`TagIndex::prune_stale`], run on every reconcile tick.

use super::core::CacheCore;
use crate::error::CacheResult;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Direction of a tag-set membership change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TagUpdate {
    Add,
    Remove,
}

impl TagUpdate {
    fn as_str(self) -> &'static str {
        match self {
            TagUpdate::Add => "add",
            TagUpdate::Remove => "remove",
        }
    }
}

#[derive(Debug)]
pub struct TagIndex {
    core: Arc<CacheCore>,
}

impl TagIndex {
    pub fn new(core: Arc<CacheCore>) -> Self {
        Self { core }
    }

    pub async fn add_tags(&self, key: &str, tags: &[String]) -> bool {
        self.update_tags(TagUpdate::Add, key, tags).await
    }

    /// Drop `key` from each tag set; the entry itself is untouched
    pub async fn remove_tags(&self, key: &str, tags: &[String]) -> bool {
        self.update_tags(TagUpdate::Remove, key, tags).await
    }

    async fn update_tags(&self, update: TagUpdate, key: &str, tags: &[String]) -> bool {
        let operation = update.as_str();
        let member = [key.to_string()];
        let store = self.core.store();
        let mut ok = true;

        for tag in tags {
            let tag_key = self.core.keys().tag(tag);
            let result = match update {
                TagUpdate::Add => store.set_add(&tag_key, &member).await,
                TagUpdate::Remove => store.set_remove(&tag_key, &member).await,
            };
            if let Err(e) = result {
                warn!(operation = operation, key = key, tag = %tag, error = %e, "Tag update failed");
                self.core.metrics().record_error("tags", e.kind());
                ok = false;
            }
        }

        if !tags.is_empty() {
            self.core.metrics().record_tag_operation(operation);
        }
        ok
    }

    /// Logical keys carrying `tag`; empty if the index cannot be read
    pub async fn get_keys_by_tag(&self, tag: &str) -> Vec<String> {
        match self.try_get_keys_by_tag(tag).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(tag = tag, error = %e, "Tag lookup failed");
                self.core.metrics().record_error("tags", e.kind());
                Vec::new()
            }
        }
    }

    pub async fn try_get_keys_by_tag(&self, tag: &str) -> CacheResult<Vec<String>> {
        let mut keys = self
            .core
            .store()
            .set_members(&self.core.keys().tag(tag))
            .await?;
        keys.sort_unstable();
        Ok(keys)
    }

    /// Delete every entry tagged `tag`, keeping the tag set
    ///
    /// Returns the keys that were deleted; `None` on failure.
    pub async fn invalidate_by_tag(&self, tag: &str) -> Option<Vec<String>> {
        let keys = match self.try_get_keys_by_tag(tag).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(tag = tag, error = %e, "Tag invalidation failed reading index");
                self.core.metrics().record_error("tags", e.kind());
                return None;
            }
        };

        self.core.metrics().record_tag_operation("invalidate");
        if !self.core.delete_many(&keys).await {
            return None;
        }

        debug!(tag = tag, keys = keys.len(), "Tag invalidated");
        Some(keys)
    }

    /// Remove the tag set itself; entries stay
    pub async fn clear_tag(&self, tag: &str) -> bool {
        let tag_key = self.core.keys().tag(tag);
        match self.core.store().delete(&[tag_key]).await {
            Ok(_) => {
                self.core.metrics().record_tag_operation("clear");
                true
            }
            Err(e) => {
                warn!(tag = tag, error = %e, "Tag clear failed");
                self.core.metrics().record_error("tags", e.kind());
                false
            }
        }
    }

    /// Drop memberships whose entry no longer exists under the current version
    ///
    /// Stops at the first store error so that an unreadable entry is never
    /// mistaken for a missing one. Returns the number of memberships removed.
    pub async fn prune_stale(&self) -> CacheResult<usize> {
        let store = self.core.store();
        let tag_keys = store.scan(&self.core.keys().tag_pattern()).await?;
        let mut removed = 0;

        for tag_key in tag_keys {
            let members = store.set_members(&tag_key).await?;
            let mut stale = Vec::new();
            for member in members {
                if !self.core.try_exists(&member).await? {
                    stale.push(member);
                }
            }

            if !stale.is_empty() {
                store.set_remove(&tag_key, &stale).await?;
                debug!(
                    tag = self.core.keys().tag_name(&tag_key).unwrap_or(&tag_key),
                    removed = stale.len(),
                    "Pruned stale tag members"
                );
                removed += stale.len();
            }
        }

        if removed > 0 {
            self.core.metrics().record_tag_operation("prune");
            info!(removed = removed, "Tag index pruned");
        }
        Ok(removed)
    }
}
