//! Wire format for cross-instance cache messages
//!
//! ```json
//! {"type":"update","key":"k","value":{"a":1},"ttl":30.0,"originInstanceId":"..."}
//! {"type":"invalidate","key":"k","originInstanceId":"..."}
//! ```
//!
//! `ttl` is in seconds and may be fractional.

use crate::error::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMessageType {
    Update,
    Invalidate,
}

impl SyncMessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMessageType::Update => "update",
            SyncMessageType::Invalidate => "invalidate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    #[serde(rename = "type")]
    pub message_type: SyncMessageType,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<f64>,
    pub origin_instance_id: String,
}

impl SyncMessage {
    pub fn update(
        key: impl Into<String>,
        value: Value,
        ttl: Option<Duration>,
        origin_instance_id: impl Into<String>,
    ) -> Self {
        Self {
            message_type: SyncMessageType::Update,
            key: key.into(),
            value: Some(value),
            ttl: ttl.map(|ttl| ttl.as_secs_f64()),
            origin_instance_id: origin_instance_id.into(),
        }
    }

    pub fn invalidate(key: impl Into<String>, origin_instance_id: impl Into<String>) -> Self {
        Self {
            message_type: SyncMessageType::Invalidate,
            key: key.into(),
            value: None,
            ttl: None,
            origin_instance_id: origin_instance_id.into(),
        }
    }

    /// TTL as a duration; errors on negative or non-finite values
    pub fn ttl_duration(&self) -> CacheResult<Option<Duration>> {
        self.ttl
            .map(|seconds| {
                Duration::try_from_secs_f64(seconds).map_err(|e| {
                    CacheError::Serialization(format!("invalid ttl {seconds}: {e}"))
                })
            })
            .transpose()
    }

    pub fn to_json(&self) -> CacheResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(payload: &str) -> CacheResult<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}
