//! Error types for the cache layer
//!
//! Nothing in this crate surfaces these errors through the public
//! [`CacheService`](crate::service::CacheService) contract; they flow between
//! internal layers and end up in logs and metrics. The facade converts every
//! `Err` into its fail-open outcome.

use thiserror::Error;

/// Errors raised by a backing store adapter
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Failed to connect to (or lost connection with) the store
    #[error("Store connection error: {0}")]
    Connection(String),

    /// Store round-trip exceeded the configured operation timeout
    #[error("Store operation timed out: {0}")]
    Timeout(String),

    /// Store answered with an error
    #[error("Store backend error: {0}")]
    Backend(String),

    /// Store is deliberately unavailable (in-memory outage switch)
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether a retry with backoff may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Connection(_) | StoreError::Timeout(_) | StoreError::Unavailable(_)
        )
    }

    /// Short label used as a metric attribute
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Connection(_) => "connection",
            StoreError::Timeout(_) => "timeout",
            StoreError::Backend(_) => "backend",
            StoreError::Unavailable(_) => "unavailable",
        }
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() {
            StoreError::Timeout(e.to_string())
        } else if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Backend(e.to_string())
        }
    }
}

/// Result type for store adapter operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur inside the cache layer
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backing store failed (after retries, where applicable)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Circuit breaker rejected the call without attempting it
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Value could not be represented as a JSON document, or a stored
    /// payload could not be decoded
    #[error("Cache serialization error: {0}")]
    Serialization(String),

    /// Compression or decompression failed
    #[error("Cache compression error: {0}")]
    Compression(String),

    /// Invalid configuration
    #[error("Cache configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    /// Short label used as a metric attribute
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::Store(e) => e.kind(),
            CacheError::CircuitOpen { .. } => "circuit_open",
            CacheError::Serialization(_) => "serialization",
            CacheError::Compression(_) => "compression",
            CacheError::Configuration(_) => "configuration",
        }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(e: serde_json::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
