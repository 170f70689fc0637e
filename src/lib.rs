#![allow(clippy::doc_markdown)] // Allow technical terms like Redis, Dragonfly in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Cache Sync Core
//!
//! Distributed cache layer for request-serving instances that share one
//! Redis-compatible store.
//!
//! ## Overview
//!
//! Values are JSON documents, gzip-compressed above a size threshold and
//! stored under versioned keys. Entries can be dropped individually, by glob
//! pattern, by tag, or all at once by bumping the global version token.
//! Writes made on one instance are broadcast to the others over pub/sub.
//!
//! Every store call goes through a single circuit breaker with a per-call
//! timeout and bounded retry. When the store is slow or down the cache fails
//! open: reads miss, writes report `false`, and the request path keeps going.
//!
//! ## Module Organization
//!
//! - [`service`] - `CacheService` facade the request layer holds
//! - [`cache`] - Core get/set/delete, codec, key layout, tags and versions
//! - [`store`] - Backing store trait with Redis, in-memory and no-op backends
//! - [`sync`] - Cross-instance update/invalidate messages
//! - [`scheduler`] - Warmup queue, reconcile loop and health probe
//! - [`resilience`] - Circuit breaker
//! - [`metrics`] - Stats snapshot and OpenTelemetry export
//! - [`config`] - Configuration types and loader
//! - [`error`] - Structured error handling
//! - [`logging`] - tracing subscriber setup
//! - [`shutdown`] - Signal-driven shutdown token
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cache_sync_core::config::ConfigLoader;
//! use cache_sync_core::service::{tags_for_path, CacheService};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load()?;
//! let cache = CacheService::from_config(config).await;
//! cache.start().await;
//!
//! let path = "/api/v1/users";
//! cache
//!     .set_with_tags(path, &serde_json::json!({"users": []}), None, &tags_for_path(path))
//!     .await;
//!
//! // Later, after a user changes
//! cache.invalidate_by_tag("path:users").await;
//!
//! cache.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                                   # Unit and in-memory integration tests
//! REDIS_URL=redis://localhost:6379 \
//!     cargo test --features test-services      # Adds live Redis tests
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod resilience;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod store;
pub mod sync;

pub use cache::{CacheCore, TagIndex, VersionManager};
pub use config::{CacheSyncConfig, ConfigLoader};
pub use error::{CacheError, CacheResult, StoreError};
pub use metrics::{MetricsCollector, StatsSnapshot};
pub use resilience::{CircuitBreaker, CircuitState};
pub use scheduler::{ReconcileContext, Reconciler, WarmupItem};
pub use service::{tags_for_path, CacheService};
pub use store::{BackingStore, MemoryStore, StoreBackend};
pub use sync::{DistributedSyncBus, SyncMessage, SyncMessageType};
