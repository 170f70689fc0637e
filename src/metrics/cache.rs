//! # Cache Metrics
//!
//! OpenTelemetry instruments for the cache layer:
//! - Hit/miss/error counters and per-operation latency
//! - Warmup, sync, version and tag activity counters
//! - Pool size, sync listener, warmup queue, circuit and health gauges
//!
//! ```rust
//! use cache_sync_core::metrics::cache::*;
//! use opentelemetry::KeyValue;
//!
//! cache_operation_duration().record(1.7, &[KeyValue::new("operation", "get")]);
//! cache_errors_total().add(
//!     1,
//!     &[
//!         KeyValue::new("operation", "set"),
//!         KeyValue::new("kind", "timeout"),
//!     ],
//! );
//! ```

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use std::sync::OnceLock;

static CACHE_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    CACHE_METER.get_or_init(|| opentelemetry::global::meter_provider().meter("cache-sync"))
}

// Counters

pub fn cache_hits_total() -> Counter<u64> {
    meter()
        .u64_counter("cache.hits.total")
        .with_description("Total number of cache reads that found an entry")
        .build()
}

pub fn cache_misses_total() -> Counter<u64> {
    meter()
        .u64_counter("cache.misses.total")
        .with_description("Total number of cache reads that found nothing (including fail-open reads)")
        .build()
}

/// Failed cache operations
///
/// Labels:
/// - operation: get, set, delete, clear_pattern, ...
/// - kind: connection, timeout, backend, unavailable, circuit_open, serialization, compression
pub fn cache_errors_total() -> Counter<u64> {
    meter()
        .u64_counter("cache.errors.total")
        .with_description("Total number of failed cache operations")
        .build()
}

/// Labels:
/// - result: success, failure
pub fn warmup_items_total() -> Counter<u64> {
    meter()
        .u64_counter("cache.warmup.items.total")
        .with_description("Total number of warmup items processed")
        .build()
}

/// Labels:
/// - direction: published, received
/// - type: update, invalidate
pub fn sync_operations_total() -> Counter<u64> {
    meter()
        .u64_counter("cache.sync.operations.total")
        .with_description("Total number of distributed sync messages published or applied")
        .build()
}

pub fn version_changes_total() -> Counter<u64> {
    meter()
        .u64_counter("cache.version.changes.total")
        .with_description("Total number of global version increments")
        .build()
}

/// Labels:
/// - operation: add, remove, invalidate, clear, prune
pub fn tag_operations_total() -> Counter<u64> {
    meter()
        .u64_counter("cache.tag.operations.total")
        .with_description("Total number of tag index operations")
        .build()
}

// Histograms

/// Labels:
/// - operation: get, set, delete, clear_pattern, exists
pub fn cache_operation_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("cache.operation.duration")
        .with_description("Cache operation latency in milliseconds")
        .with_unit("ms")
        .build()
}

// Gauges

pub fn connection_pool_size() -> Gauge<u64> {
    meter()
        .u64_gauge("cache.store.pool_size")
        .with_description("Number of pooled backing store connections")
        .build()
}

pub fn active_sync_listeners() -> Gauge<u64> {
    meter()
        .u64_gauge("cache.sync.listeners.active")
        .with_description("Number of running distributed sync listeners")
        .build()
}

pub fn warmup_queue_depth() -> Gauge<u64> {
    meter()
        .u64_gauge("cache.warmup.queue.depth")
        .with_description("Number of warmup items waiting to be processed")
        .build()
}

/// 0 = closed, 1 = open, 2 = half-open
pub fn circuit_state() -> Gauge<u64> {
    meter()
        .u64_gauge("cache.circuit.state")
        .with_description("Backing store circuit breaker state")
        .build()
}

/// 1 = healthy, 0 = unhealthy
pub fn store_healthy() -> Gauge<u64> {
    meter()
        .u64_gauge("cache.store.healthy")
        .with_description("Result of the last backing store health probe")
        .build()
}
