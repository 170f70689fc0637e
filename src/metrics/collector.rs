//! In-process metrics collector
//!
//! Atomic counters and gauges plus a fixed-bucket latency histogram per
//! operation. Every update is mirrored to the OpenTelemetry instruments in
//! [`super::cache`].

use super::cache;
use crate::resilience::{CircuitBreakerMetrics, CircuitState};
use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Histogram bucket upper bounds in milliseconds; the last bucket is open
const LATENCY_BUCKETS_MS: [f64; 12] = [
    0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 5_000.0,
];

#[derive(Debug, Default)]
struct LatencyHistogram {
    buckets: [u64; LATENCY_BUCKETS_MS.len() + 1],
    count: u64,
    sum_ms: f64,
    max_ms: f64,
}

impl LatencyHistogram {
    fn record(&mut self, millis: f64) {
        let index = LATENCY_BUCKETS_MS
            .iter()
            .position(|bound| millis <= *bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len());
        self.buckets[index] += 1;
        self.count += 1;
        self.sum_ms += millis;
        if millis > self.max_ms {
            self.max_ms = millis;
        }
    }

    /// Upper bound of the bucket holding the given quantile (max for the open bucket)
    fn quantile(&self, q: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let rank = ((self.count as f64) * q).ceil().max(1.0) as u64;
        let mut seen = 0;
        for (index, count) in self.buckets.iter().enumerate() {
            seen += count;
            if seen >= rank {
                return LATENCY_BUCKETS_MS
                    .get(index)
                    .map(|bound| bound.min(self.max_ms))
                    .unwrap_or(self.max_ms);
            }
        }
        self.max_ms
    }

    fn snapshot(&self) -> LatencySnapshot {
        LatencySnapshot {
            count: self.count,
            mean_ms: if self.count == 0 {
                0.0
            } else {
                self.sum_ms / self.count as f64
            },
            max_ms: self.max_ms,
            p50_ms: self.quantile(0.50),
            p95_ms: self.quantile(0.95),
            p99_ms: self.quantile(0.99),
        }
    }
}

/// Latency summary for one operation
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LatencySnapshot {
    pub count: u64,
    pub mean_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Point-in-time view of every cache metric
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    /// hits / (hits + misses); 0 when nothing has been read
    pub hit_rate: f64,
    pub warmup_items_processed: u64,
    pub warmup_failures: u64,
    pub sync_published: u64,
    pub sync_received: u64,
    pub version_changes: u64,
    pub tag_operations: u64,
    pub connection_pool_size: u64,
    pub active_sync_listeners: u64,
    pub warmup_queue_depth: u64,
    pub store_healthy: bool,
    pub circuit_state: CircuitState,
    /// Store circuit breaker counters (calls, rejections, failure rate)
    pub circuit_breaker: CircuitBreakerMetrics,
    pub operations: BTreeMap<String, LatencySnapshot>,
}

impl StatsSnapshot {
    /// Messages published plus peer messages applied
    pub fn sync_operations(&self) -> u64 {
        self.sync_published + self.sync_received
    }
}

/// Process-wide cache metrics
#[derive(Debug)]
pub struct MetricsCollector {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
    warmup_items_processed: AtomicU64,
    warmup_failures: AtomicU64,
    sync_published: AtomicU64,
    sync_received: AtomicU64,
    version_changes: AtomicU64,
    tag_operations: AtomicU64,
    connection_pool_size: AtomicU64,
    active_sync_listeners: AtomicU64,
    warmup_queue_depth: AtomicU64,
    store_healthy: AtomicBool,
    latencies: RwLock<HashMap<&'static str, LatencyHistogram>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            warmup_items_processed: AtomicU64::new(0),
            warmup_failures: AtomicU64::new(0),
            sync_published: AtomicU64::new(0),
            sync_received: AtomicU64::new(0),
            version_changes: AtomicU64::new(0),
            tag_operations: AtomicU64::new(0),
            connection_pool_size: AtomicU64::new(0),
            active_sync_listeners: AtomicU64::new(0),
            warmup_queue_depth: AtomicU64::new(0),
            store_healthy: AtomicBool::new(true),
            latencies: RwLock::new(HashMap::new()),
        }
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        cache::cache_hits_total().add(1, &[]);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        cache::cache_misses_total().add(1, &[]);
    }

    pub fn record_error(&self, operation: &'static str, kind: &'static str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        cache::cache_errors_total().add(
            1,
            &[
                KeyValue::new("operation", operation),
                KeyValue::new("kind", kind),
            ],
        );
    }

    pub fn record_latency(&self, operation: &'static str, elapsed: Duration) {
        let millis = elapsed.as_secs_f64() * 1_000.0;
        self.latencies
            .write()
            .entry(operation)
            .or_default()
            .record(millis);
        cache::cache_operation_duration().record(millis, &[KeyValue::new("operation", operation)]);
    }

    pub fn record_warmup_item(&self, success: bool) {
        if success {
            self.warmup_items_processed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.warmup_failures.fetch_add(1, Ordering::Relaxed);
        }
        cache::warmup_items_total().add(
            1,
            &[KeyValue::new(
                "result",
                if success { "success" } else { "failure" },
            )],
        );
    }

    pub fn record_sync_published(&self, message_type: &'static str) {
        self.sync_published.fetch_add(1, Ordering::Relaxed);
        cache::sync_operations_total().add(
            1,
            &[
                KeyValue::new("direction", "published"),
                KeyValue::new("type", message_type),
            ],
        );
    }

    pub fn record_sync_received(&self, message_type: &'static str) {
        self.sync_received.fetch_add(1, Ordering::Relaxed);
        cache::sync_operations_total().add(
            1,
            &[
                KeyValue::new("direction", "received"),
                KeyValue::new("type", message_type),
            ],
        );
    }

    pub fn record_version_change(&self) {
        self.version_changes.fetch_add(1, Ordering::Relaxed);
        cache::version_changes_total().add(1, &[]);
    }

    pub fn record_tag_operation(&self, operation: &'static str) {
        self.tag_operations.fetch_add(1, Ordering::Relaxed);
        cache::tag_operations_total().add(1, &[KeyValue::new("operation", operation)]);
    }

    pub fn set_connection_pool_size(&self, size: usize) {
        self.connection_pool_size
            .store(size as u64, Ordering::Relaxed);
        cache::connection_pool_size().record(size as u64, &[]);
    }

    pub fn sync_listener_started(&self) {
        let active = self.active_sync_listeners.fetch_add(1, Ordering::Relaxed) + 1;
        cache::active_sync_listeners().record(active, &[]);
    }

    pub fn sync_listener_stopped(&self) {
        let previous = self
            .active_sync_listeners
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        cache::active_sync_listeners().record(previous.saturating_sub(1), &[]);
    }

    pub fn set_warmup_queue_depth(&self, depth: usize) {
        self.warmup_queue_depth.store(depth as u64, Ordering::Relaxed);
        cache::warmup_queue_depth().record(depth as u64, &[]);
    }

    pub fn set_store_healthy(&self, healthy: bool) {
        self.store_healthy.store(healthy, Ordering::Relaxed);
        cache::store_healthy().record(u64::from(healthy), &[]);
    }

    pub fn set_circuit_state(&self, state: CircuitState) {
        cache::circuit_state().record(state as u64, &[]);
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        match hits + misses {
            0 => 0.0,
            total => hits as f64 / total as f64,
        }
    }

    /// Aggregate everything into a serializable snapshot
    pub fn snapshot(&self, circuit_breaker: CircuitBreakerMetrics) -> StatsSnapshot {
        let operations = self
            .latencies
            .read()
            .iter()
            .map(|(operation, histogram)| (operation.to_string(), histogram.snapshot()))
            .collect();

        StatsSnapshot {
            timestamp: Utc::now(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            hit_rate: self.hit_rate(),
            warmup_items_processed: self.warmup_items_processed.load(Ordering::Relaxed),
            warmup_failures: self.warmup_failures.load(Ordering::Relaxed),
            sync_published: self.sync_published.load(Ordering::Relaxed),
            sync_received: self.sync_received.load(Ordering::Relaxed),
            version_changes: self.version_changes.load(Ordering::Relaxed),
            tag_operations: self.tag_operations.load(Ordering::Relaxed),
            connection_pool_size: self.connection_pool_size.load(Ordering::Relaxed),
            active_sync_listeners: self.active_sync_listeners.load(Ordering::Relaxed),
            warmup_queue_depth: self.warmup_queue_depth.load(Ordering::Relaxed),
            store_healthy: self.store_healthy.load(Ordering::Relaxed),
            circuit_state: circuit_breaker.current_state,
            circuit_breaker,
            operations,
        }
    }
}
