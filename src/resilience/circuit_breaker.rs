//! # Circuit Breaker Implementation
//!
//! Gates calls to the backing store based on recent failure history. One
//! breaker exists per process (not per key).
//!
//! ```text
//!            failure_threshold reached
//!   Closed ─────────────────────────────▶ Open
//!     ▲                                    │ reset_timeout elapsed
//!     │ success                            ▼ (next can_execute)
//!     └──────────────────────────────── HalfOpen ──── failure ──▶ Open
//! ```
//!
//! While half-open exactly one probe call is admitted; its outcome decides
//! the next state. A probe dropped before reporting an outcome is handed
//! back with [`CircuitBreaker::abandon_probe`], which reopens the circuit.
//! Time is read from `tokio::time::Instant` so tests can
//! drive the reset timeout with `tokio::time::pause()` / `advance()`.

use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lock-free atomic counters for circuit breaker metrics.
#[derive(Debug)]
struct AtomicCircuitBreakerMetrics {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    rejected_count: AtomicU64,
    consecutive_failures: AtomicU64,
}

impl AtomicCircuitBreakerMetrics {
    fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_success(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    fn record_failure(&self) -> u64 {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    fn record_rejection(&self) {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, state: CircuitState) -> CircuitBreakerMetrics {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let failure_count = self.failure_count.load(Ordering::Relaxed);
        let failure_rate = if total_calls > 0 {
            failure_count as f64 / total_calls as f64
        } else {
            0.0
        };

        CircuitBreakerMetrics {
            total_calls,
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count,
            rejected_count: self.rejected_count.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            current_state: state,
            failure_rate,
        }
    }
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    #[default]
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - a single probe call is allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Answer to a caller asking to reach the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Circuit open (or the half-open probe is taken)
    Rejected,
    /// Circuit closed
    Allowed,
    /// The single half-open trial call; the caller must report its outcome
    /// or hand it back with [`CircuitBreaker::abandon_probe`]
    Probe,
}

/// Core circuit breaker implementation with atomic state management
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Current circuit state (atomic for thread safety)
    state: AtomicU8,

    config: CircuitBreakerConfig,

    metrics: AtomicCircuitBreakerMetrics,

    /// Reference point for the timestamps below
    epoch: Instant,

    /// Nanos since `epoch` of the failure that opened the circuit, plus one
    /// (0 = never opened)
    last_failure_at_nanos: AtomicU64,

    /// Set once the single half-open probe has been handed out
    probe_in_flight: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            reset_timeout_seconds = config.reset_timeout.as_secs(),
            "Circuit breaker initialized"
        );

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            metrics: AtomicCircuitBreakerMetrics::new(),
            epoch: Instant::now(),
            last_failure_at_nanos: AtomicU64::new(0),
            probe_in_flight: AtomicBool::new(false),
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Consecutive failures recorded since the last success
    pub fn consecutive_failures(&self) -> u64 {
        self.metrics.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Instant of the failure that last opened the circuit
    pub fn last_failure_at(&self) -> Option<Instant> {
        match self.last_failure_at_nanos.load(Ordering::Acquire) {
            0 => None,
            stamp => Some(self.epoch + Duration::from_nanos(stamp - 1)),
        }
    }

    /// Whether the next store call may proceed
    pub fn can_execute(&self) -> bool {
        self.admit() != Admission::Rejected
    }

    /// Ask to reach the store
    ///
    /// Open → HalfOpen happens here, on the first check after the reset
    /// timeout; that check is the one admitted probe.
    pub fn admit(&self) -> Admission {
        let admission = match self.state() {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let opened_nanos = self
                    .last_failure_at_nanos
                    .load(Ordering::Acquire)
                    .saturating_sub(1);
                let elapsed = self.now_nanos().saturating_sub(opened_nanos);

                if elapsed >= self.config.reset_timeout.as_nanos() as u64
                    && self
                        .state
                        .compare_exchange(
                            CircuitState::Open as u8,
                            CircuitState::HalfOpen as u8,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                {
                    // This caller won the transition and owns the probe
                    self.probe_in_flight.store(true, Ordering::Release);
                    info!(component = %self.name, "Circuit breaker half-open (testing recovery)");
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if self
                    .probe_in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
        };

        if admission == Admission::Rejected {
            self.metrics.record_rejection();
            debug!(component = %self.name, "Circuit open, call rejected");
        }
        admission
    }

    /// Hand back a probe whose call ended without an outcome
    ///
    /// The circuit reopens and the reset timeout restarts, so the next probe
    /// is admitted one `reset_timeout` later. No-op unless half-open.
    pub fn abandon_probe(&self) {
        if self.state() != CircuitState::HalfOpen {
            return;
        }

        self.last_failure_at_nanos
            .store(self.now_nanos() + 1, Ordering::Release);
        self.probe_in_flight.store(false, Ordering::Release);
        if self
            .state
            .compare_exchange(
                CircuitState::HalfOpen as u8,
                CircuitState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            warn!(component = %self.name, "Half-open probe abandoned, circuit reopened");
        }
    }

    /// Reset the failure counter and force the circuit closed
    pub fn record_success(&self) {
        self.metrics.record_success();
        self.metrics
            .consecutive_failures
            .store(0, Ordering::Relaxed);

        let previous = self.state.swap(CircuitState::Closed as u8, Ordering::AcqRel);
        self.probe_in_flight.store(false, Ordering::Release);

        if CircuitState::from(previous) != CircuitState::Closed {
            info!(
                component = %self.name,
                previous_state = CircuitState::from(previous).as_str(),
                "Circuit breaker closed (recovered)"
            );
        }
    }

    /// Count a failure; opens the circuit at the threshold or on a failed probe
    pub fn record_failure(&self) {
        let failures = self.metrics.record_failure();

        match self.state() {
            CircuitState::Closed => {
                if failures >= self.config.failure_threshold as u64 {
                    self.transition_to_open(failures);
                } else {
                    debug!(
                        component = %self.name,
                        consecutive_failures = failures,
                        failure_threshold = self.config.failure_threshold,
                        "Failure recorded"
                    );
                }
            }
            CircuitState::HalfOpen => self.transition_to_open(failures),
            CircuitState::Open => {
                // Already open, just record the failure
            }
        }
    }

    fn transition_to_open(&self, consecutive_failures: u64) {
        self.last_failure_at_nanos
            .store(self.now_nanos() + 1, Ordering::Release);
        self.probe_in_flight.store(false, Ordering::Release);
        self.state
            .store(CircuitState::Open as u8, Ordering::Release);

        error!(
            component = %self.name,
            consecutive_failures = consecutive_failures,
            failure_threshold = self.config.failure_threshold,
            reset_timeout_seconds = self.config.reset_timeout.as_secs(),
            "Circuit breaker opened (failing fast)"
        );
    }

    /// Counter snapshot for the stats endpoint
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        self.metrics.snapshot(self.state())
    }

    fn now_nanos(&self) -> u64 {
        Instant::now().duration_since(self.epoch).as_nanos() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, reset: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: reset,
            },
        )
    }

    #[tokio::test]
    async fn test_circuit_breaker_normal_operation() {
        let circuit = breaker(3, Duration::from_millis(100));
        assert_eq!(circuit.state(), CircuitState::Closed);

        assert_eq!(circuit.admit(), Admission::Allowed);
        circuit.record_success();

        let metrics = circuit.metrics();
        assert_eq!(metrics.total_calls, 1);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 0);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let circuit = breaker(3, Duration::from_secs(1));
        circuit.record_failure();
        circuit.record_failure();
        assert_eq!(circuit.consecutive_failures(), 2);

        circuit.record_success();
        assert_eq!(circuit.consecutive_failures(), 0);

        circuit.record_failure();
        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_transition_cycle_with_mock_time() {
        let circuit = breaker(5, Duration::from_secs(60));

        for _ in 0..4 {
            circuit.record_failure();
            assert_eq!(circuit.state(), CircuitState::Closed);
        }
        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(circuit.last_failure_at().is_some());
        assert!(!circuit.can_execute());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!circuit.can_execute());
        assert_eq!(circuit.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(circuit.can_execute());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);
        // exactly one probe
        assert!(!circuit.can_execute());

        circuit.record_success();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.consecutive_failures(), 0);
        assert!(circuit.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens() {
        let circuit = breaker(1, Duration::from_secs(10));
        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(circuit.can_execute());
        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Open);

        // the reset timeout restarts from the failed probe
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!circuit.can_execute());
    }

    #[tokio::test]
    async fn test_rejections_are_counted() {
        let circuit = breaker(2, Duration::from_secs(30));

        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Closed);
        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Open);

        assert_eq!(circuit.admit(), Admission::Rejected);
        assert!(!circuit.can_execute());

        let metrics = circuit.metrics();
        assert_eq!(metrics.rejected_count, 2);
        assert_eq!(metrics.failure_count, 2);
        assert!((metrics.failure_rate - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_reopens_and_is_handed_out_again() {
        let circuit = breaker(1, Duration::from_secs(10));
        circuit.record_failure();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(circuit.admit(), Admission::Probe);
        assert_eq!(circuit.admit(), Admission::Rejected);

        circuit.abandon_probe();
        assert_eq!(circuit.state(), CircuitState::Open);
        assert_eq!(circuit.admit(), Admission::Rejected);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(circuit.admit(), Admission::Probe);
        circuit.record_success();
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_abandon_outside_half_open_is_ignored() {
        let circuit = breaker(3, Duration::from_secs(10));
        circuit.abandon_probe();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert!(circuit.last_failure_at().is_none());
    }
}
