//! # Circuit Breaker Metrics
//!
//! Point-in-time snapshot of the store circuit breaker's counters, read
//! through [`crate::CacheService::circuit_breaker`].

use crate::resilience::CircuitState;
use serde::{Deserialize, Serialize};

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of calls whose outcome was recorded
    pub total_calls: u64,

    pub success_count: u64,

    pub failure_count: u64,

    /// Calls turned away without reaching the store
    pub rejected_count: u64,

    /// Current consecutive failure count
    pub consecutive_failures: u64,

    pub current_state: CircuitState,

    /// Calculated failure rate (0.0 to 1.0)
    pub failure_rate: f64,
}
