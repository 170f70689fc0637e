//! # Resilience Module
//!
//! Fault isolation for the backing store. A single [`CircuitBreaker`] gates
//! every store call made by the cache core so a failing store costs a fast
//! miss instead of a timeout per request.
//!
//! ## Usage
//!
//! ```rust
//! use cache_sync_core::resilience::{Admission, CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     "cache",
//!     CircuitBreakerConfig {
//!         failure_threshold: 5,
//!         reset_timeout: Duration::from_secs(60),
//!     },
//! );
//!
//! if breaker.admit() != Admission::Rejected {
//!     // ... call the store, then report the outcome
//!     breaker.record_success();
//! }
//! assert_eq!(breaker.metrics().success_count, 1);
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod metrics;

pub use circuit_breaker::{Admission, CircuitBreaker, CircuitState};
pub use config::CircuitBreakerConfig;
pub use metrics::CircuitBreakerMetrics;
