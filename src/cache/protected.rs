//! Store-call wrapper: circuit breaker gate, per-attempt timeout and
//! exponential backoff for transient errors
//!
//! A whole retry sequence is one breaker outcome: success closes (or keeps
//! closed) the circuit, exhaustion counts as a single failure. Non-transient
//! errors skip the retries but still count once. A half-open probe whose
//! call is dropped mid-flight (caller timeout, cancelled request) is handed
//! back to the breaker so the circuit cannot stay half-open forever.

use crate::config::RetryConfig;
use crate::error::{CacheError, CacheResult, StoreError, StoreResult};
use crate::metrics::MetricsCollector;
use crate::resilience::{Admission, CircuitBreaker};
use crate::store::{BackingStore, StoreBackend};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Returns an unfinished half-open probe to the breaker on drop
struct ProbeGuard<'a> {
    breaker: &'a CircuitBreaker,
    metrics: &'a MetricsCollector,
    armed: bool,
}

impl ProbeGuard<'_> {
    /// The call reached an outcome; the caller reports it
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.abandon_probe();
            self.metrics.set_circuit_state(self.breaker.state());
        }
    }
}

/// Backing store behind the process-wide circuit breaker
#[derive(Debug, Clone)]
pub struct ProtectedStore {
    store: StoreBackend,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<MetricsCollector>,
    operation_timeout: Duration,
    retry: RetryConfig,
}

impl ProtectedStore {
    pub fn new(
        store: StoreBackend,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<MetricsCollector>,
        operation_timeout: Duration,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            breaker,
            metrics,
            operation_timeout,
            retry,
        }
    }

    /// Unprotected store, for pub/sub which bypasses the breaker
    pub fn inner(&self) -> &StoreBackend {
        &self.store
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    async fn execute<T, F, Fut>(&self, operation: &'static str, mut attempt_fn: F) -> CacheResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let admission = self.breaker.admit();
        if admission == Admission::Rejected {
            return Err(CacheError::CircuitOpen {
                component: self.breaker.name().to_string(),
            });
        }
        let probe = ProbeGuard {
            breaker: &self.breaker,
            metrics: &self.metrics,
            armed: admission == Admission::Probe,
        };

        let mut attempt: u32 = 1;
        let outcome = loop {
            let result = match tokio::time::timeout(self.operation_timeout, attempt_fn()).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout(format!(
                    "{operation} exceeded {}ms",
                    self.operation_timeout.as_millis()
                ))),
            };

            match result {
                Ok(value) => break Ok(value),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    debug!(
                        operation = operation,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient store error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        };

        probe.disarm();
        match outcome {
            Ok(value) => {
                self.breaker.record_success();
                self.metrics.set_circuit_state(self.breaker.state());
                Ok(value)
            }
            Err(e) => {
                self.breaker.record_failure();
                self.metrics.set_circuit_state(self.breaker.state());
                // Callers log the failure with their own context
                debug!(
                    operation = operation,
                    attempts = attempt,
                    error = %e,
                    "Store call failed"
                );
                Err(e.into())
            }
        }
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.execute("get", || self.store.get(key)).await
    }

    pub async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> CacheResult<()> {
        self.execute("set", || self.store.set(key, value, ttl)).await
    }

    pub async fn delete(&self, keys: &[String]) -> CacheResult<u64> {
        self.execute("delete", || self.store.delete(keys)).await
    }

    pub async fn exists(&self, key: &str) -> CacheResult<bool> {
        self.execute("exists", || self.store.exists(key)).await
    }

    pub async fn scan(&self, pattern: &str) -> CacheResult<Vec<String>> {
        self.execute("scan", || self.store.scan(pattern)).await
    }

    pub async fn set_add(&self, key: &str, members: &[String]) -> CacheResult<()> {
        self.execute("set_add", || self.store.set_add(key, members))
            .await
    }

    pub async fn set_remove(&self, key: &str, members: &[String]) -> CacheResult<()> {
        self.execute("set_remove", || self.store.set_remove(key, members))
            .await
    }

    pub async fn set_members(&self, key: &str) -> CacheResult<Vec<String>> {
        self.execute("set_members", || self.store.set_members(key))
            .await
    }

    pub async fn health_check(&self) -> CacheResult<bool> {
        self.execute("health_check", || self.store.health_check())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{CircuitBreakerConfig, CircuitState};
    use crate::store::MemoryStore;

    fn protected(store: &MemoryStore, failure_threshold: u32) -> ProtectedStore {
        let breaker = Arc::new(CircuitBreaker::new(
            "cache",
            CircuitBreakerConfig {
                failure_threshold,
                reset_timeout: Duration::from_secs(60),
            },
        ));
        ProtectedStore::new(
            StoreBackend::from(store.clone()),
            breaker,
            Arc::new(MetricsCollector::new()),
            Duration::from_millis(200),
            RetryConfig {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 2,
            },
        )
    }

    #[tokio::test]
    async fn test_success_passes_through() {
        let memory = MemoryStore::new(10);
        let store = protected(&memory, 5);

        store.set("k", b"v", None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(store.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_exhausted_retries_count_as_one_failure() {
        let memory = MemoryStore::new(10);
        let store = protected(&memory, 5);
        memory.simulate_outage(true);

        let result = store.get("k").await;
        assert!(matches!(
            result,
            Err(CacheError::Store(StoreError::Unavailable(_)))
        ));
        assert_eq!(store.breaker().consecutive_failures(), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_calling_store() {
        let memory = MemoryStore::new(10);
        let store = protected(&memory, 2);
        memory.simulate_outage(true);

        let _ = store.get("k").await;
        let _ = store.get("k").await;
        assert_eq!(store.breaker().state(), CircuitState::Open);

        // Store is back, but the circuit stays open until the reset timeout
        memory.simulate_outage(false);
        assert!(matches!(
            store.get("k").await,
            Err(CacheError::CircuitOpen { .. })
        ));
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let memory = MemoryStore::new(10);
        let store = protected(&memory, 5);

        memory.simulate_outage(true);
        let _ = store.get("k").await;
        let _ = store.get("k").await;
        assert_eq!(store.breaker().consecutive_failures(), 2);

        memory.simulate_outage(false);
        store.get("k").await.unwrap();
        assert_eq!(store.breaker().consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_probe_is_handed_back() {
        let memory = MemoryStore::new(10);
        let mut store = protected(&memory, 1);
        store.retry = RetryConfig {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 1_000,
        };
        memory.simulate_outage(true);
        let _ = store.get("k").await;
        assert_eq!(store.breaker().state(), CircuitState::Open);

        // The probe is dropped while sleeping between attempts
        tokio::time::advance(Duration::from_secs(61)).await;
        let cancelled = tokio::time::timeout(Duration::from_millis(10), store.get("k")).await;
        assert!(cancelled.is_err());
        assert_eq!(store.breaker().state(), CircuitState::Open);

        memory.simulate_outage(false);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.breaker().state(), CircuitState::Closed);
    }
}
