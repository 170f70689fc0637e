//! Periodic backing store health probe
//!
//! Pings the raw store (not through the circuit breaker, so an open circuit
//! does not hide a recovered store), records the `store_healthy` and pool
//! size gauges and logs transitions.

use crate::cache::ProtectedStore;
use crate::metrics::MetricsCollector;
use crate::store::BackingStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug)]
struct Probe {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

#[derive(Debug)]
pub struct HealthProber {
    store: ProtectedStore,
    metrics: Arc<MetricsCollector>,
    interval: Duration,
    healthy: Arc<AtomicBool>,
    task: Mutex<Option<Probe>>,
}

impl HealthProber {
    pub fn new(store: ProtectedStore, metrics: Arc<MetricsCollector>, interval: Duration) -> Self {
        Self {
            store,
            metrics,
            interval,
            healthy: Arc::new(AtomicBool::new(true)),
            task: Mutex::new(None),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Probe once now and record the result
    pub async fn probe(&self) -> bool {
        probe_store(&self.store, &self.metrics, &self.healthy).await
    }

    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let (shutdown, mut shutdown_rx) = broadcast::channel(1);
        let store = self.store.clone();
        let metrics = self.metrics.clone();
        let healthy = self.healthy.clone();
        let period = self.interval;

        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = timer.tick() => {
                        probe_store(&store, &metrics, &healthy).await;
                    }
                }
            }
            debug!("Health prober exited");
        });

        info!(interval_seconds = self.interval.as_secs(), "Store health prober started");
        *task = Some(Probe { shutdown, handle });
    }

    pub async fn stop(&self) {
        let Some(probe) = self.task.lock().await.take() else {
            return;
        };
        let _ = probe.shutdown.send(());
        if let Err(e) = probe.handle.await {
            warn!(error = %e, "Health prober task failed");
        }
    }
}

async fn probe_store(
    store: &ProtectedStore,
    metrics: &MetricsCollector,
    healthy: &AtomicBool,
) -> bool {
    let backend = store.inner();
    let result = tokio::time::timeout(store.operation_timeout(), backend.health_check()).await;
    let is_healthy = matches!(result, Ok(Ok(true)));

    metrics.set_store_healthy(is_healthy);
    metrics.set_connection_pool_size(backend.pool_size());
    metrics.set_circuit_state(store.breaker().state());

    let was_healthy = healthy.swap(is_healthy, Ordering::AcqRel);
    match (was_healthy, is_healthy) {
        (true, false) => {
            let reason = match result {
                Ok(Ok(_)) => "unexpected ping reply".to_string(),
                Ok(Err(e)) => e.to_string(),
                Err(_) => "ping timed out".to_string(),
            };
            warn!(
                provider = backend.provider_name(),
                reason = %reason,
                "Backing store unhealthy"
            );
        }
        (false, true) => info!(provider = backend.provider_name(), "Backing store healthy again"),
        _ => debug!(provider = backend.provider_name(), healthy = is_healthy, "Store health probe"),
    }
    is_healthy
}
