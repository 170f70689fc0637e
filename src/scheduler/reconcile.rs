//! ReconcileScheduler: fixed-interval repair pass
//!
//! Each tick first prunes tag memberships pointing at absent entries (when
//! `reconcile.prune_tags` is on), then invokes the registered
//! [`Reconciler`], if any. A tick runs in its own task: an error or a panic
//! is logged as a failed tick and the next tick runs normally.

use crate::cache::{CacheCore, TagIndex};
use crate::config::ReconcileConfig;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// What a reconciler can touch
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    pub core: Arc<CacheCore>,
    pub tags: Arc<TagIndex>,
    /// 1-based tick number since the scheduler was created
    pub tick: u64,
}

/// Store-specific repair logic registered by an external collaborator
#[async_trait]
pub trait Reconciler: Send + Sync {
    fn name(&self) -> &str {
        "reconciler"
    }

    async fn reconcile(&self, context: &ReconcileContext) -> anyhow::Result<()>;
}

type SharedReconciler = Arc<RwLock<Option<Arc<dyn Reconciler>>>>;

#[derive(Debug)]
struct Runner {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Everything one tick needs, cheap to clone into the tick task
#[derive(Clone)]
struct TickRunner {
    core: Arc<CacheCore>,
    tags: Arc<TagIndex>,
    prune_tags: bool,
    reconciler: SharedReconciler,
    ticks: Arc<AtomicU64>,
    failed_ticks: Arc<AtomicU64>,
}

impl TickRunner {
    /// Run one tick in its own task; `true` when it completed cleanly
    async fn run_tick(&self) -> bool {
        let tick = self.ticks.fetch_add(1, Ordering::AcqRel) + 1;
        let runner = self.clone();
        let outcome = tokio::spawn(async move { runner.tick_body(tick).await }).await;

        let success = match outcome {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!(tick = tick, error = %e, "Reconcile tick failed");
                false
            }
            Err(e) => {
                error!(tick = tick, error = %e, "Reconcile tick panicked");
                false
            }
        };

        if !success {
            self.failed_ticks.fetch_add(1, Ordering::AcqRel);
        }
        success
    }

    async fn tick_body(&self, tick: u64) -> anyhow::Result<()> {
        let start = std::time::Instant::now();

        if self.prune_tags {
            let pruned = self.tags.prune_stale().await?;
            debug!(tick = tick, pruned = pruned, "Tag prune complete");
        }

        let reconciler = self.reconciler.read().clone();
        if let Some(reconciler) = reconciler {
            let context = ReconcileContext {
                core: self.core.clone(),
                tags: self.tags.clone(),
                tick,
            };
            reconciler.reconcile(&context).await.map_err(|e| {
                anyhow::anyhow!("reconciler '{}' failed: {e:#}", reconciler.name())
            })?;
        }

        debug!(
            tick = tick,
            duration_ms = start.elapsed().as_millis() as u64,
            "Reconcile tick complete"
        );
        Ok(())
    }
}

pub struct ReconcileScheduler {
    runner: TickRunner,
    config: ReconcileConfig,
    task: Mutex<Option<Runner>>,
}

impl std::fmt::Debug for ReconcileScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileScheduler")
            .field("config", &self.config)
            .field("ticks", &self.ticks())
            .field("failed_ticks", &self.failed_ticks())
            .finish_non_exhaustive()
    }
}

impl ReconcileScheduler {
    pub fn new(core: Arc<CacheCore>, tags: Arc<TagIndex>, config: ReconcileConfig) -> Self {
        Self {
            runner: TickRunner {
                core,
                tags,
                prune_tags: config.prune_tags,
                reconciler: Arc::new(RwLock::new(None)),
                ticks: Arc::new(AtomicU64::new(0)),
                failed_ticks: Arc::new(AtomicU64::new(0)),
            },
            config,
            task: Mutex::new(None),
        }
    }

    /// Register (or replace) the reconciliation callback; takes effect on the next tick
    pub fn set_reconciler(&self, reconciler: Arc<dyn Reconciler>) {
        info!(reconciler = reconciler.name(), "Reconciler registered");
        *self.runner.reconciler.write() = Some(reconciler);
    }

    pub fn ticks(&self) -> u64 {
        self.runner.ticks.load(Ordering::Acquire)
    }

    pub fn failed_ticks(&self) -> u64 {
        self.runner.failed_ticks.load(Ordering::Acquire)
    }

    /// Run a single tick now, outside the interval
    pub async fn run_once(&self) -> bool {
        self.runner.run_tick().await
    }

    /// Spawn the interval loop; the first tick fires one interval from now
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            return;
        }

        let period = self.config.interval();
        let (shutdown, mut shutdown_rx) = broadcast::channel(1);
        let runner = self.runner.clone();

        let handle = tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = timer.tick() => {
                        runner.run_tick().await;
                    }
                }
            }
            debug!("Reconcile loop exited");
        });

        info!(
            interval_seconds = self.config.interval_seconds,
            prune_tags = self.config.prune_tags,
            "Reconcile scheduler started"
        );
        *task = Some(Runner { shutdown, handle });
    }

    /// Stop the loop and wait for it (and any running tick) to finish
    pub async fn stop(&self) {
        let Some(runner) = self.task.lock().await.take() else {
            return;
        };

        let _ = runner.shutdown.send(());
        if let Err(e) = runner.handle.await {
            warn!(error = %e, "Reconcile loop task failed");
        }
        info!(
            ticks = self.ticks(),
            failed_ticks = self.failed_ticks(),
            "Reconcile scheduler stopped"
        );
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }
}
