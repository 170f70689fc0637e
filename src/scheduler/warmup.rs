//! WarmupScheduler: background queue pre-populating hot keys
//!
//! Items are queued with [`WarmupScheduler::add_to_warmup`] and consumed
//! exactly once by `concurrency` worker tasks sharing one receiver. A failing
//! (or panicking) producer is logged and its item dropped without retry.
//!
//! The queue is unbounded unless `warmup.queue_capacity` is set, in which
//! case items beyond the capacity are refused.

use crate::cache::CacheCore;
use crate::config::WarmupConfig;
use crate::metrics::MetricsCollector;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type Producer = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<Value>> + Send>;

/// One key to pre-populate
pub struct WarmupItem {
    pub key: String,
    pub ttl: Option<Duration>,
    producer: Producer,
}

impl std::fmt::Debug for WarmupItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmupItem")
            .field("key", &self.key)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl WarmupItem {
    pub fn new<F, Fut, T>(key: impl Into<String>, ttl: Option<Duration>, producer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Serialize,
    {
        let producer: Producer = Box::new(move || {
            async move {
                let value = producer().await?;
                Ok(serde_json::to_value(value)?)
            }
            .boxed()
        });
        Self {
            key: key.into(),
            ttl,
            producer,
        }
    }
}

#[derive(Debug)]
struct Workers {
    shutdown: broadcast::Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

#[derive(Debug)]
pub struct WarmupScheduler {
    core: Arc<CacheCore>,
    metrics: Arc<MetricsCollector>,
    config: WarmupConfig,
    sender: mpsc::UnboundedSender<WarmupItem>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<WarmupItem>>>,
    depth: Arc<AtomicUsize>,
    workers: Mutex<Option<Workers>>,
}

impl WarmupScheduler {
    pub fn new(core: Arc<CacheCore>, config: WarmupConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let metrics = core.metrics().clone();
        Self {
            core,
            metrics,
            config,
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            depth: Arc::new(AtomicUsize::new(0)),
            workers: Mutex::new(None),
        }
    }

    /// Queue an item; `false` when the configured capacity is reached
    ///
    /// Items queued before [`start`](Self::start) wait for the workers.
    pub fn add_to_warmup(&self, item: WarmupItem) -> bool {
        let capacity = self.config.queue_capacity.unwrap_or(usize::MAX);
        let reserved = self
            .depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                (depth < capacity).then_some(depth + 1)
            });

        let depth = match reserved {
            Ok(previous) => previous + 1,
            Err(depth) => {
                warn!(
                    key = %item.key,
                    queue_depth = depth,
                    capacity = capacity,
                    "Warmup queue full, item refused"
                );
                return false;
            }
        };

        let key = item.key.clone();
        if self.sender.send(item).is_err() {
            // Receiver lives as long as self, so this is unreachable in practice
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return false;
        }

        self.metrics.set_warmup_queue_depth(depth);
        debug!(key = %key, queue_depth = depth, "Warmup item queued");
        true
    }

    /// Number of items waiting
    pub fn pending(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Spawn the workers; a no-op when already running
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            return;
        }

        let (shutdown, _) = broadcast::channel(1);
        let handles = (0..self.config.concurrency.max(1))
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    core: self.core.clone(),
                    metrics: self.metrics.clone(),
                    receiver: self.receiver.clone(),
                    depth: self.depth.clone(),
                };
                tokio::spawn(worker.run(shutdown.subscribe()))
            })
            .collect();

        info!(
            concurrency = self.config.concurrency.max(1),
            queued = self.pending(),
            "🔥 Warmup scheduler started"
        );
        *workers = Some(Workers { shutdown, handles });
    }

    /// Stop after in-flight items complete; queued items stay queued
    ///
    /// Safe to call repeatedly.
    pub async fn stop(&self) {
        let Some(workers) = self.workers.lock().await.take() else {
            return;
        };

        let _ = workers.shutdown.send(());
        for handle in workers.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Warmup worker task failed");
            }
        }
        info!(pending = self.pending(), "Warmup scheduler stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.workers.lock().await.is_some()
    }
}

struct Worker {
    id: usize,
    core: Arc<CacheCore>,
    metrics: Arc<MetricsCollector>,
    receiver: Arc<Mutex<mpsc::UnboundedReceiver<WarmupItem>>>,
    depth: Arc<AtomicUsize>,
}

impl Worker {
    async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        debug!(worker_id = self.id, "Warmup worker started");

        loop {
            // recv is cancel-safe, so losing the race to shutdown drops nothing
            let next = tokio::select! {
                _ = shutdown.recv() => None,
                item = async { self.receiver.lock().await.recv().await } => item,
            };
            let Some(item) = next else {
                break;
            };

            let remaining = self.depth.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
            self.metrics.set_warmup_queue_depth(remaining);
            self.process(item).await;
        }

        debug!(worker_id = self.id, "Warmup worker exited");
    }

    async fn process(&self, item: WarmupItem) {
        let WarmupItem { key, ttl, producer } = item;

        let produced = AssertUnwindSafe(producer()).catch_unwind().await;
        match produced {
            Ok(Ok(value)) => {
                let stored = self.core.set(&key, &value, ttl).await;
                self.metrics.record_warmup_item(stored);
                debug!(key = %key, stored = stored, "Warmup item processed");
            }
            Ok(Err(e)) => {
                self.metrics.record_warmup_item(false);
                warn!(key = %key, error = %e, "Warmup producer failed, item dropped");
            }
            Err(_) => {
                self.metrics.record_warmup_item(false);
                error!(key = %key, "Warmup producer panicked, item dropped");
            }
        }
    }
}
