//! DistributedSyncBus: broadcast local mutations, apply peer mutations
//!
//! One shared channel. Every instance publishes after a successful local
//! set/delete and runs one listener task applying messages from peers
//! directly to [`CacheCore`]; applied messages are never re-published, and
//! messages carrying our own instance id are dropped.
//!
//! Delivery is best effort and at most once: nothing is acknowledged or
//! replayed. An instance that misses a message converges on the next write
//! to that key (or when the entry expires).

use super::message::{SyncMessage, SyncMessageType};
use crate::cache::CacheCore;
use crate::config::SyncConfig;
use crate::metrics::MetricsCollector;
use crate::store::{BackingStore, MessageStream};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Running listener: its stop signal and task
#[derive(Debug)]
struct Listener {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// State shared with the listener task
#[derive(Debug, Clone)]
struct ListenerContext {
    core: Arc<CacheCore>,
    metrics: Arc<MetricsCollector>,
    channel: String,
    instance_id: String,
    resubscribe_delay: Duration,
}

#[derive(Debug)]
pub struct DistributedSyncBus {
    context: ListenerContext,
    listener: Mutex<Option<Listener>>,
}

impl DistributedSyncBus {
    pub fn new(core: Arc<CacheCore>, config: &SyncConfig, instance_id: impl Into<String>) -> Self {
        let metrics = core.metrics().clone();
        Self {
            context: ListenerContext {
                core,
                metrics,
                channel: config.channel.clone(),
                instance_id: instance_id.into(),
                resubscribe_delay: config.resubscribe_delay(),
            },
            listener: Mutex::new(None),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.context.instance_id
    }

    pub fn channel(&self) -> &str {
        &self.context.channel
    }

    /// Subscribe and spawn the listener
    ///
    /// The first subscription attempt completes before this returns, so
    /// messages published afterwards are received. If it fails the listener
    /// keeps retrying in the background. Calling `start` on a running bus is
    /// a no-op.
    pub async fn start(&self) {
        let mut listener = self.listener.lock().await;
        if listener.as_ref().is_some_and(|l| !l.handle.is_finished()) {
            debug!(channel = %self.context.channel, "Sync listener already running");
            return;
        }

        let initial = match self.context.subscribe().await {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!(
                    channel = %self.context.channel,
                    error = %e,
                    "Initial sync subscription failed, retrying in background"
                );
                None
            }
        };

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let context = self.context.clone();
        let handle = tokio::spawn(async move { context.run(initial, shutdown_rx).await });

        info!(
            channel = %self.context.channel,
            instance_id = %self.context.instance_id,
            "Distributed sync started"
        );
        *listener = Some(Listener { shutdown, handle });
    }

    /// Signal the listener and wait for it to exit; idempotent
    pub async fn stop(&self) {
        let Some(listener) = self.listener.lock().await.take() else {
            return;
        };

        // Err means the task already ended and dropped its receiver
        let _ = listener.shutdown.send(());
        if let Err(e) = listener.handle.await {
            error!(error = %e, "Sync listener task failed");
        }
        info!(channel = %self.context.channel, "Distributed sync stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.listener
            .lock()
            .await
            .as_ref()
            .is_some_and(|l| !l.handle.is_finished())
    }

    /// Tell peers about a local write; failures are logged and dropped
    pub async fn broadcast_update(&self, key: &str, value: &Value, ttl: Option<Duration>) {
        let message = SyncMessage::update(key, value.clone(), ttl, &self.context.instance_id);
        self.publish(message).await;
    }

    /// Tell peers about a local delete; failures are logged and dropped
    pub async fn broadcast_invalidate(&self, key: &str) {
        let message = SyncMessage::invalidate(key, &self.context.instance_id);
        self.publish(message).await;
    }

    async fn publish(&self, message: SyncMessage) {
        let message_type = message.message_type.as_str();
        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %message.key, error = %e, "Sync message could not be encoded");
                return;
            }
        };

        let store = self.context.core.store();
        let publish = store.inner().publish(&self.context.channel, &payload);
        match tokio::time::timeout(store.operation_timeout(), publish).await {
            Ok(Ok(receivers)) => {
                self.context.metrics.record_sync_published(message_type);
                debug!(
                    key = %message.key,
                    message_type = message_type,
                    receivers = receivers,
                    "Sync message published"
                );
            }
            Ok(Err(e)) => {
                warn!(key = %message.key, error = %e, "Sync publish failed");
                self.context.metrics.record_error("sync_publish", e.kind());
            }
            Err(_) => {
                warn!(key = %message.key, "Sync publish timed out");
                self.context.metrics.record_error("sync_publish", "timeout");
            }
        }
    }
}

impl ListenerContext {
    async fn subscribe(&self) -> Result<MessageStream, String> {
        let store = self.core.store();
        match tokio::time::timeout(
            store.operation_timeout(),
            store.inner().subscribe(&self.channel),
        )
        .await
        {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err("subscribe timed out".to_string()),
        }
    }

    async fn run(self, initial: Option<MessageStream>, mut shutdown: broadcast::Receiver<()>) {
        self.metrics.sync_listener_started();
        let mut next_stream = initial;

        'listen: loop {
            let mut stream = match next_stream.take() {
                Some(stream) => stream,
                None => match self.subscribe().await {
                    Ok(stream) => {
                        info!(channel = %self.channel, "Sync subscription re-established");
                        stream
                    }
                    Err(e) => {
                        debug!(channel = %self.channel, error = %e, "Sync subscribe failed");
                        tokio::select! {
                            _ = shutdown.recv() => break 'listen,
                            _ = tokio::time::sleep(self.resubscribe_delay) => continue 'listen,
                        }
                    }
                },
            };

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break 'listen,
                    received = stream.next() => match received {
                        Some(payload) => self.apply(&payload).await,
                        None => {
                            warn!(channel = %self.channel, "Sync subscription lost, resubscribing");
                            break;
                        }
                    },
                }
            }

            tokio::select! {
                _ = shutdown.recv() => break 'listen,
                _ = tokio::time::sleep(self.resubscribe_delay) => {}
            }
        }

        self.metrics.sync_listener_stopped();
        debug!(channel = %self.channel, "Sync listener exited");
    }

    /// Apply one peer message to the local cache without re-publishing
    async fn apply(&self, payload: &str) {
        let message = match SyncMessage::from_json(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Malformed sync message skipped");
                return;
            }
        };

        if message.origin_instance_id == self.instance_id {
            return;
        }

        let applied = match message.message_type {
            SyncMessageType::Update => {
                let ttl = match message.ttl_duration() {
                    Ok(ttl) => ttl,
                    Err(e) => {
                        warn!(key = %message.key, error = %e, "Sync update skipped");
                        return;
                    }
                };
                let Some(value) = message.value.as_ref() else {
                    warn!(key = %message.key, "Sync update without value skipped");
                    return;
                };
                self.core.set(&message.key, value, ttl).await
            }
            SyncMessageType::Invalidate => self.core.delete(&message.key).await,
        };

        if applied {
            self.metrics
                .record_sync_received(message.message_type.as_str());
        }
        debug!(
            key = %message.key,
            message_type = message.message_type.as_str(),
            origin = %message.origin_instance_id,
            applied = applied,
            "Sync message applied"
        );
    }
}
