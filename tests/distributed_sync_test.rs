//! Integration tests for cross-instance convergence over the sync channel

mod common;

use cache_sync_core::store::{BackingStore, PubSubHub};
use cache_sync_core::{SyncMessage, SyncMessageType};
use common::{eventually, init_test_logging, peer_service, tags};
use serde_json::json;
use std::time::Duration;

const CONVERGENCE_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_peer_applies_updates_and_invalidations() {
    init_test_logging();
    let hub = PubSubHub::new();
    let (node_a, _store_a) = peer_service(&hub, "node-a");
    let (node_b, _store_b) = peer_service(&hub, "node-b");
    let peer = &node_b;
    node_a.start_distributed_sync().await;
    node_b.start_distributed_sync().await;

    assert!(node_a.set("greeting", &json!({"text": "hello"}), None).await);

    let converged = eventually(CONVERGENCE_TIMEOUT, || async move {
        peer.core().get("greeting").await == Some(json!({"text": "hello"}))
    })
    .await;
    assert!(converged, "node-b should receive node-a's write");

    assert!(node_a.delete("greeting").await);
    let invalidated = eventually(CONVERGENCE_TIMEOUT, || async move {
        !peer.core().exists("greeting").await
    })
    .await;
    assert!(invalidated, "node-b should drop the deleted key");

    assert!(node_a.stats().sync_published >= 2);
    assert!(node_b.stats().sync_received >= 2);

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn test_own_messages_are_not_applied() {
    let hub = PubSubHub::new();
    let (node_a, _store_a) = peer_service(&hub, "node-a");
    let (node_b, _store_b) = peer_service(&hub, "node-b");
    let peer = &node_b;
    node_a.start_distributed_sync().await;
    node_b.start_distributed_sync().await;

    node_a.set("k", &1, None).await;
    let delivered = eventually(CONVERGENCE_TIMEOUT, || async move {
        peer.stats().sync_received >= 1
    })
    .await;
    assert!(delivered);

    // node-a heard its own broadcast on the shared channel and ignored it
    assert_eq!(node_a.stats().sync_received, 0);
    assert_eq!(node_a.stats().sync_published, 1);

    // Applying a peer message does not re-publish it
    assert_eq!(node_b.stats().sync_published, 0);

    node_a.shutdown().await;
    node_b.shutdown().await;
}

#[tokio::test]
async fn test_ttl_travels_with_updates() {
    let hub = PubSubHub::new();
    let (node_a, _store_a) = peer_service(&hub, "node-a");
    let (node_b, _store_b) = peer_service(&hub, "node-b");
    let peer = &node_b;
    node_b.start_distributed_sync().await;

    node_a.set("ephemeral", &"soon gone", Some(Duration::from_secs(1))).await;
    let received = eventually(CONVERGENCE_TIMEOUT, || async move {
        peer.core().exists("ephemeral").await
    })
    .await;
    assert!(received);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert!(!node_b.core().exists("ephemeral").await);

    node_b.shutdown().await;
}

#[tokio::test]
async fn test_tag_invalidation_reaches_peers() {
    let hub = PubSubHub::new();
    let (node_a, _store_a) = peer_service(&hub, "node-a");
    let (node_b, _store_b) = peer_service(&hub, "node-b");
    let peer = &node_b;
    node_b.start_distributed_sync().await;

    node_a.set_with_tags("x", &1, None, &tags(&["group"])).await;
    node_a.set_with_tags("y", &2, None, &tags(&["group"])).await;
    let received = eventually(CONVERGENCE_TIMEOUT, || async move {
        peer.core().exists("x").await && peer.core().exists("y").await
    })
    .await;
    assert!(received);

    assert!(node_a.invalidate_by_tag("group").await);
    let invalidated = eventually(CONVERGENCE_TIMEOUT, || async move {
        !peer.core().exists("x").await && !peer.core().exists("y").await
    })
    .await;
    assert!(invalidated);

    node_b.shutdown().await;
}

#[tokio::test]
async fn test_malformed_and_unknown_messages_are_skipped() {
    let hub = PubSubHub::new();
    let (node_b, store_b) = peer_service(&hub, "node-b");
    let peer = &node_b;
    node_b.start_distributed_sync().await;
    let channel = node_b.config().sync.channel.clone();

    store_b.publish(&channel, "not json").await.unwrap();
    store_b
        .publish(&channel, r#"{"type":"explode","key":"k","originInstanceId":"x"}"#)
        .await
        .unwrap();

    // A well-formed message after the junk still lands
    let valid = SyncMessage::update("k", json!("v"), None, "node-z");
    assert_eq!(valid.message_type, SyncMessageType::Update);
    store_b.publish(&channel, &valid.to_json().unwrap()).await.unwrap();

    let applied = eventually(CONVERGENCE_TIMEOUT, || async move {
        peer.get::<String>("k").await.as_deref() == Some("v")
    })
    .await;
    assert!(applied);
    assert!(node_b.sync_bus().is_running().await);

    node_b.shutdown().await;
    assert!(!node_b.sync_bus().is_running().await);
}

#[tokio::test]
async fn test_stopped_listener_no_longer_applies() {
    let hub = PubSubHub::new();
    let (node_a, _store_a) = peer_service(&hub, "node-a");
    let (node_b, _store_b) = peer_service(&hub, "node-b");

    node_b.start_distributed_sync().await;
    let peer = &node_b;
    let listening = eventually(CONVERGENCE_TIMEOUT, || async move {
        peer.stats().active_sync_listeners == 1
    })
    .await;
    assert!(listening);
    node_b.stop_distributed_sync().await;
    node_b.stop_distributed_sync().await;
    assert_eq!(node_b.stats().active_sync_listeners, 0);

    node_a.set("k", &1, None).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!node_b.core().exists("k").await);
}
