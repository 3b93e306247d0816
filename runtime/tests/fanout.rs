//! Integration tests for cross-process fan-out.
//!
//! Every test builds two or more relay nodes on one shared in-memory bus, the
//! same way separate processes share one Redis in production.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use relay_core::{BusError, ConnectionState, Event};
use relay_runtime::{
    Admission, BackoffPolicy, LifecycleConfig, ManagedResource, ReconnectConfig, Reconnector,
    RelayConfig, RelayNode,
};
use relay_testing::{InMemoryBus, InMemoryStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig::default()
        .with_backoff(BackoffPolicy::fixed(Duration::from_millis(10)))
        .with_startup_attempts(2)
}

fn fast_config() -> RelayConfig {
    RelayConfig {
        bus: fast_reconnect(),
        lifecycle: LifecycleConfig::default()
            .with_startup_deadline(Duration::from_secs(2))
            .with_drain_grace(Duration::from_millis(50)),
        ..RelayConfig::default()
    }
}

async fn start_node(bus: &InMemoryBus) -> RelayNode {
    let store: Arc<dyn ManagedResource> =
        Arc::new(Reconnector::new(InMemoryStore::new(), fast_reconnect()));
    let node = RelayNode::new(Arc::new(bus.clone()), store, fast_config());
    node.start().await.unwrap();
    node.coordinator().mark_running().unwrap();
    node
}

fn join(node: &RelayNode, channel: &str) -> Admission {
    let session = node.registry().admit().unwrap();
    assert!(node.registry().subscribe(session.id, channel));
    session
}

async fn next_event(session: &mut Admission) -> Arc<Event> {
    tokio::time::timeout(Duration::from_secs(2), session.outbound.recv())
        .await
        .expect("timed out waiting for event")
        .expect("session queue closed")
}

async fn wait_for_bus(node: &RelayNode, state: ConnectionState) {
    let mut watch = node.bus().watch();
    tokio::time::timeout(Duration::from_secs(2), watch.wait_for(|s| *s == state))
        .await
        .expect("timed out waiting for bus state")
        .expect("bus state channel closed");
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_event_reaches_sessions_on_other_process() {
    let bus = InMemoryBus::new();
    let a = start_node(&bus).await;
    let b = start_node(&bus).await;
    let mut listener = join(&a, "room-1");

    let outcome = b.adapter().publish("room-1", json!({ "text": "hi" })).await;

    assert!(outcome.relayed());
    let event = next_event(&mut listener).await;
    assert_eq!(event.payload(), &json!({ "text": "hi" }));
    assert_eq!(event.origin(), b.adapter().origin());
}

#[tokio::test]
async fn test_local_subscriber_receives_exactly_once() {
    let bus = InMemoryBus::new();
    let a = start_node(&bus).await;
    let _b = start_node(&bus).await;
    let mut local = join(&a, "room-1");

    let outcome = a.adapter().publish("room-1", json!(1)).await;
    assert_eq!(outcome.local.delivered, 1);

    next_event(&mut local).await;
    // The bus echoes A's own publish back to A; it must not be delivered twice
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(local.outbound.try_recv().is_err());
}

#[tokio::test]
async fn test_inbound_events_are_not_republished() {
    let bus = InMemoryBus::new();
    let a = start_node(&bus).await;
    let b = start_node(&bus).await;
    let mut listener = join(&b, "room-1");

    a.adapter().publish("room-1", json!("once")).await;
    next_event(&mut listener).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(bus.published().len(), 1);
}

#[tokio::test]
async fn test_bus_outage_keeps_local_delivery() {
    let bus = InMemoryBus::new();
    let a = start_node(&bus).await;
    let mut local = join(&a, "room-1");

    bus.set_available(false);
    wait_for_bus(&a, ConnectionState::Disconnected).await;

    let outcome = a.adapter().publish("room-1", json!("during outage")).await;

    assert!(matches!(outcome.bus, Err(BusError::Unavailable(_))));
    assert_eq!(outcome.local.delivered, 1);
    assert_eq!(next_event(&mut local).await.payload(), &json!("during outage"));
}

#[tokio::test]
async fn test_cross_process_delivery_resumes_after_outage() {
    let bus = InMemoryBus::new();
    let a = start_node(&bus).await;
    let b = start_node(&bus).await;
    let mut listener = join(&a, "room-1");

    bus.set_available(false);
    wait_for_bus(&a, ConnectionState::Disconnected).await;
    wait_for_bus(&b, ConnectionState::Disconnected).await;
    bus.set_available(true);
    wait_for_bus(&a, ConnectionState::Connected).await;
    wait_for_bus(&b, ConnectionState::Connected).await;

    let outcome = b.adapter().publish("room-1", json!("after")).await;

    assert!(outcome.relayed());
    assert_eq!(next_event(&mut listener).await.payload(), &json!("after"));
}

#[tokio::test]
async fn test_each_disconnect_is_followed_by_one_reconnect() {
    let bus = InMemoryBus::new();
    let a = start_node(&bus).await;
    let mut states = a.bus().watch();

    for _ in 0..5 {
        let before = bus.connections_opened();
        bus.disconnect_all();
        tokio::time::timeout(Duration::from_secs(2), async {
            while bus.connections_opened() < before + 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        states
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
    }

    // One publisher and one subscriber per connection, six connections total
    assert_eq!(bus.connections_opened(), 12);
    assert!(a.bus().current().is_some());
}

#[tokio::test]
async fn test_publishes_from_one_process_arrive_in_order() {
    let bus = InMemoryBus::new();
    let a = start_node(&bus).await;
    let b = start_node(&bus).await;
    let mut listener = join(&b, "ordered");

    for n in 0..50 {
        a.adapter().publish("ordered", json!(n)).await;
    }

    for n in 0..50 {
        assert_eq!(next_event(&mut listener).await.payload(), &json!(n));
    }
}

#[tokio::test]
async fn test_unsubscribed_process_receives_nothing() {
    let bus = InMemoryBus::new();
    let a = start_node(&bus).await;
    let b = start_node(&bus).await;
    let mut other = join(&b, "other");

    a.adapter().publish("room-1", json!("x")).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(other.outbound.try_recv().is_err());
}
