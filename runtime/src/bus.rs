//! Bus connector: publisher and subscriber handles opened as a unit.
//!
//! [`BusConnector`] adapts any [`BusTransport`] to the [`Connector`] contract
//! so a [`Reconnector`](crate::reconnect::Reconnector) can supervise it.
//!
//! ```text
//!                 ┌──────────── BusConnector::connect ────────────┐
//!                 │  try_join(open_publisher, open_subscriber)    │
//!                 └───────────────┬───────────────────┬───────────┘
//!                                 │                   │
//!                          BusHandle            closed future
//!                     (publisher + fault)   (pumps subscription into
//!                                            the inbound queue)
//! ```
//!
//! The `closed` future does the pumping itself: it decodes every message,
//! forwards it to the inbound queue, and resolves when the subscription ends,
//! reports a disconnect, or the publisher side trips the shared fault token.
//! Either handle failing therefore marks the whole bus disconnected and both
//! handles are re-established together.

use futures::StreamExt;
use relay_core::bus::{BusPublisher, BusSubscription, BusTransport, namespace_pattern};
use relay_core::{BoxFuture, BusError, ConnectError, Connection, Connector, Event};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Resource name used for logs, metrics and health output.
pub const BUS_RESOURCE: &str = "bus";

/// Live publisher handle for one bus connection.
#[derive(Clone)]
pub struct BusHandle {
    publisher: Arc<dyn BusPublisher>,
    fault: CancellationToken,
}

impl BusHandle {
    /// Publish an encoded envelope, bounded by `timeout`.
    ///
    /// A dropped publisher connection trips the fault token, which closes the
    /// whole bus connection so the reconnector replaces both handles.
    ///
    /// # Errors
    ///
    /// Returns the transport's [`BusError`], or [`BusError::Timeout`].
    pub async fn publish(
        &self,
        channel: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<(), BusError> {
        match tokio::time::timeout(timeout, self.publisher.publish(channel, payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                if e.is_disconnect() {
                    self.fault.cancel();
                }
                Err(e)
            }
            Err(_) => Err(BusError::Timeout(timeout)),
        }
    }
}

impl std::fmt::Debug for BusHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusHandle")
            .field("faulted", &self.fault.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Opens paired publisher/subscriber connections on a namespace.
pub struct BusConnector {
    transport: Arc<dyn BusTransport>,
    pattern: String,
    inbound: mpsc::Sender<Event>,
}

impl BusConnector {
    /// Create a connector subscribing to every channel under `namespace`.
    ///
    /// Returns the connector and the receiving end of the inbound queue that
    /// decoded bus events are delivered to.
    #[must_use]
    pub fn new(
        transport: Arc<dyn BusTransport>,
        namespace: &str,
        inbound_buffer: usize,
    ) -> (Self, mpsc::Receiver<Event>) {
        let (inbound, rx) = mpsc::channel(inbound_buffer.max(1));
        (
            Self {
                transport,
                pattern: namespace_pattern(namespace),
                inbound,
            },
            rx,
        )
    }
}

impl Connector for BusConnector {
    type Handle = BusHandle;

    fn resource(&self) -> &'static str {
        BUS_RESOURCE
    }

    fn connect(&self) -> BoxFuture<'_, Result<Connection<BusHandle>, ConnectError>> {
        Box::pin(async move {
            let (publisher, subscription) = futures::try_join!(
                self.transport.open_publisher(),
                self.transport.open_subscriber(&self.pattern)
            )
            .map_err(|e| ConnectError::new(BUS_RESOURCE, e.to_string()))?;

            let fault = CancellationToken::new();
            let closed = pump(subscription, self.inbound.clone(), fault.clone());

            Ok(Connection::new(BusHandle { publisher, fault }, closed))
        })
    }
}

async fn pump(
    mut subscription: BusSubscription,
    inbound: mpsc::Sender<Event>,
    fault: CancellationToken,
) {
    loop {
        tokio::select! {
            () = fault.cancelled() => {
                tracing::debug!("Publisher connection dropped, closing bus");
                return;
            }
            next = subscription.next() => match next {
                Some(Ok(message)) => match Event::decode(&message.payload) {
                    Ok(event) => {
                        if inbound.send(event).await.is_err() {
                            tracing::debug!("Inbound queue closed, stopping bus subscriber");
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(channel = %message.channel, error = %e, "Skipping malformed bus message");
                    }
                },
                Some(Err(e)) if e.is_disconnect() => {
                    tracing::warn!(error = %e, "Bus subscriber disconnected");
                    return;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Bus subscriber error");
                }
                None => {
                    tracing::warn!("Bus subscription ended");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use relay_core::ProcessId;
    use relay_core::bus::bus_channel;
    use relay_testing::InMemoryBus;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(1);

    fn connector(bus: &InMemoryBus) -> (BusConnector, mpsc::Receiver<Event>) {
        BusConnector::new(Arc::new(bus.clone()), "relay", 8)
    }

    fn envelope(channel: &str, payload: serde_json::Value) -> Vec<u8> {
        Event::new(ProcessId::new(), channel, payload).encode().unwrap()
    }

    #[tokio::test]
    async fn test_connect_fails_when_bus_refuses() {
        let bus = InMemoryBus::new();
        bus.set_available(false);
        let (connector, _inbound) = connector(&bus);

        let err = connector.connect().await.err().unwrap();

        assert_eq!(err.resource, BUS_RESOURCE);
    }

    #[tokio::test]
    async fn test_published_envelope_reaches_inbound_queue() {
        let bus = InMemoryBus::new();
        let (connector, mut inbound) = connector(&bus);
        let Connection { handle, closed } = connector.connect().await.unwrap();
        let pump = tokio::spawn(closed);

        handle
            .publish(&bus_channel("relay", "room-1"), envelope("room-1", json!("hello")), TIMEOUT)
            .await
            .unwrap();

        let received = inbound.recv().await.unwrap();
        assert_eq!(received.channel(), "room-1");
        assert_eq!(received.payload(), &json!("hello"));
        pump.abort();
    }

    #[tokio::test]
    async fn test_malformed_message_is_skipped() {
        let bus = InMemoryBus::new();
        let (connector, mut inbound) = connector(&bus);
        let Connection { handle, closed } = connector.connect().await.unwrap();
        let pump = tokio::spawn(closed);

        handle
            .publish("relay#room-1", b"not json".to_vec(), TIMEOUT)
            .await
            .unwrap();
        handle
            .publish("relay#room-1", envelope("room-1", json!(2)), TIMEOUT)
            .await
            .unwrap();

        assert_eq!(inbound.recv().await.unwrap().payload(), &json!(2));
        assert!(!pump.is_finished());
        pump.abort();
    }

    #[tokio::test]
    async fn test_bus_reset_closes_connection() {
        let bus = InMemoryBus::new();
        let (connector, _inbound) = connector(&bus);
        let Connection { handle, closed } = connector.connect().await.unwrap();

        bus.disconnect_all();

        let err = handle
            .publish("relay#room-1", b"{}".to_vec(), TIMEOUT)
            .await
            .unwrap_err();
        assert!(err.is_disconnect());
        tokio::time::timeout(TIMEOUT, closed).await.unwrap();
    }
}
