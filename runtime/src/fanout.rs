//! Fan-out adapter: local delivery plus cross-process relay.
//!
//! ```text
//!  publish(channel, payload)
//!        │
//!        ├──> registry.deliver_local   (always, even with the bus down)
//!        │
//!        └──> bus publish "{ns}#{channel}"  (fails fast while disconnected)
//!
//!  bus subscriber ──> inbound queue ──> run_inbound
//!                                          │
//!                           origin == self? ── yes ──> skip (already delivered)
//!                                          │
//!                                          no ──> registry.deliver_local
//! ```
//!
//! Events arriving from the bus are only ever delivered locally; nothing on
//! the inbound path publishes, so an event crosses the bus at most once.

use crate::bus::BusHandle;
use crate::config::FanoutConfig;
use crate::metrics::FanoutMetrics;
use crate::reconnect::Reconnector;
use crate::registry::{ConnectionRegistry, DeliveryReport};
use relay_core::bus::bus_channel;
use relay_core::{BusError, Event, ProcessId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outcome of one publish.
///
/// Local delivery always happens; the bus result is reported separately so a
/// caller can tell "reached my sessions only" from "reached everyone".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Delivery to sessions on this process.
    pub local: DeliveryReport,
    /// Relay to other processes.
    pub bus: Result<(), BusError>,
}

impl PublishOutcome {
    /// Whether the event also reached the bus.
    #[must_use]
    pub const fn relayed(&self) -> bool {
        self.bus.is_ok()
    }
}

/// Joins the connection registry to the shared bus.
pub struct FanoutAdapter {
    origin: ProcessId,
    registry: Arc<ConnectionRegistry>,
    bus: Arc<Reconnector<BusHandle>>,
    config: FanoutConfig,
}

impl FanoutAdapter {
    /// Create an adapter publishing as `origin`.
    #[must_use]
    pub const fn new(
        origin: ProcessId,
        registry: Arc<ConnectionRegistry>,
        bus: Arc<Reconnector<BusHandle>>,
        config: FanoutConfig,
    ) -> Self {
        Self {
            origin,
            registry,
            bus,
            config,
        }
    }

    /// This process's origin id.
    #[must_use]
    pub const fn origin(&self) -> ProcessId {
        self.origin
    }

    /// The registry this adapter delivers into.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Deliver to local subscribers, then relay over the bus.
    ///
    /// Never blocks on a bus reconnect: while the bus is down the publish
    /// fails immediately with [`BusError::Unavailable`] and local delivery
    /// still happens.
    pub async fn publish(&self, channel: &str, payload: serde_json::Value) -> PublishOutcome {
        let event = Arc::new(Event::new(self.origin, channel, payload));
        FanoutMetrics::record_published();

        let local = self.registry.deliver_local(&event);
        let bus = self.relay(&event).await;

        if let Err(e) = &bus {
            FanoutMetrics::record_publish_error();
            tracing::warn!(channel, error = %e, "Bus publish failed, delivered locally only");
        }

        PublishOutcome { local, bus }
    }

    /// Deliver an event received from the bus.
    ///
    /// Returns `None` for this process's own events, which were delivered
    /// locally at publish time.
    pub fn receive(&self, event: Event) -> Option<DeliveryReport> {
        if event.origin() == self.origin {
            return None;
        }
        FanoutMetrics::record_relayed();
        Some(self.registry.deliver_local(&Arc::new(event)))
    }

    /// Consume the bus inbound queue until it closes or `shutdown` fires.
    pub async fn run_inbound(
        self: Arc<Self>,
        mut inbound: mpsc::Receiver<Event>,
        shutdown: CancellationToken,
    ) {
        tracing::info!(origin = %self.origin, "Inbound relay started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                next = inbound.recv() => match next {
                    Some(event) => {
                        self.receive(event);
                    }
                    None => break,
                }
            }
        }
        tracing::info!("Inbound relay stopped");
    }

    async fn relay(&self, event: &Event) -> Result<(), BusError> {
        let handle = self
            .bus
            .current()
            .ok_or_else(|| BusError::Unavailable(format!("bus is {}", self.bus.state())))?;
        let payload = event.encode()?;
        handle
            .publish(
                &bus_channel(&self.config.namespace, event.channel()),
                payload,
                self.config.publish_timeout,
            )
            .await
    }
}

impl std::fmt::Debug for FanoutAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutAdapter")
            .field("origin", &self.origin)
            .field("namespace", &self.config.namespace)
            .finish_non_exhaustive()
    }
}
