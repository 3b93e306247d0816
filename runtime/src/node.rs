//! One relay process, assembled.
//!
//! [`RelayNode`] wires a bus transport and a supervised store into a
//! registry, a fan-out adapter and a lifecycle coordinator. The web layer and
//! the server binary only ever talk to a node.

use crate::bus::{BusConnector, BusHandle};
use crate::config::RelayConfig;
use crate::fanout::FanoutAdapter;
use crate::lifecycle::LifecycleCoordinator;
use crate::reconnect::{ManagedResource, Reconnector};
use crate::registry::ConnectionRegistry;
use parking_lot::Mutex;
use relay_core::bus::BusTransport;
use relay_core::{Event, ProcessId, RelayError};
use std::sync::Arc;
use tokio::sync::mpsc;

/// A fully wired relay process.
pub struct RelayNode {
    registry: Arc<ConnectionRegistry>,
    bus: Arc<Reconnector<BusHandle>>,
    adapter: Arc<FanoutAdapter>,
    coordinator: Arc<LifecycleCoordinator>,
    inbound: Mutex<Option<mpsc::Receiver<Event>>>,
}

impl RelayNode {
    /// Assemble a node with a fresh origin id.
    #[must_use]
    pub fn new(
        transport: Arc<dyn BusTransport>,
        store: Arc<dyn ManagedResource>,
        config: RelayConfig,
    ) -> Self {
        Self::with_origin(ProcessId::new(), transport, store, config)
    }

    /// Assemble a node publishing as `origin`.
    #[must_use]
    pub fn with_origin(
        origin: ProcessId,
        transport: Arc<dyn BusTransport>,
        store: Arc<dyn ManagedResource>,
        config: RelayConfig,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(config.registry));
        let (connector, inbound) = BusConnector::new(
            transport,
            &config.fanout.namespace,
            config.fanout.inbound_buffer,
        );
        let bus = Arc::new(Reconnector::new(connector, config.bus));
        let adapter = Arc::new(FanoutAdapter::new(
            origin,
            Arc::clone(&registry),
            Arc::clone(&bus),
            config.fanout,
        ));
        let coordinator = Arc::new(LifecycleCoordinator::new(
            store,
            Arc::clone(&bus) as Arc<dyn ManagedResource>,
            Arc::clone(&registry),
            config.lifecycle,
        ));

        Self {
            registry,
            bus,
            adapter,
            coordinator,
            inbound: Mutex::new(Some(inbound)),
        }
    }

    /// Run startup and begin relaying inbound bus events.
    ///
    /// # Errors
    ///
    /// Returns the startup failure from
    /// [`LifecycleCoordinator::start`]. The node is then stopped.
    pub async fn start(&self) -> Result<(), RelayError> {
        self.coordinator.start().await?;

        let inbound = self.inbound.lock().take();
        if let Some(inbound) = inbound {
            let task = tokio::spawn(
                Arc::clone(&self.adapter).run_inbound(inbound, self.coordinator.shutdown_token()),
            );
            self.coordinator.track(task);
        }
        Ok(())
    }

    /// The connection registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// The bus reconnector.
    #[must_use]
    pub const fn bus(&self) -> &Arc<Reconnector<BusHandle>> {
        &self.bus
    }

    /// The fan-out adapter.
    #[must_use]
    pub const fn adapter(&self) -> &Arc<FanoutAdapter> {
        &self.adapter
    }

    /// The lifecycle coordinator.
    #[must_use]
    pub const fn coordinator(&self) -> &Arc<LifecycleCoordinator> {
        &self.coordinator
    }
}

impl std::fmt::Debug for RelayNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayNode")
            .field("origin", &self.adapter.origin())
            .field("phase", &self.coordinator.phase())
            .finish_non_exhaustive()
    }
}
