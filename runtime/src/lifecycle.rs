//! Process lifecycle: ordered startup, running, graceful drain.
//!
//! ```text
//! Starting ─> StoreConnecting ─> BusConnecting ─> Listening ─> Running
//!                   │                  │                          │
//!                   └── fail ──┐       └── fail ──┐         signal│
//!                              ▼                  ▼               ▼
//!                           Stopped (exit 1)   Stopped (exit 1)  Draining ─> Stopped (exit 0)
//! ```
//!
//! # Invariants
//!
//! - Nothing listens for clients before both the store and the bus are
//!   connected. A startup failure never reaches `Listening`.
//! - Once `Running`, resource loss is handled by the reconnectors; the phase
//!   never moves backwards.
//! - Draining stops admissions first, gives live sessions a grace period,
//!   then evicts whatever is left before the resources are released.

use crate::config::LifecycleConfig;
use crate::health::HealthReport;
use crate::reconnect::ManagedResource;
use crate::registry::ConnectionRegistry;
use parking_lot::Mutex;
use relay_core::{ConnectError, RelayError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long supervisors get to wind down once cancelled.
const SUPERVISOR_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Phase of the process lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecyclePhase {
    /// Process constructed, nothing connected.
    Starting,
    /// Establishing the store connection.
    StoreConnecting,
    /// Establishing the bus connection.
    BusConnecting,
    /// Resources connected, listener being bound.
    Listening,
    /// Serving clients.
    Running,
    /// Shutdown requested; no new sessions.
    Draining,
    /// Terminal.
    Stopped,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Starting => "starting",
            Self::StoreConnecting => "store_connecting",
            Self::BusConnecting => "bus_connecting",
            Self::Listening => "listening",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Errors from lifecycle transitions requested out of order.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// The requested transition is not valid from the current phase.
    #[error("Cannot move from {from} to {to}")]
    InvalidTransition {
        /// Current phase
        from: LifecyclePhase,
        /// Requested phase
        to: LifecyclePhase,
    },
}

impl From<LifecycleError> for RelayError {
    fn from(err: LifecycleError) -> Self {
        Self::LifecycleViolation(err.to_string())
    }
}

/// Summary of a completed drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Sessions that left on their own during the grace period.
    pub departed: usize,
    /// Sessions evicted when the grace period ended.
    pub evicted: usize,
}

/// Sequences startup and shutdown of the store, the bus and the registry.
pub struct LifecycleCoordinator {
    store: Arc<dyn ManagedResource>,
    bus: Arc<dyn ManagedResource>,
    registry: Arc<ConnectionRegistry>,
    config: LifecycleConfig,
    phase: watch::Sender<LifecyclePhase>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl LifecycleCoordinator {
    /// Create a coordinator in phase `Starting`.
    #[must_use]
    pub fn new(
        store: Arc<dyn ManagedResource>,
        bus: Arc<dyn ManagedResource>,
        registry: Arc<ConnectionRegistry>,
        config: LifecycleConfig,
    ) -> Self {
        let (phase, _) = watch::channel(LifecyclePhase::Starting);
        Self {
            store,
            bus,
            registry,
            config,
            phase,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> LifecyclePhase {
        *self.phase.borrow()
    }

    /// Observe phase changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<LifecyclePhase> {
        self.phase.subscribe()
    }

    /// Token cancelled when draining releases resources. Background tasks
    /// that should stop with the process select on it.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Track a background task so draining waits for it.
    pub fn track(&self, task: JoinHandle<()>) {
        self.tasks.lock().push(task);
    }

    /// Connect the store, then the bus, each within the startup deadline.
    ///
    /// On success the phase is `Listening` and both supervisors are running.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::StoreUnavailable`] or
    /// [`RelayError::BusUnavailable`]; the phase is then `Stopped` and the
    /// process should exit with [`RelayError::exit_code`].
    ///
    /// Returns [`RelayError::LifecycleViolation`] unless the phase is
    /// `Starting`. Nothing is connected and the phase is left unchanged.
    pub async fn start(&self) -> Result<(), RelayError> {
        self.advance(LifecyclePhase::Starting, LifecyclePhase::StoreConnecting)?;
        if let Err(e) = self.connect_within_deadline(self.store.as_ref()).await {
            tracing::error!(error = %e, "Store unreachable at startup");
            self.abort_startup();
            return Err(RelayError::StoreUnavailable(e.to_string()));
        }

        self.transition(LifecyclePhase::BusConnecting);
        if let Err(e) = self.connect_within_deadline(self.bus.as_ref()).await {
            tracing::error!(error = %e, "Bus unreachable at startup");
            self.abort_startup();
            return Err(RelayError::BusUnavailable(e.to_string()));
        }

        self.track(Arc::clone(&self.store).spawn_supervisor());
        self.track(Arc::clone(&self.bus).spawn_supervisor());

        self.transition(LifecyclePhase::Listening);
        Ok(())
    }

    /// Record that the listener is bound and serving.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::InvalidTransition`] unless the phase is
    /// `Listening`.
    pub fn mark_running(&self) -> Result<(), LifecycleError> {
        self.advance(LifecyclePhase::Listening, LifecyclePhase::Running)
    }

    /// Drain and stop.
    ///
    /// Closes admissions, waits up to the grace period for sessions to leave,
    /// evicts the rest, cancels background tasks and releases both resources.
    /// Calling it again after `Stopped` is a no-op.
    pub async fn drain(&self) -> DrainReport {
        match self.phase() {
            LifecyclePhase::Stopped | LifecyclePhase::Draining => {
                return DrainReport {
                    departed: 0,
                    evicted: 0,
                };
            }
            _ => {}
        }

        self.transition(LifecyclePhase::Draining);
        self.registry.close_admissions();

        let at_start = self.registry.len();
        tracing::info!(
            sessions = at_start,
            grace_ms = self.config.drain_grace.as_millis(),
            "Draining"
        );

        let mut active = self.registry.watch_active();
        if tokio::time::timeout(self.config.drain_grace, active.wait_for(|n| *n == 0))
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.registry.len(),
                "Drain grace period elapsed, evicting remaining sessions"
            );
        }

        let evicted = self.registry.evict_all();
        let departed = at_start.saturating_sub(evicted);

        self.shutdown.cancel();
        self.store.shutdown();
        self.bus.shutdown();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        if tokio::time::timeout(SUPERVISOR_JOIN_TIMEOUT, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            tracing::warn!("Background tasks did not stop in time");
        }

        self.transition(LifecyclePhase::Stopped);
        tracing::info!(departed, evicted, "Stopped");

        DrainReport { departed, evicted }
    }

    /// Readiness report for this process.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        HealthReport::evaluate(
            self.phase(),
            self.store.state(),
            self.bus.state(),
            self.registry.len(),
        )
    }

    /// The store resource.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ManagedResource> {
        &self.store
    }

    /// The bus resource.
    #[must_use]
    pub fn bus(&self) -> &Arc<dyn ManagedResource> {
        &self.bus
    }

    async fn connect_within_deadline(
        &self,
        resource: &dyn ManagedResource,
    ) -> Result<(), ConnectError> {
        let deadline = self.config.startup_deadline;
        match tokio::time::timeout(deadline, resource.connect_with_budget()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::new(
                resource.resource(),
                format!("startup deadline of {deadline:?} elapsed"),
            )),
        }
    }

    fn abort_startup(&self) {
        self.shutdown.cancel();
        self.store.shutdown();
        self.bus.shutdown();
        self.registry.close_admissions();
        self.transition(LifecyclePhase::Stopped);
    }

    /// Move from `expected` to `next` in one step, or leave the phase alone.
    fn advance(
        &self,
        expected: LifecyclePhase,
        next: LifecyclePhase,
    ) -> Result<(), LifecycleError> {
        let mut from = expected;
        let moved = self.phase.send_if_modified(|phase| {
            from = *phase;
            if *phase == expected {
                *phase = next;
                true
            } else {
                false
            }
        });

        if moved {
            tracing::info!(from = %from, to = %next, "Lifecycle phase changed");
            Ok(())
        } else {
            tracing::warn!(from = %from, to = %next, "Refused lifecycle transition");
            Err(LifecycleError::InvalidTransition { from, to: next })
        }
    }

    fn transition(&self, next: LifecyclePhase) {
        let previous = self.phase.send_replace(next);
        tracing::info!(from = %previous, to = %next, "Lifecycle phase changed");
    }
}

impl fmt::Debug for LifecycleCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleCoordinator")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
