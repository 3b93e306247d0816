//! Supervised connections with automatic reconnect.
//!
//! A [`Reconnector`] owns exactly one live handle to an external resource and
//! keeps it alive for the whole process lifetime:
//!
//! ```text
//!  connect_with_budget()          supervise()
//! ┌─────────────────────┐   ┌──────────────────────────────────────┐
//! │ attempt, backoff,   │   │ await closed ──> Disconnected (warn) │
//! │ attempt, ... fail   │──>│      ▲                │              │
//! └─────────────────────┘   │      │          retry immediately,   │
//!                           │      └── Connected <─ then backoff   │
//!                           └──────────────────────────────────────┘
//! ```
//!
//! # Invariants
//!
//! - At most one live handle per reconnector. A new handle replaces the old
//!   one only after the old one is known to be lost, and the swap happens
//!   under a single write lock so readers never see a half-initialized handle.
//! - While disconnected, [`Reconnector::current`] returns `None`. Callers fail
//!   fast instead of queueing behind the reconnect.
//! - Connection loss is never fatal after startup.

use crate::config::ReconnectConfig;
use crate::metrics::ReconnectMetrics;
use parking_lot::{Mutex, RwLock};
use relay_core::{BoxFuture, ConnectError, ConnectionState, Connector, StoreError};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Keeps one connection to a resource alive.
pub struct Reconnector<H> {
    resource: &'static str,
    connector: Arc<dyn Connector<Handle = H>>,
    config: ReconnectConfig,
    handle: RwLock<Option<H>>,
    closed: Mutex<Option<BoxFuture<'static, ()>>>,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

impl<H: Clone + Send + Sync + 'static> Reconnector<H> {
    /// Create a reconnector around a connector. Nothing connects until
    /// [`connect_with_budget`](Self::connect_with_budget) or
    /// [`supervise`](Self::supervise) runs.
    #[must_use]
    pub fn new<C>(connector: C, config: ReconnectConfig) -> Self
    where
        C: Connector<Handle = H> + 'static,
    {
        Self::from_arc(Arc::new(connector), config)
    }

    /// Create a reconnector around a shared connector.
    #[must_use]
    pub fn from_arc(connector: Arc<dyn Connector<Handle = H>>, config: ReconnectConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            resource: connector.resource(),
            connector,
            config,
            handle: RwLock::new(None),
            closed: Mutex::new(None),
            state,
            shutdown: CancellationToken::new(),
        }
    }

    /// Resource name (`"bus"`, `"store"`).
    #[must_use]
    pub const fn resource(&self) -> &'static str {
        self.resource
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observe connection state changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The live handle, or `None` while disconnected.
    #[must_use]
    pub fn current(&self) -> Option<H> {
        self.handle.read().clone()
    }

    /// Make one connection attempt and install the handle on success.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] if the connector fails. The state returns to
    /// `Disconnected`.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        self.transition(ConnectionState::Connecting);

        match self.connector.connect().await {
            Ok(connection) => {
                {
                    let mut handle = self.handle.write();
                    *handle = Some(connection.handle);
                    *self.closed.lock() = Some(connection.closed);
                }
                self.transition(ConnectionState::Connected);
                Ok(())
            }
            Err(e) => {
                self.transition(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Connect during startup, within the configured attempt budget.
    ///
    /// Failures between attempts are logged and followed by a backoff delay.
    /// The caller bounds the total time.
    ///
    /// # Errors
    ///
    /// Returns the last [`ConnectError`] once the budget is exhausted, or a
    /// cancellation error if the reconnector is shut down meanwhile.
    pub async fn connect_with_budget(&self) -> Result<(), ConnectError> {
        let attempts = self.config.startup_attempts.max(1);

        for attempt in 0..attempts {
            if self.shutdown.is_cancelled() {
                return Err(ConnectError::new(self.resource, "shut down"));
            }

            match self.connect().await {
                Ok(()) => {
                    tracing::info!(resource = self.resource, attempt, "Connected");
                    return Ok(());
                }
                Err(e) if attempt + 1 >= attempts => {
                    tracing::error!(
                        resource = self.resource,
                        attempts,
                        error = %e,
                        "Startup connection attempts exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.config.backoff.delay_for_attempt(attempt);
                    tracing::warn!(
                        resource = self.resource,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Startup connection attempt failed, retrying"
                    );
                    tokio::select! {
                        () = self.shutdown.cancelled() => {
                            return Err(ConnectError::new(self.resource, "shut down"));
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        Err(ConnectError::new(self.resource, "no connection attempts made"))
    }

    /// Spawn the supervisor task.
    ///
    /// The supervisor waits for the live connection to report loss, clears the
    /// handle, and reconnects: once immediately, then on the backoff schedule,
    /// until it succeeds or [`shutdown`](Self::shutdown) is called.
    pub fn supervise(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_supervisor().await })
    }

    /// Stop supervising and drop the live handle.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.handle.write().take();
        self.closed.lock().take();
        self.transition(ConnectionState::Disconnected);
    }

    /// Run a durable operation against the live handle.
    ///
    /// Fails fast with [`StoreError::Unavailable`] while disconnected and
    /// with [`StoreError::Timeout`] if the operation outlives the configured
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns the operation's own error, or one of the above.
    pub async fn durable<T, F, Fut>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(H) -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let handle = self.current().ok_or_else(|| {
            StoreError::Unavailable(format!("{} is {}", self.resource, self.state()))
        })?;

        let timeout = self.config.operation_timeout;
        tokio::time::timeout(timeout, op(handle))
            .await
            .map_err(|_| StoreError::Timeout(timeout))?
    }

    async fn run_supervisor(self: Arc<Self>) {
        loop {
            let closed = self.closed.lock().take();

            if let Some(closed) = closed {
                tokio::select! {
                    () = self.shutdown.cancelled() => return,
                    () = closed => {}
                }

                self.handle.write().take();
                self.transition(ConnectionState::Disconnected);
                tracing::warn!(resource = self.resource, "Connection lost, reconnecting");
            }

            if !self.reconnect().await {
                return;
            }
        }
    }

    /// Reconnect until success. Returns `false` if shut down first.
    async fn reconnect(&self) -> bool {
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                return false;
            }

            ReconnectMetrics::record_attempt(self.resource);

            match self.connect().await {
                Ok(()) => {
                    tracing::info!(resource = self.resource, attempt, "Reconnected");
                    return true;
                }
                Err(e) => {
                    let delay = self.config.backoff.delay_for_attempt(attempt);
                    tracing::warn!(
                        resource = self.resource,
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "Reconnect attempt failed"
                    );
                    tokio::select! {
                        () = self.shutdown.cancelled() => return false,
                        () = tokio::time::sleep(delay) => {}
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    fn transition(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(resource = self.resource, from = %previous, to = %next, "Connection state changed");
        }
    }
}

/// Type-erased view of a reconnector, for code that supervises resources
/// without caring about their handle type.
pub trait ManagedResource: Send + Sync {
    /// Resource name.
    fn resource(&self) -> &'static str;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Observe connection state changes.
    fn watch(&self) -> watch::Receiver<ConnectionState>;

    /// Connect within the startup attempt budget.
    fn connect_with_budget(&self) -> BoxFuture<'_, Result<(), ConnectError>>;

    /// Spawn the supervisor task.
    fn spawn_supervisor(self: Arc<Self>) -> JoinHandle<()>;

    /// Stop supervising and drop the live handle.
    fn shutdown(&self);
}

impl<H: Clone + Send + Sync + 'static> ManagedResource for Reconnector<H> {
    fn resource(&self) -> &'static str {
        self.resource
    }

    fn state(&self) -> ConnectionState {
        Self::state(self)
    }

    fn watch(&self) -> watch::Receiver<ConnectionState> {
        Self::watch(self)
    }

    fn connect_with_budget(&self) -> BoxFuture<'_, Result<(), ConnectError>> {
        Box::pin(Self::connect_with_budget(self))
    }

    fn spawn_supervisor(self: Arc<Self>) -> JoinHandle<()> {
        self.supervise()
    }

    fn shutdown(&self) {
        Self::shutdown(self);
    }
}

impl<H> std::fmt::Debug for Reconnector<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconnector")
            .field("resource", &self.resource)
            .field("state", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}
