//! In-memory store connector with fault injection.
//!
//! Stands in for the durable store wherever a test needs a [`Connector`] that
//! can be refused, left hanging or dropped on demand.

use parking_lot::Mutex;
use relay_core::{BoxFuture, ConnectError, Connection, Connector, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::watch;

/// Resource name reported by [`InMemoryStore`].
pub const STORE_RESOURCE: &str = "store";

#[derive(Default)]
struct State {
    available: AtomicBool,
    hang: AtomicBool,
    attempts: AtomicUsize,
    data: Mutex<HashMap<String, String>>,
}

/// Store connector backed by a `HashMap`.
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<State>,
    generation: Arc<watch::Sender<u64>>,
}

impl InMemoryStore {
    /// Create an available store.
    #[must_use]
    pub fn new() -> Self {
        let (generation, _) = watch::channel(0);
        let store = Self {
            state: Arc::new(State::default()),
            generation: Arc::new(generation),
        };
        store.state.available.store(true, Ordering::SeqCst);
        store
    }

    /// Create a store that refuses every connection.
    #[must_use]
    pub fn unreachable() -> Self {
        let store = Self::new();
        store.set_available(false);
        store
    }

    /// Refuse (or accept again) new connections. Going unavailable also
    /// drops the open connection.
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
        if !available {
            self.disconnect();
        }
    }

    /// Make connection attempts hang forever instead of failing.
    pub fn set_hang(&self, hang: bool) {
        self.state.hang.store(hang, Ordering::SeqCst);
    }

    /// Drop the open connection. Reconnects are accepted.
    pub fn disconnect(&self) {
        self.generation.send_modify(|g| *g += 1);
    }

    /// Connection attempts made so far, successful or not.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("available", &self.state.available.load(Ordering::SeqCst))
            .field("attempts", &self.attempts())
            .finish_non_exhaustive()
    }
}

/// Live handle to an [`InMemoryStore`] connection.
#[derive(Clone)]
pub struct StoreHandle {
    state: Arc<State>,
    generation: watch::Receiver<u64>,
    opened_at: u64,
}

impl StoreHandle {
    fn check(&self) -> Result<(), StoreError> {
        if *self.generation.borrow() == self.opened_at {
            Ok(())
        } else {
            Err(StoreError::Unavailable("connection reset".to_string()))
        }
    }

    /// Liveness probe.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the connection was dropped.
    pub fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    /// Store a value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the connection was dropped.
    pub fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.check()?;
        self.state
            .data
            .lock()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the connection was dropped.
    pub fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        Ok(self.state.data.lock().get(key).cloned())
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("opened_at", &self.opened_at)
            .finish_non_exhaustive()
    }
}

impl Connector for InMemoryStore {
    type Handle = StoreHandle;

    fn resource(&self) -> &'static str {
        STORE_RESOURCE
    }

    fn connect(&self) -> BoxFuture<'_, Result<Connection<StoreHandle>, ConnectError>> {
        Box::pin(async move {
            self.state.attempts.fetch_add(1, Ordering::SeqCst);

            if self.state.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            if !self.state.available.load(Ordering::SeqCst) {
                return Err(ConnectError::new(STORE_RESOURCE, "connection refused"));
            }

            let opened_at = *self.generation.borrow();
            let mut watcher = self.generation.subscribe();
            let handle = StoreHandle {
                state: Arc::clone(&self.state),
                generation: self.generation.subscribe(),
                opened_at,
            };
            let closed = async move {
                let _ = watcher.wait_for(|g| *g != opened_at).await;
            };

            Ok(Connection::new(handle, closed))
        })
    }
}
