//! Connection states and the [`Connector`] abstraction.
//!
//! Both the shared bus and the durable store are reached through a
//! [`Connector`]. A connector only knows how to open one fresh connection; the
//! runtime's reconnector owns the state machine around it:
//!
//! ```text
//!                 connect()
//! Disconnected ───────────────> Connecting
//!      ▲                            │
//!      │ closed future resolves     │ Ok(Connection)
//!      │                            ▼
//!      └────────────────────── Connected
//! ```
//!
//! A [`Connection`] pairs the usable handle with a `closed` future. The future
//! resolves when the underlying transport reports that the connection is gone
//! (a subscriber stream ending, a LISTEN connection dropping), which is how
//! disconnects are detected without polling.

use crate::error::ConnectError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// Boxed, sendable future used at every dyn-compatible seam.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Connection state of a bus or store resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No usable connection.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// The handle is usable.
    Connected,
}

impl ConnectionState {
    /// Whether the resource can currently be used.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
        }
    }
}

/// A freshly opened connection.
pub struct Connection<H> {
    /// The usable handle.
    pub handle: H,
    /// Resolves once the transport reports the connection lost.
    pub closed: BoxFuture<'static, ()>,
}

impl<H> Connection<H> {
    /// Pair a handle with its disconnect notification.
    pub fn new(handle: H, closed: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            handle,
            closed: Box::pin(closed),
        }
    }
}

impl<H: fmt::Debug> fmt::Debug for Connection<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("handle", &self.handle)
            .field("closed", &"<future>")
            .finish()
    }
}

/// Opens connections to one external resource.
///
/// Implementations must be atomic: either a complete, usable [`Connection`] is
/// returned or nothing is left half-open.
///
/// # Dyn Compatibility
///
/// Uses explicit boxed futures instead of `async fn` so reconnectors can hold
/// `Arc<dyn Connector<Handle = H>>`.
pub trait Connector: Send + Sync {
    /// The handle callers use while connected.
    type Handle: Clone + Send + Sync + 'static;

    /// Short resource name for logs and health output (`"bus"`, `"store"`).
    fn resource(&self) -> &'static str;

    /// Open one fresh connection.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError`] if the resource cannot be reached.
    fn connect(&self) -> BoxFuture<'_, Result<Connection<Self::Handle>, ConnectError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Disconnected.to_string(), "disconnected");
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionState::Connecting).unwrap_or_default();
        assert_eq!(json, "\"connecting\"");
    }

    #[tokio::test]
    async fn test_connection_closed_future_is_boxed() {
        let conn = Connection::new(7_u8, async {});
        assert_eq!(conn.handle, 7);
        conn.closed.await;
    }
}
