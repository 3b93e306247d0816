//! Shared publish/subscribe bus abstraction.
//!
//! The bus is what makes an event published on one process visible to the
//! sessions connected to every other process.
//!
//! # Architecture
//!
//! ```text
//! Process A                          Process B
//! ┌───────────────┐                  ┌───────────────┐
//! │  Publisher    │ ── relay#room ─┐ │  Publisher    │
//! │  Subscriber   │ <──────────────┼─│  Subscriber   │
//! └───────────────┘                │ └───────────────┘
//!                                  │        ▲
//!                                  └────────┘
//!                          pattern subscription relay#*
//! ```
//!
//! # Key Principles
//!
//! - **Independent handles**: the publisher and the subscriber are separate
//!   connections. A subscriber parked in blocking receive cannot publish.
//! - **Echo**: a process's subscriber also receives that process's own
//!   publishes. Callers suppress them by event origin.
//! - **No global order**: ordering across processes is whatever the bus
//!   technology provides and is a deployment-time property.
//!
//! # Implementations
//!
//! - `RedisBusTransport` in `relay-redis` - For production (Redis pub/sub)
//! - `InMemoryBus` in `relay-testing` - For tests, with fault injection

use crate::connection::BoxFuture;
use crate::error::BusError;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Raw message received from the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Bus channel the message arrived on (including namespace).
    pub channel: String,
    /// Encoded envelope.
    pub payload: Vec<u8>,
}

/// Stream of messages from a subscriber handle.
///
/// The stream ending, or yielding [`BusError::Disconnected`], is the
/// transport's notification that the subscriber connection is gone.
pub type BusSubscription = Pin<Box<dyn Stream<Item = Result<BusMessage, BusError>> + Send>>;

/// Publisher handle.
///
/// Never shared with a subscriber.
pub trait BusPublisher: Send + Sync {
    /// Publish an encoded envelope to a bus channel.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Disconnected`] if the connection dropped, or
    /// [`BusError::PublishFailed`] for any other refusal.
    fn publish<'a>(
        &'a self,
        channel: &'a str,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), BusError>>;
}

/// Factory for independent publisher and subscriber handles.
///
/// # Dyn Compatibility
///
/// Uses explicit boxed futures so the runtime can hold `Arc<dyn BusTransport>`.
pub trait BusTransport: Send + Sync {
    /// Open a new publisher connection.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Unavailable`] if the bus cannot be reached.
    fn open_publisher(&self) -> BoxFuture<'_, Result<Arc<dyn BusPublisher>, BusError>>;

    /// Open a new subscriber connection subscribed to `pattern`.
    ///
    /// Patterns use glob syntax (`relay#*`).
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if the subscription cannot be
    /// established.
    fn open_subscriber<'a>(
        &'a self,
        pattern: &'a str,
    ) -> BoxFuture<'a, Result<BusSubscription, BusError>>;
}

/// Bus channel name for a fan-out channel under a namespace.
///
/// ```
/// use relay_core::bus::bus_channel;
///
/// assert_eq!(bus_channel("relay", "room-1"), "relay#room-1");
/// ```
#[must_use]
pub fn bus_channel(namespace: &str, channel: &str) -> String {
    format!("{namespace}#{channel}")
}

/// Pattern matching every channel under a namespace.
#[must_use]
pub fn namespace_pattern(namespace: &str) -> String {
    format!("{namespace}#*")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_pattern() {
        assert_eq!(namespace_pattern("relay"), "relay#*");
    }

    #[test]
    fn test_bus_channel_keeps_channel_verbatim() {
        assert_eq!(bus_channel("ns", "a#b"), "ns#a#b");
    }
}
