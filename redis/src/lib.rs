//! Redis pub/sub bus transport.
//!
//! Implements [`BusTransport`] on top of Redis `PUBLISH` and `PSUBSCRIBE`.
//!
//! # Architecture
//!
//! ```text
//!            ┌────────── Client (REDIS_HOST) ──────────┐
//!            │                                          │
//!  MultiplexedConnection                         PubSub connection
//!  PUBLISH relay#room payload                    PSUBSCRIBE relay#*
//!            │                                          │
//!     RedisPublisher                          stream of BusMessage
//! ```
//!
//! The publisher and the subscriber are always separate connections: a
//! connection in subscriber mode cannot issue `PUBLISH`.
//!
//! # Example
//!
//! ```no_run
//! use relay_redis::RedisBusTransport;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = RedisBusTransport::new("redis://127.0.0.1:6379")?;
//! # Ok(())
//! # }
//! ```

use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, RedisError};
use relay_core::bus::{BusMessage, BusPublisher, BusSubscription, BusTransport};
use relay_core::{BoxFuture, BusError};
use std::sync::Arc;

/// Bus transport backed by one Redis server.
#[derive(Clone)]
pub struct RedisBusTransport {
    client: Client,
}

impl RedisBusTransport {
    /// Create a transport for `redis_url`. No connection is opened yet.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Unavailable`] if the URL is not a valid Redis URL.
    pub fn new(redis_url: &str) -> Result<Self, BusError> {
        let client = Client::open(redis_url)
            .map_err(|e| BusError::Unavailable(format!("Invalid Redis URL: {e}")))?;
        Ok(Self { client })
    }
}

impl std::fmt::Debug for RedisBusTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBusTransport")
            .field("addr", &self.client.get_connection_info().addr)
            .finish()
    }
}

/// Publisher on a dedicated multiplexed connection.
struct RedisPublisher {
    conn: MultiplexedConnection,
}

impl BusPublisher for RedisPublisher {
    fn publish<'a>(
        &'a self,
        channel: &'a str,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), BusError>> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let receivers: i64 = conn
                .publish(channel, payload)
                .await
                .map_err(|e| publish_error(channel, &e))?;

            tracing::trace!(channel, receivers, "Published to Redis");
            Ok(())
        })
    }
}

/// Classify a publish failure: a dropped connection must reach the
/// reconnector, anything else is a plain refusal.
fn publish_error(channel: &str, err: &RedisError) -> BusError {
    if err.is_connection_dropped() || err.is_io_error() || err.is_connection_refusal() {
        BusError::Disconnected(err.to_string())
    } else {
        BusError::PublishFailed {
            channel: channel.to_string(),
            reason: err.to_string(),
        }
    }
}

impl BusTransport for RedisBusTransport {
    fn open_publisher(&self) -> BoxFuture<'_, Result<Arc<dyn BusPublisher>, BusError>> {
        Box::pin(async move {
            let conn = self
                .client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| BusError::Unavailable(format!("Redis publisher: {e}")))?;

            tracing::debug!("Opened Redis publisher connection");
            Ok(Arc::new(RedisPublisher { conn }) as Arc<dyn BusPublisher>)
        })
    }

    fn open_subscriber<'a>(
        &'a self,
        pattern: &'a str,
    ) -> BoxFuture<'a, Result<BusSubscription, BusError>> {
        Box::pin(async move {
            let subscription_failed = |e: RedisError| BusError::SubscriptionFailed {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            };

            let mut pubsub = self
                .client
                .get_async_pubsub()
                .await
                .map_err(subscription_failed)?;
            pubsub
                .psubscribe(pattern)
                .await
                .map_err(subscription_failed)?;

            tracing::debug!(pattern, "Opened Redis subscriber connection");

            // The message stream ends when the connection drops
            let stream = pubsub.into_on_message().map(|msg| {
                Ok(BusMessage {
                    channel: msg.get_channel_name().to_string(),
                    payload: msg.get_payload_bytes().to_vec(),
                })
            });

            Ok(stream.boxed())
        })
    }
}
