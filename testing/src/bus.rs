//! In-memory bus for fast, deterministic tests.
//!
//! One [`InMemoryBus`] plays the role of the shared bus server. Every clone
//! talks to the same hub, so several relay nodes built from clones of one bus
//! see each other's publishes exactly like processes sharing a Redis.
//!
//! # Fault Injection
//!
//! - [`InMemoryBus::disconnect_all`] drops every open publisher and
//!   subscriber, as if the server restarted. New connections succeed.
//! - [`InMemoryBus::set_available`] with `false` additionally refuses new
//!   connections until it is set back to `true`.

use futures::StreamExt;
use parking_lot::Mutex;
use relay_core::bus::{BusMessage, BusPublisher, BusSubscription, BusTransport};
use relay_core::{BoxFuture, BusError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{broadcast, watch};

/// Capacity of the hub's broadcast ring. Subscribers that fall further behind
/// skip ahead, like a real pub/sub server dropping slow clients' backlog.
const HUB_CAPACITY: usize = 1024;

struct Hub {
    messages: broadcast::Sender<BusMessage>,
    generation: watch::Sender<u64>,
    available: AtomicBool,
    connections: AtomicUsize,
    published: Mutex<Vec<BusMessage>>,
}

/// Shared in-memory publish/subscribe hub.
#[derive(Clone)]
pub struct InMemoryBus {
    hub: Arc<Hub>,
}

impl InMemoryBus {
    /// Create a new, available hub.
    #[must_use]
    pub fn new() -> Self {
        let (messages, _) = broadcast::channel(HUB_CAPACITY);
        let (generation, _) = watch::channel(0);
        Self {
            hub: Arc::new(Hub {
                messages,
                generation,
                available: AtomicBool::new(true),
                connections: AtomicUsize::new(0),
                published: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Drop every open connection. Reconnects are accepted.
    pub fn disconnect_all(&self) {
        self.hub.generation.send_modify(|g| *g += 1);
    }

    /// Refuse (or accept again) new connections. Going unavailable also
    /// drops every open connection.
    pub fn set_available(&self, available: bool) {
        self.hub.available.store(available, Ordering::SeqCst);
        if !available {
            self.disconnect_all();
        }
    }

    /// Whether new connections are accepted.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.hub.available.load(Ordering::SeqCst)
    }

    /// Total publisher and subscriber connections opened so far.
    #[must_use]
    pub fn connections_opened(&self) -> usize {
        self.hub.connections.load(Ordering::SeqCst)
    }

    /// Every message published through this hub, in order.
    #[must_use]
    pub fn published(&self) -> Vec<BusMessage> {
        self.hub.published.lock().clone()
    }

    fn check_available(&self) -> Result<u64, BusError> {
        if self.is_available() {
            self.hub.connections.fetch_add(1, Ordering::SeqCst);
            Ok(*self.hub.generation.borrow())
        } else {
            Err(BusError::Unavailable("in-memory bus is down".to_string()))
        }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBus")
            .field("available", &self.is_available())
            .field("generation", &*self.hub.generation.borrow())
            .finish_non_exhaustive()
    }
}

struct InMemoryPublisher {
    hub: Arc<Hub>,
    generation: u64,
}

impl BusPublisher for InMemoryPublisher {
    fn publish<'a>(
        &'a self,
        channel: &'a str,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), BusError>> {
        Box::pin(async move {
            if *self.hub.generation.borrow() != self.generation {
                return Err(BusError::Disconnected("connection reset".to_string()));
            }
            let message = BusMessage {
                channel: channel.to_string(),
                payload,
            };
            self.hub.published.lock().push(message.clone());
            // No subscribers is not an error for pub/sub
            let _ = self.hub.messages.send(message);
            Ok(())
        })
    }
}

impl BusTransport for InMemoryBus {
    fn open_publisher(&self) -> BoxFuture<'_, Result<Arc<dyn BusPublisher>, BusError>> {
        Box::pin(async move {
            let generation = self.check_available()?;
            Ok(Arc::new(InMemoryPublisher {
                hub: Arc::clone(&self.hub),
                generation,
            }) as Arc<dyn BusPublisher>)
        })
    }

    fn open_subscriber<'a>(
        &'a self,
        pattern: &'a str,
    ) -> BoxFuture<'a, Result<BusSubscription, BusError>> {
        Box::pin(async move {
            let generation = self.check_available().map_err(|e| BusError::SubscriptionFailed {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;

            let mut messages = self.hub.messages.subscribe();
            let mut generations = self.hub.generation.subscribe();
            let pattern = pattern.to_string();

            let stream = async_stream::stream! {
                loop {
                    let next = tokio::select! {
                        () = async {
                            let _ = generations.wait_for(|g| *g != generation).await;
                        } => None,
                        received = messages.recv() => Some(received),
                    };
                    match next {
                        None => {
                            yield Err(BusError::Disconnected("connection reset".to_string()));
                            break;
                        }
                        Some(Ok(message)) if matches_pattern(&pattern, &message.channel) => {
                            yield Ok(message);
                        }
                        Some(Ok(_) | Err(broadcast::error::RecvError::Lagged(_))) => {}
                        Some(Err(broadcast::error::RecvError::Closed)) => break,
                    }
                }
            };

            Ok(stream.boxed())
        })
    }
}

/// Glob match supporting a single trailing `*`.
fn matches_pattern(pattern: &str, channel: &str) -> bool {
    pattern
        .strip_suffix('*')
        .map_or(pattern == channel, |prefix| channel.starts_with(prefix))
}
