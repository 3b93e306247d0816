//! Connection registry: live sessions and their channel subscriptions.
//!
//! The registry is the only place that knows which sessions exist and which
//! channels each session listens to. All mutations go through one write lock,
//! so membership changes are serialized; delivery takes the read lock and
//! never awaits while holding it.
//!
//! # Delivery
//!
//! Every session owns a bounded outbound queue drained by its transport
//! worker. [`ConnectionRegistry::deliver_local`] uses `try_send`:
//!
//! | Queue state | Outcome                                      |
//! |-------------|----------------------------------------------|
//! | Has room    | Delivered                                    |
//! | Full        | Dropped for that session only (slow consumer)|
//! | Closed      | Session evicted once the pass completes      |
//!
//! A slow or dead session therefore never blocks delivery to its neighbours.

use crate::config::RegistryConfig;
use crate::metrics::RegistryMetrics;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use relay_core::{Event, SessionId};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// Lifecycle of one registered session.
///
/// The registry holds a session from [`ConnectionRegistry::admit`] until
/// [`ConnectionRegistry::evict`]. A handshake still in progress is not yet
/// registered, and an evicted session is gone: [`ConnectionRegistry::session`]
/// returns `None` for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Admitted and receiving events.
    Open,
    /// Close initiated; no longer accepts subscriptions.
    Closing,
}

/// Errors from registry operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// The process is draining and admits no new sessions.
    #[error("Admissions are closed")]
    AdmissionClosed,
}

/// Result of one local delivery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Sessions the event was queued for.
    pub delivered: usize,
    /// Sessions whose queue was full.
    pub dropped: usize,
    /// Sessions evicted because their transport was gone.
    pub evicted: Vec<SessionId>,
}

/// Snapshot of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    /// Session id
    pub id: SessionId,
    /// Current state
    pub state: SessionState,
    /// When the session was admitted
    pub connected_at: DateTime<Utc>,
    /// Subscribed channels
    pub channels: Vec<String>,
}

/// A freshly admitted session.
///
/// The transport worker owns this: it forwards everything from `outbound` to
/// the client and calls [`ConnectionRegistry::evict`] when the transport ends.
#[derive(Debug)]
pub struct Admission {
    /// Id assigned to the session.
    pub id: SessionId,
    /// Events addressed to this session.
    pub outbound: mpsc::Receiver<Arc<Event>>,
}

struct SessionEntry {
    state: SessionState,
    connected_at: DateTime<Utc>,
    channels: HashSet<String>,
    sender: mpsc::Sender<Arc<Event>>,
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, SessionEntry>,
    channels: HashMap<String, HashSet<SessionId>>,
}

impl Inner {
    fn remove(&mut self, id: SessionId) -> bool {
        let Some(entry) = self.sessions.remove(&id) else {
            return false;
        };
        for channel in &entry.channels {
            self.leave(channel, id);
        }
        true
    }

    fn leave(&mut self, channel: &str, id: SessionId) {
        if let Some(members) = self.channels.get_mut(channel) {
            members.remove(&id);
            if members.is_empty() {
                self.channels.remove(channel);
            }
        }
    }
}

/// Registry of live sessions on this process.
pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
    config: RegistryConfig,
    accepting: AtomicBool,
    active: watch::Sender<usize>,
}

impl ConnectionRegistry {
    /// Create an empty registry that accepts new sessions.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            inner: RwLock::new(Inner::default()),
            config,
            accepting: AtomicBool::new(true),
            active,
        }
    }

    /// Admit a new session in state `Open`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AdmissionClosed`] once admissions are closed.
    pub fn admit(&self) -> Result<Admission, RegistryError> {
        let (sender, outbound) = mpsc::channel(self.config.session_buffer.max(1));
        let id = SessionId::new();

        let count = {
            let mut inner = self.inner.write();
            // Checked under the lock so a concurrent close cannot race an admit
            if !self.accepting.load(Ordering::SeqCst) {
                return Err(RegistryError::AdmissionClosed);
            }
            inner.sessions.insert(
                id,
                SessionEntry {
                    state: SessionState::Open,
                    connected_at: Utc::now(),
                    channels: HashSet::new(),
                    sender,
                },
            );
            inner.sessions.len()
        };

        self.publish_count(count);
        tracing::debug!(session_id = %id, sessions = count, "Session admitted");
        Ok(Admission { id, outbound })
    }

    /// Remove a session and all of its subscriptions.
    ///
    /// Dropping the entry closes the outbound queue, which ends the session's
    /// transport worker. Returns `false` if the session was already gone.
    pub fn evict(&self, id: SessionId) -> bool {
        let (removed, count) = {
            let mut inner = self.inner.write();
            let removed = inner.remove(id);
            (removed, inner.sessions.len())
        };

        if removed {
            self.publish_count(count);
            tracing::debug!(session_id = %id, sessions = count, "Session evicted");
        }
        removed
    }

    /// Evict every session. Returns how many were evicted.
    pub fn evict_all(&self) -> usize {
        let evicted = {
            let mut inner = self.inner.write();
            let evicted = inner.sessions.len();
            inner.sessions.clear();
            inner.channels.clear();
            evicted
        };

        self.publish_count(0);
        if evicted > 0 {
            tracing::info!(evicted, "Evicted all sessions");
        }
        evicted
    }

    /// Mark a session as closing. It stops accepting subscription changes but
    /// still receives events until evicted.
    pub fn mark_closing(&self, id: SessionId) {
        if let Some(entry) = self.inner.write().sessions.get_mut(&id) {
            entry.state = SessionState::Closing;
        }
    }

    /// Add a channel to an open session's subscriptions.
    ///
    /// Subscribing twice is a no-op. Returns `true` if the subscription set
    /// changed.
    pub fn subscribe(&self, id: SessionId, channel: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.sessions.get_mut(&id) else {
            return false;
        };
        if entry.state != SessionState::Open || !entry.channels.insert(channel.to_string()) {
            return false;
        }
        inner
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(id);
        true
    }

    /// Remove a channel from a session's subscriptions.
    ///
    /// Returns `true` if the subscription set changed.
    pub fn unsubscribe(&self, id: SessionId, channel: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.sessions.get_mut(&id) else {
            return false;
        };
        if !entry.channels.remove(channel) {
            return false;
        }
        inner.leave(channel, id);
        true
    }

    /// Queue an event for every session subscribed to its channel.
    ///
    /// Never blocks. Sessions whose queue has closed are evicted after the
    /// pass.
    pub fn deliver_local(&self, event: &Arc<Event>) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        {
            let inner = self.inner.read();
            let Some(members) = inner.channels.get(event.channel()) else {
                return report;
            };

            for id in members {
                let Some(entry) = inner.sessions.get(id) else {
                    continue;
                };
                match entry.sender.try_send(Arc::clone(event)) {
                    Ok(()) => report.delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!(session_id = %id, channel = event.channel(), "Session queue full, dropping event");
                        report.dropped += 1;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => report.evicted.push(*id),
                }
            }
        }

        RegistryMetrics::record_dropped(report.dropped);
        for id in &report.evicted {
            self.evict(*id);
        }
        report
    }

    /// Stop admitting new sessions.
    pub fn close_admissions(&self) {
        let _guard = self.inner.write();
        self.accepting.store(false, Ordering::SeqCst);
    }

    /// Whether new sessions are admitted.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// Whether there are no live sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().sessions.is_empty()
    }

    /// Number of channels with at least one subscriber.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.inner.read().channels.len()
    }

    /// Sessions subscribed to a channel.
    #[must_use]
    pub fn members(&self, channel: &str) -> Vec<SessionId> {
        self.inner
            .read()
            .channels
            .get(channel)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of one session.
    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<SessionInfo> {
        self.inner.read().sessions.get(&id).map(|entry| {
            let mut channels: Vec<String> = entry.channels.iter().cloned().collect();
            channels.sort();
            SessionInfo {
                id,
                state: entry.state,
                connected_at: entry.connected_at,
                channels,
            }
        })
    }

    /// Observe the live session count.
    #[must_use]
    pub fn watch_active(&self) -> watch::Receiver<usize> {
        self.active.subscribe()
    }

    fn publish_count(&self, count: usize) {
        self.active.send_replace(count);
        RegistryMetrics::record_active(count);
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ConnectionRegistry")
            .field("sessions", &inner.sessions.len())
            .field("channels", &inner.channels.len())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}
