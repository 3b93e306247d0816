//! WebSocket session transport.
//!
//! Each upgraded connection becomes one registry session. Two tasks serve it:
//!
//! ```text
//! Client          send task / recv task           Registry / Adapter
//!   │                    │                               │
//!   ├─ Upgrade ─────────>│                               │
//!   │                    ├─ admit() ────────────────────>│
//!   │<─ welcome ─────────┤                               │
//!   ├─ subscribe ───────>│                               │
//!   │                    ├─ subscribe(id, channel) ─────>│
//!   ├─ publish ─────────>│                               │
//!   │                    ├─ adapter.publish() ──────────>│
//!   │                    │<── outbound queue ────────────┤
//!   │<─ event ───────────┤                               │
//! ```
//!
//! When either task ends (client close, transport error, eviction) the other
//! is aborted and the session is evicted.
//!
//! # Message Protocol
//!
//! **Client → Server:**
//! ```json
//! {"type": "subscribe", "channels": ["room-1"]}
//! {"type": "unsubscribe", "channels": ["room-1"]}
//! {"type": "publish", "channel": "room-1", "payload": {"text": "hello"}}
//! {"type": "ping"}
//! ```
//!
//! **Server → Client:**
//! ```json
//! {"type": "welcome", "session_id": "..."}
//! {"type": "subscribed", "channels": ["room-1"]}
//! {"type": "event", "channel": "room-1", "payload": {"text": "hello"}}
//! {"type": "error", "message": "Invalid message: ..."}
//! {"type": "pong"}
//! ```

use crate::WebResult;
use crate::error::AppError;
use crate::extractors::ClientSession;
use crate::state::AppState;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use futures::{
    SinkExt,
    stream::{SplitSink, StreamExt},
};
use relay_core::{RelayError, SessionId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Replies queued from the reader to the writer.
const REPLY_BUFFER: usize = 32;

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join channels
    Subscribe {
        /// Channels to join
        channels: Vec<String>,
    },
    /// Leave channels
    Unsubscribe {
        /// Channels to leave
        channels: Vec<String>,
    },
    /// Fan an event out to a channel
    Publish {
        /// Target channel
        channel: String,
        /// Event body
        payload: serde_json::Value,
    },
    /// Keep-alive
    Ping,
}

/// Frames the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every session
    Welcome {
        /// The registry id of this session
        session_id: SessionId,
    },
    /// Subscribe acknowledged
    Subscribed {
        /// Channels joined
        channels: Vec<String>,
    },
    /// Unsubscribe acknowledged
    Unsubscribed {
        /// Channels left
        channels: Vec<String>,
    },
    /// An event on a subscribed channel
    Event {
        /// Source channel
        channel: String,
        /// Event body
        payload: serde_json::Value,
    },
    /// A frame could not be handled
    Error {
        /// What went wrong
        message: String,
    },
    /// Keep-alive answer
    Pong,
}

/// Upgrade to a WebSocket session.
///
/// # Endpoint
///
/// ```text
/// GET /ws
/// ```
///
/// # Errors
///
/// Answers 503 `draining` once the process stopped admitting sessions,
/// checked before the upgrade headers.
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn upgrade(
    State(state): State<AppState>,
    ClientSession(client): ClientSession,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> WebResult<Response> {
    if !state.node().registry().is_accepting() {
        return Err(AppError::unavailable("draining", "Server is draining"));
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };
    let client = client.map(|claims| claims.sid);
    Ok(ws.on_upgrade(move |socket| run_session(socket, state, client)))
}

/// Serve one upgraded connection until it ends.
#[allow(clippy::cognitive_complexity)] // Session loop with multiple frame types
async fn run_session(mut socket: WebSocket, state: AppState, client: Option<uuid::Uuid>) {
    let registry = std::sync::Arc::clone(state.node().registry());

    let admission = match registry.admit() {
        Ok(admission) => admission,
        Err(e) => {
            // Admissions closed between the upgrade check and now
            debug!(error = %e, "Refusing session");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    let id = admission.id;
    let mut outbound = admission.outbound;
    info!(session_id = %id, client = ?client, "Session opened");

    let (mut sink, mut stream) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerMessage>(REPLY_BUFFER);

    let mut send_task = tokio::spawn(async move {
        if send(&mut sink, &ServerMessage::Welcome { session_id: id })
            .await
            .is_err()
        {
            return;
        }

        loop {
            let message = tokio::select! {
                event = outbound.recv() => match event {
                    Some(event) => ServerMessage::Event {
                        channel: event.channel().to_string(),
                        payload: event.payload().clone(),
                    },
                    None => {
                        // Evicted: the registry dropped our queue
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                reply = reply_rx.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
            };

            if send(&mut sink, &message).await.is_err() {
                break;
            }
        }

        debug!(session_id = %id, "Session send task terminated");
    });

    let recv_state = state.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(frame) = stream.next().await {
            let reply = match frame {
                Ok(Message::Text(text)) => handle_text(&recv_state, id, &text).await,
                Ok(Message::Binary(_)) => Some(ServerMessage::Error {
                    message: "Binary frames are not supported".to_string(),
                }),
                Ok(Message::Ping(_) | Message::Pong(_)) => None,
                Ok(Message::Close(_)) => {
                    debug!(session_id = %id, "Client requested close");
                    break;
                }
                Err(e) => {
                    let err = RelayError::SessionTransportError {
                        session_id: id,
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "Session transport failed");
                    break;
                }
            };

            if let Some(reply) = reply {
                if reply_tx.send(reply).await.is_err() {
                    break;
                }
            }
        }

        debug!(session_id = %id, "Session receive task terminated");
    });

    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    registry.mark_closing(id);
    registry.evict(id);
    info!(session_id = %id, "Session closed");
}

async fn send(
    sink: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).map_err(axum::Error::new)?;
    sink.send(Message::Text(text)).await
}

/// Apply one client frame. Returns the reply to send, if any.
pub async fn handle_text(state: &AppState, id: SessionId, text: &str) -> Option<ServerMessage> {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            return Some(ServerMessage::Error {
                message: format!("Invalid message: {e}"),
            });
        }
    };

    let registry = state.node().registry();
    match message {
        ClientMessage::Subscribe { channels } => {
            if let Some(reply) = reject_empty(&channels) {
                return Some(reply);
            }
            for channel in &channels {
                registry.subscribe(id, channel);
            }
            Some(ServerMessage::Subscribed { channels })
        }
        ClientMessage::Unsubscribe { channels } => {
            for channel in &channels {
                registry.unsubscribe(id, channel);
            }
            Some(ServerMessage::Unsubscribed { channels })
        }
        ClientMessage::Publish { channel, payload } => {
            if channel.is_empty() {
                return Some(empty_channel());
            }
            let outcome = state.node().adapter().publish(&channel, payload).await;
            if let Err(e) = &outcome.bus {
                // Local sessions already have it
                debug!(session_id = %id, channel = %channel, error = %e, "Publish stayed local");
            }
            None
        }
        ClientMessage::Ping => Some(ServerMessage::Pong),
    }
}

fn empty_channel() -> ServerMessage {
    ServerMessage::Error {
        message: "Channel name must not be empty".to_string(),
    }
}

fn reject_empty(channels: &[String]) -> Option<ServerMessage> {
    channels
        .iter()
        .any(String::is_empty)
        .then(empty_channel)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use relay_runtime::{ReconnectConfig, Reconnector, RelayConfig, RelayNode};
    use relay_testing::{InMemoryBus, InMemoryStore};
    use serde_json::json;
    use std::sync::Arc;

    fn state() -> AppState {
        let store = Arc::new(Reconnector::new(InMemoryStore::new(), ReconnectConfig::default()));
        AppState::new(Arc::new(RelayNode::new(
            Arc::new(InMemoryBus::new()),
            store,
            RelayConfig::default(),
        )))
    }

    #[test]
    fn test_client_message_parsing() {
        let parsed: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","channels":["room-1"]}"#).unwrap();
        assert_eq!(
            parsed,
            ClientMessage::Subscribe {
                channels: vec!["room-1".to_string()]
            }
        );

        let parsed: ClientMessage = serde_json::from_str(
            r#"{"type":"publish","channel":"room-1","payload":{"text":"hello"}}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            ClientMessage::Publish {
                channel: "room-1".to_string(),
                payload: json!({ "text": "hello" }),
            }
        );
    }

    #[test]
    #[allow(clippy::similar_names)] // ping and pong are standard WebSocket terms
    fn test_server_message_serialization() {
        let event = ServerMessage::Event {
            channel: "room-1".to_string(),
            payload: json!("hello"),
        };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"type":"event","channel":"room-1","payload":"hello"}"#
        );

        let pong = serde_json::to_string(&ServerMessage::Pong).unwrap();
        assert_eq!(pong, r#"{"type":"pong"}"#);
    }

    #[tokio::test]
    async fn test_subscribe_joins_registry_channel() {
        let state = state();
        let session = state.node().registry().admit().unwrap();

        let reply = handle_text(
            &state,
            session.id,
            r#"{"type":"subscribe","channels":["room-1"]}"#,
        )
        .await;

        assert_eq!(
            reply,
            Some(ServerMessage::Subscribed {
                channels: vec!["room-1".to_string()]
            })
        );
        assert_eq!(state.node().registry().members("room-1"), vec![session.id]);
    }

    #[tokio::test]
    async fn test_publish_reaches_local_subscriber_without_bus() {
        let state = state();
        let mut session = state.node().registry().admit().unwrap();
        state.node().registry().subscribe(session.id, "room-1");

        let reply = handle_text(
            &state,
            session.id,
            r#"{"type":"publish","channel":"room-1","payload":"hello"}"#,
        )
        .await;

        assert_eq!(reply, None);
        let event = session.outbound.try_recv().unwrap();
        assert_eq!(event.payload(), &json!("hello"));
    }

    #[tokio::test]
    async fn test_unsubscribe_leaves_channel() {
        let state = state();
        let session = state.node().registry().admit().unwrap();
        state.node().registry().subscribe(session.id, "room-1");

        handle_text(
            &state,
            session.id,
            r#"{"type":"unsubscribe","channels":["room-1"]}"#,
        )
        .await;

        assert!(state.node().registry().members("room-1").is_empty());
        assert_eq!(state.node().registry().channel_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_frame_gets_error_reply() {
        let state = state();
        let session = state.node().registry().admit().unwrap();

        let reply = handle_text(&state, session.id, r#"{"type":"shout"}"#).await;

        assert!(matches!(reply, Some(ServerMessage::Error { .. })));
    }

    #[tokio::test]
    async fn test_empty_channel_is_refused() {
        let state = state();
        let session = state.node().registry().admit().unwrap();

        let reply = handle_text(
            &state,
            session.id,
            r#"{"type":"subscribe","channels":[""]}"#,
        )
        .await;

        assert!(matches!(reply, Some(ServerMessage::Error { .. })));
        assert_eq!(state.node().registry().channel_count(), 0);
    }

    #[tokio::test]
    async fn test_ping_gets_pong() {
        let state = state();
        let session = state.node().registry().admit().unwrap();

        let reply = handle_text(&state, session.id, r#"{"type":"ping"}"#).await;

        assert_eq!(reply, Some(ServerMessage::Pong));
    }
}
