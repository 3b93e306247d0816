//! The event type carried from publishers to subscribers.
//!
//! An [`Event`] is immutable once constructed: fields are private and only
//! readable through getters. The same value is delivered to local sessions and
//! encoded onto the bus for every other process.
//!
//! # Wire Format
//!
//! On the bus an event travels as its JSON encoding:
//!
//! ```json
//! {
//!   "id": "8f1c...",
//!   "channel": "room-1",
//!   "origin": "2b7e...",
//!   "payload": { "text": "hello" },
//!   "published_at": "2025-01-01T00:00:00Z"
//! }
//! ```

use crate::error::BusError;
use crate::ids::ProcessId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An opaque payload addressed to a channel, stamped with its origin process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: Uuid,
    channel: String,
    origin: ProcessId,
    payload: serde_json::Value,
    published_at: DateTime<Utc>,
}

impl Event {
    /// Create a new event originating from `origin`.
    #[must_use]
    pub fn new(origin: ProcessId, channel: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            origin,
            payload,
            published_at: Utc::now(),
        }
    }

    /// Unique id of this event.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Target channel name.
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Process that published the event.
    #[must_use]
    pub const fn origin(&self) -> ProcessId {
        self.origin
    }

    /// The opaque payload.
    #[must_use]
    pub const fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// When the event was constructed.
    #[must_use]
    pub const fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }

    /// Encode the event for the bus.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Malformed`] if the payload cannot be serialized.
    pub fn encode(&self) -> Result<Vec<u8>, BusError> {
        serde_json::to_vec(self).map_err(|e| BusError::Malformed(e.to_string()))
    }

    /// Decode an event received from the bus.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Malformed`] if the bytes are not a valid envelope.
    pub fn decode(bytes: &[u8]) -> Result<Self, BusError> {
        serde_json::from_slice(bytes).map_err(|e| BusError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_rejects_garbage() {
        let err = Event::decode(b"not json").err();
        assert!(matches!(err, Some(BusError::Malformed(_))));
    }

    #[test]
    fn test_envelope_keeps_origin_and_channel() {
        let origin = ProcessId::new();
        let event = Event::new(origin, "room-1", json!({ "text": "hello" }));

        let bytes = event.encode().unwrap_or_default();
        let decoded = Event::decode(&bytes).ok();

        assert_eq!(decoded.as_ref().map(Event::origin), Some(origin));
        assert_eq!(decoded.as_ref().map(Event::channel), Some("room-1"));
        assert_eq!(decoded, Some(event));
    }
}
