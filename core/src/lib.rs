//! # Relay Core
//!
//! Core vocabulary for the relay real-time delivery substrate.
//!
//! This crate is I/O free. It defines the types every other crate speaks:
//!
//! - **Identifiers**: [`SessionId`] and [`ProcessId`]
//! - **Events**: the immutable [`Event`] that flows from publishers through the bus
//! - **Connections**: [`ConnectionState`] and the [`Connector`] trait implemented by
//!   bus and store adapters
//! - **Bus transport**: [`bus::BusTransport`], with independent publisher and
//!   subscriber handles
//! - **Errors**: the [`RelayError`] taxonomy and the per-concern error enums
//! - **Environment**: the [`Clock`] used for anything time dependent
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   publish    ┌──────────────┐   bus    ┌──────────────┐
//! │  Application │ ───────────> │   Fan-out    │ ───────> │ Other        │
//! │  logic       │              │   Adapter    │ <─────── │ processes    │
//! └──────────────┘              └──────┬───────┘          └──────────────┘
//!                                      │ deliver_local
//!                                      ▼
//!                               ┌──────────────┐
//!                               │  Connection  │
//!                               │  Registry    │
//!                               └──────────────┘
//! ```
//!
//! The runtime crate owns the stateful pieces; the redis and postgres crates
//! implement the transport traits declared here.

pub mod bus;
pub mod connection;
pub mod environment;
pub mod error;
pub mod event;
pub mod ids;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use connection::{BoxFuture, Connection, ConnectionState, Connector};
pub use environment::{Clock, SystemClock};
pub use error::{
    BusError, ConfigError, ConnectError, RejectionReason, RelayError, StoreError,
};
pub use event::Event;
pub use ids::{ProcessId, SessionId};
