//! # Relay Runtime
//!
//! The stateful half of relay: everything that owns a connection, a session
//! or a phase.
//!
//! ## Components
//!
//! - [`reconnect::Reconnector`]: one supervised connection to the bus or the
//!   store, replaced automatically when it drops
//! - [`bus::BusConnector`]: opens the bus publisher and subscriber as a unit
//! - [`registry::ConnectionRegistry`]: live sessions and channel membership
//! - [`fanout::FanoutAdapter`]: local delivery plus cross-process relay
//! - [`lifecycle::LifecycleCoordinator`]: startup ordering and graceful drain
//! - [`node::RelayNode`]: the above, wired together
//!
//! ## Example
//!
//! ```ignore
//! use relay_runtime::{RelayConfig, RelayNode};
//! use std::sync::Arc;
//!
//! let node = RelayNode::new(transport, store, RelayConfig::default());
//! node.start().await?;
//! node.coordinator().mark_running()?;
//!
//! node.adapter().publish("room-1", serde_json::json!({ "text": "hi" })).await;
//!
//! node.coordinator().drain().await;
//! ```

pub mod backoff;
pub mod bus;
pub mod config;
pub mod fanout;
pub mod health;
pub mod lifecycle;
pub mod metrics;
pub mod node;
pub mod reconnect;
pub mod registry;

pub use backoff::BackoffPolicy;
pub use bus::{BusConnector, BusHandle};
pub use config::{FanoutConfig, LifecycleConfig, ReconnectConfig, RegistryConfig, RelayConfig};
pub use fanout::{FanoutAdapter, PublishOutcome};
pub use health::{HealthReport, HealthStatus};
pub use lifecycle::{DrainReport, LifecycleCoordinator, LifecycleError, LifecyclePhase};
pub use node::RelayNode;
pub use reconnect::{ManagedResource, Reconnector};
pub use registry::{Admission, ConnectionRegistry, DeliveryReport, RegistryError, SessionInfo, SessionState};
