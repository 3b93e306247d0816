//! Runtime configuration.
//!
//! Every struct has a production-ready [`Default`] and `with_*` builders, so
//! callers only spell out what differs.

use crate::backoff::BackoffPolicy;
use std::time::Duration;

/// Settings for a reconnector.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay schedule between failed attempts.
    pub backoff: BackoffPolicy,
    /// Attempts allowed during startup before giving up.
    pub startup_attempts: u32,
    /// Per-call timeout for durable operations.
    pub operation_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::default(),
            startup_attempts: 5,
            operation_timeout: Duration::from_secs(5),
        }
    }
}

impl ReconnectConfig {
    /// Set the backoff policy.
    #[must_use]
    pub const fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the startup attempt budget (at least one attempt is always made).
    #[must_use]
    pub const fn with_startup_attempts(mut self, attempts: u32) -> Self {
        self.startup_attempts = attempts;
        self
    }

    /// Set the durable operation timeout.
    #[must_use]
    pub const fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }
}

/// Settings for the connection registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Outbound queue depth per session. A full queue drops events for that
    /// session only.
    pub session_buffer: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            session_buffer: 256,
        }
    }
}

impl RegistryConfig {
    /// Set the per-session outbound queue depth.
    #[must_use]
    pub const fn with_session_buffer(mut self, session_buffer: usize) -> Self {
        self.session_buffer = session_buffer;
        self
    }
}

/// Settings for the fan-out adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanoutConfig {
    /// Prefix for every bus channel this deployment uses.
    pub namespace: String,
    /// How long a bus publish may take before it is reported as failed.
    pub publish_timeout: Duration,
    /// Queue depth between the bus subscriber and local delivery.
    pub inbound_buffer: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            namespace: "relay".to_string(),
            publish_timeout: Duration::from_secs(2),
            inbound_buffer: 1024,
        }
    }
}

impl FanoutConfig {
    /// Set the bus namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the bus publish timeout.
    #[must_use]
    pub const fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }
}

/// Settings for the lifecycle coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Overall deadline for each of the store and bus startup phases.
    pub startup_deadline: Duration,
    /// How long draining waits for sessions to leave on their own.
    pub drain_grace: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            startup_deadline: Duration::from_secs(30),
            drain_grace: Duration::from_secs(10),
        }
    }
}

impl LifecycleConfig {
    /// Set the startup deadline.
    #[must_use]
    pub const fn with_startup_deadline(mut self, deadline: Duration) -> Self {
        self.startup_deadline = deadline;
        self
    }

    /// Set the drain grace period.
    #[must_use]
    pub const fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }
}

/// Everything a [`RelayNode`](crate::node::RelayNode) needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayConfig {
    /// Bus reconnect settings.
    pub bus: ReconnectConfig,
    /// Registry settings.
    pub registry: RegistryConfig,
    /// Fan-out settings.
    pub fanout: FanoutConfig,
    /// Lifecycle settings.
    pub lifecycle: LifecycleConfig,
}
