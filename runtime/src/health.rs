//! Readiness reporting.
//!
//! A [`HealthReport`] folds the lifecycle phase and both resource states into
//! a single [`HealthStatus`]:
//!
//! | Phase       | Store / bus      | Status      |
//! |-------------|------------------|-------------|
//! | `Running`   | both connected   | `Healthy`   |
//! | `Running`   | either not       | `Degraded`  |
//! | any other   | any              | `Unhealthy` |
//!
//! A running process with a lost resource still serves traffic (local
//! delivery keeps working), so it reports degraded rather than unhealthy.

use crate::lifecycle::LifecyclePhase;
use relay_core::ConnectionState;
use serde::{Deserialize, Serialize};

/// Health status of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Fully operational
    Healthy,

    /// Serving, but a resource is reconnecting
    Degraded,

    /// Not serving
    Unhealthy,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (can accept traffic)
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }

    /// Get the worst status between two statuses
    #[must_use]
    pub const fn worst(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unhealthy, _) | (_, Self::Unhealthy) => Self::Unhealthy,
            (Self::Degraded, _) | (_, Self::Degraded) => Self::Degraded,
            _ => Self::Healthy,
        }
    }
}

/// Point-in-time readiness report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Overall status
    pub status: HealthStatus,
    /// Lifecycle phase
    pub phase: LifecyclePhase,
    /// Store connection state
    pub store: ConnectionState,
    /// Bus connection state
    pub bus: ConnectionState,
    /// Live sessions on this process
    pub sessions: usize,
}

impl HealthReport {
    /// Evaluate a report from its inputs.
    #[must_use]
    pub const fn evaluate(
        phase: LifecyclePhase,
        store: ConnectionState,
        bus: ConnectionState,
        sessions: usize,
    ) -> Self {
        let status = if !matches!(phase, LifecyclePhase::Running) {
            HealthStatus::Unhealthy
        } else if store.is_connected() && bus.is_connected() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        Self {
            status,
            phase,
            store,
            bus,
            sessions,
        }
    }
}
