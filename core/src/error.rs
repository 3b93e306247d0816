//! Error taxonomy.
//!
//! [`RelayError`] is the top-level classification every failure falls into.
//! Each concern also has its own narrower error type, which converts into the
//! matching [`RelayError`] class:
//!
//! | Class                   | Fatal?                                           |
//! |-------------------------|--------------------------------------------------|
//! | `ConfigInvalid`         | Always, before start                             |
//! | `StoreUnavailable`      | At startup; at runtime only durable operations   |
//! | `BusUnavailable`        | Never; publishes fail fast                       |
//! | `IngressRejected`       | Terminal for that one request                    |
//! | `SessionTransportError` | Evicts that one session                          |

use crate::ids::SessionId;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors from the shared publish/subscribe bus.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus is not currently connected.
    #[error("Bus unavailable: {0}")]
    Unavailable(String),

    /// The underlying connection dropped while in use.
    #[error("Bus connection dropped: {0}")]
    Disconnected(String),

    /// A publish was refused or failed for another reason.
    #[error("Publish failed for channel '{channel}': {reason}")]
    PublishFailed {
        /// Channel the publish targeted
        channel: String,
        /// Reason for failure
        reason: String,
    },

    /// The publish did not complete in time.
    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    /// Opening the subscriber failed.
    #[error("Subscription failed for pattern '{pattern}': {reason}")]
    SubscriptionFailed {
        /// Pattern that failed to subscribe
        pattern: String,
        /// Reason for failure
        reason: String,
    },

    /// A message on the bus could not be decoded.
    #[error("Malformed bus envelope: {0}")]
    Malformed(String),
}

impl BusError {
    /// Whether this error means the connection itself is gone.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

/// Errors from the durable store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store is not currently connected.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A store operation exceeded its per-call timeout.
    #[error("Store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The store rejected the operation.
    #[error("Store operation failed: {0}")]
    Operation(String),
}

/// Failure to open a connection to an external resource.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to connect to {resource}: {reason}")]
pub struct ConnectError {
    /// Resource name (`"bus"`, `"store"`)
    pub resource: &'static str,
    /// Reason for failure
    pub reason: String,
}

impl ConnectError {
    /// Create a new connect error.
    #[must_use]
    pub fn new(resource: &'static str, reason: impl Into<String>) -> Self {
        Self {
            resource,
            reason: reason.into(),
        }
    }
}

/// Configuration that cannot be used to start the process.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required key is absent or empty.
    #[error("Missing config key: {0}")]
    Missing(String),

    /// A key is present but its value is unusable.
    #[error("Invalid value for {key}: {reason}")]
    Invalid {
        /// The offending key
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// A wildcard origin was combined with credentialed requests.
    #[error("Wildcard origin cannot be combined with credentials")]
    WildcardWithCredentials,
}

/// Stable reason codes for ingress rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    /// Session cookie failed signature or age validation.
    InvalidSession,
    /// Cross-origin request from an origin not on the allow-list.
    CorsDenied,
    /// Body exceeds the configured maximum.
    PayloadTooLarge,
    /// Query or body parameters are unusable.
    MalformedParams,
}

impl RejectionReason {
    /// The stable, client-visible code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidSession => "invalid-session",
            Self::CorsDenied => "cors-denied",
            Self::PayloadTooLarge => "payload-too-large",
            Self::MalformedParams => "malformed-params",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Top-level error taxonomy.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Configuration rejected before start.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(#[from] ConfigError),

    /// The durable store cannot be reached.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The shared bus cannot be reached.
    #[error("Bus unavailable: {0}")]
    BusUnavailable(String),

    /// A lifecycle step was requested from the wrong phase.
    #[error("Lifecycle violation: {0}")]
    LifecycleViolation(String),

    /// A request was rejected by the ingress pipeline.
    #[error("Request rejected: {reason}")]
    IngressRejected {
        /// Stable rejection reason
        reason: RejectionReason,
    },

    /// One session's transport failed.
    #[error("Transport error on session {session_id}: {reason}")]
    SessionTransportError {
        /// The failed session
        session_id: SessionId,
        /// What went wrong
        reason: String,
    },
}

impl RelayError {
    /// Process exit code when this error ends the process.
    ///
    /// Startup failures exit with `1`.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigInvalid(_)
            | Self::StoreUnavailable(_)
            | Self::BusUnavailable(_)
            | Self::LifecycleViolation(_) => 1,
            Self::IngressRejected { .. } | Self::SessionTransportError { .. } => 0,
        }
    }
}

impl From<StoreError> for RelayError {
    fn from(err: StoreError) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}

impl From<BusError> for RelayError {
    fn from(err: BusError) -> Self {
        Self::BusUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_codes_are_stable() {
        assert_eq!(RejectionReason::InvalidSession.code(), "invalid-session");
        assert_eq!(RejectionReason::CorsDenied.code(), "cors-denied");
        assert_eq!(RejectionReason::PayloadTooLarge.code(), "payload-too-large");
        assert_eq!(RejectionReason::MalformedParams.code(), "malformed-params");
    }

    #[test]
    fn test_startup_failures_exit_with_one() {
        assert_eq!(RelayError::StoreUnavailable("down".into()).exit_code(), 1);
        assert_eq!(RelayError::BusUnavailable("down".into()).exit_code(), 1);
        assert_eq!(RelayError::LifecycleViolation("twice".into()).exit_code(), 1);
        assert_eq!(
            RelayError::from(ConfigError::WildcardWithCredentials).exit_code(),
            1
        );
    }

    #[test]
    fn test_only_disconnected_counts_as_disconnect() {
        assert!(BusError::Disconnected("reset".into()).is_disconnect());
        assert!(!BusError::Timeout(Duration::from_secs(1)).is_disconnect());
        assert!(!BusError::Unavailable("down".into()).is_disconnect());
    }
}
