//! Error types for web handlers.
//!
//! [`AppError`] is the single error every handler and ingress stage answers
//! with. It renders as `{"code": ..., "message": ...}`. Server-side failures
//! are logged with their source and answered with a generic message, so no
//! internal detail reaches the client.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use relay_core::{RejectionReason, RelayError};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A request refused by an ingress stage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}: {message}")]
pub struct IngressRejection {
    /// Stable reason code
    pub reason: RejectionReason,
    /// Client-facing explanation
    pub message: String,
}

impl IngressRejection {
    /// Create a rejection.
    #[must_use]
    pub fn new(reason: RejectionReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    /// HTTP status for this rejection.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self.reason {
            RejectionReason::InvalidSession => StatusCode::UNAUTHORIZED,
            RejectionReason::CorsDenied => StatusCode::FORBIDDEN,
            RejectionReason::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            RejectionReason::MalformedParams => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for IngressRejection {
    fn into_response(self) -> Response {
        AppError::from(self).into_response()
    }
}

/// Application error type for web handlers.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    /// Logged, never sent
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 404 for an unknown route.
    #[must_use]
    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "not-found", "Route not found")
    }

    /// 503 with a specific code.
    #[must_use]
    pub fn unavailable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, code, message)
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "An internal error occurred",
        )
    }

    /// The HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// The client-visible code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            if let Some(source) = &self.source {
                tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    error = %source,
                    "Request failed"
                );
            } else {
                tracing::error!(status = %self.status, code = %self.code, "Request failed");
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };

        (self.status, Json(body)).into_response()
    }
}

impl From<IngressRejection> for AppError {
    fn from(rejection: IngressRejection) -> Self {
        Self::new(rejection.status(), rejection.reason.code(), rejection.message)
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::IngressRejected { reason } => {
                IngressRejection::new(reason, "Request rejected").into()
            }
            RelayError::StoreUnavailable(_) => {
                Self::unavailable("store-unavailable", "Service temporarily unavailable")
                    .with_source(err.into())
            }
            RelayError::BusUnavailable(_) => {
                Self::unavailable("bus-unavailable", "Service temporarily unavailable")
                    .with_source(err.into())
            }
            RelayError::ConfigInvalid(_)
            | RelayError::LifecycleViolation(_)
            | RelayError::SessionTransportError { .. } => {
                Self::internal().with_source(err.into())
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal().with_source(err)
    }
}

/// Fallback handler for unknown routes.
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn not_found() -> AppError {
    AppError::not_found()
}
