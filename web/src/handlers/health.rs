//! Health check endpoints.
//!
//! These endpoints are used by load balancers and orchestrators to decide
//! whether to route traffic here.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode};
use relay_runtime::{HealthReport, HealthStatus};

/// Simple health check endpoint (for basic liveness).
///
/// Returns 200 OK whenever the process can answer at all. Does NOT look at
/// the bus or the store.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness with bus, store and session diagnostics.
///
/// # Status Codes
///
/// - 200 OK: Healthy or Degraded
/// - 503 Service Unavailable: Unhealthy
///
/// # Endpoint
///
/// ```text
/// GET /health/ready
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "degraded",
///   "phase": "running",
///   "store": "connected",
///   "bus": "connecting",
///   "sessions": 12
/// }
/// ```
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.node().coordinator().health();

    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(report))
}
