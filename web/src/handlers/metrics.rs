//! Prometheus scrape endpoint.

use crate::WebResult;
use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;

/// Render metrics in Prometheus text format.
///
/// # Endpoint
///
/// ```text
/// GET /metrics
/// ```
///
/// Answers 404 when no recorder was installed.
#[allow(clippy::unused_async)] // Axum handler signature requires async
pub async fn render_metrics(State(state): State<AppState>) -> WebResult<String> {
    state
        .metrics()
        .map(relay_runtime::metrics::MetricsRecorder::render)
        .ok_or_else(AppError::not_found)
}
