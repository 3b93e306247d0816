//! Router assembly.
//!
//! ```text
//! TraceLayer ─> IngressLayer ─> routes
//!                                ├── GET /health        liveness
//!                                ├── GET /health/ready  readiness report
//!                                ├── GET /metrics       Prometheus text
//!                                ├── GET /ws            WebSocket sessions
//!                                ├── application routes
//!                                └── fallback           404 "Route not found"
//! ```

use crate::error::not_found;
use crate::handlers::{health_check, readiness, render_metrics, websocket};
use crate::ingress::{IngressLayer, IngressPipeline};
use crate::state::AppState;
use axum::{Router, extract::DefaultBodyLimit, routing::get};
use tower_http::trace::TraceLayer;

/// Relay routes with no application routes.
#[must_use]
pub fn router(state: AppState, pipeline: IngressPipeline) -> Router {
    router_with(state, pipeline, Router::new())
}

/// Relay routes plus `app`. Application handlers run only after every
/// ingress stage passed, and can read the stage results with the
/// [`crate::extractors`].
#[must_use]
pub fn router_with(state: AppState, pipeline: IngressPipeline, app: Router<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness))
        .route("/metrics", get(render_metrics))
        .route("/ws", get(websocket::upgrade))
        .merge(app)
        .fallback(not_found)
        // The payload-size stage bounds bodies
        .layer(DefaultBodyLimit::disable())
        .layer(IngressLayer::new(pipeline))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
