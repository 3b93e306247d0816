//! HTTP request handlers.

pub mod health;
pub mod metrics;
pub mod websocket;

// Re-export common handler utilities
pub use health::{health_check, readiness};
pub use metrics::render_metrics;
