//! Application state for Axum handlers.

use relay_runtime::RelayNode;
use relay_runtime::metrics::MetricsRecorder;
use std::sync::Arc;

/// State shared by every handler.
///
/// Cheap to clone; everything inside is behind an `Arc`.
#[derive(Clone, Debug)]
pub struct AppState {
    node: Arc<RelayNode>,
    metrics: Option<MetricsRecorder>,
}

impl AppState {
    /// State serving `node`.
    #[must_use]
    pub const fn new(node: Arc<RelayNode>) -> Self {
        Self {
            node,
            metrics: None,
        }
    }

    /// Expose `recorder` on `GET /metrics`.
    #[must_use]
    pub fn with_metrics(mut self, recorder: MetricsRecorder) -> Self {
        self.metrics = Some(recorder);
        self
    }

    /// The relay node.
    #[must_use]
    pub const fn node(&self) -> &Arc<RelayNode> {
        &self.node
    }

    /// The metrics recorder, if installed.
    #[must_use]
    pub const fn metrics(&self) -> Option<&MetricsRecorder> {
        self.metrics.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_clone() {
        // Axum requires Clone state
        fn assert_clone<T: Clone + Send + Sync + 'static>() {}
        assert_clone::<AppState>();
    }
}
