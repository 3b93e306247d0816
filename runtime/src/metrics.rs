//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for every relay component:
//! - Fan-out publishes and bus relays
//! - Connection registry sessions and dropped deliveries
//! - Reconnect attempts per resource
//! - Ingress rejections per reason
//!
//! # Example
//!
//! ```rust,no_run
//! use relay_runtime::metrics::MetricsRecorder;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let recorder = MetricsRecorder::install()?;
//!
//! // Serve this from GET /metrics
//! let text = recorder.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, gauge};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Installed Prometheus recorder.
#[derive(Clone)]
pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    /// Describe all relay metrics and install the global recorder.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Install`] if a recorder is already installed.
    pub fn install() -> Result<Self, MetricsError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        register_metrics();
        tracing::info!("Metrics recorder installed");

        Ok(Self { handle })
    }

    /// Render current metrics in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl std::fmt::Debug for MetricsRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRecorder").finish_non_exhaustive()
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Fan-out
    describe_counter!(
        "relay_events_published_total",
        "Total number of events published by this process"
    );
    describe_counter!(
        "relay_events_relayed_total",
        "Total number of events received from the bus for local delivery"
    );
    describe_counter!(
        "relay_bus_publish_errors_total",
        "Total number of bus publishes that failed"
    );

    // Registry
    describe_counter!(
        "relay_deliveries_dropped_total",
        "Total number of deliveries dropped because a session queue was full"
    );
    describe_gauge!("relay_sessions_active", "Number of admitted sessions");

    // Reconnectors
    describe_counter!(
        "relay_reconnect_attempts_total",
        "Total number of reconnect attempts, labelled by resource"
    );

    // Ingress
    describe_counter!(
        "relay_ingress_rejections_total",
        "Total number of requests rejected by ingress, labelled by reason"
    );
}

/// Fan-out metrics recorder.
pub struct FanoutMetrics;

impl FanoutMetrics {
    /// Record a locally originated publish.
    pub fn record_published() {
        counter!("relay_events_published_total").increment(1);
    }

    /// Record an event received from the bus.
    pub fn record_relayed() {
        counter!("relay_events_relayed_total").increment(1);
    }

    /// Record a failed bus publish.
    pub fn record_publish_error() {
        counter!("relay_bus_publish_errors_total").increment(1);
    }
}

/// Registry metrics recorder.
pub struct RegistryMetrics;

impl RegistryMetrics {
    /// Record deliveries dropped on full session queues.
    pub fn record_dropped(count: usize) {
        if count > 0 {
            counter!("relay_deliveries_dropped_total").increment(count as u64);
        }
    }

    /// Record the current session count.
    #[allow(clippy::cast_precision_loss)] // Session counts fit comfortably in f64
    pub fn record_active(count: usize) {
        gauge!("relay_sessions_active").set(count as f64);
    }
}

/// Reconnect metrics recorder.
pub struct ReconnectMetrics;

impl ReconnectMetrics {
    /// Record one reconnect attempt for a resource.
    pub fn record_attempt(resource: &'static str) {
        counter!("relay_reconnect_attempts_total", "resource" => resource).increment(1);
    }
}

/// Ingress metrics recorder.
pub struct IngressMetrics;

impl IngressMetrics {
    /// Record a rejected request.
    pub fn record_rejection(reason: &'static str) {
        counter!("relay_ingress_rejections_total", "reason" => reason).increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    /// Run `record` against a private recorder and return the rendered text.
    fn rendered(record: impl FnOnce()) -> String {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, record);
        handle.render()
    }

    #[test]
    fn test_rejections_are_labelled_by_reason() {
        let text = rendered(|| {
            IngressMetrics::record_rejection("cors-denied");
            IngressMetrics::record_rejection("cors-denied");
            IngressMetrics::record_rejection("payload-too-large");
        });

        assert!(text.contains(r#"relay_ingress_rejections_total{reason="cors-denied"} 2"#));
        assert!(text.contains(r#"relay_ingress_rejections_total{reason="payload-too-large"} 1"#));
    }

    #[test]
    fn test_registry_metrics() {
        let text = rendered(|| {
            RegistryMetrics::record_dropped(0);
            RegistryMetrics::record_dropped(3);
            RegistryMetrics::record_active(4);
        });

        assert!(text.contains("relay_deliveries_dropped_total 3"));
        assert!(text.contains("relay_sessions_active 4"));
    }

    #[test]
    fn test_reconnect_attempts_per_resource() {
        let text = rendered(|| {
            ReconnectMetrics::record_attempt("bus");
            ReconnectMetrics::record_attempt("store");
            ReconnectMetrics::record_attempt("bus");
        });

        assert!(text.contains(r#"relay_reconnect_attempts_total{resource="bus"} 2"#));
        assert!(text.contains(r#"relay_reconnect_attempts_total{resource="store"} 1"#));
    }
}
