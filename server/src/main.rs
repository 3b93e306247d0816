//! Relay server.
//!
//! One process of the real-time fan-out backbone: connects the store and the
//! bus, then serves WebSocket sessions and HTTP behind the ingress pipeline.
//!
//! # Lifecycle
//!
//! ```text
//! config ─> store ─> bus ─> bind ─> running ─(SIGINT/SIGTERM)─> drain ─> exit 0
//!   │         │       │      │
//!   └─────────┴───────┴──────┴──> exit 1
//! ```
//!
//! # Environment
//!
//! Required: `REDIS_HOST`, `SESSION_KEY_1`, `SESSION_KEY_2`, `CLIENT_URL`.
//! See [`config::Config`] for the optional keys and their defaults.

mod config;

use anyhow::Context;
use config::Config;
use relay_core::{RelayError, SystemClock};
use relay_postgres::{PostgresConfig, PostgresConnector};
use relay_redis::RedisBusTransport;
use relay_runtime::metrics::MetricsRecorder;
use relay_runtime::{Reconnector, RelayNode};
use relay_web::{AppState, IngressPipeline, router};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting relay server");

    match run().await {
        Ok(()) => {
            info!("Server shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = ?e, "Server failed");
            let code = e.downcast_ref::<RelayError>().map_or(1, RelayError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env().map_err(RelayError::from)?;
    info!(addr = %config.addr(), development = config.development, "Configuration loaded");

    // Validate ingress before touching the network
    let pipeline = IngressPipeline::standard(&config.ingress(), Arc::new(SystemClock))
        .map_err(RelayError::from)?;

    let metrics = MetricsRecorder::install().context("Failed to install metrics recorder")?;

    let transport = RedisBusTransport::new(&config.redis_url).map_err(RelayError::from)?;
    let store = Reconnector::new(
        PostgresConnector::new(PostgresConfig::new(&config.database_url)),
        config.reconnect(),
    );
    let node = Arc::new(RelayNode::new(
        Arc::new(transport),
        Arc::new(store),
        config.relay(),
    ));

    node.start().await?;

    let listener = match tokio::net::TcpListener::bind(config.addr()).await {
        Ok(listener) => listener,
        Err(e) => {
            node.coordinator().drain().await;
            return Err(e).with_context(|| format!("Failed to bind {}", config.addr()));
        }
    };
    info!(addr = %config.addr(), "Listening");
    node.coordinator().mark_running()?;

    let app = router(AppState::new(Arc::clone(&node)).with_metrics(metrics), pipeline);
    let shutdown_node = Arc::clone(&node);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Evicted sessions close their sockets so serve can return
            let report = shutdown_node.coordinator().drain().await;
            info!(departed = report.departed, evicted = report.evicted, "Drain complete");
        })
        .await;

    // No-op after a signalled drain
    node.coordinator().drain().await;
    served.context("Server error")
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, draining...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, draining...");
        },
    }
}
