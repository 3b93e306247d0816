//! `PostgreSQL` store connector for relay.
//!
//! Each connection is a [`PgPool`] for durable operations plus one dedicated
//! [`PgListener`] connection that `LISTEN`s on [`LIVENESS_CHANNEL`]. The pool
//! hides individual connection failures; the listener does not, which makes
//! it the disconnect signal for the whole store:
//!
//! ```text
//!  PostgresConnector::connect
//!        │
//!        ├── PgPoolOptions::connect ──────────> PostgresStore (handle)
//!        │
//!        └── PgListener LISTEN relay_liveness ─> closed future
//!                 try_recv() == Ok(None) / Err ─> connection lost
//! ```
//!
//! # Example
//!
//! ```ignore
//! use relay_postgres::{PostgresConfig, PostgresConnector};
//! use relay_runtime::{ReconnectConfig, Reconnector};
//!
//! let store = Reconnector::new(
//!     PostgresConnector::new(PostgresConfig::new("postgres://localhost/relay")),
//!     ReconnectConfig::default(),
//! );
//! store.connect_with_budget().await?;
//! store.durable(|pg| async move { pg.ping().await }).await?;
//! ```

use relay_core::{BoxFuture, ConnectError, Connection, Connector, StoreError};
use sqlx::postgres::{PgListener, PgPool, PgPoolOptions};
use std::time::Duration;

/// Channel the liveness connection listens on.
pub const LIVENESS_CHANNEL: &str = "relay_liveness";

/// Resource name used for logs, metrics and health output.
pub const STORE_RESOURCE: &str = "store";

/// Connection settings for the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    /// Connection string.
    pub database_url: String,
    /// Pool size.
    pub max_connections: u32,
    /// How long to wait for a pooled connection.
    pub acquire_timeout: Duration,
}

impl PostgresConfig {
    /// Settings for `database_url` with default pool sizing.
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }

    /// Set the pool size.
    #[must_use]
    pub const fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Set the pool acquire timeout.
    #[must_use]
    pub const fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Live handle to the store.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Round-trip `SELECT 1`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Operation`] if the query fails.
    pub async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Operation(format!("Ping failed: {e}")))?;
        Ok(())
    }
}

/// Opens store connections.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    config: PostgresConfig,
}

impl PostgresConnector {
    /// Create a connector. Nothing connects until [`Connector::connect`].
    #[must_use]
    pub const fn new(config: PostgresConfig) -> Self {
        Self { config }
    }
}

impl Connector for PostgresConnector {
    type Handle = PostgresStore;

    fn resource(&self) -> &'static str {
        STORE_RESOURCE
    }

    fn connect(&self) -> BoxFuture<'_, Result<Connection<PostgresStore>, ConnectError>> {
        Box::pin(async move {
            let pool = PgPoolOptions::new()
                .max_connections(self.config.max_connections)
                .acquire_timeout(self.config.acquire_timeout)
                .connect(&self.config.database_url)
                .await
                .map_err(|e| ConnectError::new(STORE_RESOURCE, format!("Failed to connect: {e}")))?;

            let mut listener = match PgListener::connect_with(&pool).await {
                Ok(listener) => listener,
                Err(e) => {
                    pool.close().await;
                    return Err(ConnectError::new(
                        STORE_RESOURCE,
                        format!("Failed to open liveness connection: {e}"),
                    ));
                }
            };
            if let Err(e) = listener.listen(LIVENESS_CHANNEL).await {
                pool.close().await;
                return Err(ConnectError::new(
                    STORE_RESOURCE,
                    format!("Failed to LISTEN on {LIVENESS_CHANNEL}: {e}"),
                ));
            }

            tracing::debug!(channel = LIVENESS_CHANNEL, "Store liveness connection open");

            let closing_pool = pool.clone();
            let closed = async move {
                loop {
                    match listener.try_recv().await {
                        Ok(Some(notification)) => {
                            tracing::trace!(payload = notification.payload(), "Liveness notification");
                        }
                        Ok(None) => {
                            tracing::warn!("Store liveness connection lost");
                            break;
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Store liveness connection failed");
                            break;
                        }
                    }
                }
                closing_pool.close().await;
            };

            Ok(Connection::new(PostgresStore { pool }, closed))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builders() {
        let config = PostgresConfig::new("postgres://localhost/relay")
            .with_max_connections(3)
            .with_acquire_timeout(Duration::from_secs(1));

        assert_eq!(config.max_connections, 3);
        assert_eq!(config.acquire_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_unreachable_database_is_a_connect_error() {
        let connector = PostgresConnector::new(
            PostgresConfig::new("postgres://relay@127.0.0.1:1/relay")
                .with_acquire_timeout(Duration::from_millis(200)),
        );

        let err = connector.connect().await.err();

        assert_eq!(err.map(|e| e.resource), Some(STORE_RESOURCE));
    }
}
