//! Configuration management for the relay process.
//!
//! Loads configuration from environment variables (and a `.env` file when
//! present) with sensible defaults. Keys without a default are required and
//! reported together before anything starts.

use relay_core::ConfigError;
use relay_runtime::{
    BackoffPolicy, FanoutConfig, LifecycleConfig, ReconnectConfig, RegistryConfig, RelayConfig,
};
use relay_web::{CorsConfig, IngressConfig, SessionConfig};
use std::str::FromStr;
use std::time::Duration;

/// Keys that must be present and non-empty.
const REQUIRED: [&str; 4] = ["REDIS_HOST", "SESSION_KEY_1", "SESSION_KEY_2", "CLIENT_URL"];

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// `PostgreSQL` connection URL
    pub database_url: String,
    /// Redis URL for the shared bus
    pub redis_url: String,
    /// Browser origin allowed to make credentialed requests
    pub client_url: String,
    /// Current session signing key
    pub session_key_1: String,
    /// Previous session signing key, still accepted
    pub session_key_2: String,
    /// `APP_ENV=development` drops the `Secure` cookie attribute
    pub development: bool,
    /// Largest accepted request body in bytes
    pub body_limit: usize,
    /// Session cookie lifetime
    pub session_max_age: Duration,
    /// Deadline for each startup phase
    pub startup_deadline: Duration,
    /// Connection attempts allowed during startup
    pub startup_attempts: u32,
    /// How long draining waits before evicting sessions
    pub drain_grace: Duration,
    /// First reconnect delay
    pub reconnect_initial: Duration,
    /// Reconnect delay cap
    pub reconnect_max: Duration,
    /// Outbound queue depth per session
    pub session_buffer: usize,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first, if one
    /// exists. Variables already set in the environment win.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Missing`] naming every required key that is unset
    /// - [`ConfigError::Invalid`] for a value that does not parse
    pub fn from_env() -> Result<Self, ConfigError> {
        // Missing .env is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        validate(&get)?;

        let required = |key: &str| get(key).unwrap_or_default();
        let secs = |key: &str, default: u64| parse(&get, key, default).map(Duration::from_secs);
        let millis = |key: &str, default: u64| parse(&get, key, default).map(Duration::from_millis);

        Ok(Self {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse(&get, "PORT", 8080)?,
            database_url: get("DATABASE_URL")
                .unwrap_or_else(|| "postgres://localhost:5432/relay".to_string()),
            redis_url: required("REDIS_HOST"),
            client_url: required("CLIENT_URL"),
            session_key_1: required("SESSION_KEY_1"),
            session_key_2: required("SESSION_KEY_2"),
            development: get("APP_ENV").is_some_and(|env| env.eq_ignore_ascii_case("development")),
            body_limit: parse(&get, "BODY_LIMIT_BYTES", 50 * 1024 * 1024)?,
            session_max_age: secs("SESSION_MAX_AGE_SECS", 7 * 24 * 60 * 60)?,
            startup_deadline: secs("STARTUP_DEADLINE_SECS", 30)?,
            startup_attempts: parse(&get, "STARTUP_ATTEMPTS", 5)?,
            drain_grace: secs("DRAIN_GRACE_SECS", 10)?,
            reconnect_initial: millis("RECONNECT_INITIAL_MS", 100)?,
            reconnect_max: millis("RECONNECT_MAX_MS", 10_000)?,
            session_buffer: parse(&get, "SESSION_BUFFER", 256)?,
        })
    }

    /// `host:port` for the listener.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Reconnect settings shared by the store and the bus.
    #[must_use]
    pub fn reconnect(&self) -> ReconnectConfig {
        ReconnectConfig::default()
            .with_backoff(BackoffPolicy::exponential(
                self.reconnect_initial,
                self.reconnect_max,
            ))
            .with_startup_attempts(self.startup_attempts)
    }

    /// Runtime settings for the node.
    #[must_use]
    pub fn relay(&self) -> RelayConfig {
        RelayConfig {
            bus: self.reconnect(),
            registry: RegistryConfig::default().with_session_buffer(self.session_buffer),
            fanout: FanoutConfig::default(),
            lifecycle: LifecycleConfig::default()
                .with_startup_deadline(self.startup_deadline)
                .with_drain_grace(self.drain_grace),
        }
    }

    /// Ingress settings for the HTTP listener.
    #[must_use]
    pub fn ingress(&self) -> IngressConfig {
        IngressConfig::default()
            .with_session(
                SessionConfig::default()
                    .with_keys(&self.session_key_1, &self.session_key_2)
                    .with_max_age(self.session_max_age)
                    .with_secure(!self.development),
            )
            .with_cors(CorsConfig::for_origin(&self.client_url))
            .with_body_limit(self.body_limit)
    }
}

/// Report every required key that is unset or blank.
fn validate(get: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
    let missing: Vec<&str> = REQUIRED.into_iter().filter(|&key| get(key).is_none()).collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::Missing(missing.join(", ")))
    }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            reason: format!("{raw:?}: {e}"),
        }),
    }
}
