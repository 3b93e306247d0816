//! Ingress configuration.
//!
//! Built once at startup and handed to [`IngressPipeline::standard`]. Call
//! [`IngressConfig::validate`] before building the pipeline; a config that
//! fails validation must never serve traffic.
//!
//! [`IngressPipeline::standard`]: crate::ingress::IngressPipeline::standard

use relay_core::ConfigError;
use std::collections::BTreeSet;
use std::time::Duration;

/// Origin value that matches any origin.
pub const WILDCARD_ORIGIN: &str = "*";

/// Session cookie settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Cookie name
    pub cookie_name: String,
    /// Key used to sign new cookies (and tried first when verifying)
    pub primary_key: String,
    /// Previous key, still accepted for verification during rotation
    pub secondary_key: String,
    /// Oldest cookie still accepted
    pub max_age: Duration,
    /// Set the `Secure` attribute on issued cookies
    pub secure: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "session".to_string(),
            primary_key: String::new(),
            secondary_key: String::new(),
            max_age: Duration::from_secs(7 * 24 * 60 * 60),
            secure: true,
        }
    }
}

impl SessionConfig {
    /// Set both signing keys.
    #[must_use]
    pub fn with_keys(mut self, primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        self.primary_key = primary.into();
        self.secondary_key = secondary.into();
        self
    }

    /// Set the maximum cookie age.
    #[must_use]
    pub const fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Toggle the `Secure` cookie attribute.
    #[must_use]
    pub const fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }
}

/// Cross-origin settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorsConfig {
    /// Origins allowed to read responses, compared exactly
    pub allowed_origins: Vec<String>,
    /// Send `Access-Control-Allow-Credentials: true`
    pub allow_credentials: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_credentials: true,
        }
    }
}

impl CorsConfig {
    /// Allow a single origin with credentials.
    #[must_use]
    pub fn for_origin(origin: impl Into<String>) -> Self {
        Self {
            allowed_origins: vec![origin.into()],
            allow_credentials: true,
        }
    }

    /// Toggle credentialed requests.
    #[must_use]
    pub const fn with_credentials(mut self, allow: bool) -> Self {
        self.allow_credentials = allow;
        self
    }

    /// Whether `origin` may read responses.
    #[must_use]
    pub fn allows(&self, origin: &str) -> bool {
        self.allowed_origins
            .iter()
            .any(|allowed| allowed == origin || (!self.allow_credentials && allowed == WILDCARD_ORIGIN))
    }

    fn has_wildcard(&self) -> bool {
        self.allowed_origins.iter().any(|o| o == WILDCARD_ORIGIN)
    }
}

/// What to do with a repeated scalar parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateParams {
    /// Keep the last value and record the rest
    #[default]
    Collapse,
    /// Reject the request with `malformed-params`
    Reject,
}

/// Parameter-pollution handling.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParamPolicy {
    /// Behaviour for repeated keys
    pub duplicates: DuplicateParams,
    /// Keys allowed to repeat (array parameters)
    pub whitelist: BTreeSet<String>,
}

impl ParamPolicy {
    /// Reject duplicates instead of collapsing them.
    #[must_use]
    pub fn rejecting() -> Self {
        Self {
            duplicates: DuplicateParams::Reject,
            whitelist: BTreeSet::new(),
        }
    }

    /// Allow `key` to repeat.
    #[must_use]
    pub fn allow_array(mut self, key: impl Into<String>) -> Self {
        self.whitelist.insert(key.into());
        self
    }
}

/// Everything the ingress stages need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressConfig {
    /// Session-cookie stage
    pub session: SessionConfig,
    /// Cross-origin stage
    pub cors: CorsConfig,
    /// Parameter-pollution stage
    pub params: ParamPolicy,
    /// Largest accepted request body, in bytes
    pub body_limit: usize,
    /// Smallest response body worth compressing, in bytes
    pub compression_threshold: usize,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            cors: CorsConfig::default(),
            params: ParamPolicy::default(),
            body_limit: 50 * 1024 * 1024,
            compression_threshold: 1024,
        }
    }
}

impl IngressConfig {
    /// Set the session settings.
    #[must_use]
    pub fn with_session(mut self, session: SessionConfig) -> Self {
        self.session = session;
        self
    }

    /// Set the cross-origin settings.
    #[must_use]
    pub fn with_cors(mut self, cors: CorsConfig) -> Self {
        self.cors = cors;
        self
    }

    /// Set the parameter policy.
    #[must_use]
    pub fn with_params(mut self, params: ParamPolicy) -> Self {
        self.params = params;
        self
    }

    /// Set the body limit.
    #[must_use]
    pub const fn with_body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    /// Set the compression threshold.
    #[must_use]
    pub const fn with_compression_threshold(mut self, bytes: usize) -> Self {
        self.compression_threshold = bytes;
        self
    }

    /// Check the configuration is usable.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Invalid`] for an empty signing key, a zero max age or
    ///   a zero body limit
    /// - [`ConfigError::WildcardWithCredentials`] when `*` is allowed together
    ///   with credentials
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if self.session.primary_key.is_empty() {
            return Err(invalid("session.primary_key", "must not be empty"));
        }
        if self.session.secondary_key.is_empty() {
            return Err(invalid("session.secondary_key", "must not be empty"));
        }
        if self.session.max_age.is_zero() {
            return Err(invalid("session.max_age", "must be greater than zero"));
        }
        if self.body_limit == 0 {
            return Err(invalid("body_limit", "must be greater than zero"));
        }
        if self.cors.allow_credentials && self.cors.has_wildcard() {
            return Err(ConfigError::WildcardWithCredentials);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> IngressConfig {
        IngressConfig::default()
            .with_session(SessionConfig::default().with_keys("primary", "secondary"))
            .with_cors(CorsConfig::for_origin("https://app.example.com"))
    }

    #[test]
    fn test_valid_config_passes() {
        assert_eq!(valid().validate(), Ok(()));
    }

    #[test]
    fn test_wildcard_with_credentials_is_rejected() {
        let config = valid().with_cors(CorsConfig {
            allowed_origins: vec!["*".to_string()],
            allow_credentials: true,
        });

        assert_eq!(config.validate(), Err(ConfigError::WildcardWithCredentials));
    }

    #[test]
    fn test_wildcard_without_credentials_is_allowed() {
        let cors = CorsConfig::for_origin("*").with_credentials(false);
        let config = valid().with_cors(cors.clone());

        assert_eq!(config.validate(), Ok(()));
        assert!(cors.allows("https://anything.example"));
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let config = valid().with_session(SessionConfig::default().with_keys("primary", ""));

        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key, .. }) if key == "session.secondary_key"
        ));
    }

    #[test]
    fn test_zero_body_limit_is_rejected() {
        assert!(valid().with_body_limit(0).validate().is_err());
    }

    #[test]
    fn test_origin_match_is_exact() {
        let cors = CorsConfig::for_origin("https://app.example.com");

        assert!(cors.allows("https://app.example.com"));
        assert!(!cors.allows("https://app.example.com.evil.test"));
        assert!(!cors.allows("http://app.example.com"));
    }
}
