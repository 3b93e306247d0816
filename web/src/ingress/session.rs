//! Session-cookie stage.
//!
//! The cookie holds an HS256 token with claims `{sid, iat, exp}`. Two keys
//! are configured so the signing key can be rotated without logging anyone
//! out:
//!
//! | Cookie signed with | Outcome                                   |
//! |--------------------|-------------------------------------------|
//! | (no cookie)        | new session issued via `Set-Cookie`       |
//! | primary key        | accepted                                  |
//! | secondary key      | accepted, re-issued under the primary key |
//! | neither            | rejected `invalid-session`                |
//! | either, too old    | rejected `invalid-session`                |
//!
//! A rejected cookie is left in place, so the client can tell a bad session
//! from a missing one.

use super::{IngressContext, IngressStage, StageOutcome};
use crate::config::SessionConfig;
use crate::error::{AppError, IngressRejection};
use axum::{
    extract::Request,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use relay_core::{BoxFuture, Clock, RejectionReason};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Claims carried by the session cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Session id
    pub sid: Uuid,
    /// Issued at, unix seconds
    pub iat: i64,
    /// Expires at, unix seconds
    pub exp: i64,
}

/// Which key verified a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningKey {
    /// The current key
    Primary,
    /// The previous key
    Secondary,
}

/// Verifies and issues session cookies.
pub struct SessionStage {
    config: SessionConfig,
    encoding: EncodingKey,
    primary: DecodingKey,
    secondary: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl SessionStage {
    /// Create the stage. Ages are measured with `clock`.
    #[must_use]
    pub fn new(config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Age is checked against the injected clock instead
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        Self {
            encoding: EncodingKey::from_secret(config.primary_key.as_bytes()),
            primary: DecodingKey::from_secret(config.primary_key.as_bytes()),
            secondary: DecodingKey::from_secret(config.secondary_key.as_bytes()),
            validation,
            clock,
            config,
        }
    }

    fn max_age_secs(&self) -> i64 {
        i64::try_from(self.config.max_age.as_secs()).unwrap_or(i64::MAX)
    }

    /// Claims for a brand new session.
    #[must_use]
    pub fn fresh_claims(&self) -> SessionClaims {
        let now = self.clock.now().timestamp();
        SessionClaims {
            sid: Uuid::new_v4(),
            iat: now,
            exp: now.saturating_add(self.max_age_secs()),
        }
    }

    /// Sign `claims` with the primary key.
    ///
    /// # Errors
    ///
    /// Returns the `jsonwebtoken` error if encoding fails.
    pub fn sign(&self, claims: &SessionClaims) -> Result<String, jsonwebtoken::errors::Error> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
    }

    /// Check a token's signature and age.
    ///
    /// # Errors
    ///
    /// Returns an `invalid-session` rejection if neither key verifies the
    /// token or it is older than the configured max age.
    pub fn verify(&self, token: &str) -> Result<(SessionClaims, SigningKey), IngressRejection> {
        let (claims, key) =
            match jsonwebtoken::decode::<SessionClaims>(token, &self.primary, &self.validation) {
                Ok(data) => (data.claims, SigningKey::Primary),
                Err(_) => {
                    let data = jsonwebtoken::decode::<SessionClaims>(
                        token,
                        &self.secondary,
                        &self.validation,
                    )
                    .map_err(|_| {
                        IngressRejection::new(
                            RejectionReason::InvalidSession,
                            "Session signature invalid",
                        )
                    })?;
                    (data.claims, SigningKey::Secondary)
                }
            };

        let now = self.clock.now().timestamp();
        if claims.exp <= now || now.saturating_sub(claims.iat) > self.max_age_secs() {
            return Err(IngressRejection::new(
                RejectionReason::InvalidSession,
                "Session expired",
            ));
        }
        Ok((claims, key))
    }

    fn set_cookie(&self, token: &str, claims: &SessionClaims) -> Option<HeaderValue> {
        let remaining = claims.exp.saturating_sub(self.clock.now().timestamp()).max(0);
        let secure = if self.config.secure { "; Secure" } else { "" };
        HeaderValue::from_str(&format!(
            "{}={token}; Max-Age={remaining}; Path=/; HttpOnly; SameSite=Lax{secure}",
            self.config.cookie_name
        ))
        .ok()
    }

    /// Sign `claims` and stage the cookie for the response.
    fn issue(&self, claims: &SessionClaims, ctx: &mut IngressContext) -> Result<(), AppError> {
        let token = self
            .sign(claims)
            .map_err(|e| AppError::internal().with_source(e.into()))?;
        ctx.issued_cookie = self.set_cookie(&token, claims);
        Ok(())
    }
}

impl std::fmt::Debug for SessionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStage")
            .field("cookie_name", &self.config.cookie_name)
            .field("max_age", &self.config.max_age)
            .finish_non_exhaustive()
    }
}

impl IngressStage for SessionStage {
    fn name(&self) -> &'static str {
        "session"
    }

    fn on_request<'a>(
        &'a self,
        request: Request,
        ctx: &'a mut IngressContext,
    ) -> BoxFuture<'a, StageOutcome> {
        Box::pin(async move {
            let jar = CookieJar::from_headers(request.headers());
            let token = jar
                .get(&self.config.cookie_name)
                .map(|cookie| cookie.value().to_string());

            let claims = match token {
                None => {
                    let claims = self.fresh_claims();
                    if let Err(e) = self.issue(&claims, ctx) {
                        return StageOutcome::Respond(e.into_response());
                    }
                    tracing::debug!(session = %claims.sid, "Issued new session");
                    claims
                }
                Some(token) => match self.verify(&token) {
                    Ok((claims, SigningKey::Primary)) => claims,
                    Ok((claims, SigningKey::Secondary)) => {
                        if let Err(e) = self.issue(&claims, ctx) {
                            return StageOutcome::Respond(e.into_response());
                        }
                        tracing::debug!(session = %claims.sid, "Re-issued session under primary key");
                        claims
                    }
                    Err(rejection) => return StageOutcome::Reject(rejection),
                },
            };

            ctx.session = Some(claims);
            StageOutcome::Continue(request)
        })
    }

    fn on_response<'a>(
        &'a self,
        ctx: &'a IngressContext,
        mut response: Response,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if let Some(cookie) = &ctx.issued_cookie {
                response.headers_mut().append(header::SET_COOKIE, cookie.clone());
            }
            response
        })
    }
}
