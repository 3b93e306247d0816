//! Custom Axum extractors.
//!
//! Read what the ingress pipeline left in request extensions:
//! - `RequestId`: the id echoed in `X-Request-ID`
//! - `ClientSession`: the verified session cookie claims, if any
//! - `Polluted`: parameter values dropped by pollution handling
//!
//! # Examples
//!
//! ```ignore
//! use relay_web::extractors::{ClientSession, RequestId};
//!
//! async fn handler(request_id: RequestId, session: ClientSession) -> String {
//!     format!("{} {:?}", request_id.0, session.0.map(|c| c.sid))
//! }
//! ```

use crate::ingress::{IngressContext, SessionClaims};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Request id assigned by the ingress layer.
///
/// Falls back to a fresh id when the layer is not installed.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for RequestId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .extensions
            .get::<IngressContext>()
            .map_or_else(Uuid::new_v4, IngressContext::request_id);

        Ok(Self(id))
    }
}

/// The client's session, as verified by the session-cookie stage.
#[derive(Debug, Clone)]
pub struct ClientSession(pub Option<SessionClaims>);

#[async_trait]
impl<S> FromRequestParts<S> for ClientSession
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session = parts
            .extensions
            .get::<IngressContext>()
            .and_then(|ctx| ctx.session().cloned());

        Ok(Self(session))
    }
}

/// Parameter values removed by the parameter-pollution stage.
#[derive(Debug, Clone, Default)]
pub struct Polluted(pub BTreeMap<String, Vec<String>>);

#[async_trait]
impl<S> FromRequestParts<S> for Polluted
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let polluted = parts
            .extensions
            .get::<IngressContext>()
            .map(|ctx| ctx.polluted().clone())
            .unwrap_or_default();

        Ok(Self(polluted))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::Request;

    #[tokio::test]
    async fn test_request_id_from_context() {
        let id = Uuid::new_v4();
        let mut req = Request::builder().body(()).expect("Valid request");
        req.extensions_mut().insert(IngressContext::new(id));

        let (mut parts, ()) = req.into_parts();
        let request_id = RequestId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_eq!(request_id.0, id);
    }

    #[tokio::test]
    async fn test_request_id_generates_new() {
        let req = Request::builder().body(()).expect("Valid request");

        let (mut parts, ()) = req.into_parts();
        let request_id = RequestId::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert_ne!(request_id.0, Uuid::nil());
    }

    #[tokio::test]
    async fn test_missing_context_means_no_session() {
        let req = Request::builder().body(()).expect("Valid request");

        let (mut parts, ()) = req.into_parts();
        let session = ClientSession::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");
        let polluted = Polluted::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");

        assert!(session.0.is_none());
        assert!(polluted.0.is_empty());
    }
}
