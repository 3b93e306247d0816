//! Cross-origin stage.
//!
//! Requests without an `Origin` header pass untouched. A request whose
//! origin is on the allow-list passes and its response gets the
//! `Access-Control-*` headers; a preflight from such an origin is answered
//! here with 200. Any other origin is rejected `cors-denied`.

use super::{IngressContext, IngressStage, StageOutcome};
use crate::config::CorsConfig;
use crate::error::IngressRejection;
use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
};
use relay_core::{BoxFuture, RejectionReason};

/// Methods advertised to preflight requests.
pub const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, OPTIONS";

/// Enforces the origin allow-list.
#[derive(Debug, Clone)]
pub struct CorsStage {
    config: CorsConfig,
}

impl CorsStage {
    /// Create the stage.
    #[must_use]
    pub const fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    fn apply(&self, origin: &HeaderValue, headers: &mut HeaderMap) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        if self.config.allow_credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
    }

    fn preflight(&self, origin: &HeaderValue, request: &Request) -> Response {
        let mut response = StatusCode::OK.into_response();
        let headers = response.headers_mut();
        self.apply(origin, headers);
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOWED_METHODS),
        );
        if let Some(requested) = request.headers().get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
        }
        response
    }
}

fn is_preflight(request: &Request) -> bool {
    request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

impl IngressStage for CorsStage {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn on_request<'a>(
        &'a self,
        request: Request,
        ctx: &'a mut IngressContext,
    ) -> BoxFuture<'a, StageOutcome> {
        let outcome = match request.headers().get(header::ORIGIN).cloned() {
            None => StageOutcome::Continue(request),
            Some(origin) if origin.to_str().is_ok_and(|o| self.config.allows(o)) => {
                if is_preflight(&request) {
                    StageOutcome::Respond(self.preflight(&origin, &request))
                } else {
                    ctx.cors_origin = Some(origin);
                    StageOutcome::Continue(request)
                }
            }
            Some(origin) => {
                tracing::debug!(origin = ?origin, "Origin not allowed");
                StageOutcome::Reject(IngressRejection::new(
                    RejectionReason::CorsDenied,
                    "Origin not allowed",
                ))
            }
        };
        Box::pin(std::future::ready(outcome))
    }

    fn on_response<'a>(
        &'a self,
        ctx: &'a IngressContext,
        mut response: Response,
    ) -> BoxFuture<'a, Response> {
        if let Some(origin) = &ctx.cors_origin {
            self.apply(origin, response.headers_mut());
        }
        Box::pin(std::future::ready(response))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use axum::body::Body;
    use proptest::prelude::*;
    use uuid::Uuid;

    const CLIENT: &str = "https://app.example.com";

    fn stage() -> CorsStage {
        CorsStage::new(CorsConfig::for_origin(CLIENT))
    }

    fn request(method: Method, origin: Option<&str>) -> Request {
        let mut builder = Request::builder().method(method).uri("/");
        if let Some(origin) = origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn run(request: Request) -> (StageOutcome, IngressContext) {
        let mut ctx = IngressContext::new(Uuid::new_v4());
        let outcome = stage().on_request(request, &mut ctx).await;
        (outcome, ctx)
    }

    #[tokio::test]
    async fn test_configured_origin_is_allowed_with_credentials() {
        let (outcome, ctx) = run(request(Method::GET, Some(CLIENT))).await;
        assert!(matches!(outcome, StageOutcome::Continue(_)));

        let response = stage().on_response(&ctx, Response::default()).await;

        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], CLIENT);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(response.headers()[header::VARY], "Origin");
    }

    #[tokio::test]
    async fn test_foreign_origin_is_rejected() {
        let (outcome, _) = run(request(Method::GET, Some("https://evil.example"))).await;

        let StageOutcome::Reject(rejection) = outcome else {
            panic!("expected rejection, got {outcome:?}");
        };
        assert_eq!(rejection.reason, RejectionReason::CorsDenied);
    }

    #[tokio::test]
    async fn test_request_without_origin_passes_without_headers() {
        let (outcome, ctx) = run(request(Method::POST, None)).await;
        assert!(matches!(outcome, StageOutcome::Continue(_)));

        let response = stage().on_response(&ctx, Response::default()).await;

        assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn test_preflight_is_answered_directly() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/")
            .header(header::ORIGIN, CLIENT)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();

        let (outcome, _) = run(request).await;

        let StageOutcome::Respond(response) = outcome else {
            panic!("expected direct response, got {outcome:?}");
        };
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS], ALLOWED_METHODS);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_HEADERS], "content-type");
    }

    #[tokio::test]
    async fn test_preflight_from_foreign_origin_is_rejected() {
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/")
            .header(header::ORIGIN, "https://evil.example")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let (outcome, _) = run(request).await;

        assert!(matches!(outcome, StageOutcome::Reject(_)));
    }

    proptest! {
        #[test]
        fn prop_only_the_configured_origin_passes(host in "[a-z]{1,12}") {
            let origin = format!("https://{host}.example.org");
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();

            let (outcome, _) = rt.block_on(run(request(Method::GET, Some(&origin))));

            prop_assert!(matches!(outcome, StageOutcome::Reject(_)));
        }
    }
}
