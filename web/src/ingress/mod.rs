//! Ingress pipeline: ordered request-gating stages.
//!
//! Every request passes through the stages in order before it reaches the
//! application router. A stage may pass the request on (possibly rewritten),
//! answer it directly, or reject it. Responses then travel back through the
//! stages that let the request through, in reverse order.
//!
//! ```text
//!  request ──> session ──> params ──> headers ──> cors ──> body_limit ──> compression ──> router
//!                │           │                     │          │
//!                └─ reject ──┴──── reject ─────────┴─ reject ─┘ ──> structured rejection
//!
//!  response <── session <── params <── headers <── cors <── body_limit <── compression <── router
//!             Set-Cookie              helmet      Allow-Origin                 gzip
//! ```
//!
//! # Flow
//!
//! 1. **Assign** a request id and open the `http_request` span
//! 2. **Run** `on_request` for each stage until one answers or rejects
//! 3. **Store** the [`IngressContext`] in request extensions for handlers
//! 4. **Run** `on_response` for every stage that passed, innermost first,
//!    plus any stage that [wraps every response](IngressStage::wraps_every_response)
//! 5. **Echo** the request id in `X-Request-ID`

pub mod body_limit;
pub mod compression;
pub mod cors;
pub mod headers;
pub mod params;
pub mod session;

use crate::config::IngressConfig;
use crate::error::{AppError, IngressRejection};
use axum::{
    extract::Request,
    http::HeaderValue,
    response::{IntoResponse, Response},
};
use relay_core::{BoxFuture, Clock};
use relay_runtime::metrics::IngressMetrics;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::Instrument;
use uuid::Uuid;

pub use body_limit::BodyLimitStage;
pub use compression::CompressionStage;
pub use cors::CorsStage;
pub use headers::HeaderStage;
pub use params::ParamStage;
pub use session::{SessionClaims, SessionStage};

/// Header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// What a stage decided about a request.
pub enum StageOutcome {
    /// Pass the (possibly rewritten) request to the next stage.
    Continue(Request),
    /// Answer without running later stages or the router.
    Respond(Response),
    /// Refuse the request.
    Reject(IngressRejection),
}

impl std::fmt::Debug for StageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Continue(_) => f.write_str("Continue"),
            Self::Respond(response) => write!(f, "Respond({})", response.status()),
            Self::Reject(rejection) => write!(f, "Reject({rejection})"),
        }
    }
}

/// One gating step.
pub trait IngressStage: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Inspect or rewrite an incoming request.
    fn on_request<'a>(
        &'a self,
        request: Request,
        ctx: &'a mut IngressContext,
    ) -> BoxFuture<'a, StageOutcome>;

    /// Adjust the outgoing response. Runs only if `on_request` continued,
    /// unless [`IngressStage::wraps_every_response`] says otherwise.
    fn on_response<'a>(
        &'a self,
        _ctx: &'a IngressContext,
        response: Response,
    ) -> BoxFuture<'a, Response> {
        Box::pin(std::future::ready(response))
    }

    /// Run `on_response` even when an earlier stage answered or rejected.
    fn wraps_every_response(&self) -> bool {
        false
    }
}

/// Per-request state accumulated by the stages.
///
/// Handlers read it from request extensions (see [`crate::extractors`]).
#[derive(Debug, Clone)]
pub struct IngressContext {
    request_id: Uuid,
    session: Option<SessionClaims>,
    polluted: BTreeMap<String, Vec<String>>,
    issued_cookie: Option<HeaderValue>,
    cors_origin: Option<HeaderValue>,
    accepts_gzip: bool,
}

impl IngressContext {
    /// Fresh context for one request.
    #[must_use]
    pub const fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            session: None,
            polluted: BTreeMap::new(),
            issued_cookie: None,
            cors_origin: None,
            accepts_gzip: false,
        }
    }

    /// The request id.
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// The verified (or newly issued) client session.
    #[must_use]
    pub const fn session(&self) -> Option<&SessionClaims> {
        self.session.as_ref()
    }

    /// Values dropped by parameter-pollution handling, by key.
    #[must_use]
    pub const fn polluted(&self) -> &BTreeMap<String, Vec<String>> {
        &self.polluted
    }
}

/// An ordered list of stages.
#[derive(Clone, Default)]
pub struct IngressPipeline {
    stages: Vec<Arc<dyn IngressStage>>,
}

impl IngressPipeline {
    /// An empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage.
    #[must_use]
    pub fn stage(mut self, stage: impl IngressStage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// The six standard stages, in order.
    ///
    /// # Errors
    ///
    /// Returns [`relay_core::ConfigError`] if `config` fails validation.
    pub fn standard(
        config: &IngressConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, relay_core::ConfigError> {
        config.validate()?;

        Ok(Self::new()
            .stage(SessionStage::new(config.session.clone(), clock))
            .stage(ParamStage::new(config.params.clone(), config.body_limit))
            .stage(HeaderStage)
            .stage(CorsStage::new(config.cors.clone()))
            .stage(BodyLimitStage::new(config.body_limit))
            .stage(CompressionStage::new(config.compression_threshold)))
    }

    /// Stage names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl std::fmt::Debug for IngressPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngressPipeline")
            .field("stages", &self.names())
            .finish()
    }
}

/// Layer applying an [`IngressPipeline`] to a service.
///
/// ```ignore
/// let app = Router::new()
///     .route("/ws", get(websocket::upgrade))
///     .layer(IngressLayer::new(pipeline));
/// ```
#[derive(Clone, Debug)]
pub struct IngressLayer {
    pipeline: Arc<IngressPipeline>,
}

impl IngressLayer {
    /// Wrap `pipeline`.
    #[must_use]
    pub fn new(pipeline: IngressPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

impl<S> Layer<S> for IngressLayer {
    type Service = IngressService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        IngressService {
            inner,
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

/// Middleware service running the pipeline.
#[derive(Clone, Debug)]
pub struct IngressService<S> {
    inner: S,
    pipeline: Arc<IngressPipeline>,
}

impl<S> Service<Request> for IngressService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        // The clone is not ready; keep the one that was polled
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let pipeline = Arc::clone(&self.pipeline);

        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4);

        let span = tracing::info_span!(
            "http_request",
            request_id = %request_id,
            method = %request.method(),
            uri = %request.uri(),
        );

        Box::pin(
            async move {
                let mut response = run(&pipeline, inner, request, request_id).await?;

                if let Ok(value) = HeaderValue::from_str(&request_id.to_string()) {
                    response.headers_mut().insert(REQUEST_ID_HEADER, value);
                }
                Ok(response)
            }
            .instrument(span),
        )
    }
}

async fn run<S>(
    pipeline: &IngressPipeline,
    mut inner: S,
    request: Request,
    request_id: Uuid,
) -> Result<Response, S::Error>
where
    S: Service<Request, Response = Response>,
{
    let mut ctx = IngressContext::new(request_id);
    let mut pending = Some(request);
    let mut early = None;
    let mut passed = 0;

    for stage in &pipeline.stages {
        let Some(request) = pending.take() else {
            break;
        };
        match stage.on_request(request, &mut ctx).await {
            StageOutcome::Continue(request) => {
                pending = Some(request);
                passed += 1;
            }
            StageOutcome::Respond(response) => {
                tracing::debug!(stage = stage.name(), status = %response.status(), "Answered by ingress");
                early = Some(response);
                break;
            }
            StageOutcome::Reject(rejection) => {
                tracing::info!(stage = stage.name(), reason = %rejection.reason, "Request rejected");
                IngressMetrics::record_rejection(rejection.reason.code());
                early = Some(rejection.into_response());
                break;
            }
        }
    }

    let mut response = match (early, pending) {
        (Some(response), _) => response,
        (None, Some(mut request)) => {
            request.extensions_mut().insert(ctx.clone());
            inner.call(request).await?
        }
        (None, None) => AppError::internal().into_response(),
    };

    for (index, stage) in pipeline.stages.iter().enumerate().rev() {
        if index < passed || stage.wraps_every_response() {
            response = stage.on_response(&ctx, response).await;
        }
    }
    Ok(response)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use axum::{Extension, Router, body::Body, http::StatusCode, routing::get};
    use relay_core::RejectionReason;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    /// Records how often each hook ran and tags responses.
    struct Marker {
        name: &'static str,
        reject: bool,
        responses: Arc<AtomicUsize>,
    }

    impl IngressStage for Marker {
        fn name(&self) -> &'static str {
            self.name
        }

        fn on_request<'a>(
            &'a self,
            request: Request,
            _ctx: &'a mut IngressContext,
        ) -> BoxFuture<'a, StageOutcome> {
            Box::pin(async move {
                if self.reject {
                    StageOutcome::Reject(IngressRejection::new(
                        RejectionReason::MalformedParams,
                        "marked",
                    ))
                } else {
                    StageOutcome::Continue(request)
                }
            })
        }

        fn on_response<'a>(
            &'a self,
            _ctx: &'a IngressContext,
            mut response: Response,
        ) -> BoxFuture<'a, Response> {
            Box::pin(async move {
                self.responses.fetch_add(1, Ordering::SeqCst);
                response
                    .headers_mut()
                    .append("x-marker", HeaderValue::from_static(self.name));
                response
            })
        }
    }

    fn marker(name: &'static str, reject: bool) -> (Marker, Arc<AtomicUsize>) {
        let responses = Arc::new(AtomicUsize::new(0));
        (
            Marker {
                name,
                reject,
                responses: Arc::clone(&responses),
            },
            responses,
        )
    }

    fn request() -> Request {
        Request::builder().uri("/").body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_response_hooks_run_in_reverse_order() {
        let (first, _) = marker("first", false);
        let (second, _) = marker("second", false);
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(IngressLayer::new(IngressPipeline::new().stage(first).stage(second)));

        let response = app.oneshot(request()).await.unwrap();

        let order: Vec<_> = response
            .headers()
            .get_all("x-marker")
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(order, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn test_rejection_short_circuits_later_stages() {
        let (first, first_hits) = marker("first", false);
        let (gate, gate_hits) = marker("gate", true);
        let (last, last_hits) = marker("last", false);
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(IngressLayer::new(
                IngressPipeline::new().stage(first).stage(gate).stage(last),
            ));

        let response = app.oneshot(request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(first_hits.load(Ordering::SeqCst), 1);
        assert_eq!(gate_hits.load(Ordering::SeqCst), 0);
        assert_eq!(last_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_header_hardening_applies_to_early_rejection() {
        let (gate, _) = marker("gate", true);
        let (last, last_hits) = marker("last", false);
        let app = Router::new().route("/", get(|| async { "ok" })).layer(IngressLayer::new(
            IngressPipeline::new().stage(gate).stage(HeaderStage).stage(last),
        ));

        let response = app.oneshot(request()).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
        assert_eq!(last_hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_request_id_generated_if_missing() {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(IngressLayer::new(IngressPipeline::new()));

        let response = app.oneshot(request()).await.unwrap();

        let id = response.headers().get(REQUEST_ID_HEADER).unwrap();
        assert!(Uuid::parse_str(id.to_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_request_id_preserved_from_request() {
        let id = Uuid::new_v4();
        let app = Router::new()
            .route(
                "/",
                get(|Extension(ctx): Extension<IngressContext>| async move {
                    ctx.request_id().to_string()
                }),
            )
            .layer(IngressLayer::new(IngressPipeline::new()));

        let request = Request::builder()
            .uri("/")
            .header(REQUEST_ID_HEADER, id.to_string())
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            id.to_string().as_str()
        );
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(body, id.to_string().as_bytes());
    }

    #[test]
    fn test_standard_pipeline_order() {
        let config = IngressConfig::default().with_session(
            crate::config::SessionConfig::default().with_keys("primary", "secondary"),
        );

        let pipeline =
            IngressPipeline::standard(&config, Arc::new(relay_core::SystemClock)).unwrap();

        assert_eq!(
            pipeline.names(),
            vec!["session", "params", "headers", "cors", "body_limit", "compression"]
        );
    }

    #[test]
    fn test_standard_pipeline_validates_config() {
        assert!(
            IngressPipeline::standard(&IngressConfig::default(), Arc::new(relay_core::SystemClock))
                .is_err()
        );
    }
}
