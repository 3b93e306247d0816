//! End-to-end tests of the standard ingress pipeline in front of the router.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use axum::{
    Router,
    body::{Body, Bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
    routing::{get, post},
};
use http_body_util::BodyExt;
use relay_runtime::{ReconnectConfig, Reconnector, RelayConfig, RelayNode};
use relay_testing::{FixedClock, InMemoryBus, InMemoryStore, test_epoch};
use relay_web::{
    AppState, ClientSession, CorsConfig, IngressConfig, IngressPipeline, Polluted,
    REQUEST_ID_HEADER, SessionConfig, router_with,
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

// ============================================================================
// Test Fixtures
// ============================================================================

const CLIENT: &str = "https://app.example.com";
const MIB: usize = 1024 * 1024;

fn ingress_config() -> IngressConfig {
    IngressConfig::default()
        .with_session(SessionConfig::default().with_keys("current-key", "previous-key"))
        .with_cors(CorsConfig::for_origin(CLIENT))
}

fn node() -> Arc<RelayNode> {
    let store = Arc::new(Reconnector::new(InMemoryStore::new(), ReconnectConfig::default()));
    Arc::new(RelayNode::new(
        Arc::new(InMemoryBus::new()),
        store,
        RelayConfig::default(),
    ))
}

/// Application routes used to observe what handlers see.
fn app_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/whoami",
            get(|ClientSession(session): ClientSession| async move {
                session.map(|c| c.sid.to_string()).unwrap_or_default()
            }),
        )
        .route(
            "/search",
            get(
                |Polluted(polluted): Polluted, req: Request<Body>| async move {
                    axum::Json(json!({
                        "query": req.uri().query(),
                        "dropped": polluted,
                    }))
                },
            ),
        )
        .route("/upload", post(|body: Bytes| async move { body.len().to_string() }))
        .route("/big", get(|| async { "x".repeat(8 * 1024) }))
}

fn app_for(node: Arc<RelayNode>) -> Router {
    let pipeline = IngressPipeline::standard(
        &ingress_config(),
        Arc::new(FixedClock::new(test_epoch())),
    )
    .unwrap();
    router_with(AppState::new(node), pipeline, app_routes())
}

fn app() -> Router {
    app_for(node())
}

async fn send(app: Router, request: Request<Body>) -> Response {
    app.oneshot(request).await.unwrap()
}

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

/// The `name=value` part of a `Set-Cookie` header.
fn cookie_pair(response: &Response) -> String {
    response.headers()[header::SET_COOKIE]
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string()
}

// ============================================================================
// Structured responses
// ============================================================================

#[tokio::test]
async fn test_unknown_route_is_structured_404() {
    let response = send(app(), get_request("/nope")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    assert_eq!(response.headers()["x-frame-options"], "SAMEORIGIN");
    assert_eq!(
        json_body(response).await,
        json!({ "code": "not-found", "message": "Route not found" })
    );
}

#[tokio::test]
async fn test_readiness_reports_not_running() {
    let response = send(app(), get_request("/health/ready")).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["phase"], "starting");
    assert_eq!(body["status"], "unhealthy");
}

#[tokio::test]
async fn test_metrics_without_recorder_is_404() {
    let response = send(app(), get_request("/metrics")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Session cookie
// ============================================================================

#[tokio::test]
async fn test_first_visit_gets_a_session_that_sticks() {
    let app = app();

    let first = send(app.clone(), get_request("/whoami")).await;
    assert_eq!(first.status(), StatusCode::OK);
    let cookie = cookie_pair(&first);
    let sid = first.into_body().collect().await.unwrap().to_bytes();
    assert!(!sid.is_empty());

    let request = Request::builder()
        .uri("/whoami")
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    let second = send(app, request).await;

    assert!(second.headers().get(header::SET_COOKIE).is_none());
    let again = second.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(sid, again);
}

#[tokio::test]
async fn test_forged_cookie_is_rejected() {
    let request = Request::builder()
        .uri("/whoami")
        .header(header::COOKIE, "session=eyJhbGciOiJIUzI1NiJ9.e30.forged")
        .body(Body::empty())
        .unwrap();

    let response = send(app(), request).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(json_body(response).await["code"], "invalid-session");
}

#[tokio::test]
async fn test_session_rejection_carries_secure_headers() {
    let request = Request::builder()
        .uri("/whoami")
        .header(header::COOKIE, "session=eyJhbGciOiJIUzI1NiJ9.e30.forged")
        .body(Body::empty())
        .unwrap();

    let response = send(app(), request).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(response.headers()["x-frame-options"], "SAMEORIGIN");
    assert!(response.headers().contains_key("content-security-policy"));
    assert!(response.headers().contains_key("x-request-id"));
}

// ============================================================================
// Parameters
// ============================================================================

#[tokio::test]
async fn test_handler_sees_collapsed_query() {
    let response = send(app(), get_request("/search?q=a&q=b")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["query"], "q=b");
    assert_eq!(body["dropped"], json!({ "q": ["a"] }));
}

// ============================================================================
// Cross-origin
// ============================================================================

#[tokio::test]
async fn test_configured_origin_may_read_response() {
    let request = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, CLIENT)
        .body(Body::empty())
        .unwrap();

    let response = send(app(), request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], CLIENT);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
}

#[tokio::test]
async fn test_foreign_origin_is_denied() {
    let request = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "https://evil.example")
        .header(header::COOKIE, "theme=dark")
        .body(Body::empty())
        .unwrap();

    let response = send(app(), request).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    assert_eq!(json_body(response).await["code"], "cors-denied");
}

#[tokio::test]
async fn test_preflight_is_answered_by_ingress() {
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/upload")
        .header(header::ORIGIN, CLIENT)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = send(app(), request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
}

// ============================================================================
// Payload size
// ============================================================================

#[tokio::test]
async fn test_60mb_body_is_rejected_before_reading() {
    // Declares 60 MiB but the stream would fail if anything polled it
    let body = Body::from_stream(futures::stream::once(async {
        Err::<Bytes, std::io::Error>(std::io::Error::other("body must not be read"))
    }));
    let request = Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header(header::CONTENT_LENGTH, (60 * MIB).to_string())
        .body(body)
        .unwrap();

    let response = send(app(), request).await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json_body(response).await["code"], "payload-too-large");
}

#[tokio::test]
async fn test_60mb_form_body_is_rejected_before_reading() {
    // Form bodies are read by the params stage, ahead of body_limit
    let body = Body::from_stream(futures::stream::once(async {
        Err::<Bytes, std::io::Error>(std::io::Error::other("body must not be read"))
    }));
    let request = Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(header::CONTENT_LENGTH, (60 * MIB).to_string())
        .body(body)
        .unwrap();

    let response = send(app(), request).await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    assert_eq!(json_body(response).await["code"], "payload-too-large");
}

#[tokio::test]
async fn test_body_within_limit_reaches_handler() {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/upload")
        .body(Body::from(vec![7u8; 3 * MIB]))
        .unwrap();

    let response = send(app(), request).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body, (3 * MIB).to_string());
}

// ============================================================================
// Compression
// ============================================================================

#[tokio::test]
async fn test_large_response_is_compressed_for_gzip_clients() {
    let request = Request::builder()
        .uri("/big")
        .header(header::ACCEPT_ENCODING, "gzip, deflate")
        .body(Body::empty())
        .unwrap();

    let response = send(app(), request).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
    // Headers from outer stages still apply
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");
}

// ============================================================================
// WebSocket admission
// ============================================================================

#[tokio::test]
async fn test_ws_refused_while_draining() {
    let node = node();
    node.registry().close_admissions();

    let response = send(app_for(node), get_request("/ws")).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["code"], "draining");
}

#[tokio::test]
async fn test_ws_without_upgrade_headers_is_refused() {
    let response = send(app(), get_request("/ws")).await;

    assert!(response.status().is_client_error());
}
