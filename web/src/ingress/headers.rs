//! Header-hardening stage.
//!
//! Pure response mutation: sets the standard secure defaults and strips
//! headers that fingerprint the server. Never rejects, and hardens responses
//! to requests that an earlier stage refused.

use super::{IngressContext, IngressStage, StageOutcome};
use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    response::Response,
};
use relay_core::BoxFuture;

/// Headers set on every response.
pub const SECURE_DEFAULTS: &[(&str, &str)] = &[
    (
        "content-security-policy",
        "default-src 'self';base-uri 'self';font-src 'self' https: data:;\
         form-action 'self';frame-ancestors 'self';img-src 'self' data:;\
         object-src 'none';script-src 'self';script-src-attr 'none';\
         style-src 'self' https: 'unsafe-inline';upgrade-insecure-requests",
    ),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
];

/// Headers removed from every response.
pub const STRIPPED: &[&str] = &["x-powered-by", "server"];

/// Applies [`SECURE_DEFAULTS`] and removes [`STRIPPED`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderStage;

impl IngressStage for HeaderStage {
    fn name(&self) -> &'static str {
        "headers"
    }

    fn on_request<'a>(
        &'a self,
        request: Request,
        _ctx: &'a mut IngressContext,
    ) -> BoxFuture<'a, StageOutcome> {
        Box::pin(std::future::ready(StageOutcome::Continue(request)))
    }

    fn on_response<'a>(
        &'a self,
        _ctx: &'a IngressContext,
        mut response: Response,
    ) -> BoxFuture<'a, Response> {
        let headers = response.headers_mut();
        for &(name, value) in SECURE_DEFAULTS {
            headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
        }
        for &name in STRIPPED {
            headers.remove(name);
        }
        Box::pin(std::future::ready(response))
    }

    fn wraps_every_response(&self) -> bool {
        true
    }
}
