//! Compression stage.
//!
//! Gzips a response when all of these hold: the client accepts gzip, the
//! response is not already encoded, it is not a `101`, `204` or `304`, and
//! its body has a known size at or above the threshold. Only the
//! representation changes.

use super::{IngressContext, IngressStage, StageOutcome};
use crate::error::AppError;
use axum::{
    body::{Body, HttpBody},
    extract::Request,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use flate2::{Compression, write::GzEncoder};
use http_body_util::BodyExt;
use relay_core::BoxFuture;
use std::io::Write;

/// Compresses large responses.
#[derive(Debug, Clone, Copy)]
pub struct CompressionStage {
    threshold: usize,
}

impl CompressionStage {
    /// Create the stage. Bodies smaller than `threshold` bytes are left alone.
    #[must_use]
    pub const fn new(threshold: usize) -> Self {
        Self { threshold }
    }

    fn should_compress(&self, response: &Response) -> bool {
        let status = response.status();
        if status == StatusCode::SWITCHING_PROTOCOLS
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED
        {
            return false;
        }
        if response.headers().contains_key(header::CONTENT_ENCODING) {
            return false;
        }
        let threshold = u64::try_from(self.threshold).unwrap_or(u64::MAX);
        response
            .body()
            .size_hint()
            .exact()
            .is_some_and(|size| size >= threshold)
    }
}

/// Whether `Accept-Encoding` admits gzip with a non-zero quality.
fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|entry| {
            let mut parts = entry.split(';').map(str::trim);
            let coding = parts.next().unwrap_or_default();
            let refused = parts.any(|p| {
                p.strip_prefix("q=")
                    .and_then(|q| q.parse::<f32>().ok())
                    .is_some_and(|q| q <= 0.0)
            });
            !refused && (coding.eq_ignore_ascii_case("gzip") || coding == "*")
        })
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(bytes.len() / 2), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

impl IngressStage for CompressionStage {
    fn name(&self) -> &'static str {
        "compression"
    }

    fn on_request<'a>(
        &'a self,
        request: Request,
        ctx: &'a mut IngressContext,
    ) -> BoxFuture<'a, StageOutcome> {
        ctx.accepts_gzip = accepts_gzip(request.headers());
        Box::pin(std::future::ready(StageOutcome::Continue(request)))
    }

    fn on_response<'a>(
        &'a self,
        ctx: &'a IngressContext,
        response: Response,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if !ctx.accepts_gzip || !self.should_compress(&response) {
                return response;
            }

            let (mut parts, body) = response.into_parts();
            let bytes = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    return AppError::internal()
                        .with_source(anyhow::anyhow!("Failed to buffer response: {e}"))
                        .into_response();
                }
            };

            match gzip(&bytes) {
                Ok(compressed) => {
                    parts
                        .headers
                        .insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
                    parts
                        .headers
                        .insert(header::CONTENT_LENGTH, HeaderValue::from(compressed.len()));
                    parts
                        .headers
                        .append(header::VARY, HeaderValue::from_static("Accept-Encoding"));
                    Response::from_parts(parts, Body::from(compressed))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Compression failed, sending identity");
                    Response::from_parts(parts, Body::from(bytes))
                }
            }
        })
    }
}
