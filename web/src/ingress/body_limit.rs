//! Payload-size stage.
//!
//! A declared `Content-Length` above the limit is rejected before a single
//! body byte is read. Otherwise the body is wrapped in [`Limited`], so a
//! streamed or undeclared body stops at the limit and axum's body
//! extractors answer 413.

use super::{IngressContext, IngressStage, StageOutcome};
use crate::error::IngressRejection;
use axum::{body::Body, extract::Request, http::header};
use http_body_util::Limited;
use relay_core::{BoxFuture, RejectionReason};

/// Bounds request bodies.
#[derive(Debug, Clone, Copy)]
pub struct BodyLimitStage {
    limit: usize,
}

impl BodyLimitStage {
    /// Create the stage with a limit in bytes.
    #[must_use]
    pub const fn new(limit: usize) -> Self {
        Self { limit }
    }

}

/// Reject a request whose declared `Content-Length` exceeds `limit`.
///
/// Looks only at the header; the body is left untouched.
pub(super) fn check_declared(request: &Request, limit: usize) -> Result<(), IngressRejection> {
    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    match declared {
        Some(length) if length > u64::try_from(limit).unwrap_or(u64::MAX) => {
            tracing::debug!(length, limit, "Declared body exceeds limit");
            Err(IngressRejection::new(
                RejectionReason::PayloadTooLarge,
                format!("Request body exceeds {limit} bytes"),
            ))
        }
        _ => Ok(()),
    }
}

impl IngressStage for BodyLimitStage {
    fn name(&self) -> &'static str {
        "body_limit"
    }

    fn on_request<'a>(
        &'a self,
        request: Request,
        _ctx: &'a mut IngressContext,
    ) -> BoxFuture<'a, StageOutcome> {
        let outcome = match check_declared(&request, self.limit) {
            Err(rejection) => StageOutcome::Reject(rejection),
            Ok(()) => {
                let (parts, body) = request.into_parts();
                StageOutcome::Continue(Request::from_parts(
                    parts,
                    Body::new(Limited::new(body, self.limit)),
                ))
            }
        };
        Box::pin(std::future::ready(outcome))
    }
}
