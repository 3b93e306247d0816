//! Parameter-pollution stage.
//!
//! Applies to the query string and to `application/x-www-form-urlencoded`
//! bodies. A key that appears more than once is either collapsed to its last
//! value (the dropped values are recorded in
//! [`IngressContext::polluted`]) or rejected, depending on
//! [`ParamPolicy::duplicates`]. Whitelisted keys may repeat freely.

use super::body_limit::check_declared;
use super::{IngressContext, IngressStage, StageOutcome};
use crate::config::{DuplicateParams, ParamPolicy};
use crate::error::IngressRejection;
use axum::{
    body::Body,
    extract::Request,
    http::{HeaderValue, Uri, header, uri::PathAndQuery},
};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use relay_core::{BoxFuture, RejectionReason};
use std::collections::BTreeMap;

/// Guards against repeated scalar parameters.
#[derive(Debug, Clone)]
pub struct ParamStage {
    policy: ParamPolicy,
    body_limit: usize,
}

/// Result of cleaning one parameter list.
#[derive(Debug, Default, PartialEq, Eq)]
struct Cleaned {
    pairs: Vec<(String, String)>,
    dropped: BTreeMap<String, Vec<String>>,
}

impl ParamStage {
    /// Create the stage. Form bodies are read up to `body_limit` bytes.
    #[must_use]
    pub const fn new(policy: ParamPolicy, body_limit: usize) -> Self {
        Self { policy, body_limit }
    }

    /// Collapse or reject duplicates in `pairs`, keeping first-seen key order.
    fn clean(&self, pairs: Vec<(String, String)>) -> Result<Cleaned, IngressRejection> {
        let mut cleaned = Cleaned::default();

        for (key, value) in pairs {
            if self.policy.whitelist.contains(&key) {
                cleaned.pairs.push((key, value));
                continue;
            }
            match cleaned.pairs.iter_mut().find(|(k, _)| *k == key) {
                None => cleaned.pairs.push((key, value)),
                Some(_) if self.policy.duplicates == DuplicateParams::Reject => {
                    return Err(IngressRejection::new(
                        RejectionReason::MalformedParams,
                        format!("Parameter '{key}' given more than once"),
                    ));
                }
                Some((_, existing)) => {
                    let previous = std::mem::replace(existing, value);
                    cleaned.dropped.entry(key).or_default().push(previous);
                }
            }
        }
        Ok(cleaned)
    }

    fn clean_query(&self, uri: &Uri, ctx: &mut IngressContext) -> Result<Option<Uri>, IngressRejection> {
        let Some(query) = uri.query() else {
            return Ok(None);
        };
        let pairs: Vec<(String, String)> = serde_urlencoded::from_str(query)
            .map_err(|_| malformed("Query string could not be decoded"))?;

        let cleaned = self.clean(pairs)?;
        if cleaned.dropped.is_empty() {
            return Ok(None);
        }

        let query = serde_urlencoded::to_string(&cleaned.pairs)
            .map_err(|_| malformed("Query string could not be re-encoded"))?;
        let path_and_query = PathAndQuery::try_from(format!("{}?{query}", uri.path()))
            .map_err(|_| malformed("Query string could not be re-encoded"))?;
        let mut parts = uri.clone().into_parts();
        parts.path_and_query = Some(path_and_query);
        let uri = Uri::from_parts(parts).map_err(|_| malformed("Invalid request URI"))?;

        merge(ctx, cleaned.dropped);
        Ok(Some(uri))
    }

    async fn clean_form(&self, request: Request, ctx: &mut IngressContext) -> StageOutcome {
        if let Err(rejection) = check_declared(&request, self.body_limit) {
            return StageOutcome::Reject(rejection);
        }
        let (mut parts, body) = request.into_parts();

        let bytes = match Limited::new(body, self.body_limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return StageOutcome::Reject(IngressRejection::new(
                    RejectionReason::PayloadTooLarge,
                    "Request body too large",
                ));
            }
            Err(_) => return StageOutcome::Reject(malformed("Request body could not be read")),
        };

        let pairs: Vec<(String, String)> = match serde_urlencoded::from_bytes(&bytes) {
            Ok(pairs) => pairs,
            Err(_) => return StageOutcome::Reject(malformed("Form body could not be decoded")),
        };
        let cleaned = match self.clean(pairs) {
            Ok(cleaned) => cleaned,
            Err(rejection) => return StageOutcome::Reject(rejection),
        };

        if cleaned.dropped.is_empty() {
            return StageOutcome::Continue(Request::from_parts(parts, Body::from(bytes)));
        }

        let Ok(encoded) = serde_urlencoded::to_string(&cleaned.pairs) else {
            return StageOutcome::Reject(malformed("Form body could not be re-encoded"));
        };
        parts
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(encoded.len()));
        merge(ctx, cleaned.dropped);
        StageOutcome::Continue(Request::from_parts(parts, Body::from(encoded)))
    }
}

fn malformed(message: &str) -> IngressRejection {
    IngressRejection::new(RejectionReason::MalformedParams, message)
}

fn merge(ctx: &mut IngressContext, dropped: BTreeMap<String, Vec<String>>) {
    for (key, values) in dropped {
        tracing::debug!(key = %key, dropped = values.len(), "Collapsed repeated parameter");
        ctx.polluted.entry(key).or_default().extend(values);
    }
}

fn is_form(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            ct.split(';')
                .next()
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/x-www-form-urlencoded"))
        })
}

impl IngressStage for ParamStage {
    fn name(&self) -> &'static str {
        "params"
    }

    fn on_request<'a>(
        &'a self,
        mut request: Request,
        ctx: &'a mut IngressContext,
    ) -> BoxFuture<'a, StageOutcome> {
        Box::pin(async move {
            match self.clean_query(request.uri(), ctx) {
                Ok(Some(uri)) => *request.uri_mut() = uri,
                Ok(None) => {}
                Err(rejection) => return StageOutcome::Reject(rejection),
            }

            if is_form(&request) {
                self.clean_form(request, ctx).await
            } else {
                StageOutcome::Continue(request)
            }
        })
    }
}
