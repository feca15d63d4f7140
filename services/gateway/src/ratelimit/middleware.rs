use super::{IdentitySource, RateLimiter};
use crate::api::error::{ApiError, api_reject};
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use portcullis_authz::{RejectReason, WindowDecision};
use std::sync::Arc;

pub const RATE_LIMIT_REMAINING_HEADER: &str = "x-ratelimit-remaining";

/// Per-route limiter binding: which counter scope and which identity.
#[derive(Clone)]
pub struct RateLimitGuard {
    pub limiter: Arc<RateLimiter>,
    pub scope: &'static str,
    pub identity: IdentitySource,
}

impl RateLimitGuard {
    pub fn new(limiter: Arc<RateLimiter>, scope: &'static str, identity: IdentitySource) -> Self {
        Self {
            limiter,
            scope,
            identity,
        }
    }
}

fn record_decision(outcome: &'static str) {
    metrics::counter!("portcullis_rate_limit_decisions_total", "outcome" => outcome).increment(1);
}

pub async fn rate_limit(
    State(guard): State<RateLimitGuard>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if !guard.limiter.is_enabled() {
        return Ok(next.run(request).await);
    }
    let headers = request.headers().clone();
    let (request, identity) = guard.identity.extract(request).await?;
    match guard.limiter.check(guard.scope, &identity).await {
        Ok(WindowDecision::Allow { remaining }) => {
            record_decision("allow");
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .insert(RATE_LIMIT_REMAINING_HEADER, HeaderValue::from(remaining));
            Ok(response)
        }
        Ok(WindowDecision::Reject { retry_after }) => {
            record_decision(RejectReason::RateLimited.as_str());
            tracing::info!(scope = guard.scope, %identity, "rate limited");
            Err(api_reject(RejectReason::RateLimited, &headers)
                .with_retry_after(retry_after.as_secs()))
        }
        Err(reason) => {
            record_decision(reason.as_str());
            Err(api_reject(reason, &headers))
        }
    }
}
