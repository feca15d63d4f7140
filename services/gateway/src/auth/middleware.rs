//! Request guards for authenticated routes.
//!
//! `require_principal` establishes identity; `require_admin` additionally
//! requires an admin principal and an allow verdict from the policy engine
//! for the request's path and method. Both leave an [`AuthContext`] in the
//! request extensions for handlers.
use crate::api::error::{ApiError, api_reject, api_reject_with_status};
use crate::app::AppState;
use crate::auth::validator::AuthStateSource;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::Response;
use portcullis_authz::{AuthState, PrincipalId, PrincipalKind, RejectReason};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    pub principal: PrincipalId,
    pub state: AuthState,
    pub source: AuthStateSource,
}

fn record_decision(outcome: &'static str) {
    metrics::counter!("portcullis_auth_decisions_total", "outcome" => outcome).increment(1);
}

fn reject(reason: RejectReason, request: &Request) -> ApiError {
    record_decision(reason.as_str());
    api_reject(reason, request.headers())
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthContext, ApiError> {
    // A non-UTF-8 header value is still a header, just not a bearer token.
    let header = headers
        .get(AUTHORIZATION)
        .map(|value| value.to_str().unwrap_or_default());
    match state.validator.authenticate(header).await {
        Ok(authenticated) => Ok(AuthContext {
            principal: authenticated.claims.principal,
            state: authenticated.state,
            source: authenticated.source,
        }),
        Err(failure) if failure.unavailable => {
            record_decision(failure.reason.as_str());
            Err(api_reject_with_status(
                StatusCode::SERVICE_UNAVAILABLE,
                failure.reason,
                headers,
            ))
        }
        Err(failure) => {
            record_decision(failure.reason.as_str());
            Err(api_reject(failure.reason, headers))
        }
    }
}

/// Admit any principal holding a valid, unrevoked token.
pub async fn require_principal(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let context = authenticate(&state, request.headers()).await?;
    record_decision("allow");
    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

/// Admit admin principals allowed to perform this method on this path.
///
/// Super principals skip policy evaluation. An engine failure denies.
pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let context = authenticate(&state, request.headers()).await?;
    if context.principal.kind != PrincipalKind::Admin {
        return Err(reject(RejectReason::Forbidden, &request));
    }

    if context.state.is_super {
        record_decision("super");
    } else {
        let object = request.uri().path();
        let action = request.method().as_str();
        match state
            .registry
            .authorize(&context.principal, object, action)
            .await
        {
            Ok(true) => record_decision("allow"),
            Ok(false) => {
                tracing::debug!(
                    principal = %context.principal,
                    object,
                    action,
                    "policy denied request"
                );
                return Err(reject(RejectReason::Forbidden, &request));
            }
            Err(err) => {
                tracing::error!(error = ?err, principal = %context.principal, "policy evaluation failed");
                return Err(reject(RejectReason::Forbidden, &request));
            }
        }
    }

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}
