//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Keeps error shapes uniform across gateway endpoints and middleware:
//! every failure is a JSON `{code, message, request_id}` body.
//!
//! # Key invariants and assumptions
//! - `code` is stable; rejection codes are the [`RejectReason`] strings.
//! - Status codes align with the error category.
//!
//! # Security considerations
//! - Internal errors log details server-side but return generic messages.
use crate::api::locale::{Locale, reject_message};
use crate::api::types::ErrorResponse;
use crate::store::StoreError;
use axum::Json;
use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use portcullis_authz::{AuthzError, RejectReason};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Structured API error returned by handlers and middleware.
///
/// # Invariants
/// - `status` must match the semantics of `body.code`.
///
/// # Example
/// ```rust
/// use axum::http::StatusCode;
/// use gateway::api::error::ApiError;
/// use gateway::api::types::ErrorResponse;
///
/// let err = ApiError {
///     status: StatusCode::NOT_FOUND,
///     body: ErrorResponse {
///         code: "not_found".to_string(),
///         message: "missing".to_string(),
///         request_id: None,
///     },
///     retry_after_secs: None,
/// };
/// ```
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
    /// Emitted as a `Retry-After` header when set.
    pub retry_after_secs: Option<u64>,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: &str) -> Self {
        Self {
            status,
            body: ErrorResponse {
                code: code.to_string(),
                message: message.to_string(),
                request_id: None,
            },
            retry_after_secs: None,
        }
    }

    /// Echo the caller's `x-request-id`, when it sent one.
    pub fn with_request_id(mut self, headers: &HeaderMap) -> Self {
        self.body.request_id = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        self
    }

    pub fn with_retry_after(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Status for a gateway rejection.
pub fn reject_status(reason: RejectReason) -> StatusCode {
    match reason {
        RejectReason::JwtSecretMissing => StatusCode::INTERNAL_SERVER_ERROR,
        RejectReason::AuthHeaderMissing
        | RejectReason::AuthHeaderInvalid
        | RejectReason::TokenInvalid
        | RejectReason::TokenRevoked
        | RejectReason::Unauthorized => StatusCode::UNAUTHORIZED,
        RejectReason::UserDisabled | RejectReason::Forbidden => StatusCode::FORBIDDEN,
        RejectReason::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        RejectReason::RateLimitUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Build a localized rejection with the default status for `reason`.
pub fn api_reject(reason: RejectReason, headers: &HeaderMap) -> ApiError {
    api_reject_with_status(reject_status(reason), reason, headers)
}

pub fn api_reject_with_status(
    status: StatusCode,
    reason: RejectReason,
    headers: &HeaderMap,
) -> ApiError {
    let message = reject_message(reason, Locale::from_headers(headers));
    ApiError::new(status, reason.as_str(), message).with_request_id(headers)
}

pub fn api_not_found(message: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not_found", message)
}

pub fn api_conflict(code: &str, message: &str) -> ApiError {
    ApiError::new(StatusCode::CONFLICT, code, message)
}

/// Log the store error and return a generic 500.
pub fn api_internal(message: &str, err: &StoreError) -> ApiError {
    tracing::error!(error = ?err, "gateway storage error");
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

pub fn api_internal_message(message: &str) -> ApiError {
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

pub fn api_validation_error(message: &str) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "validation_error", message)
}

/// Map identity-store failures: unknown principals are 404, the rest 500.
pub fn api_store(message: &str, err: &StoreError) -> ApiError {
    match err {
        StoreError::NotFound(_) => api_not_found("principal not found"),
        StoreError::Unexpected(_) => api_internal(message, err),
    }
}

/// Map registry failures to client errors or a logged 500.
pub fn api_authz(message: &str, err: &AuthzError) -> ApiError {
    match err {
        AuthzError::InvalidRole(_)
        | AuthzError::InvalidObject(_)
        | AuthzError::EmptyAction
        | AuthzError::InvalidPrincipal(_) => api_validation_error(&err.to_string()),
        AuthzError::ReservedRole(_) => api_conflict("role_reserved", &err.to_string()),
        AuthzError::BuiltinRole(_) => api_conflict("role_builtin", &err.to_string()),
        AuthzError::Casbin(_) | AuthzError::Store(_) => {
            tracing::error!(error = ?err, "policy engine error");
            api_internal_message(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portcullis_authz::PolicyStoreError;

    #[test]
    fn api_error_helpers_build_expected_codes() {
        let not_found = api_not_found("missing");
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);
        assert_eq!(not_found.body.code, "not_found");

        let conflict = api_conflict("role_builtin", "conflict");
        assert_eq!(conflict.status, StatusCode::CONFLICT);
        assert_eq!(conflict.body.code, "role_builtin");

        let internal = api_internal_message("oops");
        assert_eq!(internal.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.body.code, "internal");

        let validation = api_validation_error("bad");
        assert_eq!(validation.status, StatusCode::BAD_REQUEST);
        assert_eq!(validation.body.code, "validation_error");
    }

    #[test]
    fn rejection_statuses() {
        assert_eq!(reject_status(RejectReason::AuthHeaderMissing), StatusCode::UNAUTHORIZED);
        assert_eq!(reject_status(RejectReason::TokenRevoked), StatusCode::UNAUTHORIZED);
        assert_eq!(reject_status(RejectReason::UserDisabled), StatusCode::FORBIDDEN);
        assert_eq!(reject_status(RejectReason::Forbidden), StatusCode::FORBIDDEN);
        assert_eq!(reject_status(RejectReason::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            reject_status(RejectReason::RateLimitUnavailable),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            reject_status(RejectReason::JwtSecretMissing),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn rejection_is_localized_and_carries_request_id() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("req-7"));
        headers.insert("accept-language", HeaderValue::from_static("zh-CN"));
        let err = api_reject(RejectReason::Forbidden, &headers);
        assert_eq!(err.body.code, "forbidden");
        assert_eq!(err.body.message, "没有访问权限");
        assert_eq!(err.body.request_id.as_deref(), Some("req-7"));
    }

    #[test]
    fn retry_after_becomes_a_header() {
        let response = api_reject(RejectReason::RateLimited, &HeaderMap::new())
            .with_retry_after(12)
            .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "12");
    }

    #[test]
    fn authz_errors_map_by_kind() {
        assert_eq!(
            api_authz("x", &AuthzError::EmptyAction).status,
            StatusCode::BAD_REQUEST
        );
        let object = api_authz("x", &AuthzError::InvalidObject("/admin/(".into()));
        assert_eq!(object.status, StatusCode::BAD_REQUEST);
        assert_eq!(object.body.code, "validation_error");
        assert_eq!(
            api_authz("x", &AuthzError::BuiltinRole("role:finance".into())).body.code,
            "role_builtin"
        );
        let internal = api_authz(
            "failed to grant",
            &AuthzError::Store(PolicyStoreError::Unavailable("down".into())),
        );
        assert_eq!(internal.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.body.message, "failed to grant");
    }

    #[test]
    fn store_not_found_is_404() {
        let err = StoreError::NotFound("admin:9".to_string());
        assert_eq!(api_store("x", &err).status, StatusCode::NOT_FOUND);
        let err = StoreError::Unexpected(anyhow::anyhow!("boom"));
        let api = api_store("storage failed", &err);
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.body.message, "storage failed");
    }
}
