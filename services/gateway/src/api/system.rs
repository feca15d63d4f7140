//! System/health API handlers.
//!
//! # Purpose and responsibility
//! Unauthenticated endpoints for service metadata and probes.
//!
//! # Key invariants and assumptions
//! - Health checks must be fast and side-effect free.
use crate::api::error::{ApiError, api_internal};
use crate::api::types::{HealthStatus, SystemInfo};
use crate::app::AppState;
use axum::Json;
use axum::extract::State;

#[utoipa::path(
    get,
    path = "/api/v1/system/info",
    tag = "system",
    responses(
        (status = 200, description = "Gateway identity and capabilities", body = SystemInfo)
    )
)]
pub(crate) async fn system_info(State(state): State<AppState>) -> Json<SystemInfo> {
    Json(SystemInfo {
        api_version: state.api_version.clone(),
        storage_backend: state.identities.backend_name().to_string(),
        rate_limit_enabled: state.limiter.is_enabled(),
    })
}

#[utoipa::path(
    get,
    path = "/api/v1/system/health",
    tag = "system",
    responses(
        (status = 200, description = "Gateway health", body = HealthStatus),
        (status = 500, description = "Identity store unreachable")
    )
)]
/// Probe the identity store and report `ok` when it answers.
pub(crate) async fn system_health(
    State(state): State<AppState>,
) -> Result<Json<HealthStatus>, ApiError> {
    if let Err(err) = state.identities.health_check().await {
        return Err(api_internal("storage unavailable", &err));
    }
    Ok(Json(HealthStatus {
        status: "ok".to_string(),
    }))
}
