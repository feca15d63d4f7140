//! RBAC administration endpoints.
//!
//! # Purpose and responsibility
//! Role, policy and principal-assignment management plus administrative
//! session revocation, all under `/api/v1/admin/rbac`.
//!
//! # Key invariants and assumptions
//! - Every route here sits behind `require_admin`, so callers already hold a
//!   policy allowing the path and method (or are super principals).
//! - Names and patterns are canonicalized by the registry; responses echo the
//!   canonical form.
//! - Built-in roles are read-only through this API.
use crate::api::error::{ApiError, api_authz, api_not_found, api_store, api_validation_error};
use crate::api::types::{
    PolicyGrantRequest, PolicyListResponse, PrincipalDisabledRequest, PrincipalRolesRequest,
    PrincipalRolesResponse, PrincipalStateResponse, RoleCreateRequest, RoleListResponse,
    RoleParentRequest, RoleResponse, SessionRevokeRequest,
};
use crate::app::AppState;
use crate::store::PrincipalRecord;
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use portcullis_authz::PrincipalId;

fn record_mutation(op: &'static str) {
    metrics::counter!("portcullis_policy_mutations_total", "op" => op).increment(1);
}

pub(crate) fn parse_principal(raw: &str) -> Result<PrincipalId, ApiError> {
    raw.parse::<PrincipalId>()
        .map_err(|_| api_validation_error("principal must look like 'admin:<id>' or 'user:<id>'"))
}

pub(crate) fn principal_state(record: &PrincipalRecord) -> PrincipalStateResponse {
    PrincipalStateResponse {
        principal: record.principal.to_string(),
        credential_version: record.credential_version,
        invalid_before_unix: record.invalid_before_unix,
        disabled: record.disabled,
    }
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/rbac/roles",
    tag = "rbac",
    responses((status = 200, body = RoleListResponse), (status = 403, body = crate::api::types::ErrorResponse))
)]
pub async fn list_roles(State(state): State<AppState>) -> Json<RoleListResponse> {
    Json(RoleListResponse {
        items: state.registry.list_roles().await,
    })
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/rbac/roles",
    tag = "rbac",
    request_body = RoleCreateRequest,
    responses((status = 201, body = RoleResponse), (status = 400), (status = 409))
)]
pub async fn create_role(
    State(state): State<AppState>,
    Json(body): Json<RoleCreateRequest>,
) -> Result<(StatusCode, Json<RoleResponse>), ApiError> {
    let role = state
        .registry
        .ensure_role(&body.name)
        .await
        .map_err(|err| api_authz("failed to create role", &err))?;
    record_mutation("create_role");
    Ok((StatusCode::CREATED, Json(RoleResponse { role })))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/rbac/roles/{role}",
    tag = "rbac",
    params(("role" = String, Path, description = "Role name")),
    responses((status = 204), (status = 404), (status = 409))
)]
pub async fn delete_role(
    Path(role): Path<String>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let removed = state
        .registry
        .delete_role(&role)
        .await
        .map_err(|err| api_authz("failed to delete role", &err))?;
    if !removed {
        return Err(api_not_found("role not found"));
    }
    record_mutation("delete_role");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/rbac/roles/{role}/policies",
    tag = "rbac",
    params(("role" = String, Path, description = "Role name")),
    responses((status = 200, body = PolicyListResponse), (status = 400))
)]
pub async fn get_role_policies(
    Path(role): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PolicyListResponse>, ApiError> {
    let rules = state
        .registry
        .get_role_policies(&role)
        .await
        .map_err(|err| api_authz("failed to read role policies", &err))?;
    Ok(Json(PolicyListResponse::from_rules(rules)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/rbac/roles/{role}/policies",
    tag = "rbac",
    params(("role" = String, Path, description = "Role name")),
    request_body = PolicyGrantRequest,
    responses((status = 204), (status = 400), (status = 409))
)]
pub async fn grant_role_policy(
    Path(role): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<PolicyGrantRequest>,
) -> Result<StatusCode, ApiError> {
    let added = state
        .registry
        .grant_role_policy(&role, &body.object, &body.action)
        .await
        .map_err(|err| api_authz("failed to grant policy", &err))?;
    if added {
        record_mutation("grant_policy");
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/rbac/roles/{role}/policies",
    tag = "rbac",
    params(("role" = String, Path, description = "Role name")),
    request_body = PolicyGrantRequest,
    responses((status = 204), (status = 404), (status = 409))
)]
pub async fn revoke_role_policy(
    Path(role): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<PolicyGrantRequest>,
) -> Result<StatusCode, ApiError> {
    let removed = state
        .registry
        .revoke_role_policy(&role, &body.object, &body.action)
        .await
        .map_err(|err| api_authz("failed to revoke policy", &err))?;
    if !removed {
        return Err(api_not_found("policy not found"));
    }
    record_mutation("revoke_policy");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/rbac/roles/{role}/parents",
    tag = "rbac",
    params(("role" = String, Path, description = "Inheriting role")),
    request_body = RoleParentRequest,
    responses((status = 204), (status = 400), (status = 409))
)]
pub async fn add_role_parent(
    Path(role): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<RoleParentRequest>,
) -> Result<StatusCode, ApiError> {
    let added = state
        .registry
        .add_role_parent(&role, &body.parent)
        .await
        .map_err(|err| api_authz("failed to add role parent", &err))?;
    if added {
        record_mutation("add_parent");
    }
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/rbac/roles/{role}/parents/{parent}",
    tag = "rbac",
    params(
        ("role" = String, Path, description = "Inheriting role"),
        ("parent" = String, Path, description = "Parent role")
    ),
    responses((status = 204), (status = 404), (status = 409))
)]
pub async fn remove_role_parent(
    Path((role, parent)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let removed = state
        .registry
        .remove_role_parent(&role, &parent)
        .await
        .map_err(|err| api_authz("failed to remove role parent", &err))?;
    if !removed {
        return Err(api_not_found("role parent not found"));
    }
    record_mutation("remove_parent");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/rbac/principals/{principal}/roles",
    tag = "rbac",
    params(("principal" = String, Path, description = "Principal, e.g. admin:42")),
    responses((status = 200, body = PrincipalRolesResponse), (status = 400))
)]
pub async fn get_principal_roles(
    Path(principal): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PrincipalRolesResponse>, ApiError> {
    let principal = parse_principal(&principal)?;
    Ok(Json(PrincipalRolesResponse {
        principal: principal.to_string(),
        roles: state.registry.get_admin_roles(&principal).await,
    }))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/rbac/principals/{principal}/roles",
    tag = "rbac",
    params(("principal" = String, Path, description = "Principal, e.g. admin:42")),
    request_body = PrincipalRolesRequest,
    responses((status = 200, body = PrincipalRolesResponse), (status = 400))
)]
pub async fn set_principal_roles(
    Path(principal): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<PrincipalRolesRequest>,
) -> Result<Json<PrincipalRolesResponse>, ApiError> {
    let principal = parse_principal(&principal)?;
    let roles = state
        .registry
        .set_admin_roles(&principal, &body.roles)
        .await
        .map_err(|err| api_authz("failed to set principal roles", &err))?;
    record_mutation("set_roles");
    tracing::info!(%principal, roles = ?roles, "principal roles replaced");
    Ok(Json(PrincipalRolesResponse {
        principal: principal.to_string(),
        roles,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/rbac/principals/{principal}/policies",
    tag = "rbac",
    params(("principal" = String, Path, description = "Principal, e.g. admin:42")),
    responses((status = 200, body = PolicyListResponse), (status = 400))
)]
pub async fn get_principal_policies(
    Path(principal): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PolicyListResponse>, ApiError> {
    let principal = parse_principal(&principal)?;
    let rules = state.registry.get_admin_policies(&principal).await;
    Ok(Json(PolicyListResponse::from_rules(rules)))
}

#[utoipa::path(
    put,
    path = "/api/v1/admin/rbac/principals/{principal}/disabled",
    tag = "rbac",
    params(("principal" = String, Path, description = "Principal, e.g. admin:42")),
    request_body = PrincipalDisabledRequest,
    responses((status = 200, body = PrincipalStateResponse), (status = 404))
)]
pub async fn set_principal_disabled(
    Path(principal): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<PrincipalDisabledRequest>,
) -> Result<Json<PrincipalStateResponse>, ApiError> {
    let principal = parse_principal(&principal)?;
    let record = state
        .validator
        .set_disabled(&principal, body.disabled)
        .await
        .map_err(|err| api_store("failed to update principal", &err))?;
    Ok(Json(principal_state(&record)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/rbac/sessions/revoke",
    tag = "rbac",
    request_body = SessionRevokeRequest,
    responses(
        (status = 200, body = PrincipalStateResponse),
        (status = 404),
        (status = 429, body = crate::api::types::ErrorResponse)
    )
)]
/// End a principal's sessions.
///
/// Without `before_unix` every token is revoked by bumping the credential
/// version; with it, only tokens issued before that instant.
pub async fn revoke_principal_sessions(
    State(state): State<AppState>,
    Json(body): Json<SessionRevokeRequest>,
) -> Result<Json<PrincipalStateResponse>, ApiError> {
    let principal = parse_principal(&body.principal)?;
    let record = match body.before_unix {
        Some(cutoff) if cutoff <= 0 => {
            return Err(api_validation_error("before_unix must be positive"));
        }
        Some(cutoff) => state.validator.invalidate_before(&principal, cutoff).await,
        None => state.validator.bump_credential_version(&principal).await,
    }
    .map_err(|err| api_store("failed to revoke sessions", &err))?;
    Ok(Json(principal_state(&record)))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/rbac/reload",
    tag = "rbac",
    responses((status = 204), (status = 500, body = crate::api::types::ErrorResponse))
)]
/// Rebuild the policy view from the policy store, picking up rows written
/// by other instances or by hand.
pub async fn reload_policies(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state
        .registry
        .reload()
        .await
        .map_err(|err| api_authz("failed to reload policies", &err))?;
    record_mutation("reload");
    Ok(StatusCode::NO_CONTENT)
}
