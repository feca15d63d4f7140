//! OpenAPI document for the gateway API, served at `/api/v1/openapi.json`.
use crate::api::{
    rbac, sessions, system,
    types::{
        ErrorResponse, HealthStatus, PolicyGrantRequest, PolicyListResponse, PolicyView,
        PrincipalDisabledRequest, PrincipalRolesRequest, PrincipalRolesResponse,
        PrincipalStateResponse, RoleCreateRequest, RoleListResponse, RoleParentRequest,
        RoleResponse, SessionRevokeRequest, SystemInfo,
    },
};
use axum::Json;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "portcullis-gateway",
        version = "v1",
        description = "Portcullis gateway HTTP API"
    ),
    paths(
        system::system_info,
        system::system_health,
        rbac::list_roles,
        rbac::create_role,
        rbac::delete_role,
        rbac::get_role_policies,
        rbac::grant_role_policy,
        rbac::revoke_role_policy,
        rbac::add_role_parent,
        rbac::remove_role_parent,
        rbac::get_principal_roles,
        rbac::set_principal_roles,
        rbac::get_principal_policies,
        rbac::set_principal_disabled,
        rbac::revoke_principal_sessions,
        rbac::reload_policies,
        sessions::revoke_own_sessions
    ),
    components(schemas(
        ErrorResponse,
        HealthStatus,
        SystemInfo,
        RoleCreateRequest,
        RoleResponse,
        RoleListResponse,
        PolicyGrantRequest,
        PolicyView,
        PolicyListResponse,
        RoleParentRequest,
        PrincipalRolesRequest,
        PrincipalRolesResponse,
        PrincipalDisabledRequest,
        PrincipalStateResponse,
        SessionRevokeRequest
    )),
    tags(
        (name = "system", description = "System and discovery endpoints"),
        (name = "rbac", description = "Role and policy administration"),
        (name = "sessions", description = "Session management")
    )
)]
pub struct ApiDoc;

pub(crate) async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
