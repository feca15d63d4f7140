//! Gateway HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, layers the auth and rate-limit guards onto their
//! routes, and defines the shared state injected into handlers.
//!
//! # Notes
//! Guards run outermost first: authentication and policy checks, then the
//! rate limiter, then the handler.
use crate::api;
use crate::auth::{self, AuthValidator};
use crate::observability;
use crate::ratelimit::{self, IdentitySource, RateLimitGuard, RateLimiter};
use crate::store::IdentityStore;
use axum::Router;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post, put};
use portcullis_authz::RoleRegistry;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const ADMIN_REVOKE_SCOPE: &str = "admin_revoke";
pub const SELF_REVOKE_SCOPE: &str = "self_revoke";

#[derive(Clone)]
pub struct AppState {
    pub api_version: String,
    pub registry: RoleRegistry,
    pub validator: AuthValidator,
    pub identities: Arc<dyn IdentityStore>,
    pub limiter: Arc<RateLimiter>,
}

/// Put `routes` behind `require_admin`. `routes` must not be empty.
pub fn protect_admin(routes: Router<AppState>, state: &AppState) -> Router<AppState> {
    routes.route_layer(from_fn_with_state(state.clone(), auth::require_admin))
}

pub fn build_router(state: AppState) -> Router {
    build_router_with(state, Router::new())
}

/// Build the gateway router with extra application routes merged in.
///
/// Routes that need admin authorization should be wrapped with
/// [`protect_admin`] first.
pub fn build_router_with(state: AppState, extra: Router<AppState>) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| observability::http_request_span(request));

    let admin_revoke_limit = RateLimitGuard::new(
        state.limiter.clone(),
        ADMIN_REVOKE_SCOPE,
        IdentitySource::ClientIpAndBodyField("principal".to_string()),
    );
    let self_revoke_limit = RateLimitGuard::new(
        state.limiter.clone(),
        SELF_REVOKE_SCOPE,
        IdentitySource::ClientIp,
    );

    let admin = Router::new()
        .route(
            "/api/v1/admin/rbac/roles",
            get(api::rbac::list_roles).post(api::rbac::create_role),
        )
        .route(
            "/api/v1/admin/rbac/roles/:role",
            delete(api::rbac::delete_role),
        )
        .route(
            "/api/v1/admin/rbac/roles/:role/policies",
            get(api::rbac::get_role_policies)
                .post(api::rbac::grant_role_policy)
                .delete(api::rbac::revoke_role_policy),
        )
        .route(
            "/api/v1/admin/rbac/roles/:role/parents",
            post(api::rbac::add_role_parent),
        )
        .route(
            "/api/v1/admin/rbac/roles/:role/parents/:parent",
            delete(api::rbac::remove_role_parent),
        )
        .route(
            "/api/v1/admin/rbac/principals/:principal/roles",
            get(api::rbac::get_principal_roles).put(api::rbac::set_principal_roles),
        )
        .route(
            "/api/v1/admin/rbac/principals/:principal/policies",
            get(api::rbac::get_principal_policies),
        )
        .route(
            "/api/v1/admin/rbac/principals/:principal/disabled",
            put(api::rbac::set_principal_disabled),
        )
        .route(
            "/api/v1/admin/rbac/reload",
            post(api::rbac::reload_policies),
        )
        .route(
            "/api/v1/admin/rbac/sessions/revoke",
            post(api::rbac::revoke_principal_sessions)
                .route_layer(from_fn_with_state(admin_revoke_limit, ratelimit::rate_limit)),
        );
    let admin = protect_admin(admin, &state);

    let sessions = Router::new()
        .route(
            "/api/v1/sessions/revoke",
            post(api::sessions::revoke_own_sessions)
                .route_layer(from_fn_with_state(self_revoke_limit, ratelimit::rate_limit)),
        )
        .route_layer(from_fn_with_state(state.clone(), auth::require_principal));

    Router::new()
        .route("/api/v1/system/info", get(api::system::system_info))
        .route("/api/v1/system/health", get(api::system::system_health))
        .route("/api/v1/openapi.json", get(api::openapi::openapi_json))
        .merge(admin)
        .merge(sessions)
        .merge(extra)
        .layer(trace_layer)
        .with_state(state)
}
