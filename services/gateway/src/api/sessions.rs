//! Self-service session endpoints.
use crate::api::error::{ApiError, api_store};
use crate::api::rbac::principal_state;
use crate::api::types::PrincipalStateResponse;
use crate::app::AppState;
use crate::auth::AuthContext;
use axum::extract::{Extension, State};
use axum::Json;

#[utoipa::path(
    post,
    path = "/api/v1/sessions/revoke",
    tag = "sessions",
    responses(
        (status = 200, body = PrincipalStateResponse),
        (status = 401, body = crate::api::types::ErrorResponse),
        (status = 429, body = crate::api::types::ErrorResponse)
    )
)]
/// Sign the caller out everywhere, including the token used for this call.
pub async fn revoke_own_sessions(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<PrincipalStateResponse>, ApiError> {
    let record = state
        .validator
        .bump_credential_version(&context.principal)
        .await
        .map_err(|err| api_store("failed to revoke sessions", &err))?;
    Ok(Json(principal_state(&record)))
}
