//! HTTP API request/response types.
//!
//! # Purpose
//! Payload shapes for the gateway REST API and its OpenAPI document.
use portcullis_authz::PolicyRule;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthStatus {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SystemInfo {
    pub api_version: String,
    pub storage_backend: String,
    pub rate_limit_enabled: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleCreateRequest {
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleResponse {
    /// Canonical role name, e.g. `role:product_editor`.
    pub role: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RoleListResponse {
    pub items: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct PolicyGrantRequest {
    /// Route pattern such as `/admin/products/:id`; the `/api/v1` prefix is optional.
    pub object: String,
    /// HTTP verb or `*`.
    pub action: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq, Eq)]
pub struct PolicyView {
    pub subject: String,
    pub object: String,
    pub action: String,
}

impl From<PolicyRule> for PolicyView {
    fn from(rule: PolicyRule) -> Self {
        Self {
            subject: rule.subject,
            object: rule.object,
            action: rule.action,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PolicyListResponse {
    pub items: Vec<PolicyView>,
}

impl PolicyListResponse {
    pub fn from_rules(rules: Vec<PolicyRule>) -> Self {
        Self {
            items: rules.into_iter().map(PolicyView::from).collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleParentRequest {
    pub parent: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct PrincipalRolesRequest {
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PrincipalRolesResponse {
    pub principal: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct PrincipalDisabledRequest {
    pub disabled: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SessionRevokeRequest {
    /// Principal whose sessions end, e.g. `admin:42`.
    pub principal: String,
    /// Revoke only tokens issued before this unix time; omitted revokes all.
    #[serde(default)]
    pub before_unix: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PrincipalStateResponse {
    pub principal: String,
    pub credential_version: u64,
    pub invalid_before_unix: i64,
    pub disabled: bool,
}
