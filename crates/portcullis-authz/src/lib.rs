//! Portcullis authorization primitives shared by the gateway service.
//!
//! # Purpose
//! Holds everything the gateway decides with, without any network I/O: the
//! resource vocabulary, the Casbin-backed policy engine with its role
//! registry, bearer tokens, the revocation check, and fixed-window math.
//!
//! # How it fits
//! The gateway injects a [`PolicyStore`] backend, loads a [`PolicyEngine`]
//! from it, and wraps the engine in a [`RoleRegistry`]. Request middleware
//! verifies tokens with [`TokenVerifier`], checks them against an
//! [`AuthState`] with [`check_claims`], then asks the registry for a verdict.
//!
//! # Key invariants
//! - Objects, actions and role names are normalized before they are stored
//!   or matched.
//! - Engine mutations persist before they become visible.
//! - Policies only allow; there are no deny rules.
//!
//! # Examples
//! ```rust
//! use portcullis_authz::{MemoryPolicyStore, PolicyEngine, PrincipalId, RoleRegistry};
//! use std::sync::Arc;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let engine = PolicyEngine::load(Arc::new(MemoryPolicyStore::new())).await.unwrap();
//! let registry = RoleRegistry::new(Arc::new(engine));
//! registry.grant_role_policy("catalog", "/admin/products/:id", "GET").await.unwrap();
//! let admin = PrincipalId::admin(42);
//! registry.set_admin_roles(&admin, &["catalog".to_string()]).await.unwrap();
//! assert!(registry.authorize(&admin, "/api/v1/admin/products/7", "get").await.unwrap());
//! # });
//! ```
//!
//! # Common pitfalls
//! - `/admin/products/*` does not match `/admin/products`; grant both when a
//!   role needs the collection and its members.

mod auth_state;
mod builtin;
mod casbin_model;
mod engine;
mod errors;
mod normalize;
mod rate_limit;
mod reason;
mod registry;
mod store;
mod token;
mod types;

pub use auth_state::{AuthState, check_claims, is_stale_for};
pub use builtin::{BUILTIN_ROLES, BuiltinRole, FINANCE, OPERATIONS, READONLY_AUDITOR, SUPPORT, is_builtin};
pub use casbin_model::casbin_model;
pub use engine::{
    GROUPING_GROUP, GROUPING_MEMBER, POLICY_ACTION, POLICY_OBJECT, POLICY_SUBJECT, PolicyEngine,
};
pub use errors::{AuthzError, AuthzResult};
pub use normalize::{
    ANCHOR_ROLE, ANY_ACTION, API_PREFIX, ROLE_PREFIX, is_anchor, is_role, normalize_action,
    normalize_object, normalize_role,
};
pub use rate_limit::{WindowConfig, WindowDecision, retry_after};
pub use reason::RejectReason;
pub use registry::RoleRegistry;
pub use store::{MemoryPolicyStore, PolicyRecord, PolicyStore, PolicyStoreError};
pub use token::{
    Claims, TokenError, TokenIssuer, TokenVerifier, VerifiedClaims, now_epoch_seconds,
    parse_bearer,
};
pub use types::{GroupingRule, PolicyRule, PrincipalId, PrincipalKind};
