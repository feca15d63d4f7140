//! Storage seams for the gateway.
//!
//! # Purpose
//! Declares the identity store (source of truth for revocation state), the
//! auth-state cache, and the fixed-window counter store. Policy persistence
//! uses [`portcullis_authz::PolicyStore`], implemented here for Postgres.
//!
//! # Key invariants
//! - The identity store is authoritative; the auth-state cache never is.
//! - `CounterStore::incr_window` is a single atomic step per key.
use async_trait::async_trait;
use portcullis_authz::{AuthState, PrincipalId};
use std::time::Duration;
use thiserror::Error;

pub mod memory;
pub mod postgres;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Unexpected(anyhow::Error::new(err))
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        StoreError::Unexpected(anyhow::Error::new(err))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Identity row as kept by the identity store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalRecord {
    pub principal: PrincipalId,
    pub credential_version: u64,
    pub invalid_before_unix: i64,
    pub disabled: bool,
    pub is_super: bool,
}

impl PrincipalRecord {
    pub fn new(principal: PrincipalId) -> Self {
        Self {
            principal,
            credential_version: 0,
            invalid_before_unix: 0,
            disabled: false,
            is_super: false,
        }
    }

    /// Snapshot this row as cacheable auth state taken at `now_unix`.
    pub fn to_auth_state(&self, now_unix: i64) -> AuthState {
        AuthState {
            principal: self.principal,
            credential_version: self.credential_version,
            invalid_before_unix: self.invalid_before_unix,
            disabled: self.disabled,
            is_super: self.is_super,
            updated_at_unix: now_unix,
        }
    }
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get_principal(&self, principal: &PrincipalId) -> StoreResult<Option<PrincipalRecord>>;
    async fn upsert_principal(&self, record: &PrincipalRecord) -> StoreResult<()>;
    /// Invalidate every token minted so far by bumping the credential version.
    async fn bump_credential_version(&self, principal: &PrincipalId)
    -> StoreResult<PrincipalRecord>;
    /// Reject tokens issued before `cutoff_unix`.
    async fn invalidate_before(
        &self,
        principal: &PrincipalId,
        cutoff_unix: i64,
    ) -> StoreResult<PrincipalRecord>;
    async fn set_disabled(
        &self,
        principal: &PrincipalId,
        disabled: bool,
    ) -> StoreResult<PrincipalRecord>;
    async fn health_check(&self) -> StoreResult<()>;
    fn backend_name(&self) -> &'static str;
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("auth state cache unavailable: {0}")]
    Unavailable(String),
    #[error("auth state cache backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

/// Bounded-staleness mirror of identity rows.
#[async_trait]
pub trait AuthStateCache: Send + Sync {
    async fn get(&self, principal: &PrincipalId) -> Result<Option<AuthState>, CacheError>;
    /// Unconditionally store `state`; used after revocation writes.
    async fn put(&self, state: &AuthState, ttl: Duration) -> Result<(), CacheError>;
    /// Store `state` read on a cache miss, unless a live entry with the same
    /// or a newer credential version is already present. Returns whether it
    /// was written.
    async fn fill(&self, state: &AuthState, ttl: Duration) -> Result<bool, CacheError>;
}

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
    #[error("counter store backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

/// Result of one fixed-window increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Count after this increment.
    pub count: u64,
    /// Time left in the current window, when the backend reports it.
    pub ttl: Option<Duration>,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key`, starting a fresh window of length `window` when the
    /// previous one has expired.
    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount, CounterError>;
}
