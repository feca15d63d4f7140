//! Token validation against cached or authoritative auth state.
//!
//! # Purpose and responsibility
//! Turns an `Authorization` header into an authenticated principal: verifies
//! the token, finds the principal's revocation snapshot (cache first, then the
//! identity store), and runs the single claims-vs-state check.
//!
//! # Key invariants
//! - The identity store decides; the cache only saves round trips and may lag
//!   by at most its TTL.
//! - A snapshot older than the token's credential version is never trusted.
//! - Cache failures and timeouts fall through to the identity store; cache
//!   writes never fail a request.
//! - A background fill never replaces a snapshot written by a revocation.
//! - Every backend call is bounded by the configured timeout.
use crate::store::{AuthStateCache, IdentityStore, PrincipalRecord, StoreError};
use portcullis_authz::{
    AuthState, PrincipalId, RejectReason, TokenVerifier, VerifiedClaims, check_claims,
    is_stale_for, now_epoch_seconds,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStateSource {
    FromCache,
    FromStore,
}

impl AuthStateSource {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthStateSource::FromCache => "cache",
            AuthStateSource::FromStore => "store",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAuthState {
    pub state: AuthState,
    pub source: AuthStateSource,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("principal {0} not found")]
    NotFound(PrincipalId),
    #[error("identity store unavailable: {0}")]
    Unavailable(String),
}

/// Why authentication failed, with whether the cause was an outage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthFailure {
    pub reason: RejectReason,
    /// Set when a backend outage, not the credential, caused the rejection.
    pub unavailable: bool,
}

impl From<RejectReason> for AuthFailure {
    fn from(reason: RejectReason) -> Self {
        Self {
            reason,
            unavailable: false,
        }
    }
}

impl From<ResolveError> for AuthFailure {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(_) => RejectReason::TokenInvalid.into(),
            ResolveError::Unavailable(_) => Self {
                reason: RejectReason::Unauthorized,
                unavailable: true,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    pub claims: VerifiedClaims,
    pub state: AuthState,
    pub source: AuthStateSource,
}

#[derive(Clone)]
pub struct AuthValidator {
    verifier: Arc<TokenVerifier>,
    identities: Arc<dyn IdentityStore>,
    cache: Arc<dyn AuthStateCache>,
    cache_ttl: Duration,
    timeout: Duration,
}

impl AuthValidator {
    pub fn new(
        verifier: Arc<TokenVerifier>,
        identities: Arc<dyn IdentityStore>,
        cache: Arc<dyn AuthStateCache>,
        cache_ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            verifier,
            identities,
            cache,
            cache_ttl,
            timeout,
        }
    }

    pub fn identities(&self) -> &Arc<dyn IdentityStore> {
        &self.identities
    }

    pub async fn authenticate(&self, header: Option<&str>) -> Result<Authenticated, AuthFailure> {
        let claims = self
            .verifier
            .authenticate(header)
            .map_err(|err| {
                tracing::debug!(error = %err, "token rejected");
                AuthFailure::from(err.reason())
            })?;
        let resolved = self.resolve_auth_state(&claims).await.map_err(|err| {
            match &err {
                ResolveError::NotFound(principal) => {
                    tracing::debug!(%principal, "token for unknown principal")
                }
                ResolveError::Unavailable(detail) => {
                    tracing::error!(error = %detail, "identity store unavailable")
                }
            }
            AuthFailure::from(err)
        })?;
        check_claims(&claims, &resolved.state)?;
        Ok(Authenticated {
            claims,
            state: resolved.state,
            source: resolved.source,
        })
    }

    /// Find the auth state for the token's principal.
    ///
    /// A cache hit is used unless the claims prove it stale. Misses, stale
    /// hits, cache errors and cache timeouts go to the identity store, whose
    /// answer is written back to the cache in the background.
    pub async fn resolve_auth_state(
        &self,
        claims: &VerifiedClaims,
    ) -> Result<ResolvedAuthState, ResolveError> {
        let principal = claims.principal;
        match tokio::time::timeout(self.timeout, self.cache.get(&principal)).await {
            Ok(Ok(Some(state))) if !is_stale_for(claims, &state) => {
                metrics::counter!("portcullis_auth_state_lookups_total", "source" => "cache")
                    .increment(1);
                return Ok(ResolvedAuthState {
                    state,
                    source: AuthStateSource::FromCache,
                });
            }
            Ok(Ok(Some(state))) => {
                tracing::debug!(
                    %principal,
                    cached_version = state.credential_version,
                    token_version = claims.credential_version,
                    "cached auth state is stale"
                );
            }
            Ok(Ok(None)) => {}
            Ok(Err(err)) => {
                tracing::warn!(%principal, error = %err, "auth cache read failed");
            }
            Err(_) => {
                tracing::warn!(%principal, "auth cache read timed out");
            }
        }

        let record = match tokio::time::timeout(
            self.timeout,
            self.identities.get_principal(&principal),
        )
        .await
        {
            Ok(Ok(Some(record))) => record,
            Ok(Ok(None)) => {
                metrics::counter!("portcullis_auth_state_lookups_total", "source" => "store_miss")
                    .increment(1);
                return Err(ResolveError::NotFound(principal));
            }
            Ok(Err(err)) => return Err(ResolveError::Unavailable(err.to_string())),
            Err(_) => return Err(ResolveError::Unavailable("timed out".to_string())),
        };
        metrics::counter!("portcullis_auth_state_lookups_total", "source" => "store")
            .increment(1);
        let state = record.to_auth_state(now_epoch_seconds());
        self.spawn_cache_fill(state.clone());
        Ok(ResolvedAuthState {
            state,
            source: AuthStateSource::FromStore,
        })
    }

    fn spawn_cache_fill(&self, state: AuthState) {
        let cache = self.cache.clone();
        let ttl = self.cache_ttl;
        let timeout = self.timeout;
        tokio::spawn(async move {
            let principal = state.principal;
            let failure = match tokio::time::timeout(timeout, cache.fill(&state, ttl)).await {
                Ok(Ok(_)) => return,
                Ok(Err(err)) => err.to_string(),
                Err(_) => "timed out".to_string(),
            };
            record_cache_write_failure(&principal, &failure);
        });
    }

    /// Overwrite the cached snapshot with a fresh identity row.
    pub async fn refresh_cache(&self, record: &PrincipalRecord) {
        let state = record.to_auth_state(now_epoch_seconds());
        write_cache(self.cache.as_ref(), &state, self.cache_ttl, self.timeout).await;
    }

    /// Revoke every token issued so far for `principal`.
    pub async fn bump_credential_version(
        &self,
        principal: &PrincipalId,
    ) -> Result<PrincipalRecord, StoreError> {
        let record = self
            .bounded(self.identities.bump_credential_version(principal))
            .await?;
        tracing::info!(%principal, version = record.credential_version, "credentials rotated");
        self.refresh_cache(&record).await;
        Ok(record)
    }

    pub async fn invalidate_before(
        &self,
        principal: &PrincipalId,
        cutoff_unix: i64,
    ) -> Result<PrincipalRecord, StoreError> {
        let record = self
            .bounded(self.identities.invalidate_before(principal, cutoff_unix))
            .await?;
        tracing::info!(%principal, cutoff_unix, "tokens invalidated");
        self.refresh_cache(&record).await;
        Ok(record)
    }

    pub async fn set_disabled(
        &self,
        principal: &PrincipalId,
        disabled: bool,
    ) -> Result<PrincipalRecord, StoreError> {
        let record = self
            .bounded(self.identities.set_disabled(principal, disabled))
            .await?;
        tracing::info!(%principal, disabled, "principal disabled flag changed");
        self.refresh_cache(&record).await;
        Ok(record)
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| StoreError::Unexpected(anyhow::anyhow!("identity store timed out")))?
    }
}

async fn write_cache(cache: &dyn AuthStateCache, state: &AuthState, ttl: Duration, timeout: Duration) {
    let failure = match tokio::time::timeout(timeout, cache.put(state, ttl)).await {
        Ok(Ok(())) => return,
        Ok(Err(err)) => err.to_string(),
        Err(_) => "timed out".to_string(),
    };
    record_cache_write_failure(&state.principal, &failure);
}

fn record_cache_write_failure(principal: &PrincipalId, failure: &str) {
    tracing::warn!(%principal, error = %failure, "auth cache write failed");
    metrics::counter!("portcullis_auth_cache_write_failures_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CacheError;
    use crate::store::memory::{InMemoryAuthCache, InMemoryIdentityStore};
    use async_trait::async_trait;
    use portcullis_authz::TokenIssuer;

    const SECRET: &[u8] = b"validator-secret";

    struct BrokenCache;

    #[async_trait]
    impl AuthStateCache for BrokenCache {
        async fn get(&self, _: &PrincipalId) -> Result<Option<AuthState>, CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }

        async fn put(&self, _: &AuthState, _: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }

        async fn fill(&self, _: &AuthState, _: Duration) -> Result<bool, CacheError> {
            Err(CacheError::Unavailable("down".to_string()))
        }
    }

    struct HangingCache;

    #[async_trait]
    impl AuthStateCache for HangingCache {
        async fn get(&self, _: &PrincipalId) -> Result<Option<AuthState>, CacheError> {
            std::future::pending().await
        }

        async fn put(&self, _: &AuthState, _: Duration) -> Result<(), CacheError> {
            std::future::pending().await
        }

        async fn fill(&self, _: &AuthState, _: Duration) -> Result<bool, CacheError> {
            std::future::pending().await
        }
    }

    struct Fixture {
        issuer: TokenIssuer,
        identities: Arc<InMemoryIdentityStore>,
        cache: Arc<InMemoryAuthCache>,
        validator: AuthValidator,
    }

    async fn fixture_with(cache: Option<Arc<dyn AuthStateCache>>) -> Fixture {
        let identities = Arc::new(InMemoryIdentityStore::new());
        let memory_cache = Arc::new(InMemoryAuthCache::new());
        let cache = cache.unwrap_or_else(|| memory_cache.clone());
        let validator = AuthValidator::new(
            Arc::new(TokenVerifier::new(Some(SECRET), 0)),
            identities.clone(),
            cache,
            Duration::from_secs(600),
            Duration::from_millis(50),
        );
        identities
            .upsert_principal(&PrincipalRecord::new(PrincipalId::admin(1)))
            .await
            .unwrap();
        Fixture {
            issuer: TokenIssuer::new(SECRET, Duration::from_secs(600)).unwrap(),
            identities,
            cache: memory_cache,
            validator,
        }
    }

    fn bearer(fixture: &Fixture, principal: PrincipalId, version: u64) -> String {
        format!("Bearer {}", fixture.issuer.mint(&principal, version).unwrap())
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let fixture = fixture_with(None).await;
        let header = bearer(&fixture, PrincipalId::admin(1), 0);
        let first = fixture
            .validator
            .authenticate(Some(&header))
            .await
            .expect("authenticated");
        assert_eq!(first.source, AuthStateSource::FromStore);
        settle().await;
        assert_eq!(fixture.cache.len(), 1);

        let second = fixture
            .validator
            .authenticate(Some(&header))
            .await
            .expect("authenticated");
        assert_eq!(second.source, AuthStateSource::FromCache);
    }

    #[tokio::test]
    async fn unknown_principal_is_token_invalid() {
        let fixture = fixture_with(None).await;
        let header = bearer(&fixture, PrincipalId::admin(404), 0);
        let failure = fixture
            .validator
            .authenticate(Some(&header))
            .await
            .expect_err("unknown");
        assert_eq!(failure.reason, RejectReason::TokenInvalid);
        assert!(!failure.unavailable);
    }

    #[tokio::test]
    async fn bumped_version_revokes_and_refreshes_cache() {
        let fixture = fixture_with(None).await;
        let admin = PrincipalId::admin(1);
        let old = bearer(&fixture, admin, 0);
        fixture.validator.authenticate(Some(&old)).await.unwrap();
        settle().await;

        fixture
            .validator
            .bump_credential_version(&admin)
            .await
            .unwrap();
        let failure = fixture
            .validator
            .authenticate(Some(&old))
            .await
            .expect_err("revoked");
        assert_eq!(failure.reason, RejectReason::TokenRevoked);

        let fresh = bearer(&fixture, admin, 1);
        let ok = fixture.validator.authenticate(Some(&fresh)).await.unwrap();
        assert_eq!(ok.source, AuthStateSource::FromCache);
    }

    #[tokio::test]
    async fn stale_cache_entry_is_bypassed() {
        let fixture = fixture_with(None).await;
        let admin = PrincipalId::admin(1);
        fixture
            .cache
            .put(&AuthState::new(admin), Duration::from_secs(600))
            .await
            .unwrap();
        // Rotated elsewhere: the store is ahead of this instance's cache.
        fixture
            .identities
            .bump_credential_version(&admin)
            .await
            .unwrap();

        let fresh = bearer(&fixture, admin, 1);
        let ok = fixture.validator.authenticate(Some(&fresh)).await.unwrap();
        assert_eq!(ok.source, AuthStateSource::FromStore);
        assert_eq!(ok.state.credential_version, 1);
    }

    #[tokio::test]
    async fn disabled_principal_is_rejected() {
        let fixture = fixture_with(None).await;
        let admin = PrincipalId::admin(1);
        fixture.validator.set_disabled(&admin, true).await.unwrap();
        let failure = fixture
            .validator
            .authenticate(Some(&bearer(&fixture, admin, 0)))
            .await
            .expect_err("disabled");
        assert_eq!(failure.reason, RejectReason::UserDisabled);
    }

    #[tokio::test]
    async fn invalidate_before_revokes_older_tokens() {
        let fixture = fixture_with(None).await;
        let admin = PrincipalId::admin(1);
        let issued = now_epoch_seconds() - 100;
        let old = format!("Bearer {}", fixture.issuer.mint_at(&admin, 0, issued).unwrap());
        fixture
            .validator
            .invalidate_before(&admin, issued + 1)
            .await
            .unwrap();
        let failure = fixture
            .validator
            .authenticate(Some(&old))
            .await
            .expect_err("revoked");
        assert_eq!(failure.reason, RejectReason::TokenRevoked);
    }

    #[tokio::test]
    async fn broken_cache_falls_back_to_store() {
        let fixture = fixture_with(Some(Arc::new(BrokenCache))).await;
        let header = bearer(&fixture, PrincipalId::admin(1), 0);
        for _ in 0..2 {
            let ok = fixture.validator.authenticate(Some(&header)).await.unwrap();
            assert_eq!(ok.source, AuthStateSource::FromStore);
        }
    }

    #[tokio::test]
    async fn hanging_cache_times_out_to_store() {
        let fixture = fixture_with(Some(Arc::new(HangingCache))).await;
        let header = bearer(&fixture, PrincipalId::admin(1), 0);
        let ok = fixture.validator.authenticate(Some(&header)).await.unwrap();
        assert_eq!(ok.source, AuthStateSource::FromStore);
        // Revocation writes still complete even when the cache never answers.
        fixture
            .validator
            .bump_credential_version(&PrincipalId::admin(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn header_failures_map_to_reasons() {
        let fixture = fixture_with(None).await;
        let missing = fixture.validator.authenticate(None).await.unwrap_err();
        assert_eq!(missing.reason, RejectReason::AuthHeaderMissing);
        let malformed = fixture
            .validator
            .authenticate(Some("Token abc"))
            .await
            .unwrap_err();
        assert_eq!(malformed.reason, RejectReason::AuthHeaderInvalid);
    }
}
