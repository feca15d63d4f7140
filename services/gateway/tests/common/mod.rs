#![allow(dead_code)]

use axum::Router;
use gateway::app::{AppState, build_router};
use gateway::auth::AuthValidator;
use gateway::ratelimit::RateLimiter;
use gateway::store::memory::{InMemoryAuthCache, InMemoryCounterStore, InMemoryIdentityStore};
use gateway::store::{CounterStore, IdentityStore, PrincipalRecord};
use portcullis_authz::{
    MemoryPolicyStore, PolicyEngine, PrincipalId, RoleRegistry, TokenIssuer, TokenVerifier,
    WindowConfig,
};
use std::sync::Arc;
use std::time::Duration;

pub const SECRET: &[u8] = b"integration-secret";
pub const SUPER_ADMIN: PrincipalId = PrincipalId {
    kind: portcullis_authz::PrincipalKind::Admin,
    id: 1,
};

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub struct Harness {
    pub state: AppState,
    pub identities: Arc<InMemoryIdentityStore>,
    pub policies: Arc<MemoryPolicyStore>,
    pub issuer: TokenIssuer,
}

pub struct HarnessOptions {
    pub secret: Option<&'static [u8]>,
    pub counters: Option<Arc<dyn CounterStore>>,
    pub window: WindowConfig,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            secret: Some(SECRET),
            counters: Some(Arc::new(InMemoryCounterStore::new())),
            window: WindowConfig::new(Duration::from_secs(60), 100),
        }
    }
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_options(HarnessOptions::default()).await
    }

    pub async fn with_options(options: HarnessOptions) -> Self {
        let policies = Arc::new(MemoryPolicyStore::new());
        let engine = PolicyEngine::load(policies.clone())
            .await
            .expect("engine");
        let registry = RoleRegistry::new(Arc::new(engine));
        registry.bootstrap_builtin_roles().await.expect("bootstrap");

        let identities = Arc::new(InMemoryIdentityStore::new());
        let validator = AuthValidator::new(
            Arc::new(TokenVerifier::new(options.secret, 0)),
            identities.clone(),
            Arc::new(InMemoryAuthCache::new()),
            Duration::from_secs(600),
            Duration::from_millis(250),
        );
        let limiter = RateLimiter::new(options.counters, options.window, Duration::from_millis(250));
        let state = AppState {
            api_version: "v1".to_string(),
            registry,
            validator,
            identities: identities.clone(),
            limiter: Arc::new(limiter),
        };
        let harness = Self {
            state,
            identities,
            policies,
            issuer: TokenIssuer::new(SECRET, Duration::from_secs(600)).expect("issuer"),
        };
        harness.add_principal(SUPER_ADMIN, true).await;
        harness
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    pub async fn add_principal(&self, principal: PrincipalId, is_super: bool) -> PrincipalId {
        let mut record = PrincipalRecord::new(principal);
        record.is_super = is_super;
        self.identities
            .upsert_principal(&record)
            .await
            .expect("upsert principal");
        principal
    }

    /// Mint a token against the principal's current credential version.
    pub async fn token(&self, principal: PrincipalId) -> String {
        let version = self
            .identities
            .get_principal(&principal)
            .await
            .expect("lookup")
            .map(|record| record.credential_version)
            .unwrap_or_default();
        self.issuer.mint(&principal, version).expect("mint")
    }
}
