//! Portcullis gateway entry point.
//!
//! # Purpose
//! Wires configuration, storage, the policy engine and the token validator,
//! bootstraps the built-in roles, then serves the API and `/metrics`.
//!
//! # Notes
//! `build_state` keeps the wiring testable and `main` small.
use anyhow::Context;
use gateway::app::{AppState, build_router};
use gateway::auth::AuthValidator;
use gateway::config::{self, GatewayConfig};
use gateway::observability;
use gateway::ratelimit::RateLimiter;
use gateway::store::memory::{InMemoryAuthCache, InMemoryCounterStore, InMemoryIdentityStore};
use gateway::store::postgres::PostgresStore;
use gateway::store::{CounterStore, IdentityStore};
use portcullis_authz::{
    MemoryPolicyStore, PolicyEngine, PolicyStore, RoleRegistry, TokenVerifier, WindowConfig,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env_or_yaml().context("gateway config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: GatewayConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability(observability::SERVICE_NAME)?;
    let state = build_state(&config).await?;
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let app = build_router(state);
    let addr = config.bind_addr;
    tracing::info!(%addr, storage = ?config.storage, "gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::pin!(shutdown);
    tokio::select! {
        result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        ) => {
            result?;
        }
        _ = &mut shutdown => {}
    }

    metrics_task.abort();
    let _ = metrics_task.await;
    Ok(())
}

async fn build_state(config: &GatewayConfig) -> anyhow::Result<AppState> {
    let (policies, identities, counters): (
        Arc<dyn PolicyStore>,
        Arc<dyn IdentityStore>,
        Arc<dyn CounterStore>,
    ) = match config.storage {
        config::StorageBackend::Memory => (
            Arc::new(MemoryPolicyStore::new()),
            Arc::new(InMemoryIdentityStore::new()),
            Arc::new(InMemoryCounterStore::new()),
        ),
        config::StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .context("postgres configuration missing")?;
            let store = Arc::new(PostgresStore::connect(pg).await?);
            (store.clone(), store.clone(), store)
        }
    };

    let engine = PolicyEngine::load(policies)
        .await
        .context("load policy engine")?;
    let registry = RoleRegistry::new(Arc::new(engine));
    registry
        .bootstrap_builtin_roles()
        .await
        .context("bootstrap built-in roles")?;

    let verifier = TokenVerifier::new(
        config.jwt_secret.as_deref().map(str::as_bytes),
        config.token_leeway_secs,
    );
    if !verifier.has_secret() {
        tracing::warn!("PORTCULLIS_JWT_SECRET is not set; authenticated routes will reject");
    }
    let validator = AuthValidator::new(
        Arc::new(verifier),
        identities.clone(),
        Arc::new(InMemoryAuthCache::new()),
        config.auth_cache_ttl(),
        config.backend_timeout(),
    );
    let limiter = RateLimiter::new(
        Some(counters),
        WindowConfig::new(
            Duration::from_secs(config.rate_limit.window_secs),
            config.rate_limit.max,
        ),
        config.backend_timeout(),
    );

    Ok(AppState {
        api_version: "v1".to_string(),
        registry,
        validator,
        identities,
        limiter: Arc::new(limiter),
    })
}
