use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_AUTH_CACHE_TTL_SECS: u64 = 600;
pub const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 250;
pub const DEFAULT_TOKEN_LEEWAY_SECS: u64 = 5;
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
pub const DEFAULT_RATE_LIMIT_MAX: u64 = 10;
pub const DEFAULT_POLICY_TABLE_PREFIX: &str = "rbac_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" | "pg" => Ok(StorageBackend::Postgres),
            other => bail!("unknown storage backend {other:?}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
    /// Prefix for the policy tables, e.g. `rbac_` gives `rbac_policies`.
    pub policy_table_prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max: u64,
}

// Gateway configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    pub metrics_bind: SocketAddr,
    /// HS256 secret; requests are rejected with `jwt_secret_missing` when unset.
    pub jwt_secret: Option<String>,
    pub token_leeway_secs: u64,
    pub auth_cache_ttl_secs: u64,
    /// Budget for every cache, identity-store and counter-store call.
    pub backend_timeout_ms: u64,
    pub storage: StorageBackend,
    pub postgres: Option<PostgresConfig>,
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    jwt_secret: Option<String>,
    token_leeway_secs: Option<u64>,
    auth_cache_ttl_secs: Option<u64>,
    backend_timeout_ms: Option<u64>,
    storage: Option<StorageBackend>,
    postgres: Option<PostgresOverride>,
    rate_limit: Option<RateLimitOverride>,
}

#[derive(Debug, Default, Deserialize)]
struct PostgresOverride {
    url: Option<String>,
    max_connections: Option<u32>,
    connect_timeout_ms: Option<u64>,
    acquire_timeout_ms: Option<u64>,
    policy_table_prefix: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitOverride {
    window_secs: Option<u64>,
    max: Option<u64>,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        let bind_addr = std::env::var("PORTCULLIS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .with_context(|| "parse PORTCULLIS_BIND")?;
        let metrics_bind = std::env::var("PORTCULLIS_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
            .parse()
            .with_context(|| "parse PORTCULLIS_METRICS_BIND")?;
        let jwt_secret = std::env::var("PORTCULLIS_JWT_SECRET")
            .ok()
            .filter(|secret| !secret.is_empty());
        let storage = std::env::var("PORTCULLIS_STORAGE")
            .unwrap_or_else(|_| "memory".to_string())
            .parse()
            .with_context(|| "parse PORTCULLIS_STORAGE")?;
        let postgres = match std::env::var("PORTCULLIS_PG_URL") {
            Ok(url) => Some(PostgresConfig {
                url,
                max_connections: env_or("PORTCULLIS_PG_MAX_CONNECTIONS", 10)?,
                connect_timeout_ms: env_or("PORTCULLIS_PG_CONNECT_TIMEOUT_MS", 5_000)?,
                acquire_timeout_ms: env_or("PORTCULLIS_PG_ACQUIRE_TIMEOUT_MS", 5_000)?,
                policy_table_prefix: std::env::var("PORTCULLIS_POLICY_TABLE_PREFIX")
                    .unwrap_or_else(|_| DEFAULT_POLICY_TABLE_PREFIX.to_string()),
            }),
            Err(_) => None,
        };
        let config = Self {
            bind_addr,
            metrics_bind,
            jwt_secret,
            token_leeway_secs: env_or("PORTCULLIS_TOKEN_LEEWAY_SECS", DEFAULT_TOKEN_LEEWAY_SECS)?,
            auth_cache_ttl_secs: env_or(
                "PORTCULLIS_AUTH_CACHE_TTL_SECS",
                DEFAULT_AUTH_CACHE_TTL_SECS,
            )?,
            backend_timeout_ms: env_or("PORTCULLIS_BACKEND_TIMEOUT_MS", DEFAULT_BACKEND_TIMEOUT_MS)?,
            storage,
            postgres,
            rate_limit: RateLimitConfig {
                window_secs: env_or(
                    "PORTCULLIS_RATE_LIMIT_WINDOW_SECS",
                    DEFAULT_RATE_LIMIT_WINDOW_SECS,
                )?,
                max: env_or("PORTCULLIS_RATE_LIMIT_MAX", DEFAULT_RATE_LIMIT_MAX)?,
            },
        };
        Ok(config)
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("PORTCULLIS_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read PORTCULLIS_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: GatewayConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse gateway config yaml")?;
        if let Some(value) = override_cfg.bind_addr {
            self.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
        }
        if let Some(value) = override_cfg.jwt_secret {
            self.jwt_secret = Some(value).filter(|secret| !secret.is_empty());
        }
        if let Some(value) = override_cfg.token_leeway_secs {
            self.token_leeway_secs = value;
        }
        if let Some(value) = override_cfg.auth_cache_ttl_secs {
            self.auth_cache_ttl_secs = value;
        }
        if let Some(value) = override_cfg.backend_timeout_ms {
            self.backend_timeout_ms = value;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = value;
        }
        if let Some(pg) = override_cfg.postgres {
            let base = self.postgres.take();
            let url = pg
                .url
                .or_else(|| base.as_ref().map(|base| base.url.clone()))
                .context("postgres.url missing")?;
            self.postgres = Some(PostgresConfig {
                url,
                max_connections: pg
                    .max_connections
                    .or(base.as_ref().map(|base| base.max_connections))
                    .unwrap_or(10),
                connect_timeout_ms: pg
                    .connect_timeout_ms
                    .or(base.as_ref().map(|base| base.connect_timeout_ms))
                    .unwrap_or(5_000),
                acquire_timeout_ms: pg
                    .acquire_timeout_ms
                    .or(base.as_ref().map(|base| base.acquire_timeout_ms))
                    .unwrap_or(5_000),
                policy_table_prefix: pg
                    .policy_table_prefix
                    .or(base.map(|base| base.policy_table_prefix))
                    .unwrap_or_else(|| DEFAULT_POLICY_TABLE_PREFIX.to_string()),
            });
        }
        if let Some(limit) = override_cfg.rate_limit {
            if let Some(value) = limit.window_secs {
                self.rate_limit.window_secs = value;
            }
            if let Some(value) = limit.max {
                self.rate_limit.max = value;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage == StorageBackend::Postgres && self.postgres.is_none() {
            bail!("postgres storage selected but PORTCULLIS_PG_URL is not set");
        }
        if self.backend_timeout_ms == 0 {
            bail!("backend_timeout_ms must be positive");
        }
        Ok(())
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn auth_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.auth_cache_ttl_secs)
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value.trim().parse().with_context(|| format!("parse {key}")),
        Err(_) => Ok(default),
    }
}
