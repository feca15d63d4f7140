//! Fixed-window rate limiting for gateway routes.
//!
//! # Purpose
//! Counts requests per (route scope, caller identity) in a [`CounterStore`]
//! and turns the post-increment count into allow or reject.
//!
//! # Key invariants
//! - An unconfigured limiter (no store, or a zero window or maximum) allows
//!   everything without touching a store.
//! - A configured limiter whose store fails or times out rejects with
//!   `rate_limit_unavailable`.
pub mod identity;
pub mod middleware;

use crate::store::CounterStore;
use portcullis_authz::{RejectReason, WindowConfig, WindowDecision};
use std::sync::Arc;
use std::time::Duration;

pub use identity::IdentitySource;
pub use middleware::{RateLimitGuard, rate_limit};

const DEFAULT_KEY_PREFIX: &str = "rl";

pub struct RateLimiter {
    store: Option<Arc<dyn CounterStore>>,
    config: WindowConfig,
    timeout: Duration,
    prefix: String,
}

impl RateLimiter {
    pub fn new(store: Option<Arc<dyn CounterStore>>, config: WindowConfig, timeout: Duration) -> Self {
        Self {
            store,
            config,
            timeout,
            prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None, WindowConfig::new(Duration::ZERO, 0), Duration::ZERO)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some() && self.config.is_enabled()
    }

    pub fn config(&self) -> WindowConfig {
        self.config
    }

    pub fn key(&self, scope: &str, identity: &str) -> String {
        format!("{}:{}:{}", self.prefix, scope, identity)
    }

    /// Count one request for `identity` under `scope`.
    pub async fn check(&self, scope: &str, identity: &str) -> Result<WindowDecision, RejectReason> {
        let Some(store) = self.store.as_ref().filter(|_| self.config.is_enabled()) else {
            return Ok(WindowDecision::Allow {
                remaining: self.config.max,
            });
        };
        let key = self.key(scope, identity);
        match tokio::time::timeout(self.timeout, store.incr_window(&key, self.config.window)).await {
            Ok(Ok(counted)) => Ok(self.config.decide(counted.count, counted.ttl)),
            Ok(Err(err)) => {
                tracing::error!(error = %err, %key, "rate limit counter failed");
                Err(RejectReason::RateLimitUnavailable)
            }
            Err(_) => {
                tracing::error!(%key, "rate limit counter timed out");
                Err(RejectReason::RateLimitUnavailable)
            }
        }
    }
}
