//! In-memory identity store, auth-state cache and counter store.
//!
//! # Durability and consistency
//! - **Not durable**: all state is lost on process restart.
//! - **Per-process**: several gateway instances each hold their own cache and
//!   counters, so limits apply per instance. Shared deployments plug a shared
//!   backend in behind the same traits.
//!
//! Counter increments run under the DashMap shard lock for their key, which
//! makes each `incr_window` atomic. Expired counters are dropped by a sweep
//! that runs at most once per sweep interval, so increments stay O(1) even
//! when the map holds many live keys.
use super::{
    AuthStateCache, CacheError, CounterError, CounterStore, IdentityStore, PrincipalRecord,
    StoreError, StoreResult, WindowCount,
};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use portcullis_authz::{AuthState, PrincipalId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Expired counters are swept once the map grows past this many keys.
const COUNTER_SWEEP_THRESHOLD: usize = 10_000;
/// Minimum gap between two sweeps.
const COUNTER_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    principals: RwLock<HashMap<PrincipalId, PrincipalRecord>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update(
        &self,
        principal: &PrincipalId,
        apply: impl FnOnce(&mut PrincipalRecord),
    ) -> StoreResult<PrincipalRecord> {
        let mut principals = self.principals.write().await;
        let record = principals
            .get_mut(principal)
            .ok_or_else(|| StoreError::NotFound(principal.to_string()))?;
        apply(record);
        Ok(record.clone())
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn get_principal(&self, principal: &PrincipalId) -> StoreResult<Option<PrincipalRecord>> {
        Ok(self.principals.read().await.get(principal).cloned())
    }

    async fn upsert_principal(&self, record: &PrincipalRecord) -> StoreResult<()> {
        self.principals
            .write()
            .await
            .insert(record.principal, record.clone());
        Ok(())
    }

    async fn bump_credential_version(
        &self,
        principal: &PrincipalId,
    ) -> StoreResult<PrincipalRecord> {
        self.update(principal, |record| record.credential_version += 1)
            .await
    }

    async fn invalidate_before(
        &self,
        principal: &PrincipalId,
        cutoff_unix: i64,
    ) -> StoreResult<PrincipalRecord> {
        self.update(principal, |record| {
            record.invalid_before_unix = record.invalid_before_unix.max(cutoff_unix)
        })
        .await
    }

    async fn set_disabled(
        &self,
        principal: &PrincipalId,
        disabled: bool,
    ) -> StoreResult<PrincipalRecord> {
        self.update(principal, |record| record.disabled = disabled)
            .await
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[derive(Clone)]
struct CachedState {
    state: AuthState,
    expires_at: Instant,
}

#[derive(Default)]
pub struct InMemoryAuthCache {
    entries: DashMap<PrincipalId, CachedState>,
}

impl InMemoryAuthCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl AuthStateCache for InMemoryAuthCache {
    async fn get(&self, principal: &PrincipalId) -> Result<Option<AuthState>, CacheError> {
        let now = Instant::now();
        let hit = self.entries.get(principal).and_then(|entry| {
            if entry.expires_at > now {
                Some(entry.state.clone())
            } else {
                None
            }
        });
        if hit.is_none() {
            self.entries
                .remove_if(principal, |_, entry| entry.expires_at <= now);
        }
        Ok(hit)
    }

    async fn put(&self, state: &AuthState, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            state.principal,
            CachedState {
                state: state.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn fill(&self, state: &AuthState, ttl: Duration) -> Result<bool, CacheError> {
        let now = Instant::now();
        let fresh = CachedState {
            state: state.clone(),
            expires_at: now + ttl,
        };
        match self.entries.entry(state.principal) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                if current.expires_at > now
                    && current.state.credential_version >= state.credential_version
                {
                    return Ok(false);
                }
                entry.insert(fresh);
            }
            Entry::Vacant(entry) => {
                entry.insert(fresh);
            }
        }
        Ok(true)
    }
}

struct Window {
    count: u64,
    expires_at: Instant,
}

pub struct InMemoryCounterStore {
    windows: DashMap<String, Window>,
    started: Instant,
    sweep_interval: Duration,
    /// Milliseconds after `started` when the last sweep ran.
    last_sweep_ms: AtomicU64,
    sweeps: AtomicU64,
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::with_sweep_interval(COUNTER_SWEEP_INTERVAL)
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            started: Instant::now(),
            sweep_interval,
            last_sweep_ms: AtomicU64::new(0),
            sweeps: AtomicU64::new(0),
        }
    }

    /// Drop expired counters when the map is large and the last sweep is at
    /// least one interval old. Only one concurrent caller wins the slot.
    fn sweep_if_due(&self, now: Instant) -> bool {
        if self.windows.len() <= COUNTER_SWEEP_THRESHOLD {
            return false;
        }
        let now_ms = millis(now.saturating_duration_since(self.started));
        let last = self.last_sweep_ms.load(Ordering::Acquire);
        if now_ms.saturating_sub(last) < millis(self.sweep_interval) {
            return false;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let before = self.windows.len();
        self.windows.retain(|_, window| window.expires_at > now);
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            removed = before.saturating_sub(self.windows.len()),
            "expired rate limit counters swept"
        );
        true
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount, CounterError> {
        let now = Instant::now();
        self.sweep_if_due(now);
        let mut entry = self.windows.entry(key.to_string()).or_insert_with(|| Window {
            count: 0,
            expires_at: now + window,
        });
        if entry.expires_at <= now {
            *entry = Window {
                count: 0,
                expires_at: now + window,
            };
        }
        entry.count += 1;
        Ok(WindowCount {
            count: entry.count,
            ttl: Some(entry.expires_at.saturating_duration_since(now)),
        })
    }
}
