//! Durable policy persistence interface.
//!
//! # Purpose
//! The policy engine materializes everything it knows from a [`PolicyStore`]
//! at startup and writes every mutation through it, row by row.
//!
//! # Key invariants
//! - `insert` and `delete` are idempotent at the row level: inserting an
//!   existing row or deleting a missing row succeeds without effect.
//! - `load_all` returns every row of every kind; ordering is not significant.
//!
//! Durable backends live in the gateway service; [`MemoryPolicyStore`] backs
//! tests and non-durable deployments.
use crate::types::{GroupingRule, PolicyRule};
use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum PolicyStoreError {
    #[error("policy store unavailable: {0}")]
    Unavailable(String),
    #[error("policy store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// One persisted row, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PolicyRecord {
    /// The role exists, with or without policies.
    Role(String),
    Policy(PolicyRule),
    Grouping(GroupingRule),
}

impl PolicyRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            PolicyRecord::Role(_) => "role",
            PolicyRecord::Policy(_) => "policy",
            PolicyRecord::Grouping(_) => "grouping",
        }
    }
}

#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<PolicyRecord>, PolicyStoreError>;
    async fn insert(&self, record: &PolicyRecord) -> Result<(), PolicyStoreError>;
    async fn delete(&self, record: &PolicyRecord) -> Result<(), PolicyStoreError>;
}

/// Non-durable policy store; all rows are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    rows: RwLock<BTreeSet<PolicyRecord>>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = PolicyRecord>) -> Self {
        Self {
            rows: RwLock::new(records.into_iter().collect()),
        }
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn load_all(&self) -> Result<Vec<PolicyRecord>, PolicyStoreError> {
        Ok(self.rows.read().await.iter().cloned().collect())
    }

    async fn insert(&self, record: &PolicyRecord) -> Result<(), PolicyStoreError> {
        self.rows.write().await.insert(record.clone());
        Ok(())
    }

    async fn delete(&self, record: &PolicyRecord) -> Result<(), PolicyStoreError> {
        self.rows.write().await.remove(record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_rows_are_idempotent() {
        let store = MemoryPolicyStore::new();
        let record = PolicyRecord::Policy(PolicyRule::new("role:ops", "/admin/*", "GET"));
        store.insert(&record).await.expect("insert");
        store.insert(&record).await.expect("insert again");
        assert_eq!(store.len().await, 1);

        store.delete(&record).await.expect("delete");
        store.delete(&record).await.expect("delete again");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn memory_store_loads_every_kind() {
        let store = MemoryPolicyStore::with_records([
            PolicyRecord::Role("role:ops".to_string()),
            PolicyRecord::Grouping(GroupingRule::new("admin:1", "role:ops")),
            PolicyRecord::Policy(PolicyRule::new("role:ops", "/admin/*", "GET")),
        ]);
        let mut kinds: Vec<_> = store
            .load_all()
            .await
            .expect("load")
            .iter()
            .map(PolicyRecord::kind)
            .collect();
        kinds.sort();
        assert_eq!(kinds, vec!["grouping", "policy", "role"]);
    }
}
