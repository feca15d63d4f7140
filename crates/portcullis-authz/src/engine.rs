//! In-memory policy evaluator over a durable [`PolicyStore`].
//!
//! # Purpose and responsibility
//! Owns the Casbin enforcer holding every allow-rule and grouping edge, plus
//! the explicit set of existing roles, and answers
//! `enforce(subject, object, action)` on the request hot path.
//!
//! # Key invariants
//! - The engine is the only mutator of its materialization; every mutation is
//!   written to the store first and applied in memory only after the store
//!   accepted it. A failed write leaves memory untouched.
//! - One `RwLock` guards the whole materialization: many concurrent
//!   `enforce` calls, mutations exclusive against reads and each other, so a
//!   reader never observes a half-applied change.
//! - Mutations are idempotent and report whether anything changed.
//!
//! # Matching
//! A request is allowed when a stored policy's subject is the request subject
//! or reachable from it through grouping edges, its object matches under
//! `keyMatch2` (`:name` matches one segment, `/*` matches any suffix), and its
//! action equals the request action or is `*`.
use crate::casbin_model::casbin_model;
use crate::normalize::{ANCHOR_ROLE, normalize_action, normalize_object, validate_object};
use crate::store::{PolicyRecord, PolicyStore};
use crate::types::{GroupingRule, PolicyRule};
use crate::{AuthzError, AuthzResult};
use casbin::{CoreApi, Enforcer, MemoryAdapter, MgmtApi};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Field positions for filtered policy lookups.
pub const POLICY_SUBJECT: usize = 0;
pub const POLICY_OBJECT: usize = 1;
pub const POLICY_ACTION: usize = 2;

/// Field positions for filtered grouping lookups.
pub const GROUPING_MEMBER: usize = 0;
pub const GROUPING_GROUP: usize = 1;

struct EngineState {
    enforcer: Enforcer,
    roles: BTreeSet<String>,
}

impl EngineState {
    async fn insert_grouping(
        &mut self,
        store: &dyn PolicyStore,
        rule: &GroupingRule,
    ) -> AuthzResult<bool> {
        if self.enforcer.has_grouping_policy(rule.to_fields()) {
            return Ok(false);
        }
        store.insert(&PolicyRecord::Grouping(rule.clone())).await?;
        let added = self.enforcer.add_grouping_policy(rule.to_fields()).await?;
        tracing::debug!(member = %rule.member, group = %rule.group, "grouping added");
        Ok(added)
    }

    async fn delete_grouping(
        &mut self,
        store: &dyn PolicyStore,
        rule: &GroupingRule,
    ) -> AuthzResult<bool> {
        if !self.enforcer.has_grouping_policy(rule.to_fields()) {
            return Ok(false);
        }
        store.delete(&PolicyRecord::Grouping(rule.clone())).await?;
        let removed = self
            .enforcer
            .remove_grouping_policy(rule.to_fields())
            .await?;
        tracing::debug!(member = %rule.member, group = %rule.group, "grouping removed");
        Ok(removed)
    }

    async fn insert_role(&mut self, store: &dyn PolicyStore, role: &str) -> AuthzResult<bool> {
        if self.roles.contains(role) {
            return Ok(false);
        }
        store.insert(&PolicyRecord::Role(role.to_string())).await?;
        self.roles.insert(role.to_string());
        Ok(true)
    }
}

pub struct PolicyEngine {
    store: Arc<dyn PolicyStore>,
    state: RwLock<EngineState>,
}

impl PolicyEngine {
    /// Build an engine by bulk-loading every row from `store`.
    ///
    /// # Errors
    /// - Store read failures and Casbin model/insert errors.
    pub async fn load(store: Arc<dyn PolicyStore>) -> AuthzResult<Self> {
        let state = materialize(store.as_ref()).await?;
        Ok(Self {
            store,
            state: RwLock::new(state),
        })
    }

    /// Re-read the store and replace the in-memory materialization.
    ///
    /// The write lock is held for the whole reload so no mutation can land
    /// between the read and the swap.
    pub async fn reload(&self) -> AuthzResult<()> {
        let mut state = self.state.write().await;
        *state = materialize(self.store.as_ref()).await?;
        tracing::info!(roles = state.roles.len(), "policy engine reloaded");
        Ok(())
    }

    pub async fn enforce(&self, subject: &str, object: &str, action: &str) -> AuthzResult<bool> {
        let object = normalize_object(object);
        let action = normalize_action(action);
        if subject.trim().is_empty() || action.is_empty() {
            return Ok(false);
        }
        let state = self.state.read().await;
        Ok(state
            .enforcer
            .enforce((subject, object.as_str(), action.as_str()))?)
    }

    pub async fn add_policy(&self, rule: PolicyRule) -> AuthzResult<bool> {
        let rule = canonical_policy(rule)?;
        let mut state = self.state.write().await;
        if state.enforcer.has_policy(rule.to_fields()) {
            return Ok(false);
        }
        self.store
            .insert(&PolicyRecord::Policy(rule.clone()))
            .await?;
        let added = state.enforcer.add_policy(rule.to_fields()).await?;
        tracing::debug!(subject = %rule.subject, object = %rule.object, action = %rule.action, "policy added");
        Ok(added)
    }

    pub async fn remove_policy(&self, rule: PolicyRule) -> AuthzResult<bool> {
        let rule = canonical_policy(rule)?;
        let mut state = self.state.write().await;
        if !state.enforcer.has_policy(rule.to_fields()) {
            return Ok(false);
        }
        self.store
            .delete(&PolicyRecord::Policy(rule.clone()))
            .await?;
        let removed = state.enforcer.remove_policy(rule.to_fields()).await?;
        tracing::debug!(subject = %rule.subject, object = %rule.object, action = %rule.action, "policy removed");
        Ok(removed)
    }

    pub async fn add_grouping(&self, rule: GroupingRule) -> AuthzResult<bool> {
        let rule = canonical_grouping(rule)?;
        let mut state = self.state.write().await;
        state.insert_grouping(self.store.as_ref(), &rule).await
    }

    pub async fn remove_grouping(&self, rule: GroupingRule) -> AuthzResult<bool> {
        let rule = canonical_grouping(rule)?;
        let mut state = self.state.write().await;
        state.delete_grouping(self.store.as_ref(), &rule).await
    }

    /// Make `groups` the exact set of direct groups of `member`, creating each
    /// group in the role set when missing.
    ///
    /// Runs under a single write lock, so concurrent replacements for the same
    /// member apply one after the other and never interleave. A store failure
    /// part way through leaves the rows already written in both store and
    /// memory. Returns whether anything changed.
    pub async fn replace_groups(
        &self,
        member: &str,
        groups: &BTreeSet<String>,
    ) -> AuthzResult<bool> {
        let wanted = groups
            .iter()
            .map(|group| canonical_grouping(GroupingRule::new(member, group.as_str())))
            .collect::<AuthzResult<Vec<_>>>()?;
        let member = member.trim();
        if member.is_empty() {
            return Err(AuthzError::InvalidPrincipal(member.to_string()));
        }
        reject_anchor(member)?;
        let keep: BTreeSet<&str> = wanted.iter().map(|rule| rule.group.as_str()).collect();

        let mut state = self.state.write().await;
        let current = to_groupings(
            state
                .enforcer
                .get_filtered_grouping_policy(GROUPING_MEMBER, vec![member.to_string()]),
        );
        let mut changed = false;
        for rule in current {
            if !keep.contains(rule.group.as_str()) {
                changed |= state.delete_grouping(self.store.as_ref(), &rule).await?;
            }
        }
        for rule in &wanted {
            changed |= state.insert_role(self.store.as_ref(), &rule.group).await?;
            changed |= state.insert_grouping(self.store.as_ref(), rule).await?;
        }
        Ok(changed)
    }

    /// Record that `role` exists. Expects a canonical role name.
    pub async fn add_role(&self, role: &str) -> AuthzResult<bool> {
        reject_anchor(role)?;
        let mut state = self.state.write().await;
        state.insert_role(self.store.as_ref(), role).await
    }

    pub async fn remove_role(&self, role: &str) -> AuthzResult<bool> {
        reject_anchor(role)?;
        let mut state = self.state.write().await;
        if !state.roles.contains(role) {
            return Ok(false);
        }
        self.store
            .delete(&PolicyRecord::Role(role.to_string()))
            .await?;
        state.roles.remove(role);
        Ok(true)
    }

    pub async fn has_role(&self, role: &str) -> bool {
        self.state.read().await.roles.contains(role)
    }

    /// Roles recorded in the role set, sorted.
    pub async fn role_set(&self) -> Vec<String> {
        self.state.read().await.roles.iter().cloned().collect()
    }

    pub async fn policies(&self) -> Vec<PolicyRule> {
        let state = self.state.read().await;
        to_policies(state.enforcer.get_policy())
    }

    pub async fn groupings(&self) -> Vec<GroupingRule> {
        let state = self.state.read().await;
        to_groupings(state.enforcer.get_grouping_policy())
    }

    pub async fn filtered_policies(
        &self,
        field_index: usize,
        values: Vec<String>,
    ) -> Vec<PolicyRule> {
        let state = self.state.read().await;
        to_policies(state.enforcer.get_filtered_policy(field_index, values))
    }

    pub async fn filtered_groupings(
        &self,
        field_index: usize,
        values: Vec<String>,
    ) -> Vec<GroupingRule> {
        let state = self.state.read().await;
        to_groupings(
            state
                .enforcer
                .get_filtered_grouping_policy(field_index, values),
        )
    }

    pub async fn policies_for_subject(&self, subject: &str) -> Vec<PolicyRule> {
        self.filtered_policies(POLICY_SUBJECT, vec![subject.to_string()])
            .await
    }

    /// Groups `member` belongs to directly.
    pub async fn roles_for(&self, member: &str) -> Vec<String> {
        self.filtered_groupings(GROUPING_MEMBER, vec![member.to_string()])
            .await
            .into_iter()
            .map(|rule| rule.group)
            .collect()
    }

    /// Every group reachable from `subject` through grouping edges, excluding
    /// `subject` itself.
    pub async fn implicit_roles_for(&self, subject: &str) -> Vec<String> {
        let state = self.state.read().await;
        reachable_groups(&state.enforcer, subject)
    }

    /// Policies granted to `subject` directly or through any reachable group.
    pub async fn implicit_policies_for(&self, subject: &str) -> Vec<PolicyRule> {
        let state = self.state.read().await;
        let mut subjects = vec![subject.to_string()];
        subjects.extend(reachable_groups(&state.enforcer, subject));
        let mut rules = Vec::new();
        for subject in subjects {
            rules.extend(to_policies(
                state
                    .enforcer
                    .get_filtered_policy(POLICY_SUBJECT, vec![subject]),
            ));
        }
        rules
    }
}

async fn materialize(store: &dyn PolicyStore) -> AuthzResult<EngineState> {
    let records = store.load_all().await?;
    let model = casbin_model().await?;
    let mut enforcer = Enforcer::new(model, MemoryAdapter::default()).await?;
    let mut roles = BTreeSet::new();
    let (mut policies, mut groupings) = (0usize, 0usize);
    for record in records {
        match record {
            PolicyRecord::Role(role) => {
                roles.insert(role);
            }
            PolicyRecord::Policy(rule) => {
                // Rows written around the API may hold objects the matcher
                // cannot compile.
                if let Err(err) = validate_object(&rule.object) {
                    tracing::warn!(subject = %rule.subject, error = %err, "skipping stored policy");
                    continue;
                }
                enforcer.add_policy(rule.to_fields()).await?;
                policies += 1;
            }
            PolicyRecord::Grouping(rule) => {
                enforcer.add_grouping_policy(rule.to_fields()).await?;
                groupings += 1;
            }
        }
    }
    enforcer.build_role_links()?;
    tracing::debug!(
        roles = roles.len(),
        policies,
        groupings,
        "policy engine materialized"
    );
    Ok(EngineState { enforcer, roles })
}

fn reachable_groups(enforcer: &Enforcer, subject: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    seen.insert(subject.to_string());
    let mut queue = VecDeque::from([subject.to_string()]);
    let mut groups = Vec::new();
    while let Some(member) = queue.pop_front() {
        for edge in enforcer.get_filtered_grouping_policy(GROUPING_MEMBER, vec![member]) {
            let Some(rule) = GroupingRule::from_fields(&edge) else {
                continue;
            };
            if seen.insert(rule.group.clone()) {
                groups.push(rule.group.clone());
                queue.push_back(rule.group);
            }
        }
    }
    groups
}

fn canonical_policy(rule: PolicyRule) -> AuthzResult<PolicyRule> {
    let subject = rule.subject.trim().to_string();
    if subject.is_empty() {
        return Err(AuthzError::InvalidPrincipal(rule.subject));
    }
    reject_anchor(&subject)?;
    let action = normalize_action(&rule.action);
    if action.is_empty() {
        return Err(AuthzError::EmptyAction);
    }
    let object = normalize_object(&rule.object);
    validate_object(&object)?;
    Ok(PolicyRule {
        subject,
        object,
        action,
    })
}

fn canonical_grouping(rule: GroupingRule) -> AuthzResult<GroupingRule> {
    let member = rule.member.trim().to_string();
    let group = rule.group.trim().to_string();
    if member.is_empty() {
        return Err(AuthzError::InvalidPrincipal(rule.member));
    }
    if group.is_empty() {
        return Err(AuthzError::InvalidRole(rule.group));
    }
    reject_anchor(&member)?;
    reject_anchor(&group)?;
    Ok(GroupingRule { member, group })
}

fn reject_anchor(name: &str) -> AuthzResult<()> {
    if name == ANCHOR_ROLE {
        return Err(AuthzError::ReservedRole(name.to_string()));
    }
    Ok(())
}

fn to_policies(rows: Vec<Vec<String>>) -> Vec<PolicyRule> {
    rows.iter()
        .filter_map(|fields| PolicyRule::from_fields(fields))
        .collect()
}

fn to_groupings(rows: Vec<Vec<String>>) -> Vec<GroupingRule> {
    rows.iter()
        .filter_map(|fields| GroupingRule::from_fields(fields))
        .collect()
}
