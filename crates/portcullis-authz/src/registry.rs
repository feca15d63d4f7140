//! Role and assignment management on top of the [`PolicyEngine`].
//!
//! # Purpose and responsibility
//! Turns operator-level intents (create a role, grant it a route, assign
//! roles to an admin) into canonical engine rows, and answers the read-side
//! questions the administration API needs.
//!
//! # Key invariants
//! - Every role name passes through [`normalize_role`] before it reaches the
//!   engine; the reserved anchor is rejected before normalization.
//! - Built-in roles cannot be changed or deleted through the mutation methods;
//!   only [`RoleRegistry::bootstrap_builtin_roles`] writes them.
//! - Read results are sorted and de-duplicated.
use crate::builtin::{BUILTIN_ROLES, is_builtin};
use crate::engine::{GROUPING_GROUP, GROUPING_MEMBER, PolicyEngine};
use crate::normalize::{
    ANCHOR_ROLE, is_anchor, is_role, normalize_action, normalize_object, normalize_role,
    validate_object,
};
use crate::types::{GroupingRule, PolicyRule, PrincipalId};
use crate::{AuthzError, AuthzResult};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct RoleRegistry {
    engine: Arc<PolicyEngine>,
}

impl RoleRegistry {
    pub fn new(engine: Arc<PolicyEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<PolicyEngine> {
        &self.engine
    }

    /// Allow/deny for a principal on a raw route and verb.
    pub async fn authorize(
        &self,
        principal: &PrincipalId,
        object: &str,
        action: &str,
    ) -> AuthzResult<bool> {
        self.engine
            .enforce(&principal.subject(), object, action)
            .await
    }

    /// Create `name` if missing and return its canonical form.
    pub async fn ensure_role(&self, name: &str) -> AuthzResult<String> {
        let role = canonical_role(name)?;
        self.engine.add_role(&role).await?;
        Ok(role)
    }

    pub async fn grant_role_policy(
        &self,
        role: &str,
        object: &str,
        action: &str,
    ) -> AuthzResult<bool> {
        let rule = self.mutable_role_rule(role, object, action).await?;
        self.engine.add_policy(rule).await
    }

    pub async fn revoke_role_policy(
        &self,
        role: &str,
        object: &str,
        action: &str,
    ) -> AuthzResult<bool> {
        let rule = self.mutable_role_rule(role, object, action).await?;
        self.engine.remove_policy(rule).await
    }

    /// Make `role` inherit every policy of `parent`.
    pub async fn add_role_parent(&self, role: &str, parent: &str) -> AuthzResult<bool> {
        let (role, parent) = self.mutable_edge(role, parent)?;
        self.engine.add_role(&role).await?;
        self.engine.add_role(&parent).await?;
        self.engine
            .add_grouping(GroupingRule::new(role, parent))
            .await
    }

    pub async fn remove_role_parent(&self, role: &str, parent: &str) -> AuthzResult<bool> {
        let (role, parent) = self.mutable_edge(role, parent)?;
        self.engine
            .remove_grouping(GroupingRule::new(role, parent))
            .await
    }

    /// Remove a role with its policies, its parent edges, the edges of roles
    /// inheriting from it, and every principal assignment.
    ///
    /// Removal is best effort: rows deleted before a store failure stay
    /// deleted and the error is returned.
    pub async fn delete_role(&self, name: &str) -> AuthzResult<bool> {
        let role = canonical_role(name)?;
        if is_builtin(&role) {
            return Err(AuthzError::BuiltinRole(role));
        }
        let mut changed = false;
        for rule in self.engine.policies_for_subject(&role).await {
            changed |= self.engine.remove_policy(rule).await?;
        }
        for edge in self
            .engine
            .filtered_groupings(GROUPING_MEMBER, vec![role.clone()])
            .await
        {
            changed |= self.engine.remove_grouping(edge).await?;
        }
        for edge in self
            .engine
            .filtered_groupings(GROUPING_GROUP, vec![role.clone()])
            .await
        {
            changed |= self.engine.remove_grouping(edge).await?;
        }
        changed |= self.engine.remove_role(&role).await?;
        if changed {
            tracing::info!(role = %role, "role deleted");
        }
        Ok(changed)
    }

    /// Replace the principal's direct roles with exactly `roles`.
    ///
    /// Every name is validated before anything is removed, so a bad name
    /// leaves the existing assignment intact. The swap itself is one engine
    /// mutation, so two concurrent calls end with one caller's set, never a
    /// mix of both.
    pub async fn set_admin_roles(
        &self,
        principal: &PrincipalId,
        roles: &[String],
    ) -> AuthzResult<Vec<String>> {
        let desired = roles
            .iter()
            .map(|role| canonical_role(role))
            .collect::<AuthzResult<BTreeSet<_>>>()?;
        self.engine
            .replace_groups(&principal.subject(), &desired)
            .await?;
        Ok(desired.into_iter().collect())
    }

    /// Rebuild the in-memory policy view from the store.
    pub async fn reload(&self) -> AuthzResult<()> {
        self.engine.reload().await
    }

    pub async fn get_admin_roles(&self, principal: &PrincipalId) -> Vec<String> {
        let roles: BTreeSet<String> = self
            .engine
            .roles_for(&principal.subject())
            .await
            .into_iter()
            .filter(|role| is_role(role))
            .collect();
        roles.into_iter().collect()
    }

    /// Direct and inherited policies of a principal.
    pub async fn get_admin_policies(&self, principal: &PrincipalId) -> Vec<PolicyRule> {
        let rules: BTreeSet<PolicyRule> = self
            .engine
            .implicit_policies_for(&principal.subject())
            .await
            .into_iter()
            .collect();
        rules.into_iter().collect()
    }

    pub async fn get_role_policies(&self, role: &str) -> AuthzResult<Vec<PolicyRule>> {
        let role = canonical_role(role)?;
        let mut rules = self.engine.policies_for_subject(&role).await;
        rules.sort();
        rules.dedup();
        Ok(rules)
    }

    /// Every known role: the role set plus role names on either side of a
    /// grouping edge.
    pub async fn list_roles(&self) -> Vec<String> {
        let mut roles: BTreeSet<String> = self.engine.role_set().await.into_iter().collect();
        for edge in self.engine.groupings().await {
            for name in [edge.member, edge.group] {
                if is_role(&name) {
                    roles.insert(name);
                }
            }
        }
        roles.remove(ANCHOR_ROLE);
        roles.into_iter().collect()
    }

    /// Ensure every built-in role, its grants, and its inheritance edges.
    ///
    /// Safe to run against an already-populated store.
    pub async fn bootstrap_builtin_roles(&self) -> AuthzResult<usize> {
        let mut changes = 0usize;
        for builtin in BUILTIN_ROLES {
            changes += usize::from(self.engine.add_role(builtin.name).await?);
            for (object, action) in builtin.grants {
                let rule = PolicyRule::new(builtin.name, *object, *action);
                changes += usize::from(self.engine.add_policy(rule).await?);
            }
            for parent in builtin.parents {
                let edge = GroupingRule::new(builtin.name, *parent);
                changes += usize::from(self.engine.add_grouping(edge).await?);
            }
        }
        tracing::info!(
            roles = BUILTIN_ROLES.len(),
            changes,
            "built-in roles bootstrapped"
        );
        Ok(changes)
    }

    /// Validate a grant or revoke and make sure its role exists.
    async fn mutable_role_rule(
        &self,
        role: &str,
        object: &str,
        action: &str,
    ) -> AuthzResult<PolicyRule> {
        let action = normalize_action(action);
        if action.is_empty() {
            return Err(AuthzError::EmptyAction);
        }
        let role = canonical_role(role)?;
        if is_builtin(&role) {
            return Err(AuthzError::BuiltinRole(role));
        }
        let object = normalize_object(object);
        validate_object(&object)?;
        self.engine.add_role(&role).await?;
        Ok(PolicyRule::new(role, object, action))
    }

    fn mutable_edge(&self, role: &str, parent: &str) -> AuthzResult<(String, String)> {
        let role = canonical_role(role)?;
        let parent = canonical_role(parent)?;
        if is_builtin(&role) {
            return Err(AuthzError::BuiltinRole(role));
        }
        if role == parent {
            return Err(AuthzError::InvalidRole(role));
        }
        Ok((role, parent))
    }
}

fn canonical_role(raw: &str) -> AuthzResult<String> {
    if is_anchor(raw) {
        return Err(AuthzError::ReservedRole(raw.trim().to_string()));
    }
    normalize_role(raw)
}
