//! Policy rows and principal identifiers.
//!
//! # Purpose
//! Defines the record shapes shared by the policy engine, the policy store
//! backends, and the HTTP administration API.
//!
//! # Key invariants
//! - A [`PolicyRule`] stored by the engine has a normalized object and a
//!   non-empty normalized action.
//! - [`PrincipalId`] renders as `<kind>:<id>`, which is the subject string the
//!   policy engine sees for that principal.
use crate::AuthzError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Allow rule: `subject` may perform `action` on `object`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyRule {
    pub subject: String,
    pub object: String,
    pub action: String,
}

impl PolicyRule {
    pub fn new(
        subject: impl Into<String>,
        object: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            object: object.into(),
            action: action.into(),
        }
    }

    pub(crate) fn from_fields(fields: &[String]) -> Option<Self> {
        match fields {
            [subject, object, action, ..] => Some(Self::new(subject, object, action)),
            _ => None,
        }
    }

    pub(crate) fn to_fields(&self) -> Vec<String> {
        vec![
            self.subject.clone(),
            self.object.clone(),
            self.action.clone(),
        ]
    }
}

/// Membership/inheritance edge: `member` holds or inherits `group`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupingRule {
    pub member: String,
    pub group: String,
}

impl GroupingRule {
    pub fn new(member: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            member: member.into(),
            group: group.into(),
        }
    }

    pub(crate) fn from_fields(fields: &[String]) -> Option<Self> {
        match fields {
            [member, group, ..] => Some(Self::new(member, group)),
            _ => None,
        }
    }

    pub(crate) fn to_fields(&self) -> Vec<String> {
        vec![self.member.clone(), self.group.clone()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    Admin,
    User,
}

impl PrincipalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PrincipalKind::Admin => "admin",
            PrincipalKind::User => "user",
        }
    }
}

impl fmt::Display for PrincipalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrincipalKind {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(PrincipalKind::Admin),
            "user" => Ok(PrincipalKind::User),
            other => Err(AuthzError::InvalidPrincipal(other.to_string())),
        }
    }
}

/// Authenticated principal identity.
///
/// # Example
/// ```rust
/// use portcullis_authz::{PrincipalId, PrincipalKind};
///
/// let admin = PrincipalId::admin(42);
/// assert_eq!(admin.to_string(), "admin:42");
/// assert_eq!("admin:42".parse::<PrincipalId>().unwrap(), admin);
/// assert_eq!(admin.kind, PrincipalKind::Admin);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrincipalId {
    pub kind: PrincipalKind,
    pub id: u64,
}

impl PrincipalId {
    pub fn new(kind: PrincipalKind, id: u64) -> Self {
        Self { kind, id }
    }

    pub fn admin(id: u64) -> Self {
        Self::new(PrincipalKind::Admin, id)
    }

    pub fn user(id: u64) -> Self {
        Self::new(PrincipalKind::User, id)
    }

    /// Subject string used for policy evaluation.
    pub fn subject(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

impl FromStr for PrincipalId {
    type Err = AuthzError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || AuthzError::InvalidPrincipal(value.to_string());
        let (kind, id) = value.split_once(':').ok_or_else(invalid)?;
        let kind = kind.parse::<PrincipalKind>().map_err(|_| invalid())?;
        let id = id.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self { kind, id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_round_trips_through_display() {
        for principal in [PrincipalId::admin(1), PrincipalId::user(u64::MAX)] {
            let rendered = principal.to_string();
            assert_eq!(rendered.parse::<PrincipalId>().unwrap(), principal);
        }
    }

    #[test]
    fn principal_rejects_malformed_values() {
        for raw in ["", "admin", "admin:", "root:1", "user:-1", "user:abc"] {
            assert!(raw.parse::<PrincipalId>().is_err(), "{raw:?}");
        }
    }

    #[test]
    fn rules_order_by_subject_object_action() {
        let mut rules = vec![
            PolicyRule::new("role:b", "/a", "GET"),
            PolicyRule::new("role:a", "/b", "GET"),
            PolicyRule::new("role:a", "/a", "POST"),
            PolicyRule::new("role:a", "/a", "GET"),
        ];
        rules.sort();
        assert_eq!(rules[0], PolicyRule::new("role:a", "/a", "GET"));
        assert_eq!(rules[1], PolicyRule::new("role:a", "/a", "POST"));
        assert_eq!(rules[3], PolicyRule::new("role:b", "/a", "GET"));
    }

    #[test]
    fn fields_conversion_requires_enough_values() {
        assert!(PolicyRule::from_fields(&["a".to_string(), "b".to_string()]).is_none());
        assert!(GroupingRule::from_fields(&["a".to_string()]).is_none());
        let rule = PolicyRule::new("role:a", "/x", "GET");
        assert_eq!(PolicyRule::from_fields(&rule.to_fields()), Some(rule));
    }
}
