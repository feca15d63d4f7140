//! Canonical policy vocabulary for objects, actions, and roles.
//!
//! # Purpose
//! Maps raw route strings, HTTP verbs, and operator-typed role names onto the
//! exact strings stored in the policy engine so lookups and matches agree.
//!
//! # Key invariants
//! - Every function here is idempotent: normalizing a normalized value is a
//!   no-op.
//! - Objects always begin with `/` and never carry the versioned API prefix.
//! - Roles are always `role:<name>` where `<name>` is lowercase alphanumeric
//!   plus `_`.
//! - A stored object is a literal path pattern: `:name` may only fill a whole
//!   segment and `*` may only be the final segment.
//!
//! # Examples
//! ```rust
//! use portcullis_authz::{normalize_action, normalize_object, normalize_role};
//!
//! assert_eq!(normalize_object("/api/v1/admin/orders/:id"), "/admin/orders/:id");
//! assert_eq!(normalize_action(" get "), "GET");
//! assert_eq!(normalize_role("Ops Team").unwrap(), "role:ops_team");
//! ```
use crate::{AuthzError, AuthzResult};

/// Versioned API prefix stripped from every object.
pub const API_PREFIX: &str = "/api/v1";

/// Prefix carried by every canonical role name.
pub const ROLE_PREFIX: &str = "role:";

/// Reserved role name that marked role existence in tuple-only stores.
///
/// Role existence now lives in an explicit role set, but the name stays
/// reserved so it can never be created, assigned, or listed.
pub const ANCHOR_ROLE: &str = "role:__anchor__";

/// Wildcard action matching every verb.
pub const ANY_ACTION: &str = "*";

pub fn normalize_object(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "/".to_string();
    }
    let mut path = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    };
    // Loop so `/api/v1/api/v1/x` lands on the same fixed point as `/x`.
    while let Some(rest) = path.strip_prefix(API_PREFIX) {
        if rest.is_empty() {
            return "/".to_string();
        }
        if !rest.starts_with('/') {
            // `/api/v10` is a different route, not a prefixed one.
            break;
        }
        path = rest.to_string();
    }
    path
}

/// Check that a normalized object only uses the pattern forms the matcher
/// understands.
///
/// Allowed characters are ASCII alphanumerics, `_`, `-`, `/`, `:` and `*`.
/// A segment is either literal, a `:name` parameter, or (last only) `*`.
///
/// # Errors
/// - [`AuthzError::InvalidObject`] for any other character or placement.
pub fn validate_object(object: &str) -> AuthzResult<()> {
    let invalid = || AuthzError::InvalidObject(object.to_string());
    let Some(rest) = object.strip_prefix('/') else {
        return Err(invalid());
    };
    if rest.is_empty() {
        return Ok(());
    }
    let segments: Vec<&str> = rest.split('/').collect();
    let last = segments.len() - 1;
    for (index, segment) in segments.iter().enumerate() {
        if *segment == "*" {
            if index != last {
                return Err(invalid());
            }
            continue;
        }
        let name = segment.strip_prefix(':').unwrap_or(segment);
        if segment.starts_with(':') && name.is_empty() {
            return Err(invalid());
        }
        if !name.chars().all(is_literal_char) {
            return Err(invalid());
        }
    }
    Ok(())
}

fn is_literal_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'
}

pub fn normalize_action(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Canonicalize a role name into `role:<snake_name>`.
///
/// Accepts names with or without the `role:` prefix. Runs of characters other
/// than alphanumerics become a single `_`; leading and trailing `_` are dropped.
///
/// # Errors
/// - [`AuthzError::InvalidRole`] when nothing but whitespace or separators
///   remain.
pub fn normalize_role(raw: &str) -> AuthzResult<String> {
    let trimmed = raw.trim();
    let name = match trimmed.get(..ROLE_PREFIX.len()) {
        Some(head) if head.eq_ignore_ascii_case(ROLE_PREFIX) => &trimmed[ROLE_PREFIX.len()..],
        _ => trimmed,
    };
    let mut snake = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            snake.extend(ch.to_lowercase());
        } else if !snake.is_empty() && !snake.ends_with('_') {
            snake.push('_');
        }
    }
    let snake = snake.trim_end_matches('_');
    if snake.is_empty() {
        return Err(AuthzError::InvalidRole(raw.to_string()));
    }
    Ok(format!("{ROLE_PREFIX}{snake}"))
}

/// True when `raw` names the reserved anchor role, with or without prefix.
pub fn is_anchor(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.eq_ignore_ascii_case(ANCHOR_ROLE)
        || trimmed.eq_ignore_ascii_case(&ANCHOR_ROLE[ROLE_PREFIX.len()..])
}

pub fn is_role(subject: &str) -> bool {
    subject.starts_with(ROLE_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_fixed_points() {
        assert_eq!(normalize_object(""), "/");
        assert_eq!(normalize_object("   "), "/");
        assert_eq!(normalize_object("/api/v1"), "/");
        assert_eq!(normalize_object("/api/v1/"), "/");
        assert_eq!(
            normalize_object("/api/v1/admin/orders/:id"),
            "/admin/orders/:id"
        );
        assert_eq!(normalize_object("admin/orders"), "/admin/orders");
        assert_eq!(normalize_object("  /admin/orders  "), "/admin/orders");
    }

    #[test]
    fn object_prefix_only_on_segment_boundary() {
        assert_eq!(normalize_object("/api/v10/orders"), "/api/v10/orders");
        assert_eq!(normalize_object("/api/v1x"), "/api/v1x");
    }

    #[test]
    fn object_is_idempotent() {
        let samples = [
            "",
            "/",
            "/api/v1",
            "api/v1/admin",
            "/api/v1/api/v1/admin/products/42",
            "/admin/*",
            " /api/v1/admin/settings ",
        ];
        for sample in samples {
            let once = normalize_object(sample);
            assert_eq!(normalize_object(&once), once, "sample {sample:?}");
            assert!(once.starts_with('/'));
        }
    }

    #[test]
    fn object_patterns_accepted() {
        for object in [
            "/",
            "/*",
            "/admin/*",
            "/admin/products/:id",
            "/admin/orders/:order_id/items/:item-id",
            "/admin/audit-log/export_v2",
        ] {
            validate_object(object).unwrap_or_else(|err| panic!("{object}: {err}"));
        }
    }

    #[test]
    fn object_patterns_rejected() {
        for object in [
            "/admin/reports(",
            "/admin/file.json",
            "/admin/x?y",
            "/admin/a+b",
            "/admin/[a-z]",
            "/admin/x$",
            "/admin/*/orders",
            "/admin/orders*",
            "/admin/:",
            "/admin/id:x",
            "/admin/:a:b",
            "/admin/:id*",
            "/admin/caf\u{e9}",
            "admin",
        ] {
            let err = validate_object(object).expect_err(object);
            assert!(matches!(err, AuthzError::InvalidObject(_)), "{object}");
        }
    }

    #[test]
    fn action_is_uppercase_and_idempotent() {
        assert_eq!(normalize_action(" post\n"), "POST");
        assert_eq!(normalize_action("*"), "*");
        assert_eq!(normalize_action(&normalize_action("delete")), "DELETE");
    }

    #[test]
    fn role_canonical_forms() {
        assert_eq!(normalize_role("ops").unwrap(), "role:ops");
        assert_eq!(normalize_role("role:ops").unwrap(), "role:ops");
        assert_eq!(normalize_role("ROLE:Ops").unwrap(), "role:ops");
        assert_eq!(
            normalize_role(" Read-Only Auditor ").unwrap(),
            "role:read_only_auditor"
        );
        assert_eq!(normalize_role("finance.v2").unwrap(), "role:finance_v2");
        assert_eq!(normalize_role("--ops  -- team__").unwrap(), "role:ops_team");
    }

    #[test]
    fn role_is_idempotent() {
        for sample in ["ops", "Support Team", "role:finance", "a-b-c", "x__y"] {
            let once = normalize_role(sample).unwrap();
            assert_eq!(normalize_role(&once).unwrap(), once);
        }
    }

    #[test]
    fn role_rejects_empty_names() {
        for sample in ["", "   ", "role:", "role:  ", "---", "__"] {
            let err = normalize_role(sample).expect_err("empty role");
            assert!(matches!(err, AuthzError::InvalidRole(_)), "{sample:?}");
        }
    }

    #[test]
    fn anchor_detection() {
        assert!(is_anchor(ANCHOR_ROLE));
        assert!(is_anchor(" __ANCHOR__ "));
        assert!(!is_anchor("role:anchor"));
    }

    #[test]
    fn role_detection() {
        assert!(is_role("role:ops"));
        assert!(!is_role("admin:1"));
    }
}
