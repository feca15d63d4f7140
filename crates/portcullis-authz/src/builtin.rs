//! Built-in role catalog ensured at every startup.
use crate::normalize::ANY_ACTION;

pub const READONLY_AUDITOR: &str = "role:readonly_auditor";
pub const OPERATIONS: &str = "role:operations";
pub const SUPPORT: &str = "role:support";
pub const FINANCE: &str = "role:finance";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuiltinRole {
    pub name: &'static str,
    /// `(object, action)` pairs granted directly to the role.
    pub grants: &'static [(&'static str, &'static str)],
    pub parents: &'static [&'static str],
}

/// Parents come before children so a single pass can ensure every edge.
pub const BUILTIN_ROLES: &[BuiltinRole] = &[
    BuiltinRole {
        name: READONLY_AUDITOR,
        grants: &[("/admin/*", "GET")],
        parents: &[],
    },
    BuiltinRole {
        name: OPERATIONS,
        grants: &[
            ("/admin/products", ANY_ACTION),
            ("/admin/products/*", ANY_ACTION),
            ("/admin/orders", ANY_ACTION),
            ("/admin/orders/*", ANY_ACTION),
            ("/admin/inventory", ANY_ACTION),
            ("/admin/inventory/*", ANY_ACTION),
        ],
        parents: &[READONLY_AUDITOR],
    },
    BuiltinRole {
        name: SUPPORT,
        grants: &[
            ("/admin/orders/*", ANY_ACTION),
            ("/admin/users/*", ANY_ACTION),
        ],
        parents: &[READONLY_AUDITOR],
    },
    BuiltinRole {
        name: FINANCE,
        grants: &[
            ("/admin/payments", ANY_ACTION),
            ("/admin/payments/*", ANY_ACTION),
            ("/admin/wallets/*", ANY_ACTION),
            ("/admin/coupons", ANY_ACTION),
            ("/admin/coupons/*", ANY_ACTION),
        ],
        parents: &[READONLY_AUDITOR],
    },
];

pub fn is_builtin(role: &str) -> bool {
    BUILTIN_ROLES.iter().any(|builtin| builtin.name == role)
}
