use crate::store::PolicyStoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("invalid role: {0:?}")]
    InvalidRole(String),
    #[error("role {0} is reserved")]
    ReservedRole(String),
    #[error("role {0} is built in and cannot be modified")]
    BuiltinRole(String),
    #[error("invalid policy object: {0:?}")]
    InvalidObject(String),
    #[error("action must not be empty")]
    EmptyAction,
    #[error("invalid principal: {0:?}")]
    InvalidPrincipal(String),
    #[error("casbin error: {0}")]
    Casbin(#[from] casbin::Error),
    #[error(transparent)]
    Store(#[from] PolicyStoreError),
}

pub type AuthzResult<T> = Result<T, AuthzError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_variants() {
        let errors = vec![
            AuthzError::InvalidRole("  ".to_string()),
            AuthzError::ReservedRole("role:__anchor__".to_string()),
            AuthzError::BuiltinRole("role:finance".to_string()),
            AuthzError::InvalidObject("/admin/(".to_string()),
            AuthzError::EmptyAction,
            AuthzError::InvalidPrincipal("admin:".to_string()),
            AuthzError::Store(PolicyStoreError::Unavailable("down".to_string())),
        ];

        for error in errors {
            let rendered = error.to_string();
            assert!(!rendered.is_empty());
        }
    }

    #[test]
    fn store_errors_pass_through_unmodified() {
        let err = AuthzError::from(PolicyStoreError::Unavailable("connection reset".to_string()));
        assert_eq!(err.to_string(), "policy store unavailable: connection reset");
    }
}
