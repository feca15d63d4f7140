//! Revocation snapshot of a principal and the single claims check.
//!
//! The identity store is the source of truth for [`AuthState`]; caches hold
//! copies that may lag it by up to their TTL.
use crate::reason::RejectReason;
use crate::token::VerifiedClaims;
use crate::types::PrincipalId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    pub principal: PrincipalId,
    /// Bumped on password change or forced logout; tokens minted against an
    /// older version are revoked.
    pub credential_version: u64,
    /// Tokens issued before this instant are revoked. Zero disables the check.
    pub invalid_before_unix: i64,
    pub disabled: bool,
    /// Super principals skip policy evaluation.
    pub is_super: bool,
    pub updated_at_unix: i64,
}

impl AuthState {
    pub fn new(principal: PrincipalId) -> Self {
        Self {
            principal,
            credential_version: 0,
            invalid_before_unix: 0,
            disabled: false,
            is_super: false,
            updated_at_unix: 0,
        }
    }
}

/// Decide whether verified claims are still honored by `state`.
pub fn check_claims(claims: &VerifiedClaims, state: &AuthState) -> Result<(), RejectReason> {
    if state.disabled {
        return Err(RejectReason::UserDisabled);
    }
    if claims.credential_version != state.credential_version {
        return Err(RejectReason::TokenRevoked);
    }
    if state.invalid_before_unix > 0 && claims.issued_at < state.invalid_before_unix {
        return Err(RejectReason::TokenRevoked);
    }
    Ok(())
}

/// True when `claims` prove `state` is older than the identity store.
///
/// Credential versions only grow, so a token minted against a newer version
/// than the snapshot means the snapshot missed at least one bump.
pub fn is_stale_for(claims: &VerifiedClaims, state: &AuthState) -> bool {
    claims.credential_version > state.credential_version
}
