use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a request was turned away at the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    JwtSecretMissing,
    AuthHeaderMissing,
    AuthHeaderInvalid,
    TokenInvalid,
    TokenRevoked,
    UserDisabled,
    Unauthorized,
    Forbidden,
    RateLimited,
    RateLimitUnavailable,
}

impl RejectReason {
    pub const ALL: [RejectReason; 10] = [
        RejectReason::JwtSecretMissing,
        RejectReason::AuthHeaderMissing,
        RejectReason::AuthHeaderInvalid,
        RejectReason::TokenInvalid,
        RejectReason::TokenRevoked,
        RejectReason::UserDisabled,
        RejectReason::Unauthorized,
        RejectReason::Forbidden,
        RejectReason::RateLimited,
        RejectReason::RateLimitUnavailable,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RejectReason::JwtSecretMissing => "jwt_secret_missing",
            RejectReason::AuthHeaderMissing => "auth_header_missing",
            RejectReason::AuthHeaderInvalid => "auth_header_invalid",
            RejectReason::TokenInvalid => "token_invalid",
            RejectReason::TokenRevoked => "token_revoked",
            RejectReason::UserDisabled => "user_disabled",
            RejectReason::Unauthorized => "unauthorized",
            RejectReason::Forbidden => "forbidden",
            RejectReason::RateLimited => "rate_limited",
            RejectReason::RateLimitUnavailable => "rate_limit_unavailable",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
