//! HS256 bearer tokens for gateway principals.
//!
//! # Purpose
//! Mints tokens for identified principals and turns an `Authorization` header
//! into verified claims, reporting each failure as a distinct [`TokenError`].
//!
//! # Key invariants
//! - Only HS256 is accepted; any other `alg` header fails verification.
//! - `sub`, `exp` and `iat` are required; `sub` must parse as a
//!   [`PrincipalId`].
//! - The header must be exactly `Bearer <token>`.
use crate::reason::RejectReason;
use crate::types::PrincipalId;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Principal subject, e.g. `admin:42`.
    pub sub: String,
    /// Credential version the token was minted against.
    pub ver: u64,
    pub iat: i64,
    pub exp: i64,
}

/// Claims that passed signature, expiry and principal checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedClaims {
    pub principal: PrincipalId,
    pub credential_version: u64,
    pub issued_at: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token signing secret is not configured")]
    MissingSecret,
    #[error("authorization header missing")]
    MissingHeader,
    #[error("authorization header is not a bearer token")]
    MalformedHeader,
    #[error("token carries no valid principal: {0:?}")]
    MissingPrincipal(String),
    #[error("token rejected: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

impl TokenError {
    pub fn reason(&self) -> RejectReason {
        match self {
            TokenError::MissingSecret => RejectReason::JwtSecretMissing,
            TokenError::MissingHeader => RejectReason::AuthHeaderMissing,
            TokenError::MalformedHeader => RejectReason::AuthHeaderInvalid,
            TokenError::MissingPrincipal(_) | TokenError::Jwt(_) => RejectReason::TokenInvalid,
        }
    }
}

/// Extract the token from an `Authorization` header value.
pub fn parse_bearer(header: &str) -> Result<&str, TokenError> {
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(TokenError::MalformedHeader)?;
    if token.is_empty() || token.contains(char::is_whitespace) {
        return Err(TokenError::MalformedHeader);
    }
    Ok(token)
}

pub struct TokenIssuer {
    encoding_key: EncodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl: Duration) -> Result<Self, TokenError> {
        if secret.is_empty() {
            return Err(TokenError::MissingSecret);
        }
        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            ttl,
        })
    }

    pub fn mint(&self, principal: &PrincipalId, credential_version: u64) -> Result<String, TokenError> {
        self.mint_at(principal, credential_version, now_epoch_seconds())
    }

    /// Mint with an explicit issue time.
    pub fn mint_at(
        &self,
        principal: &PrincipalId,
        credential_version: u64,
        issued_at: i64,
    ) -> Result<String, TokenError> {
        let claims = Claims {
            sub: principal.subject(),
            ver: credential_version,
            iat: issued_at,
            exp: issued_at + self.ttl.as_secs() as i64,
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(token)
    }
}

pub struct TokenVerifier {
    decoding_key: Option<DecodingKey>,
    leeway: u64,
}

impl TokenVerifier {
    /// A verifier without a secret rejects every request with
    /// [`TokenError::MissingSecret`].
    pub fn new(secret: Option<&[u8]>, leeway: u64) -> Self {
        Self {
            decoding_key: secret
                .filter(|secret| !secret.is_empty())
                .map(DecodingKey::from_secret),
            leeway,
        }
    }

    pub fn has_secret(&self) -> bool {
        self.decoding_key.is_some()
    }

    /// Run the full header-to-claims check in order: secret, header presence,
    /// header shape, then signature and claims.
    pub fn authenticate(&self, header: Option<&str>) -> Result<VerifiedClaims, TokenError> {
        let key = self.decoding_key.as_ref().ok_or(TokenError::MissingSecret)?;
        let header = header.ok_or(TokenError::MissingHeader)?;
        let token = parse_bearer(header)?;
        verify_with(key, self.leeway, token)
    }

    pub fn verify(&self, token: &str) -> Result<VerifiedClaims, TokenError> {
        let key = self.decoding_key.as_ref().ok_or(TokenError::MissingSecret)?;
        verify_with(key, self.leeway, token)
    }
}

fn verify_with(key: &DecodingKey, leeway: u64, token: &str) -> Result<VerifiedClaims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp", "iat", "sub"]);
    validation.leeway = leeway;
    let data = jsonwebtoken::decode::<Claims>(token, key, &validation)?;
    let principal = data
        .claims
        .sub
        .parse::<PrincipalId>()
        .map_err(|_| TokenError::MissingPrincipal(data.claims.sub.clone()))?;
    Ok(VerifiedClaims {
        principal,
        credential_version: data.claims.ver,
        issued_at: data.claims.iat,
    })
}

pub fn now_epoch_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| Duration::from_secs(0))
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"unit-test-secret";

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(SECRET, Duration::from_secs(300)).expect("issuer")
    }

    fn verifier() -> TokenVerifier {
        TokenVerifier::new(Some(SECRET), 0)
    }

    #[test]
    fn mint_and_verify() {
        let token = issuer().mint(&PrincipalId::admin(42), 3).expect("mint");
        let claims = verifier()
            .authenticate(Some(&format!("Bearer {token}")))
            .expect("verify");
        assert_eq!(claims.principal, PrincipalId::admin(42));
        assert_eq!(claims.credential_version, 3);
    }

    #[test]
    fn state_machine_order() {
        let unset = TokenVerifier::new(None, 0);
        assert!(matches!(
            unset.authenticate(None),
            Err(TokenError::MissingSecret)
        ));
        assert!(matches!(
            TokenVerifier::new(Some(b""), 0).authenticate(Some("Bearer x")),
            Err(TokenError::MissingSecret)
        ));
        assert!(matches!(
            verifier().authenticate(None),
            Err(TokenError::MissingHeader)
        ));
        for header in ["Basic abc", "Bearer", "Bearer ", "bearer abc", "Bearer a b"] {
            let err = verifier().authenticate(Some(header)).expect_err(header);
            assert_eq!(err.reason(), RejectReason::AuthHeaderInvalid, "{header:?}");
        }
        let err = verifier()
            .authenticate(Some("Bearer not.a.jwt"))
            .expect_err("garbage");
        assert_eq!(err.reason(), RejectReason::TokenInvalid);
    }

    #[test]
    fn rejects_other_secret_and_algorithm() {
        let token = issuer().mint(&PrincipalId::user(1), 0).unwrap();
        let other = TokenVerifier::new(Some(b"other"), 0);
        assert!(matches!(other.verify(&token), Err(TokenError::Jwt(_))));

        let now = now_epoch_seconds();
        let claims = Claims {
            sub: "user:1".to_string(),
            ver: 0,
            iat: now,
            exp: now + 60,
        };
        let hs384 = jsonwebtoken::encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        assert!(matches!(verifier().verify(&hs384), Err(TokenError::Jwt(_))));
    }

    #[test]
    fn rejects_expired_tokens() {
        let issued = now_epoch_seconds() - 3_600;
        let token = issuer().mint_at(&PrincipalId::admin(1), 0, issued).unwrap();
        let err = verifier().verify(&token).expect_err("expired");
        assert_eq!(err.reason(), RejectReason::TokenInvalid);
    }

    #[test]
    fn rejects_unparseable_principal() {
        let now = now_epoch_seconds();
        let claims = Claims {
            sub: "nobody".to_string(),
            ver: 0,
            iat: now,
            exp: now + 60,
        };
        let token = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .unwrap();
        let err = verifier().verify(&token).expect_err("principal");
        assert!(matches!(err, TokenError::MissingPrincipal(_)));
        assert_eq!(err.reason(), RejectReason::TokenInvalid);
    }

    #[test]
    fn issuer_requires_secret() {
        assert!(matches!(
            TokenIssuer::new(b"", Duration::from_secs(1)),
            Err(TokenError::MissingSecret)
        ));
    }
}
