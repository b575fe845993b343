//! Bearer token validation.
//!
//! Tokens are HS256 JWTs whose subject is the owning account. The time window
//! is carried as RFC 3339 timestamps and checked here rather than through the
//! registered `exp` claim.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tally_core::OwnerId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerClaims {
    /// Account every request made with this token acts for.
    pub sub: OwnerId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("token could not be decoded: {0}")]
    Decode(String),

    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

pub fn validate_claims(claims: &OwnerClaims, now: DateTime<Utc>) -> Result<(), TokenError> {
    if claims.expires_at <= claims.issued_at {
        return Err(TokenError::InvalidTimeWindow);
    }
    if now < claims.issued_at {
        return Err(TokenError::NotYetValid);
    }
    if now >= claims.expires_at {
        return Err(TokenError::Expired);
    }
    Ok(())
}

pub trait JwtValidator: Send + Sync {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<OwnerClaims, TokenError>;
}

pub struct Hs256JwtValidator {
    key: DecodingKey,
    validation: Validation,
}

impl Hs256JwtValidator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl JwtValidator for Hs256JwtValidator {
    fn validate(&self, token: &str, now: DateTime<Utc>) -> Result<OwnerClaims, TokenError> {
        let data = jsonwebtoken::decode::<OwnerClaims>(token, &self.key, &self.validation)
            .map_err(|e| TokenError::Decode(e.to_string()))?;
        validate_claims(&data.claims, now)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use jsonwebtoken::{EncodingKey, Header};

    fn mint(secret: &[u8], claims: &OwnerClaims) -> String {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret))
            .unwrap()
    }

    fn claims(now: DateTime<Utc>) -> OwnerClaims {
        OwnerClaims {
            sub: OwnerId::new(),
            issued_at: now - Duration::minutes(1),
            expires_at: now + Duration::minutes(10),
        }
    }

    #[test]
    fn accepts_a_fresh_token_signed_with_the_secret() {
        let now = Utc::now();
        let claims = claims(now);
        let validator = Hs256JwtValidator::new(b"secret");
        assert_eq!(validator.validate(&mint(b"secret", &claims), now), Ok(claims));
    }

    #[test]
    fn rejects_a_foreign_signature() {
        let now = Utc::now();
        let validator = Hs256JwtValidator::new(b"secret");
        let err = validator.validate(&mint(b"other", &claims(now)), now).unwrap_err();
        assert!(matches!(err, TokenError::Decode(_)));
    }

    #[test]
    fn rejects_expired_tokens() {
        let now = Utc::now();
        let validator = Hs256JwtValidator::new(b"secret");
        let token = mint(b"secret", &claims(now));
        assert_eq!(validator.validate(&token, now + Duration::hours(1)), Err(TokenError::Expired));
    }
}
