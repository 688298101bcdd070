use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use aquaops_core::{OrganizationId, PlantId, UserId};

use crate::Role;

/// Kind of signed session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Session,
    Impersonation,
}

/// Claims carried by a session token (transport-agnostic).
///
/// `iat`/`exp` are unix seconds so the encoded form is a standard JWT.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: UserId,
    pub org: OrganizationId,
    pub org_slug: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plant: Option<PlantId>,
    pub iat: i64,
    pub exp: i64,
    pub kind: TokenKind,
    /// Impersonator label, only present on impersonation tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imp: Option<String>,
}

impl SessionClaims {
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.iat, 0)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,

    #[error("impersonation token without impersonator")]
    MissingImpersonator,
}

/// Deterministically validate session claims.
///
/// Signature verification happens in [`crate::TokenCodec`]; this only checks
/// the time window and kind consistency.
pub fn validate_claims(claims: &SessionClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    let now = now.timestamp();
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    if now < claims.iat {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(TokenValidationError::Expired);
    }
    if claims.kind == TokenKind::Impersonation && claims.imp.is_none() {
        return Err(TokenValidationError::MissingImpersonator);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn claims(iat: DateTime<Utc>, exp: DateTime<Utc>) -> SessionClaims {
        SessionClaims {
            sub: UserId::new(),
            org: OrganizationId::new(),
            org_slug: "north-plant".into(),
            role: Role::Operator,
            plant: None,
            iat: iat.timestamp(),
            exp: exp.timestamp(),
            kind: TokenKind::Session,
            imp: None,
        }
    }

    #[test]
    fn accepts_within_window() {
        let now = Utc::now();
        let c = claims(now - Duration::minutes(1), now + Duration::hours(1));
        assert_eq!(validate_claims(&c, now), Ok(()));
    }

    #[test]
    fn rejects_expired_and_future() {
        let now = Utc::now();
        let expired = claims(now - Duration::hours(2), now - Duration::hours(1));
        assert_eq!(validate_claims(&expired, now), Err(TokenValidationError::Expired));

        let future = claims(now + Duration::hours(1), now + Duration::hours(2));
        assert_eq!(validate_claims(&future, now), Err(TokenValidationError::NotYetValid));

        let inverted = claims(now, now - Duration::seconds(1));
        assert_eq!(validate_claims(&inverted, now), Err(TokenValidationError::InvalidTimeWindow));
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let now = Utc::now();
        let c = claims(now - Duration::hours(1), now);
        assert_eq!(validate_claims(&c, now), Err(TokenValidationError::Expired));
    }

    #[test]
    fn impersonation_requires_label() {
        let now = Utc::now();
        let mut c = claims(now - Duration::minutes(1), now + Duration::hours(1));
        c.kind = TokenKind::Impersonation;
        assert_eq!(validate_claims(&c, now), Err(TokenValidationError::MissingImpersonator));
        c.imp = Some("super_admin".into());
        assert_eq!(validate_claims(&c, now), Ok(()));
    }
}
