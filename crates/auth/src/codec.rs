//! Credential codec: Argon2id secret hashing and HS256 session tokens.

use std::sync::OnceLock;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use aquaops_core::{OrganizationId, PlantId, UserId};

use crate::{Role, SessionClaims, TokenKind, validate_claims};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("hashing failed: {0}")]
    Hash(String),

    #[error("stored hash is malformed: {0}")]
    MalformedHash(String),

    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Any failure to accept a token.
///
/// Expired, not-yet-valid, malformed and tampered tokens are deliberately
/// indistinguishable to callers.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token")]
    Invalid,
}

// ─────────────────────────────────────────────────────────────────────────────
// Secret hashing
// ─────────────────────────────────────────────────────────────────────────────

/// Argon2id hashing for passwords, API keys and the admin key.
pub struct SecretHasher;

impl SecretHasher {
    /// Hash with a fresh random salt; output is a PHC string.
    pub fn hash(secret: &str) -> Result<String, CodecError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(secret.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| CodecError::Hash(e.to_string()))
    }

    /// `Ok(false)` on mismatch, `Err` only when `phc` cannot be parsed.
    pub fn verify(secret: &str, phc: &str) -> Result<bool, CodecError> {
        let parsed = PasswordHash::new(phc).map_err(|e| CodecError::MalformedHash(e.to_string()))?;
        match Argon2::default().verify_password(secret.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(CodecError::MalformedHash(e.to_string())),
        }
    }

    /// Spend the same Argon2 work as a real check when there is nothing to
    /// check against (unknown account). Always `false`.
    pub fn verify_dummy(secret: &str) -> bool {
        static DUMMY: OnceLock<Option<String>> = OnceLock::new();
        let Some(phc) = DUMMY.get_or_init(|| Self::hash("no-such-account").ok()) else {
            return false;
        };
        let _ = Self::verify(secret, phc);
        false
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session tokens
// ─────────────────────────────────────────────────────────────────────────────

/// Identity a session token is minted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSubject {
    pub user_id: UserId,
    pub organization_id: OrganizationId,
    pub org_slug: String,
    pub role: Role,
    pub plant_id: Option<PlantId>,
}

#[derive(Clone)]
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl core::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenCodec").finish_non_exhaustive()
    }
}

impl TokenCodec {
    pub fn hs256(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    pub fn issue_session(
        &self,
        subject: &SessionSubject,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, CodecError> {
        self.issue(subject, TokenKind::Session, None, ttl, now)
    }

    pub fn issue_impersonation(
        &self,
        subject: &SessionSubject,
        impersonator: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, CodecError> {
        self.issue(
            subject,
            TokenKind::Impersonation,
            Some(impersonator.to_string()),
            ttl,
            now,
        )
    }

    fn issue(
        &self,
        subject: &SessionSubject,
        kind: TokenKind,
        imp: Option<String>,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, CodecError> {
        let claims = SessionClaims {
            sub: subject.user_id,
            org: subject.organization_id,
            org_slug: subject.org_slug.clone(),
            role: subject.role,
            plant: subject.plant_id,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            kind,
            imp,
        };
        self.encode(&claims)
    }

    /// Sign arbitrary claims. Exposed for tooling and tests.
    pub fn encode(&self, claims: &SessionClaims) -> Result<String, CodecError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding)
            .map_err(|e| CodecError::Signing(e.to_string()))
    }

    /// Verify signature and time window against `now`.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // time checks run against the injected clock below
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["sub", "exp", "iat"]);

        let data = jsonwebtoken::decode::<SessionClaims>(token, &self.decoding, &validation).map_err(|e| {
            tracing::debug!(error = %e, "session token rejected");
            TokenError::Invalid
        })?;

        validate_claims(&data.claims, now).map_err(|e| {
            tracing::debug!(error = %e, "session token outside validity window");
            TokenError::Invalid
        })?;

        Ok(data.claims)
    }
}
