//! Machine credentials: raw key format, lookup prefix and the stored record.

use chrono::{DateTime, Utc};
use rand::{Rng, distr::Alphanumeric};
use serde::{Deserialize, Serialize};

use aquaops_core::{ApiKeyId, DomainError, OrganizationId, UserId};

use crate::{Capability, CodecError, Role, SecretHasher};

/// Literal prefix of every raw API key.
pub const API_KEY_PREFIX: &str = "wwtp_";

/// Number of random alphanumeric characters after [`API_KEY_PREFIX`].
pub const API_KEY_SECRET_LEN: usize = 32;

/// Length of the stored lookup prefix (`wwtp_` plus eight characters).
pub const LOOKUP_PREFIX_LEN: usize = 13;

pub const DEFAULT_RATE_LIMIT_PER_MINUTE: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyStatus {
    #[default]
    Active,
    Revoked,
}

impl ApiKeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKeyStatus::Active => "active",
            ApiKeyStatus::Revoked => "revoked",
        }
    }
}

impl core::str::FromStr for ApiKeyStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ApiKeyStatus::Active),
            "revoked" => Ok(ApiKeyStatus::Revoked),
            other => Err(DomainError::validation(format!("unknown api key status '{other}'"))),
        }
    }
}

/// A freshly minted raw key. The raw value is shown to the caller once and
/// never stored.
#[derive(Debug, Clone)]
pub struct GeneratedApiKey {
    pub raw: String,
    pub prefix: String,
}

impl GeneratedApiKey {
    pub fn generate() -> Self {
        let secret: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(API_KEY_SECRET_LEN)
            .map(char::from)
            .collect();
        let raw = format!("{API_KEY_PREFIX}{secret}");
        let prefix = raw[..LOOKUP_PREFIX_LEN].to_string();
        Self { raw, prefix }
    }
}

/// `wwtp_` followed by exactly 32 ASCII alphanumerics.
pub fn is_well_formed(raw: &str) -> bool {
    raw.strip_prefix(API_KEY_PREFIX).is_some_and(|secret| {
        secret.len() == API_KEY_SECRET_LEN && secret.bytes().all(|b| b.is_ascii_alphanumeric())
    })
}

/// Lookup prefix of a well-formed raw key.
pub fn lookup_prefix(raw: &str) -> Option<&str> {
    is_well_formed(raw).then(|| &raw[..LOOKUP_PREFIX_LEN])
}

/// Stored API key record (the raw key is never persisted).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub prefix: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub scopes: Vec<Capability>,
    pub rate_limit_per_minute: u32,
    pub status: ApiKeyStatus,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

/// Input for [`ApiKey::issue`].
#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub organization_id: OrganizationId,
    pub name: String,
    pub scopes: Vec<Capability>,
    pub rate_limit_per_minute: Option<u32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: UserId,
    pub creator_role: Role,
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ApiKeyError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl ApiKey {
    /// Mint a key for `input`, returning the record to persist and the raw
    /// key to hand back once.
    ///
    /// Every scope must be covered by the creator's role.
    pub fn issue(input: NewApiKey, now: DateTime<Utc>) -> Result<(ApiKey, GeneratedApiKey), ApiKeyError> {
        let name = input.name.trim();
        if name.is_empty() || name.len() > 100 {
            return Err(DomainError::validation("api key name must be 1-100 characters").into());
        }
        if input.scopes.is_empty() {
            return Err(DomainError::validation("api key needs at least one scope").into());
        }
        if let Some(scope) = input.scopes.iter().find(|s| !input.creator_role.covers(s)) {
            return Err(DomainError::forbidden(format!(
                "role '{}' cannot delegate scope '{scope}'",
                input.creator_role
            ))
            .into());
        }
        let rate_limit = input.rate_limit_per_minute.unwrap_or(DEFAULT_RATE_LIMIT_PER_MINUTE);
        if rate_limit == 0 || rate_limit > 10_000 {
            return Err(DomainError::validation("rate limit must be between 1 and 10000 per minute").into());
        }
        if input.expires_at.is_some_and(|at| at <= now) {
            return Err(DomainError::validation("expiry must be in the future").into());
        }

        let generated = GeneratedApiKey::generate();
        let key_hash = SecretHasher::hash(&generated.raw)?;

        let mut scopes = input.scopes;
        scopes.sort();
        scopes.dedup();

        let key = ApiKey {
            id: ApiKeyId::new(),
            organization_id: input.organization_id,
            name: name.to_string(),
            prefix: generated.prefix.clone(),
            key_hash,
            scopes,
            rate_limit_per_minute: rate_limit,
            status: ApiKeyStatus::Active,
            expires_at: input.expires_at,
            last_used_at: None,
            created_by: Some(input.created_by),
            created_at: now,
        };
        Ok((key, generated))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.status == ApiKeyStatus::Active && !self.is_expired(now)
    }

    /// Constant-time hash check of a presented raw key.
    pub fn matches(&self, raw: &str) -> Result<bool, CodecError> {
        SecretHasher::verify(raw, &self.key_hash)
    }
}
