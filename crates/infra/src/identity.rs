//! Identity Resolver: turns presented credentials into a [`Principal`].
//!
//! An API key, when present, is authoritative; the session token is only
//! consulted without one. Role and plant for session users always come from
//! the current user row so a demotion takes effect mid-session.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use aquaops_auth::api_key::lookup_prefix;
use aquaops_auth::{ApiKey, Principal, TokenCodec, TokenKind};
use aquaops_core::Organization;
use aquaops_observability::{Counter, MetricsSink};

use crate::store::{Store, StoreError};

/// Raw credentials as extracted from a request.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub principal: Principal,
    /// Organization row fetched during resolution, reused by the tenant guard.
    pub organization: Option<Organization>,
    pub rate_limit_per_minute: Option<u32>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("organization is not active")]
    TenantInactive,

    #[error("identity backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for IdentityError {
    fn from(e: StoreError) -> Self {
        IdentityError::Backend(e.to_string())
    }
}

#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn Store>,
    tokens: TokenCodec,
    metrics: Arc<dyn MetricsSink>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn Store>, tokens: TokenCodec, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { store, tokens, metrics }
    }

    pub fn tokens(&self) -> &TokenCodec {
        &self.tokens
    }

    pub async fn resolve(&self, credentials: Credentials, now: DateTime<Utc>) -> Result<ResolvedIdentity, IdentityError> {
        let result = match (credentials.api_key, credentials.session_token) {
            (Some(raw), _) => self.resolve_api_key(raw, now).await,
            (None, Some(token)) => self.resolve_session(&token, now).await,
            (None, None) => Err(IdentityError::Unauthenticated),
        };
        if matches!(result, Err(IdentityError::Unauthenticated | IdentityError::TenantInactive)) {
            self.metrics.increment(Counter::AuthFailures);
        }
        result
    }

    async fn resolve_api_key(&self, raw: String, now: DateTime<Utc>) -> Result<ResolvedIdentity, IdentityError> {
        let Some(prefix) = lookup_prefix(&raw) else {
            tracing::debug!("malformed api key presented");
            return Err(IdentityError::Unauthenticated);
        };
        let candidates = self.store.find_api_keys_by_prefix(prefix).await?;
        if candidates.is_empty() {
            return Err(IdentityError::Unauthenticated);
        }

        // argon2 verification is CPU bound
        let matched = tokio::task::spawn_blocking(move || first_match(candidates, &raw))
            .await
            .map_err(|e| IdentityError::Backend(e.to_string()))?;

        let Some(key) = matched else {
            return Err(IdentityError::Unauthenticated);
        };
        if !key.is_usable(now) {
            tracing::debug!(api_key_id = %key.id, status = %key.status.as_str(), "unusable api key presented");
            return Err(IdentityError::Unauthenticated);
        }

        let store = self.store.clone();
        let (organization_id, api_key_id) = (key.organization_id, key.id);
        tokio::spawn(async move {
            if let Err(e) = store.touch_api_key(organization_id, api_key_id, now).await {
                tracing::warn!(error = %e, api_key_id = %api_key_id, "failed to record api key usage");
            }
        });

        Ok(ResolvedIdentity {
            principal: Principal::api_key(key.organization_id, key.id, key.scopes),
            organization: None,
            rate_limit_per_minute: Some(key.rate_limit_per_minute),
        })
    }

    async fn resolve_session(&self, token: &str, now: DateTime<Utc>) -> Result<ResolvedIdentity, IdentityError> {
        let claims = self
            .tokens
            .verify(token, now)
            .map_err(|_| IdentityError::Unauthenticated)?;

        let organization = self
            .store
            .get_organization(claims.org)
            .await?
            .ok_or(IdentityError::Unauthenticated)?;
        if !organization.status.is_active() {
            return Err(IdentityError::TenantInactive);
        }

        let user = self
            .store
            .get_user(organization.id, claims.sub)
            .await?
            .filter(|u| u.is_active())
            .ok_or(IdentityError::Unauthenticated)?;

        let mut principal = Principal::user(organization.id, user.id, user.role, user.plant_id);
        if claims.kind == TokenKind::Impersonation {
            let label = claims.imp.ok_or(IdentityError::Unauthenticated)?;
            principal = principal.with_impersonator(label);
        }

        Ok(ResolvedIdentity {
            principal,
            organization: Some(organization),
            rate_limit_per_minute: None,
        })
    }
}

fn first_match(candidates: Vec<ApiKey>, raw: &str) -> Option<ApiKey> {
    candidates.into_iter().find(|key| match key.matches(raw) {
        Ok(matched) => matched,
        Err(e) => {
            tracing::warn!(error = %e, api_key_id = %key.id, "stored api key hash is unreadable");
            false
        }
    })
}
