use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use aquaops_auth::{Actor, SecretHasher};
use aquaops_infra::Credentials;
use aquaops_observability::Counter;

use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::RequestContext;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const ADMIN_KEY_HEADER: &str = "x-admin-key";
pub const SESSION_COOKIE: &str = "session";

/// Resolve identity, load the tenant and apply the API-key quota before any
/// handler runs. Inserts a [`RequestContext`].
pub async fn auth_middleware(
    State(services): State<Arc<AppServices>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let credentials = extract_credentials(req.headers());
    let resolved = services.identity.resolve(credentials, Utc::now()).await?;

    let tenant = services
        .tenants
        .load_tenant(&resolved.principal, resolved.organization)
        .await?;

    if let (Actor::ApiKey { api_key_id, .. }, Some(per_minute)) =
        (&resolved.principal.actor, resolved.rate_limit_per_minute)
    {
        if let Err(e) = services.rate_limiter.check(*api_key_id, per_minute) {
            services.metrics.increment(Counter::RateLimited);
            tracing::info!(api_key_id = %api_key_id, per_minute, "api key rate limited");
            return Err(e.into());
        }
    }

    let ip = client_ip(&req);
    req.extensions_mut().insert(RequestContext {
        principal: resolved.principal,
        tenant,
        ip,
    });

    Ok(next.run(req).await)
}

/// Gate for the super-admin console: `X-Admin-Key` checked against the
/// configured Argon2 hash.
pub async fn admin_middleware(
    State(services): State<Arc<AppServices>>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(hash) = services.admin_key_hash.clone() else {
        return Err(ApiError::NotFound);
    };
    let presented = req
        .headers()
        .get(ADMIN_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(ApiError::Unauthenticated)?;

    let verified = tokio::task::spawn_blocking(move || SecretHasher::verify(&presented, &hash))
        .await
        .map_err(|e| ApiError::internal(e.to_string()))??;
    if !verified {
        services.metrics.increment(Counter::AuthFailures);
        tracing::warn!("rejected super-admin key");
        return Err(ApiError::Unauthenticated);
    }

    Ok(next.run(req).await)
}

/// `X-API-Key` first, then the `session` cookie, then `Authorization: Bearer`.
pub fn extract_credentials(headers: &HeaderMap) -> Credentials {
    if let Some(key) = headers.get(API_KEY_HEADER) {
        return Credentials {
            api_key: Some(key.to_str().unwrap_or_default().trim().to_string()),
            session_token: None,
        };
    }
    Credentials {
        api_key: None,
        session_token: session_cookie(headers).or_else(|| extract_bearer(headers)),
    }
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == SESSION_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// First `X-Forwarded-For` hop, else the peer address.
pub fn client_ip(req: &Request) -> Option<String> {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    forwarded.or_else(|| {
        req.extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn api_key_header_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(API_KEY_HEADER, HeaderValue::from_static("wwtp_abc"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        let creds = extract_credentials(&headers);
        assert_eq!(creds.api_key.as_deref(), Some("wwtp_abc"));
        assert!(creds.session_token.is_none());
    }

    #[test]
    fn cookie_beats_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; session=from-cookie"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(extract_credentials(&headers).session_token.as_deref(), Some("from-cookie"));

        headers.remove(header::COOKIE);
        assert_eq!(extract_credentials(&headers).session_token.as_deref(), Some("from-header"));
    }

    #[test]
    fn empty_bearer_is_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert!(extract_credentials(&headers).session_token.is_none());
    }
}
