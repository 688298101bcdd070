//! Registration, login and logout. Public routes.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use chrono::Utc;

use aquaops_auth::user::normalize_email;
use aquaops_auth::{SecretHasher, SessionSubject, User};
use aquaops_core::Organization;
use aquaops_infra::{AuditActor, AuditRecord};
use aquaops_observability::Counter;

use crate::app::dto::{LoginRequest, RegisterRequest, SessionResponse};
use crate::app::errors::ApiError;
use crate::app::routes::common::{blocking, expired_session_cookie, session_cookie};
use crate::app::services::AppServices;

const MIN_PASSWORD_LEN: usize = 8;

pub fn router() -> Router {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

/// POST /auth/register - create an organization and its owner, signed in.
pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    if body.password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::validation("password must be at least 8 characters"));
    }
    let now = Utc::now();
    let organization = Organization::register(body.organization_name, body.slug, now)?;

    let password = body.password;
    let hash = blocking(move || SecretHasher::hash(&password)).await??;
    let owner = User::founding_owner(organization.id, &body.owner_email, &body.owner_name, hash, now)?;

    services.store.create_organization(&organization, &owner).await?;
    tracing::info!(organization_id = %organization.id, slug = %organization.slug, "organization registered");

    services
        .audit
        .record(
            AuditRecord::new(organization.id, AuditActor::User(owner.id), "organization.registered", "organization")
                .entity_id(organization.id)
                .new_values(serde_json::json!({ "name": organization.name, "slug": organization.slug })),
        )
        .await;

    session_response(&services, StatusCode::CREATED, organization, owner)
}

/// POST /auth/login - slug + email + password. Every failure looks the same.
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let rejected = || {
        services.metrics.increment(Counter::AuthFailures);
        ApiError::Unauthenticated
    };

    let organization = services
        .store
        .find_organization_by_slug(&body.organization_slug.trim().to_lowercase())
        .await?;
    let user = match (&organization, normalize_email(&body.email)) {
        (Some(organization), Ok(email)) => services
            .store
            .find_user_by_email(organization.id, &email)
            .await?
            .filter(User::is_active),
        _ => None,
    };

    let password = body.password;
    let stored_hash = user.as_ref().and_then(|u| u.password_hash.clone());
    // unknown accounts cost the same Argon2 work as a wrong password
    let verified = blocking(move || match stored_hash {
        Some(hash) => SecretHasher::verify(&password, &hash),
        None => Ok(SecretHasher::verify_dummy(&password)),
    })
    .await??;

    let (Some(organization), Some(user), true) = (organization, user, verified) else {
        return Err(rejected());
    };
    if !organization.status.is_active() {
        return Err(ApiError::TenantInactive);
    }

    services
        .audit
        .record(AuditRecord::new(organization.id, AuditActor::User(user.id), "user.login", "user").entity_id(user.id))
        .await;

    session_response(&services, StatusCode::OK, organization, user)
}

/// POST /auth/logout - clears the session cookie.
pub async fn logout(Extension(services): Extension<Arc<AppServices>>) -> Response {
    (
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, expired_session_cookie(services.sessions.cookie_secure))],
    )
        .into_response()
}

fn session_response(
    services: &AppServices,
    status: StatusCode,
    organization: Organization,
    user: User,
) -> Result<Response, ApiError> {
    let now = Utc::now();
    let ttl = services.sessions.session_ttl;
    let subject = SessionSubject {
        user_id: user.id,
        organization_id: organization.id,
        org_slug: organization.slug.clone(),
        role: user.role,
        plant_id: user.plant_id,
    };
    let token = services.tokens.issue_session(&subject, ttl, now)?;
    let cookie = session_cookie(&token, ttl, services.sessions.cookie_secure);

    Ok((
        status,
        [(header::SET_COOKIE, cookie)],
        Json(SessionResponse {
            token,
            expires_at: now + ttl,
            organization,
            user,
        }),
    )
        .into_response())
}
