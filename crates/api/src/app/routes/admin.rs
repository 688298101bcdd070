//! Super-admin console. Authenticated by `X-Admin-Key`, not by tenant
//! credentials; every status change is audited as `super_admin`.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use aquaops_auth::{Role, SessionSubject};
use aquaops_core::{OrganizationId, OrganizationStatus};
use aquaops_infra::{AuditActor, AuditRecord};

use crate::app::dto::ImpersonateRequest;
use crate::app::errors::ApiError;
use crate::app::routes::common::parse_id;
use crate::app::services::AppServices;

const IMPERSONATOR_LABEL: &str = "super_admin";

pub fn router() -> Router {
    Router::new()
        .route("/organizations", get(list_organizations))
        .route("/organizations/:id/suspend", post(suspend))
        .route("/organizations/:id/activate", post(activate))
        .route("/organizations/:id/cancel", post(cancel))
        .route("/organizations/:id", delete(delete_organization))
        .route("/impersonate", post(impersonate))
        .route("/metrics", get(metrics))
}

/// GET /admin/organizations
pub async fn list_organizations(Extension(services): Extension<Arc<AppServices>>) -> Result<Response, ApiError> {
    let organizations = services.store.list_organizations().await?;
    Ok(Json(json!({ "organizations": organizations })).into_response())
}

pub async fn suspend(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    set_status(&services, &id, OrganizationStatus::Suspended, "organization.suspended").await
}

pub async fn activate(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    set_status(&services, &id, OrganizationStatus::Active, "organization.activated").await
}

pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    set_status(&services, &id, OrganizationStatus::Cancelled, "organization.cancelled").await
}

async fn set_status(
    services: &AppServices,
    raw_id: &str,
    status: OrganizationStatus,
    action: &'static str,
) -> Result<Response, ApiError> {
    let id: OrganizationId = parse_id(raw_id)?;
    let previous = services
        .store
        .get_organization(id)
        .await?
        .ok_or(ApiError::NotFound)?;
    let organization = services.store.set_organization_status(id, status, Utc::now()).await?;
    tracing::info!(organization_id = %id, from = %previous.status, to = %status, "organization status changed");

    services
        .audit
        .record(
            AuditRecord::new(id, AuditActor::SuperAdmin, action, "organization")
                .entity_id(id)
                .old_values(json!({ "status": previous.status }))
                .new_values(json!({ "status": status })),
        )
        .await;

    Ok(Json(json!({ "organization": organization })).into_response())
}

/// DELETE /admin/organizations/:id - removes the tenant and everything it owns.
pub async fn delete_organization(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id: OrganizationId = parse_id(&id)?;
    if !services.store.delete_organization(id).await? {
        return Err(ApiError::NotFound);
    }
    tracing::warn!(organization_id = %id, "organization deleted by super admin");
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// POST /admin/impersonate - a short-lived token acting as a tenant user.
pub async fn impersonate(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<ImpersonateRequest>,
) -> Result<Response, ApiError> {
    let organization_id: OrganizationId = parse_id(&body.organization_id)?;
    let organization = services
        .store
        .get_organization(organization_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let user = match body.user_id {
        Some(user_id) => services.store.get_user(organization.id, user_id).await?,
        None => services
            .store
            .list_users(organization.id)
            .await?
            .into_iter()
            .find(|u| u.role == Role::Owner),
    }
    .filter(|u| u.is_active())
    .ok_or(ApiError::NotFound)?;

    let now = Utc::now();
    let ttl = services.sessions.impersonation_ttl;
    let subject = SessionSubject {
        user_id: user.id,
        organization_id: organization.id,
        org_slug: organization.slug.clone(),
        role: user.role,
        plant_id: user.plant_id,
    };
    let token = services
        .tokens
        .issue_impersonation(&subject, IMPERSONATOR_LABEL, ttl, now)?;

    services
        .audit
        .record(
            AuditRecord::new(organization.id, AuditActor::SuperAdmin, "user.impersonated", "user").entity_id(user.id),
        )
        .await;

    Ok(Json(json!({
        "token": token,
        "expires_at": now + ttl,
        "user_id": user.id,
        "organization_id": organization.id,
    }))
    .into_response())
}

/// GET /admin/metrics
pub async fn metrics(Extension(services): Extension<Arc<AppServices>>) -> Response {
    Json(services.metrics.snapshot()).into_response()
}
