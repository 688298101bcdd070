use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use aquaops_infra::WebhookOutcome;

use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::RequestContext;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// Public: provider webhooks authenticate by signature.
pub fn public_router() -> Router {
    Router::new().route("/billing/webhook", post(webhook))
}

pub fn router() -> Router {
    Router::new()
        .route("/subscription", get(get_subscription))
        .route("/subscription/cancel", post(cancel))
        .route("/subscription/resume", post(resume))
}

/// POST /billing/webhook
pub async fn webhook(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidSignature("missing signature header".into()))?;

    let outcome = services
        .subscriptions
        .handle_webhook(signature, &body, Utc::now())
        .await?;

    let (label, reason) = match &outcome {
        WebhookOutcome::Applied => ("applied", None),
        WebhookOutcome::Unchanged => ("unchanged", None),
        WebhookOutcome::Ignored(reason) => ("ignored", Some(reason.as_str())),
        WebhookOutcome::Duplicate => ("duplicate", None),
    };
    Ok(Json(json!({ "received": true, "outcome": label, "reason": reason })).into_response())
}

/// GET /billing/subscription
pub async fn get_subscription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, ApiError> {
    authz::require(&services, &ctx, "billing:read")?;
    Ok(Json(json!({
        "subscription": ctx.tenant.organization().subscription,
        "limits": ctx.tenant.limits(),
    }))
    .into_response())
}

/// POST /billing/subscription/cancel - cancel at the end of the current period.
pub async fn cancel(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, ApiError> {
    authz::require_user(&services, &ctx, "billing:update")?;
    let state = services
        .subscriptions
        .cancel_at_period_end(ctx.organization_id(), ctx.audit_actor(), ctx.ip.clone(), Utc::now())
        .await?;
    Ok(Json(json!({ "subscription": state })).into_response())
}

/// POST /billing/subscription/resume
pub async fn resume(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, ApiError> {
    authz::require_user(&services, &ctx, "billing:update")?;
    let state = services
        .subscriptions
        .resume(ctx.organization_id(), ctx.audit_actor(), ctx.ip.clone(), Utc::now())
        .await?;
    Ok(Json(json!({ "subscription": state })).into_response())
}
