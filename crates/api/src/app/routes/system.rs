use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};

use crate::context::RequestContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Extension(ctx): Extension<RequestContext>) -> impl IntoResponse {
    let organization = ctx.tenant.organization();
    Json(serde_json::json!({
        "organization_id": organization.id,
        "organization_slug": organization.slug,
        "plan": ctx.tenant.plan(),
        "principal": ctx.principal.label(),
        "actor": ctx.principal.actor,
        "plant_id": ctx.principal.plant_id,
        "impersonator": ctx.principal.impersonator(),
        "capabilities": ctx.principal.effective_capabilities(),
    }))
}
