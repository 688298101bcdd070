use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;

use aquaops_infra::AuditFilter;

use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new().route("/", get(query_audit))
}

/// GET /audit?action=&entity_type=&entity_id=&from=&to=&limit=&offset=
pub async fn query_audit(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Query(filter): Query<AuditFilter>,
) -> Result<Response, ApiError> {
    authz::require(&services, &ctx, "audit:read")?;
    let entries = services.audit.query(ctx.organization_id(), &filter).await?;
    Ok(Json(json!({
        "entries": entries,
        "limit": filter.effective_limit(),
        "offset": filter.effective_offset(),
    }))
    .into_response())
}
