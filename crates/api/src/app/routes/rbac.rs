//! RBAC introspection: the role catalogue and "why was this allowed/denied"
//! for the calling principal.

use axum::{
    extract::{Extension, Query},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;

use aquaops_auth::{Capability, explain_authorization, role_definitions};

use crate::app::dto::ExplainQuery;
use crate::app::errors::ApiError;
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/roles", get(list_roles))
        .route("/explain", get(explain))
}

/// GET /rbac/roles
pub async fn list_roles() -> Response {
    Json(json!({ "roles": role_definitions() })).into_response()
}

/// GET /rbac/explain?capability=plants:create
pub async fn explain(
    Extension(ctx): Extension<RequestContext>,
    Query(query): Query<ExplainQuery>,
) -> Result<Response, ApiError> {
    let required = Capability::parse(query.capability).map_err(|e| ApiError::validation(e.to_string()))?;
    let explanation = explain_authorization(&ctx.principal, &required);
    Ok(Json(explanation).into_response())
}
