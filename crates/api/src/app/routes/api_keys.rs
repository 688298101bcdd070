use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use aquaops_auth::{ApiKey, Capability, NewApiKey};
use aquaops_core::ApiKeyId;

use crate::app::dto::{CreateApiKeyRequest, CreatedApiKeyResponse};
use crate::app::errors::ApiError;
use crate::app::routes::common::{blocking, parse_id};
use crate::app::services::AppServices;
use crate::authz;
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_keys).post(create_key))
        .route("/:id", axum::routing::delete(revoke_key))
}

/// GET /api-keys
pub async fn list_keys(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, ApiError> {
    authz::require(&services, &ctx, "api_keys:read")?;
    let keys = services.store.list_api_keys(ctx.organization_id()).await?;
    Ok(Json(json!({ "api_keys": keys })).into_response())
}

/// POST /api-keys - the raw key is returned once and never again.
pub async fn create_key(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<CreateApiKeyRequest>,
) -> Result<Response, ApiError> {
    let user_id = authz::require_user(&services, &ctx, "api_keys:create")?;
    let role = ctx.principal.role().ok_or(ApiError::Unauthenticated)?;

    let scopes = body
        .scopes
        .into_iter()
        .map(Capability::parse)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ApiError::validation(e.to_string()))?;

    let input = NewApiKey {
        organization_id: ctx.organization_id(),
        name: body.name,
        scopes,
        rate_limit_per_minute: body.rate_limit_per_minute,
        expires_at: body.expires_at,
        created_by: user_id,
        creator_role: role,
    };
    let (key, generated) = blocking(move || ApiKey::issue(input, Utc::now())).await??;
    services.store.insert_api_key(&key).await?;

    services
        .audit
        .record(
            ctx.audit("api_key.created", "api_key")
                .entity_id(key.id)
                .new_values(json!({ "name": key.name, "prefix": key.prefix, "scopes": key.scopes })),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(CreatedApiKeyResponse {
            api_key: key,
            key: generated.raw,
        }),
    )
        .into_response())
}

/// DELETE /api-keys/:id - revoke.
pub async fn revoke_key(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&services, &ctx, "api_keys:delete")?;
    let id: ApiKeyId = parse_id(&id)?;
    if !services.store.revoke_api_key(ctx.organization_id(), id).await? {
        return Err(ApiError::NotFound);
    }
    services.rate_limiter.forget(id);

    services
        .audit
        .record(ctx.audit("api_key.revoked", "api_key").entity_id(id))
        .await;

    Ok(StatusCode::NO_CONTENT.into_response())
}
