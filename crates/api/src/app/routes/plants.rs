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

use aquaops_auth::plant_scope;
use aquaops_core::{PlantId, RecordId};
use aquaops_infra::TenantRepo;

use crate::app::dto::{CreatePlantRequest, Plant, PlantResponse};
use crate::app::errors::ApiError;
use crate::app::routes::common::parse_id;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_plants).post(create_plant))
        .route("/:id", get(get_plant).delete(delete_plant))
}

fn repo(services: &AppServices) -> TenantRepo<Plant> {
    TenantRepo::new(services.store.clone())
}

fn plant_id(id: RecordId) -> PlantId {
    PlantId::from_uuid(*id.as_uuid())
}

/// GET /plants - plant-restricted users only see their own plant.
pub async fn list_plants(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, ApiError> {
    authz::require(&services, &ctx, "plants:read")?;
    let plants: Vec<PlantResponse> = repo(&services)
        .list(ctx.organization_id(), plant_scope(&ctx.principal))
        .await?
        .into_iter()
        .map(PlantResponse::from)
        .collect();
    Ok(Json(json!({ "plants": plants })).into_response())
}

/// POST /plants
pub async fn create_plant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<CreatePlantRequest>,
) -> Result<Response, ApiError> {
    authz::require(&services, &ctx, "plants:create")?;
    let name = body.name.trim().to_string();
    if name.is_empty() || name.len() > 200 {
        return Err(ApiError::validation("plant name must be 1-200 characters"));
    }

    let repo = repo(&services);
    let max_plants = ctx.tenant.limits().max_plants;
    if repo.count(ctx.organization_id()).await? >= max_plants {
        return Err(ApiError::Conflict(format!(
            "plan '{}' allows at most {max_plants} plants",
            ctx.tenant.plan()
        )));
    }

    let plant = Plant {
        name,
        location: body.location,
    };
    let stored = repo
        .insert(ctx.organization_id(), RecordId::new(), plant, Utc::now())
        .await?;

    services
        .audit
        .record(
            ctx.audit("plant.created", "plant")
                .entity_id(stored.id)
                .new_values(json!({ "name": stored.value.name, "location": stored.value.location })),
        )
        .await;

    Ok((StatusCode::CREATED, Json(PlantResponse::from(stored))).into_response())
}

/// GET /plants/:id
pub async fn get_plant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&services, &ctx, "plants:read")?;
    let id: RecordId = parse_id(&id)?;
    let stored = repo(&services)
        .get(ctx.organization_id(), id)
        .await?
        .ok_or(ApiError::NotFound)?;
    authz::require_plant(&services, &ctx, plant_id(stored.id))?;
    Ok(Json(PlantResponse::from(stored)).into_response())
}

/// DELETE /plants/:id
pub async fn delete_plant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&services, &ctx, "plants:delete")?;
    let id: RecordId = parse_id(&id)?;
    let repo = repo(&services);
    let stored = repo.get(ctx.organization_id(), id).await?.ok_or(ApiError::NotFound)?;
    authz::require_plant(&services, &ctx, plant_id(stored.id))?;

    repo.delete(ctx.organization_id(), id).await?;
    services
        .audit
        .record(
            ctx.audit("plant.deleted", "plant")
                .entity_id(id)
                .old_values(json!({ "name": stored.value.name })),
        )
        .await;

    Ok(StatusCode::NO_CONTENT.into_response())
}
