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
use aquaops_core::RecordId;
use aquaops_infra::TenantRepo;

use crate::app::dto::{CreateTaskRequest, MaintenanceTask, Plant, TaskResponse};
use crate::app::errors::ApiError;
use crate::app::routes::common::parse_id;
use crate::app::services::AppServices;
use crate::authz;
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/tasks", get(list_tasks).post(create_task))
        .route("/tasks/:id", get(get_task))
}

fn tasks(services: &AppServices) -> TenantRepo<MaintenanceTask> {
    TenantRepo::new(services.store.clone())
}

/// GET /maintenance/tasks
pub async fn list_tasks(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, ApiError> {
    authz::require(&services, &ctx, "maintenance:read")?;
    let tasks: Vec<TaskResponse> = tasks(&services)
        .list(ctx.organization_id(), plant_scope(&ctx.principal))
        .await?
        .into_iter()
        .map(TaskResponse::from)
        .collect();
    Ok(Json(json!({ "tasks": tasks })).into_response())
}

/// POST /maintenance/tasks
pub async fn create_task(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<CreateTaskRequest>,
) -> Result<Response, ApiError> {
    authz::require(&services, &ctx, "maintenance:create")?;
    authz::require_plant(&services, &ctx, body.plant_id)?;

    let title = body.title.trim().to_string();
    if title.is_empty() || title.len() > 200 {
        return Err(ApiError::validation("task title must be 1-200 characters"));
    }

    // the plant must exist in this organization
    let plants: TenantRepo<Plant> = TenantRepo::new(services.store.clone());
    let plant_record = RecordId::from_uuid(*body.plant_id.as_uuid());
    if plants.get(ctx.organization_id(), plant_record).await?.is_none() {
        return Err(ApiError::NotFound);
    }

    let task = MaintenanceTask {
        plant_id: body.plant_id,
        title,
        description: body.description,
        status: "open".into(),
        due_at: body.due_at,
    };
    let stored = tasks(&services)
        .insert(ctx.organization_id(), RecordId::new(), task, Utc::now())
        .await?;

    services
        .audit
        .record(
            ctx.audit("maintenance_task.created", "maintenance_task")
                .entity_id(stored.id)
                .new_values(json!({ "plant_id": stored.value.plant_id, "title": stored.value.title })),
        )
        .await;

    Ok((StatusCode::CREATED, Json(TaskResponse::from(stored))).into_response())
}

/// GET /maintenance/tasks/:id
pub async fn get_task(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    authz::require(&services, &ctx, "maintenance:read")?;
    let id: RecordId = parse_id(&id)?;
    let stored = tasks(&services)
        .get(ctx.organization_id(), id)
        .await?
        .ok_or(ApiError::NotFound)?;
    authz::require_plant(&services, &ctx, stored.value.plant_id)?;
    Ok(Json(TaskResponse::from(stored)).into_response())
}
