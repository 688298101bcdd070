use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

use aquaops_auth::{NewUser, SecretHasher, User, transfer_ownership};
use aquaops_core::UserId;

use crate::app::dto::{ChangeRoleRequest, CreateUserRequest};
use crate::app::errors::ApiError;
use crate::app::routes::common::{blocking, parse_id};
use crate::app::services::AppServices;
use crate::authz;
use crate::context::RequestContext;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/:id", axum::routing::delete(delete_user))
        .route("/:id/role", patch(change_role))
        .route("/:id/transfer-ownership", post(transfer))
}

/// The acting user's current row.
async fn acting_user(services: &AppServices, ctx: &RequestContext, id: UserId) -> Result<User, ApiError> {
    services
        .store
        .get_user(ctx.organization_id(), id)
        .await?
        .ok_or(ApiError::Unauthenticated)
}

async fn target_user(services: &AppServices, ctx: &RequestContext, raw_id: &str) -> Result<User, ApiError> {
    let id: UserId = parse_id(raw_id)?;
    services
        .store
        .get_user(ctx.organization_id(), id)
        .await?
        .ok_or(ApiError::NotFound)
}

/// GET /users
pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Response, ApiError> {
    authz::require(&services, &ctx, "users:read")?;
    let users = services.store.list_users(ctx.organization_id()).await?;
    Ok(Json(json!({ "users": users })).into_response())
}

/// POST /users - add a member (never an owner), within the plan's user limit.
pub async fn create_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<CreateUserRequest>,
) -> Result<Response, ApiError> {
    let actor_id = authz::require_user(&services, &ctx, "users:create")?;
    let actor = acting_user(&services, &ctx, actor_id).await?;

    let max_users = ctx.tenant.limits().max_users;
    if services.store.count_users(ctx.organization_id()).await? >= max_users {
        return Err(ApiError::Conflict(format!(
            "plan '{}' allows at most {max_users} users",
            ctx.tenant.plan()
        )));
    }

    let password_hash = match body.password {
        Some(password) if password.len() < 8 => {
            return Err(ApiError::validation("password must be at least 8 characters"));
        }
        Some(password) => Some(blocking(move || SecretHasher::hash(&password)).await??),
        None => None,
    };

    let user = User::new_member(
        NewUser {
            organization_id: ctx.organization_id(),
            email: body.email,
            name: body.name,
            role: body.role,
            plant_id: body.plant_id,
            password_hash,
        },
        actor.role,
        Utc::now(),
    )?;
    services.store.insert_user(&user).await?;

    services
        .audit
        .record(
            ctx.audit("user.created", "user")
                .entity_id(user.id)
                .new_values(json!({ "email": user.email, "role": user.role, "plant_id": user.plant_id })),
        )
        .await;

    Ok((StatusCode::CREATED, Json(json!({ "user": user }))).into_response())
}

/// PATCH /users/:id/role
pub async fn change_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
    Json(body): Json<ChangeRoleRequest>,
) -> Result<Response, ApiError> {
    let actor_id = authz::require_user(&services, &ctx, "users:update")?;
    let actor = acting_user(&services, &ctx, actor_id).await?;
    let mut target = target_user(&services, &ctx, &id).await?;

    let previous = target.role;
    target.change_role(&actor, body.role, Utc::now())?;
    services.store.update_user(ctx.organization_id(), &target).await?;

    services
        .audit
        .record(
            ctx.audit("user.role_changed", "user")
                .entity_id(target.id)
                .old_values(json!({ "role": previous }))
                .new_values(json!({ "role": target.role })),
        )
        .await;

    Ok(Json(json!({ "user": target })).into_response())
}

/// DELETE /users/:id
pub async fn delete_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let actor_id = authz::require_user(&services, &ctx, "users:delete")?;
    let actor = acting_user(&services, &ctx, actor_id).await?;
    let target = target_user(&services, &ctx, &id).await?;

    target.ensure_deletable_by(&actor)?;
    if !services.store.delete_user(ctx.organization_id(), target.id).await? {
        return Err(ApiError::NotFound);
    }

    services
        .audit
        .record(
            ctx.audit("user.deleted", "user")
                .entity_id(target.id)
                .old_values(json!({ "email": target.email, "role": target.role })),
        )
        .await;

    Ok(StatusCode::NO_CONTENT.into_response())
}

/// POST /users/:id/transfer-ownership - current owner only.
pub async fn transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let actor_id = authz::require_user(&services, &ctx, "users:update")?;
    let mut current = acting_user(&services, &ctx, actor_id).await?;
    let mut next = target_user(&services, &ctx, &id).await?;

    transfer_ownership(&mut current, &mut next, Utc::now())?;
    services
        .store
        .save_ownership_transfer(ctx.organization_id(), &current, &next)
        .await?;
    tracing::info!(
        organization_id = %ctx.organization_id(),
        from = %current.id,
        to = %next.id,
        "ownership transferred"
    );

    services
        .audit
        .record(
            ctx.audit("organization.ownership_transferred", "organization")
                .entity_id(ctx.organization_id())
                .old_values(json!({ "owner": current.id }))
                .new_values(json!({ "owner": next.id })),
        )
        .await;

    Ok(Json(json!({ "previous_owner": current, "owner": next })).into_response())
}
