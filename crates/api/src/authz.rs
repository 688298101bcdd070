//! Authorization checks at the handler boundary.

use aquaops_auth::{Capability, authorize, authorize_plant};
use aquaops_core::PlantId;
use aquaops_observability::Counter;

use crate::app::errors::ApiError;
use crate::app::services::AppServices;
use crate::context::RequestContext;

/// Require `capability` for the caller. Denials are logged and counted.
pub fn require(services: &AppServices, ctx: &RequestContext, capability: &'static str) -> Result<(), ApiError> {
    authorize(&ctx.principal, &Capability::from_static(capability)).map_err(|e| {
        services.metrics.increment(Counter::PermissionDenials);
        tracing::info!(
            principal = %ctx.principal.label(),
            organization_id = %ctx.organization_id(),
            capability,
            "authorization denied"
        );
        ApiError::from(e)
    })
}

/// Plant-restricted users may only touch their assigned plant.
pub fn require_plant(services: &AppServices, ctx: &RequestContext, plant_id: PlantId) -> Result<(), ApiError> {
    authorize_plant(&ctx.principal, plant_id).map_err(|e| {
        services.metrics.increment(Counter::PermissionDenials);
        tracing::info!(principal = %ctx.principal.label(), plant_id = %plant_id, "plant access denied");
        ApiError::from(e)
    })
}

/// `require` plus ensuring the caller is a user (not an API key).
pub fn require_user(
    services: &AppServices,
    ctx: &RequestContext,
    capability: &'static str,
) -> Result<aquaops_core::UserId, ApiError> {
    require(services, ctx, capability)?;
    ctx.user_id()
        .ok_or_else(|| ApiError::PermissionDenied(format!("'{capability}' requires a user session")))
}
