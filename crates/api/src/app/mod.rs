//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, resolver, guard, recorder and manager wiring
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request/response DTOs and the sample business records
//! - `errors.rs`: stable JSON error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs` and tests).
pub fn build_app(services: Arc<AppServices>) -> Router {
    // Protected routes: identity, tenant and quota checks run before handlers.
    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        services.clone(),
        middleware::auth_middleware,
    ));

    let admin = routes::admin::router().layer(axum::middleware::from_fn_with_state(
        services.clone(),
        middleware::admin_middleware,
    ));

    Router::new()
        .merge(routes::public_router())
        .merge(protected)
        .nest("/admin", admin)
        .layer(ServiceBuilder::new().layer(Extension(services)))
}

pub use services::AppServices;
