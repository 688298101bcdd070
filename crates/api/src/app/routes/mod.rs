use axum::{routing::get, Router};

pub mod admin;
pub mod api_keys;
pub mod audit;
pub mod auth;
pub mod billing;
pub mod common;
pub mod maintenance;
pub mod plants;
pub mod rbac;
pub mod system;
pub mod users;

/// Routes that need no credentials (webhooks verify their own signature).
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .merge(auth::router())
        .merge(billing::public_router())
}

/// Router for all authenticated (tenant-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .nest("/rbac", rbac::router())
        .nest("/users", users::router())
        .nest("/api-keys", api_keys::router())
        .nest("/audit", audit::router())
        .nest("/billing", billing::router())
        .nest("/plants", plants::router())
        .nest("/maintenance", maintenance::router())
}
