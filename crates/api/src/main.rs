use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;

use aquaops_api::app::{build_app, services::build_services};
use aquaops_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // a missing .env is fine
    let _ = dotenvy::dotenv();
    aquaops_observability::init();

    let config = AppConfig::load().context("failed to load configuration")?;
    config.warn_insecure_defaults();

    let services = Arc::new(build_services(&config).await?);
    let app = build_app(services);

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
