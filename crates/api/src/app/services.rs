//! Service wiring shared by every handler through `Extension<Arc<AppServices>>`.

use std::sync::Arc;

use chrono::Duration;

use aquaops_auth::TokenCodec;
use aquaops_billing::WebhookVerifier;
use aquaops_infra::{
    ApiKeyRateLimiter, AuditRecorder, IdentityResolver, InMemoryStore, PostgresStore, Store, SubscriptionManager,
    TenantGuard,
};
use aquaops_observability::{InMemoryMetrics, MetricsSink};

use crate::config::AppConfig;

/// Cookie and token settings handlers need at request time.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub session_ttl: Duration,
    pub impersonation_ttl: Duration,
    pub cookie_secure: bool,
}

pub struct AppServices {
    pub store: Arc<dyn Store>,
    pub metrics: Arc<dyn MetricsSink>,
    pub tokens: TokenCodec,
    pub identity: IdentityResolver,
    pub tenants: TenantGuard,
    pub audit: AuditRecorder,
    pub subscriptions: SubscriptionManager,
    pub rate_limiter: ApiKeyRateLimiter,
    pub sessions: SessionSettings,
    pub admin_key_hash: Option<String>,
}

impl AppServices {
    pub fn new(config: &AppConfig, store: Arc<dyn Store>, metrics: Arc<dyn MetricsSink>) -> Self {
        let tokens = TokenCodec::hs256(config.auth.jwt_secret.as_bytes());
        let audit = AuditRecorder::new(store.clone(), metrics.clone());
        let verifier = WebhookVerifier::new(
            config.billing.webhook_secret.clone().into_bytes(),
            config.billing.signature_tolerance_secs,
        );

        Self {
            identity: IdentityResolver::new(store.clone(), tokens.clone(), metrics.clone()),
            tenants: TenantGuard::new(store.clone()),
            subscriptions: SubscriptionManager::new(store.clone(), audit.clone(), metrics.clone(), verifier),
            audit,
            tokens,
            rate_limiter: ApiKeyRateLimiter::new(),
            sessions: SessionSettings {
                session_ttl: Duration::seconds(config.auth.session_ttl_secs),
                impersonation_ttl: Duration::seconds(config.auth.impersonation_ttl_secs),
                cookie_secure: config.auth.cookie_secure,
            },
            admin_key_hash: config.admin.key_hash.clone(),
            store,
            metrics,
        }
    }

    /// In-memory stores, for tests and local runs.
    pub fn in_memory(config: &AppConfig) -> Self {
        Self::new(config, Arc::new(InMemoryStore::new()), Arc::new(InMemoryMetrics::new()))
    }
}

/// Postgres when `database.url` is set, otherwise in-memory.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let metrics: Arc<dyn MetricsSink> = Arc::new(InMemoryMetrics::new());
    let store: Arc<dyn Store> = match &config.database.url {
        Some(url) => {
            let store = PostgresStore::connect(url, config.database.max_connections).await?;
            store.migrate().await?;
            tracing::info!("using postgres store");
            Arc::new(store)
        }
        None => {
            tracing::warn!("database.url not set; data is kept in memory and lost on restart");
            Arc::new(InMemoryStore::new())
        }
    };
    Ok(AppServices::new(config, store, metrics))
}
