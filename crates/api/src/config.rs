//! Layered configuration: built-in defaults, optional `config/default.toml`,
//! optional `config/<APP_ENV>.toml`, then `AQUAOPS__SECTION__KEY` variables.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEV_JWT_SECRET: &str = "dev-insecure-jwt-secret-change-me";
const DEV_WEBHOOK_SECRET: &str = "whsec_dev_insecure";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub auth: AuthSettings,
    pub billing: BillingSettings,
    #[serde(default)]
    pub admin: AdminSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthSettings {
    pub jwt_secret: String,
    pub session_ttl_secs: i64,
    pub impersonation_ttl_secs: i64,
    pub cookie_secure: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BillingSettings {
    pub webhook_secret: String,
    pub signature_tolerance_secs: i64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AdminSettings {
    /// Argon2 PHC hash of the super-admin key. Unset disables `/admin`.
    pub key_hash: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    /// Postgres URL. Unset keeps everything in memory.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "0.0.0.0".into(),
                port: 8080,
            },
            auth: AuthSettings {
                jwt_secret: DEV_JWT_SECRET.into(),
                session_ttl_secs: 12 * 60 * 60,
                impersonation_ttl_secs: 60 * 60,
                cookie_secure: false,
            },
            billing: BillingSettings {
                webhook_secret: DEV_WEBHOOK_SECRET.into(),
                signature_tolerance_secs: aquaops_billing::webhook::DEFAULT_TOLERANCE_SECS,
            },
            admin: AdminSettings::default(),
            database: DatabaseSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".into());
        let defaults = AppConfig::default();
        let config = Config::builder()
            .set_default("server.host", defaults.server.host)?
            .set_default("server.port", defaults.server.port)?
            .set_default("auth.jwt_secret", defaults.auth.jwt_secret)?
            .set_default("auth.session_ttl_secs", defaults.auth.session_ttl_secs)?
            .set_default("auth.impersonation_ttl_secs", defaults.auth.impersonation_ttl_secs)?
            .set_default("auth.cookie_secure", defaults.auth.cookie_secure)?
            .set_default("billing.webhook_secret", defaults.billing.webhook_secret)?
            .set_default("billing.signature_tolerance_secs", defaults.billing.signature_tolerance_secs)?
            .set_default("database.max_connections", defaults.database.max_connections)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{env}")).required(false))
            .add_source(Environment::with_prefix("AQUAOPS").separator("__").try_parsing(true))
            .build()?;
        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.len() < 16 {
            return Err(ConfigError::Message("auth.jwt_secret must be at least 16 bytes".into()));
        }
        if self.auth.session_ttl_secs <= 0 || self.auth.impersonation_ttl_secs <= 0 {
            return Err(ConfigError::Message("token TTLs must be positive".into()));
        }
        Ok(())
    }

    /// Log a warning for every development default still in effect.
    pub fn warn_insecure_defaults(&self) {
        if self.auth.jwt_secret == DEV_JWT_SECRET {
            tracing::warn!("auth.jwt_secret not set; using insecure development secret");
        }
        if self.billing.webhook_secret == DEV_WEBHOOK_SECRET {
            tracing::warn!("billing.webhook_secret not set; using insecure development secret");
        }
        if !self.auth.cookie_secure {
            tracing::warn!("auth.cookie_secure is off; session cookies will be sent over plain http");
        }
        if self.admin.key_hash.is_none() {
            tracing::info!("admin.key_hash not set; super-admin console disabled");
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
