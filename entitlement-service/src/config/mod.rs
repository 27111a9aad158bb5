//! Configuration module for entitlement-service.

use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

#[derive(Debug, Clone)]
pub struct EntitlementConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub storage: StorageBackend,
    /// Present when `storage` is postgres.
    pub database: Option<DatabaseConfig>,
    /// Without a gateway the in-process mock provider is used.
    pub payment_gateway: Option<PaymentGatewayConfig>,
    pub currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct PaymentGatewayConfig {
    pub base_url: String,
    pub api_key: Secret<String>,
    pub timeout_secs: u64,
}

impl EntitlementConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        Self::from_lookup(common, |key| env::var(key).ok())
    }

    fn from_lookup(
        common: core_config::Config,
        var: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AppError> {
        let storage = match var("STORAGE_BACKEND").as_deref() {
            None | Some("postgres") => StorageBackend::Postgres,
            Some("memory") => StorageBackend::Memory,
            Some(other) => {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "STORAGE_BACKEND must be 'postgres' or 'memory', got '{}'",
                    other
                )))
            }
        };

        let database = match storage {
            StorageBackend::Postgres => Some(DatabaseConfig {
                url: var("DATABASE_URL").ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!("DATABASE_URL is required"))
                })?,
                max_connections: var("DATABASE_MAX_CONNECTIONS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
                min_connections: var("DATABASE_MIN_CONNECTIONS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2),
            }),
            StorageBackend::Memory => None,
        };

        let payment_gateway = var("PAYMENT_GATEWAY_URL")
            .filter(|url| !url.is_empty())
            .map(|base_url| PaymentGatewayConfig {
                base_url,
                api_key: Secret::new(var("PAYMENT_GATEWAY_API_KEY").unwrap_or_default()),
                timeout_secs: var("PAYMENT_GATEWAY_TIMEOUT_SECS")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(15),
            });

        Ok(Self {
            common,
            service_name: var("SERVICE_NAME").unwrap_or_else(|| "entitlement-service".to_string()),
            service_version: var("SERVICE_VERSION")
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            otlp_endpoint: var("OTLP_ENDPOINT"),
            storage,
            database,
            payment_gateway,
            currency: var("PAYMENT_CURRENCY").unwrap_or_else(|| "MNT".to_string()),
        })
    }
}
