use secrecy::SecretString;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AgentBillingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub storage: StorageConfig,
    pub billing: BillingConfig,
    pub encryption: EncryptionConfig,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub database_url: Option<SecretString>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    /// Write-through in-memory store without atomic rollback.
    Memory,
}

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub settle_batch_size: usize,
    pub default_currency: String,
    pub import_max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct EncryptionConfig {
    /// Base64 of a 32 byte key. Sensitive settings are stored in plaintext without it.
    pub key: Option<SecretString>,
    pub key_id: String,
}

impl AgentBillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common = core_config::Config::load()?;
        let is_prod = common.is_production()
            || env::var("ENVIRONMENT").is_ok_and(|value| value == "prod");

        let backend: StorageBackend = get_env("STORAGE_BACKEND", Some("postgres"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let database_url = match backend {
            StorageBackend::Postgres => Some(SecretString::new(get_env(
                "DATABASE_URL",
                None,
                is_prod,
            )?)),
            StorageBackend::Memory => None,
        };

        Ok(Self {
            common,
            service_name: get_env("SERVICE_NAME", Some("agent-billing-service"), false)?,
            service_version: get_env(
                "SERVICE_VERSION",
                Some(env!("CARGO_PKG_VERSION")),
                false,
            )?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            storage: StorageConfig {
                backend,
                database_url,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 1)?,
            },
            billing: BillingConfig {
                settle_batch_size: parse_env("SETTLE_BATCH_SIZE", 100)?,
                default_currency: get_env("DEFAULT_CURRENCY", Some("IDR"), false)?,
                import_max_attempts: parse_env("IMPORT_MAX_ATTEMPTS", 3)?,
            },
            encryption: EncryptionConfig {
                key: env::var("SETTINGS_ENCRYPTION_KEY")
                    .ok()
                    .filter(|v| !v.is_empty())
                    .map(SecretString::new),
                key_id: get_env("SETTINGS_ENCRYPTION_KEY_ID", Some("k1"), false)?,
            },
        })
    }
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            "memory" => Ok(StorageBackend::Memory),
            _ => Err(format!("Invalid storage backend: {}", s)),
        }
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val.parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("{} has invalid value '{}': {}", key, val, e))
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_backend_parsing() {
        assert_eq!("postgres".parse::<StorageBackend>(), Ok(StorageBackend::Postgres));
        assert_eq!("MEMORY".parse::<StorageBackend>(), Ok(StorageBackend::Memory));
        assert!("mongo".parse::<StorageBackend>().is_err());
    }
}
