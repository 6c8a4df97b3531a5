//! Configuration types, built from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Read an optional variable, parsing it when present.
fn parse_env<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(None),
    }
}

fn required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Connection details for one outbound provider.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Base URL; endpoint paths are appended to it.
    pub base_url: String,
    /// Bearer token sent with every request.
    pub api_key: SecretString,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: SecretString::from(api_key.into()),
        }
    }

    fn from_env(url_key: &str, key_key: &str, default_url: &str) -> Self {
        let base_url = std::env::var(url_key).unwrap_or_else(|_| default_url.to_string());
        let api_key = std::env::var(key_key).unwrap_or_default();
        Self::new(base_url, api_key)
    }
}

/// Bounded retry policy for provider rate limits and server errors.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Extra attempts after the first one. Zero disables retrying.
    pub max_retries: usize,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            min_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }
}

/// Messaging service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub sms_provider: ProviderConfig,
    pub email_provider: ProviderConfig,
    /// Timeout applied to every outbound provider POST.
    pub provider_timeout: Duration,
    pub retry: RetryConfig,
    /// Reported by `/health`.
    pub version: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            db_path: PathBuf::from("./data/courier.db"),
            sms_provider: ProviderConfig::new("http://localhost:8001", ""),
            email_provider: ProviderConfig::new("http://localhost:8002", ""),
            provider_timeout: Duration::from_secs(10),
            retry: RetryConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServiceConfig {
    /// Build config from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let timeout_secs: u64 = parse_env("PROVIDER_TIMEOUT_SECS")?.unwrap_or(10);
        let max_retries: usize =
            parse_env("PROVIDER_MAX_RETRIES")?.unwrap_or(defaults.retry.max_retries);

        Ok(Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: parse_env("PORT")?.unwrap_or(defaults.port),
            db_path: std::env::var("COURIER_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            sms_provider: ProviderConfig::from_env(
                "SMS_PROVIDER_URL",
                "SMS_PROVIDER_API_KEY",
                "http://localhost:8001",
            ),
            email_provider: ProviderConfig::from_env(
                "EMAIL_PROVIDER_URL",
                "EMAIL_PROVIDER_API_KEY",
                "http://localhost:8002",
            ),
            provider_timeout: Duration::from_secs(timeout_secs),
            retry: RetryConfig {
                max_retries,
                ..defaults.retry
            },
            version: std::env::var("COMMIT_HASH").unwrap_or(defaults.version),
        })
    }

    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Mock provider simulator configuration.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub host: String,
    pub port: u16,
    /// Where simulated inbound messages are delivered.
    pub webhook_url: String,
    /// Key expected in the `Authorization: Bearer` header.
    pub api_key: SecretString,
    /// Randomly answer sends with a reply webhook.
    pub simulate_replies: bool,
    /// Capacity of the message cache.
    pub cache_size: usize,
}

impl SimulatorConfig {
    /// Build config from environment variables.
    ///
    /// `api_key_var` names the provider-specific key variable;
    /// `default_port` is used when `PORT` is unset.
    pub fn from_env(api_key_var: &str, default_port: u16) -> Result<Self, ConfigError> {
        let webhook_url = required_env("MESSAGING_SERVICE_WEBHOOK_URL")?;
        let api_key = SecretString::from(required_env(api_key_var)?);

        let cache_size: usize = parse_env("CACHE_SIZE")?.unwrap_or(1000);
        if cache_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CACHE_SIZE".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: parse_env("PORT")?.unwrap_or(default_port),
            webhook_url,
            api_key,
            simulate_replies: env_flag("SIMULATE_REPLIES"),
            cache_size,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
