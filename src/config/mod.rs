use jsonwebtoken::Algorithm;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

use crate::services::token::{TokenVerifierConfig, DEFAULT_JWKS_URL_TEMPLATE};

/// Where fetched key sets are cached.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KeyCacheBackend {
    #[default]
    Redis,
    Memory,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for the task queue and key cache
    pub redis_url: String,

    /// Externally visible origin of this service, used to build thumbnail URLs
    pub public_base_url: String,

    /// Static token mapped to the admin identity. Unset disables the bypass.
    #[serde(default)]
    pub admin_token: Option<String>,

    /// Comma-separated application ids accepted as token audience
    #[serde(default)]
    pub allowed_audiences: Vec<String>,

    /// Key-set URL template; `{aud}` is replaced by the token audience
    #[serde(default = "default_jwks_url_template")]
    pub jwks_url_template: String,

    /// Comma-separated JWT algorithms accepted for user tokens
    #[serde(default = "default_accepted_algorithms")]
    pub accepted_algorithms: Vec<String>,

    #[serde(default)]
    pub key_cache: KeyCacheBackend,

    #[serde(default = "default_jwks_cache_ttl_secs")]
    pub jwks_cache_ttl_secs: u64,

    #[serde(default = "default_task_status_ttl_secs")]
    pub task_status_ttl_secs: u64,
}

/// Longest accepted lifetime for task records and cached key sets.
pub const MAX_TTL_SECS: u64 = 7 * 24 * 60 * 60;

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_jwks_url_template() -> String {
    DEFAULT_JWKS_URL_TEMPLATE.to_string()
}

fn default_accepted_algorithms() -> Vec<String> {
    vec!["RS256".to_string()]
}

fn default_jwks_cache_ttl_secs() -> u64 {
    180
}

fn default_task_status_ttl_secs() -> u64 {
    300
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.task_status_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "TASK_STATUS_TTL_SECS must be greater than zero".to_string(),
            ));
        }
        if self.task_status_ttl_secs > MAX_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "TASK_STATUS_TTL_SECS must not exceed {MAX_TTL_SECS}"
            )));
        }
        if self.jwks_cache_ttl_secs > MAX_TTL_SECS {
            return Err(ConfigError::Invalid(format!(
                "JWKS_CACHE_TTL_SECS must not exceed {MAX_TTL_SECS}"
            )));
        }
        if !self.jwks_url_template.contains(crate::services::token::AUDIENCE_PLACEHOLDER) {
            return Err(ConfigError::Invalid(
                "JWKS_URL_TEMPLATE must contain {aud}".to_string(),
            ));
        }
        if self.allowed_audiences.is_empty() {
            tracing::warn!("ALLOWED_AUDIENCES is empty; every user token will be rejected");
        }
        self.algorithms().map(|_| ())
    }

    fn algorithms(&self) -> Result<Vec<Algorithm>, ConfigError> {
        self.accepted_algorithms
            .iter()
            .map(|name| {
                let alg = Algorithm::from_str(name.trim())
                    .map_err(|_| ConfigError::Invalid(format!("unknown algorithm {name}")))?;
                // Symmetric algorithms would let anyone holding a public key mint tokens.
                if matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
                    return Err(ConfigError::Invalid(format!(
                        "algorithm {name} is not allowed for user tokens"
                    )));
                }
                Ok(alg)
            })
            .collect()
    }

    pub fn token_verifier_config(&self) -> Result<TokenVerifierConfig, ConfigError> {
        Ok(TokenVerifierConfig {
            admin_token: self.admin_token.clone().filter(|t| !t.is_empty()),
            allowed_audiences: self
                .allowed_audiences
                .iter()
                .map(|aud| aud.trim().to_string())
                .filter(|aud| !aud.is_empty())
                .collect(),
            jwks_url_template: self.jwks_url_template.clone(),
            accepted_algorithms: self.algorithms()?,
            key_set_ttl: Duration::from_secs(self.jwks_cache_ttl_secs),
        })
    }

    pub fn task_status_ttl(&self) -> Duration {
        Duration::from_secs(self.task_status_ttl_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration from environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
