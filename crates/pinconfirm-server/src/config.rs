use std::env;
use std::str::FromStr;

use pinconfirm::{DEFAULT_MAX_FAILED_ATTEMPTS, DEFAULT_TRANSFER_TTL_SECS};
use url::Url;

const DEFAULT_PORT: u16 = 4030;
const DEFAULT_DB_PATH: &str = "./pinconfirm.db";
const DEFAULT_RATE_LIMIT_RPM: u64 = 120;
const MIN_SECRET_LEN: usize = 32;

#[derive(Clone)]
pub struct ServerConfig {
    /// Listen port
    pub port: u16,
    /// SQLite database path (`:memory:` for development)
    pub db_path: String,
    /// Server-side pepper keyed into every PIN hash
    pub pin_pepper: Vec<u8>,
    /// HMAC secret authenticating upstream registration and PIN enrolment
    pub upstream_secret: Vec<u8>,
    /// Failed attempts before a reference is cancelled
    pub max_failed_attempts: u32,
    /// Lifetime of a pending transfer in seconds
    pub transfer_ttl_secs: u64,
    /// Base URL of generated confirmation links
    pub public_base_url: String,
    /// HTTP ledger endpoint (None = in-process recording ledger)
    pub ledger_url: Option<String>,
    /// Commit notification targets
    pub webhook_urls: Vec<String>,
    /// Bearer token required for /metrics (None = /metrics disabled)
    pub metrics_token: Option<Vec<u8>>,
    /// CORS allowed origins (empty = localhost on any port)
    pub allowed_origins: Vec<String>,
    /// Rate limit requests per minute per IP
    pub rate_limit_rpm: u64,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("db_path", &self.db_path)
            .field("pin_pepper", &"[REDACTED]")
            .field("upstream_secret", &"[REDACTED]")
            .field("max_failed_attempts", &self.max_failed_attempts)
            .field("transfer_ttl_secs", &self.transfer_ttl_secs)
            .field("public_base_url", &self.public_base_url)
            .field("ledger_url", &self.ledger_url)
            .field("webhook_urls", &self.webhook_urls)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .finish()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any variable source. `from_env` passes the
    /// process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        let port = parse_var(&var, "PORT", DEFAULT_PORT)?;
        let db_path = var("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let pin_pepper = required_secret(&var, "PIN_PEPPER")?;
        let upstream_secret = required_secret(&var, "UPSTREAM_SHARED_SECRET")?;

        let max_failed_attempts =
            parse_var(&var, "MAX_FAILED_ATTEMPTS", DEFAULT_MAX_FAILED_ATTEMPTS)?;
        if max_failed_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                var: "MAX_FAILED_ATTEMPTS",
                value: "0".to_string(),
            });
        }
        let transfer_ttl_secs = parse_var(&var, "TRANSFER_TTL_SECS", DEFAULT_TRANSFER_TTL_SECS)?;

        let public_base_url =
            var("PUBLIC_BASE_URL").unwrap_or_else(|| format!("http://localhost:{port}"));
        Url::parse(&public_base_url)
            .map_err(|_| ConfigError::InvalidUrl(public_base_url.clone()))?;

        let ledger_url = var("LEDGER_URL");
        if let Some(ref url) = ledger_url {
            Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;
        }

        let webhook_urls = split_list(var("WEBHOOK_URLS"));

        let metrics_token = var("METRICS_TOKEN").map(String::into_bytes);
        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set, /metrics endpoint is disabled");
        }

        let allowed_origins = split_list(var("ALLOWED_ORIGINS"));
        if allowed_origins.iter().any(|o| o == "*") {
            return Err(ConfigError::InvalidUrl(
                "wildcard CORS origin '*' is not allowed for the confirmation endpoint"
                    .to_string(),
            ));
        }

        let rate_limit_rpm = parse_var(&var, "RATE_LIMIT_RPM", DEFAULT_RATE_LIMIT_RPM)?;

        Ok(Self {
            port,
            db_path,
            pin_pepper,
            upstream_secret,
            max_failed_attempts,
            transfer_ttl_secs,
            public_base_url,
            ledger_url,
            webhook_urls,
            metrics_token,
            allowed_origins,
            rate_limit_rpm,
        })
    }
}

fn required_secret<F>(var: &F, key: &'static str) -> Result<Vec<u8>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(secret) = var(key) else {
        tracing::error!(
            "{key} is required. Set it to a secure random value (e.g. `openssl rand -hex 32`)."
        );
        return Err(ConfigError::MissingRequired(key));
    };
    if secret.len() < MIN_SECRET_LEN {
        tracing::warn!(
            "{key} is too short ({} bytes, minimum {MIN_SECRET_LEN}); \
             use `openssl rand -hex 32` to generate a secure secret",
            secret.len()
        );
    }
    Ok(secret.into_bytes())
}

fn parse_var<F, T>(var: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var: key, value: raw }),
    }
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|list| {
        list.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid value for {var}: {value}")]
    InvalidValue { var: &'static str, value: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}
