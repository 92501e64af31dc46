//! Configuration loaded from the environment

use std::net::SocketAddr;
use std::time::Duration;

use outcomesignal_billing::{
    DEFAULT_IDENTITY_API_URL, DEFAULT_RESOLVE_TIMEOUT, DEFAULT_RETRY_DELAYS_MS,
    DEFAULT_TOLERANCE_SECS,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: &'static str, value: String },
}

/// Log output format for the API binary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub run_migrations: bool,
    /// `whsec_` secret for identity webhooks. Unset disables the webhook endpoint.
    pub clerk_webhook_secret: Option<String>,
    /// Backend API key for profile lookups
    pub clerk_secret_key: Option<String>,
    pub clerk_api_url: String,
    /// PEM public key used to verify RS256 session tokens
    pub clerk_jwt_key: Option<String>,
    /// Shared secret for HS256 session tokens (local development only)
    pub session_jwt_secret: Option<String>,
    pub webhook_tolerance_secs: i64,
    pub resolver_delays_ms: Vec<u64>,
    pub resolver_timeout: Duration,
    pub allowed_origins: Vec<String>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_raw = get("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0:8080".to_string());
        let bind_address = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            key: "BIND_ADDRESS",
            value: bind_raw.clone(),
        })?;

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let run_migrations = get("RUN_MIGRATIONS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let webhook_tolerance_secs = match get("WEBHOOK_TOLERANCE_SECONDS") {
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(secs) if secs >= 0 => secs,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "WEBHOOK_TOLERANCE_SECONDS",
                        value: raw,
                    })
                }
            },
            None => DEFAULT_TOLERANCE_SECS,
        };

        let resolver_delays_ms = match get("ACCOUNT_RESOLVER_DELAYS_MS") {
            Some(raw) => parse_delays(&raw).ok_or(ConfigError::Invalid {
                key: "ACCOUNT_RESOLVER_DELAYS_MS",
                value: raw,
            })?,
            None => DEFAULT_RETRY_DELAYS_MS.to_vec(),
        };

        let resolver_timeout = match get("ACCOUNT_RESOLVER_DEADLINE_MS") {
            Some(raw) => Duration::from_millis(raw.parse().map_err(|_| ConfigError::Invalid {
                key: "ACCOUNT_RESOLVER_DEADLINE_MS",
                value: raw,
            })?),
            None => DEFAULT_RESOLVE_TIMEOUT,
        };

        let allowed_origins = get("ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| vec!["http://localhost:3000".to_string()]);

        let log_format = match get("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            bind_address,
            database_url,
            run_migrations,
            clerk_webhook_secret: get("CLERK_WEBHOOK_SECRET"),
            clerk_secret_key: get("CLERK_SECRET_KEY"),
            clerk_api_url: get("CLERK_API_URL")
                .unwrap_or_else(|| DEFAULT_IDENTITY_API_URL.to_string()),
            clerk_jwt_key: get("CLERK_JWT_KEY").map(|pem| pem.replace("\\n", "\n")),
            session_jwt_secret: get("SESSION_JWT_SECRET"),
            webhook_tolerance_secs,
            resolver_delays_ms,
            resolver_timeout,
            allowed_origins,
            log_format,
        })
    }
}

fn parse_delays(raw: &str) -> Option<Vec<u64>> {
    let delays: Vec<u64> = raw
        .split(',')
        .map(|d| d.trim().parse().ok())
        .collect::<Option<_>>()?;
    if delays.is_empty() {
        None
    } else {
        Some(delays)
    }
}
