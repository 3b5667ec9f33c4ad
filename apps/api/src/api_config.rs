use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use inspectra_core::{AppError, AppResult};
use inspectra_domain::{DEFAULT_LEASE_SECONDS, LeasePolicy, RetryPolicy};
use tracing_subscriber::EnvFilter;

/// Backend that stores task claim leases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseStoreConfig {
    Postgres,
    Redis { redis_url: String },
    Memory,
    Disabled,
}

impl LeaseStoreConfig {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Redis { .. } => "redis",
            Self::Memory => "memory",
            Self::Disabled => "disabled",
        }
    }

    fn parse(value: &str, redis_url: Option<String>) -> AppResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            "disabled" => Ok(Self::Disabled),
            "redis" => {
                let redis_url = redis_url.ok_or_else(|| {
                    AppError::Validation("REDIS_URL is required when LEASE_STORE=redis".to_owned())
                })?;
                Ok(Self::Redis { redis_url })
            }
            other => Err(AppError::Validation(format!(
                "LEASE_STORE must be one of 'postgres', 'redis', 'memory' or 'disabled', got '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub migrate_only: bool,
    pub database_url: String,
    pub frontend_url: String,
    pub api_host: String,
    pub api_port: u16,
    pub cookie_secure: bool,
    pub redis_url: Option<String>,
    pub lease_store: LeaseStoreConfig,
    pub lease_policy: LeasePolicy,
    pub lease_compaction_interval: Duration,
    pub retry_policy: RetryPolicy,
}

impl ApiConfig {
    pub fn load() -> AppResult<Self> {
        let migrate_only = env::args().nth(1).as_deref() == Some("migrate");

        let database_url = required_env("DATABASE_URL")?;
        let frontend_url =
            env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:3000".to_owned());
        let api_host = env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_owned());
        let api_port = parse_env_u16("API_PORT", 3001)?;
        let cookie_secure = env::var("SESSION_COOKIE_SECURE")
            .unwrap_or_else(|_| "false".to_owned())
            .eq_ignore_ascii_case("true");

        let redis_url = env::var("REDIS_URL")
            .ok()
            .filter(|value| !value.trim().is_empty());
        let lease_store = LeaseStoreConfig::parse(
            env::var("LEASE_STORE")
                .unwrap_or_else(|_| "postgres".to_owned())
                .as_str(),
            redis_url.clone(),
        )?;

        let lease_seconds = parse_env_u32("LEASE_SECONDS", DEFAULT_LEASE_SECONDS)?;
        let mut lease_policy = LeasePolicy::new(lease_seconds)?;
        if let Some(renew_interval_ms) = parse_optional_env_u64("LEASE_RENEW_INTERVAL_MS")? {
            lease_policy =
                lease_policy.with_renew_interval(Duration::from_millis(renew_interval_ms))?;
        }

        let compaction_seconds = parse_env_u64("LEASE_COMPACTION_INTERVAL_SECONDS", 600)?;
        if compaction_seconds == 0 {
            return Err(AppError::Validation(
                "LEASE_COMPACTION_INTERVAL_SECONDS must be greater than zero".to_owned(),
            ));
        }

        let retry_policy = RetryPolicy::new(parse_env_u32("JOB_MAX_ATTEMPTS", 3)?)?;

        Ok(Self {
            migrate_only,
            database_url,
            frontend_url,
            api_host,
            api_port,
            cookie_secure,
            redis_url,
            lease_store,
            lease_policy,
            lease_compaction_interval: Duration::from_secs(compaction_seconds),
            retry_policy,
        })
    }

    pub fn socket_address(&self) -> AppResult<SocketAddr> {
        let host = IpAddr::from_str(&self.api_host).map_err(|error| {
            AppError::Validation(format!("invalid API_HOST '{}': {error}", self.api_host))
        })?;
        Ok(SocketAddr::from((host, self.api_port)))
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn required_env(name: &str) -> AppResult<String> {
    let value = env::var(name).map_err(|_| AppError::Validation(format!("{name} is required")))?;
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{name} must not be empty")));
    }

    Ok(value)
}

fn parse_env_u16(name: &str, default: u16) -> AppResult<u16> {
    match env::var(name) {
        Ok(value) => value.parse::<u16>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> AppResult<u32> {
    match env::var(name) {
        Ok(value) => value.parse::<u32>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_env_u64(name: &str, default: u64) -> AppResult<u64> {
    Ok(parse_optional_env_u64(name)?.unwrap_or(default))
}

fn parse_optional_env_u64(name: &str) -> AppResult<Option<u64>> {
    match env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => value.parse::<u64>().map(Some).map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        Err(_) => Ok(None),
    }
}
