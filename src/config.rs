use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::directions::mapbox::DEFAULT_BASE_URL;
use crate::error::AppError;
use crate::store::WritePolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Rest,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "rest" => Ok(StoreBackend::Rest),
            other => Err(format!("unknown store backend {other}, expected memory/rest")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other}, expected compact/json")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub event_buffer_size: usize,
    pub store_backend: StoreBackend,
    pub supabase_url: Option<String>,
    pub supabase_service_key: Option<String>,
    pub mapbox_token: Option<String>,
    pub mapbox_base_url: String,
    pub directions_timeout: Duration,
    pub write_policy: WritePolicy,
    pub poll_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key/value source; absent keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            http_port: parse_or_default(&lookup, "HTTP_PORT", 3000)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format: parse_or_default(&lookup, "LOG_FORMAT", LogFormat::Compact)?,
            event_buffer_size: parse_or_default(&lookup, "EVENT_BUFFER_SIZE", 1024)?,
            store_backend: parse_or_default(&lookup, "ORDER_STORE", StoreBackend::Memory)?,
            supabase_url: non_empty(lookup("SUPABASE_URL")),
            supabase_service_key: non_empty(lookup("SUPABASE_SERVICE_ROLE_KEY")),
            mapbox_token: non_empty(lookup("MAPBOX_ACCESS_TOKEN")),
            mapbox_base_url: non_empty(lookup("MAPBOX_BASE_URL"))
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            directions_timeout: positive_secs(&lookup, "DIRECTIONS_TIMEOUT_SECS", 15)?,
            write_policy: parse_or_default(&lookup, "ETA_WRITE_POLICY", WritePolicy::Overwrite)?,
            poll_interval: positive_secs(&lookup, "ETA_POLL_INTERVAL_SECS", 30)?,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|raw| !raw.trim().is_empty())
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        None => Ok(default),
    }
}

fn positive_secs<F>(lookup: &F, key: &str, default: u64) -> Result<Duration, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or_default(lookup, key, default)? {
        0 => Err(AppError::Internal(format!("invalid {key}: must be at least 1 second"))),
        secs => Ok(Duration::from_secs(secs)),
    }
}
