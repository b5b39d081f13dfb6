use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Startup fails if a required variable is missing or a value does not parse.
#[derive(Debug, Clone)]
pub struct Config {
    /// Absent means artifacts and balances live in memory for this process only.
    pub database_url: Option<String>,
    pub openai_api_key: String,
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub port: u16,
    pub rust_log: String,
    pub worker_concurrency: usize,
    pub queue_capacity: usize,
    pub provider_timeout: Duration,
    pub retry_base_delay: Duration,
    pub max_upload_bytes: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: optional_env("DATABASE_URL"),
            openai_api_key: require_env("OPENAI_API_KEY")?,
            anthropic_api_key: optional_env("ANTHROPIC_API_KEY"),
            google_api_key: optional_env("GOOGLE_API_KEY"),
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            worker_concurrency: parse_env("WORKER_CONCURRENCY", 4)?,
            queue_capacity: parse_env("QUEUE_CAPACITY", 256)?,
            provider_timeout: Duration::from_secs(parse_env("PROVIDER_TIMEOUT_SECS", 120)?),
            retry_base_delay: Duration::from_millis(parse_env("RETRY_BASE_DELAY_MS", 1000)?),
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", 10 * 1024 * 1024)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// Unset and blank are treated the same.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}
