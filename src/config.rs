use std::{env, fmt::Display, str::FromStr, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use tracing::info;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_SENTIMENT_URL: &str = "http://127.0.0.1:8000";
const DEFAULT_SENTIMENT_LIBRARY: &str = "vader";
const DEFAULT_SENTIMENT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_SESSION_TTL_DAYS: i64 = 7;
const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

/// Which persistence backend the process runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(StorageBackend::Postgres),
            "memory" | "in-memory" => Ok(StorageBackend::Memory),
            other => bail!("unsupported storage backend: {other}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SentimentSettings {
    pub base_url: String,
    pub library: String,
    pub timeout: Duration,
}

impl Default for SentimentSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SENTIMENT_URL.to_string(),
            library: DEFAULT_SENTIMENT_LIBRARY.to_string(),
            timeout: Duration::from_secs(DEFAULT_SENTIMENT_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeedAdmin {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub storage: StorageBackend,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub sentiment: SentimentSettings,
    pub session_ttl_days: i64,
    pub cors_origin: String,
    pub debug_errors: bool,
    pub seed_admin: Option<SeedAdmin>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            storage: StorageBackend::Memory,
            database_url: None,
            database_max_connections: DEFAULT_MAX_CONNECTIONS,
            sentiment: SentimentSettings::default(),
            session_ttl_days: DEFAULT_SESSION_TTL_DAYS,
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
            debug_errors: false,
            seed_admin: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let storage: StorageBackend = parse_or("STORAGE_BACKEND", StorageBackend::Postgres)?;
        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());

        if storage == StorageBackend::Postgres && database_url.is_none() {
            bail!("DATABASE_URL env var is missing");
        }

        let timeout_secs: u64 =
            parse_or("SENTIMENT_TIMEOUT_SECS", DEFAULT_SENTIMENT_TIMEOUT_SECS)?;
        let session_ttl_days: i64 = parse_or("SESSION_TTL_DAYS", DEFAULT_SESSION_TTL_DAYS)?;
        if session_ttl_days <= 0 {
            return Err(anyhow!("SESSION_TTL_DAYS must be positive"));
        }

        let seed_admin = match (env::var("SEED_ADMIN_EMAIL"), env::var("SEED_ADMIN_PASSWORD")) {
            (Ok(email), Ok(password)) if !email.trim().is_empty() && !password.is_empty() => {
                Some(SeedAdmin {
                    email: email.trim().to_ascii_lowercase(),
                    password,
                })
            }
            _ => None,
        };

        Ok(Self {
            port: parse_or("PORT", DEFAULT_PORT)?,
            storage,
            database_url,
            database_max_connections: parse_or(
                "DATABASE_MAX_CONNECTIONS",
                DEFAULT_MAX_CONNECTIONS,
            )?,
            sentiment: SentimentSettings {
                base_url: string_or("SENTIMENT_SERVICE_URL", DEFAULT_SENTIMENT_URL),
                library: string_or("SENTIMENT_LIBRARY", DEFAULT_SENTIMENT_LIBRARY),
                timeout: Duration::from_secs(timeout_secs),
            },
            session_ttl_days,
            cors_origin: string_or("CORS_ORIGIN", DEFAULT_CORS_ORIGIN),
            debug_errors: parse_flag("APP_DEBUG"),
            seed_admin,
        })
    }
}

fn string_or(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => {
            info!("{key} not set, using default: {default}");
            default.to_string()
        }
    }
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|err| anyhow!("invalid {key} value: {err}"))
            .with_context(|| format!("failed to read {key}")),
        _ => Ok(default),
    }
}

fn parse_flag(key: &str) -> bool {
    env::var(key)
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_backend_accepts_aliases() {
        assert_eq!(
            "PostgreSQL".parse::<StorageBackend>().unwrap(),
            StorageBackend::Postgres
        );
        assert_eq!(
            " memory ".parse::<StorageBackend>().unwrap(),
            StorageBackend::Memory
        );
        assert!("sqlite".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn default_sentiment_settings_match_service_contract() {
        let settings = SentimentSettings::default();
        assert_eq!(settings.library, "vader");
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert_eq!(settings.base_url, "http://127.0.0.1:8000");
    }
}
