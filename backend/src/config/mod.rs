//! Configuration module for the U8s backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

/// Secret used when `U8S_APP_SECRET` is unset. Only suitable for local development.
pub const DEV_SECRET: &str = "dev-secret";

/// Upper bound for `U8S_INVITE_TTL_HOURS` (one year).
pub const MAX_INVITE_TTL_HOURS: i64 = 24 * 365;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// HMAC key for access tokens
    pub app_secret: String,
    /// Public URL used in invite links
    pub base_url: String,
    /// How long a fresh invite stays valid
    pub invite_ttl_hours: i64,
    /// Plain season access code, hashed when the gate is built
    pub season_access_code: Option<String>,
    /// Pre-computed hex SHA-256 of the season access code
    pub season_access_hash: Option<String>,
    pub enable_email: bool,
    pub email_sender: Option<String>,
    /// SMTP relay; without it queued e-mail stays in the outbox
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    /// Seconds between outbox delivery runs
    pub outbox_poll_secs: u64,
    /// Seed the default teams on startup
    pub seed: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AddrParseError> {
        dotenvy::dotenv().ok();

        let db_path = env::var("U8S_DB_PATH")
            .unwrap_or_else(|_| "./data/u8s.sqlite".to_string())
            .into();

        let bind_addr = env::var("U8S_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()?;

        let log_level = env::var("U8S_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            db_path,
            bind_addr,
            log_level,
            app_secret: env::var("U8S_APP_SECRET").unwrap_or_else(|_| DEV_SECRET.to_string()),
            base_url: env::var("U8S_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string()),
            invite_ttl_hours: env_parse("U8S_INVITE_TTL_HOURS", 120_i64).clamp(1, MAX_INVITE_TTL_HOURS),
            season_access_code: env_non_empty("U8S_SEASON_ACCESS_CODE"),
            season_access_hash: env_non_empty("U8S_SEASON_ACCESS_HASH"),
            enable_email: env_bool("U8S_ENABLE_EMAIL", false),
            email_sender: env_non_empty("U8S_EMAIL_SENDER"),
            smtp_host: env_non_empty("U8S_SMTP_HOST"),
            smtp_port: env_parse("U8S_SMTP_PORT", 587),
            smtp_username: env_non_empty("U8S_SMTP_USERNAME"),
            smtp_password: env_non_empty("U8S_SMTP_PASSWORD"),
            outbox_poll_secs: env_parse("U8S_OUTBOX_POLL_SECS", 30_u64).max(1),
            seed: env_bool("U8S_SEED", false),
        })
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse the boolean spellings accepted in env vars and query strings.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => parse_flag(&value).unwrap_or(false),
        Err(_) => default,
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
