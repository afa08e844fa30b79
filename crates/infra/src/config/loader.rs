//! Configuration loader
//!
//! Loads service configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If the required variables are missing, falls back to a config file
//! 3. Searches several paths for a config file
//! 4. Supports JSON and TOML formats
//!
//! Whatever the source, the result is validated before it is returned.
//!
//! ## Environment Variables
//! Required:
//! - `CALSYNC_DB_PATH`: Database file path
//! - `CALSYNC_BIND_ADDRESS`: HTTP listen address
//! - `CALSYNC_PUBLIC_BASE_URL`: Externally reachable base URL for webhooks
//!
//! Optional:
//! - `CALSYNC_DB_POOL_SIZE`: Connection pool size
//! - `CALSYNC_DB_ENCRYPTION_KEY`: Database encryption key (keychain otherwise)
//! - `CALSYNC_SYNC_ENABLED`: Whether background sync runs (true/false)
//! - `CALSYNC_RECONCILIATION_CRON`, `CALSYNC_TOKEN_REFRESH_CRON`,
//!   `CALSYNC_WEBHOOK_RENEWAL_CRON`: six-field cron expressions
//! - `CALSYNC_PROVIDER_TIMEOUT_SECS`: Per-call provider timeout
//! - `CALSYNC_GOOGLE_CLIENT_ID` / `CALSYNC_GOOGLE_CLIENT_SECRET`
//! - `CALSYNC_OUTLOOK_CLIENT_ID` / `CALSYNC_OUTLOOK_CLIENT_SECRET`
//! - `CALSYNC_APPLE_CALDAV_URL`, `CALSYNC_CALDAV_URL`
//! - `CALSYNC_SCHEDULE_TIMEZONE`: Timezone of the default working schedule
//!
//! ## File Locations
//! The loader searches `calsync.{toml,json}` and `config.{toml,json}` in the
//! current directory, its two parents, and next to the executable.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use calsync_domain::{
    CalDavConfig, CalSyncError, Config, DatabaseConfig, OAuthClientConfig, Result, ServerConfig,
};

const FILE_NAMES: [&str; 4] = ["calsync.toml", "calsync.json", "config.toml", "config.json"];

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `CalSyncError::Config` if no source yields a configuration or the
/// loaded configuration fails validation.
pub fn load() -> Result<Config> {
    let config = match load_from_env() {
        Ok(config) => {
            tracing::info!("Configuration loaded from environment variables");
            config
        }
        Err(e) => {
            tracing::debug!(error = %e, "Environment incomplete, trying config file");
            load_from_file(None)?
        }
    };
    config.validate()?;
    Ok(config)
}

/// Load configuration from `CALSYNC_*` environment variables
///
/// Sections without variables keep their defaults.
///
/// # Errors
/// Returns `CalSyncError::Config` if a required variable is missing or a
/// value does not parse.
pub fn load_from_env() -> Result<Config> {
    let mut config = Config {
        database: DatabaseConfig {
            path: env_var("CALSYNC_DB_PATH")?,
            ..DatabaseConfig::default()
        },
        server: ServerConfig {
            bind_address: env_var("CALSYNC_BIND_ADDRESS")?,
            public_base_url: env_var("CALSYNC_PUBLIC_BASE_URL")?,
        },
        ..Config::default()
    };

    if let Some(size) = env_parse::<u32>("CALSYNC_DB_POOL_SIZE")? {
        config.database.pool_size = size;
    }
    config.database.encryption_key = env_opt("CALSYNC_DB_ENCRYPTION_KEY");

    config.sync.enabled = env_bool("CALSYNC_SYNC_ENABLED", config.sync.enabled);
    if let Some(cron) = env_opt("CALSYNC_RECONCILIATION_CRON") {
        config.sync.reconciliation_cron = cron;
    }
    if let Some(secs) = env_parse::<u64>("CALSYNC_PROVIDER_TIMEOUT_SECS")? {
        config.sync.provider_timeout_secs = secs;
    }
    if let Some(cron) = env_opt("CALSYNC_TOKEN_REFRESH_CRON") {
        config.tokens.refresh_cron = cron;
    }
    if let Some(cron) = env_opt("CALSYNC_WEBHOOK_RENEWAL_CRON") {
        config.webhooks.renewal_cron = cron;
    }

    config.providers.google = oauth_client_from_env("GOOGLE")?;
    config.providers.outlook = oauth_client_from_env("OUTLOOK")?;
    if let Some(base_url) = env_opt("CALSYNC_APPLE_CALDAV_URL") {
        config.providers.apple = Some(CalDavConfig { base_url });
    }
    if let Some(base_url) = env_opt("CALSYNC_CALDAV_URL") {
        config.providers.caldav = Some(CalDavConfig { base_url });
    }

    if let Some(tz) = env_opt("CALSYNC_SCHEDULE_TIMEZONE") {
        config.availability.default_schedule.timezone = tz;
    }

    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, searches the standard locations.
///
/// # Errors
/// Returns `CalSyncError::Config` if the file is missing or malformed.
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(CalSyncError::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            p
        }
        None => find_config_file().ok_or_else(|| {
            CalSyncError::Config("No config file found in any of the standard locations".into())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| CalSyncError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration by file extension (`.toml` or `.json`).
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| CalSyncError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CalSyncError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(CalSyncError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// First existing config file among the standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd.clone());
        roots.push(cwd.join(".."));
        roots.push(cwd.join("../.."));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            roots.push(exe_dir.to_path_buf());
            roots.push(exe_dir.join(".."));
        }
    }

    roots
        .iter()
        .flat_map(|root| FILE_NAMES.iter().map(move |name| root.join(name)))
        .find(|path| path.exists())
}

fn oauth_client_from_env(provider: &str) -> Result<Option<OAuthClientConfig>> {
    let id_key = format!("CALSYNC_{provider}_CLIENT_ID");
    let secret_key = format!("CALSYNC_{provider}_CLIENT_SECRET");
    match (env_opt(&id_key), env_opt(&secret_key)) {
        (Some(client_id), Some(client_secret)) => Ok(Some(OAuthClientConfig {
            client_id,
            client_secret,
            api_base_url: None,
            token_url: None,
        })),
        (None, None) => Ok(None),
        _ => Err(CalSyncError::Config(format!("{id_key} and {secret_key} must be set together"))),
    }
}

/// Get required environment variable
fn env_var(key: &str) -> Result<String> {
    env_opt(key).ok_or_else(|| {
        CalSyncError::Config(format!("Missing required environment variable: {key}"))
    })
}

/// Non-empty environment variable, if set
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_opt(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| CalSyncError::Config(format!("Invalid value for {key}: {e}")))
        })
        .transpose()
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
