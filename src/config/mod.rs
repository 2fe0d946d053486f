//! Configuration management for watchcaller
//!
//! Configuration is layered: compiled-in defaults, then an optional JSON file
//! (`watchcaller.json` in the working directory, or `$WATCHCALLER_CONFIG`),
//! then environment variables. A `.env` file is loaded into the environment by
//! the CLI before any of this runs.
//!
//! Unlike a best-effort override, a malformed environment value is a fatal
//! configuration error: the service refuses to start with a setting it could
//! not parse.

mod types;
pub mod validate;

pub use types::*;

use crate::error::{Result, WatchError};
use std::path::{Path, PathBuf};

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "watchcaller.json";

/// Environment variable that overrides the config file path.
pub const CONFIG_PATH_ENV: &str = "WATCHCALLER_CONFIG";

impl Config {
    /// Returns the path to the config file.
    pub fn path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// Load configuration from the default path with environment overrides,
    /// then validate it.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides,
    /// then validate it.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse the config file without applying overrides or validation.
    pub fn read_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            WatchError::Config(format!("Invalid config file {}: {}", path.display(), e))
        })
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Recognized keys: `WATCH_INTERVAL_SECONDS`, `WATCH_TARGETS`,
    /// `WATCH_FETCH_ON_START`, `CHECK_TIMEOUT_SECONDS`, `HEALTH_HOST`,
    /// `HEALTH_PORT`, `FAILURE_THRESHOLD`, `MAX_RETRIES`,
    /// `RETRY_BACKOFF_BASE_SECONDS`, `RETRY_BACKOFF_MAX_SECONDS`,
    /// `FETCH_TIMEOUT_SECONDS`, `DOWNLOAD_PATH`, `SHUTDOWN_GRACE_SECONDS`,
    /// `LOG_LEVEL`, `LOG_FORMAT`, `LOG_FILE`.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // Watch loop
        if let Some(val) = get("WATCH_INTERVAL_SECONDS") {
            self.watch.interval_secs = parse_env("WATCH_INTERVAL_SECONDS", &val)?;
        }
        if let Some(val) = get("CHECK_TIMEOUT_SECONDS") {
            self.watch.check_timeout_secs = parse_env("CHECK_TIMEOUT_SECONDS", &val)?;
        }
        if let Some(val) = get("WATCH_FETCH_ON_START") {
            self.watch.fetch_on_start = parse_env_bool("WATCH_FETCH_ON_START", &val)?;
        }
        if let Some(val) = get("WATCH_TARGETS") {
            self.watch.targets = parse_env_list(&val)
                .into_iter()
                .map(TargetConfig::from_url)
                .collect();
        }

        // Health
        if let Some(val) = get("HEALTH_HOST") {
            self.health.host = val;
        }
        if let Some(val) = get("HEALTH_PORT") {
            self.health.port = parse_env("HEALTH_PORT", &val)?;
        }
        if let Some(val) = get("FAILURE_THRESHOLD") {
            self.health.failure_threshold = parse_env("FAILURE_THRESHOLD", &val)?;
        }

        // Download
        if let Some(val) = get("MAX_RETRIES") {
            self.download.max_retries = parse_env("MAX_RETRIES", &val)?;
        }
        if let Some(val) = get("RETRY_BACKOFF_BASE_SECONDS") {
            self.download.backoff_base_secs = parse_env("RETRY_BACKOFF_BASE_SECONDS", &val)?;
        }
        if let Some(val) = get("RETRY_BACKOFF_MAX_SECONDS") {
            self.download.backoff_max_secs = parse_env("RETRY_BACKOFF_MAX_SECONDS", &val)?;
        }
        if let Some(val) = get("FETCH_TIMEOUT_SECONDS") {
            self.download.fetch_timeout_secs = parse_env("FETCH_TIMEOUT_SECONDS", &val)?;
        }
        if let Some(val) = get("DOWNLOAD_PATH") {
            self.download.dir = val;
        }

        // Lifecycle
        if let Some(val) = get("SHUTDOWN_GRACE_SECONDS") {
            self.shutdown.grace_secs = parse_env("SHUTDOWN_GRACE_SECONDS", &val)?;
        }

        // Logging
        if let Some(val) = get("LOG_LEVEL") {
            self.logging.level = val.to_lowercase();
        }
        if let Some(val) = get("LOG_FORMAT") {
            self.logging.format = val
                .parse()
                .map_err(|e| WatchError::Config(format!("LOG_FORMAT: {}", e)))?;
        }
        if let Some(val) = get("LOG_FILE") {
            self.logging.file = Some(val);
        }

        Ok(())
    }

    /// Check semantic constraints. Any error-level diagnostic is fatal.
    pub fn validate(&self) -> Result<()> {
        let errors: Vec<String> = validate::validate_semantics(self)
            .into_iter()
            .filter(|d| d.level == validate::DiagnosticLevel::Error)
            .map(|d| d.to_string())
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(WatchError::Config(errors.join("; ")))
        }
    }
}

fn parse_env<T>(key: &str, val: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    val.trim()
        .parse()
        .map_err(|e| WatchError::Config(format!("{} must be a number, got '{}': {}", key, val, e)))
}

fn parse_env_bool(key: &str, val: &str) -> Result<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(WatchError::Config(format!(
            "{} must be a boolean, got '{}'",
            key, val
        ))),
    }
}

fn parse_env_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
