//! Configuration type definitions for watchcaller
//!
//! All types implement serde traits for JSON serialization and have sensible
//! defaults, so an empty `{}` config file (or no file at all) is valid.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration struct for watchcaller
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Watch loop configuration (cadence, targets, check timeout)
    pub watch: WatchConfig,
    /// Download manager configuration (retries, backoff, storage)
    pub download: DownloadConfig,
    /// Health reporter configuration (bind address, failure threshold)
    pub health: HealthConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Process lifecycle configuration
    pub shutdown: ShutdownConfig,
}

// ============================================================================
// Watch Configuration
// ============================================================================

/// A single configured watch target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Stable identifier. Derived from the URL when omitted.
    #[serde(default)]
    pub id: Option<String>,
    /// URL polled for changes.
    pub url: String,
    /// URL downloaded when a change is detected. Defaults to `url`.
    #[serde(default)]
    pub download_url: Option<String>,
}

impl TargetConfig {
    /// Target watching and downloading the same URL.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            id: None,
            url: url.into(),
            download_url: None,
        }
    }
}

/// Longest accepted tick interval (one week).
pub const MAX_INTERVAL_SECS: u64 = 7 * 24 * 3600;

/// Watch loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Tick cadence in seconds.
    pub interval_secs: u64,
    /// Per-check timeout in seconds.
    pub check_timeout_secs: u64,
    /// Download on first observation of a target (no known fingerprint yet).
    pub fetch_on_start: bool,
    /// Maximum bytes read from a response when fingerprinting by body hash.
    pub max_probe_bytes: usize,
    /// Targets to watch.
    pub targets: Vec<TargetConfig>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            check_timeout_secs: 30,
            fetch_on_start: true,
            max_probe_bytes: 8 * 1024 * 1024,
            targets: Vec::new(),
        }
    }
}

impl WatchConfig {
    /// Tick cadence as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Per-check timeout as a `Duration`.
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
}

// ============================================================================
// Download Configuration
// ============================================================================

/// Download manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Directory that holds persisted artifacts.
    pub dir: String,
    /// Retries after the first attempt for transient failures.
    pub max_retries: u32,
    /// Base delay in seconds for exponential backoff.
    pub backoff_base_secs: f64,
    /// Backoff cap in seconds.
    pub backoff_max_secs: f64,
    /// Per-attempt fetch timeout in seconds.
    pub fetch_timeout_secs: u64,
    /// Payloads larger than this are rejected as permanent failures.
    pub max_bytes: usize,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            dir: "downloads".to_string(),
            max_retries: 3,
            backoff_base_secs: 1.0,
            backoff_max_secs: 60.0,
            fetch_timeout_secs: 60,
            max_bytes: 256 * 1024 * 1024,
        }
    }
}

impl DownloadConfig {
    /// Per-attempt fetch timeout as a `Duration`.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

// ============================================================================
// Health Configuration
// ============================================================================

/// Health reporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Bind host for the health server.
    pub host: String,
    /// Bind port for the health server.
    pub port: u16,
    /// Consecutive failed cycles before `/health` reports `ok=false`.
    pub failure_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            failure_threshold: 5,
        }
    }
}

// ============================================================================
// Logging Configuration
// ============================================================================

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable multi-line output.
    Pretty,
    /// Compact single-line output with a `component` field.
    #[default]
    Component,
    /// JSON lines.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "component" | "compact" => Ok(LogFormat::Component),
            "json" => Ok(LogFormat::Json),
            other => Err(format!(
                "unknown log format '{}', expected pretty, component or json",
                other
            )),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Output format.
    pub format: LogFormat,
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Optional log file. Relative paths land under `logs/`.
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Component,
            level: "info".to_string(),
            file: None,
        }
    }
}

// ============================================================================
// Shutdown Configuration
// ============================================================================

/// Process lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Seconds in-flight cycles may keep running after a shutdown signal.
    pub grace_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_secs: 10 }
    }
}

impl ShutdownConfig {
    /// Grace period as a `Duration`.
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}
