//! Error types for watchcaller
//!
//! The taxonomy mirrors how failures propagate through the pipeline:
//!
//! - [`CheckError`] is produced by the watch loop. Transient check errors are
//!   absorbed there; a fatal config error halts the loop.
//! - [`DownloadError`] is produced by the download manager. Transient errors
//!   are retried locally; permanent errors end the job as `Failed`.
//! - [`WatchError`] is the crate-wide error, used wherever a failure has to
//!   leave a component (startup, configuration, storage, state machine misuse).

use std::fmt;
use thiserror::Error;

// ============================================================================
// Check errors
// ============================================================================

/// Failure while checking a watch target for change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    /// Recoverable I/O problem (timeout, connection reset, 5xx, ...).
    /// Logged and retried on the next tick.
    Transient(String),
    /// The target itself is malformed. Halts the watch loop.
    FatalConfig(String),
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckError::Transient(msg) => write!(f, "Transient check error: {}", msg),
            CheckError::FatalConfig(msg) => write!(f, "Fatal config error: {}", msg),
        }
    }
}

impl std::error::Error for CheckError {}

impl CheckError {
    /// Returns `true` if the loop may continue on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, CheckError::Transient(_))
    }
}

// ============================================================================
// Download errors
// ============================================================================

/// Failure while fetching or persisting an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    /// Network failure, timeout, throttling or server-side error. Retried.
    Transient(String),
    /// Not found, permission denied, oversized payload, ... Never retried.
    Permanent(String),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::Transient(msg) => write!(f, "Transient download error: {}", msg),
            DownloadError::Permanent(msg) => write!(f, "Permanent download error: {}", msg),
        }
    }
}

impl std::error::Error for DownloadError {}

impl DownloadError {
    /// Returns `true` if this error is transient and the fetch should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DownloadError::Transient(_))
    }

    /// Classify an HTTP status returned by a download source.
    ///
    /// 408, 425, 429 and every 5xx are transient; any other non-success
    /// status (404, 401, 403, 410, ...) is permanent.
    pub fn from_status(status: u16, source: &str) -> Self {
        let msg = format!("HTTP {} from {}", status, source);
        match status {
            408 | 425 | 429 | 500..=599 => DownloadError::Transient(msg),
            _ => DownloadError::Permanent(msg),
        }
    }

    /// Classify a local I/O failure while persisting an artifact.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::PermissionDenied | ErrorKind::NotFound | ErrorKind::InvalidInput => {
                DownloadError::Permanent(err.to_string())
            }
            _ => DownloadError::Transient(err.to_string()),
        }
    }

    /// Short machine-readable label, used in logs and health details.
    pub fn kind(&self) -> &'static str {
        match self {
            DownloadError::Transient(_) => "transient",
            DownloadError::Permanent(_) => "permanent",
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            let source = err.url().map(|u| u.to_string()).unwrap_or_default();
            return DownloadError::from_status(status.as_u16(), &source);
        }
        if err.is_builder() {
            DownloadError::Permanent(err.to_string())
        } else {
            // timeouts, connect failures, truncated bodies
            DownloadError::Transient(err.to_string())
        }
    }
}

impl From<CheckError> for WatchError {
    fn from(err: CheckError) -> Self {
        match err {
            CheckError::FatalConfig(msg) => WatchError::Config(msg),
            other => WatchError::Check(other),
        }
    }
}

impl From<DownloadError> for WatchError {
    fn from(err: DownloadError) -> Self {
        WatchError::Download(err)
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for watchcaller operations.
#[derive(Error, Debug)]
pub enum WatchError {
    /// Invalid or missing configuration. Unrecoverable: the process exits non-zero.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A transient check failure that escaped the watch loop.
    #[error("Check error: {0}")]
    Check(CheckError),

    /// A download failure that escaped the download manager.
    #[error("Download error: {0}")]
    Download(DownloadError),

    /// A job state transition that the state machine forbids.
    #[error("Invalid job transition: {from} -> {to}")]
    InvalidTransition {
        /// State the job was in.
        from: &'static str,
        /// State that was requested.
        to: &'static str,
    },

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors outside of a download job (client construction, probes)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl WatchError {
    /// Returns `true` for errors that must stop the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WatchError::Config(_))
    }
}

/// A specialized `Result` type for watchcaller operations.
pub type Result<T> = std::result::Result<T, WatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WatchError::Config("WATCH_INTERVAL_SECONDS must be > 0".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: WATCH_INTERVAL_SECONDS must be > 0"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: WatchError = io_err.into();
        assert!(matches!(err, WatchError::Io(_)));
    }

    #[test]
    fn test_fatal_check_error_becomes_config_error() {
        let err: WatchError = CheckError::FatalConfig("bad url".into()).into();
        assert!(matches!(err, WatchError::Config(_)));
        assert!(err.is_fatal());

        let err: WatchError = CheckError::Transient("timeout".into()).into();
        assert!(matches!(err, WatchError::Check(_)));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = WatchError::InvalidTransition {
            from: "succeeded",
            to: "in_progress",
        };
        assert_eq!(
            err.to_string(),
            "Invalid job transition: succeeded -> in_progress"
        );
    }

    #[test]
    fn test_check_error_is_transient() {
        assert!(CheckError::Transient("x".into()).is_transient());
        assert!(!CheckError::FatalConfig("x".into()).is_transient());
    }

    #[test]
    fn test_download_error_from_status() {
        for status in [408, 425, 429, 500, 502, 503, 504] {
            assert!(
                DownloadError::from_status(status, "http://x").is_retryable(),
                "{} should be retryable",
                status
            );
        }
        for status in [400, 401, 403, 404, 410] {
            assert!(
                !DownloadError::from_status(status, "http://x").is_retryable(),
                "{} should be permanent",
                status
            );
        }
    }

    #[test]
    fn test_download_error_from_io() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert!(!DownloadError::from_io(&denied).is_retryable());

        let interrupted = std::io::Error::new(std::io::ErrorKind::Interrupted, "eintr");
        assert!(DownloadError::from_io(&interrupted).is_retryable());
    }

    #[test]
    fn test_download_error_display_and_kind() {
        let err = DownloadError::Permanent("HTTP 404".into());
        assert_eq!(err.to_string(), "Permanent download error: HTTP 404");
        assert_eq!(err.kind(), "permanent");
        assert_eq!(DownloadError::Transient("x".into()).kind(), "transient");
    }
}
