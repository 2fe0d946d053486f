//! watchcaller - watch remote resources and download them when they change
//!
//! The service is a pipeline of three components:
//! [`watch::WatchLoop`] polls targets and emits [`watch::WatchEvent`]s,
//! [`download::DownloadManager`] turns each event into a persisted
//! [`download::Artifact`], and [`health::HealthReporter`] exposes the outcome
//! of recent cycles over HTTP.

pub mod clock;
pub mod config;
pub mod download;
pub mod error;
pub mod health;
pub mod utils;
pub mod watch;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use download::{Artifact, ArtifactStore, DownloadJob, DownloadManager, JobStatus};
pub use error::{CheckError, DownloadError, Result, WatchError};
pub use health::{HealthReport, HealthReporter, HealthState, HealthStatus};
pub use watch::{WatchEvent, WatchLoop, WatchTarget};
