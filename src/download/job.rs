//! Download jobs and their state machine.
//!
//! `Pending -> InProgress -> {Succeeded, Failed}`. A transient failure moves an
//! `InProgress` job back to `Pending` with a `next_retry_at`; both terminal
//! states are final and any attempt to leave them is rejected with
//! [`WatchError::InvalidTransition`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DownloadError, Result, WatchError};
use crate::watch::WatchEvent;

/// Status of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    /// `Succeeded` and `Failed` are terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One download triggered by exactly one [`WatchEvent`].
#[derive(Debug, Clone)]
pub struct DownloadJob {
    id: Uuid,
    event: WatchEvent,
    attempt_count: u32,
    status: JobStatus,
    next_retry_at: Option<DateTime<Utc>>,
    last_error: Option<DownloadError>,
}

impl DownloadJob {
    /// Create a pending job, taking ownership of the event.
    pub fn new(event: WatchEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            event,
            attempt_count: 0,
            status: JobStatus::Pending,
            next_retry_at: None,
            last_error: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn event(&self) -> &WatchEvent {
        &self.event
    }

    /// Attempts started so far, including the one in progress.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// When the next attempt is due, while waiting for a retry.
    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        self.next_retry_at
    }

    pub fn last_error(&self) -> Option<&DownloadError> {
        self.last_error.as_ref()
    }

    fn transition(&mut self, to: JobStatus) -> Result<()> {
        let allowed = matches!(
            (self.status, to),
            (JobStatus::Pending, JobStatus::InProgress)
                | (JobStatus::InProgress, JobStatus::Pending)
                | (JobStatus::InProgress, JobStatus::Succeeded)
                | (JobStatus::InProgress, JobStatus::Failed)
        );
        if !allowed {
            return Err(WatchError::InvalidTransition {
                from: self.status.as_str(),
                to: to.as_str(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// `Pending -> InProgress`, counting a new attempt.
    ///
    /// Rejected while a scheduled retry is not yet due.
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> Result<()> {
        if let Some(at) = self.next_retry_at {
            if now < at {
                return Err(WatchError::InvalidTransition {
                    from: "pending (retry not due)",
                    to: JobStatus::InProgress.as_str(),
                });
            }
        }
        self.transition(JobStatus::InProgress)?;
        self.attempt_count += 1;
        self.next_retry_at = None;
        Ok(())
    }

    /// `InProgress -> Pending` after a transient failure.
    pub fn schedule_retry(&mut self, at: DateTime<Utc>, err: DownloadError) -> Result<()> {
        self.transition(JobStatus::Pending)?;
        self.next_retry_at = Some(at);
        self.last_error = Some(err);
        Ok(())
    }

    /// `InProgress -> Succeeded`.
    pub fn succeed(&mut self) -> Result<()> {
        self.transition(JobStatus::Succeeded)?;
        self.last_error = None;
        Ok(())
    }

    /// `InProgress -> Failed`.
    pub fn fail(&mut self, err: DownloadError) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.last_error = Some(err);
        Ok(())
    }

    /// Summary suitable for the recent-jobs log.
    pub fn record(&self, finished_at: DateTime<Utc>) -> JobRecord {
        JobRecord {
            job_id: self.id,
            event_id: self.event.id(),
            target_id: self.event.target_id().to_string(),
            fingerprint: self.event.fingerprint().to_string(),
            status: self.status,
            attempt_count: self.attempt_count,
            last_error: self.last_error.as_ref().map(ToString::to_string),
            finished_at,
        }
    }
}

/// Archived summary of a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: Uuid,
    pub event_id: Uuid,
    pub target_id: String,
    pub fingerprint: String,
    pub status: JobStatus,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub finished_at: DateTime<Utc>,
}
