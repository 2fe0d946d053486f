//! Download manager: turns watch events into persisted artifacts.
//!
//! Each [`WatchEvent`] becomes exactly one [`DownloadJob`]. The job is driven
//! through its state machine by [`DownloadManager::execute`]: transient
//! failures are retried with exponential backoff (sleeping on the injected
//! [`Clock`]), permanent failures end the job immediately. Successful payloads
//! are written atomically into the [`ArtifactStore`].

pub mod fetcher;
pub mod job;
pub mod retry;
pub mod store;

pub use fetcher::{Fetcher, HttpFetcher};
pub use job::{DownloadJob, JobRecord, JobStatus};
pub use retry::{compute_delay, RetryDecision, RetryPolicy};
pub use store::{checksum, Artifact, ArtifactStore};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::Clock;
use crate::config::DownloadConfig;
use crate::error::{DownloadError, Result, WatchError};
use crate::health::{ComponentStatus, HealthState};
use crate::log_component;
use crate::watch::WatchEvent;

/// Finished jobs kept for inspection.
pub const JOB_HISTORY_LIMIT: usize = 64;

fn state_error(err: WatchError) -> DownloadError {
    DownloadError::Permanent(err.to_string())
}

/// Executes download jobs and records their outcomes.
pub struct DownloadManager {
    fetcher: Arc<dyn Fetcher>,
    store: ArtifactStore,
    policy: RetryPolicy,
    health: HealthState,
    clock: Arc<dyn Clock>,
    history: Mutex<VecDeque<JobRecord>>,
}

impl DownloadManager {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        store: ArtifactStore,
        policy: RetryPolicy,
        health: HealthState,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            fetcher,
            store,
            policy,
            health,
            clock,
            history: Mutex::new(VecDeque::with_capacity(JOB_HISTORY_LIMIT)),
        }
    }

    /// Build a manager with an [`HttpFetcher`] from configuration.
    pub fn from_config(
        cfg: &DownloadConfig,
        health: HealthState,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let fetcher = HttpFetcher::new(cfg.fetch_timeout(), cfg.max_bytes)?;
        Ok(Self::new(
            Arc::new(fetcher),
            ArtifactStore::new(&cfg.dir),
            RetryPolicy::from_config(cfg),
            health,
            clock,
        ))
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Run a pending job to a terminal state.
    ///
    /// On return the job is `Succeeded` (with the artifact) or `Failed` (with
    /// the last error). A job that is not `Pending` is rejected untouched.
    pub async fn execute(
        &self,
        job: &mut DownloadJob,
    ) -> std::result::Result<Artifact, DownloadError> {
        if job.status() != JobStatus::Pending {
            return Err(state_error(WatchError::InvalidTransition {
                from: job.status().as_str(),
                to: JobStatus::InProgress.as_str(),
            }));
        }

        loop {
            while let Some(at) = job.next_retry_at() {
                let now = self.clock.now();
                if now >= at {
                    break;
                }
                let wait = (at - now).to_std().unwrap_or(Duration::from_millis(1));
                self.clock.sleep(wait).await;
            }

            job.begin_attempt(self.clock.now()).map_err(state_error)?;
            log_component!(
                debug,
                "download",
                "Download attempt started",
                target_id = job.event().target_id(),
                attempt = job.attempt_count()
            );

            let err = match self.attempt(job.event()).await {
                Ok(artifact) => {
                    job.succeed().map_err(state_error)?;
                    return Ok(artifact);
                }
                Err(err) => err,
            };

            match self.policy.decide(job.attempt_count(), &err, self.clock.now()) {
                RetryDecision::RetryAt { delay, at } => {
                    log_component!(
                        warn,
                        "download",
                        "Transient download failure, retrying",
                        target_id = job.event().target_id(),
                        attempt = job.attempt_count(),
                        delay_ms = delay.as_millis() as u64,
                        error = err.to_string().as_str()
                    );
                    job.schedule_retry(at, err).map_err(state_error)?;
                }
                RetryDecision::GiveUp => {
                    job.fail(err.clone()).map_err(state_error)?;
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(&self, event: &WatchEvent) -> std::result::Result<Artifact, DownloadError> {
        let bytes = self.fetcher.fetch(event.source()).await?;

        let store = self.store.clone();
        let key = event.target_id().to_string();
        let source = event.source().to_string();
        let fetched_at = self.clock.now();
        tokio::task::spawn_blocking(move || store.write(&key, &source, &bytes, fetched_at))
            .await
            .map_err(|e| DownloadError::Transient(format!("Store task failed: {}", e)))?
    }

    /// Consume an event: create its job, run it, archive it and record the
    /// outcome in the health state.
    pub async fn handle(&self, event: WatchEvent) -> DownloadJob {
        let target_id = event.target_id().to_string();
        let mut job = DownloadJob::new(event);
        let result = self.execute(&mut job).await;
        let finished_at = self.clock.now();

        match result {
            Ok(artifact) => {
                log_component!(
                    info,
                    "download",
                    "Artifact stored",
                    target_id = target_id.as_str(),
                    attempts = job.attempt_count(),
                    size = artifact.size,
                    checksum = artifact.checksum.as_str()
                );
                self.health.record_success(finished_at);
                self.health
                    .set_component(&target_id, ComponentStatus::Ok, None);
            }
            Err(err) => {
                log_component!(
                    warn,
                    "download",
                    "Download failed",
                    target_id = target_id.as_str(),
                    attempts = job.attempt_count(),
                    kind = err.kind(),
                    error = err.to_string().as_str()
                );
                self.health.record_failure(finished_at, err.to_string());
                self.health.set_component(
                    &target_id,
                    ComponentStatus::Degraded,
                    Some(err.to_string()),
                );
            }
        }

        let record = job.record(finished_at);
        self.health.record_job(record.clone());
        self.archive(record);
        job
    }

    fn archive(&self, record: JobRecord) {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        if history.len() == JOB_HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(record);
    }

    /// Finished jobs, oldest first.
    pub fn recent_jobs(&self) -> Vec<JobRecord> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}
