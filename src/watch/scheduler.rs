//! Watch loop: one ticking worker per target.
//!
//! Each worker owns its target and runs at most one cycle at a time. A tick
//! that arrives while the previous cycle is still running is skipped. A cycle
//! is a bounded check followed, when a change is detected, by a download; the
//! target's fingerprint is committed only after that download succeeds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::checker::{check_once, Checker};
use super::target::WatchTarget;
use crate::clock::Clock;
use crate::download::{DownloadManager, JobStatus};
use crate::error::{CheckError, Result, WatchError};
use crate::health::{ComponentStatus, HealthState};
use crate::log_component;

/// What one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Fingerprint unchanged (or baseline recorded).
    Unchanged,
    /// Check failed transiently; retried next tick.
    CheckFailed(String),
    /// A change was detected and its download job finished in this state.
    Downloaded(JobStatus),
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CycleOutcome::Unchanged => write!(f, "unchanged"),
            CycleOutcome::CheckFailed(msg) => write!(f, "check failed: {}", msg),
            CycleOutcome::Downloaded(status) => write!(f, "download {}", status),
        }
    }
}

/// Tick counters shared by all workers.
#[derive(Debug, Default)]
pub struct WatchStats {
    ticks: AtomicU64,
    skipped: AtomicU64,
    cycles: AtomicU64,
}

impl WatchStats {
    /// Ticks observed across all targets.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Ticks skipped because a cycle was still in flight.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Cycles that ran to completion.
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }
}

struct CycleContext {
    checker: Arc<dyn Checker>,
    downloads: Arc<DownloadManager>,
    health: HealthState,
    clock: Arc<dyn Clock>,
    check_timeout: Duration,
    fetch_on_start: bool,
}

impl CycleContext {
    async fn run_cycle(&self, target: &mut WatchTarget) -> Result<CycleOutcome> {
        let checked = tokio::time::timeout(
            self.check_timeout,
            check_once(
                target,
                self.checker.as_ref(),
                self.clock.as_ref(),
                self.fetch_on_start,
            ),
        )
        .await
        .unwrap_or_else(|_| {
            Err(CheckError::Transient(format!(
                "check timed out after {}s",
                self.check_timeout.as_secs_f64()
            )))
        });

        match checked {
            Ok(None) => {
                debug!(target_id = %target.id(), "No change");
                self.health.record_success(self.clock.now());
                self.health
                    .set_component(target.id(), ComponentStatus::Ok, None);
                Ok(CycleOutcome::Unchanged)
            }
            Ok(Some(event)) => {
                log_component!(
                    info,
                    "watch",
                    "Change detected",
                    target_id = target.id(),
                    reason = event.trigger_reason().to_string().as_str(),
                    fingerprint = event.fingerprint()
                );
                let fingerprint = event.fingerprint().to_string();
                let job = self.downloads.handle(event).await;
                if job.status() == JobStatus::Succeeded {
                    target.commit_fingerprint(fingerprint);
                }
                Ok(CycleOutcome::Downloaded(job.status()))
            }
            Err(CheckError::Transient(msg)) => {
                log_component!(
                    warn,
                    "watch",
                    "Check failed",
                    target_id = target.id(),
                    error = msg.as_str()
                );
                self.health.record_failure(self.clock.now(), msg.clone());
                self.health.set_component(
                    target.id(),
                    ComponentStatus::Degraded,
                    Some(msg.clone()),
                );
                Ok(CycleOutcome::CheckFailed(msg))
            }
            Err(fatal) => {
                log_component!(
                    error,
                    "watch",
                    "Fatal target error",
                    target_id = target.id(),
                    error = fatal.to_string().as_str()
                );
                self.health.set_component(
                    target.id(),
                    ComponentStatus::Down,
                    Some(fatal.to_string()),
                );
                Err(fatal.into())
            }
        }
    }
}

type CycleHandle = JoinHandle<(WatchTarget, Result<CycleOutcome>)>;

/// Scheduler driving every configured target.
pub struct WatchLoop {
    targets: Vec<WatchTarget>,
    ctx: CycleContext,
    interval: Duration,
    grace: Duration,
    stats: Arc<WatchStats>,
}

impl WatchLoop {
    /// Create a loop with a 60s interval, 30s check timeout, initial fetch
    /// enabled and a 10s shutdown grace period.
    pub fn new(
        targets: Vec<WatchTarget>,
        checker: Arc<dyn Checker>,
        downloads: Arc<DownloadManager>,
        health: HealthState,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            targets,
            ctx: CycleContext {
                checker,
                downloads,
                health,
                clock,
                check_timeout: Duration::from_secs(30),
                fetch_on_start: true,
            },
            interval: Duration::from_secs(60),
            grace: Duration::from_secs(10),
            stats: Arc::new(WatchStats::default()),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_check_timeout(mut self, timeout: Duration) -> Self {
        self.ctx.check_timeout = timeout;
        self
    }

    pub fn with_fetch_on_start(mut self, fetch_on_start: bool) -> Self {
        self.ctx.fetch_on_start = fetch_on_start;
        self
    }

    /// How long in-flight cycles may run after shutdown before being aborted.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn targets(&self) -> &[WatchTarget] {
        &self.targets
    }

    pub fn stats(&self) -> Arc<WatchStats> {
        Arc::clone(&self.stats)
    }

    /// Run one cycle for every target, sequentially.
    pub async fn run_once(&mut self) -> Result<Vec<(String, CycleOutcome)>> {
        let mut outcomes = Vec::with_capacity(self.targets.len());
        for target in &mut self.targets {
            let outcome = self.ctx.run_cycle(target).await?;
            self.stats.cycles.fetch_add(1, Ordering::Relaxed);
            outcomes.push((target.id().to_string(), outcome));
        }
        Ok(outcomes)
    }

    /// Drive all targets until `shutdown` flips to `true`.
    ///
    /// Returns `Err(WatchError::Config)` as soon as any target hits a fatal
    /// error; the remaining workers are stopped first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.targets.is_empty() {
            return Err(WatchError::Config("no watch targets configured".into()));
        }

        let (stop_tx, stop_rx) = watch::channel(*shutdown.borrow());
        let ctx = Arc::new(self.ctx);
        let mut workers = JoinSet::new();
        for target in self.targets {
            workers.spawn(run_worker(
                Arc::clone(&ctx),
                target,
                self.interval,
                self.grace,
                Arc::clone(&self.stats),
                stop_rx.clone(),
            ));
        }
        log_component!(
            info,
            "watch",
            "Watch loop started",
            targets = workers.len() as u64,
            interval_secs = self.interval.as_secs()
        );

        let mut stopping = *shutdown.borrow();
        let mut failure: Option<WatchError> = None;
        loop {
            tokio::select! {
                joined = workers.join_next() => match joined {
                    None => break,
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => {
                        if !stopping {
                            error!(error = %e, "Watch loop halting");
                        }
                        stopping = true;
                        let _ = stop_tx.send(true);
                        failure.get_or_insert(e);
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Watch worker task failed");
                    }
                },
                changed = shutdown.changed(), if !stopping => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Shutdown requested, stopping watch loop");
                        stopping = true;
                        let _ = stop_tx.send(true);
                    }
                }
            }
        }

        info!(
            ticks = self.stats.ticks(),
            skipped = self.stats.skipped(),
            cycles = self.stats.cycles(),
            "Watch loop stopped"
        );
        failure.map_or(Ok(()), Err)
    }
}

async fn run_worker(
    ctx: Arc<CycleContext>,
    mut target: WatchTarget,
    interval: Duration,
    grace: Duration,
    stats: Arc<WatchStats>,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    if *stop.borrow() {
        return Ok(());
    }
    let id = target.id().to_string();
    let mut in_flight: Option<CycleHandle> = None;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                stats.ticks.fetch_add(1, Ordering::Relaxed);
                if in_flight.is_some() {
                    stats.skipped.fetch_add(1, Ordering::Relaxed);
                    debug!(target_id = %id, "Previous cycle still running, skipping tick");
                    continue;
                }
                let ctx = Arc::clone(&ctx);
                let mut working = target.clone();
                in_flight = Some(tokio::spawn(async move {
                    let result = ctx.run_cycle(&mut working).await;
                    (working, result)
                }));
            }
            joined = async {
                match in_flight.as_mut() {
                    Some(handle) => handle.await,
                    None => std::future::pending().await,
                }
            } => {
                in_flight = None;
                stats.cycles.fetch_add(1, Ordering::Relaxed);
                match joined {
                    Ok((updated, result)) => {
                        target = updated;
                        result?;
                    }
                    Err(e) => {
                        warn!(target_id = %id, error = %e, "Cycle task failed");
                        ctx.health.record_failure(ctx.clock.now(), format!("cycle task failed: {}", e));
                    }
                }
            }
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }

    if let Some(handle) = in_flight.take() {
        let abort = handle.abort_handle();
        match tokio::time::timeout(grace, handle).await {
            Ok(_) => debug!(target_id = %id, "In-flight cycle finished during shutdown"),
            Err(_) => {
                abort.abort();
                warn!(
                    target_id = %id,
                    grace_secs = grace.as_secs(),
                    "In-flight cycle aborted after grace period"
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::download::fetcher::MockFetcher;
    use crate::download::{ArtifactStore, RetryPolicy};
    use crate::error::DownloadError;
    use async_trait::async_trait;
    use reqwest::Url;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    struct SlowChecker {
        delay: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
        probes: AtomicUsize,
    }

    impl SlowChecker {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                probes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Checker for SlowChecker {
        async fn probe(&self, _target: &WatchTarget) -> std::result::Result<String, CheckError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.probes.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok("etag:same".into())
        }
    }

    struct Scripted(Mutex<Vec<std::result::Result<String, CheckError>>>);

    #[async_trait]
    impl Checker for Scripted {
        async fn probe(&self, _target: &WatchTarget) -> std::result::Result<String, CheckError> {
            let mut outcomes = self.0.lock().unwrap();
            if outcomes.len() > 1 {
                outcomes.remove(0)
            } else {
                outcomes[0].clone()
            }
        }
    }

    fn manager(
        outcomes: Vec<std::result::Result<Vec<u8>, DownloadError>>,
        health: &HealthState,
        dir: &tempfile::TempDir,
    ) -> Arc<DownloadManager> {
        Arc::new(DownloadManager::new(
            Arc::new(MockFetcher::new(outcomes)),
            ArtifactStore::new(dir.path().join("downloads")),
            RetryPolicy::new().with_max_retries(0),
            health.clone(),
            Arc::new(SystemClock),
        ))
    }

    fn target(id: &str) -> WatchTarget {
        WatchTarget::new(id, Url::parse("https://example.com/feed").unwrap())
    }

    #[tokio::test]
    async fn test_tick_skipped_while_cycle_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let health = HealthState::new();
        let checker = Arc::new(SlowChecker::new(Duration::from_millis(250)));
        let watch_loop = WatchLoop::new(
            vec![target("slow")],
            checker.clone(),
            manager(vec![], &health, &dir),
            health.clone(),
            Arc::new(SystemClock),
        )
        .with_interval(Duration::from_millis(50))
        .with_fetch_on_start(false);
        let stats = watch_loop.stats();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(watch_loop.run(rx));
        tokio::time::sleep(Duration::from_millis(700)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(checker.max_active.load(Ordering::SeqCst), 1);
        assert!(stats.skipped() > 0, "expected skipped ticks");
        assert!(stats.ticks() > stats.cycles());
        assert!(checker.probes.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_failed_download_keeps_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let health = HealthState::new();
        let checker = Arc::new(Scripted(Mutex::new(vec![Ok("etag:v2".into())])));
        let mut target = target("feed");
        target.commit_fingerprint("etag:v1");

        let mut watch_loop = WatchLoop::new(
            vec![target],
            checker,
            manager(
                vec![
                    Err(DownloadError::from_status(404, "x")),
                    Ok(b"v2".to_vec()),
                ],
                &health,
                &dir,
            ),
            health.clone(),
            Arc::new(SystemClock),
        );

        let outcomes = watch_loop.run_once().await.unwrap();
        assert_eq!(outcomes[0].1, CycleOutcome::Downloaded(JobStatus::Failed));
        assert_eq!(watch_loop.targets()[0].fingerprint(), Some("etag:v1"));

        // Change is detected again and committed once the download succeeds.
        let outcomes = watch_loop.run_once().await.unwrap();
        assert_eq!(outcomes[0].1, CycleOutcome::Downloaded(JobStatus::Succeeded));
        assert_eq!(watch_loop.targets()[0].fingerprint(), Some("etag:v2"));

        let outcomes = watch_loop.run_once().await.unwrap();
        assert_eq!(outcomes[0].1, CycleOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_transient_check_error_records_failure() {
        let dir = tempfile::tempdir().unwrap();
        let health = HealthState::new();
        let checker = Arc::new(Scripted(Mutex::new(vec![Err(CheckError::Transient(
            "HTTP 502".into(),
        ))])));
        let mut watch_loop = WatchLoop::new(
            vec![target("feed")],
            checker,
            manager(vec![], &health, &dir),
            health.clone(),
            Arc::new(SystemClock),
        );

        let outcomes = watch_loop.run_once().await.unwrap();
        assert!(matches!(outcomes[0].1, CycleOutcome::CheckFailed(_)));
        assert_eq!(health.snapshot().consecutive_failures, 1);
        assert_eq!(
            health.components()["feed"].status,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_check_timeout_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let health = HealthState::new();
        let mut watch_loop = WatchLoop::new(
            vec![target("slow")],
            Arc::new(SlowChecker::new(Duration::from_millis(500))),
            manager(vec![], &health, &dir),
            health.clone(),
            Arc::new(SystemClock),
        )
        .with_check_timeout(Duration::from_millis(20));

        let outcomes = watch_loop.run_once().await.unwrap();
        match &outcomes[0].1 {
            CycleOutcome::CheckFailed(msg) => assert!(msg.contains("timed out")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fatal_target_halts_loop() {
        let dir = tempfile::tempdir().unwrap();
        let health = HealthState::new();
        let bad = WatchTarget::new("bad", Url::parse("ftp://example.com/x").unwrap());
        let watch_loop = WatchLoop::new(
            vec![bad, target("good")],
            Arc::new(SlowChecker::new(Duration::from_millis(1))),
            manager(vec![], &health, &dir),
            health.clone(),
            Arc::new(SystemClock),
        )
        .with_interval(Duration::from_millis(20))
        .with_fetch_on_start(false);

        let (_tx, rx) = watch::channel(false);
        let result = tokio::time::timeout(Duration::from_secs(5), watch_loop.run(rx))
            .await
            .expect("loop should halt on its own");
        assert!(matches!(result, Err(WatchError::Config(_))));
        assert_eq!(health.components()["bad"].status, ComponentStatus::Down);
    }

    #[tokio::test]
    async fn test_run_without_targets_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let health = HealthState::new();
        let watch_loop = WatchLoop::new(
            vec![],
            Arc::new(SlowChecker::new(Duration::from_millis(1))),
            manager(vec![], &health, &dir),
            health,
            Arc::new(SystemClock),
        );
        let (_tx, rx) = watch::channel(false);
        assert!(matches!(
            watch_loop.run(rx).await,
            Err(WatchError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_after_grace() {
        let dir = tempfile::tempdir().unwrap();
        let health = HealthState::new();
        let watch_loop = WatchLoop::new(
            vec![target("stuck")],
            Arc::new(SlowChecker::new(Duration::from_secs(30))),
            manager(vec![], &health, &dir),
            health,
            Arc::new(SystemClock),
        )
        .with_check_timeout(Duration::from_secs(60))
        .with_grace(Duration::from_millis(100));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(watch_loop.run(rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("shutdown should not wait for the stuck check");
        result.unwrap().unwrap();
    }
}
