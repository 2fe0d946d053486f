//! Health reporting for watchcaller.
//!
//! [`HealthState`] is the single shared record of cycle outcomes. The watch
//! loop and the download manager write to it; [`HealthReporter`] only reads.
//! [`start_health_server`] exposes the report on `GET /health` (alias
//! `/healthz`) using raw TCP and a hand-written HTTP/1.1 response.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::download::JobRecord;
use crate::error::Result;

/// Request reads give up after this long.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// ComponentStatus
// ============================================================================

/// The status of a single named component (a watch target, the store, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is operating normally.
    Ok,
    /// Last operation failed, but the component keeps running.
    Degraded,
    /// Component has stopped.
    Down,
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Ok => "ok",
            ComponentStatus::Degraded => "degraded",
            ComponentStatus::Down => "down",
        }
    }
}

/// A named component entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

// ============================================================================
// HealthStatus / HealthState
// ============================================================================

/// Process-wide cycle outcome counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// When the most recent cycle finished.
    pub last_cycle_at: Option<DateTime<Utc>>,
    /// Outcome of the most recent cycle.
    pub last_cycle_ok: Option<bool>,
    /// Failed cycles since the last success.
    pub consecutive_failures: u32,
    pub total_cycles: u64,
    pub total_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Default)]
struct SharedHealth {
    status: HealthStatus,
    components: HashMap<String, ComponentCheck>,
    last_job: Option<JobRecord>,
}

/// Shared, lock-guarded health state.
///
/// Cloning is cheap; all clones see the same state. Cycle updates are
/// monotonic: an update stamped earlier than `last_cycle_at` is discarded.
#[derive(Debug, Clone, Default)]
pub struct HealthState {
    inner: Arc<RwLock<SharedHealth>>,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SharedHealth> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SharedHealth> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a successful cycle. Returns `false` if the update was stale.
    pub fn record_success(&self, at: DateTime<Utc>) -> bool {
        let mut shared = self.write();
        let status = &mut shared.status;
        if status.last_cycle_at.is_some_and(|last| at < last) {
            debug!(at = %at, "Discarding stale health update");
            return false;
        }
        status.last_cycle_at = Some(at);
        status.last_cycle_ok = Some(true);
        status.consecutive_failures = 0;
        status.total_cycles += 1;
        status.last_error = None;
        true
    }

    /// Record a failed cycle. Returns `false` if the update was stale.
    pub fn record_failure(&self, at: DateTime<Utc>, error: impl Into<String>) -> bool {
        let mut shared = self.write();
        let status = &mut shared.status;
        if status.last_cycle_at.is_some_and(|last| at < last) {
            debug!(at = %at, "Discarding stale health update");
            return false;
        }
        status.last_cycle_at = Some(at);
        status.last_cycle_ok = Some(false);
        status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        status.total_cycles += 1;
        status.total_failures += 1;
        status.last_error = Some(error.into());
        true
    }

    /// Set a named component's status, replacing any previous entry.
    pub fn set_component(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        self.write()
            .components
            .insert(name.to_string(), ComponentCheck { status, message });
    }

    /// Remember the most recently finished download job.
    pub fn record_job(&self, record: JobRecord) {
        self.write().last_job = Some(record);
    }

    /// Copy of the cycle counters.
    pub fn snapshot(&self) -> HealthStatus {
        self.read().status.clone()
    }

    pub fn components(&self) -> BTreeMap<String, ComponentCheck> {
        self.read()
            .components
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn last_job(&self) -> Option<JobRecord> {
        self.read().last_job.clone()
    }
}

// ============================================================================
// HealthReporter
// ============================================================================

/// Result of a health evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub ok: bool,
    #[serde(flatten)]
    pub detail: HealthDetail,
}

/// Supporting detail for a [`HealthReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthDetail {
    /// Why the report is unhealthy, when it is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub uptime_secs: i64,
    /// Seconds since the last cycle (or since start, before the first cycle).
    pub idle_secs: i64,
    pub failure_threshold: u32,
    pub stale_after_secs: u64,
    #[serde(flatten)]
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, ComponentCheck>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_job: Option<JobRecord>,
}

/// Evaluates [`HealthState`] against the failure threshold and staleness window.
pub struct HealthReporter {
    state: HealthState,
    clock: Arc<dyn Clock>,
    failure_threshold: u32,
    staleness: Duration,
    started_at: DateTime<Utc>,
}

impl HealthReporter {
    /// Create a reporter. Cycles are stale after `2 * watch_interval`.
    pub fn new(
        state: HealthState,
        clock: Arc<dyn Clock>,
        failure_threshold: u32,
        watch_interval: Duration,
    ) -> Self {
        let started_at = clock.now();
        Self {
            state,
            clock,
            failure_threshold,
            staleness: watch_interval.saturating_mul(2),
            started_at,
        }
    }

    pub fn state(&self) -> &HealthState {
        &self.state
    }

    /// Evaluate current health. Pure read.
    pub fn report(&self) -> HealthReport {
        let now = self.clock.now();
        let status = self.state.snapshot();

        let reference = status.last_cycle_at.unwrap_or(self.started_at);
        let idle = now - reference;
        let stale_after = chrono::Duration::from_std(self.staleness)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));

        let reason = if status.consecutive_failures >= self.failure_threshold {
            Some(format!(
                "{} consecutive failed cycles (threshold {})",
                status.consecutive_failures, self.failure_threshold
            ))
        } else if idle > stale_after {
            Some(match status.last_cycle_at {
                Some(_) => format!(
                    "no cycle completed in {}s (limit {}s)",
                    idle.num_seconds(),
                    stale_after.num_seconds()
                ),
                None => format!(
                    "no cycle completed since start {}s ago (limit {}s)",
                    idle.num_seconds(),
                    stale_after.num_seconds()
                ),
            })
        } else {
            None
        };

        HealthReport {
            ok: reason.is_none(),
            detail: HealthDetail {
                reason,
                uptime_secs: (now - self.started_at).num_seconds(),
                idle_secs: idle.num_seconds(),
                failure_threshold: self.failure_threshold,
                stale_after_secs: self.staleness.as_secs(),
                status,
                components: self.state.components(),
                last_job: self.state.last_job(),
            },
        }
    }
}

// ============================================================================
// Health server (raw TCP)
// ============================================================================

fn render(reporter: &HealthReporter, method: &str, path: &str) -> (&'static str, String) {
    match (method, path) {
        ("GET", "/health") | ("GET", "/healthz") => {
            let report = reporter.report();
            let status_line = if report.ok {
                "200 OK"
            } else {
                "503 Service Unavailable"
            };
            let body = serde_json::to_string(&report)
                .unwrap_or_else(|_| format!("{{\"ok\":{}}}", report.ok));
            (status_line, body)
        }
        _ => ("404 Not Found", "{\"error\":\"not_found\"}".to_string()),
    }
}

/// Start the HTTP health server.
///
/// Serves:
/// - `GET /health` → 200 with `{"ok":true,...}`, or 503 with `{"ok":false,...}`
/// - `GET /healthz` → same as `/health`
/// - Anything else → 404
///
/// Returns a `JoinHandle` so callers can abort on shutdown.
pub async fn start_health_server(
    host: &str,
    port: u16,
    reporter: Arc<HealthReporter>,
) -> Result<tokio::task::JoinHandle<()>> {
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr).await?;
    crate::log_component!(info, "health", "Health server listening", addr = addr.as_str());

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut stream, _addr)) => {
                    let reporter = Arc::clone(&reporter);
                    tokio::spawn(async move {
                        let mut buf = [0u8; 512];
                        let n = match tokio::time::timeout(
                            READ_TIMEOUT,
                            tokio::io::AsyncReadExt::read(&mut stream, &mut buf),
                        )
                        .await
                        {
                            Ok(Ok(n)) => n,
                            _ => return,
                        };

                        let request = String::from_utf8_lossy(&buf[..n]);
                        let request_line = request.lines().next().unwrap_or_default();
                        let mut parts = request_line.split_whitespace();
                        let method = parts.next().unwrap_or_default();
                        let raw_path = parts.next().unwrap_or_default();
                        let path = raw_path.split('?').next().unwrap_or(raw_path);

                        let (status_line, body) = render(&reporter, method, path);

                        let response = format!(
                            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status_line,
                            body.len(),
                            body
                        );

                        let _ = stream.write_all(response.as_bytes()).await;
                        let _ = stream.shutdown().await;
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Health server accept error");
                }
            }
        }
    });

    info!(port = port, "Health reporter started");
    Ok(handle)
}

// ============================================================================
// Tests
// ============================================================================
