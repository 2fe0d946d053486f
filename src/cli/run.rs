//! `run` command: wire the watch loop, download manager and health server.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use watchcaller::clock::{Clock, SystemClock};
use watchcaller::config::{Config, MAX_INTERVAL_SECS};
use watchcaller::download::DownloadManager;
use watchcaller::health::{start_health_server, HealthReporter, HealthState};
use watchcaller::utils::logging::LOG_DIR;
use watchcaller::watch::{HttpChecker, WatchLoop, WatchTarget};
use watchcaller::WatchError;

/// Minimum allowed interval in seconds (prevents busy loops).
const MIN_INTERVAL_SECS: u64 = 1;

/// Parse interval string like "1h", "30m", "15m", "60s" into seconds.
pub fn parse_interval(s: &str) -> Result<u64> {
    let s = s.trim().to_lowercase();
    let secs = if let Some(hours) = s.strip_suffix('h') {
        let n: u64 = hours.parse().with_context(|| "Invalid hours value")?;
        n.checked_mul(3600).context("Interval too large")?
    } else if let Some(mins) = s.strip_suffix('m') {
        let n: u64 = mins.parse().with_context(|| "Invalid minutes value")?;
        n.checked_mul(60).context("Interval too large")?
    } else if let Some(sec_str) = s.strip_suffix('s') {
        sec_str.parse().with_context(|| "Invalid seconds value")?
    } else {
        s.parse::<u64>()
            .with_context(|| "Invalid interval. Use formats like 1h, 30m, or 60s")?
    };

    if secs < MIN_INTERVAL_SECS {
        bail!(
            "Interval too small ({}s). Minimum is {}s.",
            secs,
            MIN_INTERVAL_SECS
        );
    }
    if secs > MAX_INTERVAL_SECS {
        bail!(
            "Interval too large ({}s). Maximum is {}s.",
            secs,
            MAX_INTERVAL_SECS
        );
    }
    Ok(secs)
}

/// Build watch targets from configuration. Any malformed entry is fatal,
/// as are two targets that resolve to the same artifact key.
pub(crate) fn build_targets(config: &Config) -> Result<Vec<WatchTarget>> {
    let targets = config
        .watch
        .targets
        .iter()
        .map(WatchTarget::from_config)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(WatchError::from)?;

    let mut seen = HashSet::new();
    for target in &targets {
        if !seen.insert(target.id()) {
            bail!("duplicate target id '{}'", target.id());
        }
    }
    Ok(targets)
}

pub(crate) async fn cmd_run(interval: Option<String>, once: bool) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(interval) = interval {
        config.watch.interval_secs = parse_interval(&interval)?;
    }
    let targets = build_targets(&config)?;

    std::fs::create_dir_all(LOG_DIR)
        .with_context(|| format!("Failed to create log directory: {}", LOG_DIR))?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let health = HealthState::new();
    let downloads = Arc::new(DownloadManager::from_config(
        &config.download,
        health.clone(),
        Arc::clone(&clock),
    )?);
    downloads.store().ensure_dir().with_context(|| {
        format!(
            "Failed to create download directory: {}",
            downloads.store().root().display()
        )
    })?;

    let checker = Arc::new(HttpChecker::new(
        config.watch.check_timeout(),
        config.watch.max_probe_bytes,
    )?);
    let mut watch_loop = WatchLoop::new(
        targets,
        checker,
        Arc::clone(&downloads),
        health.clone(),
        Arc::clone(&clock),
    )
    .with_interval(config.watch.interval())
    .with_check_timeout(config.watch.check_timeout())
    .with_fetch_on_start(config.watch.fetch_on_start)
    .with_grace(config.shutdown.grace());

    if once {
        for (target_id, outcome) in watch_loop.run_once().await? {
            println!("{}: {}", target_id, outcome);
        }
        return Ok(());
    }

    let reporter = Arc::new(HealthReporter::new(
        health,
        Arc::clone(&clock),
        config.health.failure_threshold,
        config.watch.interval(),
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    let health_handle = start_health_server(&config.health.host, config.health.port, reporter)
        .await
        .with_context(|| {
            format!(
                "Failed to start health server on {}:{}",
                config.health.host, config.health.port
            )
        })?;

    println!(
        "Watching {} target(s) every {}s. Press Ctrl+C to stop.",
        watch_loop.targets().len(),
        config.watch.interval_secs
    );

    let result = watch_loop.run(shutdown_rx).await;
    health_handle.abort();

    result.context("Watch loop halted")?;
    println!("Stopped.");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = tokio::signal::ctrl_c() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to register SIGTERM handler, using Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
