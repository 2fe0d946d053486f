//! Fetch command: run a single download job outside the watch loop.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use watchcaller::clock::{Clock, SystemClock};
use watchcaller::download::{DownloadManager, JobStatus};
use watchcaller::health::HealthState;
use watchcaller::watch::{derive_target_id, parse_target_url, sanitize_key, TriggerReason, WatchEvent};

use super::config::load_unvalidated;

pub(crate) async fn cmd_fetch(url: String, key: Option<String>) -> Result<()> {
    let config = load_unvalidated()?;
    let parsed = parse_target_url(&url).map_err(anyhow::Error::msg)?;
    let key = key
        .map(|k| sanitize_key(&k))
        .unwrap_or_else(|| derive_target_id(&parsed));

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let manager =
        DownloadManager::from_config(&config.download, HealthState::new(), Arc::clone(&clock))?;
    manager.store().ensure_dir().with_context(|| {
        format!(
            "Failed to create download directory: {}",
            manager.store().root().display()
        )
    })?;

    let event = WatchEvent::new(
        key.as_str(),
        parsed.as_str(),
        "manual",
        clock.now(),
        TriggerReason::Initial,
    );
    let job = manager.handle(event).await;

    match job.status() {
        JobStatus::Succeeded => {
            println!(
                "Stored {} after {} attempt(s)",
                manager.store().path_for(&key).display(),
                job.attempt_count()
            );
            if let Ok(Some(meta)) = manager.store().read_meta(&key) {
                println!("  size:     {} bytes", meta.size);
                println!("  checksum: {}", meta.checksum);
            }
            Ok(())
        }
        status => {
            let reason = job
                .last_error()
                .map(ToString::to_string)
                .unwrap_or_else(|| "unknown error".to_string());
            bail!(
                "Download {} after {} attempt(s): {}",
                status,
                job.attempt_count(),
                reason
            )
        }
    }
}
