//! Check command: fingerprint every configured target once, no downloads.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use watchcaller::config::Config;
use watchcaller::watch::{Checker, HttpChecker};

use super::run::build_targets;

pub(crate) async fn cmd_check() -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let targets = build_targets(&config)?;
    let checker: Arc<dyn Checker> = Arc::new(HttpChecker::new(
        config.watch.check_timeout(),
        config.watch.max_probe_bytes,
    )?);

    let mut failures = 0usize;
    for target in &targets {
        let checked = tokio::time::timeout(config.watch.check_timeout(), checker.probe(target)).await;
        match checked {
            Ok(Ok(fingerprint)) => println!("[OK] {} {}", target.id(), fingerprint),
            Ok(Err(e)) => {
                failures += 1;
                println!("[ERROR] {} {}", target.id(), e);
            }
            Err(_) => {
                failures += 1;
                println!(
                    "[ERROR] {} check timed out after {}s",
                    target.id(),
                    config.watch.check_timeout_secs
                );
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} target(s) failed", failures, targets.len());
    }
    Ok(())
}
