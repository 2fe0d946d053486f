//! Health command: query a running instance's `/health` endpoint.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use super::config::load_unvalidated;

/// Build the default endpoint URL from the configured bind address.
///
/// Wildcard binds are reached through loopback.
fn default_health_url(host: &str, port: u16) -> String {
    let host = match host {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" | "[::]" => "[::1]",
        other => other,
    };
    format!("http://{}:{}/health", host, port)
}

pub(crate) async fn cmd_health(url: Option<String>) -> Result<()> {
    let url = match url {
        Some(url) => url,
        None => {
            let config = load_unvalidated()?;
            default_health_url(&config.health.host, config.health.port)
        }
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let resp = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("Failed to reach {}", url))?;
    let status = resp.status();
    let body: Value = resp
        .json()
        .await
        .with_context(|| format!("Invalid health response from {}", url))?;

    println!("{}", serde_json::to_string_pretty(&body)?);

    let ok = body.get("ok").and_then(Value::as_bool).unwrap_or(false);
    if !ok || !status.is_success() {
        bail!("Unhealthy (HTTP {})", status.as_u16());
    }
    Ok(())
}
