//! Change detection for watch targets.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::event::{TriggerReason, WatchEvent};
use super::target::WatchTarget;
use crate::clock::Clock;
use crate::error::{CheckError, Result};

/// Probes a target for its current fingerprint.
#[async_trait]
pub trait Checker: Send + Sync {
    /// Return an opaque fingerprint of the target's current state.
    ///
    /// Two probes of an unchanged resource must return the same string.
    async fn probe(&self, target: &WatchTarget) -> std::result::Result<String, CheckError>;
}

/// HTTP(S) polling checker.
///
/// The fingerprint is the `ETag` header when present, else `Last-Modified`,
/// else the SHA-256 of the body (read up to `max_bytes`).
pub struct HttpChecker {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpChecker {
    /// Build a checker whose requests give up after `timeout`.
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("watchcaller/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, max_bytes })
    }
}

fn header_value(resp: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

#[async_trait]
impl Checker for HttpChecker {
    async fn probe(&self, target: &WatchTarget) -> std::result::Result<String, CheckError> {
        let url = target.url().clone();
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| CheckError::Transient(format!("Request to {} failed: {}", url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(CheckError::Transient(format!("HTTP {} for {}", status, url)));
        }

        if let Some(etag) = header_value(&resp, reqwest::header::ETAG) {
            return Ok(format!("etag:{}", etag));
        }
        if let Some(modified) = header_value(&resp, reqwest::header::LAST_MODIFIED) {
            return Ok(format!("last-modified:{}", modified));
        }

        let mut hasher = Sha256::new();
        let mut read = 0usize;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| CheckError::Transient(format!("Read from {} failed: {}", url, e)))?;
            let take = chunk.len().min(self.max_bytes - read);
            hasher.update(&chunk[..take]);
            read += take;
            if read >= self.max_bytes {
                debug!(target_id = %target.id(), "Probe body truncated at {} bytes", read);
                break;
            }
        }
        Ok(format!("sha256:{}", hex::encode(hasher.finalize())))
    }
}

/// Probe `target` once and decide whether a download is due.
///
/// Returns an event when the fingerprint differs from the committed one. When
/// nothing is committed yet, an `Initial` event is returned if
/// `fetch_on_start` is set; otherwise the observed fingerprint becomes the
/// baseline and no event is emitted.
pub async fn check_once(
    target: &mut WatchTarget,
    checker: &dyn Checker,
    clock: &dyn Clock,
    fetch_on_start: bool,
) -> std::result::Result<Option<WatchEvent>, CheckError> {
    target.validate()?;
    let fingerprint = checker.probe(target).await?;

    let reason = match target.fingerprint() {
        Some(previous) if previous == fingerprint => return Ok(None),
        Some(previous) => TriggerReason::Changed {
            previous: previous.to_string(),
        },
        None if fetch_on_start => TriggerReason::Initial,
        None => {
            debug!(target_id = %target.id(), "Baseline fingerprint recorded");
            target.commit_fingerprint(fingerprint);
            return Ok(None);
        }
    };

    Ok(Some(WatchEvent::new(
        target.id(),
        target.download_url().as_str(),
        fingerprint,
        clock.now(),
        reason,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use reqwest::Url;
    use std::sync::Mutex;

    struct Scripted(Mutex<Vec<std::result::Result<String, CheckError>>>);

    impl Scripted {
        fn new(outcomes: Vec<std::result::Result<String, CheckError>>) -> Self {
            Self(Mutex::new(outcomes))
        }
    }

    #[async_trait]
    impl Checker for Scripted {
        async fn probe(&self, _target: &WatchTarget) -> std::result::Result<String, CheckError> {
            self.0.lock().unwrap().remove(0)
        }
    }

    fn target() -> WatchTarget {
        WatchTarget::new("feed", Url::parse("https://example.com/feed").unwrap())
    }

    #[tokio::test]
    async fn test_initial_observation_emits_event() {
        let checker = Scripted::new(vec![Ok("etag:v1".into())]);
        let clock = ManualClock::default();
        let mut target = target();

        let event = check_once(&mut target, &checker, &clock, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.trigger_reason(), &TriggerReason::Initial);
        assert_eq!(event.fingerprint(), "etag:v1");
        assert_eq!(event.source(), "https://example.com/feed");
        assert_eq!(event.detected_at(), clock.now());
        // Not committed until the download succeeds.
        assert!(target.fingerprint().is_none());
    }

    #[tokio::test]
    async fn test_initial_observation_without_fetch_records_baseline() {
        let checker = Scripted::new(vec![Ok("etag:v1".into()), Ok("etag:v1".into())]);
        let clock = ManualClock::default();
        let mut target = target();

        assert!(check_once(&mut target, &checker, &clock, false)
            .await
            .unwrap()
            .is_none());
        assert_eq!(target.fingerprint(), Some("etag:v1"));
        assert!(check_once(&mut target, &checker, &clock, false)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unchanged_and_changed() {
        let checker = Scripted::new(vec![Ok("etag:v1".into()), Ok("etag:v2".into())]);
        let clock = ManualClock::default();
        let mut target = target();
        target.commit_fingerprint("etag:v1");

        assert!(check_once(&mut target, &checker, &clock, true)
            .await
            .unwrap()
            .is_none());

        let event = check_once(&mut target, &checker, &clock, true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            event.trigger_reason(),
            &TriggerReason::Changed {
                previous: "etag:v1".into()
            }
        );
        assert_eq!(target.fingerprint(), Some("etag:v1"));
    }

    #[tokio::test]
    async fn test_transient_error_propagates() {
        let checker = Scripted::new(vec![Err(CheckError::Transient("timeout".into()))]);
        let clock = ManualClock::default();
        let mut target = target();

        let err = check_once(&mut target, &checker, &clock, true)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_malformed_target_is_fatal() {
        let checker = Scripted::new(vec![Ok("etag:v1".into())]);
        let clock = ManualClock::default();
        let mut target = WatchTarget::new("bad", Url::parse("ftp://example.com/x").unwrap());

        let err = check_once(&mut target, &checker, &clock, true)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckError::FatalConfig(_)));
    }
}
