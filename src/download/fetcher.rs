//! Payload fetcher trait and implementations.
//!
//! `Fetcher` abstracts the network call for testability.
//! `HttpFetcher` performs real HTTP(S) GETs.
//! `MockFetcher` is used in tests.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use crate::error::{DownloadError, Result};

/// Retrieves the bytes behind a source URL.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the whole payload. Errors must be classified as transient or permanent.
    async fn fetch(&self, source: &str) -> std::result::Result<Vec<u8>, DownloadError>;
}

/// HTTP(S) fetcher with a per-request timeout and a payload size limit.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, max_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("watchcaller/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, max_bytes })
    }

    fn too_large(&self, source: &str, size: u64) -> DownloadError {
        DownloadError::Permanent(format!(
            "Payload from {} is {} bytes, limit is {}",
            source, size, self.max_bytes
        ))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, source: &str) -> std::result::Result<Vec<u8>, DownloadError> {
        let resp = self.client.get(source).send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DownloadError::from_status(status.as_u16(), source));
        }

        if let Some(len) = resp.content_length() {
            if len > self.max_bytes as u64 {
                return Err(self.too_large(source, len));
            }
        }

        let mut body = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if body.len() + chunk.len() > self.max_bytes {
                return Err(self.too_large(source, (body.len() + chunk.len()) as u64));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

/// Mock fetcher for tests: replays scripted outcomes in order.
#[cfg(test)]
pub struct MockFetcher {
    pub outcomes: std::sync::Mutex<Vec<std::result::Result<Vec<u8>, DownloadError>>>,
    pub calls: std::sync::atomic::AtomicU32,
}

#[cfg(test)]
impl MockFetcher {
    pub fn new(outcomes: Vec<std::result::Result<Vec<u8>, DownloadError>>) -> Self {
        Self {
            outcomes: std::sync::Mutex::new(outcomes),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, _source: &str) -> std::result::Result<Vec<u8>, DownloadError> {
        self.calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            return Err(DownloadError::Permanent("No mock result configured".to_string()));
        }
        outcomes.remove(0)
    }
}
