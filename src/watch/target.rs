//! Watch targets: what is observed, and its last-known fingerprint.

use reqwest::Url;
use sha2::{Digest, Sha256};

use crate::config::TargetConfig;
use crate::error::CheckError;

/// Longest key kept verbatim before it is shortened with a hash suffix.
const MAX_KEY_LEN: usize = 96;

/// Parse and validate a target URL (http/https only).
pub fn parse_target_url(raw: &str) -> Result<Url, String> {
    let parsed = Url::parse(raw.trim()).map_err(|e| format!("Invalid URL '{}': {}", raw, e))?;
    match parsed.scheme() {
        "http" | "https" => {}
        other => {
            return Err(format!(
                "Only http/https URLs are allowed, got '{}' in {}",
                other, raw
            ))
        }
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(format!("URL has no host: {}", raw));
    }
    Ok(parsed)
}

/// Reduce an arbitrary string to a filename-safe key.
///
/// Keeps `[A-Za-z0-9._-]`, maps everything else to `_`, collapses runs of
/// `_`, and never returns an empty key or one made only of dots.
pub fn sanitize_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let mapped = if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            c
        } else {
            '_'
        };
        if mapped == '_' && out.ends_with('_') {
            continue;
        }
        out.push(mapped);
    }
    let trimmed = out.trim_matches(|c| c == '_' || c == '.');

    if trimmed.is_empty() {
        format!("target_{}", short_hash(raw))
    } else if trimmed.len() > MAX_KEY_LEN {
        format!("{}_{}", &trimmed[..MAX_KEY_LEN], short_hash(raw))
    } else {
        trimmed.to_string()
    }
}

fn short_hash(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    hex::encode(&digest[..6])
}

/// Derive a stable target id from a URL: host, path and query.
pub fn derive_target_id(url: &Url) -> String {
    let mut raw = url.host_str().unwrap_or_default().to_string();
    if let Some(port) = url.port() {
        raw.push('_');
        raw.push_str(&port.to_string());
    }
    raw.push_str(url.path());
    if let Some(query) = url.query() {
        raw.push('_');
        raw.push_str(query);
    }
    sanitize_key(&raw)
}

/// The external resource being observed for change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    id: String,
    url: Url,
    download_url: Url,
    fingerprint: Option<String>,
}

impl WatchTarget {
    /// Build a target that watches and downloads the same URL.
    pub fn new(id: impl Into<String>, url: Url) -> Self {
        Self {
            id: sanitize_key(&id.into()),
            download_url: url.clone(),
            url,
            fingerprint: None,
        }
    }

    /// Build a target from configuration. A malformed entry is a fatal config error.
    pub fn from_config(cfg: &TargetConfig) -> Result<Self, CheckError> {
        let url = parse_target_url(&cfg.url).map_err(CheckError::FatalConfig)?;
        let download_url = match cfg.download_url {
            Some(ref raw) => parse_target_url(raw).map_err(CheckError::FatalConfig)?,
            None => url.clone(),
        };
        let id = match cfg.id {
            Some(ref id) if !id.trim().is_empty() => sanitize_key(id),
            Some(_) => {
                return Err(CheckError::FatalConfig(format!(
                    "Empty target id for {}",
                    cfg.url
                )))
            }
            None => derive_target_id(&url),
        };
        Ok(Self {
            id,
            url,
            download_url,
            fingerprint: None,
        })
    }

    /// Stable identifier; also the artifact key.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// URL polled for changes.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// URL fetched when a change is detected.
    pub fn download_url(&self) -> &Url {
        &self.download_url
    }

    /// Last committed fingerprint, if any.
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Record a fingerprint as observed-and-handled.
    ///
    /// Only called once the download for that fingerprint has succeeded.
    pub fn commit_fingerprint(&mut self, fingerprint: impl Into<String>) {
        self.fingerprint = Some(fingerprint.into());
    }

    /// Re-check the target's shape before using it.
    pub fn validate(&self) -> Result<(), CheckError> {
        parse_target_url(self.url.as_str()).map_err(CheckError::FatalConfig)?;
        parse_target_url(self.download_url.as_str()).map_err(CheckError::FatalConfig)?;
        Ok(())
    }
}
