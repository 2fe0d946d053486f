//! Configuration validation with unknown field detection.
//!
//! Two passes:
//! - [`validate_config`] inspects the raw JSON for unknown keys (typos)
//! - [`validate_semantics`] checks value constraints on a parsed [`Config`]

use serde_json::Value;
use std::collections::HashSet;

use super::{Config, MAX_INTERVAL_SECS};
use crate::watch::target::{derive_target_id, parse_target_url, sanitize_key};

/// Known top-level config field names.
const KNOWN_TOP_LEVEL: &[&str] = &["watch", "download", "health", "logging", "shutdown"];

const KNOWN_WATCH: &[&str] = &[
    "interval_secs",
    "check_timeout_secs",
    "fetch_on_start",
    "max_probe_bytes",
    "targets",
];

const KNOWN_DOWNLOAD: &[&str] = &[
    "dir",
    "max_retries",
    "backoff_base_secs",
    "backoff_max_secs",
    "fetch_timeout_secs",
    "max_bytes",
];

const KNOWN_HEALTH: &[&str] = &["host", "port", "failure_threshold"];

const KNOWN_LOGGING: &[&str] = &["format", "level", "file"];

const KNOWN_SHUTDOWN: &[&str] = &["grace_secs"];

/// A validation diagnostic.
#[derive(Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

#[derive(Debug, PartialEq)]
pub enum DiagnosticLevel {
    Ok,
    Warn,
    Error,
}

impl Diagnostic {
    fn error(path: &str, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            path: path.to_string(),
            message: message.into(),
        }
    }

    fn warn(path: &str, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warn,
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Ok => "[OK]",
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        if self.path.is_empty() {
            write!(f, "{} {}", prefix, self.message)
        } else {
            write!(f, "{} {}: {}", prefix, self.path, self.message)
        }
    }
}

/// Simple Levenshtein distance for "did you mean?" suggestions.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Suggest the closest known field name (if distance <= 3).
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| format!("did you mean '{}'?", k))
}

fn check_keys(obj: &serde_json::Map<String, Value>, prefix: &str, known: &[&str]) -> Vec<Diagnostic> {
    let known_set: HashSet<&str> = known.iter().copied().collect();
    obj.keys()
        .filter(|key| !known_set.contains(key.as_str()))
        .map(|key| {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            let msg = match suggest_field(key, known) {
                Some(suggestion) => format!("Unknown field '{}', {}", key, suggestion),
                None => format!("Unknown field '{}'", key),
            };
            Diagnostic::error(&path, msg)
        })
        .collect()
}

/// Validate a raw JSON config value against known field names.
pub fn validate_config(raw: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let obj = match raw.as_object() {
        Some(o) => o,
        None => {
            diagnostics.push(Diagnostic::error("", "Config must be a JSON object"));
            return diagnostics;
        }
    };

    diagnostics.push(Diagnostic {
        level: DiagnosticLevel::Ok,
        path: String::new(),
        message: "Valid JSON".to_string(),
    });

    diagnostics.extend(check_keys(obj, "", KNOWN_TOP_LEVEL));

    let sections: [(&str, &[&str]); 5] = [
        ("watch", KNOWN_WATCH),
        ("download", KNOWN_DOWNLOAD),
        ("health", KNOWN_HEALTH),
        ("logging", KNOWN_LOGGING),
        ("shutdown", KNOWN_SHUTDOWN),
    ];
    for (section, known) in sections {
        if let Some(inner) = obj.get(section).and_then(Value::as_object) {
            diagnostics.extend(check_keys(inner, section, known));
        }
    }

    diagnostics
}

/// Check value constraints on a parsed config.
pub fn validate_semantics(config: &Config) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if config.watch.interval_secs == 0 {
        diagnostics.push(Diagnostic::error(
            "watch.interval_secs",
            "WATCH_INTERVAL_SECONDS must be greater than 0",
        ));
    }
    if config.watch.interval_secs > MAX_INTERVAL_SECS {
        diagnostics.push(Diagnostic::error(
            "watch.interval_secs",
            format!(
                "WATCH_INTERVAL_SECONDS must be at most {} (one week)",
                MAX_INTERVAL_SECS
            ),
        ));
    }
    if config.watch.check_timeout_secs == 0 {
        diagnostics.push(Diagnostic::error(
            "watch.check_timeout_secs",
            "check timeout must be greater than 0",
        ));
    }
    if config.download.fetch_timeout_secs == 0 {
        diagnostics.push(Diagnostic::error(
            "download.fetch_timeout_secs",
            "fetch timeout must be greater than 0",
        ));
    }
    if !config.download.backoff_base_secs.is_finite() || config.download.backoff_base_secs < 0.0 {
        diagnostics.push(Diagnostic::error(
            "download.backoff_base_secs",
            "RETRY_BACKOFF_BASE_SECONDS must be a non-negative number",
        ));
    }
    if !config.download.backoff_max_secs.is_finite()
        || config.download.backoff_max_secs < config.download.backoff_base_secs
    {
        diagnostics.push(Diagnostic::error(
            "download.backoff_max_secs",
            "backoff cap must be at least the backoff base",
        ));
    }
    if config.download.dir.trim().is_empty() {
        diagnostics.push(Diagnostic::error(
            "download.dir",
            "DOWNLOAD_PATH must not be empty",
        ));
    }
    if config.health.failure_threshold == 0 {
        diagnostics.push(Diagnostic::error(
            "health.failure_threshold",
            "FAILURE_THRESHOLD must be greater than 0",
        ));
    }

    if config.watch.targets.is_empty() {
        diagnostics.push(Diagnostic::error(
            "watch.targets",
            "no watch targets configured (set WATCH_TARGETS or watch.targets)",
        ));
    }

    let mut seen_ids = HashSet::new();
    for (i, target) in config.watch.targets.iter().enumerate() {
        let path = format!("watch.targets[{}]", i);
        let url = match parse_target_url(&target.url) {
            Ok(url) => url,
            Err(e) => {
                diagnostics.push(Diagnostic::error(&path, e));
                continue;
            }
        };
        if let Some(ref download_url) = target.download_url {
            if let Err(e) = parse_target_url(download_url) {
                diagnostics.push(Diagnostic::error(&format!("{}.download_url", path), e));
            }
        }
        // Compare the keys targets are actually stored under.
        let id = match target.id {
            Some(ref id) if !id.trim().is_empty() => sanitize_key(id),
            Some(_) => {
                diagnostics.push(Diagnostic::error(
                    &format!("{}.id", path),
                    "target id must not be empty",
                ));
                continue;
            }
            None => derive_target_id(&url),
        };
        if !seen_ids.insert(id.clone()) {
            diagnostics.push(Diagnostic::error(
                &path,
                format!("duplicate target id '{}'", id),
            ));
        }
    }

    if config.watch.check_timeout_secs > config.watch.interval_secs && config.watch.interval_secs > 0
    {
        diagnostics.push(Diagnostic::warn(
            "watch.check_timeout_secs",
            "check timeout exceeds the watch interval; slow checks will skip ticks",
        ));
    }

    diagnostics
}
