//! Watch events: a detected change that triggers a download.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why an event was emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerReason {
    /// First observation of the target; nothing committed yet.
    Initial,
    /// The fingerprint moved away from the committed one.
    Changed {
        /// Previously committed fingerprint.
        previous: String,
    },
}

impl std::fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerReason::Initial => write!(f, "initial"),
            TriggerReason::Changed { .. } => write!(f, "changed"),
        }
    }
}

/// Immutable record of a detected change.
///
/// Consumed exactly once by the download manager, which takes it by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    id: Uuid,
    target_id: String,
    source: String,
    fingerprint: String,
    detected_at: DateTime<Utc>,
    trigger_reason: TriggerReason,
}

impl WatchEvent {
    /// Create a new event with a fresh id.
    pub fn new(
        target_id: impl Into<String>,
        source: impl Into<String>,
        fingerprint: impl Into<String>,
        detected_at: DateTime<Utc>,
        trigger_reason: TriggerReason,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_id: target_id.into(),
            source: source.into(),
            fingerprint: fingerprint.into(),
            detected_at,
            trigger_reason,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Target that changed; also the artifact key.
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// URL to download.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Fingerprint observed when the change was detected.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn detected_at(&self) -> DateTime<Utc> {
        self.detected_at
    }

    pub fn trigger_reason(&self) -> &TriggerReason {
        &self.trigger_reason
    }
}
