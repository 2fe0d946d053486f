//! Retry policy with exponential backoff.
//!
//! The policy is pure: given how many attempts a job has made and how the last
//! one failed, it decides whether to retry and when. Sleeping is left to the
//! caller's [`Clock`](crate::clock::Clock), so the whole retry path runs
//! without real delays under test.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::config::DownloadConfig;
use crate::error::DownloadError;

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait `delay`, then try again at `at`.
    RetryAt {
        delay: Duration,
        at: DateTime<Utc>,
    },
    /// Permanent error, or retries exhausted.
    GiveUp,
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Default: 3.
    max_retries: u32,
    /// Base delay in milliseconds. Default: 1000.
    base_delay_ms: u64,
    /// Delay cap in milliseconds. Default: 60000.
    max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &DownloadConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay_ms: secs_to_ms(cfg.backoff_base_secs),
            max_delay_ms: secs_to_ms(cfg.backoff_max_secs),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// The delay before retry `n` (0-indexed) is `min(base * 2^n, max)`.
    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    pub fn with_max_delay_ms(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    /// Delay before the retry that follows attempt number `attempt_count` (1-based).
    pub fn delay_after(&self, attempt_count: u32) -> Duration {
        let retry = attempt_count.saturating_sub(1);
        Duration::from_millis(compute_delay(
            retry,
            self.base_delay_ms,
            self.max_delay_ms,
            0,
        ))
    }

    /// Decide what follows a failed attempt.
    ///
    /// `attempt_count` is the number of attempts made so far, including the
    /// one that just failed.
    pub fn decide(
        &self,
        attempt_count: u32,
        err: &DownloadError,
        now: DateTime<Utc>,
    ) -> RetryDecision {
        if !err.is_retryable() || attempt_count > self.max_retries {
            return RetryDecision::GiveUp;
        }
        let delay = self.delay_after(attempt_count);
        let at = now + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
        RetryDecision::RetryAt { delay, at }
    }
}

fn secs_to_ms(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        (secs * 1000.0).round() as u64
    } else {
        0
    }
}

/// Compute the backoff delay for a given retry (without sleeping).
///
/// Delay formula: `min(base_delay_ms * 2^attempt + jitter_ms, max_delay_ms)`.
pub fn compute_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64, jitter_ms: u64) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(16));
    exponential.saturating_add(jitter_ms).min(max_delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_delay_exponential() {
        assert_eq!(compute_delay(0, 1000, 60_000, 0), 1000);
        assert_eq!(compute_delay(1, 1000, 60_000, 0), 2000);
        assert_eq!(compute_delay(2, 1000, 60_000, 0), 4000);
        assert_eq!(compute_delay(3, 1000, 60_000, 0), 8000);
    }

    #[test]
    fn test_compute_delay_capped() {
        assert_eq!(compute_delay(10, 1000, 60_000, 0), 60_000);
        assert_eq!(compute_delay(40, 1000, 60_000, 0), 60_000);
        assert_eq!(compute_delay(0, 1000, 500, 0), 500);
    }

    #[test]
    fn test_compute_delay_with_jitter() {
        assert_eq!(compute_delay(1, 1000, 60_000, 250), 2250);
    }

    #[test]
    fn test_from_config() {
        let cfg = DownloadConfig {
            max_retries: 5,
            backoff_base_secs: 0.5,
            backoff_max_secs: 10.0,
            ..Default::default()
        };
        let policy = RetryPolicy::from_config(&cfg);
        assert_eq!(
            policy,
            RetryPolicy::new()
                .with_max_retries(5)
                .with_base_delay_ms(500)
                .with_max_delay_ms(10_000)
        );
    }

    #[test]
    fn test_decide_transient_until_exhausted() {
        let policy = RetryPolicy::new();
        let now = Utc::now();
        let err = DownloadError::Transient("reset".into());

        for (attempt, expected) in [(1, 1000), (2, 2000), (3, 4000)] {
            match policy.decide(attempt, &err, now) {
                RetryDecision::RetryAt { delay, at } => {
                    assert_eq!(delay, Duration::from_millis(expected));
                    assert_eq!(at - now, chrono::Duration::milliseconds(expected as i64));
                }
                RetryDecision::GiveUp => panic!("attempt {} should retry", attempt),
            }
        }
        assert_eq!(policy.decide(4, &err, now), RetryDecision::GiveUp);
    }

    #[test]
    fn test_decide_permanent_gives_up() {
        let policy = RetryPolicy::new();
        let err = DownloadError::Permanent("HTTP 404".into());
        assert_eq!(policy.decide(1, &err, Utc::now()), RetryDecision::GiveUp);
    }

    #[test]
    fn test_zero_retries() {
        let policy = RetryPolicy::new().with_max_retries(0);
        let err = DownloadError::Transient("reset".into());
        assert_eq!(policy.decide(1, &err, Utc::now()), RetryDecision::GiveUp);
    }
}
