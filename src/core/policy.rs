//! Retry, backoff and interval policies.
//!
//! [`RetryPolicy`] governs per-item delivery retries inside a cycle.
//! [`BackoffPolicy`] governs how long a source waits after consecutive
//! fetch failures before its next cycle.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::FetchErrorKind;

/// Retry policy for retryable delivery failures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including first try)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay between retries in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier (delay *= multiplier after each retry)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_attempts() -> u32 {
    4
}
fn default_initial_delay() -> u64 {
    500
}
fn default_max_delay() -> u64 {
    8_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before the retry that follows `attempt` (1-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(grow(
            self.initial_delay_ms,
            self.backoff_multiplier,
            self.max_delay_ms,
            attempt,
        ))
    }

    /// Check if we should retry based on attempt count
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Backoff after consecutive fetch failures
///
/// The interval grows with each consecutive failure, is capped at
/// `max_secs`, and resets once a cycle succeeds. A permanent failure
/// (bad credentials, gone feed) jumps straight to the cap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(default = "default_backoff_initial")]
    pub initial_secs: u64,

    #[serde(default = "default_backoff_max")]
    pub max_secs: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
}

fn default_backoff_initial() -> u64 {
    30
}
fn default_backoff_max() -> u64 {
    1800
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_secs: default_backoff_initial(),
            max_secs: default_backoff_max(),
            multiplier: default_backoff_multiplier(),
        }
    }
}

impl BackoffPolicy {
    /// Wait after `failures` consecutive failures (1-indexed)
    pub fn delay_for_failures(&self, failures: u32, kind: FetchErrorKind) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let secs = match kind {
            FetchErrorKind::Permanent => self.max_secs,
            FetchErrorKind::Transient => {
                grow(self.initial_secs, self.multiplier, self.max_secs, failures)
            }
        };
        Duration::from_secs(secs)
    }

    /// Wait for the next failure in a streak, never shorter than `previous`
    ///
    /// A permanent error pins the streak at the cap; a transient error that
    /// follows it does not shrink the wait again.
    pub fn next_delay(
        &self,
        previous: Option<Duration>,
        failures: u32,
        kind: FetchErrorKind,
    ) -> Duration {
        let grown = self.delay_for_failures(failures, kind);
        let cap = Duration::from_secs(self.max_secs);
        previous.map_or(grown, |prev| prev.max(grown)).min(cap)
    }
}

/// `initial * multiplier^(n-1)`, capped
fn grow(initial: u64, multiplier: f64, cap: u64, n: u32) -> u64 {
    if n <= 1 {
        return initial.min(cap);
    }
    let exponent = (n - 1).min(63) as i32;
    let value = initial as f64 * multiplier.max(1.0).powi(exponent);
    value.min(cap as f64) as u64
}

/// Interval between continuous cycles, optionally jittered
#[derive(Debug, Clone, PartialEq)]
pub struct PollInterval {
    pub base: Duration,
    pub jitter: Duration,
}

impl PollInterval {
    pub fn fixed(base: Duration) -> Self {
        Self {
            base,
            jitter: Duration::ZERO,
        }
    }

    pub fn jittered(base: Duration, jitter: Duration) -> Self {
        Self { base, jitter }
    }

    /// Next wait: `base` plus a uniform random offset in `[0, jitter]`
    pub fn next_delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.base;
        }
        let extra = rand::thread_rng().gen_range(0..=self.jitter.as_millis() as u64);
        self.base + Duration::from_millis(extra)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_delays() {
        let policy = RetryPolicy {
            initial_delay_ms: 500,
            backoff_multiplier: 2.0,
            max_delay_ms: 3000,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(3000)); // Capped
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(!policy.should_retry(policy.max_attempts));
        assert!(!RetryPolicy::none().should_retry(1));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = BackoffPolicy {
            initial_secs: 30,
            max_secs: 100,
            multiplier: 2.0,
        };
        let t = FetchErrorKind::Transient;

        assert_eq!(policy.delay_for_failures(0, t), Duration::ZERO);
        assert_eq!(policy.delay_for_failures(1, t), Duration::from_secs(30));
        assert_eq!(policy.delay_for_failures(2, t), Duration::from_secs(60));
        assert_eq!(policy.delay_for_failures(3, t), Duration::from_secs(100));
        assert_eq!(policy.delay_for_failures(40, t), Duration::from_secs(100));
    }

    #[test]
    fn test_permanent_failure_jumps_to_cap() {
        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.delay_for_failures(1, FetchErrorKind::Permanent),
            Duration::from_secs(policy.max_secs)
        );
    }

    #[test]
    fn test_streak_never_shrinks_after_permanent() {
        let policy = BackoffPolicy {
            initial_secs: 30,
            max_secs: 1800,
            multiplier: 2.0,
        };

        let first = policy.next_delay(None, 1, FetchErrorKind::Permanent);
        let second = policy.next_delay(Some(first), 2, FetchErrorKind::Transient);
        let third = policy.next_delay(Some(second), 3, FetchErrorKind::Transient);

        assert_eq!(first, Duration::from_secs(1800));
        assert_eq!(second, Duration::from_secs(1800));
        assert_eq!(third, Duration::from_secs(1800));
        assert_eq!(
            policy.next_delay(None, 1, FetchErrorKind::Transient),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let interval = PollInterval::jittered(Duration::from_secs(60), Duration::from_secs(10));
        for _ in 0..50 {
            let d = interval.next_delay();
            assert!(d >= Duration::from_secs(60) && d <= Duration::from_secs(70));
        }
        let fixed = PollInterval::fixed(Duration::from_secs(5));
        assert_eq!(fixed.next_delay(), Duration::from_secs(5));
    }
}
