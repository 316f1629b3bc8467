//! Backoff policy for the notification wait loop.

use rand::Rng;
use std::time::Duration;

/// Exponential backoff with jitter and a consecutive-failure ceiling.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub initial_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Consecutive failures after which the caller should give up.
    pub max_consecutive_failures: u32,
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, max_delay: Duration, max_consecutive_failures: u32) -> Self {
        Self {
            initial_delay,
            max_delay,
            max_consecutive_failures,
        }
    }

    /// Un-jittered delay for the `failures`-th consecutive failure (1-based).
    pub fn base_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let delay = self.initial_delay.saturating_mul(1u32 << exponent);
        std::cmp::min(delay, self.max_delay)
    }

    /// Delay to wait before retrying, jittered into `[base / 2, base]`.
    pub fn delay(&self, failures: u32) -> Duration {
        let base = self.base_delay(failures);
        let half = base / 2;
        let spread = base.saturating_sub(half).as_millis() as u64;
        if spread == 0 {
            return base;
        }
        half + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }

    /// Whether `failures` consecutive failures exhaust the policy.
    pub fn exhausted(&self, failures: u32) -> bool {
        failures >= self.max_consecutive_failures
    }
}
