//! Retry policy values and exponential backoff with additive jitter.

use std::time::Duration;

use rand::Rng;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_JITTER_PERCENT: u32 = 25;

/// Bounded retry schedule.
///
/// `max_attempts` counts retries beyond the first attempt, so a persistently
/// transient failure is attempted `max_attempts + 1` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter_percent: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_jitter_percent: DEFAULT_MAX_JITTER_PERCENT,
        }
    }
}

impl RetryPolicy {
    /// Build a policy, replacing zero or out-of-range values with defaults.
    pub fn new(max_attempts: u32, base_delay: Duration, max_jitter_percent: u32) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_jitter_percent,
        }
        .normalized()
    }

    /// Replace illegal values with defaults. Never fails.
    pub fn normalized(self) -> Self {
        Self {
            max_attempts: if self.max_attempts == 0 {
                DEFAULT_MAX_ATTEMPTS
            } else {
                self.max_attempts
            },
            base_delay: if self.base_delay.is_zero() {
                DEFAULT_BASE_DELAY
            } else {
                self.base_delay
            },
            max_jitter_percent: if self.max_jitter_percent > 100 {
                DEFAULT_MAX_JITTER_PERCENT
            } else {
                self.max_jitter_percent
            },
        }
    }
}

/// `base_delay * 2^attempt`, saturating instead of overflowing.
pub fn exponential_delay(base_delay: Duration, attempt: u32) -> Duration {
    base_delay.saturating_mul(2u32.saturating_pow(attempt))
}

/// Backoff delay for `attempt` (0-based) using the thread-local RNG.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    backoff_delay_with(policy, attempt, &mut rand::thread_rng())
}

/// Backoff delay for `attempt` using the given RNG.
///
/// Jitter is uniform in `[0, delay * max_jitter_percent / 100]` and only ever
/// added, so the result is never below the exponential delay.
pub fn backoff_delay_with<R: Rng>(policy: &RetryPolicy, attempt: u32, rng: &mut R) -> Duration {
    let delay = exponential_delay(policy.base_delay, attempt);
    let percent = policy.max_jitter_percent.min(100);
    if percent == 0 {
        return delay;
    }
    let max_jitter = (delay / 100).saturating_mul(percent);
    if max_jitter.is_zero() {
        return delay;
    }
    let jitter = rng.gen_range(Duration::ZERO..=max_jitter);
    delay.saturating_add(jitter)
}

/// Whole seconds for progress reporting: rounded up, at least 1.
pub fn notice_secs(delay: Duration) -> u64 {
    let secs = delay.as_secs() + u64::from(delay.subsec_nanos() > 0);
    secs.max(1)
}
