//! Bounded retry with exponential backoff, jitter and cancellation.
//!
//! The backoff wait is the only suspension point of a run: it races the
//! computed delay against the run's [`CancellationToken`]. Attempts themselves
//! are never interrupted here.

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::core::backoff::{RetryPolicy, backoff_delay, notice_secs};
use crate::core::classifier::is_retryable;
use crate::core::types::RetryOutcome;

/// Progress notice emitted before each backoff wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryNotice {
    /// 1-based number of the attempt that just failed.
    pub attempt: u32,
    /// Attempts still available after this one.
    pub remaining: u32,
    /// Upcoming wait, in whole seconds (rounded up, at least 1).
    pub delay_secs: u64,
}

/// The run was cancelled before it could continue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Cancelled {
    /// Cancelled during the backoff wait that follows `after_attempt` (1-based).
    #[error("cancelled while waiting to retry after attempt {after_attempt}")]
    DuringBackoff { after_attempt: u32 },
    /// Cancelled between tasks; the task at `position` was never started.
    #[error("cancelled before starting the task at line {position}")]
    BeforeTask { position: usize },
}

/// Returns true if `err` or any of its causes is a [`Cancelled`].
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Cancelled>())
}

/// Run `operation` under `policy`.
///
/// Stops at the first success, at the first non-retryable failure, after
/// `policy.max_attempts + 1` attempts, or when `cancel` fires during a wait.
/// `on_retry` is advisory and cannot influence the schedule.
#[instrument(skip_all, fields(max_attempts = policy.max_attempts))]
pub async fn execute_with_retry<F, N>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    mut operation: F,
    mut on_retry: N,
) -> RetryOutcome
where
    F: FnMut() -> RetryOutcome,
    N: FnMut(&RetryNotice),
{
    let policy = policy.normalized();
    let mut attempt = 0u32;
    loop {
        let outcome = operation();
        if outcome.succeeded {
            debug!(attempt = attempt + 1, "attempt succeeded");
            return outcome;
        }
        if !is_retryable(outcome.failure.as_ref()) {
            debug!(attempt = attempt + 1, "failure is not retryable");
            return outcome;
        }
        if attempt >= policy.max_attempts {
            warn!(attempts = attempt + 1, "retries exhausted");
            return outcome;
        }

        let delay = backoff_delay(&policy, attempt);
        let notice = RetryNotice {
            attempt: attempt + 1,
            remaining: policy.max_attempts - attempt,
            delay_secs: notice_secs(delay),
        };
        warn!(
            attempt = notice.attempt,
            remaining = notice.remaining,
            delay_ms = delay.as_millis() as u64,
            failure = %outcome.failure.as_ref().map(|e| format!("{e:#}")).unwrap_or_default(),
            "transient failure, backing off"
        );
        on_retry(&notice);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(attempt = notice.attempt, "cancelled during backoff");
                return RetryOutcome::failure(
                    outcome.output,
                    anyhow::Error::new(Cancelled::DuringBackoff {
                        after_attempt: notice.attempt,
                    }),
                );
            }
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
    }
}
