//! Deterministic classification of agent failures.
//!
//! Agent failures come from heterogeneous external processes, so they are
//! classified by case-insensitive substring match against two ordered pattern
//! sets. Permanent patterns are checked first and win over transient ones.

use std::sync::LazyLock;

use regex::{RegexSet, RegexSetBuilder};

/// Retry classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient; the operation may succeed if retried.
    Retryable,
    /// Permanent or unknown; retrying will not help.
    NonRetryable,
}

const NON_RETRYABLE_PATTERNS: &[&str] = &[
    "syntax error",
    "invalid",
    "not found",
    "unauthorized",
    "forbidden",
    "authentication",
    "permission denied",
    "bad request",
    "400",
    "401",
    "403",
    "404",
];

const RETRYABLE_PATTERNS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "timeout",
    "timed out",
    "deadline exceeded",
    "network",
    "connection refused",
    "connection reset",
    "temporary failure",
    "service unavailable",
    "overloaded",
    "too many requests",
    "429",
    "502",
    "503",
];

fn pattern_set(patterns: &[&str]) -> RegexSet {
    RegexSetBuilder::new(patterns.iter().map(|p| regex::escape(p)))
        .case_insensitive(true)
        .build()
        .expect("escaped literal patterns always compile")
}

static NON_RETRYABLE: LazyLock<RegexSet> = LazyLock::new(|| pattern_set(NON_RETRYABLE_PATTERNS));
static RETRYABLE: LazyLock<RegexSet> = LazyLock::new(|| pattern_set(RETRYABLE_PATTERNS));

/// Classify a failure message.
///
/// Messages matching neither set are non-retryable.
pub fn classify_message(message: &str) -> FailureClass {
    if NON_RETRYABLE.is_match(message) {
        return FailureClass::NonRetryable;
    }
    if RETRYABLE.is_match(message) {
        return FailureClass::Retryable;
    }
    FailureClass::NonRetryable
}

/// Whether a failure should be retried. An absent failure never is.
///
/// The full context chain is searched, so a transient cause wrapped in a
/// generic context is still recognised.
pub fn is_retryable(failure: Option<&anyhow::Error>) -> bool {
    match failure {
        Some(err) => classify_message(&format!("{err:#}")) == FailureClass::Retryable,
        None => false,
    }
}
