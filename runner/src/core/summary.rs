//! Commit summary derivation.

use crate::core::types::Task;

const ELLIPSIS: &str = "...";

/// Truncate `text` to at most `max_chars` code points.
///
/// Adds `...` only when truncation happens and the budget is larger than the
/// ellipsis; budgets of 3 or fewer are hard cuts. Counting is by `char`, so a
/// multi-byte character is never split.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars <= ELLIPSIS.len() {
        return text.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - ELLIPSIS.len()).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Commit subject for a completed task: `prefix` plus its truncated headline.
///
/// A task with no text is named by its line so the subject is never empty.
pub fn commit_subject(prefix: &str, task: &Task, max_chars: usize) -> String {
    let headline = match task.headline() {
        "" => format!("task at line {}", task.position),
        text => text.to_string(),
    };
    format!("{prefix}{}", truncate_chars(&headline, max_chars))
}
