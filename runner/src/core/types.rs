//! Shared deterministic types for runner core logic.
//!
//! These types define stable contracts between the extractor, the retry engine
//! and the pipeline. They hold no handles to external state.

use serde::Serialize;

/// One pending checklist entry.
///
/// `position` is the 1-based line number of the task's first line. It is fixed
/// at extraction time and used later to flip the same line to completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Task {
    pub description: String,
    pub position: usize,
}

impl Task {
    pub fn new(description: impl Into<String>, position: usize) -> Self {
        Self {
            description: description.into(),
            position,
        }
    }

    /// First non-blank line of the description, trimmed.
    pub fn headline(&self) -> &str {
        self.description
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("")
    }
}

/// Result of one attempt, or of a whole retry sequence (same shape).
#[derive(Debug)]
pub struct RetryOutcome {
    pub succeeded: bool,
    pub output: String,
    pub failure: Option<anyhow::Error>,
}

impl RetryOutcome {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            output: output.into(),
            failure: None,
        }
    }

    pub fn failure(output: impl Into<String>, failure: anyhow::Error) -> Self {
        Self {
            succeeded: false,
            output: output.into(),
            failure: Some(failure),
        }
    }

    /// Convert into a `Result`, synthesising an error when a failed outcome
    /// carries none.
    pub fn into_result(self) -> anyhow::Result<String> {
        if self.succeeded {
            return Ok(self.output);
        }
        Err(self
            .failure
            .unwrap_or_else(|| anyhow::anyhow!("operation failed without an error")))
    }
}

/// Aggregate outcome of one pipeline pass.
///
/// `completed_tasks <= total_tasks`, and `completed_tasks == total_tasks`
/// exactly when `succeeded` is true.
#[derive(Debug)]
pub struct RunResult {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub succeeded: bool,
    pub failure: Option<anyhow::Error>,
}

impl RunResult {
    pub fn completed(total_tasks: usize) -> Self {
        Self {
            total_tasks,
            completed_tasks: total_tasks,
            succeeded: true,
            failure: None,
        }
    }

    pub fn halted(total_tasks: usize, completed_tasks: usize, failure: anyhow::Error) -> Self {
        Self {
            total_tasks,
            completed_tasks,
            succeeded: false,
            failure: Some(failure),
        }
    }
}

/// Outcome of an auto-commit.
///
/// `committed == false` means there was nothing to commit; `revision_id` and
/// `message` are empty in that case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitOutcome {
    pub committed: bool,
    pub revision_id: String,
    pub message: String,
}

impl CommitOutcome {
    pub fn nothing_to_commit() -> Self {
        Self::default()
    }
}

/// Marker-line counts for a checklist document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChecklistStats {
    pub pending: usize,
    pub completed: usize,
}
