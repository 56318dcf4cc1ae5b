//! Serializable summaries of CLI commands and their exit-code mapping.

use serde::Serialize;

use crate::core::types::{ChecklistStats, CommitOutcome, RunResult, Task};
use crate::exit_codes;
use crate::pipeline::PipelineEvent;
use crate::retry::is_cancelled;

/// A task the run completed, with its commit (if any).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletedTask {
    pub position: usize,
    pub commit: CommitOutcome,
}

/// `run --json` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub succeeded: bool,
    pub cancelled: bool,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub completed: Vec<CompletedTask>,
    /// Terminal failure with its full context chain.
    pub failure: Option<String>,
}

impl RunReport {
    pub fn new(result: &RunResult, completed: Vec<CompletedTask>) -> Self {
        Self {
            succeeded: result.succeeded,
            cancelled: result.failure.as_ref().is_some_and(is_cancelled),
            total_tasks: result.total_tasks,
            completed_tasks: result.completed_tasks,
            completed,
            failure: result.failure.as_ref().map(|err| format!("{err:#}")),
        }
    }
}

/// Collects [`CompletedTask`]s from pipeline events.
#[derive(Debug, Default)]
pub struct CompletionLog {
    tasks: Vec<CompletedTask>,
}

impl CompletionLog {
    pub fn record(&mut self, event: &PipelineEvent) {
        if let PipelineEvent::TaskCompleted {
            position, commit, ..
        } = event
        {
            self.tasks.push(CompletedTask {
                position: *position,
                commit: commit.clone(),
            });
        }
    }

    pub fn into_tasks(self) -> Vec<CompletedTask> {
        self.tasks
    }
}

/// `status --json` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub pending: usize,
    pub completed: usize,
    pub next: Option<Task>,
}

impl StatusReport {
    pub fn new(stats: ChecklistStats, next: Option<Task>) -> Self {
        Self {
            pending: stats.pending,
            completed: stats.completed,
            next,
        }
    }
}

/// Map a run result to the process exit code.
///
/// A failure before any task was loaded is an invalid invocation (missing or
/// unreadable checklist), not a halted run.
pub fn exit_code(result: &RunResult) -> i32 {
    match &result.failure {
        None if result.succeeded => exit_codes::OK,
        Some(err) if is_cancelled(err) => exit_codes::CANCELLED,
        _ if result.total_tasks == 0 => exit_codes::INVALID,
        _ => exit_codes::HALTED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Cancelled;
    use anyhow::anyhow;

    #[test]
    fn exit_codes_follow_result() {
        assert_eq!(exit_code(&RunResult::completed(0)), exit_codes::OK);
        assert_eq!(exit_code(&RunResult::completed(3)), exit_codes::OK);
        assert_eq!(
            exit_code(&RunResult::halted(3, 1, anyhow!("boom"))),
            exit_codes::HALTED
        );
        assert_eq!(
            exit_code(&RunResult::halted(0, 0, anyhow!("open checklist"))),
            exit_codes::INVALID
        );
    }

    #[test]
    fn cancellation_is_detected_through_context() {
        let err = anyhow::Error::new(Cancelled::DuringBackoff { after_attempt: 2 })
            .context("agent failed on task at line 4");
        let result = RunResult::halted(5, 2, err);

        assert_eq!(exit_code(&result), exit_codes::CANCELLED);
        let report = RunReport::new(&result, Vec::new());
        assert!(report.cancelled);
        assert_eq!(
            report.failure.as_deref(),
            Some("agent failed on task at line 4: cancelled while waiting to retry after attempt 2")
        );
    }

    #[test]
    fn report_serializes_completed_commits() {
        let mut log = CompletionLog::default();
        log.record(&PipelineEvent::TasksLoaded { total: 1 });
        log.record(&PipelineEvent::TaskCompleted {
            index: 0,
            position: 3,
            commit: CommitOutcome {
                committed: true,
                revision_id: "abc123".to_string(),
                message: "chore(task): one".to_string(),
            },
        });
        let report = RunReport::new(&RunResult::completed(1), log.into_tasks());

        let json = serde_json::to_value(&report).expect("json");
        assert_eq!(json["succeeded"], true);
        assert_eq!(json["completed"][0]["position"], 3);
        assert_eq!(json["completed"][0]["commit"]["revision_id"], "abc123");
        assert!(json["failure"].is_null());
    }
}
