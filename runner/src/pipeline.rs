//! End-to-end checklist pipeline.
//!
//! Tasks are loaded once, then processed strictly in order: run the agent under
//! the retry policy, mark the task complete in the checklist, commit. Task N+1
//! never starts before task N is committed (or found to have no changes),
//! because every agent works on the same working tree.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::core::backoff::RetryPolicy;
use crate::core::summary::commit_subject;
use crate::core::types::{CommitOutcome, RetryOutcome, RunResult, Task};
use crate::io::agent::{Agent, AgentRequest};
use crate::io::checklist::{ChecklistMarker, CompletionMarker, load_tasks};
use crate::io::config::CommitConfig;
use crate::io::git::{Committer, GitCommitter};
use crate::io::prompt::PromptBuilder;
use crate::retry::{Cancelled, RetryNotice, execute_with_retry};

/// Configuration for one pipeline pass.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub checklist_path: PathBuf,
    pub repo_path: PathBuf,
    pub retry: RetryPolicy,
    pub commit: CommitConfig,
}

impl PipelineConfig {
    pub fn new(checklist_path: impl Into<PathBuf>, repo_path: impl Into<PathBuf>) -> Self {
        Self {
            checklist_path: checklist_path.into(),
            repo_path: repo_path.into(),
            retry: RetryPolicy::default(),
            commit: CommitConfig::default(),
        }
    }
}

/// Progress reported while the pipeline runs. Purely informational.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    TasksLoaded {
        total: usize,
    },
    TaskStarted {
        /// 0-based index into this run's task list.
        index: usize,
        total: usize,
        task: Task,
    },
    RetryScheduled {
        position: usize,
        notice: RetryNotice,
    },
    TaskCompleted {
        index: usize,
        position: usize,
        commit: CommitOutcome,
    },
}

/// Drives agents through the pending tasks of one checklist.
pub struct Pipeline<A, M, C> {
    config: PipelineConfig,
    agent: A,
    marker: M,
    committer: C,
}

impl<A: Agent> Pipeline<A, ChecklistMarker, GitCommitter> {
    /// Pipeline that marks the checklist file in place and commits with git.
    pub fn with_defaults(config: PipelineConfig, agent: A) -> Self {
        Self::new(config, agent, ChecklistMarker, GitCommitter)
    }
}

impl<A: Agent, M: CompletionMarker, C: Committer> Pipeline<A, M, C> {
    pub fn new(config: PipelineConfig, agent: A, marker: M, committer: C) -> Self {
        Self {
            config,
            agent,
            marker,
            committer,
        }
    }

    /// Process every pending task, stopping at the first failure.
    ///
    /// Always returns a complete [`RunResult`]; `completed_tasks` tells the
    /// caller how much progress was committed before a halt.
    #[instrument(skip_all, fields(checklist = %self.config.checklist_path.display()))]
    pub async fn run<F: FnMut(&PipelineEvent)>(
        &self,
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> RunResult {
        let tasks = match load_tasks(&self.config.checklist_path) {
            Ok(tasks) => tasks,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "could not load checklist");
                return RunResult::halted(0, 0, err);
            }
        };
        let total = tasks.len();
        on_event(&PipelineEvent::TasksLoaded { total });
        if total == 0 {
            info!("no pending tasks");
            return RunResult::completed(0);
        }

        let prompts = match PromptBuilder::new() {
            Ok(builder) => builder,
            Err(err) => return RunResult::halted(total, 0, err),
        };

        for (index, task) in tasks.into_iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(position = task.position, "cancelled between tasks");
                let err = anyhow::Error::new(Cancelled::BeforeTask {
                    position: task.position,
                });
                return RunResult::halted(total, index, err);
            }
            info!(index, total, position = task.position, "starting task");
            on_event(&PipelineEvent::TaskStarted {
                index,
                total,
                task: task.clone(),
            });

            match self.run_task(cancel, &prompts, &task, &mut on_event).await {
                Ok(commit) => {
                    info!(
                        position = task.position,
                        committed = commit.committed,
                        revision = %commit.revision_id,
                        "task completed"
                    );
                    on_event(&PipelineEvent::TaskCompleted {
                        index,
                        position: task.position,
                        commit,
                    });
                }
                Err(err) => {
                    warn!(
                        position = task.position,
                        err = %format!("{err:#}"),
                        "halting run"
                    );
                    return RunResult::halted(total, index, err);
                }
            }
        }

        RunResult::completed(total)
    }

    /// Agent (with retries), then mark, then commit. Any error halts the run.
    async fn run_task<F: FnMut(&PipelineEvent)>(
        &self,
        cancel: &CancellationToken,
        prompts: &PromptBuilder,
        task: &Task,
        on_event: &mut F,
    ) -> anyhow::Result<CommitOutcome> {
        let request = AgentRequest {
            workdir: self.config.repo_path.clone(),
            prompt: prompts.render_task(task, &self.config.checklist_path)?,
        };

        let outcome: RetryOutcome = execute_with_retry(
            cancel,
            &self.config.retry,
            || self.agent.execute(&request),
            |notice| {
                on_event(&PipelineEvent::RetryScheduled {
                    position: task.position,
                    notice: *notice,
                });
            },
        )
        .await;
        outcome
            .into_result()
            .with_context(|| format!("agent failed on task at line {}", task.position))?;

        self.marker
            .mark_complete(&self.config.checklist_path, task.position)
            .with_context(|| format!("mark task at line {} complete", task.position))?;

        let subject = commit_subject(
            &self.config.commit.prefix,
            task,
            self.config.commit.summary_max_chars,
        );
        self.committer
            .auto_commit(&self.config.repo_path, &subject)
            .with_context(|| format!("commit task at line {}", task.position))
    }
}

/// Run the default pipeline (file marker + git committer) over `checklist_path`.
pub async fn run_checklist<A: Agent>(
    checklist_path: &Path,
    repo_path: &Path,
    max_attempts: u32,
    agent: A,
    cancel: &CancellationToken,
) -> RunResult {
    let mut config = PipelineConfig::new(checklist_path, repo_path);
    config.retry.max_attempts = max_attempts;
    config.retry = config.retry.normalized();
    Pipeline::with_defaults(config, agent)
        .run(cancel, |_| {})
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::checklist::MarkerError;
    use crate::retry::is_cancelled;
    use crate::test_support::{
        FailingCommitter, RecordingCommitter, RecordingMarker, ScriptedAgent,
    };
    use anyhow::anyhow;
    use std::fs;
    use std::time::Duration;

    fn config_for(path: &Path) -> PipelineConfig {
        let mut config = PipelineConfig::new(path, path.parent().expect("parent"));
        config.retry = RetryPolicy::new(2, Duration::from_secs(1), 0);
        config
    }

    fn checklist(contents: &str) -> (tempfile::TempDir, PathBuf) {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("TASKS.md");
        fs::write(&path, contents).expect("write checklist");
        (temp, path)
    }

    #[tokio::test(start_paused = true)]
    async fn missing_checklist_fails_with_zero_totals() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("missing.md");
        let agent = ScriptedAgent::new(Vec::new());
        let pipeline = Pipeline::new(
            config_for(&path),
            &agent,
            RecordingMarker::default(),
            RecordingCommitter::default(),
        );

        let result = pipeline.run(&CancellationToken::new(), |_| {}).await;

        assert!(!result.succeeded);
        assert_eq!((result.total_tasks, result.completed_tasks), (0, 0));
        assert!(format!("{:#}", result.failure.expect("failure")).contains("open checklist"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_checklist_succeeds_without_calling_agent() {
        let (_temp, path) = checklist("# Nothing to do\n- [x] already done\n");
        let agent = ScriptedAgent::new(Vec::new());
        let pipeline = Pipeline::new(
            config_for(&path),
            &agent,
            RecordingMarker::default(),
            RecordingCommitter::default(),
        );

        let result = pipeline.run(&CancellationToken::new(), |_| {}).await;

        assert!(result.succeeded);
        assert_eq!((result.total_tasks, result.completed_tasks), (0, 0));
        assert!(agent.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn processes_tasks_in_order_mark_then_commit() {
        let (_temp, path) = checklist("- [ ] one\n- [ ] two\n  details\n- [ ] three\n");
        let agent = ScriptedAgent::new(vec![
            RetryOutcome::success("1"),
            RetryOutcome::success("2"),
            RetryOutcome::success("3"),
        ]);
        let marker = RecordingMarker::default();
        let committer = RecordingCommitter::default();
        let pipeline = Pipeline::new(config_for(&path), &agent, &marker, &committer);
        let mut events = Vec::new();

        let result = pipeline
            .run(&CancellationToken::new(), |e| events.push(e.clone()))
            .await;

        assert!(result.succeeded, "{:?}", result.failure);
        assert_eq!((result.total_tasks, result.completed_tasks), (3, 3));
        assert_eq!(marker.positions(), vec![1, 2, 4]);
        assert_eq!(
            committer.summaries(),
            vec!["chore(task): one", "chore(task): two", "chore(task): three"]
        );
        let requests = agent.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[1].contains("two\ndetails"));
        assert!(matches!(events[0], PipelineEvent::TasksLoaded { total: 3 }));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, PipelineEvent::TaskCompleted { .. }))
                .count(),
            3
        );
        agent.assert_drained().expect("drained");
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_failure_halts_before_marking() {
        let (_temp, path) = checklist("- [ ] one\n- [ ] two\n");
        let agent = ScriptedAgent::new(vec![RetryOutcome::failure(
            "",
            anyhow!("invalid task description"),
        )]);
        let marker = RecordingMarker::default();
        let committer = RecordingCommitter::default();
        let pipeline = Pipeline::new(config_for(&path), &agent, &marker, &committer);

        let result = pipeline.run(&CancellationToken::new(), |_| {}).await;

        assert!(!result.succeeded);
        assert_eq!((result.total_tasks, result.completed_tasks), (2, 0));
        assert_eq!(agent.requests().len(), 1);
        assert!(marker.positions().is_empty());
        assert!(committer.summaries().is_empty());
        let msg = format!("{:#}", result.failure.expect("failure"));
        assert!(msg.contains("agent failed on task at line 1"), "{msg}");
        assert!(msg.contains("invalid task description"), "{msg}");
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_and_reported() {
        let (_temp, path) = checklist("- [ ] flaky\n");
        let agent = ScriptedAgent::new(vec![
            RetryOutcome::failure("", anyhow!("503 service unavailable")),
            RetryOutcome::success("ok"),
        ]);
        let marker = RecordingMarker::default();
        let committer = RecordingCommitter::default();
        let pipeline = Pipeline::new(config_for(&path), &agent, &marker, &committer);
        let mut retries = Vec::new();

        let result = pipeline
            .run(&CancellationToken::new(), |e| {
                if let PipelineEvent::RetryScheduled { position, notice } = e {
                    retries.push((*position, notice.attempt));
                }
            })
            .await;

        assert!(result.succeeded);
        assert_eq!(retries, vec![(1, 1)]);
        assert_eq!(marker.positions(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_halt_with_last_failure() {
        let (_temp, path) = checklist("- [ ] one\n");
        let agent = ScriptedAgent::new(vec![
            RetryOutcome::failure("", anyhow!("rate limit 1")),
            RetryOutcome::failure("", anyhow!("rate limit 2")),
            RetryOutcome::failure("", anyhow!("rate limit 3")),
        ]);
        let pipeline = Pipeline::new(
            config_for(&path),
            &agent,
            RecordingMarker::default(),
            RecordingCommitter::default(),
        );

        let result = pipeline.run(&CancellationToken::new(), |_| {}).await;

        assert!(!result.succeeded);
        assert_eq!(result.completed_tasks, 0);
        assert!(format!("{:#}", result.failure.expect("failure")).contains("rate limit 3"));
        agent.assert_drained().expect("drained");
    }

    #[tokio::test(start_paused = true)]
    async fn marker_rejection_is_fatal() {
        let (_temp, path) = checklist("- [ ] one\n- [ ] two\n");
        let agent = ScriptedAgent::new(vec![RetryOutcome::success("ok")]);
        let marker = RecordingMarker::rejecting(MarkerError::NotPending { position: 1 });
        let committer = RecordingCommitter::default();
        let pipeline = Pipeline::new(config_for(&path), &agent, &marker, &committer);

        let result = pipeline.run(&CancellationToken::new(), |_| {}).await;

        assert!(!result.succeeded);
        assert_eq!((result.total_tasks, result.completed_tasks), (2, 0));
        assert!(committer.summaries().is_empty());
        let failure = result.failure.expect("failure");
        assert!(failure.chain().any(|c| c.is::<MarkerError>()));
    }

    #[tokio::test(start_paused = true)]
    async fn commit_failure_is_fatal_after_marking() {
        let (_temp, path) = checklist("- [ ] one\n- [ ] two\n");
        let agent = ScriptedAgent::new(vec![RetryOutcome::success("ok")]);
        let marker = RecordingMarker::default();
        let pipeline = Pipeline::new(config_for(&path), &agent, &marker, FailingCommitter);

        let result = pipeline.run(&CancellationToken::new(), |_| {}).await;

        assert!(!result.succeeded);
        assert_eq!(result.completed_tasks, 0);
        assert_eq!(marker.positions(), vec![1]);
        assert_eq!(agent.requests().len(), 1);
        assert!(format!("{:#}", result.failure.expect("failure")).contains("commit task at line 1"));
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_to_commit_does_not_block_progress() {
        let (_temp, path) = checklist("- [ ] one\n- [ ] two\n");
        let agent = ScriptedAgent::new(vec![RetryOutcome::success("a"), RetryOutcome::success("b")]);
        let committer = RecordingCommitter::with_nothing_to_commit();
        let pipeline = Pipeline::new(
            config_for(&path),
            &agent,
            RecordingMarker::default(),
            &committer,
        );
        let mut commits = Vec::new();

        let result = pipeline
            .run(&CancellationToken::new(), |e| {
                if let PipelineEvent::TaskCompleted { commit, .. } = e {
                    commits.push(commit.committed);
                }
            })
            .await;

        assert!(result.succeeded);
        assert_eq!(commits, vec![false, false]);
        assert_eq!(committer.summaries().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_a_task_stops_before_the_next_one() {
        let (_temp, path) = checklist("- [ ] one\n- [ ] two\n");
        let agent = ScriptedAgent::new(vec![RetryOutcome::success("ok")]);
        let marker = RecordingMarker::default();
        let committer = RecordingCommitter::default();
        let pipeline = Pipeline::new(config_for(&path), &agent, &marker, &committer);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let result = pipeline
            .run(&cancel, |e| {
                if matches!(e, PipelineEvent::TaskStarted { index: 0, .. }) {
                    trigger.cancel();
                }
            })
            .await;

        assert_eq!((result.total_tasks, result.completed_tasks), (2, 1));
        assert_eq!(committer.summaries(), vec!["chore(task): one"]);
        let failure = result.failure.expect("failure");
        assert_eq!(
            failure.downcast_ref::<Cancelled>(),
            Some(&Cancelled::BeforeTask { position: 2 })
        );
        agent.assert_drained().expect("drained");
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_halts_with_progress_kept() {
        let (_temp, path) = checklist("- [ ] one\n- [ ] two\n- [ ] three\n");
        let agent = ScriptedAgent::new(vec![
            RetryOutcome::success("ok"),
            RetryOutcome::failure("", anyhow!("network unreachable")),
        ]);
        let marker = RecordingMarker::default();
        let committer = RecordingCommitter::default();
        let mut config = config_for(&path);
        config.retry = RetryPolicy::new(3, Duration::from_secs(600), 0);
        let pipeline = Pipeline::new(config, &agent, &marker, &committer);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let result = pipeline
            .run(&cancel, |e| {
                if matches!(e, PipelineEvent::RetryScheduled { .. }) {
                    trigger.cancel();
                }
            })
            .await;

        assert!(!result.succeeded);
        assert_eq!((result.total_tasks, result.completed_tasks), (3, 1));
        assert!(is_cancelled(result.failure.as_ref().expect("failure")));
        assert_eq!(marker.positions(), vec![1]);
        assert_eq!(committer.summaries().len(), 1);
    }
}
