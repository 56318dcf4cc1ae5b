//! Test-only helpers: a throwaway git repository and scripted collaborators
//! for driving the pipeline without real agents.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use tempfile::TempDir;

use crate::core::types::{CommitOutcome, RetryOutcome};
use crate::io::agent::{Agent, AgentRequest};
use crate::io::checklist::{CompletionMarker, MarkerError};
use crate::io::git::Committer;

/// Default checklist file name used by tests.
pub const CHECKLIST: &str = "TASKS.md";

/// Git repository in a temp dir with one initial commit.
pub struct TestRepo {
    temp: TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp dir")?;
        let repo = Self { temp };
        repo.git(&["init", "-q"])?;
        repo.git(&["config", "user.email", "test@example.com"])?;
        repo.git(&["config", "user.name", "test"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        fs::write(repo.path().join("README.md"), "hi\n").context("write README.md")?;
        repo.git(&["add", "README.md"])?;
        repo.git(&["commit", "-q", "-m", "chore: init"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn checklist_path(&self) -> PathBuf {
        self.path().join(CHECKLIST)
    }

    pub fn write_checklist(&self, contents: &str) -> Result<PathBuf> {
        let path = self.checklist_path();
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn read_checklist(&self) -> Result<String> {
        let path = self.checklist_path();
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Write the checklist and commit it so the tree starts clean.
    pub fn commit_checklist(&self, contents: &str) -> Result<PathBuf> {
        let path = self.write_checklist(contents)?;
        self.git(&["add", CHECKLIST])?;
        self.git(&["commit", "-q", "-m", "chore: add checklist"])?;
        Ok(path)
    }

    pub fn commit_count(&self) -> Result<usize> {
        let out = self.git(&["rev-list", "--count", "HEAD"])?;
        out.trim()
            .parse()
            .with_context(|| format!("parse commit count {out:?}"))
    }

    pub fn last_commit_subject(&self) -> Result<String> {
        Ok(self.git(&["log", "-1", "--format=%s"])?.trim().to_string())
    }

    fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(self.path())
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            bail!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// One scripted agent call: the outcome to report and an optional file the
/// "agent" writes (relative to the request workdir) before reporting it.
pub struct ScriptedRun {
    pub outcome: RetryOutcome,
    pub write: Option<(String, String)>,
}

impl ScriptedRun {
    pub fn writing(outcome: RetryOutcome, path: &str, contents: &str) -> Self {
        Self {
            outcome,
            write: Some((path.to_string(), contents.to_string())),
        }
    }
}

impl From<RetryOutcome> for ScriptedRun {
    fn from(outcome: RetryOutcome) -> Self {
        Self {
            outcome,
            write: None,
        }
    }
}

/// [`Agent`] that replays queued outcomes and records every request prompt.
pub struct ScriptedAgent {
    queue: Mutex<VecDeque<ScriptedRun>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(outcomes: Vec<RetryOutcome>) -> Self {
        Self::with_runs(outcomes.into_iter().map(ScriptedRun::from).collect())
    }

    pub fn with_runs(runs: Vec<ScriptedRun>) -> Self {
        Self {
            queue: Mutex::new(runs.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far, in call order.
    pub fn requests(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn assert_drained(&self) -> Result<()> {
        let queue = self
            .queue
            .lock()
            .map_err(|_| anyhow!("scripted agent lock poisoned"))?;
        if !queue.is_empty() {
            bail!("scripted agent has {} unused runs", queue.len());
        }
        Ok(())
    }
}

impl Agent for ScriptedAgent {
    fn execute(&self, request: &AgentRequest) -> RetryOutcome {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }
        let next = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        let Some(run) = next else {
            return RetryOutcome::failure("", anyhow!("scripted agent exhausted"));
        };
        if let Some((rel, contents)) = &run.write {
            let path = request.workdir.join(rel);
            if let Err(err) = fs::write(&path, contents) {
                return RetryOutcome::failure(
                    "",
                    anyhow!("scripted write {} failed: {err}", path.display()),
                );
            }
        }
        run.outcome
    }
}

/// [`CompletionMarker`] that records positions, optionally rejecting them all.
#[derive(Default)]
pub struct RecordingMarker {
    positions: Mutex<Vec<usize>>,
    reject: Option<MarkerError>,
}

impl RecordingMarker {
    pub fn rejecting(err: MarkerError) -> Self {
        Self {
            positions: Mutex::new(Vec::new()),
            reject: Some(err),
        }
    }

    pub fn positions(&self) -> Vec<usize> {
        self.positions.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl CompletionMarker for RecordingMarker {
    fn mark_complete(&self, _path: &Path, position: usize) -> Result<()> {
        if let Some(err) = &self.reject {
            return Err(anyhow::Error::new(err.clone()));
        }
        self.positions
            .lock()
            .map_err(|_| anyhow!("recording marker lock poisoned"))?
            .push(position);
        Ok(())
    }
}

/// [`Committer`] that records summaries and pretends to commit.
#[derive(Default)]
pub struct RecordingCommitter {
    summaries: Mutex<Vec<String>>,
    nothing_to_commit: bool,
}

impl RecordingCommitter {
    pub fn with_nothing_to_commit() -> Self {
        Self {
            summaries: Mutex::new(Vec::new()),
            nothing_to_commit: true,
        }
    }

    pub fn summaries(&self) -> Vec<String> {
        self.summaries.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Committer for RecordingCommitter {
    fn auto_commit(&self, _repo: &Path, summary: &str) -> Result<CommitOutcome> {
        let mut summaries = self
            .summaries
            .lock()
            .map_err(|_| anyhow!("recording committer lock poisoned"))?;
        summaries.push(summary.to_string());
        if self.nothing_to_commit {
            return Ok(CommitOutcome::nothing_to_commit());
        }
        Ok(CommitOutcome {
            committed: true,
            revision_id: format!("{:040x}", summaries.len()),
            message: summary.to_string(),
        })
    }
}

/// [`Committer`] that always fails.
pub struct FailingCommitter;

impl Committer for FailingCommitter {
    fn auto_commit(&self, _repo: &Path, _summary: &str) -> Result<CommitOutcome> {
        bail!("git commit failed: simulated")
    }
}
