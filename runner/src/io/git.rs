//! Git adapter and auto-commit.
//!
//! Every completed task is committed on its own, so we keep a small, explicit
//! wrapper around `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::types::CommitOutcome;

/// One line of `git status --porcelain=v1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// XY status code; `??` marks an untracked file.
    pub code: String,
    /// Repository-relative path (the new path for renames).
    pub path: String,
}

/// Creates a commit covering all working-tree changes.
pub trait Committer {
    /// Stage everything and commit with `summary` as the message.
    ///
    /// Returns `committed: false` when there is nothing to commit.
    fn auto_commit(&self, repo: &Path, summary: &str) -> Result<CommitOutcome>;
}

impl<T: Committer + ?Sized> Committer for &T {
    fn auto_commit(&self, repo: &Path, summary: &str) -> Result<CommitOutcome> {
        (**self).auto_commit(repo, summary)
    }
}

/// [`Committer`] backed by the `git` CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitCommitter;

impl Committer for GitCommitter {
    #[instrument(skip_all, fields(repo = %repo.display()))]
    fn auto_commit(&self, repo: &Path, summary: &str) -> Result<CommitOutcome> {
        let git = Git::new(repo);
        git.add_all()?;
        if !git.commit_staged(summary)? {
            return Ok(CommitOutcome::nothing_to_commit());
        }
        let revision_id = git.head_sha()?;
        debug!(revision = %revision_id, "committed");
        Ok(CommitOutcome {
            committed: true,
            revision_id,
            message: summary.to_string(),
        })
    }
}

/// `git` subprocess calls rooted at one repository directory.
#[derive(Debug, Clone)]
pub struct Git {
    repo: PathBuf,
}

impl Git {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    /// Full SHA of HEAD.
    pub fn head_sha(&self) -> Result<String> {
        Ok(self.stdout(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    /// Working-tree changes, untracked files included.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        self.stdout(&["status", "--porcelain=v1", "-uall"])?
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_status_line)
            .collect()
    }

    /// Fail unless every changed path is one of `allowed_paths`.
    #[instrument(skip_all)]
    pub fn ensure_clean_except(&self, allowed_paths: &[&str]) -> Result<()> {
        let dirty: Vec<String> = self
            .status_porcelain()?
            .into_iter()
            .filter(|entry| !allowed_paths.contains(&entry.path.as_str()))
            .map(|entry| format!("{} {}", entry.code, entry.path))
            .collect();
        if dirty.is_empty() {
            debug!("worktree is clean");
            return Ok(());
        }
        warn!(dirty = dirty.len(), "worktree not clean");
        Err(anyhow!("working tree not clean:\n{}", dirty.join("\n")))
    }

    /// Stage every change, honouring `.gitignore`.
    pub fn add_all(&self) -> Result<()> {
        self.checked(&["add", "-A"]).map(drop)
    }

    pub fn has_staged_changes(&self) -> Result<bool> {
        Ok(!self.stdout(&["diff", "--cached", "--name-only"])?.trim().is_empty())
    }

    /// Commit the index with `message`. Returns `false` without committing
    /// when nothing is staged.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("index is empty, nothing to commit");
            return Ok(false);
        }
        self.checked(&["commit", "-m", message])?;
        Ok(true)
    }

    fn stdout(&self, args: &[&str]) -> Result<String> {
        let output = self.checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn checked(&self, args: &[&str]) -> Result<Output> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(output)
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    let (code, rest) = match (line.get(..2), line.get(3..)) {
        (Some(code), Some(rest)) if !rest.trim().is_empty() => (code, rest),
        _ => return Err(anyhow!("unexpected porcelain line: '{line}'")),
    };
    let path = rest.rsplit_once(" -> ").map_or(rest, |(_, new)| new).trim();
    Ok(StatusEntry {
        code: code.to_string(),
        path: path.to_string(),
    })
}
