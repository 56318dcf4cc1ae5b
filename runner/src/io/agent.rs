//! Agent abstraction for task execution.
//!
//! The [`Agent`] trait decouples the pipeline from the coding assistant that
//! actually implements a task. [`CommandAgent`] runs one as a subprocess with
//! the request on stdin; tests use scripted agents that return predetermined
//! outcomes without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::types::RetryOutcome;
use crate::io::process::run_with_timeout;

/// Lines of stderr carried into a failure message.
const FAILURE_TAIL_LINES: usize = 20;

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Working directory the agent operates in (the repository root).
    pub workdir: PathBuf,
    /// Rendered task instructions.
    pub prompt: String,
}

/// Abstraction over agent backends.
///
/// Implementations report failures as values: a failed outcome's error text
/// is what the retry classifier inspects.
pub trait Agent {
    fn execute(&self, request: &AgentRequest) -> RetryOutcome;
}

impl<T: Agent + ?Sized> Agent for &T {
    fn execute(&self, request: &AgentRequest) -> RetryOutcome {
        (**self).execute(request)
    }
}

/// Supported agent command presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    #[default]
    Claude,
    Codex,
    /// Use the argv from `agent.command` in the config.
    Custom,
}

impl AgentKind {
    /// Default argv for the preset. `Custom` has none.
    pub fn preset_command(self) -> Vec<String> {
        let argv: &[&str] = match self {
            AgentKind::Claude => &["claude", "-p", "--dangerously-skip-permissions"],
            AgentKind::Codex => &[
                "codex",
                "exec",
                "--sandbox",
                "danger-full-access",
                "--skip-git-repo-check",
                "-",
            ],
            AgentKind::Custom => &[],
        };
        argv.iter().map(|s| s.to_string()).collect()
    }
}

/// Agent that spawns an external command and feeds it the prompt on stdin.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandAgent {
    pub fn new(
        argv: Vec<String>,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> anyhow::Result<Self> {
        if argv.first().is_none_or(|program| program.trim().is_empty()) {
            return Err(anyhow!("agent command must be a non-empty array"));
        }
        Ok(Self {
            argv,
            timeout,
            output_limit_bytes,
        })
    }

    pub fn program(&self) -> &str {
        &self.argv[0]
    }
}

impl Agent for CommandAgent {
    #[instrument(skip_all, fields(program = %self.program(), timeout_secs = self.timeout.as_secs()))]
    fn execute(&self, request: &AgentRequest) -> RetryOutcome {
        info!(workdir = %request.workdir.display(), "starting agent");

        let mut cmd = Command::new(self.program());
        cmd.args(&self.argv[1..]).current_dir(&request.workdir);

        let output = match run_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run {}", self.program()))
        {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "agent could not be run");
                return RetryOutcome::failure(String::new(), err);
            }
        };

        let stdout = output.stdout_lossy();
        if output.timed_out {
            warn!("agent timed out");
            return RetryOutcome::failure(
                stdout,
                anyhow!(
                    "{} timed out after {}s",
                    self.program(),
                    self.timeout.as_secs()
                ),
            );
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "agent failed");
            let tail = output.diagnostic_tail(FAILURE_TAIL_LINES);
            let status = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |code| code.to_string());
            return RetryOutcome::failure(
                stdout,
                anyhow!("{} exited with status {status}: {tail}", self.program()),
            );
        }

        debug!(stdout_bytes = stdout.len(), "agent completed successfully");
        RetryOutcome::success(stdout)
    }
}
