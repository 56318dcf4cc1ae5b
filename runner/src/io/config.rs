//! Runner configuration, read from an optional TOML file.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::backoff::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_JITTER_PERCENT, RetryPolicy,
};
use crate::io::agent::{AgentKind, CommandAgent};

/// File name looked up in the repository root when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = ".runner.toml";

/// Runner configuration (TOML).
///
/// Missing fields default to sensible values, so an absent file and an empty
/// file are equivalent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunnerConfig {
    pub retry: RetryConfig,
    pub agent: AgentConfig,
    pub commit: CommitConfig,
    pub git: GitConfig,
}

/// Retry schedule for agent calls. Zero or out-of-range values are replaced
/// with defaults rather than rejected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries beyond the first attempt.
    pub max_attempts: u32,
    pub base_delay_secs: u64,
    /// Upper bound of the additive jitter, as a percentage of the delay.
    pub max_jitter_percent: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_secs: DEFAULT_BASE_DELAY.as_secs(),
            max_jitter_percent: DEFAULT_MAX_JITTER_PERCENT,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs(self.base_delay_secs),
            self.max_jitter_percent,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub kind: AgentKind,
    /// Command for `kind = "custom"` (e.g. `["my-agent","--yes"]`). The
    /// request is written to its stdin.
    pub command: Vec<String>,
    /// Wall-clock limit for a single agent call.
    pub timeout_secs: u64,
    /// Truncate captured agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            kind: AgentKind::default(),
            command: Vec::new(),
            timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl AgentConfig {
    pub fn argv(&self) -> Vec<String> {
        match self.kind {
            AgentKind::Custom => self.command.clone(),
            preset => preset.preset_command(),
        }
    }

    pub fn build(&self) -> Result<CommandAgent> {
        CommandAgent::new(
            self.argv(),
            Duration::from_secs(self.timeout_secs),
            self.output_limit_bytes,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommitConfig {
    /// Maximum characters of the task headline in a commit subject.
    pub summary_max_chars: usize,
    pub prefix: String,
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            summary_max_chars: 60,
            prefix: "chore(task): ".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GitConfig {
    /// Refuse to start when files other than the checklist are modified.
    pub require_clean: bool,
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.agent.kind == AgentKind::Custom
            && self
                .agent
                .command
                .first()
                .is_none_or(|program| program.trim().is_empty())
        {
            return Err(anyhow!(
                "agent.command must be a non-empty array when agent.kind = \"custom\""
            ));
        }
        if self.commit.summary_max_chars == 0 {
            return Err(anyhow!("commit.summary_max_chars must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        let cfg = RunnerConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: RunnerConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, RunnerConfig::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "[retry]\nmax_attempts = 5\n\n[agent]\nkind = \"codex\"\n")
            .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.base_delay_secs, 5);
        assert_eq!(cfg.agent.kind, AgentKind::Codex);
        assert_eq!(cfg.agent.argv()[0], "codex");
        assert_eq!(cfg.commit, CommitConfig::default());
    }

    #[test]
    fn illegal_retry_values_normalize_instead_of_failing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(
            &path,
            "[retry]\nmax_attempts = 0\nbase_delay_secs = 0\nmax_jitter_percent = 900\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.retry.policy(), RetryPolicy::default());
    }

    #[test]
    fn custom_agent_requires_command() {
        let cfg = RunnerConfig {
            agent: AgentConfig {
                kind: AgentKind::Custom,
                ..AgentConfig::default()
            },
            ..RunnerConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("agent.command"));
    }

    #[test]
    fn custom_agent_uses_configured_argv() {
        let agent = AgentConfig {
            kind: AgentKind::Custom,
            command: vec!["my-agent".to_string(), "--yes".to_string()],
            ..AgentConfig::default()
        };
        assert_eq!(agent.argv(), vec!["my-agent", "--yes"]);
        assert_eq!(agent.build().expect("build").program(), "my-agent");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cfg = RunnerConfig {
            agent: AgentConfig {
                timeout_secs: 0,
                ..AgentConfig::default()
            },
            ..RunnerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_agent_kind_fails_to_parse() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "[agent]\nkind = \"gpt\"\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("parse"));
    }
}
