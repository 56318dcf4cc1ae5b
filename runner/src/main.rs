//! Checklist runner CLI.
//!
//! `run` hands every pending `- [ ]` task of a Markdown checklist to a coding
//! agent, marks it `- [x]` and commits, one task at a time. `status` reports
//! progress without running anything.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use checklist_runner::core::types::RunResult;
use checklist_runner::exit_codes;
use checklist_runner::io::agent::AgentKind;
use checklist_runner::io::checklist::{load_stats, load_tasks};
use checklist_runner::io::config::{DEFAULT_CONFIG_FILE, RunnerConfig, load_config};
use checklist_runner::io::git::Git;
use checklist_runner::logging;
use checklist_runner::pipeline::{Pipeline, PipelineConfig, PipelineEvent};
use checklist_runner::report::{CompletionLog, RunReport, StatusReport, exit_code};

const DEFAULT_CHECKLIST: &str = "TASKS.md";

#[derive(Parser)]
#[command(
    name = "checklist-runner",
    version,
    about = "Run a coding agent over every pending task in a Markdown checklist"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process pending tasks in order: run the agent, mark complete, commit.
    Run(RunArgs),
    /// Print pending/completed counts and the next pending task.
    Status {
        #[arg(long, default_value = DEFAULT_CHECKLIST)]
        checklist: PathBuf,
        /// Print a JSON report instead of text.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Checklist file. Relative paths resolve against `--repo`.
    #[arg(long, default_value = DEFAULT_CHECKLIST)]
    checklist: PathBuf,
    /// Repository the agent works in and commits to.
    #[arg(long, default_value = ".")]
    repo: PathBuf,
    /// Config file (default: `<repo>/.runner.toml`, optional).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Retries per task beyond the first attempt.
    #[arg(long)]
    max_retries: Option<u32>,
    #[arg(long, value_enum)]
    agent: Option<AgentKind>,
    /// Print a JSON report instead of progress lines.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

async fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run(args) => cmd_run(args).await,
        Command::Status { checklist, json } => cmd_status(&checklist, json),
    }
}

async fn cmd_run(args: RunArgs) -> Result<i32> {
    let config = resolve_config(&args)?;
    let checklist_path = args.repo.join(&args.checklist);

    if config.git.require_clean {
        let allowed = checklist_in_repo(&args.repo, &checklist_path);
        Git::new(&args.repo)
            .ensure_clean_except(&[allowed.as_str()])
            .context("git.require_clean is set")?;
    }

    let agent = config.agent.build()?;
    let pipeline_config = PipelineConfig {
        checklist_path: checklist_path.clone(),
        repo_path: args.repo.clone(),
        retry: config.retry.policy(),
        commit: config.commit.clone(),
    };
    debug!(?pipeline_config, "resolved pipeline config");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let mut log = CompletionLog::default();
    let json = args.json;
    let result = Pipeline::with_defaults(pipeline_config, agent)
        .run(&cancel, |event| {
            log.record(event);
            if !json {
                print_event(event, &checklist_path);
            }
        })
        .await;

    if json {
        print_json(&RunReport::new(&result, log.into_tasks()))?;
    } else {
        print_summary(&result);
    }
    Ok(exit_code(&result))
}

fn cmd_status(checklist: &Path, json: bool) -> Result<i32> {
    let stats = load_stats(checklist)?;
    let next = load_tasks(checklist)?.into_iter().next();
    if json {
        print_json(&StatusReport::new(stats, next))?;
        return Ok(exit_codes::OK);
    }
    println!("{} pending, {} completed", stats.pending, stats.completed);
    if let Some(task) = next {
        println!("next (line {}): {}", task.position, task.headline());
    }
    Ok(exit_codes::OK)
}

/// Load the config file and apply CLI overrides.
fn resolve_config(args: &RunArgs) -> Result<RunnerConfig> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(|| args.repo.join(DEFAULT_CONFIG_FILE));
    let mut config = load_config(&path)?;
    if let Some(max_retries) = args.max_retries {
        config.retry.max_attempts = max_retries;
    }
    if let Some(kind) = args.agent {
        config.agent.kind = kind;
    }
    config.validate().context("validate command-line overrides")?;
    Ok(config)
}

/// Checklist path as git reports it relative to the repository root.
fn checklist_in_repo(repo: &Path, checklist: &Path) -> String {
    let relative = match (repo.canonicalize(), checklist.canonicalize()) {
        (Ok(repo), Ok(checklist)) => checklist
            .strip_prefix(&repo)
            .map(Path::to_path_buf)
            .unwrap_or(checklist),
        _ => checklist.strip_prefix(repo).unwrap_or(checklist).to_path_buf(),
    };
    relative.to_string_lossy().replace('\\', "/")
}

fn print_event(event: &PipelineEvent, checklist: &Path) {
    match event {
        PipelineEvent::TasksLoaded { total } => {
            println!("{total} pending task(s) in {}", checklist.display());
        }
        PipelineEvent::TaskStarted { index, total, task } => {
            println!(
                "[{}/{}] line {}: {}",
                index + 1,
                total,
                task.position,
                task.headline()
            );
        }
        PipelineEvent::RetryScheduled { notice, .. } => {
            println!(
                "  attempt {} failed, retrying in {}s ({} left)",
                notice.attempt, notice.delay_secs, notice.remaining
            );
        }
        PipelineEvent::TaskCompleted { commit, .. } => {
            if commit.committed {
                let short = commit.revision_id.get(..8).unwrap_or(&commit.revision_id);
                println!("  committed {short}");
            } else {
                println!("  done, nothing to commit");
            }
        }
    }
}

fn print_summary(result: &RunResult) {
    println!(
        "{} of {} tasks completed",
        result.completed_tasks, result.total_tasks
    );
    if let Some(err) = &result.failure {
        eprintln!("error: {err:#}");
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
