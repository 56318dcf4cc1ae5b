//! Child process execution with a wall-clock timeout and bounded output.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub truncated_bytes: usize,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Last `max_lines` non-empty lines of stderr, falling back to stdout when
    /// stderr is empty. Used to surface provider errors to the classifier.
    pub fn diagnostic_tail(&self, max_lines: usize) -> String {
        let stderr = String::from_utf8_lossy(&self.stderr);
        let source = if stderr.trim().is_empty() {
            String::from_utf8_lossy(&self.stdout)
        } else {
            stderr
        };
        let lines: Vec<&str> = source.lines().filter(|l| !l.trim().is_empty()).collect();
        let start = lines.len().saturating_sub(max_lines);
        lines[start..].join("\n")
    }
}

/// Run `cmd`, optionally feeding `stdin`, and wait at most `timeout`.
///
/// stdout and stderr are drained on reader threads so a chatty child cannot
/// deadlock on a full pipe. At most `output_limit_bytes` of each stream is
/// kept; the remainder is counted in `truncated_bytes`.
///
/// The child leads its own process group. On timeout the whole group is
/// killed and `timed_out` is set; after a normal exit any processes it left
/// behind are killed too, so inherited pipes always reach EOF.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_with_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ProcessOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    isolate_process_group(&mut cmd);

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_limited(stderr, output_limit_bytes));

    let stdin_handle = match stdin {
        Some(input) => {
            let mut pipe = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            Some(thread::spawn(move || pipe.write_all(&input)))
        }
        None => None,
    };

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            kill_process_tree(&mut child)?;
            child.wait().context("wait command after kill")?
        }
    };
    if !timed_out {
        kill_process_tree(&mut child)?;
    }

    if let Some(handle) = stdin_handle {
        // A child may exit without reading all of stdin; its exit status is
        // what matters.
        match handle.join() {
            Ok(Err(e)) => warn!(err = %e, "child closed stdin early"),
            Ok(Ok(())) => {}
            Err(_) => return Err(anyhow!("stdin writer thread panicked")),
        }
    }

    let (stdout, stdout_truncated) = join_reader(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_reader(stderr_handle).context("join stderr")?;
    let truncated_bytes = stdout_truncated + stderr_truncated;
    if truncated_bytes > 0 {
        warn!(truncated_bytes, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        truncated_bytes,
        timed_out,
    })
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

/// SIGKILL every process in the group led by `child`. An empty group is fine.
#[cfg(unix)]
fn kill_process_tree(child: &mut Child) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pid = child.id();
    let pgid = i32::try_from(pid).with_context(|| format!("process id {pid} out of range"))?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) => {
            debug!(pgid, "killed process group");
            Ok(())
        }
        Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(anyhow!("kill process group {pgid}: {err}")),
    }
}

#[cfg(not(unix))]
fn kill_process_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_stdout_and_feeds_stdin() {
        let out = run_with_timeout(sh("cat"), Some(b"hello"), Duration::from_secs(5), 1024)
            .expect("run");
        assert!(out.status.success());
        assert_eq!(out.stdout_lossy(), "hello");
        assert!(!out.timed_out);
    }

    #[test]
    fn kills_on_timeout() {
        let out = run_with_timeout(sh("exec sleep 5"), None, Duration::from_millis(100), 1024)
            .expect("run");
        assert!(out.timed_out);
        assert!(!out.status.success());
    }

    #[test]
    fn timeout_kills_grandchildren_holding_the_pipes() {
        let start = Instant::now();
        let out = run_with_timeout(sh("sleep 30; true"), None, Duration::from_millis(200), 1024)
            .expect("run");
        assert!(out.timed_out);
        assert!(start.elapsed() < Duration::from_secs(10), "{:?}", start.elapsed());
    }

    #[test]
    fn background_processes_left_behind_do_not_block() {
        let start = Instant::now();
        let out = run_with_timeout(
            sh("sleep 30 & echo done"),
            None,
            Duration::from_secs(20),
            1024,
        )
        .expect("run");
        assert!(!out.timed_out);
        assert!(out.status.success());
        assert_eq!(out.stdout_lossy(), "done\n");
        assert!(start.elapsed() < Duration::from_secs(10), "{:?}", start.elapsed());
    }

    #[test]
    fn bounds_captured_output() {
        let out = run_with_timeout(sh("printf 'abcdefghij'"), None, Duration::from_secs(5), 4)
            .expect("run");
        assert_eq!(out.stdout, b"abcd");
        assert_eq!(out.truncated_bytes, 6);
    }

    #[test]
    fn diagnostic_tail_prefers_stderr() {
        let out = run_with_timeout(
            sh("echo out; echo one >&2; echo two >&2; echo three >&2; exit 1"),
            None,
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert_eq!(out.diagnostic_tail(2), "two\nthree");
    }

    #[test]
    fn diagnostic_tail_falls_back_to_stdout() {
        let out = run_with_timeout(
            sh("echo only-stdout; exit 3"),
            None,
            Duration::from_secs(5),
            1024,
        )
        .expect("run");
        assert_eq!(out.diagnostic_tail(5), "only-stdout");
    }
}
