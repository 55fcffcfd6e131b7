//! Helpers for running child processes with timeouts and bounded output.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How often the idle watchdog wakes up to check for silence.
const WATCHDOG_TICK: Duration = Duration::from_millis(250);

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }
}

/// Run a command with a wall-clock timeout and capture stdout/stderr without
/// risking pipe deadlocks.
///
/// `output_limit_bytes` bounds what is kept in memory per stream; the rest is
/// drained and counted.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = spawn(&mut cmd)?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, output_limit_bytes));

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_secs = timeout.as_secs(),
                "command timed out, killing"
            );
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    let (stdout, stdout_truncated) = join_reader(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_reader(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Output of a command supervised by the idle watchdog.
#[derive(Debug)]
pub struct StreamedOutput {
    pub status: ExitStatus,
    /// Last lines of combined stdout/stderr, oldest first.
    pub tail: Vec<String>,
    /// Total lines seen on both streams.
    pub line_count: usize,
    /// The child was killed for producing no output within the idle timeout.
    pub idle_killed: bool,
}

/// Run a long-lived command, killing it once it has been silent for `idle_timeout`.
///
/// Reader threads drain stdout/stderr line by line, stamp the shared
/// last-output instant and tee each line to `transcript`. The calling thread
/// only waits on the child and compares that instant with the idle budget.
#[instrument(skip_all, fields(idle_timeout_secs = idle_timeout.as_secs(), tail_lines))]
pub fn run_with_idle_timeout(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    idle_timeout: Duration,
    transcript: Option<&Path>,
    tail_lines: usize,
) -> Result<StreamedOutput> {
    if stdin.is_some() {
        cmd.stdin(Stdio::piped());
    } else {
        cmd.stdin(Stdio::null());
    }
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let sink = Arc::new(LineSink::new(transcript, tail_lines)?);
    let mut child = spawn(&mut cmd)?;

    let writer_handle = match stdin {
        Some(input) => {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("stdin was not piped"))?;
            let input = input.to_vec();
            // Dropping the handle at the end of the thread closes the pipe.
            Some(thread::spawn(move || child_stdin.write_all(&input)))
        }
        None => None,
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let stdout_sink = Arc::clone(&sink);
    let stderr_sink = Arc::clone(&sink);
    let stdout_handle = thread::spawn(move || stdout_sink.drain(stdout));
    let stderr_handle = thread::spawn(move || stderr_sink.drain(stderr));

    let (status, idle_killed) = watch_idle(&mut child, &sink, idle_timeout)?;

    // After an idle kill, grandchildren may still hold the pipes open; the
    // readers are left to finish on their own instead of blocking here.
    if !idle_killed {
        join_drain(stdout_handle).context("join stdout")?;
        join_drain(stderr_handle).context("join stderr")?;
        if let Some(handle) = writer_handle {
            match handle.join() {
                Ok(Ok(())) => {}
                // The child may exit before reading all of its input.
                Ok(Err(e)) => debug!(err = %e, "stdin write ended early"),
                Err(_) => return Err(anyhow!("stdin writer thread panicked")),
            }
        }
    }

    let (tail, line_count) = sink.finish();
    debug!(exit_code = ?status.code(), idle_killed, line_count, "supervised command finished");
    Ok(StreamedOutput {
        status,
        tail,
        line_count,
        idle_killed,
    })
}

fn watch_idle(
    child: &mut Child,
    sink: &LineSink,
    idle_timeout: Duration,
) -> Result<(ExitStatus, bool)> {
    loop {
        if let Some(status) = child
            .wait_timeout(WATCHDOG_TICK.min(idle_timeout))
            .context("wait for command")?
        {
            return Ok((status, false));
        }
        let silent_for = sink.silent_for();
        if silent_for >= idle_timeout {
            warn!(
                silent_secs = silent_for.as_secs(),
                "no output within idle timeout, killing"
            );
            child.kill().context("kill idle command")?;
            let status = child.wait().context("wait command after kill")?;
            return Ok((status, true));
        }
    }
}

fn spawn(cmd: &mut Command) -> Result<Child> {
    debug!("spawning child process");
    match cmd.spawn() {
        Ok(child) => Ok(child),
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            Err(e).context("spawn command")
        }
    }
}

/// Shared consumer state for the supervised streams.
struct LineSink {
    last_output: Mutex<Instant>,
    tail: Mutex<(VecDeque<String>, usize)>,
    transcript: Option<Mutex<BufWriter<File>>>,
    tail_lines: usize,
}

impl LineSink {
    fn new(transcript: Option<&Path>, tail_lines: usize) -> Result<Self> {
        let transcript = match transcript {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("create transcript dir {}", parent.display()))?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("open transcript {}", path.display()))?;
                Some(Mutex::new(BufWriter::new(file)))
            }
            None => None,
        };
        Ok(Self {
            last_output: Mutex::new(Instant::now()),
            tail: Mutex::new((VecDeque::new(), 0)),
            transcript,
            tail_lines,
        })
    }

    fn drain<R: Read>(&self, reader: R) -> Result<()> {
        let mut reader = BufReader::new(reader);
        let mut raw = Vec::new();
        loop {
            raw.clear();
            let n = reader.read_until(b'\n', &mut raw).context("read line")?;
            if n == 0 {
                break;
            }
            if let Ok(mut last) = self.last_output.lock() {
                *last = Instant::now();
            }
            let line = String::from_utf8_lossy(&raw).trim_end().to_string();
            self.tee(&line);
            if let Ok(mut tail) = self.tail.lock() {
                tail.1 += 1;
                if self.tail_lines > 0 {
                    if tail.0.len() == self.tail_lines {
                        tail.0.pop_front();
                    }
                    tail.0.push_back(line);
                }
            }
        }
        Ok(())
    }

    fn tee(&self, line: &str) {
        if let Some(mutex) = &self.transcript
            && let Ok(mut writer) = mutex.lock()
        {
            // Flush per line so other processes can follow the transcript live.
            if let Err(e) = writeln!(writer, "{line}").and_then(|()| writer.flush()) {
                warn!(err = %e, "failed to write transcript line");
            }
        }
    }

    fn silent_for(&self) -> Duration {
        match self.last_output.lock() {
            Ok(last) => last.elapsed(),
            Err(_) => Duration::ZERO,
        }
    }

    fn finish(&self) -> (Vec<String>, usize) {
        match self.tail.lock() {
            Ok(tail) => (tail.0.iter().cloned().collect(), tail.1),
            Err(_) => (Vec::new(), 0),
        }
    }
}

fn join_drain(handle: thread::JoinHandle<Result<()>>) -> Result<()> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn join_reader(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_output_within_timeout() {
        let out = run_command_with_timeout(
            sh("echo hello; echo oops >&2"),
            Duration::from_secs(10),
            1024,
        )
        .expect("run");
        assert!(out.status.success());
        assert_eq!(out.stdout_lossy().trim(), "hello");
        assert_eq!(out.stderr_lossy().trim(), "oops");
        assert!(!out.timed_out);
    }

    #[test]
    fn truncates_beyond_limit() {
        let out = run_command_with_timeout(sh("printf 0123456789"), Duration::from_secs(10), 4)
            .expect("run");
        assert_eq!(out.stdout, b"0123");
        assert_eq!(out.stdout_truncated, 6);
    }

    #[test]
    fn kills_on_wall_clock_timeout() {
        let out = run_command_with_timeout(
            {
                let mut cmd = Command::new("sleep");
                cmd.arg("5");
                cmd
            },
            Duration::from_millis(200),
            1024,
        )
        .expect("run");
        assert!(out.timed_out);
        assert!(!out.status.success());
    }

    #[test]
    fn idle_watchdog_keeps_chatty_command_alive() {
        let temp = tempfile::tempdir().expect("tempdir");
        let transcript = temp.path().join("t.log");
        let out = run_with_idle_timeout(
            sh("for i in 1 2 3 4; do echo line$i; sleep 0.2; done"),
            None,
            Duration::from_secs(2),
            Some(&transcript),
            2,
        )
        .expect("run");
        assert!(!out.idle_killed);
        assert!(out.status.success());
        assert_eq!(out.line_count, 4);
        assert_eq!(out.tail, vec!["line3".to_string(), "line4".to_string()]);
        let logged = std::fs::read_to_string(&transcript).expect("read transcript");
        assert_eq!(logged, "line1\nline2\nline3\nline4\n");
    }

    #[test]
    fn idle_watchdog_kills_silent_command() {
        let started = Instant::now();
        let out = run_with_idle_timeout(
            sh("echo started; exec sleep 10"),
            None,
            Duration::from_millis(500),
            None,
            10,
        )
        .expect("run");
        assert!(out.idle_killed);
        assert!(started.elapsed() < Duration::from_secs(8));
        assert_eq!(out.tail, vec!["started".to_string()]);
    }

    #[test]
    fn idle_watchdog_feeds_stdin() {
        let out = run_with_idle_timeout(
            sh("cat"),
            Some(b"prompt text\n"),
            Duration::from_secs(5),
            None,
            10,
        )
        .expect("run");
        assert!(out.status.success());
        assert_eq!(out.tail, vec!["prompt text".to_string()]);
    }
}
