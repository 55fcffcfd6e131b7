//! LLM agent invocation.
//!
//! The [`Agent`] trait decouples role drivers from the actual backend (the
//! configured CLI command). Tests use scripted agents that return
//! predetermined runs without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::role::Role;
use crate::core::signals::{AgentSignal, detect_agent_signal};
use crate::io::process::{run_command_with_timeout, run_with_idle_timeout};

/// Lines of agent output kept in memory for signal detection and logs.
const TAIL_LINES: usize = 200;
const REAUTH_TIMEOUT: Duration = Duration::from_secs(120);
const REAUTH_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

/// Parameters for one agent pass.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub role: Role,
    /// Working directory (the role's git clone).
    pub workdir: PathBuf,
    /// Prompt text fed on stdin.
    pub prompt: String,
    /// Output is appended here line by line when set.
    pub transcript_path: Option<PathBuf>,
    pub idle_timeout: Duration,
}

/// Outcome of one agent pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentRun {
    pub exit_code: Option<i32>,
    pub idle_killed: bool,
    pub auth_expired: bool,
    /// Trailing output lines, oldest first.
    pub lines: Vec<String>,
}

impl AgentRun {
    pub fn success() -> Self {
        Self {
            exit_code: Some(0),
            ..Self::default()
        }
    }

    pub fn failed(exit_code: i32) -> Self {
        Self {
            exit_code: Some(exit_code),
            ..Self::default()
        }
    }

    pub fn idle_killed() -> Self {
        Self {
            idle_killed: true,
            ..Self::default()
        }
    }

    pub fn auth_expired() -> Self {
        Self {
            exit_code: Some(1),
            auth_expired: true,
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && !self.idle_killed && !self.auth_expired
    }
}

/// Abstraction over agent backends.
pub trait Agent {
    /// Run one pass. `Err` means the agent could not be run at all; a
    /// non-zero exit is a failed [`AgentRun`], not an error.
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun>;
}

/// Non-interactive credential refresh.
pub trait Reauthenticator {
    fn reauthenticate(&self) -> Result<()>;
}

/// Agent that spawns the configured command and writes the prompt to stdin.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: Vec<String>,
}

impl CommandAgent {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() {
            return Err(anyhow!("agent command is empty"));
        }
        Ok(Self { command })
    }
}

impl Agent for CommandAgent {
    #[instrument(
        skip_all,
        fields(role = %request.role, idle_timeout_secs = request.idle_timeout.as_secs())
    )]
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun> {
        info!(workdir = %request.workdir.display(), program = %self.command[0], "starting agent");
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .current_dir(&request.workdir)
            .env("CONVOY_ROLE", request.role.as_str());

        let output = run_with_idle_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            request.idle_timeout,
            request.transcript_path.as_deref(),
            TAIL_LINES,
        )
        .with_context(|| format!("run agent {}", self.command[0]))?;

        let auth_expired = output
            .tail
            .iter()
            .any(|line| detect_agent_signal(line) == Some(AgentSignal::AuthExpired));
        let run = AgentRun {
            exit_code: output.status.code(),
            idle_killed: output.idle_killed,
            auth_expired,
            lines: output.tail,
        };
        info!(
            exit_code = ?run.exit_code,
            idle_killed = run.idle_killed,
            auth_expired = run.auth_expired,
            lines = output.line_count,
            "agent finished"
        );
        Ok(run)
    }
}

/// Runs the configured re-auth command with a short timeout.
#[derive(Debug, Clone)]
pub struct CommandReauth {
    command: Vec<String>,
}

impl CommandReauth {
    /// `None` when no re-auth command is configured.
    pub fn from_config(command: &[String]) -> Option<Self> {
        (!command.is_empty()).then(|| Self {
            command: command.to_vec(),
        })
    }
}

impl Reauthenticator for CommandReauth {
    fn reauthenticate(&self) -> Result<()> {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        let output = run_command_with_timeout(cmd, REAUTH_TIMEOUT, REAUTH_OUTPUT_LIMIT_BYTES)
            .with_context(|| format!("run re-auth command {}", self.command[0]))?;
        if output.timed_out {
            return Err(anyhow!("re-auth timed out after {REAUTH_TIMEOUT:?}"));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "re-auth failed with status {:?}: {}",
                output.status.code(),
                output.stderr_lossy().trim()
            ));
        }
        Ok(())
    }
}

/// Invoke the agent with the recovery policy applied.
///
/// - auth expiry: re-authenticate once (when configured) and retry once
/// - idle kill: retry once
///
/// Anything else, including a failed retry, is returned as-is.
pub fn run_agent<A>(
    agent: &A,
    reauth: Option<&dyn Reauthenticator>,
    request: &AgentRequest,
) -> Result<AgentRun>
where
    A: Agent + ?Sized,
{
    let first = agent.invoke(request)?;
    if first.auth_expired {
        let Some(reauth) = reauth else {
            warn!(role = %request.role, "agent auth expired and no re-auth command is configured");
            return Ok(first);
        };
        warn!(role = %request.role, "agent auth expired, re-authenticating");
        if let Err(err) = reauth.reauthenticate() {
            warn!(err = %format!("{err:#}"), "re-auth failed");
            return Ok(first);
        }
        return agent.invoke(request);
    }
    if first.idle_killed {
        warn!(
            role = %request.role,
            idle_timeout_secs = request.idle_timeout.as_secs(),
            "agent went silent, retrying once"
        );
        return agent.invoke(request);
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedAgent;
    use std::cell::Cell;
    use std::fs;

    struct CountingReauth {
        calls: Cell<u32>,
        fail: bool,
    }

    impl Reauthenticator for CountingReauth {
        fn reauthenticate(&self) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            if self.fail {
                return Err(anyhow!("login server down"));
            }
            Ok(())
        }
    }

    fn request(workdir: PathBuf) -> AgentRequest {
        AgentRequest {
            role: Role::Tester,
            workdir,
            prompt: "test the milestone".to_string(),
            transcript_path: None,
            idle_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn auth_expiry_reauths_once_and_retries_once() {
        let agent = ScriptedAgent::new(vec![AgentRun::auth_expired(), AgentRun::auth_expired()]);
        let reauth = CountingReauth {
            calls: Cell::new(0),
            fail: false,
        };
        let run = run_agent(&agent, Some(&reauth), &request(PathBuf::from("."))).expect("run");

        assert!(run.auth_expired);
        assert_eq!(reauth.calls.get(), 1);
        assert_eq!(agent.requests().len(), 2);
    }

    #[test]
    fn failed_reauth_does_not_retry() {
        let agent = ScriptedAgent::new(vec![AgentRun::auth_expired()]);
        let reauth = CountingReauth {
            calls: Cell::new(0),
            fail: true,
        };
        let run = run_agent(&agent, Some(&reauth), &request(PathBuf::from("."))).expect("run");
        assert!(!run.succeeded());
        assert_eq!(agent.requests().len(), 1);
    }

    #[test]
    fn idle_kill_retries_once() {
        let agent = ScriptedAgent::new(vec![AgentRun::idle_killed(), AgentRun::success()]);
        let run = run_agent(&agent, None, &request(PathBuf::from("."))).expect("run");
        assert!(run.succeeded());
        assert_eq!(agent.requests().len(), 2);
    }

    #[test]
    fn plain_failure_is_not_retried() {
        let agent = ScriptedAgent::new(vec![AgentRun::failed(2)]);
        let run = run_agent(&agent, None, &request(PathBuf::from("."))).expect("run");
        assert_eq!(run.exit_code, Some(2));
        assert_eq!(agent.requests().len(), 1);
    }

    #[test]
    fn command_agent_feeds_prompt_and_detects_auth_marker() {
        let temp = tempfile::tempdir().expect("tempdir");
        let transcript = temp.path().join("tester.transcript.log");
        let agent = CommandAgent::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "cat; echo 'Error: OAuth token has expired'; exit 1".to_string(),
        ])
        .expect("agent");
        let mut req = request(temp.path().to_path_buf());
        req.prompt.push('\n');
        req.transcript_path = Some(transcript.clone());

        let run = agent.invoke(&req).expect("invoke");
        assert_eq!(run.exit_code, Some(1));
        assert!(run.auth_expired);
        assert!(run.lines.iter().any(|line| line == "test the milestone"));
        let logged = fs::read_to_string(&transcript).expect("transcript");
        assert!(logged.contains("OAuth token has expired"));
    }

    #[test]
    fn reauth_command_reports_failure() {
        let ok = CommandReauth::from_config(&["true".to_string()]).expect("configured");
        assert!(ok.reauthenticate().is_ok());
        let bad = CommandReauth::from_config(&["false".to_string()]).expect("configured");
        assert!(bad.reauthenticate().is_err());
        assert!(CommandReauth::from_config(&[]).is_none());
    }
}
