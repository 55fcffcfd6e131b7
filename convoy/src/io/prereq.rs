//! Startup prerequisite checks.

use std::fmt;
use std::path::Path;

use anyhow::Result;
use tracing::debug;

use crate::io::config::ConvoyConfig;
use crate::io::git::Git;

/// A required tool or environment condition is missing.
///
/// Surfaced to the user with a remediation hint and mapped to the
/// environment exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerequisiteError {
    pub tool: String,
    pub hint: String,
}

impl fmt::Display for PrerequisiteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing prerequisite '{}': {}", self.tool, self.hint)
    }
}

impl std::error::Error for PrerequisiteError {}

/// Check that `git` and the agent executable are on `PATH` and that
/// `workdir` is inside a git work tree.
pub fn check_prerequisites(cfg: &ConvoyConfig, workdir: &Path) -> Result<()> {
    require_executable("git", "install git and make sure it is on PATH")?;

    let Some(agent) = cfg.agent.command.first() else {
        return Err(PrerequisiteError {
            tool: "agent command".to_string(),
            hint: "set agent.command in convoy.toml".to_string(),
        }
        .into());
    };
    require_executable(
        agent,
        "install the agent CLI or point agent.command in convoy.toml at it",
    )?;
    if let Some(reauth) = cfg.agent.reauth_command.first() {
        require_executable(reauth, "fix agent.reauth_command in convoy.toml")?;
    }

    if !Git::new(workdir).is_work_tree() {
        return Err(PrerequisiteError {
            tool: "git work tree".to_string(),
            hint: format!(
                "{} is not inside a git repository; run convoy from an agent clone",
                workdir.display()
            ),
        }
        .into());
    }
    Ok(())
}

fn require_executable(program: &str, hint: &str) -> Result<()> {
    match which::which(program) {
        Ok(path) => {
            debug!(program, path = %path.display(), "found executable");
            Ok(())
        }
        Err(_) => Err(PrerequisiteError {
            tool: program.to_string(),
            hint: hint.to_string(),
        }
        .into()),
    }
}
