//! Test-only helpers: throwaway git repositories laid out like agent clones,
//! a scripted agent, and a non-blocking sleeper.

use std::collections::VecDeque;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::agents::Workspace;
use crate::io::agent::{Agent, AgentRequest, AgentRun};
use crate::io::config::ConvoyConfig;
use crate::io::paths::ProjectPaths;

pub use crate::io::clock::RecordingSleeper;

const BRANCH: &str = "main";

/// A temp project root holding a `builder/` work tree and, optionally, a
/// bare `origin.git` that further clones push to.
///
/// ```text
/// <tmp>/builder      work tree (HEAD on main, one initial commit)
/// <tmp>/origin.git   bare remote (with_remote only)
/// <tmp>/logs         shared logs root, created on demand
/// ```
pub struct TestRepo {
    temp: TempDir,
    work: PathBuf,
    remote: Option<PathBuf>,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp dir")?;
        let work = temp.path().join("builder");
        fs::create_dir_all(&work).context("create work tree dir")?;
        git(&work, &["init", "--quiet"])?;
        git(&work, &["symbolic-ref", "HEAD", &format!("refs/heads/{BRANCH}")])?;
        configure_identity(&work)?;

        let repo = Self {
            temp,
            work,
            remote: None,
        };
        repo.commit_file("README.md", "# project\n", "chore: initial commit")?;
        Ok(repo)
    }

    /// Like [`TestRepo::new`], with a bare remote tracking `main`.
    pub fn with_remote() -> Result<Self> {
        let mut repo = Self::new()?;
        let remote = repo.temp.path().join("origin.git");
        let remote_str = remote.to_string_lossy().into_owned();
        git(repo.temp.path(), &["init", "--quiet", "--bare", &remote_str])?;
        git(&remote, &["symbolic-ref", "HEAD", &format!("refs/heads/{BRANCH}")])?;
        git(&repo.work, &["remote", "add", "origin", &remote_str])?;
        git(&repo.work, &["push", "--quiet", "-u", "origin", BRANCH])?;
        repo.remote = Some(remote);
        Ok(repo)
    }

    /// Shared project root (parent of every clone).
    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// The `builder` work tree.
    pub fn path(&self) -> &Path {
        &self.work
    }

    pub fn head(&self) -> Result<String> {
        Ok(git(&self.work, &["rev-parse", "HEAD"])?.trim().to_string())
    }

    pub fn write_file(&self, relative: &str, contents: &str) -> Result<()> {
        let path = self.work.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    /// Write one file and commit it on its own.
    pub fn commit_file(&self, relative: &str, contents: &str, message: &str) -> Result<()> {
        self.write_file(relative, contents)?;
        git(&self.work, &["add", "--", relative])?;
        git(&self.work, &["commit", "--quiet", "-m", message])?;
        Ok(())
    }

    /// Install a `pre-receive` hook on the remote that rejects every push.
    /// Delete the returned path to accept pushes again.
    pub fn reject_pushes(&self) -> Result<PathBuf> {
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| anyhow!("TestRepo has no remote; use TestRepo::with_remote"))?;
        let hook = remote.join("hooks").join("pre-receive");
        fs::create_dir_all(remote.join("hooks")).context("create hooks dir")?;
        fs::write(&hook, "#!/bin/sh\necho 'push rejected' >&2\nexit 1\n")
            .with_context(|| format!("write {}", hook.display()))?;
        fs::set_permissions(&hook, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("chmod {}", hook.display()))?;
        Ok(hook)
    }

    /// Clone the remote into `<root>/<name>` (use a role name so the clone
    /// resolves the same logs root).
    pub fn clone_remote(&self, name: &str) -> Result<TestClone> {
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| anyhow!("TestRepo has no remote; use TestRepo::with_remote"))?;
        let path = self.temp.path().join(name);
        git(
            self.temp.path(),
            &[
                "clone",
                "--quiet",
                &remote.to_string_lossy(),
                &path.to_string_lossy(),
            ],
        )?;
        configure_identity(&path)?;
        Ok(TestClone { path })
    }
}

/// Additional clone inside a [`TestRepo`] root; lives as long as the repo.
pub struct TestClone {
    path: PathBuf,
}

impl TestClone {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Default config with a fast poll interval.
pub fn test_config() -> ConvoyConfig {
    let mut cfg = ConvoyConfig::default();
    cfg.poll.interval_secs = 1;
    cfg.push.backoff_secs = 0;
    cfg
}

/// Workspace for a clone directory, using [`test_config`].
pub fn workspace_for(workdir: &Path) -> Result<Workspace> {
    Workspace::with_config(ProjectPaths::resolve(workdir), test_config())
}

type Step = Box<dyn FnOnce(&AgentRequest) -> AgentRun + Send>;

/// Agent that replays queued steps and records every request.
///
/// Once the queue is empty every call succeeds without side effects.
#[derive(Default)]
pub struct ScriptedAgent {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<AgentRequest>>,
}

impl ScriptedAgent {
    pub fn new(runs: Vec<AgentRun>) -> Self {
        let agent = Self::default();
        for run in runs {
            agent.push_run(run);
        }
        agent
    }

    pub fn push_run(&self, run: AgentRun) {
        self.push_action(move |_| run);
    }

    /// Queue a step that may touch the work tree, like a real agent would.
    pub fn push_action<F>(&self, step: F)
    where
        F: FnOnce(&AgentRequest) -> AgentRun + Send + 'static,
    {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push_back(Box::new(step));
        }
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl Agent for ScriptedAgent {
    fn invoke(&self, request: &AgentRequest) -> Result<AgentRun> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        let step = self
            .steps
            .lock()
            .map_err(|_| anyhow!("scripted agent lock poisoned"))?
            .pop_front();
        Ok(match step {
            Some(step) => step(request),
            None => AgentRun::success(),
        })
    }
}

fn configure_identity(dir: &Path) -> Result<()> {
    git(dir, &["config", "user.name", "Convoy Test"])?;
    git(dir, &["config", "user.email", "convoy@example.com"])?;
    git(dir, &["config", "commit.gpgsign", "false"])?;
    Ok(())
}

fn git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
