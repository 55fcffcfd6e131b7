//! Git adapter for convoy roles.
//!
//! All repository access goes through `git` subprocesses with captured output
//! and a timeout: short for local plumbing, longer for pull/push.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::types::CommitInfo;
use crate::io::process::{CommandOutput, run_command_with_timeout};

const OUTPUT_LIMIT_BYTES: usize = 4_000_000;
const FIELD_SEP: char = '\u{1f}';

/// Result of `git pull --rebase`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseOutcome {
    Clean,
    Conflict,
}

/// Result of `git push`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    Rejected,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    plumbing_timeout: Duration,
    network_timeout: Duration,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            plumbing_timeout: Duration::from_secs(60),
            network_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_timeouts(mut self, plumbing: Duration, network: Duration) -> Self {
        self.plumbing_timeout = plumbing;
        self.network_timeout = network;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn is_work_tree(&self) -> bool {
        self.run(&["rev-parse", "--is-inside-work-tree"], self.plumbing_timeout)
            .map(|out| out.status.success() && out.stdout_lossy().trim() == "true")
            .unwrap_or(false)
    }

    pub fn head_sha(&self) -> Result<String> {
        Ok(self.run_capture(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    /// The oldest root commit reachable from HEAD.
    pub fn root_commit(&self) -> Result<String> {
        let out = self.run_capture(&["rev-list", "--max-parents=0", "HEAD"])?;
        out.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("repository has no root commit"))
    }

    pub fn commit_exists(&self, sha: &str) -> bool {
        let spec = format!("{sha}^{{commit}}");
        self.run(&["cat-file", "-e", &spec], self.plumbing_timeout)
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    /// Commits after `since` up to HEAD, oldest first, with their changed files.
    /// `None` lists the whole history.
    #[instrument(skip_all, fields(since))]
    pub fn commits_since(&self, since: Option<&str>) -> Result<Vec<CommitInfo>> {
        let range = match since {
            Some(sha) => format!("{sha}..HEAD"),
            None => "HEAD".to_string(),
        };
        let format = format!("--format=%H{FIELD_SEP}%P{FIELD_SEP}%s");
        let out = self.run_capture(&["log", "--reverse", &format, &range])?;
        let mut commits = Vec::new();
        for line in out.lines().filter(|line| !line.trim().is_empty()) {
            let Some(mut commit) = parse_log_line(line) else {
                warn!(line, "unexpected git log line");
                continue;
            };
            commit.files = self.changed_files(&commit)?;
            commits.push(commit);
        }
        debug!(count = commits.len(), "listed commits");
        Ok(commits)
    }

    /// Files changed by a commit; merges are diffed against their first parent.
    pub fn changed_files(&self, commit: &CommitInfo) -> Result<Vec<String>> {
        let out = if commit.is_merge() {
            let first_parent = format!("{}^1", commit.sha);
            self.run_capture(&["diff", "--name-only", &first_parent, &commit.sha])?
        } else {
            self.run_capture(&[
                "diff-tree",
                "--no-commit-id",
                "--name-only",
                "-r",
                "--root",
                &commit.sha,
            ])?
        };
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// `git diff --stat start end`, for prompts.
    pub fn diff_stat(&self, start: &str, end: &str) -> Result<String> {
        Ok(self
            .run_capture(&["diff", "--stat", start, end])?
            .trim_end()
            .to_string())
    }

    pub fn has_remote(&self) -> Result<bool> {
        Ok(!self.run_capture(&["remote"])?.trim().is_empty())
    }

    /// Number of local commits not yet on the upstream branch.
    pub fn ahead_of_upstream(&self) -> Result<usize> {
        let out = self.run_capture(&["rev-list", "--count", "@{upstream}..HEAD"])?;
        out.trim()
            .parse()
            .map_err(|e| anyhow!("parse rev-list count {:?}: {e}", out.trim()))
    }

    /// Drop local commits and changes, matching the upstream branch.
    pub fn reset_to_upstream(&self) -> Result<()> {
        self.run_checked(&["reset", "--hard", "@{upstream}"], self.plumbing_timeout)?;
        Ok(())
    }

    /// True while a rebase is stopped mid-way in this working tree.
    pub fn rebase_in_progress(&self) -> Result<bool> {
        for marker in ["rebase-merge", "rebase-apply"] {
            let path = self.run_capture(&["rev-parse", "--git-path", marker])?;
            if self.workdir.join(path.trim()).exists() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    #[instrument(skip_all)]
    pub fn pull_rebase(&self) -> Result<RebaseOutcome> {
        let out = self.run(&["pull", "--rebase"], self.network_timeout)?;
        if out.status.success() {
            return Ok(RebaseOutcome::Clean);
        }
        let stderr = out.stderr_lossy();
        let conflicted = stderr.contains("CONFLICT") || out.stdout_lossy().contains("CONFLICT");
        if conflicted || self.rebase_in_progress()? {
            debug!(stderr = %stderr.trim(), "pull --rebase conflicted");
            return Ok(RebaseOutcome::Conflict);
        }
        Err(anyhow!("git pull --rebase failed: {}", stderr.trim()))
    }

    #[instrument(skip_all)]
    pub fn push(&self) -> Result<PushOutcome> {
        let out = self.run(&["push"], self.network_timeout)?;
        if out.status.success() {
            return Ok(PushOutcome::Pushed);
        }
        debug!(stderr = %out.stderr_lossy().trim(), "push rejected");
        Ok(PushOutcome::Rejected)
    }

    pub fn rebase_abort(&self) -> Result<()> {
        self.run_checked(&["rebase", "--abort"], self.plumbing_timeout)?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"], self.plumbing_timeout)?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run_capture(&["diff", "--cached", "--name-only"])?;
        Ok(!out.trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        self.run_checked(&["commit", "-m", message], self.plumbing_timeout)?;
        Ok(true)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args, self.plumbing_timeout)?;
        Ok(output.stdout_lossy())
    }

    fn run_checked(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let output = self.run(args, timeout)?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr_lossy().trim()
            ));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        let output = run_command_with_timeout(cmd, timeout, OUTPUT_LIMIT_BYTES)
            .map_err(|e| anyhow!("spawn git {}: {e:#}", args.join(" ")))?;
        if output.timed_out {
            return Err(anyhow!(
                "git {} timed out after {:?}",
                args.join(" "),
                timeout
            ));
        }
        Ok(output)
    }
}

fn parse_log_line(line: &str) -> Option<CommitInfo> {
    let mut fields = line.splitn(3, FIELD_SEP);
    let sha = fields.next()?.trim();
    let parents = fields.next()?;
    let subject = fields.next().unwrap_or("");
    if sha.is_empty() {
        return None;
    }
    Some(CommitInfo {
        sha: sha.to_string(),
        parents: parents.split_whitespace().map(str::to_string).collect(),
        subject: subject.trim().to_string(),
        files: Vec::new(),
    })
}
