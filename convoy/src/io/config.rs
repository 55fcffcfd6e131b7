//! Convoy configuration stored in `convoy.toml` at the logs root.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::classifier::ClassifierRules;
use crate::core::role::{CheckpointShape, Role};
use crate::io::push::RetryPolicy;

/// Convoy configuration (TOML).
///
/// Shared by every agent clone. Missing fields default to values that work
/// for a single builder with one agent per downstream role.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ConvoyConfig {
    pub agent: AgentConfig,
    pub poll: PollConfig,
    pub push: PushConfig,
    pub artifacts: ArtifactsConfig,
    pub builder: BuilderConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// LLM command; the prompt is written to its stdin.
    pub command: Vec<String>,
    /// Non-interactive re-authentication command. Empty disables re-auth.
    pub reauth_command: Vec<String>,
    /// Kill the agent after this many seconds without output.
    pub idle_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "claude".to_string(),
                "--print".to_string(),
                "--dangerously-skip-permissions".to_string(),
            ],
            reauth_command: Vec::new(),
            idle_timeout_secs: 15 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PollConfig {
    pub interval_secs: u64,
    /// Builder activity log older than this counts as "builder done".
    pub builder_stale_secs: u64,
    pub git_timeout_secs: u64,
    pub git_network_timeout_secs: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            builder_stale_secs: 30 * 60,
            git_timeout_secs: 60,
            git_network_timeout_secs: 5 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PushConfig {
    pub max_attempts: u32,
    pub backoff_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArtifactsConfig {
    pub tasks_file: String,
    pub backlog_file: String,
    pub bugs_file: String,
    pub validation_file: String,
    /// Reviewer findings; also the reviewer's own output directory.
    pub reviews_dir: String,
    pub milestones_dir: String,
    pub extra_coordination_files: Vec<String>,
    /// Commit subject substring marking a milestone merge that must be reviewed.
    pub milestone_merge_pattern: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            tasks_file: "TASKS.md".to_string(),
            backlog_file: "BACKLOG.md".to_string(),
            bugs_file: "BUGS.md".to_string(),
            validation_file: "VALIDATION.md".to_string(),
            reviews_dir: "reviews".to_string(),
            milestones_dir: "milestones".to_string(),
            extra_coordination_files: Vec::new(),
            milestone_merge_pattern: "Merge milestone".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuilderConfig {
    /// Roles whose checkpoints must cover the ledger before the builder finishes.
    pub wait_for: Vec<Role>,
    pub max_idle_wait_secs: u64,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            wait_for: vec![Role::MilestoneWatcher, Role::Tester, Role::Validator],
            max_idle_wait_secs: 60 * 60,
        }
    }
}

impl ConvoyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.idle_timeout_secs == 0 {
            return Err(anyhow!("agent.idle_timeout_secs must be > 0"));
        }
        if self.poll.interval_secs == 0 {
            return Err(anyhow!("poll.interval_secs must be > 0"));
        }
        if self.poll.builder_stale_secs == 0 {
            return Err(anyhow!("poll.builder_stale_secs must be > 0"));
        }
        if self.poll.git_timeout_secs == 0 || self.poll.git_network_timeout_secs == 0 {
            return Err(anyhow!("poll git timeouts must be > 0"));
        }
        if self.push.max_attempts == 0 {
            return Err(anyhow!("push.max_attempts must be > 0"));
        }
        if let Some(role) = self
            .builder
            .wait_for
            .iter()
            .find(|role| role.checkpoint_shape() != CheckpointShape::ProcessedNames)
        {
            return Err(anyhow!(
                "builder.wait_for only accepts milestone-scoped roles, got '{role}'"
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll.interval_secs)
    }

    pub fn builder_stale_after(&self) -> Duration {
        Duration::from_secs(self.poll.builder_stale_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.idle_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.push.max_attempts,
            backoff: Duration::from_secs(self.push.backoff_secs),
        }
    }

    pub fn classifier_rules(&self) -> ClassifierRules {
        let artifacts = &self.artifacts;
        let mut coordination_files = vec![
            artifacts.tasks_file.clone(),
            artifacts.backlog_file.clone(),
            artifacts.bugs_file.clone(),
            artifacts.validation_file.clone(),
        ];
        coordination_files.extend(artifacts.extra_coordination_files.iter().cloned());
        ClassifierRules {
            reviewer_output_dir: artifacts.reviews_dir.clone(),
            coordination_files,
            coordination_dirs: vec![
                artifacts.milestones_dir.clone(),
                artifacts.reviews_dir.clone(),
            ],
            milestone_merge_pattern: artifacts.milestone_merge_pattern.clone(),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ConvoyConfig::default()`.
pub fn load_config(path: &Path) -> Result<ConvoyConfig> {
    if !path.exists() {
        let cfg = ConvoyConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ConvoyConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ConvoyConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
