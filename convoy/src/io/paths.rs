//! Logs-root resolution and `convoy init` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::core::role::{Role, is_agent_dir_name};
use crate::io::config::{ConvoyConfig, write_config};

const CONFIG_FILE: &str = "convoy.toml";
const LOGS_DIR: &str = "logs";
const GITIGNORE_ENTRY: &str = "/logs/";

/// Canonical locations shared by every agent clone of one project.
#[derive(Debug, Clone)]
pub struct ProjectPaths {
    /// The agent's own git working tree.
    pub workdir: PathBuf,
    /// Shared root holding `convoy.toml` and `logs/`.
    pub root: PathBuf,
    pub logs_dir: PathBuf,
    pub config_path: PathBuf,
    pub ledger_path: PathBuf,
    pub sentinel_path: PathBuf,
    pub reviewer_checkpoint_path: PathBuf,
}

impl ProjectPaths {
    /// Resolve paths for an agent running in `cwd`.
    ///
    /// A clone directory named after a role (`builder`, `reviewer-3`, ...)
    /// shares its parent as the logs root; anything else is its own root.
    pub fn resolve(cwd: impl Into<PathBuf>) -> Self {
        let workdir = cwd.into();
        let root = match (workdir.file_name(), workdir.parent()) {
            (Some(name), Some(parent)) if is_agent_dir_name(&name.to_string_lossy()) => {
                parent.to_path_buf()
            }
            _ => workdir.clone(),
        };
        Self::with_root(workdir, root)
    }

    pub fn with_root(workdir: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let logs_dir = root.join(LOGS_DIR);
        Self {
            workdir: workdir.into(),
            config_path: root.join(CONFIG_FILE),
            ledger_path: logs_dir.join("milestones.log"),
            sentinel_path: logs_dir.join("builder.done"),
            reviewer_checkpoint_path: logs_dir.join("reviewer.last_sha"),
            logs_dir,
            root,
        }
    }

    pub fn processed_path(&self, role: Role) -> PathBuf {
        self.logs_dir.join(format!("{role}.processed"))
    }

    pub fn activity_log_path(&self, role: Role) -> PathBuf {
        self.logs_dir.join(format!("{role}.log"))
    }

    pub fn transcript_path(&self, role: Role) -> PathBuf {
        self.logs_dir.join(format!("{role}.transcript.log"))
    }

    /// A project artifact (TASKS.md, reviews/, ...) inside the working tree.
    pub fn artifact(&self, relative: &str) -> PathBuf {
        self.workdir.join(relative)
    }

    /// True when the logs directory sits inside the working tree and must be
    /// kept out of commits.
    pub fn logs_inside_workdir(&self) -> bool {
        self.logs_dir.starts_with(&self.workdir)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    /// Overwrite an existing `convoy.toml`.
    pub force: bool,
}

/// Create the logs directory, `convoy.toml` and empty coordination files.
///
/// Existing artifacts are never overwritten; `force` only replaces the config.
pub fn init_project(paths: &ProjectPaths, options: InitOptions) -> Result<ConvoyConfig> {
    if paths.config_path.exists() && !options.force {
        return Err(anyhow!(
            "convoy init: {} already exists (use --force to overwrite)",
            paths.config_path.display()
        ));
    }
    if paths.logs_dir.exists() && !paths.logs_dir.is_dir() {
        return Err(anyhow!(
            "convoy init: {} exists but is not a directory",
            paths.logs_dir.display()
        ));
    }
    create_dir(&paths.logs_dir)?;

    let cfg = ConvoyConfig::default();
    write_config(&paths.config_path, &cfg)?;

    let artifacts = &cfg.artifacts;
    write_if_missing(&paths.artifact(&artifacts.tasks_file), TASKS_PLACEHOLDER)?;
    write_if_missing(&paths.artifact(&artifacts.backlog_file), BACKLOG_PLACEHOLDER)?;
    write_if_missing(&paths.artifact(&artifacts.bugs_file), BUGS_PLACEHOLDER)?;
    write_if_missing(&paths.artifact(&artifacts.validation_file), VALIDATION_PLACEHOLDER)?;
    create_dir(&paths.artifact(&artifacts.reviews_dir))?;
    create_dir(&paths.artifact(&artifacts.milestones_dir))?;

    if paths.logs_inside_workdir() {
        ensure_gitignored(&paths.workdir.join(".gitignore"))?;
    }
    Ok(cfg)
}

fn ensure_gitignored(gitignore: &Path) -> Result<()> {
    let existing = match fs::read_to_string(gitignore) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(err) => {
            return Err(err).with_context(|| format!("read {}", gitignore.display()));
        }
    };
    if existing.lines().any(|line| line.trim() == GITIGNORE_ENTRY) {
        return Ok(());
    }
    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(GITIGNORE_ENTRY);
    updated.push('\n');
    fs::write(gitignore, updated).with_context(|| format!("write {}", gitignore.display()))
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

fn write_if_missing(path: &Path, contents: &str) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    fs::write(path, contents).with_context(|| format!("write file {}", path.display()))
}

const TASKS_PLACEHOLDER: &str = "# Tasks\n";
const BACKLOG_PLACEHOLDER: &str = "# Backlog\n";
const BUGS_PLACEHOLDER: &str = "# Bugs\n";
const VALIDATION_PLACEHOLDER: &str = "# Validation\n";
