//! Per-role progress markers under the logs directory.
//!
//! Two shapes: a single last-processed SHA (overwritten) and an append-only
//! set of processed milestone names. Both are best-effort: a failed read
//! means "nothing processed yet", a failed write means the item is processed
//! again later.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::io::best_effort::best_effort;

/// Single-value checkpoint: the last commit the reviewer handled.
#[derive(Debug, Clone)]
pub struct ShaCheckpoint {
    path: PathBuf,
}

impl ShaCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Option<String> {
        best_effort("load sha checkpoint", None, || {
            let Some(contents) = read_optional(&self.path)? else {
                return Ok(None);
            };
            let sha = contents.trim();
            Ok((!sha.is_empty()).then(|| sha.to_string()))
        })
    }

    pub fn save(&self, sha: &str) {
        best_effort("save sha checkpoint", (), || {
            ensure_parent(&self.path)?;
            let tmp = self.path.with_extension("tmp");
            fs::write(&tmp, format!("{sha}\n"))
                .with_context(|| format!("write {}", tmp.display()))?;
            fs::rename(&tmp, &self.path)
                .with_context(|| format!("replace {}", self.path.display()))?;
            debug!(sha, "saved checkpoint");
            Ok(())
        });
    }
}

/// Append-only set of processed milestone names.
#[derive(Debug, Clone)]
pub struct NameSetCheckpoint {
    path: PathBuf,
}

impl NameSetCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> HashSet<String> {
        best_effort("load processed set", HashSet::new(), || {
            let contents = read_optional(&self.path)?.unwrap_or_default();
            Ok(contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect())
        })
    }

    pub fn record(&self, name: &str) {
        best_effort("record processed name", (), || {
            ensure_parent(&self.path)?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("open {}", self.path.display()))?;
            writeln!(file, "{}", name.replace(['\n', '\r'], " ").trim())
                .with_context(|| format!("append {}", self.path.display()))?;
            debug!(name, "recorded processed milestone");
            Ok(())
        });
    }
}

pub(crate) fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

pub(crate) fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    Ok(())
}
