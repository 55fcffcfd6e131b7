//! Human-readable per-role activity log (`logs/<role>.log`).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};

use crate::io::best_effort::best_effort;
use crate::io::checkpoint::ensure_parent;

#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
    label: String,
}

impl ActivityLog {
    /// `label` prefixes every line, e.g. `builder-2` for a second builder.
    pub fn new(path: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, message: &str) {
        best_effort("append activity log", (), || {
            ensure_parent(&self.path)?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("open {}", self.path.display()))?;
            let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
            for line in message.lines() {
                writeln!(file, "{stamp} [{}] {line}", self.label)
                    .with_context(|| format!("append {}", self.path.display()))?;
            }
            Ok(())
        });
    }
}
