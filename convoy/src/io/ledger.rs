//! Milestone boundary ledger (`logs/milestones.log`).
//!
//! The builder is the only writer. Every read replays the whole file so
//! watchers always see the latest appends.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, instrument};

use crate::core::parse::{format_milestone_log_line, parse_milestone_log};
use crate::core::types::MilestoneBoundary;
use crate::io::best_effort::best_effort;
use crate::io::checkpoint::{ensure_parent, read_optional};
use crate::io::git::Git;

#[derive(Debug, Clone)]
pub struct MilestoneLedger {
    path: PathBuf,
}

impl MilestoneLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one boundary; a failed write is logged and dropped.
    #[instrument(skip_all, fields(name = %boundary.name))]
    pub fn record(&self, boundary: &MilestoneBoundary) {
        best_effort("record milestone boundary", (), || {
            ensure_parent(&self.path)?;
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| format!("open {}", self.path.display()))?;
            file.write_all(format_milestone_log_line(boundary).as_bytes())
                .with_context(|| format!("append {}", self.path.display()))?;
            info!(
                start = %boundary.start_sha,
                end = %boundary.end_sha,
                "recorded milestone boundary"
            );
            Ok(())
        });
    }

    pub fn load(&self) -> Vec<MilestoneBoundary> {
        best_effort("load milestone ledger", Vec::new(), || {
            Ok(read_optional(&self.path)?
                .map(|text| parse_milestone_log(&text))
                .unwrap_or_default())
        })
    }

    /// End SHA of the latest boundary, or the repository's root commit when
    /// the ledger is empty.
    pub fn last_end_sha(&self, git: &Git) -> Result<String> {
        match self.load().pop() {
            Some(last) => Ok(last.end_sha),
            None => git.root_commit().context("resolve root commit for empty ledger"),
        }
    }
}
