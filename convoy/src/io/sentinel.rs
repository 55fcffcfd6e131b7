//! "Builder finished" signal.
//!
//! Downstream roles treat the builder as done when the sentinel file exists,
//! or when the builder's activity log has gone quiet for longer than the
//! staleness threshold (the builder crashed without writing the sentinel).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use tracing::{debug, info};

use crate::core::signals::is_stale;
use crate::io::best_effort::best_effort;
use crate::io::checkpoint::ensure_parent;

#[derive(Debug, Clone)]
pub struct Sentinel {
    path: PathBuf,
}

impl Sentinel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Create the sentinel with a human-readable timestamp. Never rewritten.
    pub fn create(&self) {
        if self.exists() {
            return;
        }
        best_effort("create builder sentinel", (), || {
            ensure_parent(&self.path)?;
            let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
            fs::write(&self.path, format!("builder finished at {stamp}\n"))
                .with_context(|| format!("write {}", self.path.display()))?;
            info!(path = %self.path.display(), "builder sentinel created");
            Ok(())
        });
    }

    /// Remove the sentinel to start a new cycle. Returns whether one existed.
    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("remove {}", self.path.display())),
        }
    }
}

/// Whether the builder is done, as seen by a downstream role.
pub trait DoneSignal {
    fn is_done(&self) -> bool;
}

/// Sentinel present, or every builder liveness file stale.
///
/// Liveness files are the builder's activity log plus anything else it keeps
/// writing while alive, such as the agent transcript during a long pass.
#[derive(Debug, Clone)]
pub struct BuilderDone {
    sentinel: Sentinel,
    liveness: Vec<PathBuf>,
    stale_after: Duration,
}

impl BuilderDone {
    pub fn new(sentinel: Sentinel, builder_log: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            sentinel,
            liveness: vec![builder_log.into()],
            stale_after,
        }
    }

    /// Also treat writes to `path` as a sign of life.
    pub fn with_liveness_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.liveness.push(path.into());
        self
    }

    pub fn is_done_at(&self, now: SystemTime) -> bool {
        if self.sentinel.exists() {
            return true;
        }
        // No file yet means the builder has not started, not that it died.
        let newest = self
            .liveness
            .iter()
            .filter_map(|path| fs::metadata(path).and_then(|meta| meta.modified()).ok())
            .max();
        match newest {
            Some(modified) if is_stale(modified, now, self.stale_after) => {
                debug!(files = ?self.liveness, "builder liveness files stale");
                true
            }
            _ => false,
        }
    }
}

impl DoneSignal for BuilderDone {
    fn is_done(&self) -> bool {
        self.is_done_at(SystemTime::now())
    }
}
