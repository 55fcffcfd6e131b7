//! Best-effort persistence.
//!
//! Checkpoints, the ledger, the sentinel and activity logs must never take a
//! role down: a lost write degrades to reprocessing, which every consumer
//! tolerates. [`best_effort`] is the one place that policy lives.

use anyhow::Result;
use tracing::warn;

/// Run `op`; on any error log a warning naming `what` and return `default`.
pub fn best_effort<T>(what: &str, default: T, op: impl FnOnce() -> Result<T>) -> T {
    match op() {
        Ok(value) => value,
        Err(err) => {
            warn!(what, err = %format!("{err:#}"), "best-effort operation failed");
            default
        }
    }
}
