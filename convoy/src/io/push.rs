//! Pull-rebase/push loop with conflict abort and fixed backoff.
//!
//! ```text
//! PULL_REBASE -> Clean    -> PUSH -> Pushed   -> done(true)
//!                                 -> Rejected -> BACKOFF -> PULL_REBASE
//!             -> Conflict -> ABORT -> BACKOFF -> PULL_REBASE
//! ```
//!
//! Aborting and backing off only happen when another attempt follows; after
//! the last attempt the engine returns `false` and the next poll cycle's
//! refresh clears any rebase still in progress.

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::io::clock::Sleeper;
use crate::io::git::{Git, PushOutcome, RebaseOutcome};

/// The git operations the retry engine drives.
pub trait SyncRemote {
    fn pull_rebase(&self) -> Result<RebaseOutcome>;
    fn rebase_abort(&self) -> Result<()>;
    fn push(&self) -> Result<PushOutcome>;
}

impl SyncRemote for Git {
    fn pull_rebase(&self) -> Result<RebaseOutcome> {
        Git::pull_rebase(self)
    }

    fn rebase_abort(&self) -> Result<()> {
        Git::rebase_abort(self)
    }

    fn push(&self) -> Result<PushOutcome> {
        Git::push(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
        }
    }
}

/// Integrate upstream changes and push, retrying a bounded number of times.
///
/// Returns `false` once attempts are exhausted; callers log and carry on.
pub fn push_with_retry<R: SyncRemote, S: Sleeper + ?Sized>(
    remote: &R,
    policy: &RetryPolicy,
    sleeper: &S,
) -> bool {
    let max_attempts = policy.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        let retry_follows = attempt < max_attempts;
        match remote.pull_rebase() {
            Ok(RebaseOutcome::Clean) => {}
            Ok(RebaseOutcome::Conflict) => {
                warn!(attempt, max_attempts, "rebase conflict");
                if retry_follows {
                    if let Err(e) = remote.rebase_abort() {
                        warn!(err = %e, "rebase --abort failed");
                    }
                    sleeper.sleep(policy.backoff);
                }
                continue;
            }
            Err(e) => {
                warn!(attempt, max_attempts, err = %e, "pull --rebase failed");
                if retry_follows {
                    sleeper.sleep(policy.backoff);
                }
                continue;
            }
        }

        match remote.push() {
            Ok(PushOutcome::Pushed) => {
                info!(attempt, "pushed");
                return true;
            }
            Ok(PushOutcome::Rejected) => warn!(attempt, max_attempts, "push rejected"),
            Err(e) => warn!(attempt, max_attempts, err = %e, "push failed"),
        }
        if retry_follows {
            sleeper.sleep(policy.backoff);
        }
    }
    debug!(max_attempts, "push attempts exhausted");
    false
}
