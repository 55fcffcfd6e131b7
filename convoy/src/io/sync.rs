//! Working-tree synchronization around each poll cycle.

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::io::best_effort::best_effort;
use crate::io::clock::Sleeper;
use crate::io::git::{Git, PushOutcome, RebaseOutcome};
use crate::io::push::{RetryPolicy, push_with_retry};

/// Result of [`commit_and_push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub committed: bool,
    /// `None` when there was nothing to push or no remote.
    pub pushed: Option<bool>,
}

/// Bring the clone up to date before looking for work.
///
/// Aborts a rebase left behind by a crash or an exhausted push retry, pulls
/// with rebase, then pushes any local commits an earlier cycle failed to
/// publish. Never fails: a stale clone just sees new work later.
#[instrument(skip_all)]
pub fn refresh(git: &Git) {
    if best_effort("check rebase state", false, || git.rebase_in_progress()) {
        warn!("aborting leftover rebase");
        best_effort("abort leftover rebase", (), || git.rebase_abort());
    }
    if !best_effort("list remotes", false, || git.has_remote()) {
        debug!("no remote configured, skipping pull");
        return;
    }
    let outcome = best_effort("pull --rebase", None, || git.pull_rebase().map(Some));
    match outcome {
        Some(RebaseOutcome::Clean) => push_leftovers(git),
        Some(RebaseOutcome::Conflict) => {
            warn!("pull --rebase conflicted during refresh, aborting");
            best_effort("abort conflicted refresh", (), || git.rebase_abort());
        }
        None => {}
    }
}

/// Push commits an earlier cycle made but could not publish.
fn push_leftovers(git: &Git) {
    let ahead = best_effort("count unpushed commits", 0, || git.ahead_of_upstream());
    if ahead == 0 {
        return;
    }
    info!(ahead, "pushing commits left over from an earlier cycle");
    match best_effort("push leftover commits", None, || git.push().map(Some)) {
        Some(PushOutcome::Pushed) => debug!("leftover commits pushed"),
        Some(PushOutcome::Rejected) => {
            warn!(ahead, "leftover push rejected; next cycle will retry")
        }
        None => {}
    }
}

/// Stage everything, commit if anything changed, and push with retry.
///
/// Local commits left unpushed by an earlier failed attempt are pushed too.
#[instrument(skip_all)]
pub fn commit_and_push<S: Sleeper + ?Sized>(
    git: &Git,
    message: &str,
    policy: &RetryPolicy,
    sleeper: &S,
) -> Result<SyncOutcome> {
    git.add_all().context("stage changes")?;
    let committed = git.commit_staged(message).context("commit changes")?;
    if committed {
        info!(message, "committed");
    }

    if !git.has_remote()? {
        return Ok(SyncOutcome {
            committed,
            pushed: None,
        });
    }
    let ahead = best_effort("count unpushed commits", 0, || git.ahead_of_upstream());
    if !committed && ahead == 0 {
        return Ok(SyncOutcome {
            committed,
            pushed: None,
        });
    }
    let pushed = push_with_retry(git, policy, sleeper);
    if !pushed {
        warn!(max_attempts = policy.max_attempts, "push gave up; next cycle will retry");
    }
    Ok(SyncOutcome {
        committed,
        pushed: Some(pushed),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::clock::RecordingSleeper;
    use crate::test_support::TestRepo;
    use std::fs;

    #[test]
    fn commits_locally_without_remote() {
        let repo = TestRepo::new().expect("repo");
        let git = Git::new(repo.path());
        fs::write(repo.path().join("notes.md"), "hello\n").expect("write");

        let outcome = commit_and_push(
            &git,
            "docs: notes",
            &RetryPolicy::default(),
            &RecordingSleeper::new(),
        )
        .expect("sync");
        assert_eq!(
            outcome,
            SyncOutcome {
                committed: true,
                pushed: None
            }
        );
        let again = commit_and_push(
            &git,
            "docs: notes",
            &RetryPolicy::default(),
            &RecordingSleeper::new(),
        )
        .expect("sync");
        assert!(!again.committed);
    }

    #[test]
    fn pushes_and_other_clone_sees_it_after_refresh() {
        let repo = TestRepo::with_remote().expect("repo");
        let other = repo.clone_remote("reviewer").expect("clone");
        let git = Git::new(repo.path());
        fs::write(repo.path().join("code.rs"), "fn a() {}\n").expect("write");

        let outcome = commit_and_push(
            &git,
            "feat: a",
            &RetryPolicy::default(),
            &RecordingSleeper::new(),
        )
        .expect("sync");
        assert_eq!(outcome.pushed, Some(true));

        let other_git = Git::new(other.path());
        refresh(&other_git);
        assert_eq!(
            other_git.head_sha().expect("head"),
            git.head_sha().expect("head")
        );
    }

    #[test]
    fn diverged_clones_both_land() {
        let repo = TestRepo::with_remote().expect("repo");
        let other = repo.clone_remote("tester").expect("clone");
        let git = Git::new(repo.path());
        let other_git = Git::new(other.path());
        let sleeper = RecordingSleeper::new();

        fs::write(repo.path().join("a.rs"), "a\n").expect("write");
        commit_and_push(&git, "feat: a", &RetryPolicy::default(), &sleeper).expect("sync a");
        fs::write(other.path().join("b.rs"), "b\n").expect("write");
        let outcome =
            commit_and_push(&other_git, "test: b", &RetryPolicy::default(), &sleeper)
                .expect("sync b");

        assert_eq!(outcome.pushed, Some(true));
        refresh(&git);
        assert!(repo.path().join("b.rs").exists());
    }

    #[test]
    fn refresh_publishes_commits_a_rejected_push_left_behind() {
        let repo = TestRepo::with_remote().expect("repo");
        let hook = repo.reject_pushes().expect("hook");
        let git = Git::new(repo.path());
        fs::write(repo.path().join("BUGS.md"), "- [ ] crash\n").expect("write");
        let policy = RetryPolicy {
            max_attempts: 1,
            backoff: std::time::Duration::ZERO,
        };

        let outcome =
            commit_and_push(&git, "tester: milestone Setup", &policy, &RecordingSleeper::new())
                .expect("sync");
        assert_eq!(outcome.pushed, Some(false));
        assert_eq!(git.ahead_of_upstream().expect("ahead"), 1);

        fs::remove_file(hook).expect("remove hook");
        refresh(&git);
        assert_eq!(git.ahead_of_upstream().expect("ahead"), 0);
        let other = repo.clone_remote("builder-2").expect("clone");
        assert!(other.path().join("BUGS.md").exists());
    }
}
