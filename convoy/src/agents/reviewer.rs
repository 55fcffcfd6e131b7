//! Commit reviewer: one review pass per reviewable commit.

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::classifier::{ClassifierRules, classify_commit};
use crate::core::role::Role;
use crate::core::types::CommitInfo;
use crate::io::activity_log::ActivityLog;
use crate::io::checkpoint::ShaCheckpoint;
use crate::io::sync::refresh;
use crate::looping::{LoopOutcome, PollWorker, run_poll_loop};

use super::{RunOptions, Services, Workspace, ensure_succeeded, invoke_agent, publish};

pub fn run(ws: &Workspace, services: &Services<'_>, options: &RunOptions) -> Result<LoopOutcome> {
    let mut worker = ReviewerWorker::new(ws, services, options);
    worker.log.append("reviewer started");
    let outcome = run_poll_loop(
        &mut worker,
        &ws.builder_done(),
        services.sleeper,
        &ws.loop_settings(options),
    )?;
    worker.log.append(&format!("reviewer stopped ({:?})", outcome.stop));
    Ok(outcome)
}

pub struct ReviewerWorker<'a> {
    ws: &'a Workspace,
    services: &'a Services<'a>,
    log: ActivityLog,
    checkpoint: ShaCheckpoint,
    rules: ClassifierRules,
}

impl<'a> ReviewerWorker<'a> {
    pub fn new(ws: &'a Workspace, services: &'a Services<'a>, options: &RunOptions) -> Self {
        Self {
            ws,
            services,
            log: ws.activity_log(Role::Reviewer, &options.label(Role::Reviewer)),
            checkpoint: ShaCheckpoint::new(&ws.paths.reviewer_checkpoint_path),
            rules: ws.config.classifier_rules(),
        }
    }

    /// Checkpointed SHA if this clone knows it; otherwise start from the
    /// beginning of history.
    fn since(&self) -> Option<String> {
        let sha = self.checkpoint.load()?;
        if self.ws.git.commit_exists(&sha) {
            return Some(sha);
        }
        warn!(sha, "checkpoint commit not found, rescanning full history");
        None
    }
}

impl PollWorker for ReviewerWorker<'_> {
    type Item = CommitInfo;

    fn refresh(&mut self) {
        refresh(&self.ws.git);
    }

    fn pending(&mut self) -> Result<Vec<CommitInfo>> {
        let since = self.since();
        self.ws.git.commits_since(since.as_deref())
    }

    fn process(&mut self, commit: &CommitInfo) -> Result<()> {
        let class = classify_commit(commit, &self.rules);
        if class.is_skip() {
            debug!(sha = %commit.short_sha(), ?class, "skipping commit");
            self.checkpoint.save(&commit.sha);
            return Ok(());
        }

        self.log
            .append(&format!("reviewing {} {}", commit.short_sha(), commit.subject));
        let prompt = self.ws.prompts.render_review_commit(commit)?;
        let run = invoke_agent(self.ws, self.services, Role::Reviewer, prompt)?;
        ensure_succeeded(&run, "commit review")?;
        publish(
            self.ws,
            self.services,
            &format!("review: {}", commit.short_sha()),
        )?;
        self.checkpoint.save(&commit.sha);
        Ok(())
    }

    fn describe(&self, commit: &CommitInfo) -> String {
        format!("{} {}", commit.short_sha(), commit.subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::agent::AgentRun;
    use crate::io::clock::RecordingSleeper;
    use crate::test_support::{ScriptedAgent, TestRepo, workspace_for};
    use std::fs;

    #[test]
    fn reviews_code_commits_and_skips_coordination() {
        let repo = TestRepo::new().expect("repo");
        repo.commit_file("src/lib.rs", "pub fn a() {}\n", "feat: a").expect("commit");
        repo.commit_file("TASKS.md", "## Milestone: A\n- [x] a\n", "chore: tasks")
            .expect("commit");
        let ws = workspace_for(repo.path()).expect("workspace");

        let review_dir = repo.path().join("reviews");
        let agent = ScriptedAgent::new(Vec::new());
        agent.push_action(move |_| {
            fs::create_dir_all(&review_dir).expect("mkdir");
            fs::write(review_dir.join("a.md"), "- [ ] missing test\n").expect("finding");
            AgentRun::success()
        });
        let sleeper = RecordingSleeper::new();
        let services = Services {
            agent: &agent,
            reauth: None,
            sleeper: &sleeper,
        };
        let options = RunOptions {
            once: true,
            instance: None,
        };

        let outcome = run(&ws, &services, &options).expect("cycle");
        // initial commit, feat, tasks
        assert_eq!(outcome.processed, 3);
        // Only the code commits reach the agent; the tasks commit is skipped.
        let prompts: Vec<String> = agent.requests().into_iter().map(|r| r.prompt).collect();
        assert!(prompts.iter().any(|p| p.contains("feat: a")));
        assert!(!prompts.iter().any(|p| p.contains("chore: tasks")));

        // The reviewer's own findings commit is skipped on the next cycle.
        let before = agent.requests().len();
        let outcome = run(&ws, &services, &options).expect("cycle");
        assert_eq!(outcome.processed, 1);
        assert_eq!(agent.requests().len(), before);
        assert!(ws.paths.reviewer_checkpoint_path.exists());
    }

    #[test]
    fn failed_review_is_not_checkpointed() {
        let repo = TestRepo::new().expect("repo");
        repo.commit_file("src/lib.rs", "pub fn a() {}\n", "feat: a").expect("commit");
        let ws = workspace_for(repo.path()).expect("workspace");
        let head = ws.git.head_sha().expect("head");
        ShaCheckpoint::new(&ws.paths.reviewer_checkpoint_path)
            .save(&ws.git.root_commit().expect("root"));

        let agent = ScriptedAgent::new(vec![AgentRun::failed(1)]);
        let sleeper = RecordingSleeper::new();
        let services = Services {
            agent: &agent,
            reauth: None,
            sleeper: &sleeper,
        };
        let outcome = run(
            &ws,
            &services,
            &RunOptions {
                once: true,
                instance: None,
            },
        )
        .expect("cycle");

        assert_eq!(outcome.failed, 1);
        let checkpoint = ShaCheckpoint::new(&ws.paths.reviewer_checkpoint_path).load();
        assert_ne!(checkpoint.as_deref(), Some(head.as_str()));
    }
}
