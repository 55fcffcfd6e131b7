//! Builder role: the producer side of the pipeline.
//!
//! Each cycle the builder records boundaries for milestones that just became
//! complete, then picks one action by precedence (fix findings, build the
//! current milestone, close or plan a story, wait for downstream roles,
//! finish). Finishing writes the sentinel that lets downstream loops drain
//! and exit.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::builder::{BuilderAction, BuilderSnapshot, next_builder_action};
use crate::core::milestones::{newly_completed_milestones, roles_caught_up};
use crate::core::parse::parse_milestones_from_text;
use crate::core::role::Role;
use crate::core::types::{MilestoneBoundary, MilestoneProgress, StoryStatus};
use crate::io::activity_log::ActivityLog;
use crate::io::best_effort::best_effort;
use crate::io::checkpoint::NameSetCheckpoint;
use crate::io::ledger::MilestoneLedger;
use crate::io::sync::refresh;
use crate::looping::{LoopOutcome, NeverDone, PollWorker, run_poll_loop};

use super::{RunOptions, Services, Workspace, ensure_succeeded, invoke_agent, publish};

/// While waiting on downstream roles, touch the activity log this often so
/// they do not mistake the wait for a dead builder.
const HEARTBEAT_EVERY: Duration = Duration::from_secs(5 * 60);

pub fn run(ws: &Workspace, services: &Services<'_>, options: &RunOptions) -> Result<LoopOutcome> {
    let mut worker = BuilderWorker::new(ws, services, options);
    worker.log.append("builder started");
    let outcome = run_poll_loop(
        &mut worker,
        &NeverDone,
        services.sleeper,
        &ws.loop_settings(options),
    )?;
    worker.log.append(&format!("builder stopped ({:?})", outcome.stop));
    Ok(outcome)
}

pub struct BuilderWorker<'a> {
    ws: &'a Workspace,
    services: &'a Services<'a>,
    log: ActivityLog,
    ledger: MilestoneLedger,
    awaiting_since: Option<Instant>,
    last_heartbeat: Option<Instant>,
    finished: bool,
}

impl<'a> BuilderWorker<'a> {
    pub fn new(ws: &'a Workspace, services: &'a Services<'a>, options: &RunOptions) -> Self {
        Self {
            ws,
            services,
            log: ws.activity_log(Role::Builder, &options.label(Role::Builder)),
            ledger: MilestoneLedger::new(&ws.paths.ledger_path),
            awaiting_since: None,
            last_heartbeat: None,
            finished: false,
        }
    }

    /// Append boundaries for milestones that became complete since the last
    /// ledger entry. Skipped while local commits are unpushed, since a later
    /// rebase would change the end SHA.
    #[instrument(skip_all)]
    fn record_completed_milestones(&self, tasks: &str) -> Result<()> {
        let progress = parse_milestones_from_text(tasks);
        let boundaries = self.ledger.load();
        let newly = newly_completed_milestones(&progress, &boundaries);
        if newly.is_empty() {
            return Ok(());
        }
        let git = &self.ws.git;
        if git.has_remote()? {
            let ahead = git.ahead_of_upstream().context("check unpushed commits")?;
            if ahead > 0 {
                info!(ahead, "milestone completion waits for a successful push");
                return Ok(());
            }
        }

        let head = git.head_sha()?;
        let mut start = self.ledger.last_end_sha(git)?;
        for name in newly {
            let boundary = MilestoneBoundary {
                name,
                start_sha: start,
                end_sha: head.clone(),
            };
            self.ledger.record(&boundary);
            self.log.append(&format!(
                "milestone complete: {} ({}..{})",
                boundary.name, boundary.start_sha, boundary.end_sha
            ));
            start = head.clone();
        }
        Ok(())
    }

    fn snapshot(&self, tasks: &str) -> Result<BuilderSnapshot> {
        let open_findings = self
            .ws
            .artifacts
            .open_findings()?
            .iter()
            .map(|f| f.count)
            .sum();
        let boundaries = self.ledger.load();
        let processed: Vec<_> = self
            .ws
            .config
            .builder
            .wait_for
            .iter()
            .map(|role| NameSetCheckpoint::new(self.ws.paths.processed_path(*role)).load())
            .collect();
        Ok(BuilderSnapshot {
            open_findings,
            milestones: parse_milestones_from_text(tasks),
            stories: self.ws.artifacts.stories()?,
            downstream_caught_up: roles_caught_up(&boundaries, processed.iter()),
        })
    }

    fn finish(&mut self, reason: &str) {
        self.ws.sentinel().create();
        self.log.append(&format!("builder finished: {reason}"));
        self.finished = true;
    }

    fn await_downstream(&mut self) {
        let now = Instant::now();
        let since = *self.awaiting_since.get_or_insert(now);
        let max_wait = Duration::from_secs(self.ws.config.builder.max_idle_wait_secs);
        if now.duration_since(since) >= max_wait {
            warn!(
                waited_secs = max_wait.as_secs(),
                "downstream roles still behind, finishing anyway"
            );
            self.finish("downstream roles did not catch up in time");
            return;
        }
        let due = self
            .last_heartbeat
            .is_none_or(|last| now.duration_since(last) >= HEARTBEAT_EVERY);
        if due {
            self.log.append("waiting for downstream roles to catch up");
            self.last_heartbeat = Some(now);
        }
    }

    fn fix_findings(&self, count: usize) -> Result<()> {
        let files: Vec<String> = self
            .ws
            .artifacts
            .open_findings()?
            .into_iter()
            .map(|f| f.file)
            .collect();
        self.log.append(&format!("fixing {count} open finding(s)"));
        let prompt = self.ws.prompts.render_fix(count, &files)?;
        let run = invoke_agent(self.ws, self.services, Role::Builder, prompt)?;
        publish(self.ws, self.services, &format!("fix: address {count} finding(s)"))?;
        ensure_succeeded(&run, "fix pass")
    }

    fn build_milestone(&self, milestone: &MilestoneProgress) -> Result<()> {
        self.log.append(&format!(
            "building milestone {} ({}/{})",
            milestone.name, milestone.done, milestone.total
        ));
        let prompt = self.ws.prompts.render_build(milestone)?;
        let run = invoke_agent(self.ws, self.services, Role::Builder, prompt)?;
        publish(self.ws, self.services, &format!("build: {}", milestone.name))?;
        ensure_succeeded(&run, "build pass")
    }

    /// Claim the story, push the claim, then let the agent write milestones.
    ///
    /// A claim that cannot be pushed lost a race with another builder and is
    /// dropped. A failed planning pass puts the story back to open.
    fn plan_story(&self, id: u32, name: &str) -> Result<()> {
        let artifacts = &self.ws.artifacts;
        if !artifacts.set_story_status(id, StoryStatus::Claimed)? {
            warn!(id, "story vanished from backlog before claim");
            return Ok(());
        }
        let claim = publish(self.ws, self.services, &format!("chore: claim story {id}"))?;
        if claim.pushed == Some(false) {
            warn!(id, "claim push failed, dropping local claim");
            let git = &self.ws.git;
            // An aborted rebase later would bring the claim commit back.
            if git.rebase_in_progress()? {
                git.rebase_abort().context("abort rebase before dropping claim")?;
            }
            git.reset_to_upstream().context("drop unpushed claim")?;
            return Ok(());
        }
        self.log.append(&format!("claimed story {id}: {name}"));

        let story = artifacts
            .stories()?
            .into_iter()
            .find(|story| story.id == id)
            .with_context(|| format!("story {id} missing after claim"))?;
        let prompt = self
            .ws
            .prompts
            .render_plan_story(&story, &artifacts.read_tasks()?)?;
        let run = invoke_agent(self.ws, self.services, Role::Builder, prompt)?;
        if let Err(err) = ensure_succeeded(&run, "story planning pass") {
            artifacts.set_story_status(id, StoryStatus::Open)?;
            publish(self.ws, self.services, &format!("chore: release story {id}"))?;
            self.log.append(&format!("planning story {id} failed, released claim"));
            return Err(err);
        }
        publish(self.ws, self.services, &format!("plan: story {id}"))?;
        Ok(())
    }

    fn complete_story(&self, id: u32, name: &str) -> Result<()> {
        if !self.ws.artifacts.set_story_status(id, StoryStatus::Done)? {
            warn!(id, "claimed story vanished from backlog");
            return Ok(());
        }
        publish(self.ws, self.services, &format!("chore: complete story {id}"))?;
        self.log.append(&format!("completed story {id}: {name}"));
        Ok(())
    }
}

impl PollWorker for BuilderWorker<'_> {
    type Item = BuilderAction;

    fn refresh(&mut self) {
        refresh(&self.ws.git);
    }

    fn pending(&mut self) -> Result<Vec<BuilderAction>> {
        let tasks = self.ws.artifacts.read_tasks()?;
        best_effort("record completed milestones", (), || {
            self.record_completed_milestones(&tasks)
        });

        let action = next_builder_action(&self.snapshot(&tasks)?);
        match action {
            BuilderAction::Finish => {
                self.finish("all stories done and downstream roles caught up");
                Ok(Vec::new())
            }
            BuilderAction::AwaitDownstream => {
                self.await_downstream();
                Ok(Vec::new())
            }
            action => {
                self.awaiting_since = None;
                Ok(vec![action])
            }
        }
    }

    fn process(&mut self, action: &BuilderAction) -> Result<()> {
        match action {
            BuilderAction::FixFindings { count } => self.fix_findings(*count),
            BuilderAction::BuildMilestone { milestone } => self.build_milestone(milestone),
            BuilderAction::PlanStory { id, name } => self.plan_story(*id, name),
            BuilderAction::CompleteStory { id, name } => self.complete_story(*id, name),
            BuilderAction::AwaitDownstream | BuilderAction::Finish => Ok(()),
        }
    }

    fn describe(&self, action: &BuilderAction) -> String {
        match action {
            BuilderAction::FixFindings { count } => format!("fix {count} finding(s)"),
            BuilderAction::BuildMilestone { milestone } => format!("build {}", milestone.name),
            BuilderAction::PlanStory { id, .. } => format!("plan story {id}"),
            BuilderAction::CompleteStory { id, .. } => format!("complete story {id}"),
            BuilderAction::AwaitDownstream => "await downstream".to_string(),
            BuilderAction::Finish => "finish".to_string(),
        }
    }

    fn finished(&self) -> bool {
        self.finished
    }
}
