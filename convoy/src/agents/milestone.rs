//! Milestone-scoped roles: milestone-watcher, tester and validator.
//!
//! All three consume the boundary ledger, diff it against their own
//! processed-name checkpoint and run one pass per completed milestone,
//! scoped to that milestone's immutable SHA range.

use anyhow::Result;

use crate::core::milestones::find_unreviewed_milestones;
use crate::core::role::Role;
use crate::core::types::MilestoneBoundary;
use crate::io::activity_log::ActivityLog;
use crate::io::best_effort::best_effort;
use crate::io::checkpoint::NameSetCheckpoint;
use crate::io::ledger::MilestoneLedger;
use crate::io::prompt::MilestonePass;
use crate::io::sync::refresh;
use crate::looping::{LoopOutcome, PollWorker, run_poll_loop};

use super::{RunOptions, Services, Workspace, ensure_succeeded, invoke_agent, publish};

pub fn run_milestone_watcher(
    ws: &Workspace,
    services: &Services<'_>,
    options: &RunOptions,
) -> Result<LoopOutcome> {
    run_role(ws, services, options, Role::MilestoneWatcher)
}

pub fn run_tester(
    ws: &Workspace,
    services: &Services<'_>,
    options: &RunOptions,
) -> Result<LoopOutcome> {
    run_role(ws, services, options, Role::Tester)
}

pub fn run_validator(
    ws: &Workspace,
    services: &Services<'_>,
    options: &RunOptions,
) -> Result<LoopOutcome> {
    run_role(ws, services, options, Role::Validator)
}

fn run_role(
    ws: &Workspace,
    services: &Services<'_>,
    options: &RunOptions,
    role: Role,
) -> Result<LoopOutcome> {
    let mut worker = MilestoneWorker::new(ws, services, options, role)?;
    worker.log.append(&format!("{role} started"));
    let outcome = run_poll_loop(
        &mut worker,
        &ws.builder_done(),
        services.sleeper,
        &ws.loop_settings(options),
    )?;
    worker
        .log
        .append(&format!("{role} stopped ({:?})", outcome.stop));
    Ok(outcome)
}

pub struct MilestoneWorker<'a> {
    ws: &'a Workspace,
    services: &'a Services<'a>,
    role: Role,
    pass: MilestonePass,
    log: ActivityLog,
    ledger: MilestoneLedger,
    checkpoint: NameSetCheckpoint,
}

impl<'a> MilestoneWorker<'a> {
    pub fn new(
        ws: &'a Workspace,
        services: &'a Services<'a>,
        options: &RunOptions,
        role: Role,
    ) -> Result<Self> {
        let pass = match role {
            Role::MilestoneWatcher => MilestonePass::Review,
            Role::Tester => MilestonePass::Test,
            Role::Validator => MilestonePass::Validate,
            other => anyhow::bail!("{other} is not a milestone-scoped role"),
        };
        Ok(Self {
            ws,
            services,
            role,
            pass,
            log: ws.activity_log(role, &options.label(role)),
            ledger: MilestoneLedger::new(&ws.paths.ledger_path),
            checkpoint: NameSetCheckpoint::new(ws.paths.processed_path(role)),
        })
    }

    /// Where this role writes its findings, relative to the work tree.
    fn output_file(&self, boundary: &MilestoneBoundary) -> String {
        let artifacts = self.ws.artifacts.config();
        match self.pass {
            MilestonePass::Review => format!(
                "{}/milestone-{}.md",
                artifacts.reviews_dir,
                slug(&boundary.name)
            ),
            MilestonePass::Test => artifacts.bugs_file.clone(),
            MilestonePass::Validate => artifacts.validation_file.clone(),
        }
    }
}

impl PollWorker for MilestoneWorker<'_> {
    type Item = MilestoneBoundary;

    fn refresh(&mut self) {
        refresh(&self.ws.git);
    }

    fn pending(&mut self) -> Result<Vec<MilestoneBoundary>> {
        let boundaries = self.ledger.load();
        let processed = self.checkpoint.load();
        Ok(find_unreviewed_milestones(&boundaries, &processed))
    }

    fn process(&mut self, boundary: &MilestoneBoundary) -> Result<()> {
        let role = self.role;
        self.log.append(&format!(
            "{} milestone {} ({}..{})",
            role, boundary.name, boundary.start_sha, boundary.end_sha
        ));
        let diff_stat = best_effort("milestone diff stat", String::new(), || {
            self.ws.git.diff_stat(&boundary.start_sha, &boundary.end_sha)
        });
        let output_file = self.output_file(boundary);
        let prompt =
            self.ws
                .prompts
                .render_milestone_pass(self.pass, boundary, &diff_stat, &output_file)?;
        let run = invoke_agent(self.ws, self.services, role, prompt)?;
        ensure_succeeded(&run, &format!("{role} pass for {}", boundary.name))?;
        publish(
            self.ws,
            self.services,
            &format!("{role}: milestone {}", boundary.name),
        )?;
        self.checkpoint.record(&boundary.name);
        Ok(())
    }

    fn describe(&self, boundary: &MilestoneBoundary) -> String {
        format!("milestone {}", boundary.name)
    }
}

/// Lowercase ASCII alphanumerics with single dashes, for file names.
fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "milestone".to_string()
    } else {
        trimmed.to_string()
    }
}
