//! `convoy status`: a read-only snapshot of the coordination state.

use std::fmt::Write as _;

use anyhow::Result;
use serde::Serialize;

use crate::agents::Workspace;
use crate::core::backlog::{
    claimed_story, next_eligible_story, permanently_blocked, validate_backlog,
};
use crate::core::builder::{BuilderAction, BuilderSnapshot, next_builder_action};
use crate::core::classifier::classify_commit;
use crate::core::milestones::{find_unreviewed_milestones, roles_caught_up};
use crate::core::parse::{get_current_milestone_progress, parse_milestones_from_text};
use crate::core::role::{CheckpointShape, Role};
use crate::core::types::{MilestoneBoundary, MilestoneProgress, Story};
use crate::io::artifacts::OpenFindings;
use crate::io::best_effort::best_effort;
use crate::io::checkpoint::{NameSetCheckpoint, ShaCheckpoint};
use crate::io::ledger::MilestoneLedger;
use crate::io::sentinel::DoneSignal;

#[derive(Debug, Clone, Serialize)]
pub struct RoleStatus {
    pub role: Role,
    /// Commits (reviewer) or milestones (milestone-scoped roles) not yet processed.
    pub pending: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub workdir: String,
    pub logs_dir: String,
    pub milestones: Vec<MilestoneProgress>,
    pub current_milestone: Option<MilestoneProgress>,
    pub next_story: Option<Story>,
    pub claimed_story: Option<Story>,
    pub blocked_stories: Vec<u32>,
    pub backlog_issues: Vec<String>,
    pub open_findings: Vec<OpenFindings>,
    pub ledger: Vec<MilestoneBoundary>,
    pub roles: Vec<RoleStatus>,
    pub sentinel: bool,
    pub builder_done: bool,
    pub next_builder_action: BuilderAction,
}

/// Gather the report without modifying the working tree or any checkpoint.
pub fn collect_status(ws: &Workspace) -> Result<StatusReport> {
    let tasks = ws.artifacts.read_tasks()?;
    let milestones = parse_milestones_from_text(&tasks);
    let stories = ws.artifacts.stories()?;
    let open_findings = ws.artifacts.open_findings()?;
    let ledger = MilestoneLedger::new(&ws.paths.ledger_path).load();

    let roles: Vec<RoleStatus> = Role::ALL
        .into_iter()
        .map(|role| RoleStatus {
            role,
            pending: pending_for(ws, role, &ledger),
        })
        .collect();

    let processed: Vec<_> = ws
        .config
        .builder
        .wait_for
        .iter()
        .map(|role| NameSetCheckpoint::new(ws.paths.processed_path(*role)).load())
        .collect();
    let snapshot = BuilderSnapshot {
        open_findings: open_findings.iter().map(|f| f.count).sum(),
        milestones: milestones.clone(),
        stories: stories.clone(),
        downstream_caught_up: roles_caught_up(&ledger, processed.iter()),
    };

    Ok(StatusReport {
        workdir: ws.paths.workdir.display().to_string(),
        logs_dir: ws.paths.logs_dir.display().to_string(),
        current_milestone: get_current_milestone_progress(&tasks),
        milestones,
        next_story: next_eligible_story(&stories).cloned(),
        claimed_story: claimed_story(&stories).cloned(),
        blocked_stories: permanently_blocked(&stories).iter().map(|s| s.id).collect(),
        backlog_issues: validate_backlog(&stories),
        open_findings,
        ledger,
        roles,
        sentinel: ws.sentinel().exists(),
        builder_done: ws.builder_done().is_done(),
        next_builder_action: next_builder_action(&snapshot),
    })
}

fn pending_for(ws: &Workspace, role: Role, ledger: &[MilestoneBoundary]) -> Option<usize> {
    match role.checkpoint_shape() {
        CheckpointShape::None => None,
        CheckpointShape::ProcessedNames => {
            let processed = NameSetCheckpoint::new(ws.paths.processed_path(role)).load();
            Some(find_unreviewed_milestones(ledger, &processed).len())
        }
        CheckpointShape::LastSha => Some(best_effort("count unreviewed commits", 0, || {
            let since = ShaCheckpoint::new(&ws.paths.reviewer_checkpoint_path)
                .load()
                .filter(|sha| ws.git.commit_exists(sha));
            let rules = ws.config.classifier_rules();
            let commits = ws.git.commits_since(since.as_deref())?;
            Ok(commits
                .iter()
                .filter(|commit| !classify_commit(commit, &rules).is_skip())
                .count())
        })),
    }
}

/// Human-readable rendering for the terminal.
pub fn render_text(report: &StatusReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "workdir: {}", report.workdir);
    let _ = writeln!(out, "logs:    {}", report.logs_dir);

    let _ = writeln!(out, "\nmilestones:");
    if report.milestones.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for m in &report.milestones {
        let mark = if m.is_complete() { "x" } else { " " };
        let _ = writeln!(out, "  [{mark}] {} ({}/{})", m.name, m.done, m.total);
    }

    let _ = writeln!(out, "\nbacklog:");
    match &report.claimed_story {
        Some(story) => {
            let _ = writeln!(out, "  claimed: {}. {}", story.id, story.name);
        }
        None => {
            let _ = writeln!(out, "  claimed: -");
        }
    }
    match &report.next_story {
        Some(story) => {
            let _ = writeln!(out, "  next:    {}. {}", story.id, story.name);
        }
        None => {
            let _ = writeln!(out, "  next:    -");
        }
    }
    if !report.blocked_stories.is_empty() {
        let ids: Vec<String> = report.blocked_stories.iter().map(u32::to_string).collect();
        let _ = writeln!(out, "  blocked: {}", ids.join(", "));
    }
    for issue in &report.backlog_issues {
        let _ = writeln!(out, "  issue:   {issue}");
    }

    let _ = writeln!(out, "\nopen findings:");
    if report.open_findings.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for f in &report.open_findings {
        let _ = writeln!(out, "  {}: {}", f.file, f.count);
    }

    let _ = writeln!(out, "\nledger:");
    if report.ledger.is_empty() {
        let _ = writeln!(out, "  (empty)");
    }
    for b in &report.ledger {
        let _ = writeln!(out, "  {} {}..{}", b.name, short(&b.start_sha), short(&b.end_sha));
    }

    let _ = writeln!(out, "\npending:");
    for r in &report.roles {
        if let Some(pending) = r.pending {
            let _ = writeln!(out, "  {:<18} {pending}", r.role.as_str());
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "builder: {} (sentinel {})",
        if report.builder_done { "done" } else { "running" },
        if report.sentinel { "present" } else { "absent" }
    );
    let _ = writeln!(out, "next builder action: {}", describe_action(&report.next_builder_action));
    out
}

fn describe_action(action: &BuilderAction) -> String {
    match action {
        BuilderAction::FixFindings { count } => format!("fix {count} finding(s)"),
        BuilderAction::BuildMilestone { milestone } => format!(
            "build milestone {} ({}/{})",
            milestone.name, milestone.done, milestone.total
        ),
        BuilderAction::CompleteStory { id, name } => format!("complete story {id}. {name}"),
        BuilderAction::PlanStory { id, name } => format!("plan story {id}. {name}"),
        BuilderAction::AwaitDownstream => "wait for downstream roles".to_string(),
        BuilderAction::Finish => "finish".to_string(),
    }
}

fn short(sha: &str) -> &str {
    &sha[..sha.len().min(8)]
}
