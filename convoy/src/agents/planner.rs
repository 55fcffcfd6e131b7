//! One-shot planner pass: extend the backlog from a brief.

use anyhow::{Result, bail};
use tracing::warn;

use crate::core::backlog::validate_backlog;
use crate::core::parse::parse_backlog;
use crate::core::role::Role;
use crate::io::sync::refresh;

use super::{Services, Workspace, ensure_succeeded, invoke_agent, publish};

/// Summary of a planner pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOutcome {
    pub stories_before: usize,
    pub stories_after: usize,
    /// Problems in the resulting backlog, for the user to fix.
    pub issues: Vec<String>,
}

pub fn run_plan(ws: &Workspace, services: &Services<'_>, brief: &str) -> Result<PlanOutcome> {
    if brief.trim().is_empty() {
        bail!("plan brief is empty");
    }
    let log = ws.activity_log(Role::Planner, Role::Planner.as_str());
    refresh(&ws.git);

    let before = ws.artifacts.read_backlog()?;
    let stories_before = parse_backlog(&before).len();
    log.append(&format!("planning from brief ({stories_before} stories so far)"));

    let prompt = ws.prompts.render_plan(brief, &before)?;
    let run = invoke_agent(ws, services, Role::Planner, prompt)?;
    ensure_succeeded(&run, "planner pass")?;

    let stories = ws.artifacts.stories()?;
    let issues = validate_backlog(&stories);
    for issue in &issues {
        warn!(issue = %issue, "backlog issue");
    }
    publish(ws, services, "plan: extend backlog")?;
    log.append(&format!(
        "backlog now has {} stories ({} issue(s))",
        stories.len(),
        issues.len()
    ));
    Ok(PlanOutcome {
        stories_before,
        stories_after: stories.len(),
        issues,
    })
}
