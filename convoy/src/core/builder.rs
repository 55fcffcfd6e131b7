//! The builder's next-action decision.

use serde::Serialize;

use crate::core::backlog::{claimed_story, next_eligible_story};
use crate::core::types::{MilestoneProgress, Story};

/// Everything the builder reads before choosing what to do next.
#[derive(Debug, Clone, Default)]
pub struct BuilderSnapshot {
    /// Unchecked items across bug, review and validation files.
    pub open_findings: usize,
    pub milestones: Vec<MilestoneProgress>,
    pub stories: Vec<Story>,
    /// Every awaited role has processed every ledger entry.
    pub downstream_caught_up: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BuilderAction {
    FixFindings { count: usize },
    BuildMilestone { milestone: MilestoneProgress },
    CompleteStory { id: u32, name: String },
    PlanStory { id: u32, name: String },
    AwaitDownstream,
    Finish,
}

/// Pick the builder's next action. Precedence, highest first:
/// findings, current milestone, claimed story wrap-up, next eligible story,
/// waiting on downstream roles, finishing.
pub fn next_builder_action(snapshot: &BuilderSnapshot) -> BuilderAction {
    if snapshot.open_findings > 0 {
        return BuilderAction::FixFindings {
            count: snapshot.open_findings,
        };
    }
    if let Some(milestone) = snapshot.milestones.iter().find(|m| m.done < m.total) {
        return BuilderAction::BuildMilestone {
            milestone: milestone.clone(),
        };
    }
    if let Some(story) = claimed_story(&snapshot.stories) {
        return BuilderAction::CompleteStory {
            id: story.id,
            name: story.name.clone(),
        };
    }
    if let Some(story) = next_eligible_story(&snapshot.stories) {
        return BuilderAction::PlanStory {
            id: story.id,
            name: story.name.clone(),
        };
    }
    if !snapshot.downstream_caught_up {
        return BuilderAction::AwaitDownstream;
    }
    BuilderAction::Finish
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::parse::{parse_backlog, parse_milestones_from_text};

    fn snapshot(findings: usize, tasks: &str, backlog: &str, caught_up: bool) -> BuilderSnapshot {
        BuilderSnapshot {
            open_findings: findings,
            milestones: parse_milestones_from_text(tasks),
            stories: parse_backlog(backlog),
            downstream_caught_up: caught_up,
        }
    }

    #[test]
    fn findings_take_precedence() {
        let s = snapshot(2, "## Milestone: A\n- [ ] a\n", "1. [ ] A\n", false);
        assert_eq!(next_builder_action(&s), BuilderAction::FixFindings { count: 2 });
    }

    #[test]
    fn builds_current_milestone_before_stories() {
        let s = snapshot(0, "## Milestone: A\n- [x] a\n- [ ] b\n", "1. [~] A\n", true);
        match next_builder_action(&s) {
            BuilderAction::BuildMilestone { milestone } => assert_eq!(milestone.name, "A"),
            other => panic!("unexpected action {other:?}"),
        }
    }

    #[test]
    fn completes_claimed_story_when_milestones_done() {
        let s = snapshot(0, "## Milestone: A\n- [x] a\n", "1. [~] First\n2. [ ] Second\n", true);
        assert_eq!(
            next_builder_action(&s),
            BuilderAction::CompleteStory {
                id: 1,
                name: "First".to_string()
            }
        );
    }

    #[test]
    fn plans_next_eligible_story() {
        let s = snapshot(0, "", "1. [x] First\n2. [ ] Second <!-- depends: 1 -->\n", true);
        assert_eq!(
            next_builder_action(&s),
            BuilderAction::PlanStory {
                id: 2,
                name: "Second".to_string()
            }
        );
    }

    #[test]
    fn waits_for_downstream_then_finishes() {
        let waiting = snapshot(0, "", "1. [x] First\n", false);
        assert_eq!(next_builder_action(&waiting), BuilderAction::AwaitDownstream);
        let done = snapshot(0, "", "1. [x] First\n", true);
        assert_eq!(next_builder_action(&done), BuilderAction::Finish);
    }

    #[test]
    fn blocked_backlog_does_not_stall_finish() {
        let s = snapshot(0, "", "1. [ ] Orphan <!-- depends: 7 -->\n", true);
        assert_eq!(next_builder_action(&s), BuilderAction::Finish);
    }
}
