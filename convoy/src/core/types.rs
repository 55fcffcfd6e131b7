//! Shared deterministic types for convoy core logic.
//!
//! These types define the contracts between the parsers, the classifier and the
//! role drivers. They carry no I/O handles and compare by value.

use std::collections::BTreeSet;

use serde::Serialize;

/// Lifecycle of a backlog story.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoryStatus {
    Open,
    Claimed,
    Done,
}

impl StoryStatus {
    /// Checkbox marker used in the backlog file.
    pub fn marker(self) -> char {
        match self {
            StoryStatus::Open => ' ',
            StoryStatus::Claimed => '~',
            StoryStatus::Done => 'x',
        }
    }

    pub fn from_marker(marker: char) -> Option<Self> {
        match marker {
            ' ' => Some(StoryStatus::Open),
            '~' => Some(StoryStatus::Claimed),
            'x' | 'X' => Some(StoryStatus::Done),
            _ => None,
        }
    }
}

/// One numbered backlog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Story {
    pub id: u32,
    pub name: String,
    pub depends_on: BTreeSet<u32>,
    pub status: StoryStatus,
}

/// A single checklist line inside a milestone section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskItem {
    pub text: String,
    pub done: bool,
}

/// A `## Milestone:` section with its ordered tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Milestone {
    pub name: String,
    pub tasks: Vec<TaskItem>,
}

impl Milestone {
    pub fn progress(&self) -> MilestoneProgress {
        MilestoneProgress {
            name: self.name.clone(),
            done: self.tasks.iter().filter(|task| task.done).count(),
            total: self.tasks.len(),
        }
    }
}

/// Checkbox counts for a milestone. `done <= total` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MilestoneProgress {
    pub name: String,
    pub done: usize,
    pub total: usize,
}

impl MilestoneProgress {
    /// Complete iff every task is checked and there is at least one task.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.done == self.total
    }
}

/// A completed milestone's commit range, as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MilestoneBoundary {
    pub name: String,
    pub start_sha: String,
    pub end_sha: String,
}

/// Commit metadata the classifier needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitInfo {
    pub sha: String,
    pub parents: Vec<String>,
    pub subject: String,
    pub files: Vec<String>,
}

impl CommitInfo {
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    pub fn short_sha(&self) -> &str {
        let end = self.sha.len().min(8);
        &self.sha[..end]
    }
}

/// What the commit reviewer should do with a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitClass {
    Review,
    SkipMerge,
    SkipSelf,
    SkipCoordination,
}

impl CommitClass {
    pub fn is_skip(self) -> bool {
        self != CommitClass::Review
    }
}
