//! Agent roles and how each one checkpoints its progress.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    Planner,
    Builder,
    Reviewer,
    MilestoneWatcher,
    Tester,
    Validator,
}

/// Durable progress marker shape for a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointShape {
    /// No checkpoint (one-shot or producer roles).
    None,
    /// Single last-processed commit SHA.
    LastSha,
    /// Append-only set of processed milestone names.
    ProcessedNames,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Planner,
        Role::Builder,
        Role::Reviewer,
        Role::MilestoneWatcher,
        Role::Tester,
        Role::Validator,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Planner => "planner",
            Role::Builder => "builder",
            Role::Reviewer => "reviewer",
            Role::MilestoneWatcher => "milestone-watcher",
            Role::Tester => "tester",
            Role::Validator => "validator",
        }
    }

    pub fn checkpoint_shape(self) -> CheckpointShape {
        match self {
            Role::Planner | Role::Builder => CheckpointShape::None,
            Role::Reviewer => CheckpointShape::LastSha,
            Role::MilestoneWatcher | Role::Tester | Role::Validator => {
                CheckpointShape::ProcessedNames
            }
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Role::ALL.iter().map(|r| r.as_str()).collect();
                format!("unknown role '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

static AGENT_DIR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(planner|builder|reviewer|milestone-watcher|tester|validator)(-\d+)?$").unwrap()
});

/// True for per-agent clone directory names such as `builder` or `reviewer-3`.
pub fn is_agent_dir_name(name: &str) -> bool {
    AGENT_DIR_RE.is_match(name)
}
