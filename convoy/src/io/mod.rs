//! Side-effecting adapters: git, child processes, files under the logs root.

pub mod activity_log;
pub mod agent;
pub mod artifacts;
pub mod best_effort;
pub mod checkpoint;
pub mod clock;
pub mod config;
pub mod git;
pub mod ledger;
pub mod paths;
pub mod prereq;
pub mod process;
pub mod prompt;
pub mod push;
pub mod sentinel;
pub mod sync;
