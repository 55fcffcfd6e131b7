//! Coordinates LLM agent roles that collaborate on one project through git
//! history and shared markdown files.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: pure, deterministic logic (parsers, commit classifier,
//!   backlog eligibility, builder decisions). No I/O.
//! - **[`io`]**: side-effecting adapters (git and agent subprocesses,
//!   checkpoints, ledger, config, prompts).
//!
//! [`looping`] drives every long-running role through the same poll cycle;
//! [`agents`] holds the per-role workers and the role registration table.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
