//! Deterministic, pure logic shared by the convoy roles.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! text and data structures and never fail on malformed input: artifacts are
//! written by LLM sessions, so the worst outcome of bad text is "not ready".

pub mod backlog;
pub mod builder;
pub mod classifier;
pub mod milestones;
pub mod parse;
pub mod role;
pub mod signals;
pub mod types;
