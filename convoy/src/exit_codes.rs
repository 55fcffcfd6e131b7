//! Stable exit codes for convoy CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Unexpected failure while running a command or role loop.
pub const FATAL: i32 = 1;
/// A required tool or environment condition is missing.
pub const ENVIRONMENT: i32 = 2;
/// Invalid configuration or arguments detected by convoy itself.
pub const INVALID: i32 = 3;
