//! Liveness and agent-output signals.

use std::time::{Duration, SystemTime};

/// Output markers that mean the agent's credentials expired mid-session.
const AUTH_EXPIRED_MARKERS: [&str; 4] = [
    "oauth token has expired",
    "authentication_error",
    "invalid api key",
    "please run /login",
];

/// A recognized condition in agent output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentSignal {
    AuthExpired,
}

pub fn detect_agent_signal(line: &str) -> Option<AgentSignal> {
    let lower = line.to_lowercase();
    AUTH_EXPIRED_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
        .then_some(AgentSignal::AuthExpired)
}

/// True if `modified` is older than `threshold` relative to `now`.
///
/// A timestamp in the future (clock skew between clones) is never stale.
pub fn is_stale(modified: SystemTime, now: SystemTime, threshold: Duration) -> bool {
    match now.duration_since(modified) {
        Ok(age) => age > threshold,
        Err(_) => false,
    }
}
