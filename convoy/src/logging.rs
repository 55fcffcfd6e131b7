//! Diagnostic tracing for the convoy binary.
//!
//! - **Tracing (this module)**: operator diagnostics via `RUST_LOG`, written
//!   to stderr. Not persisted.
//! - **Activity logs (`io/activity_log`)**: per-role product logs under the
//!   shared `logs/` directory. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "convoy=info";

/// Install the stderr subscriber.
///
/// Reads `RUST_LOG`; defaults to `convoy=info`.
///
/// ```bash
/// RUST_LOG=convoy=debug convoy run reviewer --once
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
