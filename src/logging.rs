//! Log subscriber setup for binaries.
//!
//! Library code only emits `tracing` events; installing a subscriber is
//! the caller's job.

use tracing_subscriber::EnvFilter;

/// Environment variable holding the filter directive (e.g. `flexstore=debug`).
pub const LOG_ENV: &str = "FLEXSTORE_LOG";

/// Install a stderr subscriber. A second call is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
