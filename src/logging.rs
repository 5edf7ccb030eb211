use std::io;

use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "SUBTRACK_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

/// Installs the stderr subscriber. Filter comes from `SUBTRACK_LOG`, then `RUST_LOG`.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    // A subscriber may already be installed when running under a test harness.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .try_init();
}
