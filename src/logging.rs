//! Process-wide tracing setup.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber for the process.
///
/// `RUST_LOG` wins when set; otherwise `default_level` (for example `"info"`
/// or `"peril_pubsub=debug"`) is used. Calling this more than once is
/// harmless.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    // try_init so tests and embedding applications can call this repeatedly
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
