//! Logging setup for the binary.
//!
//! The library logs through the `log` facade; this installs a
//! `tracing-subscriber` formatter on stderr that also picks up those records.
//! `RUST_LOG` overrides the default level (e.g. `RUST_LOG=tryon_view=debug`).

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Calling it twice is harmless.
pub fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .try_init();

    if let Err(e) = result {
        log::debug!("Logging already initialised: {}", e);
    }
}
