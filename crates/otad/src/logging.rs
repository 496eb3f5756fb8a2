//! Tracing setup shared by otad and otactl.
//!
//! `RUST_LOG` wins when set; otherwise `info`, or `debug` with `verbose`.
//! Output goes to stderr so otactl can keep stdout for command results.

use tracing_subscriber::EnvFilter;

pub fn init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // Ignore a second init (tests, embedded use)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
