//! Tracing subscriber setup.
//!
//! The engine itself only *emits* `tracing` events; installing a
//! subscriber is the embedding application's call. These helpers cover the
//! common case of a formatted stderr subscriber filtered by `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Installs a formatted subscriber filtered by `RUST_LOG`, defaulting to
/// `info` when the variable is unset or invalid.
///
/// Safe to call more than once: a subscriber that is already installed
/// wins and later calls are no-ops.
pub fn init_tracing() {
    init_tracing_with_filter("info");
}

/// Installs a formatted subscriber with an explicit fallback filter used
/// when `RUST_LOG` is unset or invalid.
pub fn init_tracing_with_filter(fallback: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
