//! Process-wide tracing setup.
//!
//! The crate itself only emits through the `tracing` macros and never
//! assumes a subscriber is installed. Binaries and integration harnesses
//! call [`init`] once at startup; `RUST_LOG` overrides the default level.

use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber at `info` unless `RUST_LOG` says
/// otherwise. Safe to call more than once: later calls are no-ops, so
/// every test can call it without coordination.
pub fn init() {
    init_with_filter("info");
}

/// [`init`] with an explicit default directive, still overridable through
/// `RUST_LOG`.
pub fn init_with_filter(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
