//! Tracing subscriber setup for the `egress-sync` binary.
//!
//! Logs at INFO and above by default; override with `RUST_LOG`, e.g.
//! `RUST_LOG=egress_sync=debug,egress_core=debug`.

use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
