//! `tracing` initialization, following `src/main.rs`'s original
//! `tracing_subscriber::fmt()...init()` call.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber: `RUST_LOG`-driven filtering
/// (defaulting to `info` for this crate when unset) plus JSON-formatted
/// output, matching the demo binary's expectations for structured,
/// machine-parseable logs of the per-turn/per-agent spans emitted by
/// [`crate::server::Server`].
///
/// # Panics
/// Panics if a global subscriber has already been installed — call this at
/// most once, at process start.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();
}
