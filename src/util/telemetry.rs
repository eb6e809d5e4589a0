//! Telemetry helpers for structured logging and tracing.

use tracing_subscriber::EnvFilter;

/// `tracing` target for admission diagnostics (peak samples, leak reconciliation).
pub const ADMISSION_TARGET: &str = "fair_share::admission";

/// Initialize tracing/telemetry. Users can install their own subscriber; this
/// helper installs a default env-based subscriber if none is set.
pub fn init_tracing() {
    init_tracing_with("info");
}

/// Like [`init_tracing`], but uses `default_filter` when `RUST_LOG` is unset.
pub fn init_tracing_with(default_filter: &str) {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
