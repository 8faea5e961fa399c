//! Tracing setup shared by hosts and samples.

/// Initializes structured logging for the process.
///
/// Verbosity is controlled through `RUST_LOG`, e.g. `RUST_LOG=info` for the
/// lifecycle events or `RUST_LOG=durable_actor=debug` for per-frame dispatch
/// detail. Safe to call more than once; later calls are no-ops.
pub fn setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
