//! Logging initialisation.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialises the global tracing subscriber.
///
/// The filter comes from `RUST_LOG`, defaulting to `info` for this crate.
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("aslflow=info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
