//! Tracing subscriber setup
//!
//! One entry point for structured logging. Level comes from `RUST_LOG`
//! (default: info). Safe to call more than once; later calls are no-ops.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber
///
/// Returns quietly if a subscriber is already installed (tests, embedders).
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    if result.is_ok() {
        tracing::info!("tracing initialized");
    }
}
