//! Tracing setup for demos and tests.
//!
//! The crate itself only emits `tracing` events; this helper wires up a
//! stdout subscriber with the usual `RUST_LOG`-style filtering for
//! binaries that have no subscriber of their own.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize a formatted stdout tracing pipeline.
///
/// `filter` is used when `RUST_LOG` is unset. Safe to call more than once;
/// later calls are no-ops.
pub fn init_tracing(filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .try_init();
}
