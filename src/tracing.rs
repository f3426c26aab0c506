//! Tracing subscriber setup for the agent binary.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initializes the global subscriber with formatted output.
///
/// `RUST_LOG` overrides the default `info` filter.
pub fn init_tracing() {
  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer().with_target(true))
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();
}
