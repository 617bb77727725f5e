//! Logging setup for embedders.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a tracing subscriber filtered by `RUST_LOG`, falling back to the
/// given default level.
///
/// Fails if a global subscriber is already installed, so call it once from
/// the application, not from library code.
pub fn setup_logging(default_level: &str) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("invalid log filter: {e}")))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .map_err(|e| crate::Error::Config(format!("failed to install subscriber: {e}")))?;

    Ok(())
}
