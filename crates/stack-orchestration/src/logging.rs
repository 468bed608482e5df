//! Log setup for binaries embedding the engine.

use crate::{Error, Result};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install a global fmt subscriber logging at `level`; `RUST_LOG` overrides it.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(level: Level) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| Error::Config(format!("failed to initialize logging: {e}")))
}
