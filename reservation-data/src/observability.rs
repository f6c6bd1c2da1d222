//! Tracing subscriber setup
//!
//! The library itself only emits `tracing` events. Applications that do not
//! install their own subscriber can call [`init_tracing`] once at startup.

#[cfg(feature = "observability")]
use tracing_subscriber::EnvFilter;

use crate::{config::Config, error::Result};

/// Install a JSON subscriber filtered by `logging.level`
///
/// An invalid filter falls back to `info`. Installing twice is not an
/// error; the first subscriber stays in place.
#[cfg(feature = "observability")]
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("Tracing initialized for service: {}", config.service.name);
    } else {
        tracing::debug!("Tracing subscriber already installed");
    }

    Ok(())
}

/// No-op without the `observability` feature
#[cfg(not(feature = "observability"))]
pub fn init_tracing(_config: &Config) -> Result<()> {
    Ok(())
}
