//! Structured tracing helpers.

use anyhow::{Context, Result, anyhow};
use tracing_subscriber::EnvFilter;

/// Directive used when neither `RUST_LOG` nor the caller supplies one.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Installs a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive` (e.g. `"sweep_pipeline=debug,info"`).
///
/// # Errors
///
/// Fails when `default_directive` does not parse or a global subscriber is
/// already installed. Neither case panics.
pub fn init_tracing(default_directive: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)
            .with_context(|| format!("invalid log directive {default_directive:?}"))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}
