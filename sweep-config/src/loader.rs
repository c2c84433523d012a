//! Configuration loader implementations.

use std::fs;
use std::num::NonZeroU32;
use std::path::Path;

use anyhow::{Context, Result};
use sweep_primitives::ModelId;
use tracing::{debug, info};

use crate::schema::SweepConfig;

/// Overrides [`SweepConfig::cache_path`].
pub const CACHE_PATH_VAR: &str = "PROMPT_SWEEP_CACHE_PATH";
/// Overrides [`SweepConfig::model`].
pub const MODEL_VAR: &str = "PROMPT_SWEEP_MODEL";
/// Overrides [`SweepConfig::n`].
pub const N_VAR: &str = "PROMPT_SWEEP_N";

impl SweepConfig {
    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON, unknown keys, or invalid values.
    pub fn from_json_str(input: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(input).context("invalid sweep configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates the JSON document at `path`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or does not hold a valid
    /// configuration; the error names the file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration from {}", path.display()))?;
        let config = Self::from_json_str(&input)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?;
        info!(path = %path.display(), model = %config.model, "configuration loaded");
        Ok(config)
    }

    /// Applies `PROMPT_SWEEP_*` overrides obtained through `lookup`.
    ///
    /// Blank values are ignored.
    ///
    /// # Errors
    ///
    /// Fails when an override does not parse; the configuration is left
    /// unchanged in that case.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let model = read(MODEL_VAR)
            .map(|value| ModelId::new(&value).with_context(|| format!("invalid {MODEL_VAR}")))
            .transpose()?;
        let n = read(N_VAR)
            .map(|value| {
                value
                    .trim()
                    .parse::<NonZeroU32>()
                    .with_context(|| format!("{N_VAR} must be a positive integer (got {value:?})"))
            })
            .transpose()?;

        if let Some(path) = read(CACHE_PATH_VAR) {
            debug!(var = CACHE_PATH_VAR, value = %path, "configuration override");
            self.cache_path = path.into();
        }
        if let Some(model) = model {
            debug!(var = MODEL_VAR, value = %model, "configuration override");
            self.model = model;
        }
        if let Some(n) = n {
            debug!(var = N_VAR, value = n.get(), "configuration override");
            self.n = n;
        }
        Ok(())
    }

    /// Applies overrides from the process environment.
    ///
    /// # Errors
    ///
    /// See [`apply_overrides`](Self::apply_overrides).
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }
}
