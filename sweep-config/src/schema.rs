//! Strongly typed configuration schema.

use std::num::NonZeroU32;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sweep_backends::traits::{Backend, BackendRequest};
use sweep_cache::FileCacheStore;
use sweep_pipeline::{QueryPipeline, QuerySettings};
use sweep_primitives::{ModelId, RateLimitTable};

/// Everything needed to start a run, apart from the template and variables.
///
/// ```json
/// {
///   "cache_path": "runs/jokes.json",
///   "model": "gpt-4",
///   "n": 3,
///   "temperature": 0.7,
///   "params": { "max_tokens": 64 },
///   "rate_limits": { "gpt-4": { "batch_size": 5, "cooldown_secs": 10 } }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    /// Where the response cache document lives.
    pub cache_path: PathBuf,
    /// Model to query.
    pub model: ModelId,
    /// Samples wanted per prompt.
    #[serde(default = "default_n")]
    pub n: NonZeroU32,
    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Extra provider parameters forwarded with every call.
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Per-model dispatch policies; unlisted models run sequentially.
    #[serde(default)]
    pub rate_limits: RateLimitTable,
}

impl SweepConfig {
    /// Creates a configuration with default sampling settings.
    #[must_use]
    pub fn new(cache_path: impl Into<PathBuf>, model: ModelId) -> Self {
        Self {
            cache_path: cache_path.into(),
            model,
            n: default_n(),
            temperature: default_temperature(),
            params: Map::new(),
            rate_limits: RateLimitTable::new(),
        }
    }

    /// Checks constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Fails when the temperature is negative or not finite, or the cache
    /// path is empty.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.temperature.is_finite() && self.temperature >= 0.0,
            "temperature must be a finite, non-negative number (got {})",
            self.temperature
        );
        ensure!(
            !self.cache_path.as_os_str().is_empty(),
            "cache_path must not be empty"
        );
        Ok(())
    }

    /// Returns the per-run query settings.
    #[must_use]
    pub fn query_settings(&self) -> QuerySettings {
        QuerySettings::new(self.model.clone(), self.n)
            .with_temperature(self.temperature)
            .with_params(self.params.clone())
    }

    /// Returns a copy of the rate-limit table.
    #[must_use]
    pub fn rate_limit_table(&self) -> RateLimitTable {
        self.rate_limits.clone()
    }

    /// Returns a file store for the configured cache path.
    #[must_use]
    pub fn cache_store(&self) -> FileCacheStore {
        FileCacheStore::new(&self.cache_path)
    }

    /// Builds a pipeline over `backend` with this configuration's cache and
    /// rate limits.
    #[must_use]
    pub fn pipeline(&self, backend: Arc<dyn Backend>) -> QueryPipeline {
        QueryPipeline::new(backend, Arc::new(self.cache_store()))
            .with_rate_limits(self.rate_limit_table())
    }
}

fn default_n() -> NonZeroU32 {
    NonZeroU32::MIN
}

const fn default_temperature() -> f32 {
    BackendRequest::DEFAULT_TEMPERATURE
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_apply() {
        let config: SweepConfig =
            serde_json::from_value(json!({ "cache_path": "c.json", "model": "m" })).unwrap();
        assert_eq!(config.n.get(), 1);
        assert!((config.temperature - 1.0).abs() < f32::EPSILON);
        assert!(config.params.is_empty());
        assert!(config.rate_limits.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn query_settings_carry_every_field() {
        let config: SweepConfig = serde_json::from_value(json!({
            "cache_path": "c.json",
            "model": "m",
            "n": 4,
            "temperature": 0.25,
            "params": { "stop": ["\n"] }
        }))
        .unwrap();

        let settings = config.query_settings();
        assert_eq!(settings.model().as_str(), "m");
        assert_eq!(settings.n().get(), 4);
        assert!((settings.temperature() - 0.25).abs() < f32::EPSILON);
        assert_eq!(settings.params()["stop"], json!(["\n"]));
    }

    #[test]
    fn rejects_zero_samples_and_unknown_keys() {
        assert!(
            serde_json::from_value::<SweepConfig>(json!({ "cache_path": "c", "model": "m", "n": 0 }))
                .is_err()
        );
        assert!(
            serde_json::from_value::<SweepConfig>(json!({ "cache_path": "c", "model": "m", "nn": 2 }))
                .is_err()
        );
    }

    #[test]
    fn negative_temperature_fails_validation() {
        let mut config = SweepConfig::new("c.json", ModelId::new("m").unwrap());
        config.temperature = -0.5;
        assert!(config.validate().is_err());
        config.temperature = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rate_limits_are_keyed_by_model() {
        let config: SweepConfig = serde_json::from_value(json!({
            "cache_path": "c.json",
            "model": "m",
            "rate_limits": { "m": { "batch_size": 5, "cooldown_secs": 2.5 } }
        }))
        .unwrap();

        let policy = config.rate_limit_table().policy_for(&config.model);
        assert_eq!(policy.batch_size().get(), 5);
        assert_eq!(policy.cooldown().as_millis(), 2500);
        assert_eq!(config.cache_store().path(), std::path::Path::new("c.json"));
    }
}
