//! Per-model rate-limit policies.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, ModelId};

/// Batching policy for one model: how many prompts may be dispatched together,
/// and how long to wait between consecutive batches.
///
/// The default policy `(1, 0s)` dispatches one call at a time with no cooldown.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPolicy", into = "RawPolicy")]
pub struct RateLimitPolicy {
    batch_size: NonZeroUsize,
    cooldown: Duration,
}

impl RateLimitPolicy {
    /// Fully synchronous policy: one call at a time, no cooldown.
    pub const SEQUENTIAL: Self = Self {
        batch_size: NonZeroUsize::MIN,
        cooldown: Duration::ZERO,
    };

    /// Creates a policy from a batch size and a cooldown between batches.
    #[must_use]
    pub const fn new(batch_size: NonZeroUsize, cooldown: Duration) -> Self {
        Self {
            batch_size,
            cooldown,
        }
    }

    /// Creates a policy from raw numbers, validating both.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRateLimit`] when `batch_size` is zero or the
    /// cooldown is negative or not finite.
    pub fn from_parts(batch_size: usize, cooldown_secs: f64) -> crate::Result<Self> {
        let batch_size = NonZeroUsize::new(batch_size).ok_or_else(|| Error::InvalidRateLimit {
            reason: "batch size must be at least 1".to_owned(),
        })?;
        let cooldown = Duration::try_from_secs_f64(cooldown_secs).map_err(|_| Error::InvalidRateLimit {
            reason: format!(
                "cooldown must be a finite, non-negative number of seconds (got {cooldown_secs})"
            ),
        })?;
        Ok(Self::new(batch_size, cooldown))
    }

    /// Returns the number of prompts dispatched per batch.
    #[must_use]
    pub const fn batch_size(self) -> NonZeroUsize {
        self.batch_size
    }

    /// Returns the cooldown applied between consecutive batches.
    #[must_use]
    pub const fn cooldown(self) -> Duration {
        self.cooldown
    }

    /// Returns `true` when prompts for this model may be dispatched concurrently.
    #[must_use]
    pub const fn is_concurrent(self) -> bool {
        self.batch_size.get() > 1
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::SEQUENTIAL
    }
}

#[derive(Serialize, Deserialize)]
struct RawPolicy {
    batch_size: usize,
    #[serde(default)]
    cooldown_secs: f64,
}

impl TryFrom<RawPolicy> for RateLimitPolicy {
    type Error = Error;

    fn try_from(raw: RawPolicy) -> Result<Self, Self::Error> {
        Self::from_parts(raw.batch_size, raw.cooldown_secs)
    }
}

impl From<RateLimitPolicy> for RawPolicy {
    fn from(policy: RateLimitPolicy) -> Self {
        Self {
            batch_size: policy.batch_size.get(),
            cooldown_secs: policy.cooldown.as_secs_f64(),
        }
    }
}

/// Static map from model identifier to its [`RateLimitPolicy`].
///
/// Models without an entry fall back to [`RateLimitPolicy::SEQUENTIAL`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateLimitTable {
    policies: BTreeMap<ModelId, RateLimitPolicy>,
}

impl RateLimitTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the policy for `model`.
    #[must_use]
    pub fn with_policy(mut self, model: ModelId, policy: RateLimitPolicy) -> Self {
        self.insert(model, policy);
        self
    }

    /// Adds or replaces the policy for `model`.
    pub fn insert(&mut self, model: ModelId, policy: RateLimitPolicy) {
        self.policies.insert(model, policy);
    }

    /// Returns the policy for `model`, or the sequential default.
    #[must_use]
    pub fn policy_for(&self, model: &ModelId) -> RateLimitPolicy {
        self.policies.get(model).copied().unwrap_or_default()
    }

    /// Returns the number of explicitly configured models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Returns `true` when no model has an explicit policy.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlisted_models_are_sequential() {
        let table = RateLimitTable::new().with_policy(
            ModelId::new("gpt-4").unwrap(),
            RateLimitPolicy::from_parts(4, 15.0).unwrap(),
        );

        let listed = table.policy_for(&ModelId::new("gpt-4").unwrap());
        assert_eq!(listed.batch_size().get(), 4);
        assert_eq!(listed.cooldown(), Duration::from_secs(15));
        assert!(listed.is_concurrent());

        let other = table.policy_for(&ModelId::new("local").unwrap());
        assert_eq!(other, RateLimitPolicy::SEQUENTIAL);
        assert!(!other.is_concurrent());
    }

    #[test]
    fn rejects_invalid_parts() {
        assert!(RateLimitPolicy::from_parts(0, 1.0).is_err());
        assert!(RateLimitPolicy::from_parts(2, -1.0).is_err());
        assert!(RateLimitPolicy::from_parts(2, f64::NAN).is_err());
        assert!(RateLimitPolicy::from_parts(2, 1e30).is_err());
    }

    #[test]
    fn deserializes_table() {
        let json = r#"{ "gpt-3.5-turbo": { "batch_size": 30, "cooldown_secs": 10 }, "local": { "batch_size": 1 } }"#;
        let table: RateLimitTable = serde_json::from_str(json).unwrap();
        assert_eq!(table.len(), 2);
        let policy = table.policy_for(&ModelId::new("gpt-3.5-turbo").unwrap());
        assert_eq!(policy.batch_size().get(), 30);
        assert_eq!(policy.cooldown(), Duration::from_secs(10));

        let bad = r#"{ "x": { "batch_size": 0 } }"#;
        assert!(serde_json::from_str::<RateLimitTable>(bad).is_err());
    }
}
