//! Core shared types for prompt-sweep.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod ids;
mod rate_limit;

use std::collections::BTreeMap;

/// Error type and result alias shared across the workspace.
pub use error::{Error, Result};
/// Identifier of the model a prompt is sent to.
pub use ids::ModelId;
/// Per-model batching and cooldown policy.
pub use rate_limit::{RateLimitPolicy, RateLimitTable};

/// Name → value annotations carried alongside a prompt (fill history, metavars).
///
/// Ordered so that serialized caches and logs are deterministic.
pub type Provenance = BTreeMap<String, String>;
