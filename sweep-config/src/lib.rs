//! Configuration management for prompt-sweep runs.
//!
//! A run is described by a JSON document (see [`schema::SweepConfig`]) that
//! can be adjusted through `PROMPT_SWEEP_*` environment variables before it is
//! handed to the pipeline.

#![warn(missing_docs, clippy::pedantic)]

pub mod loader;
pub mod schema;

pub use loader::{CACHE_PATH_VAR, MODEL_VAR, N_VAR};
pub use schema::SweepConfig;
