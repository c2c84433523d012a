//! Observability utilities for prompt-sweep runs.

#![warn(missing_docs, clippy::pedantic)]

pub mod report;
pub mod tracing_support;

pub use report::RunReport;
pub use tracing_support::init_tracing;
