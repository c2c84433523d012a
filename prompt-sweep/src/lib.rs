//! Prompt permutation and querying engine facade.
//!
//! Depend on this crate via `cargo add prompt-sweep`. It bundles the internal
//! crates behind feature flags; templates and primitives are always present,
//! everything that talks to a model or the disk can be switched off.
//!
//! ```no_run
//! # async fn demo(backend: std::sync::Arc<dyn prompt_sweep::backends::traits::Backend>) -> anyhow::Result<()> {
//! use prompt_sweep::config::SweepConfig;
//! use prompt_sweep::telemetry::RunReport;
//! use prompt_sweep::templates::Variables;
//!
//! let config = SweepConfig::load("sweep.json")?;
//! let vars = Variables::new().with("topic", vec!["cats", "dogs"]);
//! let outcomes = config
//!     .pipeline(backend)
//!     .run("Tell me a joke about ${topic}.", &vars, &config.query_settings())
//!     .await?;
//! let (records, report) = RunReport::drain(outcomes).await;
//! # let _ = (records, report);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, clippy::pedantic)]

/// Re-export shared primitives for convenience.
pub use sweep_primitives as primitives;

/// Templates, variables and permutation generation.
pub use sweep_templates as templates;

/// Backend-call contract and bundled backends (enabled by `backends` feature).
#[cfg(feature = "backends")]
pub use sweep_backends as backends;

/// Response cache and persistence (enabled by `cache` feature).
#[cfg(feature = "cache")]
pub use sweep_cache as cache;

/// Query pipeline and rate limiting (enabled by `pipeline` feature).
#[cfg(feature = "pipeline")]
pub use sweep_pipeline as pipeline;

/// Run configuration (enabled by `config` feature).
#[cfg(feature = "config")]
pub use sweep_config as config;

/// Tracing setup and run reports (enabled by `telemetry` feature).
#[cfg(feature = "telemetry")]
pub use sweep_telemetry as telemetry;
