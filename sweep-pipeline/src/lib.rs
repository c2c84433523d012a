//! Prompt permutation and querying engine.
//!
//! [`QueryPipeline`] expands a template over its variables, serves what it can
//! from the response cache, requests only the missing samples from the
//! backend (staggered by the model's [`RateLimitPolicy`](sweep_primitives::RateLimitPolicy)),
//! persists after every completed call, and yields one outcome per prompt.
//! Backend failures are yielded as values, never raised.

#![warn(missing_docs, clippy::pedantic)]

mod error;
mod pipeline;
mod scheduler;
mod state;

pub use error::{BackendCallError, PipelineError, PipelineResult, QueryError, QueryOutcome};
pub use pipeline::{PromptEstimate, QueryEstimate, QueryPipeline, QuerySettings, QueryStream};
pub use scheduler::RateLimiter;
pub use state::{PromptLifecycle, QueryState, StateError, StateResult};
