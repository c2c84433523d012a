//! Backend adapters used by the query pipeline.
//!
//! Every backend implements the [`Backend`](traits::Backend) contract: given a
//! prompt, a model, a sample count, and a temperature, return the exact query
//! that was sent together with the provider's raw response. The pipeline owns
//! caching, rate limiting, and failure handling; backends only talk to the model.

#![warn(missing_docs, clippy::pedantic)]

pub mod blocking;
pub mod callback;
pub mod extract;
pub mod http_json;
pub mod traits;

mod http_client;
