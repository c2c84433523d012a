//! Response cache for prompt-sweep.
//!
//! Records are keyed by the fully substituted prompt text and persisted as a
//! single JSON object through a [`CacheStore`]. The whole map is rewritten after
//! every unit of new work, so an interrupted run loses at most one call.

#![warn(missing_docs, clippy::pedantic)]

mod cache;
mod error;
mod record;
mod store;

pub use cache::ResponseCache;
pub use error::{CacheError, CacheResult};
pub use record::{ResponseRecord, ResponseRecordBuilder};
pub use store::{CacheMap, CacheStore, FileCacheStore, VolatileCacheStore};
