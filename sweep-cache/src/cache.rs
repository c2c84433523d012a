//! Lazily loaded response cache owned by a single pipeline run.

use std::sync::Arc;

use tracing::debug;

use crate::CacheResult;
use crate::record::ResponseRecord;
use crate::store::{CacheMap, CacheStore};

/// Prompt → record map backed by a [`CacheStore`].
///
/// The map is loaded on first access. Mutations stay in memory until
/// [`persist`](Self::persist) rewrites the whole map, so a failed save never
/// loses a record that was already merged.
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    entries: Option<CacheMap>,
}

impl ResponseCache {
    /// Creates a cache over `store`. Nothing is loaded yet.
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            entries: None,
        }
    }

    /// Returns `true` once the backing store has been read.
    #[must_use]
    pub const fn is_loaded(&self) -> bool {
        self.entries.is_some()
    }

    /// Loads the map if needed and returns it.
    ///
    /// # Errors
    ///
    /// Propagates store failures from the initial load.
    pub async fn entries(&mut self) -> CacheResult<&CacheMap> {
        Ok(self.loaded().await?)
    }

    /// Returns the record cached for `prompt`.
    ///
    /// # Errors
    ///
    /// Propagates store failures from the initial load.
    pub async fn get(&mut self, prompt: &str) -> CacheResult<Option<&ResponseRecord>> {
        Ok(self.loaded().await?.get(prompt))
    }

    /// Returns how many prompts are cached.
    ///
    /// # Errors
    ///
    /// Propagates store failures from the initial load.
    pub async fn len(&mut self) -> CacheResult<usize> {
        Ok(self.loaded().await?.len())
    }

    /// Merges `record` into any existing entry for its prompt and returns the
    /// merged result. The change is in memory only.
    ///
    /// # Errors
    ///
    /// Propagates store failures from the initial load.
    pub async fn merge_in(&mut self, record: ResponseRecord) -> CacheResult<ResponseRecord> {
        let entries = self.loaded().await?;
        let merged = match entries.remove(record.prompt()) {
            Some(previous) => ResponseRecord::merge(previous, record),
            None => record,
        };
        entries.insert(merged.prompt().to_owned(), merged.clone());
        Ok(merged)
    }

    /// Writes the whole map to the store. A cache that was never loaded has
    /// nothing to write.
    ///
    /// # Errors
    ///
    /// Propagates store failures; the in-memory map is kept either way.
    pub async fn persist(&mut self) -> CacheResult<()> {
        if let Some(entries) = &self.entries {
            self.store.save(entries).await?;
        }
        Ok(())
    }

    /// Empties both the store and the in-memory map.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn clear(&mut self) -> CacheResult<()> {
        self.store.clear().await?;
        self.entries = Some(CacheMap::new());
        Ok(())
    }

    async fn loaded(&mut self) -> CacheResult<&mut CacheMap> {
        if self.entries.is_none() {
            let entries = self.store.load().await?;
            debug!(entries = entries.len(), "response cache loaded");
            self.entries = Some(entries);
        }
        Ok(self.entries.get_or_insert_with(CacheMap::new))
    }
}
