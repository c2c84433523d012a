//! Persistence backends for the response cache.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::CacheResult;
use crate::record::ResponseRecord;

/// Prompt text → record.
pub type CacheMap = BTreeMap<String, ResponseRecord>;

/// Trait implemented by cache persistence backends.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Loads the full map; an absent store is an empty map.
    async fn load(&self) -> CacheResult<CacheMap>;

    /// Replaces the persisted map with `entries`.
    async fn save(&self, entries: &CacheMap) -> CacheResult<()>;

    /// Resets the store to an empty persisted map.
    async fn clear(&self) -> CacheResult<()>;
}

/// Single JSON document on disk.
///
/// Saves write a sibling temporary file and rename it over the target, so a
/// failed or interrupted save leaves the previous document intact.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    path: PathBuf,
}

impl FileCacheStore {
    /// Creates a store for the document at `path`. Nothing is touched on disk
    /// until the first load or save.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path of the cache document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map_or_else(|| "cache".into(), |name| name.to_string_lossy().into_owned());
        self.path.with_file_name(format!(".{name}.{}.tmp", Uuid::new_v4()))
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn load(&self) -> CacheResult<CacheMap> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no cache file yet");
                return Ok(CacheMap::new());
            }
            Err(err) => return Err(err.into()),
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            return Ok(CacheMap::new());
        }

        let mut entries: CacheMap = serde_json::from_slice(&data)?;
        for (prompt, record) in &mut entries {
            record.set_prompt(prompt);
        }
        debug!(path = %self.path.display(), entries = entries.len(), "loaded response cache");
        Ok(entries)
    }

    async fn save(&self, entries: &CacheMap) -> CacheResult<()> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let data = serde_json::to_vec_pretty(entries)?;
        let temp = self.temp_path();

        let written = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            fs::rename(&temp, &self.path).await
        }
        .await;

        if let Err(err) = written {
            warn!(path = %self.path.display(), error = %err, "cache save failed");
            if let Err(cleanup) = fs::remove_file(&temp).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(path = %temp.display(), error = %cleanup, "could not remove temporary cache file");
                }
            }
            return Err(err.into());
        }

        debug!(path = %self.path.display(), entries = entries.len(), "persisted response cache");
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.save(&CacheMap::new()).await
    }
}

/// In-process store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct VolatileCacheStore {
    entries: RwLock<CacheMap>,
    saves: AtomicUsize,
}

impl VolatileCacheStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `entries`.
    #[must_use]
    pub fn with_entries(entries: CacheMap) -> Self {
        Self {
            entries: RwLock::new(entries),
            saves: AtomicUsize::new(0),
        }
    }

    /// Returns how many times the map has been saved.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Acquire)
    }

    /// Returns a copy of the currently persisted map.
    pub async fn snapshot(&self) -> CacheMap {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl CacheStore for VolatileCacheStore {
    async fn load(&self) -> CacheResult<CacheMap> {
        Ok(self.entries.read().await.clone())
    }

    async fn save(&self, entries: &CacheMap) -> CacheResult<()> {
        let mut guard = self.entries.write().await;
        guard.clone_from(entries);
        self.saves.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn clear(&self) -> CacheResult<()> {
        self.entries.write().await.clear();
        self.saves.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
