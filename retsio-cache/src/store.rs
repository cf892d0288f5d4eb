//! Cache storage backends and the metadata cache front.

use crate::entry::MetadataCacheEntry;
use crate::error::CacheError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name suffix for persisted metadata.
pub const CACHE_FILE_SUFFIX: &str = ".metadata.json";

/// Byte storage keyed by server identity.
///
/// Writes are best-effort from the caller's point of view: a failed write
/// is reported but never invalidates what was fetched.
pub trait CacheStore: Send + Sync {
    /// Reads the bytes stored under `key`, or `None` if absent.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Replaces the bytes stored under `key`.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError>;
}

/// Stores one JSON file per key in a directory.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    /// Uses `dir`, creating it on first write.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Uses the process temp directory.
    pub fn temp() -> Self {
        Self::new(std::env::temp_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir
            .join(format!("{}{}", sanitize_key(key), CACHE_FILE_SUFFIX))
    }
}

impl CacheStore for FileCacheStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match fs::read(self.path_for(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp_path = path.with_extension("json.tmp");

        // Write then rename so readers never see a half-written file
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, &path)?;

        tracing::debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }
}

/// In-memory store, mostly for tests and short-lived sessions.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl CacheStore for MemoryCacheStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<(), CacheError> {
        self.entries.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// Typed access to metadata cache entries over a [`CacheStore`].
#[derive(Clone)]
pub struct MetadataCache {
    store: Arc<dyn CacheStore>,
}

impl MetadataCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Loads the entry for `key`.
    ///
    /// An entry that cannot be decoded is reported as corruption.
    pub fn load(&self, key: &str) -> Result<Option<MetadataCacheEntry>, CacheError> {
        let Some(data) = self.store.read(key)? else {
            return Ok(None);
        };
        let entry = serde_json::from_slice(&data)
            .map_err(|e| CacheError::Corruption(format!("{}: {}", key, e)))?;
        Ok(Some(entry))
    }

    /// Persists the entry for `key`, replacing any previous one.
    pub fn save(&self, key: &str, entry: &MetadataCacheEntry) -> Result<(), CacheError> {
        let data = serde_json::to_vec_pretty(entry)?;
        self.store.write(key, &data)?;
        tracing::info!("Cached metadata for {} (version {:?})", key, entry.version);
        Ok(())
    }
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataCache").finish_non_exhaustive()
    }
}

/// Maps a key onto a safe file name stem.
fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
