//! Document-info cache: absolute path to `(last_modified, DocumentInfo)`.
//!
//! Lets [`crate::engine::AssetEngine::ensure_asset_updated`] skip re-parsing documents whose
//! timestamp did not change. Optionally persisted as JSON between sessions.

use crate::{error::AssetTrackError, properties::DocumentInfo};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct CacheEntry {
    last_modified: u64,
    info: DocumentInfo,
}

#[derive(Debug, Default)]
pub struct DocumentInfoCache {
    entries: RwLock<BTreeMap<PathBuf, CacheEntry>>,
}

impl DocumentInfoCache {
    pub fn new() -> Self {
        DocumentInfoCache::default()
    }

    /// Load a persisted cache. A missing file yields an empty cache.
    pub fn load(path: &Path) -> Result<Self, AssetTrackError> {
        if !path.exists() {
            tracing::debug!("[DocumentInfoCache] no cache at {:?}, starting empty", path);
            return Ok(DocumentInfoCache::new());
        }
        let content = fs::read_to_string(path)?;
        let entries: BTreeMap<PathBuf, CacheEntry> = serde_json::from_str(&content)?;
        tracing::debug!(
            "[DocumentInfoCache] loaded {} entries from {:?}",
            entries.len(),
            path
        );
        Ok(DocumentInfoCache {
            entries: RwLock::new(entries),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), AssetTrackError> {
        let content = serde_json::to_string_pretty(&*self.entries.read())?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// The cached info for `path`, if it was parsed at exactly `last_modified`.
    pub fn get(&self, path: &Path, last_modified: u64) -> Option<DocumentInfo> {
        self.entries
            .read()
            .get(path)
            .filter(|entry| entry.last_modified == last_modified)
            .map(|entry| entry.info.clone())
    }

    pub fn insert(&self, path: &Path, last_modified: u64, info: DocumentInfo) {
        self.entries.write().insert(
            path.to_path_buf(),
            CacheEntry {
                last_modified,
                info,
            },
        );
    }

    pub fn remove(&self, path: &Path) {
        self.entries.write().remove(path);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
