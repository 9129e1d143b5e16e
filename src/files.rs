//! File model and path resolution collaborators.
//!
//! The engine never touches the disk directly: it asks a [`FileModel`] for timestamps, content
//! hashes and document bytes, and a [`PathResolver`] to turn data-directory relative references
//! into absolute paths and index keys. [`LocalFileModel`] and [`DataDirectories`] are the
//! implementations used by the CLI and the watch service; tests substitute their own.

use crate::{
    error::AssetTrackError,
    hash::hash_bytes,
    properties::{AssetGuid, FileHash, FileStat},
};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::{HashMap, VecDeque},
    fs,
    path::{Component, Path, PathBuf},
};

pub trait FileModel: Send + Sync {
    /// Timestamp and size, or `None` when the file does not exist.
    fn stat(&self, path: &Path) -> Option<FileStat>;

    fn exists(&self, path: &Path) -> bool {
        self.stat(path).is_some()
    }

    /// Content hash of the file, served from a timestamp-keyed cache unless `force` is set.
    fn hash_file(&self, path: &Path, force: bool) -> Result<FileHash, AssetTrackError>;

    /// Hands the raw document bytes to `reader`.
    fn read_document(
        &self,
        path: &Path,
        reader: &mut dyn FnMut(&[u8]) -> Result<(), AssetTrackError>,
    ) -> Result<(), AssetTrackError>;

    fn link_document(&self, path: &Path, guid: AssetGuid);

    fn unlink_document(&self, path: &Path);

    fn linked_document(&self, path: &Path) -> Option<AssetGuid>;

    /// Request that `path` be rediscovered, e.g. after its content was rewritten.
    fn notify_of_change(&self, path: &Path);

    /// Drain the paths queued by [`FileModel::notify_of_change`].
    fn take_pending_changes(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn is_same_file(&self, lhs: &Path, rhs: &Path) -> bool;
}

/// Maps between data-directory relative references and absolute paths. Resolution is lexical:
/// implementations never look at the disk, so the answer for a reference does not change while
/// files come and go.
pub trait PathResolver: Send + Sync {
    /// Every absolute path `relative` may name, one per data directory, in root order. Empty if
    /// the reference escapes every data directory.
    fn candidates(&self, relative: &str) -> Vec<PathBuf>;

    fn make_relative(&self, absolute: &Path) -> Option<String>;

    fn roots(&self) -> Vec<PathBuf>;

    /// The path `relative` names in the first data directory.
    fn make_absolute(&self, relative: &str) -> Option<PathBuf> {
        self.candidates(relative).into_iter().next()
    }

    /// Normalized data-relative form of a path reference, identical to what
    /// [`PathResolver::make_relative`] returns for any of its candidates.
    fn reference_key(&self, reference: &str) -> Option<String> {
        let path = Path::new(reference);
        if path.is_absolute() {
            return self.make_relative(path);
        }
        normalize_relative(reference)
    }
}

/// Lexically normalize `path`, resolving `.` and `..` without touching the file system.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Lexically normalize a relative reference into `/` separated form. `None` if it climbs above
/// its root or is empty.
pub fn normalize_relative(relative: &str) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}

/// The set of data directories asset paths are relative to.
#[derive(Debug, Clone, Default)]
pub struct DataDirectories {
    roots: Vec<PathBuf>,
}

impl DataDirectories {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let roots = roots
            .into_iter()
            .map(|root| {
                root.as_ref()
                    .canonicalize()
                    .unwrap_or_else(|_| normalize_path(root.as_ref()))
            })
            .collect();
        DataDirectories { roots }
    }
}

impl PathResolver for DataDirectories {
    fn candidates(&self, relative: &str) -> Vec<PathBuf> {
        let candidate = Path::new(relative);
        if candidate.is_absolute() {
            let normalized = normalize_path(candidate);
            return match self.roots.iter().any(|root| normalized.starts_with(root)) {
                true => vec![normalized],
                false => Vec::new(),
            };
        }
        let Some(relative) = normalize_relative(relative) else {
            return Vec::new();
        };
        self.roots.iter().map(|root| root.join(&relative)).collect()
    }

    fn make_relative(&self, absolute: &Path) -> Option<String> {
        let normalized = normalize_path(absolute);
        self.roots.iter().find_map(|root| {
            normalized.strip_prefix(root).ok().map(|rel| {
                rel.components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/")
            })
        })
    }

    fn roots(&self) -> Vec<PathBuf> {
        self.roots.clone()
    }
}

/// [`FileModel`] backed by the local file system.
#[derive(Debug, Default)]
pub struct LocalFileModel {
    hash_cache: RwLock<HashMap<PathBuf, (FileStat, FileHash)>>,
    links: RwLock<HashMap<PathBuf, AssetGuid>>,
    pending: Mutex<VecDeque<PathBuf>>,
}

impl LocalFileModel {
    pub fn new() -> Self {
        LocalFileModel::default()
    }

    /// Forget the cached hash of `path`.
    pub fn evict(&self, path: &Path) {
        self.hash_cache.write().remove(path);
    }
}

impl FileModel for LocalFileModel {
    fn stat(&self, path: &Path) -> Option<FileStat> {
        fs::metadata(path)
            .ok()
            .filter(|metadata| metadata.is_file())
            .map(|metadata| FileStat::from(&metadata))
    }

    fn hash_file(&self, path: &Path, force: bool) -> Result<FileHash, AssetTrackError> {
        let stat = self
            .stat(path)
            .ok_or_else(|| AssetTrackError::NotFound(format!("{path:?}")))?;
        if !force {
            if let Some((cached_stat, hash)) = self.hash_cache.read().get(path) {
                if *cached_stat == stat {
                    return Ok(*hash);
                }
            }
        }
        let bytes = fs::read(path)?;
        let hash = hash_bytes(&bytes);
        self.hash_cache
            .write()
            .insert(path.to_path_buf(), (stat, hash));
        Ok(hash)
    }

    fn read_document(
        &self,
        path: &Path,
        reader: &mut dyn FnMut(&[u8]) -> Result<(), AssetTrackError>,
    ) -> Result<(), AssetTrackError> {
        tracing::debug!("Reading {:?}", path);
        let bytes = fs::read(path)?;
        reader(&bytes)
    }

    fn link_document(&self, path: &Path, guid: AssetGuid) {
        self.links.write().insert(path.to_path_buf(), guid);
    }

    fn unlink_document(&self, path: &Path) {
        self.links.write().remove(path);
    }

    fn linked_document(&self, path: &Path) -> Option<AssetGuid> {
        self.links.read().get(path).copied()
    }

    fn notify_of_change(&self, path: &Path) {
        self.evict(path);
        let mut pending = self.pending.lock();
        if !pending.iter().any(|queued| queued == path) {
            pending.push_back(path.to_path_buf());
        }
    }

    fn take_pending_changes(&self) -> Vec<PathBuf> {
        self.pending.lock().drain(..).collect()
    }

    fn is_same_file(&self, lhs: &Path, rhs: &Path) -> bool {
        match (lhs.canonicalize(), rhs.canonicalize()) {
            (Ok(lhs), Ok(rhs)) => lhs == rhs,
            _ => normalize_path(lhs) == normalize_path(rhs),
        }
    }
}
