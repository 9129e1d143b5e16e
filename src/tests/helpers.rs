//! Shared test utilities for engine and registry testing
//!
//! [`TestBed`] runs an [`AssetEngine`] over an in-memory file model rooted at `/data`, so
//! registry scenarios can be set up without touching the disk.

use crate::{
    codec::{asset_doc::rewrite_guid, AssetDocHandler, DocumentTypeHandler},
    config::{RetryPolicy, TrackerConfig},
    engine::AssetEngine,
    error::AssetTrackError,
    event::AssetEvent,
    files::{DataDirectories, FileModel},
    hash::hash_bytes,
    properties::{
        AssetGuid, AssetInfo, DocumentInfo, FileHash, FileStat, Reference, TransformState,
        TypeDescriptor,
    },
};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    fmt::Write,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

pub const DATA_ROOT: &str = "/data";

/// Initialize logging for tests
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

pub fn data_path(relative: &str) -> PathBuf {
    Path::new(DATA_ROOT).join(relative)
}

/// File model over a map of paths to contents. Every write advances a logical clock that serves
/// as the modification time.
#[derive(Default)]
pub struct MemoryFileModel {
    files: RwLock<HashMap<PathBuf, (FileStat, Vec<u8>)>>,
    clock: AtomicU64,
    links: RwLock<HashMap<PathBuf, AssetGuid>>,
    pending: Mutex<Vec<PathBuf>>,
    stamps: RwLock<HashMap<PathBuf, (FileHash, FileHash)>>,
    failing_rewrites: AtomicUsize,
    pub reads: AtomicUsize,
}

impl MemoryFileModel {
    pub fn write(&self, path: &Path, content: &[u8]) {
        let last_modified = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        let stat = FileStat {
            last_modified,
            size: content.len() as u64,
        };
        self.files
            .write()
            .insert(path.to_path_buf(), (stat, content.to_vec()));
    }

    pub fn remove(&self, path: &Path) {
        self.files.write().remove(path);
    }

    pub fn content(&self, path: &Path) -> Option<String> {
        self.files
            .read()
            .get(path)
            .map(|(_, bytes)| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Record the hashes a finished transform of `path` was produced from.
    pub fn stamp(&self, path: &Path, asset_hash: FileHash, thumb_hash: FileHash) {
        self.stamps
            .write()
            .insert(path.to_path_buf(), (asset_hash, thumb_hash));
    }

    /// Make the next `count` identity rewrites fail as if the file was locked.
    pub fn fail_rewrites(&self, count: usize) {
        self.failing_rewrites.store(count, Ordering::SeqCst);
    }
}

impl FileModel for MemoryFileModel {
    fn stat(&self, path: &Path) -> Option<FileStat> {
        self.files.read().get(path).map(|(stat, _)| *stat)
    }

    fn hash_file(&self, path: &Path, _force: bool) -> Result<FileHash, AssetTrackError> {
        self.files
            .read()
            .get(path)
            .map(|(_, bytes)| hash_bytes(bytes))
            .ok_or_else(|| AssetTrackError::NotFound(format!("{path:?}")))
    }

    fn read_document(
        &self,
        path: &Path,
        reader: &mut dyn FnMut(&[u8]) -> Result<(), AssetTrackError>,
    ) -> Result<(), AssetTrackError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let bytes = self
            .files
            .read()
            .get(path)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| AssetTrackError::NotFound(format!("{path:?}")))?;
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
        let mut pending = self.pending.lock();
        if !pending.iter().any(|queued| queued == path) {
            pending.push(path.to_path_buf());
        }
    }

    fn take_pending_changes(&self) -> Vec<PathBuf> {
        std::mem::take(&mut *self.pending.lock())
    }

    fn is_same_file(&self, lhs: &Path, rhs: &Path) -> bool {
        lhs == rhs
    }
}

/// The TOML asset document handler, reading and rewriting through a [`MemoryFileModel`] and
/// checking products against its stamps.
pub struct MemoryDocHandler {
    inner: AssetDocHandler,
    files: Arc<MemoryFileModel>,
}

impl MemoryDocHandler {
    pub fn new(files: Arc<MemoryFileModel>) -> Self {
        MemoryDocHandler {
            inner: AssetDocHandler::new(
                TypeDescriptor {
                    name: "asset".to_string(),
                    version: 1,
                    thumbnails: true,
                },
                "asset",
            ),
            files,
        }
    }
}

impl DocumentTypeHandler for MemoryDocHandler {
    fn descriptor(&self) -> &TypeDescriptor {
        self.inner.descriptor()
    }

    fn claims(&self, path: &Path) -> bool {
        self.inner.claims(path)
    }

    fn parse_info(&self, path: &Path, bytes: &[u8]) -> Result<DocumentInfo, AssetTrackError> {
        self.inner.parse_info(path, bytes)
    }

    fn clone_document(
        &self,
        src: &Path,
        dst: &Path,
        guid: &AssetGuid,
    ) -> Result<(), AssetTrackError> {
        let locked = self
            .files
            .failing_rewrites
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if locked {
            return Err(AssetTrackError::Io(format!("{dst:?} is locked")));
        }
        let content = self
            .files
            .content(src)
            .ok_or_else(|| AssetTrackError::NotFound(format!("{src:?}")))?;
        self.files
            .write(dst, rewrite_guid(&content, guid)?.as_bytes());
        Ok(())
    }

    fn is_up_to_date(&self, asset: &AssetInfo, asset_hash: FileHash) -> bool {
        self.files
            .stamps
            .read()
            .get(&asset.absolute_path)
            .map(|(stamped, _)| *stamped == asset_hash)
            .unwrap_or(false)
    }

    fn is_thumbnail_up_to_date(&self, asset: &AssetInfo, thumb_hash: FileHash) -> bool {
        self.files
            .stamps
            .read()
            .get(&asset.absolute_path)
            .map(|(_, stamped)| *stamped == thumb_hash)
            .unwrap_or(false)
    }
}

/// Builds the text of a TOML asset document.
#[derive(Debug, Clone, Default)]
pub struct DocBuilder {
    guid: Option<AssetGuid>,
    settings: Vec<String>,
    transform: Vec<Reference>,
    thumbnail: Vec<Reference>,
    sub_assets: Vec<String>,
}

fn render_references(references: &[Reference]) -> String {
    references
        .iter()
        .map(|reference| match reference {
            Reference::Guid(guid) => format!("{{ guid = \"{guid}\" }}"),
            Reference::Path(path) => format!("{{ path = \"{path}\" }}"),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl DocBuilder {
    pub fn new(guid: AssetGuid) -> Self {
        DocBuilder {
            guid: Some(guid),
            ..Default::default()
        }
    }

    /// A document without an embedded identity.
    pub fn anonymous() -> Self {
        DocBuilder::default()
    }

    pub fn setting(mut self, line: &str) -> Self {
        self.settings.push(line.to_string());
        self
    }

    pub fn transform(mut self, reference: Reference) -> Self {
        self.transform.push(reference);
        self
    }

    pub fn thumbnail(mut self, reference: Reference) -> Self {
        self.thumbnail.push(reference);
        self
    }

    pub fn sub_asset(mut self, name: &str) -> Self {
        self.sub_assets.push(name.to_string());
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(guid) = self.guid {
            writeln!(out, "guid = \"{guid}\"").ok();
        }
        out.push_str("\n[settings]\n");
        for line in self.settings.iter() {
            writeln!(out, "{line}").ok();
        }
        out.push_str("\n[dependencies]\n");
        writeln!(out, "transform = [{}]", render_references(&self.transform)).ok();
        writeln!(out, "thumbnail = [{}]", render_references(&self.thumbnail)).ok();
        for name in self.sub_assets.iter() {
            writeln!(out, "\n[[sub_assets]]\nname = \"{name}\"\nkind = \"mesh\"").ok();
        }
        out
    }
}

pub fn guid_ref(guid: AssetGuid) -> Reference {
    Reference::Guid(guid)
}

pub fn path_ref(path: &str) -> Reference {
    Reference::Path(path.to_string())
}

pub fn test_config() -> TrackerConfig {
    TrackerConfig {
        data_dirs: vec![PathBuf::from(DATA_ROOT)],
        rewrite_retry: RetryPolicy {
            max_attempts: 3,
            backoff_step_ms: 0,
        },
        ..Default::default()
    }
}

/// An engine over a [`MemoryFileModel`] rooted at [`DATA_ROOT`], with a receiver for its events.
pub struct TestBed {
    pub files: Arc<MemoryFileModel>,
    pub engine: AssetEngine,
    events: UnboundedReceiver<AssetEvent>,
}

impl TestBed {
    pub fn new() -> Self {
        TestBed::with_config(test_config())
    }

    pub fn with_config(config: TrackerConfig) -> Self {
        init_logging();
        let files = Arc::new(MemoryFileModel::default());
        let (tx, events) = unbounded_channel();
        let engine = AssetEngine::new(
            config,
            files.clone(),
            Arc::new(DataDirectories::new([DATA_ROOT])),
            Some(tx),
        )
        .unwrap();
        engine.handlers().insert(MemoryDocHandler::new(files.clone()));
        TestBed {
            files,
            engine,
            events,
        }
    }

    /// Write a document without registering it.
    pub fn put(&self, relative: &str, doc: &DocBuilder) -> PathBuf {
        let path = data_path(relative);
        self.files.write(&path, doc.render().as_bytes());
        path
    }

    pub fn write_file(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = data_path(relative);
        self.files.write(&path, content);
        path
    }

    pub fn register(&self, relative: &str) -> Result<(), AssetTrackError> {
        let path = data_path(relative);
        let stat = self
            .files
            .stat(&path)
            .ok_or_else(|| AssetTrackError::NotFound(relative.to_string()))?;
        self.engine.ensure_asset_updated(&path, stat, false)
    }

    /// Write and register a document.
    pub fn add(&self, relative: &str, doc: &DocBuilder) -> PathBuf {
        let path = self.put(relative, doc);
        self.register(relative).unwrap();
        path
    }

    pub fn asset(&self, guid: &AssetGuid) -> AssetInfo {
        self.engine.get_asset(guid).unwrap()
    }

    pub fn state(&self, guid: &AssetGuid) -> TransformState {
        self.engine.get_transform_state(guid)
    }

    pub fn settings_hash(&self, guid: &AssetGuid) -> FileHash {
        self.asset(guid).info.settings_hash
    }

    /// Drain the events published so far.
    pub fn events(&mut self) -> Vec<AssetEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
