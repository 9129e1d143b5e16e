//! The engine handle.
//!
//! [`AssetEngine`] owns the registry lock and its collaborators. It is created explicitly with
//! [`AssetEngine::new`] (or [`AssetEngine::open`] over the local file system), shared as an
//! `Arc` with the [`crate::scheduler::UpdateScheduler`] workers and the file watcher, and closed
//! with [`AssetEngine::shutdown`].
//!
//! Hash evaluation never holds the lock: [`AssetEngine::ensure_transform_state`] snapshots the
//! asset and its generation under the lock, hashes unlocked (recursing into GUID dependencies),
//! and commits only if the generation did not move in the meantime.

use crate::{
    cache::DocumentInfoCache,
    codec::{DocumentTypeHandler, HandlerMap},
    config::TrackerConfig,
    error::AssetTrackError,
    event::AssetEvent,
    files::{normalize_path, DataDirectories, FileModel, LocalFileModel, PathResolver},
    hash::{hash_asset, DependencyHashes, DependencySource},
    properties::{AssetGuid, AssetInfo, FileHash, LogEntry, SubAsset, TransformState},
    registry::RegistryState,
};
use parking_lot::Mutex;
use std::{
    cell::RefCell,
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::sync::{mpsc::UnboundedSender, Notify};

pub struct AssetEngine {
    pub(crate) state: Mutex<RegistryState>,
    pub(crate) files: Arc<dyn FileModel>,
    pub(crate) paths: Arc<dyn PathResolver>,
    pub(crate) handlers: HandlerMap,
    pub(crate) documents: DocumentInfoCache,
    pub(crate) config: TrackerConfig,
    event_tx: Option<UnboundedSender<AssetEvent>>,
    work_available: Arc<Notify>,
    shut_down: AtomicBool,
}

fn hashes_of(asset: &AssetInfo) -> DependencyHashes {
    DependencyHashes {
        state: asset.transform_state,
        asset_hash: asset.asset_hash,
        thumb_hash: asset.thumb_hash,
    }
}

enum Prepared {
    Settled(DependencyHashes),
    Evaluate { asset: Box<AssetInfo>, generation: u64 },
}

/// Feeds [`hash_asset`] from the engine, evaluating GUID dependencies on demand.
struct EngineSource<'e> {
    engine: &'e AssetEngine,
    force: bool,
    visiting: &'e RefCell<BTreeSet<AssetGuid>>,
}

impl DependencySource for EngineSource<'_> {
    fn guid_dependency(&self, guid: &AssetGuid) -> Option<DependencyHashes> {
        if self.visiting.borrow().contains(guid) {
            return None;
        }
        let live = self
            .engine
            .read(|state| state.asset(guid).map(|asset| !asset.is_removed()))
            .unwrap_or(false);
        if !live {
            return None;
        }
        match self.engine.evaluate(guid, self.force, self.visiting) {
            Ok(hashes) => Some(hashes),
            Err(e) => {
                tracing::debug!("[EngineSource] dependency {guid} could not be evaluated: {e}");
                None
            }
        }
    }

    fn file_hash(&self, path: &str, force: bool) -> Result<FileHash, AssetTrackError> {
        let candidates = self.engine.paths.candidates(path);
        let absolute = candidates
            .iter()
            .find(|candidate| self.engine.files.exists(candidate))
            .or_else(|| candidates.first())
            .ok_or_else(|| {
                AssetTrackError::NotFound(format!("{path} lies outside every data directory"))
            })?;
        self.engine.files.hash_file(absolute, force)
    }
}

impl AssetEngine {
    pub fn new(
        config: TrackerConfig,
        files: Arc<dyn FileModel>,
        paths: Arc<dyn PathResolver>,
        event_tx: Option<UnboundedSender<AssetEvent>>,
    ) -> Result<Self, AssetTrackError> {
        let documents = match config.document_cache.as_ref() {
            Some(cache_path) => DocumentInfoCache::load(cache_path).unwrap_or_else(|e| {
                tracing::warn!("Discarding unreadable document cache {cache_path:?}: {e}");
                DocumentInfoCache::new()
            }),
            None => DocumentInfoCache::new(),
        };
        let handlers = HandlerMap::from_config(&config.document_types);
        tracing::info!(
            "[AssetEngine] tracking {:?} with document types {:?}",
            paths.roots(),
            handlers.descriptors()
        );
        Ok(AssetEngine {
            state: Mutex::new(RegistryState::default()),
            files,
            paths,
            handlers,
            documents,
            config,
            event_tx,
            work_available: Arc::new(Notify::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Engine over the local file system, rooted at the configured data directories.
    pub fn open(
        config: TrackerConfig,
        event_tx: Option<UnboundedSender<AssetEvent>>,
    ) -> Result<Self, AssetTrackError> {
        config.validate()?;
        let paths = Arc::new(DataDirectories::new(config.data_dirs.iter()));
        AssetEngine::new(config, Arc::new(LocalFileModel::new()), paths, event_tx)
    }

    /// Stop handing out work and persist the document-info cache.
    pub fn shutdown(&self) -> Result<(), AssetTrackError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("[AssetEngine] shutting down");
        self.work_available.notify_waiters();
        if let Some(cache_path) = self.config.document_cache.as_ref() {
            self.documents.save(cache_path)?;
        }
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn handlers(&self) -> &HandlerMap {
        &self.handlers
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub(crate) fn work_available(&self) -> Arc<Notify> {
        self.work_available.clone()
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&RegistryState) -> R) -> R {
        f(&self.state.lock())
    }

    /// Run `f` under the registry lock, then dispatch the events it produced once the lock is
    /// released.
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut RegistryState) -> R) -> R {
        let (result, events, has_work) = {
            let mut state = self.state.lock();
            let result = f(&mut state);
            let has_work = state.stale.len() > state.in_flight.len();
            (result, state.take_events(), has_work)
        };
        self.publish(events, has_work);
        result
    }

    fn publish(&self, events: Vec<AssetEvent>, has_work: bool) {
        if let Some(tx) = self.event_tx.as_ref() {
            for event in events {
                if let Err(e) = tx.send(event) {
                    tracing::debug!("[AssetEngine] dropping events: {}", AssetTrackError::from(e));
                    break;
                }
            }
        }
        if has_work {
            self.work_available.notify_waiters();
        }
    }

    pub fn get_transform_state(&self, guid: &AssetGuid) -> TransformState {
        self.read(|state| {
            state
                .asset(guid)
                .map(|asset| asset.transform_state)
                .unwrap_or_default()
        })
    }

    /// Pop a stale asset for evaluation. The asset stays stale until its result is committed.
    pub fn get_next_to_update(&self) -> Option<(AssetGuid, PathBuf)> {
        if self.is_shut_down() {
            return None;
        }
        self.state.lock().next_stale()
    }

    /// Compute the transform state of `guid` in the foreground. Failures are logged and returned.
    pub fn ensure_transform_state(
        &self,
        guid: &AssetGuid,
        force: bool,
    ) -> Result<TransformState, AssetTrackError> {
        let visiting = RefCell::new(BTreeSet::new());
        match self.evaluate(guid, force, &visiting) {
            Ok(hashes) => Ok(hashes.state),
            Err(e) => {
                tracing::warn!("Failed to evaluate asset {guid}: {e}");
                Err(e)
            }
        }
    }

    /// Scheduler entry point. Failures are muted to debug level.
    #[tracing::instrument(skip_all)]
    pub(crate) fn evaluate_background(&self, guid: &AssetGuid) {
        let visiting = RefCell::new(BTreeSet::new());
        if let Err(e) = self.evaluate(guid, false, &visiting) {
            tracing::debug!("[background] evaluation of {guid} failed: {e}");
        }
    }

    /// Evaluate every stale asset in the foreground. Returns the number of evaluations.
    pub fn process_all(&self) -> usize {
        let mut evaluated = 0;
        while let Some((guid, _)) = self.get_next_to_update() {
            // Failures are logged by ensure_transform_state and leave the asset settled.
            let _ = self.ensure_transform_state(&guid, false);
            evaluated += 1;
        }
        evaluated
    }

    pub(crate) fn evaluate(
        &self,
        guid: &AssetGuid,
        force: bool,
        visiting: &RefCell<BTreeSet<AssetGuid>>,
    ) -> Result<DependencyHashes, AssetTrackError> {
        let prepared = self.mutate(|state| -> Result<Prepared, AssetTrackError> {
            let (settled, removed, hashes, generation) = {
                let asset = state
                    .asset(guid)
                    .ok_or_else(|| AssetTrackError::NotFound(format!("asset {guid}")))?;
                (
                    !state.stale.contains(guid)
                        && asset.transform_state != TransformState::Unknown,
                    asset.is_removed(),
                    hashes_of(asset),
                    asset.last_state_update,
                )
            };
            if removed || (settled && !force) {
                state.release(guid);
                return Ok(Prepared::Settled(hashes));
            }
            if !state.check_circular_dependencies(guid) {
                let cycle = state
                    .asset(guid)
                    .map(|asset| {
                        asset
                            .circular_dependencies
                            .iter()
                            .map(|reference| reference.to_string())
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default();
                state.commit_hash_result(
                    guid,
                    generation,
                    TransformState::CircularDependency,
                    0,
                    0,
                    vec![LogEntry::error(format!("circular dependency through {cycle}"))],
                );
                state.release(guid);
                let hashes = state.asset(guid).map(hashes_of).unwrap_or(hashes);
                return Ok(Prepared::Settled(hashes));
            }
            let asset = state
                .asset(guid)
                .cloned()
                .ok_or_else(|| AssetTrackError::NotFound(format!("asset {guid}")))?;
            Ok(Prepared::Evaluate {
                asset: Box::new(asset),
                generation,
            })
        })?;

        let (asset, generation) = match prepared {
            Prepared::Settled(hashes) => return Ok(hashes),
            Prepared::Evaluate { asset, generation } => (asset, generation),
        };

        visiting.borrow_mut().insert(*guid);
        let computed = self.compute(&asset, force, visiting);
        visiting.borrow_mut().remove(guid);

        match computed {
            Ok((new_state, asset_hash, thumb_hash, log)) => Ok(self.mutate(|state| {
                state.commit_hash_result(guid, generation, new_state, asset_hash, thumb_hash, log);
                state.release(guid);
                state.asset(guid).map(hashes_of).unwrap_or(DependencyHashes {
                    state: TransformState::Unknown,
                    asset_hash: 0,
                    thumb_hash: 0,
                })
            })),
            Err(e) => {
                self.mutate(|state| {
                    if let Some(info) = state.assets.get_mut(guid) {
                        info.log = vec![LogEntry::error(e.to_string())];
                    }
                    state.stale.remove(guid);
                    state.release(guid);
                });
                Err(e)
            }
        }
    }

    fn compute(
        &self,
        asset: &AssetInfo,
        force: bool,
        visiting: &RefCell<BTreeSet<AssetGuid>>,
    ) -> Result<(TransformState, FileHash, FileHash, Vec<LogEntry>), AssetTrackError> {
        let handler = self.handler_for(asset)?;
        let source = EngineSource {
            engine: self,
            force,
            visiting,
        };
        let outcome = hash_asset(
            &source,
            asset.info.settings_hash,
            &asset.info.transform_dependencies,
            &asset.info.thumbnail_dependencies,
            force,
        );
        let log = outcome
            .missing
            .iter()
            .map(|reference| LogEntry::warning(format!("missing dependency {reference}")))
            .collect::<Vec<_>>();

        let new_state = match outcome.state {
            TransformState::Unknown => {
                if !handler.is_up_to_date(asset, outcome.asset_hash) {
                    TransformState::NeedsTransform
                } else if asset.descriptor.thumbnails
                    && !handler.is_thumbnail_up_to_date(asset, outcome.thumb_hash)
                {
                    TransformState::NeedsThumbnail
                } else {
                    TransformState::UpToDate
                }
            }
            missing => missing,
        };
        Ok((new_state, outcome.asset_hash, outcome.thumb_hash, log))
    }

    pub(crate) fn handler_for(
        &self,
        asset: &AssetInfo,
    ) -> Result<Arc<dyn DocumentTypeHandler>, AssetTrackError> {
        self.handlers
            .get(&asset.descriptor.name)
            .or_else(|| self.handlers.find_document_type(&asset.absolute_path))
            .ok_or_else(|| AssetTrackError::UnknownDocumentType(asset.path.clone()))
    }

    /// Record the outcome of an external transform run. A failure moves the asset to
    /// [`TransformState::TransformError`]; success re-evaluates it against the new products.
    pub fn report_transform_result(
        &self,
        guid: &AssetGuid,
        result: Result<(), String>,
    ) -> Result<TransformState, AssetTrackError> {
        match result {
            Err(message) => self.mutate(|state| -> Result<TransformState, AssetTrackError> {
                let asset = state
                    .assets
                    .get_mut(guid)
                    .ok_or_else(|| AssetTrackError::NotFound(format!("asset {guid}")))?;
                asset.log.push(LogEntry::error(message));
                state.update_transform_state(guid, TransformState::TransformError);
                Ok(TransformState::TransformError)
            }),
            Ok(()) => {
                self.mutate(|state| state.invalidate(guid));
                self.ensure_transform_state(guid, false)
            }
        }
    }

    pub fn get_asset(&self, guid: &AssetGuid) -> Option<AssetInfo> {
        self.read(|state| state.asset(guid).cloned())
    }

    pub fn asset_at(&self, path: &Path) -> Option<AssetInfo> {
        self.read(|state| state.asset_at(path).cloned())
    }

    /// Snapshot of every known asset, ordered by path.
    pub fn assets(&self) -> Vec<AssetInfo> {
        let mut assets = self.read(|state| state.assets.values().cloned().collect::<Vec<_>>());
        assets.sort_by(|lhs, rhs| lhs.path.cmp(&rhs.path));
        assets
    }

    pub fn assets_in_state(&self, transform_state: TransformState) -> BTreeSet<AssetGuid> {
        self.read(|state| {
            state
                .buckets
                .get(&transform_state)
                .cloned()
                .unwrap_or_default()
        })
    }

    pub fn stale_assets(&self) -> BTreeSet<AssetGuid> {
        self.read(|state| state.stale.clone())
    }

    pub fn is_idle(&self) -> bool {
        self.read(|state| state.stale.is_empty() && state.in_flight.is_empty())
    }

    pub fn sub_assets_of(&self, guid: &AssetGuid) -> Vec<SubAsset> {
        self.read(|state| {
            state
                .asset(guid)
                .map(|asset| {
                    asset
                        .sub_assets
                        .iter()
                        .filter_map(|id| state.sub_assets.get(id).cloned())
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    pub fn unresolved_edges(&self) -> Vec<(AssetGuid, AssetGuid)> {
        self.read(|state| state.deps.unresolved().copied().collect())
    }

    /// Assets depending on the file at `path`, through a GUID or a path reference.
    pub fn dependents_of(&self, path: &Path) -> BTreeSet<AssetGuid> {
        let absolute = normalize_path(path);
        let relative = self.paths.make_relative(&absolute);
        self.read(|state| state.deps.dependents_of_path(&absolute, relative.as_deref()))
    }

    pub fn check_invariants(&self) -> Vec<String> {
        self.read(|state| state.check_invariants())
    }
}
