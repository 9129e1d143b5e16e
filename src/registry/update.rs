//! File-system driven registration on [`AssetEngine`].

use crate::{
    codec::DocumentTypeHandler,
    depindex::DependencyKey,
    engine::AssetEngine,
    error::AssetTrackError,
    files::normalize_path,
    properties::{AssetGuid, AssetInfo, DocumentInfo, ExistenceState, FileStat, LogEntry, TransformState},
    registry::RegistryState,
};
use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    thread::sleep,
};
use walkdir::{DirEntry, WalkDir};

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

#[derive(Debug, PartialEq)]
enum Identity {
    New,
    Existing,
    Moved(PathBuf),
    Duplicate,
}

/// Attempts at classifying a document before a concurrently changing identity is treated as a
/// duplicate.
const IDENTITY_ATTEMPTS: usize = 3;

struct PreviousLocation {
    path: PathBuf,
    /// A different file still exists at `path`.
    occupied: bool,
}

/// Decide what registering `guid` at `absolute` means for the current registry. `None` when the
/// disk facts in `previous` were gathered for another location than the one now registered.
fn classify(
    state: &RegistryState,
    guid: &AssetGuid,
    absolute: &Path,
    previous: Option<&PreviousLocation>,
    give_up: bool,
) -> Option<Identity> {
    let Some(existing) = state.asset(guid) else {
        return Some(Identity::New);
    };
    if existing.absolute_path == absolute {
        return Some(Identity::Existing);
    }
    if existing.is_removed() {
        return Some(Identity::Moved(existing.absolute_path.clone()));
    }
    match previous {
        Some(previous) if previous.path == existing.absolute_path => {
            if previous.occupied {
                Some(Identity::Duplicate)
            } else {
                Some(Identity::Moved(previous.path.clone()))
            }
        }
        _ if give_up => Some(Identity::Duplicate),
        _ => None,
    }
}

impl AssetEngine {
    /// Register or refresh the asset document at `path`.
    ///
    /// The document is read before the registry lock is taken. Moves, duplicates and identity
    /// overwrites are detected from the embedded GUID. A duplicate gets a derived identity written
    /// into its file and is queued for rediscovery instead of being registered.
    pub fn ensure_asset_updated(
        &self,
        path: &Path,
        stat: FileStat,
        force: bool,
    ) -> Result<(), AssetTrackError> {
        let absolute = normalize_path(path);
        let handler = self
            .handlers
            .find_document_type(&absolute)
            .ok_or_else(|| AssetTrackError::UnknownDocumentType(format!("{absolute:?}")))?;
        let relative = self.paths.make_relative(&absolute).ok_or_else(|| {
            AssetTrackError::NotFound(format!("{absolute:?} lies outside every data directory"))
        })?;

        let info = match self.read_info(&absolute, stat, handler.as_ref(), force) {
            Ok(info) => info,
            Err(e) => {
                tracing::warn!("Failed to read asset document {relative}: {e}");
                self.mutate(|state| {
                    if let Some(guid) = state.paths.get(&absolute).copied() {
                        if let Some(asset) = state.assets.get_mut(&guid) {
                            asset.log = vec![LogEntry::error(e.to_string())];
                        }
                        state.update_transform_state(&guid, TransformState::Unknown);
                    }
                });
                return Err(e);
            }
        };
        let guid = info.guid;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let previous = self.previous_location(&guid, &absolute);
            let outcome = self.mutate(|state| {
                let give_up = attempt >= IDENTITY_ATTEMPTS;
                let identity = classify(state, &guid, &absolute, previous.as_ref(), give_up)?;
                if let Identity::Duplicate = identity {
                    return Some(Identity::Duplicate);
                }
                self.commit_registration(
                    state,
                    handler.as_ref(),
                    &absolute,
                    &relative,
                    info.clone(),
                    &identity,
                );
                Some(identity)
            });
            match outcome {
                Some(Identity::Duplicate) => {
                    return self.resolve_duplicate(handler.as_ref(), &absolute, &relative, &guid);
                }
                Some(_) => break,
                None => tracing::debug!(
                    "[AssetRegistry] {guid} was registered elsewhere while {relative} was inspected, retrying"
                ),
            }
        }
        self.files.link_document(&absolute, guid);
        Ok(())
    }

    /// Where `guid` is registered now if that is not `absolute`, and whether that file is still a
    /// separate file on disk. Runs without the registry lock.
    fn previous_location(&self, guid: &AssetGuid, absolute: &Path) -> Option<PreviousLocation> {
        let path = self
            .read(|state| state.asset(guid).map(|asset| asset.absolute_path.clone()))
            .filter(|path| path != absolute)?;
        let occupied = self.files.exists(&path) && !self.files.is_same_file(&path, absolute);
        Some(PreviousLocation { path, occupied })
    }

    fn commit_registration(
        &self,
        state: &mut RegistryState,
        handler: &dyn DocumentTypeHandler,
        absolute: &Path,
        relative: &str,
        info: DocumentInfo,
        identity: &Identity,
    ) {
        let guid = info.guid;
        if let Some(previous) = state.paths.get(absolute).copied() {
            if previous != guid {
                tracing::info!("[AssetRegistry] {relative}: identity {previous} replaced by {guid}");
                state.retire_asset(&previous);
                state.paths.remove(absolute);
            }
        }

        let was_live = state
            .asset(&guid)
            .map(|asset| !asset.is_removed())
            .unwrap_or(false);
        state.untrack_asset(&guid);

        let mut rewire = BTreeSet::new();
        if let Identity::Moved(old_path) = identity {
            tracing::info!("[AssetRegistry] {guid} moved from {old_path:?} to {relative}");
            rewire = state
                .deps
                .dependents_of(&DependencyKey::Asset(old_path.clone()))
                .into_iter()
                .filter(|dependent| {
                    *dependent != guid
                        && state
                            .asset(dependent)
                            .map(|asset| asset.info.references(&guid))
                            .unwrap_or(false)
                })
                .collect();
            for dependent in rewire.iter() {
                state.untrack_asset(dependent);
            }
            // The old path may belong to another identity by now.
            if state.paths.get(old_path) == Some(&guid) {
                state.paths.remove(old_path);
                self.files.unlink_document(old_path);
                self.documents.remove(old_path);
            }
        }

        let existence = match (identity, was_live) {
            (Identity::Moved(_), _) => ExistenceState::FileMoved,
            (_, true) => ExistenceState::FileModified,
            _ => ExistenceState::FileAdded,
        };
        let descriptor = handler.descriptor().clone();
        let asset = state.assets.entry(guid).or_insert_with(|| AssetInfo {
            guid,
            ..Default::default()
        });
        asset.path = relative.to_string();
        asset.absolute_path = absolute.to_path_buf();
        asset.descriptor = descriptor;
        asset.info = info;
        asset.log.clear();
        state.paths.insert(absolute.to_path_buf(), guid);

        state.track_asset(&guid, self.paths.as_ref());
        for dependent in rewire.iter() {
            state.track_asset(dependent, self.paths.as_ref());
        }
        let resolved = state.deps.resolve_pending(&state.assets);
        if !resolved.is_empty() {
            tracing::debug!("[AssetRegistry] {guid} resolved pending edges of {resolved:?}");
        }

        state.check_circular_dependencies(&guid);
        state.set_existence(&guid, existence);
        state.update_transform_state(&guid, TransformState::Unknown);
        state.sync_sub_assets(&guid);
    }

    fn read_info(
        &self,
        absolute: &Path,
        stat: FileStat,
        handler: &dyn DocumentTypeHandler,
        force: bool,
    ) -> Result<DocumentInfo, AssetTrackError> {
        if !force {
            if let Some(info) = self.documents.get(absolute, stat.last_modified) {
                return Ok(info);
            }
        }

        let mut parsed = None;
        self.files
            .read_document(absolute, &mut |bytes: &[u8]| {
                parsed = Some(handler.parse_info(absolute, bytes)?);
                Ok(())
            })
            .map_err(|e| match e {
                AssetTrackError::ReadFailure { .. } => e,
                other => AssetTrackError::read_failure(absolute, other),
            })?;
        let mut info =
            parsed.ok_or_else(|| AssetTrackError::read_failure(absolute, "no document content"))?;

        let mut stat = stat;
        if info.guid.is_nil() {
            if !self.config.inject_missing_guids {
                return Err(AssetTrackError::read_failure(
                    absolute,
                    "document has no guid",
                ));
            }
            let guid = AssetGuid::new();
            let relative = self
                .paths
                .make_relative(absolute)
                .unwrap_or_else(|| format!("{absolute:?}"));
            self.rewrite_identity(handler, absolute, &relative, &guid)?;
            tracing::info!("[AssetRegistry] injected guid {guid} into {relative}");
            info.guid = guid;
            stat = self.files.stat(absolute).unwrap_or(stat);
        }
        self.documents.insert(absolute, stat.last_modified, info.clone());
        Ok(info)
    }

    /// Give a copied document its own identity. Never touches the registry: the rewritten file
    /// is picked up again through [`crate::files::FileModel::notify_of_change`].
    fn resolve_duplicate(
        &self,
        handler: &dyn DocumentTypeHandler,
        absolute: &Path,
        relative: &str,
        original: &AssetGuid,
    ) -> Result<(), AssetTrackError> {
        let replacement = original.derive_replacement(relative);
        tracing::info!(
            "[AssetRegistry] {relative} duplicates {original}, rewriting its identity to {replacement}"
        );
        self.rewrite_identity(handler, absolute, relative, &replacement)?;
        self.documents.remove(absolute);
        self.files.notify_of_change(absolute);
        Ok(())
    }

    fn rewrite_identity(
        &self,
        handler: &dyn DocumentTypeHandler,
        absolute: &Path,
        relative: &str,
        guid: &AssetGuid,
    ) -> Result<(), AssetTrackError> {
        let policy = self.config.rewrite_retry;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match handler.clone_document(absolute, absolute, guid) {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                    tracing::debug!(
                        "[AssetRegistry] rewriting {relative} failed (attempt {attempt}): {e}"
                    );
                    sleep(policy.backoff(attempt));
                }
                Err(e) => {
                    tracing::warn!(
                        "Giving up rewriting the identity of {relative} after {attempt} attempts: {e}"
                    );
                    return Err(AssetTrackError::IdentityCollisionUnresolvable {
                        path: relative.to_string(),
                        attempts: attempt,
                    });
                }
            }
        }
    }

    /// A file disappeared. Assets are soft-deleted; for any other file its dependents are
    /// invalidated.
    pub fn handle_file_removed(&self, path: &Path) {
        let absolute = normalize_path(path);
        let relative = self.paths.make_relative(&absolute);
        self.documents.remove(&absolute);
        let retired = self.mutate(|state| {
            let live_asset = state
                .asset_at(&absolute)
                .filter(|asset| !asset.is_removed())
                .map(|asset| asset.guid);
            match live_asset {
                Some(guid) => {
                    tracing::info!("[AssetRegistry] {guid} removed ({absolute:?})");
                    state.retire_asset(&guid);
                    true
                }
                None => {
                    for dependent in state.deps.dependents_of_path(&absolute, relative.as_deref()) {
                        state.invalidate(&dependent);
                    }
                    false
                }
            }
        });
        if retired {
            self.files.unlink_document(&absolute);
        }
    }

    /// A file was created or modified. Asset documents are re-registered; for any other file its
    /// dependents are invalidated.
    pub fn notify_file_changed(&self, path: &Path) -> Result<(), AssetTrackError> {
        let absolute = normalize_path(path);
        let Some(stat) = self.files.stat(&absolute) else {
            self.handle_file_removed(&absolute);
            return Ok(());
        };
        if self.handlers.find_document_type(&absolute).is_some() {
            return self.ensure_asset_updated(&absolute, stat, false);
        }
        let relative = self.paths.make_relative(&absolute);
        self.mutate(|state| {
            let dependents = state.deps.dependents_of_path(&absolute, relative.as_deref());
            if !dependents.is_empty() {
                tracing::debug!("[AssetRegistry] {absolute:?} changed, invalidating {dependents:?}");
            }
            for dependent in dependents {
                state.invalidate(&dependent);
            }
        });
        Ok(())
    }

    /// Purge removed assets that nothing references any more.
    pub fn reap_removed(&self) -> Vec<AssetGuid> {
        self.mutate(|state| state.reap_removed())
    }

    /// Register every document in the data directories and retire assets whose file is gone.
    /// Returns the number of documents visited.
    pub fn scan_data_directories(&self) -> usize {
        let mut visited = 0;
        for root in self.paths.roots() {
            let walker = WalkDir::new(&root).into_iter().filter_entry(|e| !is_hidden(e));
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!("Skipping unreadable entry under {root:?}: {e}");
                        continue;
                    }
                };
                if !entry.file_type().is_file()
                    || self.handlers.find_document_type(entry.path()).is_none()
                {
                    continue;
                }
                let Some(stat) = self.files.stat(entry.path()) else {
                    continue;
                };
                visited += 1;
                if let Err(e) = self.ensure_asset_updated(entry.path(), stat, false) {
                    tracing::warn!("Failed to register {:?}: {e}", entry.path());
                }
            }
        }

        let vanished = self.read(|state| {
            state
                .assets
                .values()
                .filter(|asset| !asset.is_removed())
                .map(|asset| asset.absolute_path.clone())
                .collect::<Vec<_>>()
        });
        for path in vanished.into_iter().filter(|path| !self.files.exists(path)) {
            self.handle_file_removed(&path);
        }
        visited
    }

    /// Drain the file model's rediscovery queue. Returns the number of paths processed.
    pub fn process_pending_changes(&self) -> usize {
        let pending = self.files.take_pending_changes();
        for path in pending.iter() {
            if let Err(e) = self.notify_file_changed(path) {
                tracing::warn!("Failed to process change of {path:?}: {e}");
            }
        }
        pending.len()
    }
}
