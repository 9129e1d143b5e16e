use crate::{
    depindex::{DependencyIndex, DependencyKey},
    event::AssetEvent,
    files::PathResolver,
    properties::{AssetGuid, AssetInfo, ExistenceState, SubAsset, TransformState},
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    mem,
    path::{Path, PathBuf},
};

/// All tables guarded by the registry lock.
#[derive(Debug, Default)]
pub struct RegistryState {
    pub(crate) assets: HashMap<AssetGuid, AssetInfo>,
    /// Absolute path to the asset currently registered there. Removed assets keep their entry
    /// until another identity claims the path or they are reaped.
    pub(crate) paths: HashMap<PathBuf, AssetGuid>,
    pub(crate) sub_assets: HashMap<AssetGuid, SubAsset>,
    pub(crate) deps: DependencyIndex,
    pub(crate) buckets: HashMap<TransformState, BTreeSet<AssetGuid>>,
    /// Invalidated assets whose hashes have not been recomputed yet.
    pub(crate) stale: BTreeSet<AssetGuid>,
    /// Stale assets handed out by `next_stale` and not yet committed or released.
    pub(crate) in_flight: HashSet<AssetGuid>,
    pub(crate) events: Vec<AssetEvent>,
}

impl RegistryState {
    pub fn asset(&self, guid: &AssetGuid) -> Option<&AssetInfo> {
        self.assets.get(guid)
    }

    pub fn asset_at(&self, path: &Path) -> Option<&AssetInfo> {
        self.paths.get(path).and_then(|guid| self.assets.get(guid))
    }

    pub(crate) fn take_events(&mut self) -> Vec<AssetEvent> {
        mem::take(&mut self.events)
    }

    pub(crate) fn track_asset(&mut self, guid: &AssetGuid, resolver: &dyn PathResolver) {
        if let Some(asset) = self.assets.get(guid) {
            self.deps.track(guid, &asset.info, &self.assets, resolver);
        }
    }

    pub(crate) fn untrack_asset(&mut self, guid: &AssetGuid) {
        self.deps.untrack(guid);
    }

    /// Assets depending on `guid`, by GUID or by a path reference to its document.
    pub(crate) fn dependents_of_asset(&self, guid: &AssetGuid) -> BTreeSet<AssetGuid> {
        self.assets
            .get(guid)
            .map(|asset| {
                self.deps
                    .dependents_of_path(&asset.absolute_path, Some(&asset.path))
            })
            .unwrap_or_default()
    }

    pub(crate) fn drop_from_buckets(&mut self, guid: &AssetGuid) {
        for bucket in self.buckets.values_mut() {
            bucket.remove(guid);
        }
        self.stale.remove(guid);
        self.in_flight.remove(guid);
    }

    /// Hand out the next stale asset nobody is working on.
    pub(crate) fn next_stale(&mut self) -> Option<(AssetGuid, PathBuf)> {
        let guid = self
            .stale
            .iter()
            .find(|guid| !self.in_flight.contains(guid))
            .copied()?;
        let asset = self.assets.get(&guid)?;
        let path = asset.absolute_path.clone();
        self.in_flight.insert(guid);
        Some((guid, path))
    }

    pub(crate) fn release(&mut self, guid: &AssetGuid) {
        self.in_flight.remove(guid);
    }

    pub(crate) fn set_existence(&mut self, guid: &AssetGuid, existence: ExistenceState) {
        if let Some(asset) = self.assets.get_mut(guid) {
            asset.existence_state = existence;
            self.events
                .push(AssetEvent::ExistenceChanged(*guid, existence));
        }
    }

    /// Bring the sub-asset table in line with what the asset document declares. The main
    /// sub-asset shares the asset's identity.
    pub(crate) fn sync_sub_assets(&mut self, guid: &AssetGuid) {
        let Some(asset) = self.assets.get_mut(guid) else {
            return;
        };
        let mut desired = BTreeMap::new();
        desired.insert(*guid, (true, asset.path.clone(), asset.descriptor.name.clone()));
        for declared in asset.info.sub_assets.iter() {
            desired.insert(
                guid.sub_asset(&declared.name),
                (false, declared.name.clone(), declared.kind.clone()),
            );
        }
        let previous = mem::replace(&mut asset.sub_assets, desired.keys().copied().collect());

        for removed in previous.iter().filter(|id| !desired.contains_key(id)) {
            self.sub_assets.remove(removed);
            self.events.push(AssetEvent::SubAssetChanged(
                *removed,
                ExistenceState::FileRemoved,
            ));
        }
        for (id, (is_main_asset, name, kind)) in desired {
            // A sub-asset of a previously removed asset counts as added again.
            let added = !previous.contains(&id)
                || self
                    .sub_assets
                    .get(&id)
                    .map(|sub| sub.existence_state == ExistenceState::FileRemoved)
                    .unwrap_or(true);
            let existence_state = if added {
                ExistenceState::FileAdded
            } else {
                ExistenceState::FileUnchanged
            };
            if added {
                self.events
                    .push(AssetEvent::SubAssetChanged(id, ExistenceState::FileAdded));
            }
            self.sub_assets.insert(
                id,
                SubAsset {
                    guid: id,
                    is_main_asset,
                    existence_state,
                    owner: *guid,
                    name,
                    kind,
                },
            );
        }
    }

    /// Soft-delete an asset: it stays addressable as [`ExistenceState::FileRemoved`] for its
    /// dependents, but no longer declares edges or takes part in scheduling.
    pub(crate) fn retire_asset(&mut self, guid: &AssetGuid) {
        let Some(asset) = self.assets.get(guid) else {
            return;
        };
        if asset.is_removed() {
            return;
        }
        let sub_assets = asset.sub_assets.clone();
        self.untrack_asset(guid);
        self.set_existence(guid, ExistenceState::FileRemoved);
        // Dependents see a removed dependency from now on.
        self.invalidate(guid);
        self.drop_from_buckets(guid);
        for id in sub_assets {
            if let Some(sub) = self.sub_assets.get_mut(&id) {
                sub.existence_state = ExistenceState::FileRemoved;
                self.events
                    .push(AssetEvent::SubAssetChanged(id, ExistenceState::FileRemoved));
            }
        }
    }

    fn is_referenced(&self, guid: &AssetGuid) -> bool {
        self.assets
            .values()
            .any(|asset| !asset.is_removed() && asset.info.references(guid))
    }

    /// Purge removed assets nothing depends on any more, together with their sub-assets.
    pub(crate) fn reap_removed(&mut self) -> Vec<AssetGuid> {
        let candidates = self
            .assets
            .values()
            .filter(|asset| asset.is_removed())
            .map(|asset| (asset.guid, asset.absolute_path.clone(), asset.path.clone()))
            .collect::<Vec<_>>();

        let mut reaped = Vec::new();
        for (guid, path, relative) in candidates {
            let owns_path = self.paths.get(&path) == Some(&guid);
            if self.is_referenced(&guid)
                || (owns_path
                    && !self
                        .deps
                        .dependents_of_path(&path, Some(&relative))
                        .is_empty())
            {
                continue;
            }
            if owns_path {
                self.paths.remove(&path);
            }
            self.drop_from_buckets(&guid);
            if let Some(asset) = self.assets.remove(&guid) {
                for id in asset.sub_assets.iter() {
                    self.sub_assets.remove(id);
                }
            }
            tracing::debug!("[RegistryState] reaped removed asset {guid} ({path:?})");
            reaped.push(guid);
        }
        reaped
    }

    /// Consistency check of the cross-table invariants. Returns one message per violation.
    pub fn check_invariants(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for (guid, asset) in self.assets.iter() {
            for id in asset.sub_assets.iter() {
                match self.sub_assets.get(id) {
                    Some(sub) if sub.owner == *guid => {}
                    Some(sub) => errors.push(format!(
                        "sub-asset {id} of {guid} is owned by {}",
                        sub.owner
                    )),
                    None => errors.push(format!("sub-asset {id} of {guid} has no table entry")),
                }
            }
            if asset.is_removed() {
                continue;
            }
            let memberships = self
                .buckets
                .iter()
                .filter(|(_, members)| members.contains(guid))
                .map(|(state, _)| *state)
                .collect::<Vec<_>>();
            if memberships.len() > 1 {
                errors.push(format!("{guid} is in several state buckets: {memberships:?}"));
            }
            for target in asset.info.guid_dependencies() {
                let pending = self.deps.is_unresolved(guid, target);
                let resolved = self
                    .assets
                    .get(target)
                    .map(|dep| {
                        self.deps
                            .dependents_of(&DependencyKey::Asset(dep.absolute_path.clone()))
                            .contains(guid)
                    })
                    .unwrap_or(false);
                if pending == resolved {
                    errors.push(format!(
                        "edge {guid} -> {target} is resolved: {resolved}, pending: {pending}"
                    ));
                }
            }
        }
        for (path, guid) in self.paths.iter() {
            match self.assets.get(guid) {
                Some(asset) if asset.absolute_path == *path => {}
                Some(asset) => errors.push(format!(
                    "{path:?} maps to {guid}, which is registered at {:?}",
                    asset.absolute_path
                )),
                None => errors.push(format!("{path:?} maps to unknown asset {guid}")),
            }
        }
        for owner in self.deps.tracked_assets() {
            let live = self
                .assets
                .get(owner)
                .map(|asset| !asset.is_removed())
                .unwrap_or(false);
            if !live {
                errors.push(format!("{owner} owns dependency edges but is not a live asset"));
            }
        }
        for (id, sub) in self.sub_assets.iter() {
            let listed = self
                .assets
                .get(&sub.owner)
                .map(|owner| owner.sub_assets.contains(id))
                .unwrap_or(false);
            if !listed {
                errors.push(format!("sub-asset {id} is not listed by its owner {}", sub.owner));
            }
        }
        errors
    }
}
