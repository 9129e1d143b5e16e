//! Transform state bookkeeping on [`RegistryState`].

use super::state::RegistryState;
use crate::{
    event::AssetEvent,
    properties::{AssetGuid, FileHash, LogEntry, Reference, TransformState},
};
use std::collections::{BTreeSet, VecDeque};

impl RegistryState {
    /// Move `guid` into the bucket for `new_state` and apply the transition's side effects.
    pub fn update_transform_state(&mut self, guid: &AssetGuid, new_state: TransformState) {
        let Some(asset) = self.assets.get_mut(guid) else {
            return;
        };
        let old_state = asset.transform_state;
        asset.transform_state = new_state;
        let removed = asset.is_removed();
        let sub_assets = asset
            .sub_assets
            .iter()
            .filter(|id| *id != guid)
            .copied()
            .collect::<Vec<_>>();

        for bucket in self.buckets.values_mut() {
            bucket.remove(guid);
        }
        self.stale.remove(guid);
        if !removed {
            self.buckets.entry(new_state).or_default().insert(*guid);
        }

        let changed = old_state != new_state;
        if changed {
            tracing::debug!("[TransformState] {guid}: {old_state} -> {new_state}");
            self.events.push(AssetEvent::StateChanged(*guid, new_state));
            for id in sub_assets.iter() {
                self.events.push(AssetEvent::StateChanged(*id, new_state));
            }
        }

        match new_state {
            TransformState::TransformError => {
                for dependent in self.dependents_of_asset(guid) {
                    self.invalidate(&dependent);
                }
            }
            TransformState::Unknown => self.invalidate(guid),
            TransformState::UpToDate if changed => {
                self.events.push(AssetEvent::ThumbnailInvalidated(*guid));
                for id in sub_assets {
                    self.events.push(AssetEvent::ThumbnailInvalidated(id));
                }
            }
            _ => {}
        }
    }

    /// Mark `guid` and everything that transitively depends on it stale: bump the generation
    /// counter and zero both hashes. The visible transform state is left alone.
    pub fn invalidate(&mut self, guid: &AssetGuid) {
        let mut closure = self.inverse_transitive_hull(guid);
        closure.insert(*guid);
        for member in closure {
            let Some(asset) = self.assets.get_mut(&member) else {
                continue;
            };
            asset.last_state_update += 1;
            asset.asset_hash = 0;
            asset.thumb_hash = 0;
            if !asset.is_removed() {
                self.stale.insert(member);
            }
        }
    }

    /// Everything that transitively depends on `guid`. Contains `guid` itself only if it lies on
    /// a cycle.
    pub fn inverse_transitive_hull(&self, guid: &AssetGuid) -> BTreeSet<AssetGuid> {
        let mut hull = BTreeSet::new();
        let mut worklist = VecDeque::from([*guid]);
        while let Some(current) = worklist.pop_front() {
            for dependent in self.dependents_of_asset(&current) {
                if hull.insert(dependent) {
                    worklist.push_back(dependent);
                }
            }
        }
        hull
    }

    /// Record every GUID dependency of `guid` that also depends on `guid` into its
    /// `circular_dependencies`. Returns `false` if there is any.
    pub fn check_circular_dependencies(&mut self, guid: &AssetGuid) -> bool {
        let hull = self.inverse_transitive_hull(guid);
        let Some(asset) = self.assets.get_mut(guid) else {
            return true;
        };
        let cyclic = asset
            .info
            .guid_dependencies()
            .filter(|dep| hull.contains(dep))
            .map(|dep| Reference::Guid(*dep))
            .collect::<BTreeSet<_>>();
        if !cyclic.is_empty() {
            tracing::debug!("[TransformState] {guid} lies on a cycle through {cyclic:?}");
        }
        let acyclic = cyclic.is_empty();
        asset.circular_dependencies = cyclic;
        acyclic
    }

    /// Commit a computed result, unless `guid` was invalidated after `generation` was read.
    pub fn commit_hash_result(
        &mut self,
        guid: &AssetGuid,
        generation: u64,
        state: TransformState,
        asset_hash: FileHash,
        thumb_hash: FileHash,
        log: Vec<LogEntry>,
    ) -> bool {
        let Some(asset) = self.assets.get_mut(guid) else {
            return false;
        };
        if asset.last_state_update != generation {
            tracing::debug!(
                "[TransformState] discarding result for {guid}: generation {generation} is behind {}",
                asset.last_state_update
            );
            return false;
        }
        asset.asset_hash = asset_hash;
        asset.thumb_hash = thumb_hash;
        asset.log = log;
        self.update_transform_state(guid, state);
        true
    }
}
