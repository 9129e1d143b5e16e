//! Inverse dependency index.
//!
//! For every file that some asset declares as a dependency, the index records which assets depend
//! on it, split by transform and thumbnail edges. GUID references are indexed under the absolute
//! path of the asset they name. Path references are indexed under their data-relative form, so the
//! same edge matches the file in whichever data directory it shows up. A GUID reference whose
//! target is not registered yet is parked in the `unresolved` table and moved into the inverse
//! maps by [`DependencyIndex::resolve_pending`] as soon as the target shows up, so assets can be
//! discovered in any order.
//!
//! The keys each asset inserted are remembered, and [`DependencyIndex::untrack`] removes exactly
//! those.

use crate::{
    files::PathResolver,
    properties::{AssetGuid, AssetInfo, DocumentInfo, Reference},
};
use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
};

/// Read access to registered assets, as needed to resolve GUID references.
pub trait AssetLookup {
    fn absolute_path(&self, guid: &AssetGuid) -> Option<&Path>;

    fn declared(&self, guid: &AssetGuid) -> Option<&DocumentInfo>;
}

impl AssetLookup for HashMap<AssetGuid, AssetInfo> {
    fn absolute_path(&self, guid: &AssetGuid) -> Option<&Path> {
        self.get(guid).map(|asset| asset.absolute_path.as_path())
    }

    fn declared(&self, guid: &AssetGuid) -> Option<&DocumentInfo> {
        self.get(guid).map(|asset| &asset.info)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EdgeKind {
    Transform,
    Thumbnail,
}

/// What an inverse edge points at.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DependencyKey {
    /// Absolute path of the registered asset a GUID reference names.
    Asset(PathBuf),
    /// Data-relative path of a path reference.
    File(String),
}

enum Resolution {
    Key(DependencyKey),
    Pending(AssetGuid),
    Unresolvable,
}

fn resolve_reference<L: AssetLookup + ?Sized>(
    reference: &Reference,
    lookup: &L,
    resolver: &dyn PathResolver,
) -> Resolution {
    match reference {
        Reference::Guid(guid) => match lookup.absolute_path(guid) {
            Some(path) => Resolution::Key(DependencyKey::Asset(path.to_path_buf())),
            None => Resolution::Pending(*guid),
        },
        Reference::Path(relative) => match resolver.reference_key(relative) {
            Some(key) => Resolution::Key(DependencyKey::File(key)),
            None => Resolution::Unresolvable,
        },
    }
}

#[derive(Debug, Clone, Default)]
pub struct DependencyIndex {
    inverse_transform_deps: HashMap<DependencyKey, BTreeSet<AssetGuid>>,
    inverse_thumbnail_deps: HashMap<DependencyKey, BTreeSet<AssetGuid>>,
    unresolved: BTreeSet<(AssetGuid, AssetGuid)>,
    /// Every inverse entry, by the asset that owns it.
    tracked: HashMap<AssetGuid, BTreeSet<(EdgeKind, DependencyKey)>>,
}

impl DependencyIndex {
    fn inverse_map(&mut self, kind: EdgeKind) -> &mut HashMap<DependencyKey, BTreeSet<AssetGuid>> {
        match kind {
            EdgeKind::Transform => &mut self.inverse_transform_deps,
            EdgeKind::Thumbnail => &mut self.inverse_thumbnail_deps,
        }
    }

    fn insert_edge(&mut self, asset: &AssetGuid, kind: EdgeKind, key: DependencyKey) {
        self.inverse_map(kind)
            .entry(key.clone())
            .or_default()
            .insert(*asset);
        self.tracked.entry(*asset).or_default().insert((kind, key));
    }

    fn declared_edges(info: &DocumentInfo) -> impl Iterator<Item = (&Reference, EdgeKind)> {
        info.transform_dependencies
            .iter()
            .map(|reference| (reference, EdgeKind::Transform))
            .chain(
                info.thumbnail_dependencies
                    .iter()
                    .map(|reference| (reference, EdgeKind::Thumbnail)),
            )
    }

    /// Register the dependency edges `info` declares for `asset`, including its own output files
    /// as implicit thumbnail dependencies.
    pub fn track<L: AssetLookup + ?Sized>(
        &mut self,
        asset: &AssetGuid,
        info: &DocumentInfo,
        lookup: &L,
        resolver: &dyn PathResolver,
    ) {
        for (reference, kind) in Self::declared_edges(info) {
            match resolve_reference(reference, lookup, resolver) {
                Resolution::Key(key) => self.insert_edge(asset, kind, key),
                Resolution::Pending(target) => {
                    self.unresolved.insert((*asset, target));
                }
                Resolution::Unresolvable => {
                    tracing::warn!(
                        "[DependencyIndex] {asset}: dependency {reference} lies outside every data directory"
                    );
                }
            }
        }
        for output in info.outputs.iter() {
            if let Some(key) = resolver.reference_key(output) {
                self.insert_edge(asset, EdgeKind::Thumbnail, DependencyKey::File(key));
            }
        }
    }

    /// Remove every edge [`DependencyIndex::track`] and [`DependencyIndex::resolve_pending`]
    /// registered for `asset`, pending ones included.
    pub fn untrack(&mut self, asset: &AssetGuid) {
        self.unresolved.retain(|(dependent, _)| dependent != asset);
        let Some(edges) = self.tracked.remove(asset) else {
            return;
        };
        for (kind, key) in edges {
            let map = self.inverse_map(kind);
            if let Some(dependents) = map.get_mut(&key) {
                dependents.remove(asset);
                if dependents.is_empty() {
                    map.remove(&key);
                }
            }
        }
    }

    /// Move every pending edge whose target is now registered into the inverse maps. Returns the
    /// dependents whose edges were resolved.
    pub fn resolve_pending<L: AssetLookup + ?Sized>(&mut self, lookup: &L) -> BTreeSet<AssetGuid> {
        let ready = self
            .unresolved
            .iter()
            .filter(|(_, target)| lookup.absolute_path(target).is_some())
            .copied()
            .collect::<Vec<_>>();

        let mut resolved = BTreeSet::new();
        for (dependent, target) in ready {
            self.unresolved.remove(&(dependent, target));
            let (Some(path), Some(declared)) =
                (lookup.absolute_path(&target), lookup.declared(&dependent))
            else {
                continue;
            };
            let key = DependencyKey::Asset(path.to_path_buf());
            let reference = Reference::Guid(target);
            if declared.transform_dependencies.contains(&reference) {
                self.insert_edge(&dependent, EdgeKind::Transform, key.clone());
            }
            if declared.thumbnail_dependencies.contains(&reference) {
                self.insert_edge(&dependent, EdgeKind::Thumbnail, key);
            }
            tracing::debug!("[DependencyIndex] resolved pending edge {dependent} -> {target}");
            resolved.insert(dependent);
        }
        resolved
    }

    pub fn transform_dependents_of(&self, key: &DependencyKey) -> BTreeSet<AssetGuid> {
        self.inverse_transform_deps
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn thumbnail_dependents_of(&self, key: &DependencyKey) -> BTreeSet<AssetGuid> {
        self.inverse_thumbnail_deps
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Every asset with a transform or thumbnail edge onto `key`.
    pub fn dependents_of(&self, key: &DependencyKey) -> BTreeSet<AssetGuid> {
        let mut dependents = self.transform_dependents_of(key);
        dependents.extend(self.thumbnail_dependents_of(key));
        dependents
    }

    /// Every asset depending on the file at `absolute`, either through the GUID of the asset
    /// registered there or through a path reference to `relative`.
    pub fn dependents_of_path(
        &self,
        absolute: &Path,
        relative: Option<&str>,
    ) -> BTreeSet<AssetGuid> {
        let mut dependents = self.dependents_of(&DependencyKey::Asset(absolute.to_path_buf()));
        if let Some(relative) = relative {
            dependents.extend(self.dependents_of(&DependencyKey::File(relative.to_string())));
        }
        dependents
    }

    pub fn is_unresolved(&self, dependent: &AssetGuid, dependency: &AssetGuid) -> bool {
        self.unresolved.contains(&(*dependent, *dependency))
    }

    pub fn unresolved(&self) -> impl Iterator<Item = &(AssetGuid, AssetGuid)> {
        self.unresolved.iter()
    }

    /// Assets owning at least one resolved edge.
    pub fn tracked_assets(&self) -> impl Iterator<Item = &AssetGuid> {
        self.tracked.keys()
    }
}
