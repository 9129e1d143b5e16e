//! Asset and thumbnail hash computation.
//!
//! Both hashes start at the asset's settings hash and accumulate the hashes of its dependencies by
//! wrapping addition. Addition is commutative, so the result does not depend on the order in
//! which dependencies are visited, and re-evaluating with unchanged inputs reproduces the same
//! value.

use crate::{
    error::AssetTrackError,
    properties::{AssetGuid, FileHash, Reference, TransformState, TypeDescriptor},
};
use sha2::{Digest, Sha256};

/// Fold a sha256 digest of `bytes` into a [`FileHash`], never returning the `0` sentinel.
pub fn hash_bytes(bytes: &[u8]) -> FileHash {
    fold_digest(&Sha256::digest(bytes))
}

/// Hash of a document's transform settings, salted with its type name and version.
pub fn settings_hash(descriptor: &TypeDescriptor, settings: &str) -> FileHash {
    let mut hasher = Sha256::new();
    hasher.update(descriptor.name.as_bytes());
    hasher.update([0u8]);
    hasher.update(descriptor.version.to_le_bytes());
    hasher.update(settings.as_bytes());
    fold_digest(&hasher.finalize())
}

fn fold_digest(digest: &[u8]) -> FileHash {
    let mut buffer = [0u8; 8];
    buffer.copy_from_slice(&digest[..8]);
    match u64::from_le_bytes(buffer) {
        0 => 1,
        hash => hash,
    }
}

/// State and hashes of a GUID dependency after its own evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DependencyHashes {
    pub state: TransformState,
    pub asset_hash: FileHash,
    pub thumb_hash: FileHash,
}

/// Where [`hash_asset`] gets its inputs from.
pub trait DependencySource {
    /// Make sure the transform state of `guid` is computed and return it, or `None` when no such
    /// asset is known.
    fn guid_dependency(&self, guid: &AssetGuid) -> Option<DependencyHashes>;

    /// Content hash of the file behind a data-directory relative path.
    fn file_hash(&self, path: &str, force: bool) -> Result<FileHash, AssetTrackError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashOutcome {
    /// One of the missing-dependency states, or [`TransformState::Unknown`] when every dependency
    /// was satisfied and the caller has to decide between up to date and needing work.
    pub state: TransformState,
    pub asset_hash: FileHash,
    pub thumb_hash: FileHash,
    pub missing: Vec<Reference>,
}

impl HashOutcome {
    pub fn is_satisfied(&self) -> bool {
        self.missing.is_empty()
    }
}

fn dependency_hashes<S: DependencySource + ?Sized>(
    source: &S,
    reference: &Reference,
    force: bool,
) -> Option<(FileHash, FileHash)> {
    match reference {
        Reference::Guid(guid) => source
            .guid_dependency(guid)
            .filter(|dep| dep.state.is_usable_dependency())
            .map(|dep| (dep.asset_hash, dep.thumb_hash)),
        Reference::Path(path) => match source.file_hash(path, force) {
            Ok(hash) => Some((hash, hash)),
            Err(e) => {
                tracing::debug!("[hash_asset] file dependency {path} unavailable: {e}");
                None
            }
        },
    }
}

/// Compute the asset and thumbnail hash of an asset from its settings hash and declared
/// dependencies.
///
/// Transform dependencies contribute to both hashes, thumbnail dependencies to the thumbnail hash
/// only. A missing thumbnail dependency zeroes the thumbnail hash; a missing transform dependency
/// zeroes both and takes precedence.
pub fn hash_asset<'a, S, I, J>(
    source: &S,
    settings_hash: FileHash,
    transform_deps: I,
    thumbnail_deps: J,
    force: bool,
) -> HashOutcome
where
    S: DependencySource + ?Sized,
    I: IntoIterator<Item = &'a Reference>,
    J: IntoIterator<Item = &'a Reference>,
{
    let mut asset_hash = settings_hash;
    let mut thumb_hash = settings_hash;
    let mut missing = Vec::new();
    let mut missing_transform = false;
    let mut missing_thumbnail = false;

    let tagged = transform_deps
        .into_iter()
        .map(|reference| (reference, true))
        .chain(thumbnail_deps.into_iter().map(|reference| (reference, false)));

    for (reference, is_transform) in tagged {
        match dependency_hashes(source, reference, force) {
            Some((dep_asset_hash, dep_thumb_hash)) => {
                thumb_hash = thumb_hash.wrapping_add(dep_thumb_hash);
                if is_transform {
                    asset_hash = asset_hash.wrapping_add(dep_asset_hash);
                }
            }
            None => {
                missing.push(reference.clone());
                if is_transform {
                    missing_transform = true;
                } else {
                    missing_thumbnail = true;
                }
            }
        }
    }

    let state = if missing_transform {
        asset_hash = 0;
        thumb_hash = 0;
        TransformState::MissingTransformDependency
    } else if missing_thumbnail {
        thumb_hash = 0;
        TransformState::MissingThumbnailDependency
    } else {
        TransformState::Unknown
    };

    HashOutcome {
        state,
        asset_hash,
        thumb_hash,
        missing,
    }
}
