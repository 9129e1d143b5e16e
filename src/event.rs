use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::properties::{AssetGuid, ExistenceState, TransformState};

/// Change notifications emitted by the engine for UI consumers (asset browsers, thumbnail caches).
///
/// Events are collected while the registry lock is held and sent once it is released, in the
/// order the changes were committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssetEvent {
    /// An asset file was added, modified, moved or removed.
    ExistenceChanged(AssetGuid, ExistenceState),
    /// A sub-asset appeared or disappeared. Main sub-assets follow their owning asset.
    SubAssetChanged(AssetGuid, ExistenceState),
    /// The visible transform state of an asset or one of its sub-assets changed.
    StateChanged(AssetGuid, TransformState),
    /// The cached thumbnail image for this asset or sub-asset should be dropped.
    ThumbnailInvalidated(AssetGuid),
}

impl AssetEvent {
    pub fn guid(&self) -> &AssetGuid {
        match self {
            AssetEvent::ExistenceChanged(guid, _) => guid,
            AssetEvent::SubAssetChanged(guid, _) => guid,
            AssetEvent::StateChanged(guid, _) => guid,
            AssetEvent::ThumbnailInvalidated(guid) => guid,
        }
    }
}

impl Display for AssetEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            AssetEvent::ExistenceChanged(_, _) => write!(f, "ExistenceChanged"),
            AssetEvent::SubAssetChanged(_, _) => write!(f, "SubAssetChanged"),
            AssetEvent::StateChanged(_, _) => write!(f, "StateChanged"),
            AssetEvent::ThumbnailInvalidated(_) => write!(f, "ThumbnailInvalidated"),
        }
    }
}
