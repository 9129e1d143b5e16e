/// [crate::properties] contains the data model shared by every part of the engine: identities,
/// dependency references, the per-asset bookkeeping record and the state enums.
pub use enumset::EnumSet;
use enumset::{enum_set, EnumSetType};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
    fs::Metadata,
    path::PathBuf,
    str::FromStr,
    time::UNIX_EPOCH,
};

pub use uuid::Uuid;

use crate::error::AssetTrackError;

/// Namespace used to derive sub-asset identities from their owning asset.
pub const UUID_NAMESPACE_SUBASSET: Uuid = Uuid::from_bytes([
    0x3f, 0x8a, 0x51, 0x0e, 0x7c, 0x2d, 0x4b, 0x19, 0x9e, 0x61, 0x0a, 0xd4, 0x5c, 0x33, 0x8b, 0x27,
]);

/// Content hash of a file or asset. `0` is reserved for "invalid / not computed".
pub type FileHash = u64;

/// Stable, globally unique asset identity, embedded in the asset document itself.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct AssetGuid(Uuid);

impl AssetGuid {
    pub fn new() -> Self {
        AssetGuid(Uuid::new_v4())
    }

    pub fn nil() -> Self {
        AssetGuid(Uuid::nil())
    }

    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Deterministically derive the identity a duplicated document should take on. The same
    /// original GUID copied to the same location always yields the same replacement, so two
    /// processes resolving the same collision agree on the result.
    pub fn derive_replacement(&self, seed: &str) -> AssetGuid {
        AssetGuid(Uuid::new_v5(&self.0, seed.as_bytes()))
    }

    /// Identity of the named sub-asset produced from this asset.
    pub fn sub_asset(&self, name: &str) -> AssetGuid {
        let mut bytes = self.0.as_bytes().to_vec();
        bytes.extend_from_slice(name.as_bytes());
        AssetGuid(Uuid::new_v5(&UUID_NAMESPACE_SUBASSET, &bytes))
    }
}

impl Default for AssetGuid {
    fn default() -> Self {
        AssetGuid::nil()
    }
}

impl From<Uuid> for AssetGuid {
    fn from(uuid: Uuid) -> Self {
        AssetGuid(uuid)
    }
}

impl FromStr for AssetGuid {
    type Err = AssetTrackError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        Ok(AssetGuid(Uuid::parse_str(string.trim())?))
    }
}

impl Display for AssetGuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            self.0.hyphenated().encode_lower(&mut Uuid::encode_buffer())
        )
    }
}

/// A declared dependency: either another asset by identity, or an arbitrary file by
/// (data-directory relative) path.
///
/// Serialized externally tagged so documents read naturally: `{ guid = "..." }` or
/// `{ path = "textures/rock.png" }`.
#[derive(Clone, Debug, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Reference {
    Guid(AssetGuid),
    Path(String),
}

impl Reference {
    pub fn as_guid(&self) -> Option<&AssetGuid> {
        match self {
            Reference::Guid(guid) => Some(guid),
            Reference::Path(_) => None,
        }
    }
}

impl Display for Reference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Reference::Guid(guid) => write!(f, "guid:{guid}"),
            Reference::Path(path) => write!(f, "path:{path}"),
        }
    }
}

#[derive(Debug, Hash, PartialOrd, Ord, Serialize, Deserialize, EnumSetType)]
pub enum TransformState {
    Unknown,
    UpToDate,
    NeedsTransform,
    NeedsThumbnail,
    MissingTransformDependency,
    MissingThumbnailDependency,
    CircularDependency,
    TransformError,
}

/// States of a GUID dependency that make it unusable as a hash input for its dependents.
pub const UNUSABLE_DEPENDENCY_STATES: EnumSet<TransformState> = enum_set!(
    TransformState::Unknown
        | TransformState::MissingTransformDependency
        | TransformState::MissingThumbnailDependency
        | TransformState::CircularDependency
);

impl Default for TransformState {
    fn default() -> Self {
        TransformState::Unknown
    }
}

impl TransformState {
    pub fn all() -> EnumSet<TransformState> {
        EnumSet::all()
    }

    pub fn is_usable_dependency(&self) -> bool {
        !UNUSABLE_DEPENDENCY_STATES.contains(*self)
    }
}

impl Display for TransformState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// How a file changed since it was last observed.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, Hash, PartialEq, Eq)]
pub enum ExistenceState {
    FileAdded,
    FileModified,
    FileMoved,
    FileRemoved,
    #[default]
    FileUnchanged,
}

/// Identifies a document kind and the version of its transform settings. Bumping the version
/// changes every settings hash of that kind, forcing a re-transform.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Hash, PartialEq, Eq)]
pub struct TypeDescriptor {
    pub name: String,
    pub version: u32,
    /// Whether assets of this kind produce a thumbnail.
    pub thumbnails: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn warning<S: Into<String>>(message: S) -> Self {
        LogEntry {
            level: LogLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        LogEntry {
            level: LogLevel::Error,
            message: message.into(),
        }
    }
}

/// A named output unit declared inside an asset document.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Hash, PartialEq, Eq)]
pub struct SubAssetInfo {
    pub name: String,
    #[serde(default)]
    pub kind: String,
}

/// Everything parsed out of an asset document. This is the value stored in the document-info cache.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentInfo {
    pub guid: AssetGuid,
    /// Hash of the document's transform settings. Never `0`.
    pub settings_hash: FileHash,
    pub transform_dependencies: BTreeSet<Reference>,
    pub thumbnail_dependencies: BTreeSet<Reference>,
    pub outputs: BTreeSet<String>,
    pub sub_assets: Vec<SubAssetInfo>,
}

impl DocumentInfo {
    pub fn guid_dependencies(&self) -> impl Iterator<Item = &AssetGuid> {
        self.transform_dependencies
            .iter()
            .chain(self.thumbnail_dependencies.iter())
            .filter_map(Reference::as_guid)
    }

    pub fn references(&self, guid: &AssetGuid) -> bool {
        self.guid_dependencies().any(|dep| dep == guid)
    }
}

/// Timestamp and size of a file as reported by the file model.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileStat {
    /// Milliseconds since the unix epoch.
    pub last_modified: u64,
    pub size: u64,
}

impl From<&Metadata> for FileStat {
    fn from(metadata: &Metadata) -> Self {
        let last_modified = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|duration| duration.as_millis() as u64)
            .unwrap_or(0);
        FileStat {
            last_modified,
            size: metadata.len(),
        }
    }
}

/// The registry's record of one source asset file.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AssetInfo {
    pub guid: AssetGuid,
    /// Data-directory relative path, `/` separated.
    pub path: String,
    pub absolute_path: PathBuf,
    pub descriptor: TypeDescriptor,
    pub info: DocumentInfo,
    pub asset_hash: FileHash,
    pub thumb_hash: FileHash,
    pub transform_state: TransformState,
    pub existence_state: ExistenceState,
    pub circular_dependencies: BTreeSet<Reference>,
    /// Generation counter, bumped by every invalidation.
    pub last_state_update: u64,
    pub log: Vec<LogEntry>,
    pub sub_assets: BTreeSet<AssetGuid>,
}

impl AssetInfo {
    pub fn is_removed(&self) -> bool {
        self.existence_state == ExistenceState::FileRemoved
    }
}

/// One logical output unit of an asset document.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubAsset {
    pub guid: AssetGuid,
    pub is_main_asset: bool,
    pub existence_state: ExistenceState,
    pub owner: AssetGuid,
    pub name: String,
    pub kind: String,
}
