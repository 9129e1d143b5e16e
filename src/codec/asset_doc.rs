//! The TOML asset document format.
//!
//! ```toml
//! guid = "6f1c7c52-0d0e-4a3b-9f57-2b1f3f0c8e11"
//! outputs = ["baked/rock.bin"]
//!
//! [settings]
//! compression = "bc7"
//!
//! [dependencies]
//! transform = [{ guid = "0b9a2f5e-..." }, { path = "textures/rock.png" }]
//! thumbnail = [{ path = "textures/rock_preview.png" }]
//!
//! [[sub_assets]]
//! name = "lod0"
//! kind = "mesh"
//! ```
//!
//! Transform products are described by a stamp file written next to the document
//! (`rock.asset.stamp`) once the external transformer finished.

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};
use toml_edit::{value, DocumentMut};

use crate::{
    codec::DocumentTypeHandler,
    config::DocumentTypeConfig,
    error::AssetTrackError,
    hash::settings_hash,
    properties::{AssetGuid, AssetInfo, DocumentInfo, FileHash, Reference, SubAssetInfo, TypeDescriptor},
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DependencyTables {
    transform: Vec<Reference>,
    thumbnail: Vec<Reference>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AssetDocument {
    guid: Option<AssetGuid>,
    settings: toml::Table,
    dependencies: DependencyTables,
    outputs: Vec<String>,
    sub_assets: Vec<SubAssetInfo>,
}

#[derive(Debug, Clone)]
pub struct AssetDocHandler {
    descriptor: TypeDescriptor,
    suffix: String,
}

impl AssetDocHandler {
    pub fn new<S: Into<String>>(descriptor: TypeDescriptor, suffix: S) -> Self {
        AssetDocHandler {
            descriptor,
            suffix: suffix.into(),
        }
    }

    pub fn from_config(config: &DocumentTypeConfig) -> Self {
        AssetDocHandler::new(
            TypeDescriptor {
                name: config.name.clone(),
                version: config.version,
                thumbnails: config.thumbnails,
            },
            config.suffix.clone(),
        )
    }
}

impl DocumentTypeHandler for AssetDocHandler {
    fn descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    fn claims(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy() == self.suffix)
            .unwrap_or(false)
    }

    fn parse_info(&self, path: &Path, bytes: &[u8]) -> Result<DocumentInfo, AssetTrackError> {
        let text =
            std::str::from_utf8(bytes).map_err(|e| AssetTrackError::read_failure(path, e))?;
        let document: AssetDocument =
            toml::from_str(text).map_err(|e| AssetTrackError::read_failure(path, e))?;
        let settings = toml::to_string(&document.settings)
            .map_err(|e| AssetTrackError::read_failure(path, e))?;

        let mut names = BTreeSet::new();
        for sub_asset in document.sub_assets.iter() {
            if !names.insert(sub_asset.name.as_str()) {
                return Err(AssetTrackError::read_failure(
                    path,
                    format!("duplicate sub-asset name '{}'", sub_asset.name),
                ));
            }
        }

        Ok(DocumentInfo {
            guid: document.guid.unwrap_or_default(),
            settings_hash: settings_hash(&self.descriptor, &settings),
            transform_dependencies: document.dependencies.transform.into_iter().collect(),
            thumbnail_dependencies: document.dependencies.thumbnail.into_iter().collect(),
            outputs: document.outputs.into_iter().collect(),
            sub_assets: document.sub_assets,
        })
    }

    fn clone_document(
        &self,
        src: &Path,
        dst: &Path,
        guid: &AssetGuid,
    ) -> Result<(), AssetTrackError> {
        let content = fs::read_to_string(src)?;
        let rewritten = rewrite_guid(&content, guid)?;
        fs::write(dst, rewritten)?;
        Ok(())
    }

    fn is_up_to_date(&self, asset: &AssetInfo, asset_hash: FileHash) -> bool {
        read_transform_stamp(&asset.absolute_path)
            .map(|stamp| stamp.asset_hash == asset_hash)
            .unwrap_or(false)
    }

    fn is_thumbnail_up_to_date(&self, asset: &AssetInfo, thumb_hash: FileHash) -> bool {
        if !self.descriptor.thumbnails {
            return true;
        }
        read_transform_stamp(&asset.absolute_path)
            .map(|stamp| stamp.thumb_hash == thumb_hash)
            .unwrap_or(false)
    }
}

/// Replace (or insert) the top-level `guid` key of a TOML document, leaving everything else as
/// written.
pub fn rewrite_guid(content: &str, guid: &AssetGuid) -> Result<String, AssetTrackError> {
    let mut document = content.parse::<DocumentMut>()?;
    document["guid"] = value(guid.to_string());
    Ok(document.to_string())
}

mod hex_hash {
    use crate::properties::FileHash;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(hash: &FileHash, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(hash.to_be_bytes()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<FileHash, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(text).map_err(D::Error::custom)?;
        let bytes: [u8; 8] = bytes
            .try_into()
            .map_err(|_| D::Error::custom("hash must be 8 bytes"))?;
        Ok(FileHash::from_be_bytes(bytes))
    }
}

/// Hashes the last successful transform was produced from. TOML integers are signed, so the
/// hashes are stored as hex strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformStamp {
    #[serde(with = "hex_hash")]
    pub asset_hash: FileHash,
    #[serde(with = "hex_hash")]
    pub thumb_hash: FileHash,
}

pub fn stamp_path(asset_path: &Path) -> PathBuf {
    let mut name = asset_path.as_os_str().to_owned();
    name.push(".stamp");
    PathBuf::from(name)
}

pub fn read_transform_stamp(asset_path: &Path) -> Option<TransformStamp> {
    let content = fs::read_to_string(stamp_path(asset_path)).ok()?;
    match toml::from_str(&content) {
        Ok(stamp) => Some(stamp),
        Err(e) => {
            tracing::debug!("[read_transform_stamp] ignoring malformed stamp for {asset_path:?}: {e}");
            None
        }
    }
}

/// Record that the transform products of the asset at `asset_path` were built from these hashes.
pub fn write_transform_stamp(
    asset_path: &Path,
    asset_hash: FileHash,
    thumb_hash: FileHash,
) -> Result<(), AssetTrackError> {
    let stamp = TransformStamp {
        asset_hash,
        thumb_hash,
    };
    fs::write(stamp_path(asset_path), toml::to_string(&stamp)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn handler() -> AssetDocHandler {
        AssetDocHandler::new(
            TypeDescriptor {
                name: "asset".to_string(),
                version: 1,
                thumbnails: true,
            },
            "asset",
        )
    }

    const DOC: &str = r#"# rock mesh
guid = "6f1c7c52-0d0e-4a3b-9f57-2b1f3f0c8e11"
outputs = ["baked/rock.bin"]

[settings]
compression = "bc7"
scale = 2

[dependencies]
transform = [{ guid = "0b9a2f5e-7a64-4c55-8a53-60c1b3d7d0aa" }, { path = "textures/rock.png" }]
thumbnail = [{ path = "textures/rock_preview.png" }]

[[sub_assets]]
name = "lod0"
kind = "mesh"
"#;

    #[test]
    fn parses_declared_data() {
        let info = handler()
            .parse_info(Path::new("/data/rock.asset"), DOC.as_bytes())
            .unwrap();
        assert_eq!(
            info.guid,
            "6f1c7c52-0d0e-4a3b-9f57-2b1f3f0c8e11".parse().unwrap()
        );
        assert_eq!(info.transform_dependencies.len(), 2);
        assert!(info
            .thumbnail_dependencies
            .contains(&Reference::Path("textures/rock_preview.png".to_string())));
        assert!(info.outputs.contains("baked/rock.bin"));
        assert_eq!(info.sub_assets[0].name, "lod0");
        assert_ne!(info.settings_hash, 0);
    }

    #[test]
    fn settings_hash_ignores_key_order_but_not_values() {
        let h = handler();
        let a = h
            .parse_info(Path::new("a.asset"), b"[settings]\nx = 1\ny = 2\n")
            .unwrap();
        let b = h
            .parse_info(Path::new("b.asset"), b"[settings]\ny = 2\nx = 1\n")
            .unwrap();
        let c = h
            .parse_info(Path::new("c.asset"), b"[settings]\nx = 1\ny = 3\n")
            .unwrap();
        assert_eq!(a.settings_hash, b.settings_hash);
        assert_ne!(a.settings_hash, c.settings_hash);
        assert!(a.guid.is_nil());
    }

    #[test]
    fn malformed_documents_are_read_failures() {
        let h = handler();
        assert!(matches!(
            h.parse_info(Path::new("a.asset"), b"guid = \"nope\""),
            Err(AssetTrackError::ReadFailure { .. })
        ));
        assert!(matches!(
            h.parse_info(
                Path::new("a.asset"),
                b"[[sub_assets]]\nname = \"x\"\n[[sub_assets]]\nname = \"x\"\n"
            ),
            Err(AssetTrackError::ReadFailure { .. })
        ));
    }

    #[test]
    fn rewrite_guid_preserves_formatting() {
        let guid = AssetGuid::new();
        let rewritten = rewrite_guid(DOC, &guid).unwrap();
        assert!(rewritten.starts_with("# rock mesh\n"));
        assert!(rewritten.contains(&guid.to_string()));
        assert!(rewritten.contains("compression = \"bc7\""));

        let injected = rewrite_guid("[settings]\nx = 1\n", &guid).unwrap();
        let info = handler()
            .parse_info(Path::new("a.asset"), injected.as_bytes())
            .unwrap();
        assert_eq!(info.guid, guid);
    }

    #[test]
    fn stamp_decides_up_to_date() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rock.asset");
        std::fs::write(&path, DOC).unwrap();
        let asset = AssetInfo {
            absolute_path: path.clone(),
            ..Default::default()
        };
        let h = handler();
        assert!(!h.is_up_to_date(&asset, 42));

        write_transform_stamp(&path, 42, u64::MAX - 1).unwrap();
        assert!(h.is_up_to_date(&asset, 42));
        assert!(!h.is_up_to_date(&asset, 43));
        assert!(h.is_thumbnail_up_to_date(&asset, u64::MAX - 1));
        assert!(!h.is_thumbnail_up_to_date(&asset, 7));
        assert!(!h.claims(&stamp_path(&path)));
        assert!(h.claims(&path));
    }
}
