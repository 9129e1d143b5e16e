//! Document type handlers.
//!
//! A [`DocumentTypeHandler`] knows one kind of asset document: which files it claims, how to
//! extract the [`DocumentInfo`] the engine tracks, how to rewrite a document's embedded identity,
//! and whether the products of a previous transform still match a freshly computed hash.
//!
//! Handlers are looked up through a [`HandlerMap`], built from the configured document types and
//! extensible at runtime:
//!
//! ```rust
//! use assettrack_core::{codec::{asset_doc::AssetDocHandler, HandlerMap}, properties::TypeDescriptor};
//! use std::path::Path;
//!
//! let handlers = HandlerMap::default();
//! handlers.insert(AssetDocHandler::new(
//!     TypeDescriptor { name: "texture".to_string(), version: 2, thumbnails: true },
//!     "texture",
//! ));
//! assert!(handlers.find_document_type(Path::new("/data/rock.texture")).is_some());
//! assert!(handlers.find_document_type(Path::new("/data/rock.png")).is_none());
//! ```

use parking_lot::RwLock;
use std::{path::Path, sync::Arc};

use crate::{
    config::DocumentTypeConfig,
    error::AssetTrackError,
    properties::{AssetGuid, AssetInfo, DocumentInfo, FileHash, TypeDescriptor},
};

pub mod asset_doc;

pub use asset_doc::AssetDocHandler;

pub trait DocumentTypeHandler: Send + Sync {
    fn descriptor(&self) -> &TypeDescriptor;

    /// Whether `path` is a document of this type.
    fn claims(&self, path: &Path) -> bool;

    /// Extract the tracked information from raw document bytes. A document without an embedded
    /// identity yields a nil `guid`.
    fn parse_info(&self, path: &Path, bytes: &[u8]) -> Result<DocumentInfo, AssetTrackError>;

    /// Write the document at `src` to `dst` with its embedded identity replaced by `guid`. `src`
    /// and `dst` may be the same file.
    fn clone_document(&self, src: &Path, dst: &Path, guid: &AssetGuid)
        -> Result<(), AssetTrackError>;

    /// Whether the transform products of `asset` were produced from `asset_hash`.
    fn is_up_to_date(&self, asset: &AssetInfo, asset_hash: FileHash) -> bool;

    fn is_thumbnail_up_to_date(&self, _asset: &AssetInfo, _thumb_hash: FileHash) -> bool {
        true
    }
}

#[derive(Clone, Default)]
pub struct HandlerMap(Arc<RwLock<Vec<Arc<dyn DocumentTypeHandler>>>>);

impl std::fmt::Debug for HandlerMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.0.read().iter().map(|handler| handler.descriptor()))
            .finish()
    }
}

impl HandlerMap {
    pub fn from_config(types: &[DocumentTypeConfig]) -> Self {
        let map = HandlerMap::default();
        for doc_type in types.iter() {
            map.insert(AssetDocHandler::from_config(doc_type));
        }
        map
    }

    /// Register `handler`, replacing any handler with the same type name.
    pub fn insert<H: DocumentTypeHandler + 'static>(&self, handler: H) {
        let mut writer = self.0.write();
        let name = handler.descriptor().name.clone();
        let handler: Arc<dyn DocumentTypeHandler> = Arc::new(handler);
        if let Some(entry) = writer
            .iter_mut()
            .find(|entry| entry.descriptor().name == name)
        {
            tracing::debug!("[HandlerMap::insert] replacing handler for '{name}'");
            *entry = handler;
        } else {
            writer.push(handler);
        }
    }

    pub fn find_document_type(&self, path: &Path) -> Option<Arc<dyn DocumentTypeHandler>> {
        self.0
            .read()
            .iter()
            .find(|handler| handler.claims(path))
            .cloned()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DocumentTypeHandler>> {
        self.0
            .read()
            .iter()
            .find(|handler| handler.descriptor().name == name)
            .cloned()
    }

    pub fn descriptors(&self) -> Vec<TypeDescriptor> {
        self.0
            .read()
            .iter()
            .map(|handler| handler.descriptor().clone())
            .collect()
    }
}
