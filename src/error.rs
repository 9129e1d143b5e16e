use std::{fmt, io, path::StripPrefixError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::error::SendError as TokioSendError;

#[cfg(feature = "service")]
use notify::{Error as NotifyError, ErrorKind as NotifyErrorKind};

use serde_json::Error as JsonError;

use crate::event::AssetEvent;

/// Failures of the engine itself.
///
/// Missing dependencies, cycles and transform errors are *not* represented here: those are expected
/// outcomes recorded as [`crate::properties::TransformState`] on the asset. Only I/O level problems
/// (a document that cannot be read, an identity that cannot be rewritten) surface as errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum AssetTrackError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Custom error: {0}")]
    Custom(String),
    #[error("Could not rewrite the identity of {path} after {attempts} attempts")]
    IdentityCollisionUnresolvable { path: String, attempts: usize },
    #[error("File System error: {0}")]
    Io(String),
    #[error("Item Not Found: {0}")]
    NotFound(String),
    #[error("You do not have permission to access this resource")]
    PermissionDenied,
    #[error("Failed to read asset document {path}: {reason}")]
    ReadFailure { path: String, reason: String },
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
    #[error("No document type handler claims {0}")]
    UnknownDocumentType(String),
}

impl AssetTrackError {
    pub fn read_failure<P: fmt::Debug, R: fmt::Display>(path: P, reason: R) -> Self {
        AssetTrackError::ReadFailure {
            path: format!("{path:?}"),
            reason: reason.to_string(),
        }
    }

    /// Whether retrying the same operation later could succeed (file locks, sharing violations).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AssetTrackError::Io(_) | AssetTrackError::PermissionDenied
        )
    }
}

impl From<StripPrefixError> for AssetTrackError {
    fn from(src: StripPrefixError) -> AssetTrackError {
        AssetTrackError::NotFound(format!("Strip prefix failed for path. Error: {src}"))
    }
}

impl From<toml::de::Error> for AssetTrackError {
    fn from(src: toml::de::Error) -> AssetTrackError {
        AssetTrackError::Serialization(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for AssetTrackError {
    fn from(src: toml::ser::Error) -> AssetTrackError {
        AssetTrackError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<toml_edit::TomlError> for AssetTrackError {
    fn from(src: toml_edit::TomlError) -> AssetTrackError {
        AssetTrackError::Serialization(format!("Toml document error: {src}"))
    }
}

impl From<JsonError> for AssetTrackError {
    fn from(src: JsonError) -> AssetTrackError {
        AssetTrackError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<uuid::Error> for AssetTrackError {
    fn from(src: uuid::Error) -> AssetTrackError {
        AssetTrackError::Serialization(format!("UUID conversion failed: {src}"))
    }
}

impl From<io::Error> for AssetTrackError {
    fn from(x: io::Error) -> Self {
        match x.kind() {
            io::ErrorKind::NotFound => AssetTrackError::NotFound(format!("{x}")),
            io::ErrorKind::PermissionDenied => AssetTrackError::PermissionDenied,
            _ => AssetTrackError::Io(format!("IOError: {}", x.kind())),
        }
    }
}

impl From<fmt::Error> for AssetTrackError {
    fn from(x: fmt::Error) -> Self {
        AssetTrackError::Custom(format!("{x}"))
    }
}

impl From<TokioSendError<AssetEvent>> for AssetTrackError {
    fn from(x: TokioSendError<AssetEvent>) -> Self {
        AssetTrackError::Io(format!(
            "Channel update send Error, could not transmit asset event {:?}",
            x.0
        ))
    }
}

#[cfg(feature = "service")]
impl From<NotifyError> for AssetTrackError {
    fn from(notify_error: NotifyError) -> Self {
        match notify_error.kind {
            NotifyErrorKind::Generic(msg) => AssetTrackError::Custom(format!(
                "notify-debouncer: {}, paths: {:?}",
                msg, notify_error.paths
            )),
            NotifyErrorKind::Io(io_error) => AssetTrackError::Custom(format!(
                "notify-debouncer: io error {}, paths: {:?}",
                io_error.kind(),
                notify_error.paths
            )),
            NotifyErrorKind::PathNotFound => AssetTrackError::NotFound(format!(
                "notify-debouncer: path(s) not found: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::WatchNotFound => AssetTrackError::NotFound(format!(
                "notify-debouncer: watch not found, paths: {:?}",
                notify_error.paths
            )),
            NotifyErrorKind::InvalidConfig(_) => {
                AssetTrackError::Custom("notify-debouncer invalid config".to_string())
            }
            NotifyErrorKind::MaxFilesWatch => {
                AssetTrackError::Custom("notify-debouncer max file watch limit reached".to_string())
            }
        }
    }
}
