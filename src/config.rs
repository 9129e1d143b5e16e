use crate::error::AssetTrackError;
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
    time::Duration,
};

/// Bounded retry with linearly increasing sleep: attempt `n` (1-based) that fails sleeps
/// `backoff_step_ms * n` before attempt `n + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub backoff_step_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 10,
            backoff_step_ms: 50,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        RetryPolicy {
            max_attempts: 1,
            backoff_step_ms: 0,
        }
    }

    pub fn backoff(&self, attempt: usize) -> Duration {
        Duration::from_millis(self.backoff_step_ms * attempt as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTypeConfig {
    pub name: String,
    /// File name suffix (without the leading dot) claimed by this type, e.g. `mesh` for
    /// `rock.mesh`.
    pub suffix: String,
    #[serde(default = "default_type_version")]
    pub version: u32,
    #[serde(default)]
    pub thumbnails: bool,
}

fn default_type_version() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub data_dirs: Vec<PathBuf>,
    pub worker_count: usize,
    pub idle_poll_ms: u64,
    /// Where the document-info cache is persisted between sessions.
    pub document_cache: Option<PathBuf>,
    /// Write a fresh guid into documents that lack one instead of failing to read them.
    pub inject_missing_guids: bool,
    pub rewrite_retry: RetryPolicy,
    pub document_types: Vec<DocumentTypeConfig>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            data_dirs: Vec::new(),
            worker_count: 4,
            idle_poll_ms: 250,
            document_cache: None,
            inject_missing_guids: true,
            rewrite_retry: RetryPolicy::default(),
            document_types: vec![DocumentTypeConfig {
                name: "asset".to_string(),
                suffix: "asset".to_string(),
                version: 1,
                thumbnails: false,
            }],
        }
    }
}

impl TrackerConfig {
    pub fn with_data_dir<P: AsRef<Path>>(path: P) -> Self {
        TrackerConfig {
            data_dirs: vec![path.as_ref().to_path_buf()],
            ..Default::default()
        }
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn validate(&self) -> Result<(), AssetTrackError> {
        if self.data_dirs.is_empty() {
            return Err(AssetTrackError::Config(
                "at least one data directory is required".to_string(),
            ));
        }
        if self.worker_count == 0 {
            return Err(AssetTrackError::Config(
                "worker_count must be positive".to_string(),
            ));
        }
        if self.rewrite_retry.max_attempts == 0 {
            return Err(AssetTrackError::Config(
                "rewrite_retry.max_attempts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

pub trait TrackerConfigProvider: Send + Sync {
    fn get_config(&self) -> Result<TrackerConfig, AssetTrackError>;
    fn set_config(&self, config: &TrackerConfig) -> Result<(), AssetTrackError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new(path: PathBuf) -> Self {
        TomlConfigProvider { path }
    }
}

impl TrackerConfigProvider for TomlConfigProvider {
    fn get_config(&self) -> Result<TrackerConfig, AssetTrackError> {
        tracing::debug!("Attempting to read tracker config from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using the default configuration.");
            return Ok(TrackerConfig::default());
        }
        let content = read_to_string(&self.path)?;
        Ok(toml::from_str(&content)?)
    }

    fn set_config(&self, config: &TrackerConfig) -> Result<(), AssetTrackError> {
        tracing::debug!("Attempting to write tracker config to: {:?}", &self.path);
        let toml_string = toml::to_string(config)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}
