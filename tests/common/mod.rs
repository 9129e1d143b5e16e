//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```

use assettrack_core::{
    config::{RetryPolicy, TrackerConfig},
    engine::AssetEngine,
    event::AssetEvent,
    properties::AssetGuid,
};
use filetime::{set_file_mtime, FileTime};
use std::{
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tempfile::TempDir;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

/// Initialize tracing for tests, respecting RUST_LOG env var.
///
/// Safe to call multiple times, subsequent calls are no-ops.
#[allow(dead_code)]
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// Create an empty data directory. Returns the temp dir guard and the canonical root.
#[allow(dead_code)]
pub fn create_data_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path().join("assets");
    std::fs::create_dir(&root).unwrap();
    let root = root.canonicalize().unwrap();
    (temp_dir, root)
}

#[allow(dead_code)]
pub fn test_config(root: &Path) -> TrackerConfig {
    TrackerConfig {
        data_dirs: vec![root.to_path_buf()],
        worker_count: 2,
        idle_poll_ms: 20,
        document_cache: Some(root.join(".assettrack").join("documents.json")),
        rewrite_retry: RetryPolicy {
            max_attempts: 3,
            backoff_step_ms: 1,
        },
        ..Default::default()
    }
}

#[allow(dead_code)]
pub fn open_engine(root: &Path) -> (AssetEngine, UnboundedReceiver<AssetEvent>) {
    let (tx, rx) = unbounded_channel();
    let engine = AssetEngine::open(test_config(root), Some(tx)).unwrap();
    (engine, rx)
}

#[allow(dead_code)]
pub fn guid_dep(guid: &AssetGuid) -> String {
    format!("{{ guid = \"{guid}\" }}")
}

#[allow(dead_code)]
pub fn path_dep(path: &str) -> String {
    format!("{{ path = \"{path}\" }}")
}

/// Text of a TOML asset document.
#[allow(dead_code)]
pub fn asset_doc(
    guid: Option<&AssetGuid>,
    settings: &str,
    transform: &[String],
    thumbnail: &[String],
) -> String {
    let guid_line = guid
        .map(|guid| format!("guid = \"{guid}\"\n"))
        .unwrap_or_default();
    format!(
        "{guid_line}\n[settings]\n{settings}\n\n[dependencies]\ntransform = [{}]\nthumbnail = [{}]\n",
        transform.join(", "),
        thumbnail.join(", ")
    )
}

/// Write `content` below `root`, creating parent directories. Every write moves the modification
/// time forward so that timestamp keyed caches see the change.
#[allow(dead_code)]
pub fn write_file(root: &Path, relative: &str, content: &[u8]) -> PathBuf {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let previous = std::fs::metadata(&path)
        .ok()
        .map(|metadata| FileTime::from_last_modification_time(&metadata));
    std::fs::write(&path, content).unwrap();
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64;
    let mtime = match previous {
        Some(previous) if previous.unix_seconds() >= now => {
            FileTime::from_unix_time(previous.unix_seconds() + 1, 0)
        }
        _ => FileTime::from_unix_time(now, 0),
    };
    set_file_mtime(&path, mtime).unwrap();
    path
}

#[allow(dead_code)]
pub fn write_asset(root: &Path, relative: &str, content: &str) -> PathBuf {
    write_file(root, relative, content.as_bytes())
}

#[allow(dead_code)]
pub fn drain_events(rx: &mut UnboundedReceiver<AssetEvent>) -> Vec<AssetEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
