//! # File watching
//!
//! [`AssetWatcher`] feeds file system notifications for every data directory into an
//! [`AssetEngine`]:
//!
//! - created or modified files go to [`AssetEngine::notify_file_changed`], which re-registers
//!   asset documents and invalidates the dependents of any other file
//! - removed files go to [`AssetEngine::handle_file_removed`]
//! - dot files (`.git`, `.DS_Store`, editor swap files) are ignored
//!
//! Notifications are debounced so that a burst of writes to one file costs a single update.
//! Hash evaluation is left to an [`crate::scheduler::UpdateScheduler`] running alongside.
//!
//! ```rust,no_run
//! use assettrack_core::{
//!     config::TrackerConfig, engine::AssetEngine, scheduler::UpdateScheduler, watch::AssetWatcher,
//! };
//! use std::{sync::Arc, time::Duration};
//!
//! let runtime = tokio::runtime::Runtime::new()?;
//! let engine = Arc::new(AssetEngine::open(TrackerConfig::with_data_dir("/workspace/assets"), None)?);
//! engine.scan_data_directories();
//! let scheduler = UpdateScheduler::start(engine.clone(), 4, runtime.handle());
//! let watcher = AssetWatcher::start(engine.clone(), Duration::from_millis(300))?;
//! // ... until the application exits
//! watcher.stop();
//! runtime.block_on(scheduler.shutdown());
//! engine.shutdown()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::{engine::AssetEngine, error::AssetTrackError};

use notify_debouncer_full::{
    new_debouncer,
    notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher},
    DebounceEventResult, Debouncer, FileIdMap,
};
use parking_lot::Mutex;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

type DataDirWatcher = Debouncer<RecommendedWatcher, FileIdMap>;

fn is_dot_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

pub struct AssetWatcher {
    debouncer: Mutex<Option<DataDirWatcher>>,
    roots: Vec<PathBuf>,
}

impl AssetWatcher {
    pub fn start(engine: Arc<AssetEngine>, debounce: Duration) -> Result<Self, AssetTrackError> {
        let roots = engine.paths.roots();
        let handler_engine = engine;
        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events.iter() {
                        let changed = match event.event.kind {
                            EventKind::Create(_) | EventKind::Modify(_) => true,
                            EventKind::Remove(_) => false,
                            _ => continue,
                        };
                        for path in event.paths.iter().filter(|p| !is_dot_file(p)) {
                            tracing::debug!("[AssetWatcher] {:?}: {path:?}", event.event.kind);
                            if changed {
                                if let Err(e) = handler_engine.notify_file_changed(path) {
                                    tracing::warn!("[AssetWatcher] failed to update {path:?}: {e}");
                                }
                            } else {
                                handler_engine.handle_file_removed(path);
                            }
                        }
                    }
                    handler_engine.process_pending_changes();
                }
                Err(errors) => {
                    tracing::error!("Notify debouncer returned errors: {:?}", errors);
                }
            }
        })?;
        for root in roots.iter() {
            debouncer.watcher().watch(root, RecursiveMode::Recursive)?;
            tracing::info!("[AssetWatcher] watching {root:?}");
        }
        Ok(AssetWatcher {
            debouncer: Mutex::new(Some(debouncer)),
            roots,
        })
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn stop(&self) {
        if let Some(mut debouncer) = self.debouncer.lock().take() {
            for root in self.roots.iter() {
                if let Err(e) = debouncer.watcher().unwatch(root) {
                    tracing::debug!("[AssetWatcher] unwatch {root:?}: {e}");
                }
            }
            tracing::info!("[AssetWatcher] stopped");
        }
    }
}

impl Drop for AssetWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
