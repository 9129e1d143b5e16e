//! Background evaluation of stale assets.
//!
//! Each worker pops one stale asset at a time from the engine and evaluates it on tokio's blocking
//! pool, so hashing never stalls the async runtime. Workers sleep on the engine's work
//! notification, with an idle poll as a fallback for wake-ups that raced the check.

use crate::engine::AssetEngine;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{runtime::Handle, task::JoinHandle, time::sleep};

pub struct UpdateScheduler {
    engine: Arc<AssetEngine>,
    running: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl UpdateScheduler {
    /// Spawn `worker_count` workers on `runtime`.
    pub fn start(engine: Arc<AssetEngine>, worker_count: usize, runtime: &Handle) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let idle_poll = engine.config().idle_poll();
        let workers = (0..worker_count.max(1))
            .map(|id| {
                runtime.spawn(worker_loop(
                    id,
                    engine.clone(),
                    running.clone(),
                    idle_poll,
                ))
            })
            .collect();
        tracing::info!("[UpdateScheduler] started {} workers", worker_count.max(1));
        UpdateScheduler {
            engine,
            running,
            workers,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Wait until no asset is stale or being evaluated, or `timeout` elapsed. Returns whether the
    /// engine went idle.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.engine.is_idle() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// Stop the workers after their current evaluation and wait for them to exit.
    pub async fn shutdown(self) {
        self.running.store(false, Ordering::SeqCst);
        self.engine.work_available().notify_waiters();
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::debug!("[UpdateScheduler] worker ended abnormally: {e}");
            }
        }
        tracing::info!("[UpdateScheduler] stopped");
    }
}

#[tracing::instrument(skip(engine, running, idle_poll))]
async fn worker_loop(
    id: usize,
    engine: Arc<AssetEngine>,
    running: Arc<AtomicBool>,
    idle_poll: Duration,
) {
    let work_available = engine.work_available();
    while running.load(Ordering::SeqCst) && !engine.is_shut_down() {
        match engine.get_next_to_update() {
            Some((guid, path)) => {
                tracing::debug!("[UpdateScheduler] worker {id} evaluating {path:?}");
                let worker_engine = engine.clone();
                let evaluation =
                    tokio::task::spawn_blocking(move || worker_engine.evaluate_background(&guid));
                if let Err(e) = evaluation.await {
                    tracing::debug!("[UpdateScheduler] evaluation task of {guid} failed: {e}");
                    engine.mutate(|state| state.release(&guid));
                }
            }
            None => {
                tokio::select! {
                    _ = work_available.notified() => {}
                    _ = sleep(idle_poll) => {}
                }
            }
        }
    }
}
