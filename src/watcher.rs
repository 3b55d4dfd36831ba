//! Watch mode
//!
//! A debounced recursive watcher on the watched tree feeds a single worker
//! thread, which replays every changed path through [`Synchronizer::handle_change`].
//! Events for one path are therefore applied in arrival order.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_full::{new_debouncer, DebounceEventResult, Debouncer, FileIdMap};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::sync::{SyncError, Synchronizer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Running,
    Stopped,
}

pub struct SyncWatcher {
    debouncer: Option<Debouncer<RecommendedWatcher, FileIdMap>>,
    worker: Option<JoinHandle<()>>,
    state: WatcherState,
}

impl SyncWatcher {
    /// Starts watching `sync.config().watch_dir` recursively. The initial
    /// mirror is the caller's business.
    pub fn start(sync: Arc<Synchronizer>, debounce: Duration) -> Result<Self, SyncError> {
        let watch_dir = sync.config().watch_dir.clone();
        let (tx, rx) = channel();

        let mut debouncer = new_debouncer(debounce, None, move |result: DebounceEventResult| {
            if let Err(e) = tx.send(result) {
                error!("Failed to forward file event: {}", e);
            }
        })?;
        debouncer
            .watcher()
            .watch(&watch_dir, RecursiveMode::Recursive)?;

        let canonical_root = std::fs::canonicalize(&watch_dir).ok();
        let worker = std::thread::Builder::new()
            .name("scene-sync-watch".to_string())
            .spawn(move || run_worker(&sync, rx, canonical_root))
            .map_err(|source| SyncError::Io {
                path: watch_dir.clone(),
                source,
            })?;

        info!("Watching {}", watch_dir.display());
        Ok(Self {
            debouncer: Some(debouncer),
            worker: Some(worker),
            state: WatcherState::Running,
        })
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Blocks until the worker exits, which only happens once the watcher is
    /// stopped from elsewhere or the process ends.
    pub fn wait(mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Watch worker panicked");
            }
        }
        self.state = WatcherState::Stopped;
    }

    /// Stops watching and waits for queued events to drain. Idempotent.
    pub fn stop(&mut self) {
        if self.state == WatcherState::Stopped {
            return;
        }
        // Dropping the debouncer drops the sender and ends the worker loop.
        self.debouncer.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Watch worker panicked");
            }
        }
        self.state = WatcherState::Stopped;
        info!("Watcher stopped");
    }
}

impl Drop for SyncWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(
    sync: &Synchronizer,
    rx: Receiver<DebounceEventResult>,
    canonical_root: Option<PathBuf>,
) {
    let watch_dir = sync.config().watch_dir.clone();
    while let Ok(result) = rx.recv() {
        match result {
            Ok(events) => {
                let paths = changed_paths(events.iter().map(|e| &e.event));
                for path in paths {
                    let path = relocate(&path, &watch_dir, canonical_root.as_deref());
                    if sync.config().is_excluded(&path) {
                        continue;
                    }
                    for (path, outcome) in sync.handle_change(&path) {
                        match outcome {
                            Ok(outcome) => debug!("{}: {:?}", path.display(), outcome),
                            Err(e) => warn!("{}", e),
                        }
                    }
                }
            }
            Err(errors) => {
                for e in errors {
                    warn!("File watcher error: {}", e);
                }
            }
        }
    }
}

/// Paths touched by create, modify or remove events, first occurrence order.
pub fn changed_paths<'e>(events: impl IntoIterator<Item = &'e Event>) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = Vec::new();
    for event in events {
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
        ) {
            continue;
        }
        for path in &event.paths {
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }
    }
    paths
}

/// Some backends report canonical paths; map them back under `watch_dir`.
fn relocate(path: &Path, watch_dir: &Path, canonical_root: Option<&Path>) -> PathBuf {
    if path.starts_with(watch_dir) {
        return path.to_path_buf();
    }
    match canonical_root.and_then(|root| path.strip_prefix(root).ok()) {
        Some(relative) => watch_dir.join(relative),
        None => path.to_path_buf(),
    }
}
