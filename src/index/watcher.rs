use notify::{Config, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use super::IndexStore;
use crate::error::{PileError, Result};
use crate::store::{is_entry_file_name, is_indexable_name, FsStore, TEMP_SUFFIX};

const POLL_INTERVAL: Duration = Duration::from_millis(300);
const BASE_DEBOUNCE: Duration = Duration::from_millis(250);
const SETTLE_DEBOUNCE: Duration = Duration::from_millis(500);
// Sync clients (Dropbox, iCloud) deliver many files at once after a wake-up
const BURST_DEBOUNCE: Duration = Duration::from_secs(2);
const BURST_WINDOW: Duration = Duration::from_secs(2);
const BURST_THRESHOLD: usize = 10;

/// Keeps the index in step with entries edited outside the app.
/// Watching stops when this value is dropped.
pub struct PileWatcher {
    _watcher: RecommendedWatcher,
}

impl PileWatcher {
    pub fn start(index: Arc<IndexStore<FsStore>>) -> Result<Self> {
        let root = index.store().root().to_path_buf();
        let (tx, rx) = mpsc::channel();

        let mut watcher = RecommendedWatcher::new(tx, Config::default().with_poll_interval(POLL_INTERVAL))
            .map_err(|e| PileError::Service(format!("watcher: {}", e)))?;
        watcher
            .watch(root.as_path(), RecursiveMode::Recursive)
            .map_err(|e| PileError::Service(format!("watcher: {}", e)))?;

        log::info!("[Watcher] Watching {}", root.display());

        thread::spawn(move || {
            let mut pending: HashMap<PathBuf, Instant> = HashMap::new();
            let mut burst_count: usize = 0;
            let mut burst_start = Instant::now();

            loop {
                match rx.recv_timeout(BASE_DEBOUNCE) {
                    Ok(Ok(event)) => {
                        let now = Instant::now();
                        if burst_start.elapsed() > BURST_WINDOW {
                            burst_count = 0;
                            burst_start = now;
                        }
                        burst_count += event.paths.len();

                        for path in &event.paths {
                            if should_process_path(path, &root) {
                                pending.insert(path.clone(), now);
                            }
                        }

                        if matches!(event.kind, EventKind::Remove(_)) {
                            for path in &event.paths {
                                if should_process_path(path, &root) && !path.exists() {
                                    pending.remove(path);
                                    remove_from_index(&index, path);
                                }
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        log::warn!("[Watcher] Watch error: {}", e);
                    }
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        let debounce = if burst_count > BURST_THRESHOLD {
                            BURST_DEBOUNCE
                        } else {
                            SETTLE_DEBOUNCE
                        };

                        let now = Instant::now();
                        let (stable, waiting): (Vec<_>, Vec<_>) = pending
                            .drain()
                            .partition(|(_, last)| now.duration_since(*last) >= debounce);
                        pending = waiting.into_iter().collect();

                        if !stable.is_empty() {
                            log::debug!("[Watcher] Processing {} stable paths", stable.len());
                        }
                        for (path, _) in stable {
                            if path.is_file() {
                                reindex(&index, &path);
                            } else if !path.exists() {
                                remove_from_index(&index, &path);
                            }
                        }

                        if pending.is_empty() {
                            burst_count = 0;
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => {
                        log::info!("[Watcher] Stopped");
                        break;
                    }
                }
            }
        });

        Ok(Self { _watcher: watcher })
    }
}

fn reindex(index: &IndexStore<FsStore>, path: &Path) {
    let Some(key) = index.store().relative_key(path) else {
        return;
    };
    if let Err(e) = index.add(&key, None) {
        log::warn!("[Watcher] Failed to index {}: {}", key, e);
    }
}

fn remove_from_index(index: &IndexStore<FsStore>, path: &Path) {
    if let Some(key) = index.store().relative_key(path) {
        if index.remove(&key) {
            log::debug!("[Watcher] Removed {}", key);
        }
    }
}

/// Only entry files inside visible folders are indexed.
pub fn should_process_path(path: &Path, root: &Path) -> bool {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if file_name.ends_with(TEMP_SUFFIX) || !is_entry_file_name(file_name) {
        return false;
    }

    let relative = match path.strip_prefix(root) {
        Ok(rel) => rel,
        Err(_) => return false,
    };
    relative.components().all(|component| match component {
        Component::Normal(name) => is_indexable_name(&name.to_string_lossy()),
        _ => false,
    })
}
