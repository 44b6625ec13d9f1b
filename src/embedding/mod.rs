use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::ai::EmbeddingService;
use crate::cancel::CancelFlag;
use crate::error::{PileError, Result};
use crate::index::IndexStore;
use crate::store::EntryStore;

/// Progress counters of the running batch, readable from any thread.
pub struct IndexProgress {
    pub total: AtomicUsize,
    pub completed: AtomicUsize,
    pub is_running: AtomicBool,
}

impl Default for IndexProgress {
    fn default() -> Self {
        Self {
            total: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            is_running: AtomicBool::new(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub is_running: bool,
}

impl IndexProgress {
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            is_running: self.is_running.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingFailure {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegenerationReport {
    pub requested: usize,
    pub embedded: usize,
    pub skipped_empty: usize,
    pub failures: Vec<EmbeddingFailure>,
}

// Clears the running flag however `run` exits
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Computes embeddings for every indexed entry that lacks one.
pub struct EmbeddingRegenerator<E: EmbeddingService> {
    service: E,
    model: String,
    progress: Arc<IndexProgress>,
}

impl<E: EmbeddingService> EmbeddingRegenerator<E> {
    pub fn new(service: E, model: impl Into<String>) -> Self {
        Self {
            service,
            model: model.into(),
            progress: Arc::new(IndexProgress::default()),
        }
    }

    pub fn progress(&self) -> Arc<IndexProgress> {
        Arc::clone(&self.progress)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed every entry without an embedding and merge the results in one step.
    ///
    /// A second call while a batch is running returns an empty report at once.
    /// Raising `cancel` discards everything computed so far and yields
    /// [`PileError::Cancelled`]; the index is left as it was.
    pub fn run<S: EntryStore>(&self, index: &IndexStore<S>, cancel: &CancelFlag) -> Result<RegenerationReport> {
        if self
            .progress
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::info!("[Embeddings] Regeneration already running");
            return Ok(RegenerationReport::default());
        }
        let _running = RunningGuard(&self.progress.is_running);

        let snapshot = index.snapshot();
        let missing = snapshot.missing_embeddings();
        let mut report = RegenerationReport {
            requested: missing.len(),
            ..Default::default()
        };

        self.progress.total.store(missing.len(), Ordering::SeqCst);
        self.progress.completed.store(0, Ordering::SeqCst);

        if missing.is_empty() {
            return Ok(report);
        }
        log::info!("[Embeddings] Computing {} embeddings with {}", missing.len(), self.model);

        let mut staged: Vec<(String, Vec<f32>)> = Vec::new();
        for path in missing {
            if cancel.is_cancelled() {
                log::info!("[Embeddings] Cancelled, discarding {} staged results", staged.len());
                return Err(PileError::Cancelled);
            }

            let text = snapshot
                .search_engine()
                .document_text(&path)
                .unwrap_or_default()
                .trim()
                .to_string();

            if text.is_empty() {
                report.skipped_empty += 1;
            } else {
                match self.service.embed(&self.model, &text) {
                    Ok(vector) if !vector.is_empty() => staged.push((path, vector)),
                    Ok(_) => report.failures.push(EmbeddingFailure {
                        path,
                        message: "service returned an empty vector".to_string(),
                    }),
                    Err(e) => {
                        log::warn!("[Embeddings] Failed for {}: {}", path, e);
                        report.failures.push(EmbeddingFailure {
                            path,
                            message: e.to_string(),
                        });
                    }
                }
            }
            self.progress.completed.fetch_add(1, Ordering::SeqCst);
        }

        if cancel.is_cancelled() {
            return Err(PileError::Cancelled);
        }

        if !staged.is_empty() {
            report.embedded = index.apply_embeddings(staged)?;
        }
        log::info!(
            "[Embeddings] Done: {} embedded, {} failed",
            report.embedded,
            report.failures.len()
        );
        Ok(report)
    }
}
