// Shared fixtures for the scenario test modules

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::ai::EmbeddingService;
use crate::cancel::CancelFlag;
use crate::entry::types::EntryMetadata;
use crate::entry::EntryParser;
use crate::error::{PileError, Result};
use crate::index::IndexStore;
use crate::store::{DirEntry, EntryStore, FsStore};

pub fn at(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, hour, min, 0).unwrap()
}

pub fn write_meta(store: &dyn EntryStore, path: &str, meta: &EntryMetadata, content: &str) {
    store
        .write_file(path, &EntryParser::serialize(meta, content).unwrap())
        .unwrap();
}

pub fn write_entry(store: &dyn EntryStore, path: &str, created: DateTime<Utc>, content: &str) -> EntryMetadata {
    let meta = EntryMetadata::new(created);
    write_meta(store, path, &meta, content);
    meta
}

pub fn read_meta(store: &dyn EntryStore, path: &str) -> EntryMetadata {
    let raw = store.read_file(path).unwrap();
    EntryParser::parse(path, &raw).unwrap().metadata
}

/// Temp pile, a store handle on it, and an (unloaded) index over the same root.
pub fn fs_index() -> (TempDir, FsStore, Arc<IndexStore<FsStore>>) {
    let temp_dir = TempDir::new().unwrap();
    let store = FsStore::new(temp_dir.path());
    let index = Arc::new(IndexStore::new(Arc::new(store.clone())));
    (temp_dir, store, index)
}

/// Filesystem store whose writes can be switched to fail.
pub struct FlakyStore {
    inner: FsStore,
    pub fail_writes: AtomicBool,
    failing_path: Mutex<Option<String>>,
}

impl FlakyStore {
    pub fn new(inner: FsStore) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            failing_path: Mutex::new(None),
        }
    }

    /// Fail writes and deletes of `path` only.
    pub fn fail_path(&self, path: &str) {
        *self.failing_path.lock().unwrap() = Some(path.to_string());
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, Ordering::SeqCst);
    }

    fn check(&self, path: &str) -> Result<()> {
        let path_fails = self.failing_path.lock().unwrap().as_deref() == Some(path);
        if path_fails || self.fail_writes.load(Ordering::SeqCst) {
            return Err(PileError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )));
        }
        Ok(())
    }
}

impl EntryStore for FlakyStore {
    fn read_file(&self, path: &str) -> Result<String> {
        self.inner.read_file(path)
    }

    fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        self.check(path)?;
        self.inner.write_file(path, contents)
    }

    fn write_bytes(&self, path: &str, contents: &[u8]) -> Result<()> {
        self.check(path)?;
        self.inner.write_bytes(path, contents)
    }

    fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        self.inner.list_directory(path)
    }

    fn delete_file(&self, path: &str) -> Result<()> {
        self.check(path)?;
        self.inner.delete_file(path)
    }

    fn make_directory(&self, path: &str) -> Result<()> {
        self.inner.make_directory(path)
    }
}

/// Deterministic embedder: vector derived from the text, optional failures
/// for texts containing a marker, optional cancel after N calls.
#[derive(Default)]
pub struct FakeEmbedder {
    pub calls: AtomicUsize,
    pub fail_marker: Option<String>,
    pub cancel_after: Option<(usize, CancelFlag)>,
}

impl FakeEmbedder {
    pub fn vector_for(text: &str) -> Vec<f32> {
        vec![text.len() as f32, text.matches('a').count() as f32, 1.0]
    }
}

impl EmbeddingService for FakeEmbedder {
    fn embed(&self, _model: &str, text: &str) -> Result<Vec<f32>> {
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, flag)) = &self.cancel_after {
            if calls >= *limit {
                flag.cancel();
            }
        }
        if let Some(marker) = &self.fail_marker {
            if text.contains(marker.as_str()) {
                return Err(PileError::Service("embedding model not found".into()));
            }
        }
        Ok(Self::vector_for(text))
    }
}
