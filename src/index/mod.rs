pub mod map;
pub mod watcher;

use chrono::Utc;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;
use tokio::sync::broadcast;

use crate::entry::text::html_to_text;
use crate::entry::types::{Entry, EntryMetadata, EntryPatch};
use crate::entry::EntryParser;
use crate::error::{PileError, Result};
use crate::search::SearchResult;
use crate::store::EntryStore;
use crate::vector::VectorMatch;

pub use map::{EntryOrder, IndexMap, OrderedEntries};

/// Embedding sidecar, relative to the pile root.
pub const EMBEDDINGS_FILE: &str = ".pile/embeddings.json";

const EVENT_CAPACITY: usize = 256;
const SIDECAR_VERSION: u32 = 2;

/// Change notification published after a mutation becomes visible.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IndexEvent {
    Loaded { count: usize },
    Added { path: String },
    Updated { path: String },
    Removed { path: String },
    EmbeddingsUpdated { count: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadFailure {
    pub path: String,
    pub message: String,
}

/// Outcome of a bulk load. Unparsable files are listed here, never fatal.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoadReport {
    pub loaded: usize,
    pub failures: Vec<LoadFailure>,
}

#[derive(Debug, Serialize, Deserialize)]
struct EmbeddingSidecar {
    version: u32,
    #[serde(default)]
    vectors: BTreeMap<String, StoredVector>,
}

/// A vector plus the fingerprint of the plain text it was computed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredVector {
    text_hash: String,
    vector: Vec<f32>,
}

fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// In-memory index over the entries of one pile.
///
/// Readers take an `Arc` snapshot and never block on storage. Mutations are
/// serialized by a write gate: each one clones the current map, performs its
/// storage I/O, and only then publishes the new map. A failed write leaves
/// the published map untouched.
pub struct IndexStore<S: EntryStore> {
    store: Arc<S>,
    state: RwLock<Arc<IndexMap>>,
    write_gate: Mutex<()>,
    events: broadcast::Sender<IndexEvent>,
    reported: Mutex<HashSet<(String, String)>>,
}

impl<S: EntryStore> IndexStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            state: RwLock::new(Arc::new(IndexMap::new())),
            write_gate: Mutex::new(()),
            events,
            reported: Mutex::new(HashSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexEvent> {
        self.events.subscribe()
    }

    /// Current published map.
    pub fn snapshot(&self) -> Arc<IndexMap> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&state)
    }

    pub fn get(&self, path: &str) -> Option<EntryMetadata> {
        self.snapshot().get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.snapshot().contains(path)
    }

    pub fn parent_of(&self, path: &str) -> Option<String> {
        self.snapshot().parent_of(path).map(str::to_string)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn ordered_entries(&self, order: EntryOrder) -> OrderedEntries {
        self.snapshot().ordered(order)
    }

    pub fn search(&self, query: &str) -> Vec<SearchResult> {
        self.snapshot().search(query)
    }

    pub fn vector_search(&self, vector: &[f32], top_n: usize) -> Vec<VectorMatch> {
        self.snapshot().vector_search(vector, top_n)
    }

    /// Scan the whole pile and replace the map. Never fails: an unreadable
    /// root yields an empty index, a bad file is skipped and reported.
    pub fn load(&self) -> LoadReport {
        let _gate = self.lock_writes();
        let started = Instant::now();
        let mut report = LoadReport::default();

        let files = match self.store.list_entry_files() {
            Ok(files) => files,
            Err(e) => {
                log::error!("[IndexStore] Cannot scan pile root: {}", e);
                report.failures.push(LoadFailure {
                    path: String::new(),
                    message: e.to_string(),
                });
                self.publish(IndexMap::new());
                self.emit(IndexEvent::Loaded { count: 0 });
                return report;
            }
        };

        let store = &self.store;
        let parsed: Vec<(String, Result<(Entry, String)>)> = files
            .par_iter()
            .map(|path| {
                let result = store
                    .read_file(path)
                    .and_then(|raw| EntryParser::parse(path, &raw))
                    .map(|entry| {
                        let text = html_to_text(&entry.content);
                        (entry, text)
                    });
                (path.clone(), result)
            })
            .collect();

        let embeddings = self.read_sidecar();
        let mut loaded: Vec<(Entry, String)> = Vec::with_capacity(parsed.len());
        for (path, result) in parsed {
            match result {
                Ok(item) => loaded.push(item),
                Err(e) => {
                    log::warn!("[IndexStore] Skipping {}: {}", path, e);
                    report.failures.push(LoadFailure {
                        path,
                        message: e.to_string(),
                    });
                }
            }
        }

        loaded.sort_by(|a, b| {
            b.0.metadata
                .created_at
                .cmp(&a.0.metadata.created_at)
                .then_with(|| a.0.path.cmp(&b.0.path))
        });

        let mut next = IndexMap::new();
        let mut stale = 0;
        for (mut entry, text) in loaded {
            if let Some(stored) = embeddings.get(&entry.path) {
                // Text edited since the vector was computed
                if stored.text_hash == text_hash(&text) {
                    entry.metadata.embedding = Some(stored.vector.clone());
                } else {
                    stale += 1;
                }
            }
            next.append(&entry.path, entry.metadata, &text);
        }
        if stale > 0 {
            log::info!("[IndexStore] Dropped {} stale embeddings", stale);
        }
        report.loaded = next.len();

        let published = self.publish(next);
        log::info!(
            "[IndexStore] Loaded {} entries ({} skipped) in {:?}",
            report.loaded,
            report.failures.len(),
            started.elapsed()
        );
        self.emit(IndexEvent::Loaded {
            count: report.loaded,
        });
        self.report_dangling(&published);
        report
    }

    /// Parse a freshly written entry and upsert it. With a parent, the entry
    /// is linked into the parent's replies and both files are persisted.
    pub fn add(&self, path: &str, parent: Option<&str>) -> Result<Arc<IndexMap>> {
        let _gate = self.lock_writes();
        let current = self.snapshot();

        let raw = self.store.read_file(path)?;
        let mut entry = EntryParser::parse(path, &raw)?;
        let mut next = (*current).clone();

        if let Some(parent_path) = parent {
            if parent_path == path {
                return Err(PileError::InvalidPath(format!("{} cannot reply to itself", path)));
            }
            let mut parent_meta = current
                .get(parent_path)
                .cloned()
                .ok_or_else(|| PileError::NotFound(parent_path.to_string()))?;

            // Child first: a parent on disk must never list a child that failed to persist
            let child_rewritten = !entry.metadata.is_reply;
            if child_rewritten {
                entry.metadata.is_reply = true;
                self.store
                    .write_file(path, &EntryParser::serialize_entry(&entry)?)?;
            }

            if !parent_meta.has_reply(path) {
                parent_meta.replies.push(path.to_string());
                match self.rewrite_metadata(parent_path, &parent_meta) {
                    Ok(parent_content) => {
                        next.upsert(parent_path, parent_meta, Some(&html_to_text(&parent_content)));
                    }
                    Err(e) => {
                        if child_rewritten {
                            if let Err(restore) = self.store.write_file(path, &raw) {
                                log::warn!("[IndexStore] Could not restore {}: {}", path, restore);
                            }
                        }
                        return Err(e);
                    }
                }
            }
        }

        let existed = current.contains(path);
        next.upsert(path, entry.metadata, Some(&html_to_text(&entry.content)));

        let published = self.publish(next);
        self.emit(if existed {
            IndexEvent::Updated {
                path: path.to_string(),
            }
        } else {
            IndexEvent::Added {
                path: path.to_string(),
            }
        });
        self.report_dangling(&published);
        Ok(published)
    }

    /// Merge a metadata patch into an indexed entry and persist it.
    pub fn update(&self, path: &str, patch: &EntryPatch) -> Result<Arc<IndexMap>> {
        let _gate = self.lock_writes();
        let current = self.snapshot();

        let mut meta = current
            .get(path)
            .cloned()
            .ok_or_else(|| PileError::NotFound(path.to_string()))?;
        patch.apply(&mut meta);
        meta.updated_at = Utc::now();

        let content = self.rewrite_metadata(path, &meta)?;
        let mut next = (*current).clone();
        next.upsert(path, meta, Some(&html_to_text(&content)));

        let published = self.publish(next);
        self.emit(IndexEvent::Updated {
            path: path.to_string(),
        });
        Ok(published)
    }

    /// Replace the body of an indexed entry and refresh `updatedAt`. The
    /// metadata is read and written under the write gate, so a patch applied
    /// concurrently is never overwritten.
    pub fn save_content(&self, path: &str, content: &str) -> Result<Arc<IndexMap>> {
        let _gate = self.lock_writes();
        let current = self.snapshot();

        let mut meta = current
            .get(path)
            .cloned()
            .ok_or_else(|| PileError::NotFound(path.to_string()))?;
        meta.updated_at = Utc::now();
        // Recomputed from the new text on the next regeneration unless the text is unchanged
        meta.embedding = None;

        self.store
            .write_file(path, &EntryParser::serialize(&meta, content)?)?;
        let mut next = (*current).clone();
        next.upsert(path, meta, Some(&html_to_text(content)));

        let published = self.publish(next);
        self.emit(IndexEvent::Updated {
            path: path.to_string(),
        });
        Ok(published)
    }

    /// Take `child` out of `parent`'s replies and persist the parent.
    /// Like linking, this does not touch the parent's `updatedAt`.
    pub fn detach_reply(&self, parent: &str, child: &str) -> Result<bool> {
        let _gate = self.lock_writes();
        let current = self.snapshot();

        let mut meta = current
            .get(parent)
            .cloned()
            .ok_or_else(|| PileError::NotFound(parent.to_string()))?;
        if !meta.has_reply(child) {
            return Ok(false);
        }
        meta.replies.retain(|r| r != child);

        let content = self.rewrite_metadata(parent, &meta)?;
        let mut next = (*current).clone();
        next.upsert(parent, meta, Some(&html_to_text(&content)));

        self.publish(next);
        self.emit(IndexEvent::Updated {
            path: parent.to_string(),
        });
        Ok(true)
    }

    /// Drop an entry from the map and the derived engines. Parents keep
    /// their `replies` as they are.
    pub fn remove(&self, path: &str) -> bool {
        self.drop_entry(path, true)
    }

    /// Undo a [`IndexStore::prepend`] that was never confirmed. No event is
    /// sent, since observers never saw the entry.
    pub fn retract(&self, path: &str) -> bool {
        self.drop_entry(path, false)
    }

    fn drop_entry(&self, path: &str, notify: bool) -> bool {
        let _gate = self.lock_writes();
        let current = self.snapshot();
        if !current.contains(path) {
            return false;
        }

        let mut next = (*current).clone();
        next.remove(path);
        self.publish(next);
        if notify {
            self.emit(IndexEvent::Removed {
                path: path.to_string(),
            });
        }
        true
    }

    /// Optimistic insert at the front of the index order, before the file
    /// is confirmed by [`IndexStore::add`]. No event is sent.
    pub fn prepend(&self, path: &str, metadata: EntryMetadata) {
        let _gate = self.lock_writes();
        let mut next = (*self.snapshot()).clone();
        next.upsert_front(path, metadata, None);
        self.publish(next);
    }

    /// Merge computed embeddings and persist the sidecar in one step.
    /// Paths no longer in the index are ignored.
    pub fn apply_embeddings(&self, batch: Vec<(String, Vec<f32>)>) -> Result<usize> {
        let _gate = self.lock_writes();
        let mut next = (*self.snapshot()).clone();

        let mut applied = 0;
        for (path, vector) in batch {
            if next.set_embedding(&path, vector) {
                applied += 1;
            } else {
                log::debug!("[IndexStore] Dropping embedding for unknown entry {}", path);
            }
        }

        self.write_sidecar(&next)?;
        self.publish(next);
        self.emit(IndexEvent::EmbeddingsUpdated { count: applied });
        Ok(applied)
    }

    /// Every dangling reply reported so far, as (parent, child).
    pub fn consistency_errors(&self) -> Vec<(String, String)> {
        let reported = self.reported.lock().unwrap_or_else(|e| e.into_inner());
        let mut errors: Vec<(String, String)> = reported.iter().cloned().collect();
        errors.sort();
        errors
    }

    fn rewrite_metadata(&self, path: &str, meta: &EntryMetadata) -> Result<String> {
        let raw = self.store.read_file(path)?;
        let entry = EntryParser::parse(path, &raw)?;
        self.store
            .write_file(path, &EntryParser::serialize(meta, &entry.content)?)?;
        Ok(entry.content)
    }

    fn read_sidecar(&self) -> BTreeMap<String, StoredVector> {
        let raw = match self.store.read_file(EMBEDDINGS_FILE) {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => return BTreeMap::new(),
            Err(e) => {
                log::warn!("[IndexStore] Cannot read embeddings: {}", e);
                return BTreeMap::new();
            }
        };
        let value: serde_json::Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("[IndexStore] Ignoring malformed embeddings file: {}", e);
                return BTreeMap::new();
            }
        };
        let version = value.get("version").and_then(|v| v.as_u64()).unwrap_or(0);
        if version != u64::from(SIDECAR_VERSION) {
            log::info!(
                "[IndexStore] Embeddings file version {} is not {}, recomputing",
                version,
                SIDECAR_VERSION
            );
            return BTreeMap::new();
        }
        match serde_json::from_value::<EmbeddingSidecar>(value) {
            Ok(sidecar) => sidecar.vectors,
            Err(e) => {
                log::warn!("[IndexStore] Ignoring malformed embeddings file: {}", e);
                BTreeMap::new()
            }
        }
    }

    fn write_sidecar(&self, map: &IndexMap) -> Result<()> {
        let engine = map.search_engine();
        let sidecar = EmbeddingSidecar {
            version: SIDECAR_VERSION,
            vectors: map
                .vector_index()
                .iter()
                .map(|(path, vector)| {
                    let stored = StoredVector {
                        text_hash: text_hash(engine.document_text(path).unwrap_or_default()),
                        vector: vector.clone(),
                    };
                    (path.clone(), stored)
                })
                .collect(),
        };
        let json = serde_json::to_string(&sidecar)?;
        self.store.write_file(EMBEDDINGS_FILE, &json)
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_gate.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, next: IndexMap) -> Arc<IndexMap> {
        let next = Arc::new(next);
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        *state = Arc::clone(&next);
        next
    }

    fn emit(&self, event: IndexEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn report_dangling(&self, map: &IndexMap) {
        let dangling = map.dangling_replies();
        if dangling.is_empty() {
            return;
        }
        let mut reported = self.reported.lock().unwrap_or_else(|e| e.into_inner());
        for pair in dangling {
            if reported.insert(pair.clone()) {
                log::warn!(
                    "[IndexStore] {} lists reply {} which is not in the index",
                    pair.0,
                    pair.1
                );
            }
        }
    }
}
