use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::entry::types::EntryMetadata;
use crate::search::{SearchEngine, SearchResult};
use crate::vector::{VectorIndex, VectorMatch};

/// The two orderings callers can ask for without a re-scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrder {
    /// Non-reply entries, newest `createdAt` first.
    RootsByCreation,
    /// Every entry, most recently updated first.
    AllByRecency,
}

/// One published state of the index: metadata, ordering, reverse parent map
/// and the derived search and vector engines.
#[derive(Debug, Clone, Default)]
pub struct IndexMap {
    order: Vec<String>,
    entries: HashMap<String, EntryMetadata>,
    // child -> parent, derived from every entry's `replies`
    parents: HashMap<String, String>,
    search: Arc<SearchEngine>,
    vectors: Arc<VectorIndex>,
}

impl IndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&EntryMetadata> {
        self.entries.get(path)
    }

    pub fn parent_of(&self, path: &str) -> Option<&str> {
        self.parents.get(path).map(|p| p.as_str())
    }

    /// Paths in canonical index order.
    pub fn paths(&self) -> &[String] {
        &self.order
    }

    pub fn search_engine(&self) -> &SearchEngine {
        &self.search
    }

    pub fn vector_index(&self) -> &VectorIndex {
        &self.vectors
    }

    /// Full-text search. An empty query lists every entry in index order.
    pub fn search(&self, query: &str) -> Vec<SearchResult> {
        let results = self.search.search(query);
        if !query.trim().is_empty() {
            return results;
        }

        let mut by_path: HashMap<String, SearchResult> =
            results.into_iter().map(|r| (r.path.clone(), r)).collect();
        self.order
            .iter()
            .map(|path| {
                by_path.remove(path).unwrap_or_else(|| SearchResult {
                    path: path.clone(),
                    score: 0.0,
                    snippet: String::new(),
                })
            })
            .collect()
    }

    pub fn vector_search(&self, vector: &[f32], top_n: usize) -> Vec<VectorMatch> {
        self.vectors.query(vector, top_n)
    }

    /// Reply paths that point at entries absent from the index, as (parent, child).
    pub fn dangling_replies(&self) -> Vec<(String, String)> {
        let mut dangling: Vec<(String, String)> = self
            .entries
            .iter()
            .flat_map(|(parent, meta)| {
                meta.replies
                    .iter()
                    .filter(|child| !self.entries.contains_key(*child))
                    .map(move |child| (parent.clone(), child.clone()))
            })
            .collect();
        dangling.sort();
        dangling
    }

    /// Paths of entries that have no embedding yet.
    pub fn missing_embeddings(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|path| {
                self.entries
                    .get(*path)
                    .map(|meta| meta.embedding.is_none())
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Entries carrying `tag`, in index order.
    pub fn paths_with_tag(&self, tag: &str) -> Vec<String> {
        self.order
            .iter()
            .filter(|path| {
                self.entries
                    .get(*path)
                    .map(|meta| meta.tags.iter().any(|t| t == tag))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Every tag in use, with the number of entries carrying it.
    pub fn tag_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for meta in self.entries.values() {
            for tag in &meta.tags {
                *counts.entry(tag.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Insert or replace an entry. A known path keeps its slot while
    /// `createdAt` is unchanged; otherwise it is placed by `createdAt`.
    pub(crate) fn upsert(&mut self, path: &str, meta: EntryMetadata, text: Option<&str>) {
        let keep_slot = self
            .entries
            .get(path)
            .map(|old| old.created_at == meta.created_at)
            .unwrap_or(false);

        if !keep_slot {
            self.order.retain(|p| p != path);
            let pos = self
                .order
                .iter()
                .position(|p| {
                    self.entries
                        .get(p)
                        .map(|other| other.created_at < meta.created_at)
                        .unwrap_or(false)
                })
                .unwrap_or(self.order.len());
            self.order.insert(pos, path.to_string());
        }

        self.put(path, meta, text);
    }

    /// Insert or replace an entry at the very front of the index order.
    pub(crate) fn upsert_front(&mut self, path: &str, meta: EntryMetadata, text: Option<&str>) {
        self.order.retain(|p| p != path);
        self.order.insert(0, path.to_string());
        self.put(path, meta, text);
    }

    /// Bulk-load insert; callers feed entries already in index order.
    pub(crate) fn append(&mut self, path: &str, meta: EntryMetadata, text: &str) {
        if !self.entries.contains_key(path) {
            self.order.push(path.to_string());
        }
        self.put(path, meta, Some(text));
    }

    fn put(&mut self, path: &str, mut meta: EntryMetadata, text: Option<&str>) {
        let old = self.entries.remove(path);

        if let Some(old) = &old {
            for child in &old.replies {
                if self.parents.get(child).map(|p| p == path).unwrap_or(false) {
                    self.parents.remove(child);
                }
            }
        }
        for child in &meta.replies {
            if let Some(previous) = self.parents.insert(child.clone(), path.to_string()) {
                if previous != path {
                    log::warn!(
                        "[IndexStore] {} is listed as a reply of both {} and {}",
                        child,
                        previous,
                        path
                    );
                }
            }
        }

        let text = text.map(str::to_string).unwrap_or_else(|| meta.title.clone());
        let text_changed = self
            .search
            .document_text(path)
            .map(|previous| previous != text)
            .unwrap_or(true);

        // A stale embedding is dropped once the text it was computed from changes
        if meta.embedding.is_none() && !text_changed {
            meta.embedding = old.and_then(|o| o.embedding);
        }
        match &meta.embedding {
            Some(vector) => Arc::make_mut(&mut self.vectors).index_embedding(path, vector.clone()),
            None => Arc::make_mut(&mut self.vectors).remove_embedding(path),
        }

        Arc::make_mut(&mut self.search).index_entry(path, &text, meta.created_at);
        self.entries.insert(path.to_string(), meta);
    }

    pub(crate) fn remove(&mut self, path: &str) -> Option<EntryMetadata> {
        let meta = self.entries.remove(path)?;
        self.order.retain(|p| p != path);
        for child in &meta.replies {
            if self.parents.get(child).map(|p| p == path).unwrap_or(false) {
                self.parents.remove(child);
            }
        }
        Arc::make_mut(&mut self.search).remove_entry(path);
        Arc::make_mut(&mut self.vectors).remove_embedding(path);
        Some(meta)
    }

    pub(crate) fn set_embedding(&mut self, path: &str, vector: Vec<f32>) -> bool {
        let Some(meta) = self.entries.get_mut(path) else {
            return false;
        };
        meta.embedding = Some(vector.clone());
        Arc::make_mut(&mut self.vectors).index_embedding(path, vector);
        true
    }

    /// Lazy iterator over this snapshot in the requested order.
    pub fn ordered(self: &Arc<Self>, order: EntryOrder) -> OrderedEntries {
        let mut keys: Vec<String> = match order {
            EntryOrder::RootsByCreation => self
                .order
                .iter()
                .filter(|p| self.entries.get(*p).map(|m| !m.is_reply).unwrap_or(false))
                .cloned()
                .collect(),
            EntryOrder::AllByRecency => self.order.clone(),
        };

        let entries = &self.entries;
        match order {
            EntryOrder::RootsByCreation => keys.sort_by(|a, b| {
                entries[b]
                    .created_at
                    .cmp(&entries[a].created_at)
                    .then_with(|| a.cmp(b))
            }),
            EntryOrder::AllByRecency => keys.sort_by(|a, b| {
                entries[b]
                    .updated_at
                    .cmp(&entries[a].updated_at)
                    .then_with(|| a.cmp(b))
            }),
        }

        OrderedEntries {
            snapshot: Arc::clone(self),
            keys,
            pos: 0,
        }
    }
}

/// Iterator over `(path, metadata)` pairs of one snapshot. Cloning or
/// calling [`OrderedEntries::restart`] walks the same sequence again.
#[derive(Debug, Clone)]
pub struct OrderedEntries {
    snapshot: Arc<IndexMap>,
    keys: Vec<String>,
    pos: usize,
}

impl OrderedEntries {
    pub fn restart(&mut self) {
        self.pos = 0;
    }

    pub fn remaining(&self) -> usize {
        self.keys.len() - self.pos
    }
}

impl Iterator for OrderedEntries {
    type Item = (String, EntryMetadata);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(path) = self.keys.get(self.pos) {
            self.pos += 1;
            if let Some(meta) = self.snapshot.entries.get(path) {
                return Some((path.clone(), meta.clone()));
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining()))
    }
}
