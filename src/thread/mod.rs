use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::entry::text::html_to_text;
use crate::entry::types::Entry;
use crate::entry::EntryParser;
use crate::error::{PileError, Result};
use crate::index::{IndexMap, IndexStore};
use crate::store::EntryStore;

/// A thread flattened to plain text, keyed by the path it was requested for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadText {
    pub path: String,
    pub text: String,
}

/// Rebuilds reply chains from the index and the entry store.
pub struct ThreadResolver<'a, S: EntryStore> {
    index: &'a IndexStore<S>,
}

impl<'a, S: EntryStore> ThreadResolver<'a, S> {
    pub fn new(index: &'a IndexStore<S>) -> Self {
        Self { index }
    }

    /// The whole thread `path` belongs to: root first, then replies in pre-order.
    pub fn get_thread(&self, path: &str) -> Result<Vec<Entry>> {
        let snapshot = self.index.snapshot();
        if !snapshot.contains(path) {
            return Err(PileError::NotFound(path.to_string()));
        }

        let root = find_root(&snapshot, path);
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        collect_preorder(&snapshot, &root, &mut visited, &mut order);

        let store = self.index.store();
        let mut thread = Vec::with_capacity(order.len());
        for member in order {
            let Some(meta) = snapshot.get(&member) else {
                continue;
            };
            let content = match store
                .read_file(&member)
                .and_then(|raw| EntryParser::parse(&member, &raw))
            {
                Ok(entry) => entry.content,
                Err(e) => {
                    log::warn!("[Thread] Cannot read {}: {}", member, e);
                    continue;
                }
            };
            thread.push(Entry {
                path: member,
                content,
                metadata: meta.clone(),
            });
        }
        Ok(thread)
    }

    /// For each path, its thread as plain text with members separated by a blank line.
    pub fn get_threads_as_text(&self, paths: &[String]) -> Vec<ThreadText> {
        paths
            .iter()
            .filter_map(|path| match self.get_thread(path) {
                Ok(thread) => Some(ThreadText {
                    path: path.clone(),
                    text: thread_to_text(&thread),
                }),
                Err(e) => {
                    log::warn!("[Thread] Skipping {}: {}", path, e);
                    None
                }
            })
            .collect()
    }
}

pub fn thread_to_text(thread: &[Entry]) -> String {
    thread
        .iter()
        .map(|entry| html_to_text(&entry.content))
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn find_root(snapshot: &Arc<IndexMap>, path: &str) -> String {
    let mut current = path.to_string();
    let mut seen = HashSet::new();
    seen.insert(current.clone());

    while let Some(parent) = snapshot.parent_of(&current) {
        if !snapshot.contains(parent) || !seen.insert(parent.to_string()) {
            break;
        }
        current = parent.to_string();
    }
    current
}

fn collect_preorder(
    snapshot: &IndexMap,
    path: &str,
    visited: &mut HashSet<String>,
    out: &mut Vec<String>,
) {
    if !visited.insert(path.to_string()) {
        return;
    }
    let Some(meta) = snapshot.get(path) else {
        return;
    };
    out.push(path.to_string());
    for child in &meta.replies {
        collect_preorder(snapshot, child, visited, out);
    }
}
