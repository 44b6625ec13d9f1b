use chrono::{Local, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::ai::{
    prepare_completion_context, AiClient, ChatMessage, CompletionService, CompletionStream,
    EmbeddingService, ModelCatalog,
};
use crate::cancel::CancelFlag;
use crate::config::PileSettings;
use crate::embedding::{EmbeddingRegenerator, RegenerationReport};
use crate::entry::text::new_entry_path;
use crate::entry::types::{Entry, EntryMetadata, EntryPatch};
use crate::entry::EntryParser;
use crate::error::{PileError, Result};
use crate::index::watcher::PileWatcher;
use crate::index::{IndexStore, LoadReport};
use crate::preview::extract_links;
use crate::store::{EntryStore, FsStore};
use crate::thread::{ThreadResolver, ThreadText};
use crate::vector::VectorMatch;

/// Folder for files attached to entries, relative to the pile root.
pub const ATTACHMENTS_DIR: &str = "_attachments";

/// Highlight colours in cycling order. The first one is the "no colour" border.
pub const HIGHLIGHT_COLORS: [&str; 3] = ["var(--border)", "var(--base-yellow)", "var(--base-green)"];

pub const DEFAULT_THREAD_COUNT: usize = 25;

/// User-supplied part of a new entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryDraft {
    pub content: String,
    pub title: String,
    pub tags: Vec<String>,
    pub attachments: Vec<String>,
    pub highlight: Option<String>,
    pub is_ai: bool,
}

impl EntryDraft {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_ai: true,
            ..Default::default()
        }
    }
}

/// One open journal: its store, index, settings and optional watcher.
pub struct Pile {
    root: PathBuf,
    index: Arc<IndexStore<FsStore>>,
    settings: RwLock<PileSettings>,
    catalog: ModelCatalog,
    load_report: LoadReport,
    watcher: Mutex<Option<PileWatcher>>,
}

impl Pile {
    /// Open (creating if needed) the pile at `root` and load its index.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if root.exists() && !root.is_dir() {
            return Err(PileError::InvalidPath(root.to_string_lossy().to_string()));
        }
        std::fs::create_dir_all(&root)?;

        let store = Arc::new(FsStore::new(&root));
        let settings = match PileSettings::load(&*store) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("[Pile] Using default settings: {}", e);
                PileSettings::default()
            }
        };

        let index = Arc::new(IndexStore::new(store));
        let load_report = index.load();
        log::info!("[Pile] Opened {} ({} entries)", root.display(), load_report.loaded);

        Ok(Self {
            root,
            index,
            settings: RwLock::new(settings),
            catalog: ModelCatalog::default(),
            load_report,
            watcher: Mutex::new(None),
        })
    }

    /// Stop watching and release the pile.
    pub fn close(self) {
        self.stop_watcher();
        log::info!("[Pile] Closed {}", self.root.display());
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &Arc<IndexStore<FsStore>> {
        &self.index
    }

    pub fn store(&self) -> &FsStore {
        self.index.store()
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    pub fn settings(&self) -> PileSettings {
        self.settings.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn update_settings(&self, settings: PileSettings) -> Result<()> {
        settings.save(self.store())?;
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = settings;
        Ok(())
    }

    /// Reload every entry from disk.
    pub fn reload(&self) -> LoadReport {
        self.index.load()
    }

    pub fn start_watcher(&self) -> Result<()> {
        let mut watcher = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if watcher.is_none() {
            *watcher = Some(PileWatcher::start(Arc::clone(&self.index))?);
        }
        Ok(())
    }

    pub fn stop_watcher(&self) {
        let mut watcher = self.watcher.lock().unwrap_or_else(|e| e.into_inner());
        if watcher.take().is_some() {
            log::info!("[Pile] Watcher stopped");
        }
    }

    /// Full entry: body from disk, metadata from the index.
    pub fn entry(&self, path: &str) -> Result<Entry> {
        let metadata = self
            .index
            .get(path)
            .ok_or_else(|| PileError::NotFound(path.to_string()))?;
        let raw = self.store().read_file(path)?;
        let parsed = EntryParser::parse(path, &raw)?;
        Ok(Entry {
            path: path.to_string(),
            content: parsed.content,
            metadata,
        })
    }

    /// Write a new top-level entry and index it.
    pub fn create_entry(&self, draft: EntryDraft) -> Result<String> {
        let (path, metadata) = self.write_new_entry(&draft, false)?;
        self.index.prepend(&path, metadata);
        if let Err(e) = self.index.add(&path, None) {
            self.abandon_new_entry(&path);
            return Err(e);
        }
        Ok(path)
    }

    /// Write a reply to `parent` and link it into the parent's replies.
    pub fn create_reply(&self, parent: &str, draft: EntryDraft) -> Result<String> {
        if !self.index.contains(parent) {
            return Err(PileError::NotFound(parent.to_string()));
        }
        let (path, _) = self.write_new_entry(&draft, true)?;
        if let Err(e) = self.index.add(&path, Some(parent)) {
            self.abandon_new_entry(&path);
            return Err(e);
        }
        Ok(path)
    }

    // Undo a freshly written entry whose indexing failed
    fn abandon_new_entry(&self, path: &str) {
        self.index.retract(path);
        if let Err(e) = self.store().delete_file(path) {
            log::warn!("[Pile] Could not remove unindexed entry {}: {}", path, e);
        }
    }

    fn write_new_entry(&self, draft: &EntryDraft, is_reply: bool) -> Result<(String, EntryMetadata)> {
        let now = Local::now();
        let store = self.store();
        let index = self.index.snapshot();
        let path = new_entry_path(now, |candidate| index.contains(candidate) || store.exists(candidate));

        let mut metadata = EntryMetadata::new(now.with_timezone(&Utc));
        metadata.title = draft.title.clone();
        metadata.tags = draft.tags.clone();
        metadata.attachments = draft.attachments.clone();
        metadata.highlight = draft.highlight.clone();
        metadata.is_ai = draft.is_ai;
        metadata.is_reply = is_reply;
        metadata.normalize();

        store.write_file(&path, &EntryParser::serialize(&metadata, &draft.content)?)?;
        log::debug!("[Pile] Wrote {}", path);
        Ok((path, metadata))
    }

    /// Replace the body of an existing entry, refreshing `updatedAt`.
    pub fn save_entry(&self, path: &str, content: &str) -> Result<()> {
        self.index.save_content(path, content)?;
        Ok(())
    }

    /// Delete an entry. The file goes first; a reply is then spliced out of
    /// its parent. Deleting a root leaves its replies in place.
    pub fn delete_entry(&self, path: &str) -> Result<()> {
        match self.store().delete_file(path) {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                log::debug!("[Pile] {} was already gone from disk", path);
            }
            Err(e) => return Err(e),
        }

        if let Some(parent) = self.index.parent_of(path) {
            if self.index.contains(&parent) {
                if let Err(e) = self.index.detach_reply(&parent, path) {
                    // Parent keeps a dangling reference until its next rewrite
                    self.index.remove(path);
                    return Err(e);
                }
            }
        }

        self.index.remove(path);
        Ok(())
    }

    /// Entries carrying `tag`, in index order.
    pub fn entries_with_tag(&self, tag: &str) -> Vec<String> {
        self.index.snapshot().paths_with_tag(tag)
    }

    /// Tags in use across the pile, with entry counts.
    pub fn tags(&self) -> BTreeMap<String, usize> {
        self.index.snapshot().tag_counts()
    }

    pub fn add_tag(&self, path: &str, tag: &str) -> Result<()> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Ok(());
        }
        let mut metadata = self.metadata(path)?;
        if !metadata.add_tag(tag) {
            return Ok(());
        }
        self.patch(path, EntryPatch {
            tags: Some(metadata.tags),
            ..Default::default()
        })
    }

    pub fn remove_tag(&self, path: &str, tag: &str) -> Result<()> {
        let mut metadata = self.metadata(path)?;
        if !metadata.remove_tag(tag) {
            return Ok(());
        }
        self.patch(path, EntryPatch {
            tags: Some(metadata.tags),
            ..Default::default()
        })
    }

    pub fn set_highlight(&self, path: &str, highlight: Option<&str>) -> Result<()> {
        self.patch(path, EntryPatch {
            highlight: Some(highlight.map(str::to_string)),
            ..Default::default()
        })
    }

    /// Move the entry's highlight colour to the next one and return it.
    pub fn cycle_highlight_color(&self, path: &str) -> Result<String> {
        let metadata = self.metadata(path)?;
        let next = next_highlight_color(metadata.highlight_color.as_deref());
        self.patch(path, EntryPatch {
            highlight_color: Some(Some(next.to_string())),
            ..Default::default()
        })?;
        Ok(next.to_string())
    }

    /// Store `bytes` as a new attachment and list it first on the entry.
    pub fn attach(&self, path: &str, bytes: &[u8], extension: &str) -> Result<String> {
        let extension = extension.trim_start_matches('.').to_ascii_lowercase();
        if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(PileError::InvalidPath(format!("attachment extension '{}'", extension)));
        }
        let mut metadata = self.metadata(path)?;

        let store = self.store();
        let mut millis = Utc::now().timestamp_millis();
        let mut attachment = format!("{}/img_{}.{}", ATTACHMENTS_DIR, millis, extension);
        while store.exists(&attachment) {
            millis += 1;
            attachment = format!("{}/img_{}.{}", ATTACHMENTS_DIR, millis, extension);
        }
        store.write_bytes(&attachment, bytes)?;

        metadata.attachments.insert(0, attachment.clone());
        let patched = self.patch(path, EntryPatch {
            attachments: Some(metadata.attachments),
            ..Default::default()
        });
        if let Err(e) = patched {
            if let Err(cleanup) = store.delete_file(&attachment) {
                log::warn!("[Pile] Could not remove unused attachment {}: {}", attachment, cleanup);
            }
            return Err(e);
        }
        Ok(attachment)
    }

    /// Remove an attachment from the entry's list. The file itself is kept.
    pub fn detach(&self, path: &str, attachment: &str) -> Result<()> {
        let mut metadata = self.metadata(path)?;
        let before = metadata.attachments.len();
        metadata.attachments.retain(|a| a != attachment);
        if metadata.attachments.len() == before {
            return Ok(());
        }
        self.patch(path, EntryPatch {
            attachments: Some(metadata.attachments),
            ..Default::default()
        })
    }

    pub fn links(&self, path: &str) -> Result<Vec<String>> {
        Ok(extract_links(&self.entry(path)?.content))
    }

    pub fn thread(&self, path: &str) -> Result<Vec<Entry>> {
        ThreadResolver::new(&self.index).get_thread(path)
    }

    /// The newest `count` entries in index order, each as its thread's text.
    pub fn latest_threads(&self, count: usize) -> Vec<ThreadText> {
        let refs: Vec<String> = self
            .index
            .search("")
            .into_iter()
            .take(count)
            .map(|result| result.path)
            .collect();
        ThreadResolver::new(&self.index).get_threads_as_text(&refs)
    }

    /// Messages for a reflection on the thread containing `path`.
    pub fn completion_context(&self, path: &str) -> Result<Vec<ChatMessage>> {
        let thread = self.thread(path)?;
        let settings = self.settings();
        Ok(prepare_completion_context(&settings.prompt, &thread))
    }

    /// Client for the configured AI service.
    pub fn ai_client(&self, api_key: Option<&str>) -> Result<AiClient> {
        let provider = self.settings().provider(&self.catalog, api_key)?;
        AiClient::new(provider)
    }

    /// Stream a reflection on the thread containing `path`.
    pub fn reflect<C: CompletionService + ?Sized>(&self, path: &str, service: &C) -> Result<CompletionStream> {
        let messages = self.completion_context(path)?;
        let model = self.settings().resolved_model(&self.catalog);
        service.stream_complete(&model, &messages)
    }

    /// Save a finished AI reflection as a reply to `parent`.
    pub fn save_reflection(&self, parent: &str, text: &str) -> Result<String> {
        self.create_reply(parent, EntryDraft::ai(text))
    }

    pub fn embedding_regenerator<E: EmbeddingService>(&self, service: E) -> EmbeddingRegenerator<E> {
        EmbeddingRegenerator::new(service, self.settings().embedding_model)
    }

    pub fn regenerate_embeddings<E: EmbeddingService>(
        &self,
        regenerator: &EmbeddingRegenerator<E>,
        cancel: &CancelFlag,
    ) -> Result<RegenerationReport> {
        regenerator.run(&self.index, cancel)
    }

    /// Entries closest in meaning to `query`.
    pub fn semantic_search<E: EmbeddingService + ?Sized>(
        &self,
        service: &E,
        query: &str,
        top_n: usize,
    ) -> Result<Vec<VectorMatch>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = service.embed(&self.settings().embedding_model, query)?;
        Ok(self.index.vector_search(&vector, top_n))
    }

    fn metadata(&self, path: &str) -> Result<EntryMetadata> {
        self.index
            .get(path)
            .ok_or_else(|| PileError::NotFound(path.to_string()))
    }

    fn patch(&self, path: &str, patch: EntryPatch) -> Result<()> {
        self.index.update(path, &patch).map(|_| ())
    }
}

impl Drop for Pile {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

/// Colour after `current`. Entries without a colour start at the first real one.
pub fn next_highlight_color(current: Option<&str>) -> &'static str {
    match current.and_then(|c| HIGHLIGHT_COLORS.iter().position(|known| *known == c)) {
        Some(idx) => HIGHLIGHT_COLORS[(idx + 1) % HIGHLIGHT_COLORS.len()],
        None => HIGHLIGHT_COLORS[1],
    }
}
