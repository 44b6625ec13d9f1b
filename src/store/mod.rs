use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{PileError, Result};

/// Suffix used for in-flight atomic writes; never indexed.
pub const TEMP_SUFFIX: &str = ".pile-tmp";

/// Extension of entry files.
pub const ENTRY_EXTENSION: &str = "md";

/// One item of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Primitive filesystem capability exposed by the host, relative to a pile root.
pub trait EntryStore: Send + Sync {
    fn read_file(&self, path: &str) -> Result<String>;
    fn write_file(&self, path: &str, contents: &str) -> Result<()>;
    fn write_bytes(&self, path: &str, contents: &[u8]) -> Result<()>;
    fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>>;
    fn delete_file(&self, path: &str) -> Result<()>;
    fn make_directory(&self, path: &str) -> Result<()>;

    fn exists(&self, path: &str) -> bool {
        self.read_file(path).is_ok()
    }

    /// All entry files below the root, as relative `/`-separated paths.
    fn list_entry_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        collect_entry_files(self, "", &mut files)?;
        files.sort();
        Ok(files)
    }
}

fn collect_entry_files<S: EntryStore + ?Sized>(
    store: &S,
    dir: &str,
    files: &mut Vec<String>,
) -> Result<()> {
    for item in store.list_directory(dir)? {
        if !is_indexable_name(&item.name) {
            continue;
        }
        let rel = join_relative(dir, &item.name);
        if item.is_dir {
            if let Err(e) = collect_entry_files(store, &rel, files) {
                log::warn!("[EntryStore] Skipping unreadable directory {}: {}", rel, e);
            }
        } else if is_entry_file_name(&item.name) {
            files.push(rel);
        }
    }
    Ok(())
}

/// Hidden names and `_`-prefixed folders (attachments, config) are not part of the journal.
pub fn is_indexable_name(name: &str) -> bool {
    !name.starts_with('.') && !name.starts_with('_') && !name.ends_with(TEMP_SUFFIX)
}

pub fn is_entry_file_name(name: &str) -> bool {
    Path::new(name)
        .extension()
        .map(|ext| ext == ENTRY_EXTENSION)
        .unwrap_or(false)
}

pub fn join_relative(dir: &str, name: &str) -> String {
    let dir = dir.trim_matches('/');
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Parent directory of a relative path (`""` for top-level files).
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Entry store backed by a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path below the root, rejecting anything that escapes it.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        let rel = Path::new(path.trim_start_matches('/'));
        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(PileError::InvalidPath(path.to_string())),
            }
        }
        Ok(self.root.join(rel))
    }

    /// Turn an absolute path back into a root-relative, `/`-separated key.
    pub fn relative_key(&self, absolute: &Path) -> Option<String> {
        let rel = absolute.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(name) => Some(name.to_string_lossy().to_string()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }
}

/// Atomic file write: write to a temp file in the same directory, then rename,
/// so watchers and sync clients never observe a truncated entry.
fn atomic_write_file(path: &Path, content: &[u8]) -> Result<()> {
    let file_name = path.file_name().unwrap_or_default().to_string_lossy();
    let temp_path = path.with_file_name(format!("{}{}", file_name, TEMP_SUFFIX));

    let mut file = fs::File::create(&temp_path)?;
    file.write_all(content)?;
    file.sync_all()?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}

fn map_not_found(e: std::io::Error, path: &str) -> PileError {
    if e.kind() == std::io::ErrorKind::NotFound {
        PileError::NotFound(path.to_string())
    } else {
        PileError::Io(e)
    }
}

impl EntryStore for FsStore {
    fn read_file(&self, path: &str) -> Result<String> {
        let full = self.resolve(path)?;
        fs::read_to_string(&full).map_err(|e| map_not_found(e, path))
    }

    fn write_file(&self, path: &str, contents: &str) -> Result<()> {
        self.write_bytes(path, contents.as_bytes())
    }

    fn write_bytes(&self, path: &str, contents: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        atomic_write_file(&full, contents)
    }

    fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
        let full = self.resolve(path)?;
        let mut items: Vec<DirEntry> = fs::read_dir(&full)
            .map_err(|e| map_not_found(e, path))?
            .flatten()
            .map(|entry| DirEntry {
                name: entry.file_name().to_string_lossy().to_string(),
                is_dir: entry.file_type().map(|t| t.is_dir()).unwrap_or(false),
            })
            .collect();
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    fn delete_file(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        fs::remove_file(&full).map_err(|e| map_not_found(e, path))
    }

    fn make_directory(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        fs::create_dir_all(&full)?;
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn list_entry_files(&self) -> Result<Vec<String>> {
        if !self.root.is_dir() {
            return Err(PileError::NotFound(self.root.to_string_lossy().to_string()));
        }

        let mut files: Vec<String> = WalkDir::new(&self.root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0 || is_indexable_name(&entry.file_name().to_string_lossy())
            })
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::warn!("[EntryStore] Walk error: {}", e);
                    None
                }
            })
            .filter(|entry| {
                entry.file_type().is_file()
                    && is_entry_file_name(&entry.file_name().to_string_lossy())
            })
            .filter_map(|entry| self.relative_key(entry.path()))
            .collect();
        files.sort();
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_read_roundtrip_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsStore::new(temp_dir.path());

        store.write_file("2024/Jan/240101-120000.md", "hello").unwrap();
        assert_eq!(store.read_file("2024/Jan/240101-120000.md").unwrap(), "hello");
        assert!(store.exists("2024/Jan/240101-120000.md"));

        // No temp file left behind
        let leftovers: Vec<_> = fs::read_dir(temp_dir.path().join("2024/Jan"))
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with(TEMP_SUFFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_rejects_paths_escaping_root() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsStore::new(temp_dir.path());

        assert!(matches!(store.read_file("../secret.md"), Err(PileError::InvalidPath(_))));
        assert!(matches!(store.write_file("a/../../x.md", "x"), Err(PileError::InvalidPath(_))));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsStore::new(temp_dir.path());

        let err = store.read_file("nope.md").unwrap_err();
        assert!(err.is_not_found());
        assert!(store.delete_file("nope.md").unwrap_err().is_not_found());
    }

    #[test]
    fn test_list_entry_files_skips_hidden_and_attachments() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsStore::new(temp_dir.path());

        store.write_file("2024/Jan/a.md", "a").unwrap();
        store.write_file("2024/Feb/b.md", "b").unwrap();
        store.write_file(".pile/settings.md", "x").unwrap();
        store.write_file("_attachments/notes.md", "x").unwrap();
        store.write_file("2024/Jan/image.png", "x").unwrap();

        let files = store.list_entry_files().unwrap();
        assert_eq!(files, vec!["2024/Feb/b.md".to_string(), "2024/Jan/a.md".to_string()]);
    }

    #[test]
    fn test_default_walk_matches_walkdir_walk() {
        struct Listing<'a>(&'a FsStore);
        impl EntryStore for Listing<'_> {
            fn read_file(&self, path: &str) -> Result<String> {
                self.0.read_file(path)
            }
            fn write_file(&self, path: &str, contents: &str) -> Result<()> {
                self.0.write_file(path, contents)
            }
            fn write_bytes(&self, path: &str, contents: &[u8]) -> Result<()> {
                self.0.write_bytes(path, contents)
            }
            fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>> {
                self.0.list_directory(path)
            }
            fn delete_file(&self, path: &str) -> Result<()> {
                self.0.delete_file(path)
            }
            fn make_directory(&self, path: &str) -> Result<()> {
                self.0.make_directory(path)
            }
        }

        let temp_dir = TempDir::new().unwrap();
        let store = FsStore::new(temp_dir.path());
        store.write_file("2023/Dec/x.md", "x").unwrap();
        store.write_file("2024/Jan/y.md", "y").unwrap();
        store.write_file("_attachments/z.md", "z").unwrap();

        let generic = Listing(&store).list_entry_files().unwrap();
        assert_eq!(generic, store.list_entry_files().unwrap());
    }

    #[test]
    fn test_relative_helpers() {
        assert_eq!(join_relative("", "a.md"), "a.md");
        assert_eq!(join_relative("2024/Jan/", "a.md"), "2024/Jan/a.md");
        assert_eq!(parent_dir("2024/Jan/a.md"), "2024/Jan");
        assert_eq!(parent_dir("a.md"), "");
    }
}
