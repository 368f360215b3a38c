//! Storage adapters -- the narrow I/O interface under the persistence
//! engine.
//!
//! Consumers depend on the [`StorageAdapter`] trait rather than on concrete
//! implementations so that tests can substitute an in-memory map for the
//! real filesystem.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;

use folio_core::error::Result;

/// Minimal file access used by the persistence engine.
///
/// `write` must be atomic at path granularity: a concurrent reader observes
/// either the previous or the new content, never a partial file.
pub trait StorageAdapter: Send + Sync {
    /// Reads the file at `path`; `None` when it does not exist.
    fn read(&self, path: &Path) -> Result<Option<String>>;

    /// Atomically replaces the file at `path` with `text`.
    fn write(&self, path: &Path, text: &str) -> Result<()>;

    /// Returns `true` when a file exists at `path`.
    fn exists(&self, path: &Path) -> Result<bool>;
}

// ---------------------------------------------------------------------------
// Filesystem adapter
// ---------------------------------------------------------------------------

/// Real-filesystem adapter. Writes go to `path + ".tmp"` followed by a
/// rename, which is the atomic-replace primitive on POSIX filesystems.
#[derive(Debug, Clone, Default)]
pub struct FsAdapter;

impl FsAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl StorageAdapter for FsAdapter {
    fn read(&self, path: &Path) -> Result<Option<String>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, path: &Path, text: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, text)?;
        fs::rename(&tmp, path)?;
        debug!(?path, bytes = text.len(), "wrote file");
        Ok(())
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(path.exists())
    }
}

// ---------------------------------------------------------------------------
// In-memory adapter
// ---------------------------------------------------------------------------

/// Map-backed adapter for tests. A single map swap gives the same
/// atomicity as the filesystem rename.
#[derive(Debug, Default)]
pub struct MemAdapter {
    files: Mutex<HashMap<PathBuf, String>>,
}

impl MemAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-seeds a file, for test setup.
    pub fn seed(&self, path: impl Into<PathBuf>, text: impl Into<String>) {
        self.files
            .lock()
            .expect("mem adapter lock poisoned")
            .insert(path.into(), text.into());
    }

    /// Snapshot of a file's current content, for test assertions.
    pub fn contents(&self, path: &Path) -> Option<String> {
        self.files
            .lock()
            .expect("mem adapter lock poisoned")
            .get(path)
            .cloned()
    }

    /// Number of stored files.
    pub fn file_count(&self) -> usize {
        self.files.lock().expect("mem adapter lock poisoned").len()
    }
}

impl StorageAdapter for MemAdapter {
    fn read(&self, path: &Path) -> Result<Option<String>> {
        Ok(self
            .files
            .lock()
            .expect("mem adapter lock poisoned")
            .get(path)
            .cloned())
    }

    fn write(&self, path: &Path, text: &str) -> Result<()> {
        self.files
            .lock()
            .expect("mem adapter lock poisoned")
            .insert(path.to_owned(), text.to_owned());
        Ok(())
    }

    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self
            .files
            .lock()
            .expect("mem adapter lock poisoned")
            .contains_key(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_adapter_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("books.json");
        let adapter = FsAdapter::new();

        assert!(!adapter.exists(&path).unwrap());
        assert_eq!(adapter.read(&path).unwrap(), None);

        adapter.write(&path, "{\"a\":1}").unwrap();
        assert!(adapter.exists(&path).unwrap());
        assert_eq!(adapter.read(&path).unwrap().as_deref(), Some("{\"a\":1}"));
    }

    #[test]
    fn fs_adapter_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deep/books.json");
        FsAdapter::new().write(&path, "x").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn fs_adapter_leaves_no_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("books.json");
        FsAdapter::new().write(&path, "x").unwrap();
        assert!(!dir.path().join("books.json.tmp").exists());
    }

    #[test]
    fn mem_adapter_round_trip() {
        let adapter = MemAdapter::new();
        let path = Path::new("books.json");

        assert_eq!(adapter.read(path).unwrap(), None);
        adapter.write(path, "content").unwrap();
        assert!(adapter.exists(path).unwrap());
        assert_eq!(adapter.read(path).unwrap().as_deref(), Some("content"));
        assert_eq!(adapter.file_count(), 1);
    }

    #[test]
    fn mem_adapter_overwrites() {
        let adapter = MemAdapter::new();
        let path = Path::new("a.json");
        adapter.write(path, "one").unwrap();
        adapter.write(path, "two").unwrap();
        assert_eq!(adapter.contents(path).as_deref(), Some("two"));
    }
}
