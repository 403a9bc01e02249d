//! Durable document storage.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use log::{debug, info};

use crate::error::PersistenceError;
use crate::state::lock;

/// Key/value store for whole JSON documents.
pub trait StorageBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn write(&self, key: &str, contents: &str) -> Result<(), PersistenceError>;
    fn remove(&self, key: &str) -> Result<(), PersistenceError>;
}

/// Resolves the per-user data directory, falling back to the home directory
/// and finally the working directory.
pub fn default_data_dir() -> PathBuf {
    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("signologos");
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".signologos");
    }

    PathBuf::from("./data")
}

/// One `<key>.json` file per document under a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn in_default_location() -> Self {
        Self::new(default_data_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl StorageBackend for FileStorage {
    fn read(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.path_for(key);
        if !path.exists() {
            debug!("No stored document at {:?}", path);
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        debug!("Read {} bytes from {:?}", content.len(), path);
        Ok(Some(content))
    }

    fn write(&self, key: &str, contents: &str) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir)?;

        // Write beside the target and rename so a crash never leaves half a document.
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{}.json.tmp", key));
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &path)?;

        debug!("Saved {} bytes to {:?}", contents.len(), path);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(&path)?;
            info!("Removed stored document {:?}", path);
        }
        Ok(())
    }
}

/// Process-local storage, mostly for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(key: &str, contents: &str) -> Self {
        let storage = Self::default();
        lock(&storage.entries).insert(key.to_string(), contents.to_string());
        storage
    }

    /// Number of successful writes so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn document(&self, key: &str) -> Option<String> {
        lock(&self.entries).get(key).cloned()
    }
}

impl StorageBackend for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.document(key))
    }

    fn write(&self, key: &str, contents: &str) -> Result<(), PersistenceError> {
        lock(&self.entries).insert(key.to_string(), contents.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), PersistenceError> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_storage_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nested"));

        assert!(storage.read("doc").unwrap().is_none());
        storage.write("doc", r#"{"version":2}"#).unwrap();
        assert_eq!(storage.read("doc").unwrap().as_deref(), Some(r#"{"version":2}"#));
        assert!(storage.path_for("doc").exists());

        storage.remove("doc").unwrap();
        assert!(storage.read("doc").unwrap().is_none());
    }

    #[test]
    fn memory_storage_counts_writes() {
        let storage = MemoryStorage::new();
        storage.write("k", "a").unwrap();
        storage.write("k", "b").unwrap();
        assert_eq!(storage.writes(), 2);
        assert_eq!(storage.document("k").as_deref(), Some("b"));
    }
}
