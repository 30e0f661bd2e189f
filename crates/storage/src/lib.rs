//! Named-blob persistence for whole-state snapshots.
//!
//! Engine state is saved as a few independently versioned blobs; a blob
//! that fails to load is simply absent and the owner rebuilds from its
//! authoritative data. Backends: in-memory (tests) and a locked
//! directory of files.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt as _;
use obol_log::log_warn;

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Locked(PathBuf),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(err) => write!(f, "{err}"),
            StoreError::Locked(path) => {
                write!(f, "data directory {} is locked by another process", path.display())
            }
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

pub trait BlobStore: Send + Sync {
    /// Returns the stored blob, or `None` when absent or unreadable.
    fn load(&self, name: &str) -> Option<Vec<u8>>;
    fn store(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError>;
    fn remove(&self, name: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn load(&self, name: &str) -> Option<Vec<u8>> {
        self.blobs.lock().ok()?.get(name).cloned()
    }

    fn store(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        if let Ok(mut guard) = self.blobs.lock() {
            guard.insert(name.to_string(), bytes.to_vec());
        }
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StoreError> {
        if let Ok(mut guard) = self.blobs.lock() {
            guard.remove(name);
        }
        Ok(())
    }
}

/// One blob per file in a data directory held under an exclusive lock
/// for the store's lifetime. Writes go through a temporary file and a
/// rename, so a crash leaves either the old or the new blob.
pub struct FileBlobStore {
    dir: PathBuf,
    _lock: fs::File,
}

impl FileBlobStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        let lock_path = dir.join(".lock");
        let lock = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock.try_lock_exclusive()
            .map_err(|_| StoreError::Locked(dir.to_path_buf()))?;
        Ok(Self { dir: dir.to_path_buf(), _lock: lock })
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl BlobStore for FileBlobStore {
    fn load(&self, name: &str) -> Option<Vec<u8>> {
        match fs::read(self.blob_path(name)) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                log_warn!("failed to read blob {name}: {err}");
                None
            }
        }
    }

    fn store(&self, name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let final_path = self.blob_path(name);
        let tmp_path = self.blob_path(&format!("{name}.tmp"));
        {
            let mut tmp = fs::File::create(&tmp_path)?;
            tmp.write_all(bytes)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.blob_path(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryBlobStore::new();
        assert!(store.load("pool").is_none());
        store.store("pool", b"state").unwrap();
        assert_eq!(store.load("pool").unwrap(), b"state");
        store.remove("pool").unwrap();
        assert!(store.load("pool").is_none());
    }

    #[test]
    fn file_store_round_trip_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBlobStore::open(dir.path()).unwrap();
        assert!(store.load("cache").is_none());
        store.store("cache", b"v1").unwrap();
        store.store("cache", b"v2").unwrap();
        assert_eq!(store.load("cache").unwrap(), b"v2");
        store.remove("cache").unwrap();
        assert!(store.load("cache").is_none());
    }

    #[test]
    fn directory_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let _store = FileBlobStore::open(dir.path()).unwrap();
        let second = FileBlobStore::open(dir.path());
        assert!(matches!(second, Err(StoreError::Locked(_))));
    }
}
