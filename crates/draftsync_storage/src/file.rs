//! File-based storage medium for persistent storage.

use crate::error::{StorageError, StorageResult};
use crate::medium::StorageMedium;
use crate::memory::footprint_after_set;
use fs2::FileExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A file-based storage medium.
///
/// The whole key space is one JSON object file. Every mutation rewrites
/// the file through a temporary sibling and an atomic rename, so a crash
/// leaves either the old or the new key space on disk, never a torn one.
/// Data survives process restarts.
///
/// # Locking
///
/// The medium holds an advisory exclusive lock on `<path>.lock` for its
/// whole lifetime. A second `open` of the same path fails with
/// [`StorageError::Locked`] until the first medium is dropped.
///
/// # Example
///
/// ```no_run
/// use draftsync_storage::{FileMedium, StorageMedium};
/// use std::path::Path;
///
/// let medium = FileMedium::open(Path::new("drafts.json")).unwrap();
/// medium.set("draft:q1", "{\"total\":100}").unwrap();
/// ```
#[derive(Debug)]
pub struct FileMedium {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
    quota: Option<usize>,
    _lock_file: File,
}

impl FileMedium {
    /// Opens or creates a file medium at the given path.
    ///
    /// If the file exists its key space is loaded; a file that does not
    /// parse as a JSON object of strings is rejected.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if another
    /// process holds the lock.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path(path))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        let entries = match fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => BTreeMap::new(),
            Ok(text) => serde_json::from_str(&text)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries: RwLock::new(entries),
            quota: None,
            _lock_file: lock_file,
        })
    }

    /// Opens or creates a file medium, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the medium
    /// cannot be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Limits the medium to `quota` bytes (sum of key and value lengths).
    #[must_use]
    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `entries` to a temporary sibling, syncs it and renames it
    /// over the medium file.
    fn persist(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        let tmp_path = self.path.with_extension("tmp");
        let bytes = serde_json::to_vec(entries)?;

        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(&bytes)?;
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

impl StorageMedium for FileMedium {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = self.entries.write();

        if let Some(quota) = self.quota {
            let needed = footprint_after_set(&entries, key, value);
            if needed > quota {
                return Err(StorageError::QuotaExceeded { needed, quota });
            }
        }

        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.persist(&entries) {
            // Keep memory and disk in agreement.
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = self.entries.write();
        if let Some(old) = entries.remove(key) {
            if let Err(e) = self.persist(&entries) {
                entries.insert(key.to_string(), old);
                return Err(e);
            }
        }
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.read().keys().cloned().collect())
    }
}
