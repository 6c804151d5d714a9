//! Raw key/value storage
//!
//! The versioning core only needs a key→bytes contract from its durable
//! store: `put`, `get`, `list` by prefix, and `delete` for metadata
//! removal. Two implementations ship with the crate:
//!
//! - [`MemoryStore`]: a `BTreeMap` behind a `RwLock`, for tests and embedding
//! - [`FsStore`]: one file per key under a root directory
//!
//! # Directory Structure
//!
//! ```text
//! <root>/
//!   revkeep.toml                  # Optional configuration
//!   actor                         # Persisted CLI actor
//!   locks/<content_id>.lock       # Cross-process locks (CLI)
//!   data/<key...>                 # One file per key, '/' maps to directories
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::error::{Error, Result};
use crate::lock;

/// Name of the data directory within an [`FsStore`] root
pub const DATA_DIR: &str = "data";

/// Name of the lock directory within an [`FsStore`] root
pub const LOCKS_DIR: &str = "locks";

/// Key→bytes contract supplied by the durable store.
///
/// Implementations must make `put` atomic per key: a reader sees either the
/// previous value or the new one. Failures surface as [`Error::Storage`] (or
/// [`Error::Io`]) and are never retried by the caller.
pub trait KvStore: Send + Sync {
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// All keys starting with `prefix`, sorted ascending.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove a key. Returns `true` if it existed.
    fn delete(&self, key: &str) -> Result<bool>;

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

// =============================================================================
// MemoryStore
// =============================================================================

/// In-memory [`KvStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .read()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .write()
            .map_err(|_| Error::Storage("memory store lock poisoned".to_string()))
    }
}

impl KvStore for MemoryStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.write()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read()?.get(key).cloned())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.write()?.remove(key).is_some())
    }
}

// =============================================================================
// FsStore
// =============================================================================

/// Filesystem-backed [`KvStore`]: one file per key.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(DATA_DIR))?;
        Ok(Self { root })
    }

    /// Check if a store has been initialized at `root`
    pub fn exists(root: &Path) -> bool {
        root.join(DATA_DIR).is_dir()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root.join(DATA_DIR)
    }

    /// Path of the cross-process lock file for a content id
    pub fn lock_file(&self, content_id: &str) -> PathBuf {
        self.root.join(LOCKS_DIR).join(format!("{content_id}.lock"))
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        let mut path = self.data_dir();
        for segment in key.split('/') {
            validate_segment(key, segment)?;
            path.push(segment);
        }
        Ok(path)
    }

    fn collect_keys(&self, dir: &Path, prefix: &str, keys: &mut Vec<String>) -> Result<()> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(storage_error("list", dir, err)),
        };

        for entry in entries {
            let entry = entry.map_err(|err| storage_error("list", dir, err))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            // Temp files from in-flight atomic writes.
            if name.starts_with('.') {
                continue;
            }
            let key = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}/{name}")
            };
            let file_type = entry
                .file_type()
                .map_err(|err| storage_error("list", dir, err))?;
            if file_type.is_dir() {
                self.collect_keys(&entry.path(), &key, keys)?;
            } else {
                keys.push(key);
            }
        }

        Ok(())
    }
}

impl KvStore for FsStore {
    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.key_path(key)?;
        lock::write_atomic(&path, value).map_err(|err| match err {
            Error::Io(io) => storage_error("put", &path, io),
            other => other,
        })
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.key_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(storage_error("get", &path, err)),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // Walk only the deepest directory fully named by the prefix.
        let dir_prefix = match prefix.rfind('/') {
            Some(pos) => &prefix[..pos],
            None => "",
        };
        let mut dir = self.data_dir();
        if !dir_prefix.is_empty() {
            for segment in dir_prefix.split('/') {
                validate_segment(prefix, segment)?;
                dir.push(segment);
            }
        }

        let mut keys = Vec::new();
        self.collect_keys(&dir, dir_prefix, &mut keys)?;
        keys.retain(|key| key.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(storage_error("delete", &path, err)),
        }
    }
}

fn validate_segment(key: &str, segment: &str) -> Result<()> {
    if segment.is_empty()
        || segment.starts_with('.')
        || segment.contains('\\')
        || segment.contains('\0')
    {
        return Err(Error::Storage(format!("invalid storage key '{key}'")));
    }
    Ok(())
}

fn storage_error(op: &str, path: &Path, err: io::Error) -> Error {
    Error::Storage(format!("{op} {}: {err}", path.display()))
}
