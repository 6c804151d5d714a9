//! Locking and atomic writes
//!
//! Two layers of mutual exclusion:
//! - [`ContentLocks`]: in-process, one lock per content id, bounded wait
//! - [`FileLock`]: cross-process flock (fs2) used by the CLI around a store
//!
//! Plus the temp-file + rename write used by the filesystem store.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use fs2::FileExt;

use crate::error::{Error, Result};

/// Default lock timeout in milliseconds
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

/// Default retry interval when waiting for a file lock
const LOCK_RETRY_INTERVAL_MS: u64 = 50;

fn is_lock_contended(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::WouldBlock {
        return true;
    }

    // On Windows, fs2/libc can surface lock/sharing violations as "Other".
    #[cfg(windows)]
    {
        matches!(err.raw_os_error(), Some(32) | Some(33))
    }
    #[cfg(not(windows))]
    {
        false
    }
}

// =============================================================================
// In-process content locks
// =============================================================================

#[derive(Default)]
struct Slot {
    held: Mutex<bool>,
    released: Condvar,
}

impl Slot {
    fn state(&self) -> MutexGuard<'_, bool> {
        // The flag is a plain bool; a poisoned guard still holds a valid value.
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

type SlotMap = Arc<Mutex<HashMap<String, Arc<Slot>>>>;

fn lock_slots(slots: &SlotMap) -> MutexGuard<'_, HashMap<String, Arc<Slot>>> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Per-content-id mutual exclusion for mutating operations.
///
/// Different content ids never contend. Acquisition waits at most the
/// configured timeout and then fails with [`Error::Concurrency`]; it is
/// never retried internally. A content id only has an entry while its lock
/// is held or waited on.
pub struct ContentLocks {
    slots: SlotMap,
    timeout: Duration,
}

impl ContentLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire the lock for `content_id`, waiting up to the configured timeout.
    pub fn acquire(&self, content_id: &str) -> Result<ContentGuard> {
        self.acquire_with_timeout(content_id, self.timeout)
    }

    pub fn acquire_with_timeout(&self, content_id: &str, timeout: Duration) -> Result<ContentGuard> {
        let slot = Arc::clone(lock_slots(&self.slots).entry(content_id.to_string()).or_default());

        let deadline = Instant::now() + timeout;
        let mut held = slot.state();
        while *held {
            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(content_id, "content lock wait timed out");
                return Err(Error::Concurrency {
                    resource: content_id.to_string(),
                });
            }
            let (guard, _) = slot
                .released
                .wait_timeout(held, deadline - now)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            held = guard;
        }
        *held = true;
        drop(held);

        Ok(ContentGuard {
            slots: Arc::clone(&self.slots),
            slot,
            content_id: content_id.to_string(),
        })
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        lock_slots(&self.slots).len()
    }
}

impl Default for ContentLocks {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS))
    }
}

/// Held content lock; released on drop.
pub struct ContentGuard {
    slots: SlotMap,
    slot: Arc<Slot>,
    content_id: String,
}

impl ContentGuard {
    pub fn content_id(&self) -> &str {
        &self.content_id
    }
}

impl Drop for ContentGuard {
    fn drop(&mut self) {
        // New waiters clone the slot under the map lock, so the count is stable here.
        let mut slots = lock_slots(&self.slots);
        *self.slot.state() = false;
        if Arc::strong_count(&self.slot) == 2 {
            slots.remove(&self.content_id);
        } else {
            self.slot.released.notify_one();
        }
    }
}

// =============================================================================
// Cross-process file locks
// =============================================================================

/// A file lock guard that releases the lock when dropped
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Acquire an exclusive lock on a file with timeout
    ///
    /// If the file doesn't exist, it will be created.
    /// Returns [`Error::Concurrency`] if the lock cannot be acquired in time.
    pub fn acquire(path: impl AsRef<Path>, timeout_ms: u64) -> Result<Self> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;

        let start = Instant::now();
        let timeout = Duration::from_millis(timeout_ms);
        let retry_interval = Duration::from_millis(LOCK_RETRY_INTERVAL_MS);

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(FileLock {
                        file,
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if is_lock_contended(&e) => {
                    if start.elapsed() >= timeout {
                        return Err(Error::Concurrency {
                            resource: path.display().to_string(),
                        });
                    }
                    std::thread::sleep(retry_interval);
                }
                Err(e) => {
                    return Err(Error::Io(e));
                }
            }
        }
    }

    /// Try to acquire a lock without waiting
    ///
    /// Returns `Ok(Some(lock))` if acquired, `Ok(None)` if would block.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let file = open_lock_file(path)?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(FileLock {
                file,
                path: path.to_path_buf(),
            })),
            Err(e) if is_lock_contended(&e) => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Get the path to the locked file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?)
}

/// Atomically write data to a file
///
/// Writes to a uniquely named temporary file in the same directory, then
/// renames it over the target. Readers see either the old or the new
/// contents, never a partial write.
pub fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| Error::Io(err.error))?;

    Ok(())
}
