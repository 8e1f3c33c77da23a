//! Named exclusive access to shared files
//!
//! Every file more than one session writes (the cookie file, the session
//! log) goes through one [`SharedFileGuard`]. The guard keeps one lock per
//! resource id; distinct resources never block each other.
//!
//! The guard is non-reentrant. A thread that asks again for a resource it
//! already holds gets [`GuardError::Reentrant`] instead of a deadlock.
//! Closures run synchronously, so a held lock never spans an `.await`.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Guarded access failures
#[derive(Error, Debug)]
pub enum GuardError {
    /// The calling thread already holds this resource
    #[error("Re-entrant access to shared resource '{0}'")]
    Reentrant(String),

    /// The guarded operation failed; the lock was released
    #[error("Shared write to '{resource}' failed: {source}")]
    SharedWriteFailure {
        resource: String,
        #[source]
        source: io::Error,
    },
}

static NEXT_GUARD_ID: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// (guard id, resource id) pairs held by this thread
    static HELD: RefCell<HashSet<(u64, String)>> = RefCell::new(HashSet::new());
}

/// Removes the held marker on every exit path, unwinding included
struct HeldMarker {
    key: (u64, String),
}

impl Drop for HeldMarker {
    fn drop(&mut self) {
        HELD.with(|held| {
            held.borrow_mut().remove(&self.key);
        });
    }
}

/// Serializes access to shared files. Share as `Arc<SharedFileGuard>`.
#[derive(Debug)]
pub struct SharedFileGuard {
    id: u64,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Default for SharedFileGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedFileGuard {
    pub fn new() -> Self {
        Self {
            id: NEXT_GUARD_ID.fetch_add(1, Ordering::Relaxed),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, resource_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(resource_id.to_string()).or_default())
    }

    /// Run `f` while holding the named lock
    ///
    /// The lock is released when `f` returns, fails or panics. A panic
    /// inside `f` propagates to the caller after release.
    pub fn with_exclusive_access<T, F>(&self, resource_id: &str, f: F) -> Result<T, GuardError>
    where
        F: FnOnce() -> io::Result<T>,
    {
        let key = (self.id, resource_id.to_string());
        let newly_held = HELD.with(|held| held.borrow_mut().insert(key.clone()));
        if !newly_held {
            return Err(GuardError::Reentrant(resource_id.to_string()));
        }
        let _marker = HeldMarker { key };

        let lock = self.lock_for(resource_id);
        // A panic in an earlier holder poisons the mutex; the data is `()`,
        // so there is nothing to repair.
        let _held: MutexGuard<'_, ()> = lock.lock().unwrap_or_else(|p| p.into_inner());

        f().map_err(|source| {
            tracing::warn!(resource = resource_id, error = %source, "Guarded write failed");
            GuardError::SharedWriteFailure {
                resource: resource_id.to_string(),
                source,
            }
        })
    }

    /// Replace a file's contents atomically under the file's lock
    pub fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), GuardError> {
        self.with_exclusive_access(&resource_key(path), || write_atomic(path, contents))
    }

    /// Append one line (newline added) under the file's lock
    pub fn append_line(&self, path: &Path, line: &str) -> Result<(), GuardError> {
        self.with_exclusive_access(&resource_key(path), || append_line(path, line))
    }

    /// Read a file under its lock; `Ok(None)` if it does not exist
    pub fn read_file(&self, path: &Path) -> Result<Option<String>, GuardError> {
        self.with_exclusive_access(&resource_key(path), || match fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        })
    }
}

/// Resource id used for a file path
pub fn resource_key(path: &Path) -> String {
    path.display().to_string()
}

/// Write to a sibling temp file, then rename it over `path`
///
/// Readers see either the old or the new contents, never a partial write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let result = (|| {
        let mut file = File::create(&temp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

/// Append `line` plus a newline with a single write
pub fn append_line(path: &Path, line: &str) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut buf = String::with_capacity(line.len() + 1);
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reentry_is_detected() {
        let guard = SharedFileGuard::new();
        let result = guard.with_exclusive_access("cookies", || {
            let inner = guard.with_exclusive_access("cookies", || Ok(()));
            assert!(matches!(inner, Err(GuardError::Reentrant(ref r)) if r == "cookies"));
            Ok(7)
        });
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_distinct_resources_nest() {
        let guard = SharedFileGuard::new();
        let result = guard.with_exclusive_access("a", || {
            guard
                .with_exclusive_access("b", || Ok(1))
                .map_err(io::Error::other)
        });
        assert_eq!(result.unwrap(), 1);
    }

    #[test]
    fn test_failure_releases_lock() {
        let guard = SharedFileGuard::new();
        let err = guard
            .with_exclusive_access::<(), _>("log", || Err(io::Error::other("disk full")))
            .unwrap_err();
        assert!(matches!(err, GuardError::SharedWriteFailure { .. }));

        // Lock and held marker are both gone
        assert!(guard.with_exclusive_access("log", || Ok(())).is_ok());
    }

    #[test]
    fn test_panic_releases_lock() {
        let guard = Arc::new(SharedFileGuard::new());
        let g = Arc::clone(&guard);
        let joined = std::thread::spawn(move || {
            let _ = g.with_exclusive_access::<(), _>("r", || panic!("boom"));
        })
        .join();
        assert!(joined.is_err());

        assert!(guard.with_exclusive_access("r", || Ok(())).is_ok());
    }

    #[test]
    fn test_panic_clears_held_marker_on_same_thread() {
        let guard = SharedFileGuard::new();
        let caught = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = guard.with_exclusive_access::<(), _>("r", || panic!("boom"));
        }));
        assert!(caught.is_err());
        assert!(guard.with_exclusive_access("r", || Ok(())).is_ok());
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("cookies.json");

        let guard = SharedFileGuard::new();
        guard.write_file(&path, b"[1]").unwrap();
        guard.write_file(&path, b"[1,2]").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "[1,2]");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let guard = SharedFileGuard::new();
        assert!(guard.read_file(&dir.path().join("none")).unwrap().is_none());
    }
}
