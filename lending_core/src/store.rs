//! Durable snapshot persistence with file locking.
//!
//! The whole dataset is written as one JSON document on every mutation.
//! Writes go to a temp file in the same directory which is synced and
//! renamed over the snapshot, so readers see either the old or the new
//! image. A sibling `.lock` file held for the lifetime of the store keeps a
//! second process from writing the same snapshot.

use crate::state::SnapshotDocument;
use crate::{Config, Error, Result, StoreState};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Persistence seam used by the `Library` coordinator
pub trait SnapshotStore: Send + Sync {
    /// Reconstruct the full state, or an empty state if nothing was saved yet
    fn load(&self) -> Result<StoreState>;

    /// Replace the durable image with `state`
    fn snapshot(&self, state: &StoreState) -> Result<()>;
}

/// How a store is opened
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    /// Shared lock; `snapshot` is refused
    ReadOnly,
    /// Exclusive lock; one writer per snapshot file
    ReadWrite,
}

/// JSON snapshot file guarded by an advisory lock
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock_file: File,
    mode: AccessMode,
    pretty: bool,
}

impl JsonFileStore {
    /// Open the store at `path`, waiting up to `lock_timeout` for the lock
    pub fn open(path: impl Into<PathBuf>, mode: AccessMode, lock_timeout: Duration) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let lock_path = lock_path_for(&path)?;
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;
        acquire_lock(&lock_file, &lock_path, mode, lock_timeout)?;

        tracing::debug!("Opened snapshot store {:?} ({:?})", path, mode);
        Ok(Self {
            path,
            lock_file,
            mode,
            pretty: false,
        })
    }

    /// Open the snapshot file named by the configuration
    pub fn from_config(config: &Config, mode: AccessMode) -> Result<Self> {
        Ok(Self::open(config.snapshot_path(), mode, config.storage.lock_timeout())?
            .with_pretty(config.storage.pretty))
    }

    /// Write indented JSON instead of compact JSON
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Result<StoreState> {
        if !self.path.exists() {
            tracing::info!("No snapshot at {:?}, starting with an empty library", self.path);
            return Ok(StoreState::default());
        }

        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            tracing::error!("Failed to read snapshot {:?}: {}", self.path, e);
            Error::Io(e)
        })?;

        let state = StoreState::from_json(&contents).map_err(|e| {
            tracing::error!("Refusing to start from snapshot {:?}: {}", self.path, e);
            e
        })?;

        tracing::debug!(
            "Loaded {} books and {} loans from {:?}",
            state.catalog().len(),
            state.ledger().len(),
            self.path
        );
        Ok(state)
    }

    // Only the lock wait in `open` is bounded; the write and rename run to completion.
    fn snapshot(&self, state: &StoreState) -> Result<()> {
        if self.mode == AccessMode::ReadOnly {
            return Err(Error::Storage(format!(
                "snapshot store {:?} is open read-only",
                self.path
            )));
        }

        // Create unique temp file in the same directory for atomic rename
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let temp = NamedTempFile::new_in(dir)?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = state.to_json(self.pretty)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;

        // Atomically replace old snapshot
        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved snapshot to {:?}", self.path);
        Ok(())
    }
}

impl Drop for JsonFileStore {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.lock_file);
    }
}

fn lock_path_for(path: &Path) -> Result<PathBuf> {
    let mut name = path
        .file_name()
        .ok_or_else(|| Error::Storage(format!("snapshot path {:?} has no file name", path)))?
        .to_os_string();
    name.push(".lock");
    Ok(path.with_file_name(name))
}

fn acquire_lock(file: &File, path: &Path, mode: AccessMode, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let attempt = match mode {
            AccessMode::ReadWrite => FileExt::try_lock_exclusive(file),
            AccessMode::ReadOnly => FileExt::try_lock_shared(file),
        };
        match attempt {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                if Instant::now() >= deadline {
                    return Err(Error::Storage(format!(
                        "timed out after {:?} waiting for lock {:?}",
                        timeout, path
                    )));
                }
                std::thread::sleep(LOCK_RETRY_INTERVAL);
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
}

/// Snapshot store kept in process memory
///
/// Useful for embedding and tests; `fail_writes` makes every following
/// `snapshot` call fail so rollback paths can be exercised.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Option<SnapshotDocument>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that loads `state` as if it had been snapshotted earlier
    pub fn with_state(state: &StoreState) -> Self {
        Self {
            saved: Mutex::new(Some(state.to_document())),
            ..Self::default()
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful snapshots
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Last saved document, if any
    pub fn saved(&self) -> Option<SnapshotDocument> {
        self.saved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<StoreState> {
        match self.saved() {
            Some(doc) => StoreState::from_document(doc),
            None => Ok(StoreState::default()),
        }
    }

    fn snapshot(&self, state: &StoreState) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected snapshot failure",
            )));
        }
        *self
            .saved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(state.to_document());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NewBook;
    use chrono::Utc;

    fn state_with_book() -> StoreState {
        let mut state = StoreState::default();
        state
            .catalog
            .create(
                NewBook {
                    title: "Beloved".into(),
                    author: "Toni Morrison".into(),
                    category: None,
                    copies_total: Some(2),
                },
                Utc::now(),
            )
            .unwrap();
        state
    }

    fn open_rw(path: &Path) -> JsonFileStore {
        JsonFileStore::open(path, AccessMode::ReadWrite, Duration::from_millis(100)).unwrap()
    }

    #[test]
    fn test_snapshot_and_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("library.json");

        {
            let store = open_rw(&path);
            assert_eq!(store.path(), path.as_path());
            store.snapshot(&state_with_book()).unwrap();
        }

        let store = open_rw(&path);
        let loaded = store.load().unwrap();
        assert_eq!(loaded.catalog().len(), 1);
        assert_eq!(loaded.catalog().get(1).unwrap().title, "Beloved");
    }

    #[test]
    fn test_load_nonexistent_returns_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = open_rw(&temp_dir.path().join("nested/dir/library.json"));

        let state = store.load().unwrap();
        assert!(state.catalog().is_empty());
        assert!(state.ledger().is_empty());
    }

    #[test]
    fn test_corrupted_snapshot_fails_fast() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("library.json");
        std::fs::write(&path, "{ invalid json }").unwrap();

        let store = open_rw(&path);
        let err = store.load().unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
        // the bad file is left for inspection
        assert!(path.exists());
    }

    #[test]
    fn test_atomic_save_leaves_no_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("library.json");

        let store = open_rw(&path);
        store.snapshot(&state_with_book()).unwrap();
        store.snapshot(&StoreState::default()).unwrap();

        let extras: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "library.json" && e.file_name() != "library.json.lock")
            .collect();
        assert!(
            extras.is_empty(),
            "Expected only the snapshot and its lock, found extras: {:?}",
            extras
        );
        assert!(store.load().unwrap().catalog().is_empty());
    }

    #[test]
    fn test_second_writer_times_out() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("library.json");

        let _owner = open_rw(&path);
        let err = JsonFileStore::open(&path, AccessMode::ReadWrite, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));

        let err = JsonFileStore::open(&path, AccessMode::ReadOnly, Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("library.json");

        drop(open_rw(&path));
        assert!(JsonFileStore::open(&path, AccessMode::ReadWrite, Duration::ZERO).is_ok());
    }

    #[test]
    fn test_readers_share_and_cannot_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("library.json");

        let a = JsonFileStore::open(&path, AccessMode::ReadOnly, Duration::ZERO).unwrap();
        let b = JsonFileStore::open(&path, AccessMode::ReadOnly, Duration::ZERO).unwrap();
        assert_eq!(b.mode(), AccessMode::ReadOnly);

        let err = a.snapshot(&StoreState::default()).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_pretty_snapshot() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("library.json");

        let store = open_rw(&path).with_pretty(true);
        store.snapshot(&state_with_book()).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\n  \"format_version\": 1"));
    }

    #[test]
    fn test_memory_store_failure_injection() {
        let store = MemoryStore::new();
        store.snapshot(&state_with_book()).unwrap();
        assert_eq!(store.writes(), 1);

        store.fail_writes(true);
        assert!(store.snapshot(&StoreState::default()).is_err());
        assert_eq!(store.writes(), 1);
        assert_eq!(store.load().unwrap().catalog().len(), 1);
    }
}
