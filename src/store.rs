//! # State Store
//!
//! Versioned JSON documents shared by batch runs and feedback ingestion.
//!
//! Every document is stored as an envelope `{ "version": n, "data": ... }`.
//! Writers commit with the version they loaded; a mismatch is reported as
//! [`StoreError::Conflict`] and the caller re-reads and re-applies its change
//! (see [`update`]). Version `0` means "document absent".
//!
//! [`FileStore`] persists under a root directory using write-to-temp + rename,
//! guarded by an in-process mutex and a `.lock` file so a CLI run and the
//! feedback server never interleave writes. Waiting for a lock sleeps the
//! calling thread, so async callers go through `spawn_blocking`.
//! [`MemoryStore`] backs tests.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Well-known document keys.
pub mod keys {
    pub const LEDGER: &str = "ledger";
    pub const PROFILE: &str = "profile";
    pub const RATINGS: &str = "ratings";
    pub const PROCESSED_EVENTS: &str = "processed_events";
    pub const FEEDBACK_HISTORY: &str = "feedback_history";
    /// History rows whose append failed, waiting to be re-appended.
    pub const HISTORY_BACKLOG: &str = "feedback_history_backlog";
    pub const INTERESTS: &str = "interests";

    pub fn archive(date: chrono::NaiveDate) -> String {
        format!("archive/{}", date.format("%Y-%m-%d"))
    }
}

const STALE_LOCK_AFTER: Duration = Duration::from_secs(30);
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_UPDATE_ATTEMPTS: u32 = 5;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error on '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt document '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("version conflict on '{key}': expected {expected}, found {found}")]
    Conflict {
        key: String,
        expected: u64,
        found: u64,
    },

    #[error("timed out waiting for lock on '{key}'")]
    LockTimeout { key: String },

    #[error("cannot encode document '{key}': {reason}")]
    Encode { key: String, reason: String },
}

/// A loaded document and the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned {
    pub version: u64,
    pub data: Value,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    version: u64,
    data: Value,
}

pub trait StateStore: Send + Sync {
    /// Returns `Ok(None)` when the document does not exist.
    fn load(&self, key: &str) -> Result<Option<Versioned>, StoreError>;

    /// Replaces the document if its current version equals `expected`.
    /// Returns the new version.
    fn commit(&self, key: &str, expected: u64, data: &Value) -> Result<u64, StoreError>;

    /// Deletes the document if its current version equals `expected`.
    /// Removing an absent document (`expected == 0`) is a no-op.
    fn remove(&self, key: &str, expected: u64) -> Result<(), StoreError>;

    /// Appends one JSON line to an append-only log.
    fn append_line(&self, key: &str, line: &Value) -> Result<(), StoreError>;

    /// Reads every parsable line of an append-only log.
    fn read_lines(&self, key: &str) -> Result<Vec<Value>, StoreError>;
}

// ----------------------------------------------------------------------------
// Typed helpers
// ----------------------------------------------------------------------------

/// Load a typed document, degrading to `T::default()` on a missing or corrupt
/// document. Returns the value and the version to commit against.
pub fn load_or_default<T>(store: &dyn StateStore, key: &str) -> (T, u64)
where
    T: DeserializeOwned + Default,
{
    match store.load(key) {
        Ok(None) => (T::default(), 0),
        Ok(Some(v)) => match serde_json::from_value::<T>(v.data) {
            Ok(t) => (t, v.version),
            Err(e) => {
                warn!(key, version = v.version, error = %e, "document has unexpected shape; using default");
                (T::default(), v.version)
            }
        },
        Err(StoreError::Corrupt { reason, .. }) => {
            warn!(key, reason = %reason, "corrupt document; using default");
            (T::default(), 0)
        }
        Err(e) => {
            warn!(key, error = %e, "failed to read document; using default");
            (T::default(), 0)
        }
    }
}

/// Serialize and commit a typed document.
pub fn commit_typed<T: Serialize>(
    store: &dyn StateStore,
    key: &str,
    expected: u64,
    value: &T,
) -> Result<u64, StoreError> {
    let data = serde_json::to_value(value).map_err(|e| StoreError::Encode {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    store.commit(key, expected, &data)
}

/// Read-modify-write with optimistic concurrency.
///
/// `f` mutates the freshly loaded document and returns `(changed, result)`.
/// Unchanged documents are not written. On [`StoreError::Conflict`] the
/// document is reloaded and `f` runs again, up to a bounded number of attempts.
pub fn update<T, R, F>(store: &dyn StateStore, key: &str, mut f: F) -> Result<R, StoreError>
where
    T: DeserializeOwned + Serialize + Default,
    F: FnMut(&mut T) -> (bool, R),
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let (mut doc, version) = load_or_default::<T>(store, key);
        let (changed, out) = f(&mut doc);
        if !changed {
            return Ok(out);
        }
        match commit_typed(store, key, version, &doc) {
            Ok(_) => return Ok(out),
            Err(StoreError::Conflict { expected, found, .. })
                if attempt < DEFAULT_UPDATE_ATTEMPTS =>
            {
                warn!(key, attempt, expected, found, "version conflict; re-applying update");
            }
            Err(e) => return Err(e),
        }
    }
}

/// Parse a typed log, skipping lines that do not match `T`.
pub fn read_typed_lines<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> Result<Vec<T>, StoreError> {
    Ok(store
        .read_lines(key)?
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect())
}

// ----------------------------------------------------------------------------
// FileStore
// ----------------------------------------------------------------------------

pub struct FileStore {
    root: PathBuf,
    guard: Mutex<()>,
    lock_timeout: Duration,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            guard: Mutex::new(()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a versioned document (`<root>/<key>.json`).
    pub fn document_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    /// Path of an append-only log (`<root>/<key>.jsonl`).
    pub fn log_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.jsonl"))
    }

    fn io_err(key: &str, source: std::io::Error) -> StoreError {
        StoreError::Io {
            key: key.to_string(),
            source,
        }
    }

    fn read_envelope(&self, key: &str) -> Result<Option<Envelope>, StoreError> {
        let path = self.document_path(key);
        let raw = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_err(key, e)),
        };
        serde_json::from_str::<Envelope>(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    fn acquire(&self, key: &str, path: &Path) -> Result<LockFile, StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Self::io_err(key, e))?;
        }
        let lock_path = path.with_extension("lock");
        let started = Instant::now();
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(_) => return Ok(LockFile { path: lock_path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if lock_is_stale(&lock_path) {
                        break_stale_lock(key, &lock_path);
                        continue;
                    }
                    if started.elapsed() >= self.lock_timeout {
                        return Err(StoreError::LockTimeout {
                            key: key.to_string(),
                        });
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => return Err(Self::io_err(key, e)),
            }
        }
    }
}

struct LockFile {
    path: PathBuf,
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Take over an abandoned lock. The rename is atomic, so when several
/// contenders see the same stale file only one of them removes it.
fn break_stale_lock(key: &str, lock_path: &Path) {
    let claimed = lock_path.with_extension(format!("lock.{}.stale", std::process::id()));
    if fs::rename(lock_path, &claimed).is_err() {
        return;
    }
    if lock_is_stale(&claimed) {
        warn!(key, path = %lock_path.display(), "removing stale lock file");
    } else if fs::hard_link(&claimed, lock_path).is_err() {
        // A fresh holder replaced the stale file between our check and the rename.
        warn!(key, path = %lock_path.display(), "could not hand back a live lock");
    }
    let _ = fs::remove_file(&claimed);
}

fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .is_some_and(|age| age > STALE_LOCK_AFTER)
}

impl StateStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        Ok(self.read_envelope(key)?.map(|env| Versioned {
            version: env.version,
            data: env.data,
        }))
    }

    fn commit(&self, key: &str, expected: u64, data: &Value) -> Result<u64, StoreError> {
        let _g = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.document_path(key);
        let _lock = self.acquire(key, &path)?;

        // A corrupt document counts as absent so recovered defaults can replace it.
        let found = match self.read_envelope(key) {
            Ok(Some(env)) => env.version,
            Ok(None) | Err(StoreError::Corrupt { .. }) => 0,
            Err(e) => return Err(e),
        };
        if found != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected,
                found,
            });
        }

        let next = found + 1;
        let body = serde_json::to_vec_pretty(&Envelope {
            version: next,
            data: data.clone(),
        })
        .map_err(|e| StoreError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let tmp = path.with_extension("json.tmp");
        {
            let mut f = fs::File::create(&tmp).map_err(|e| Self::io_err(key, e))?;
            f.write_all(&body).map_err(|e| Self::io_err(key, e))?;
            f.sync_all().map_err(|e| Self::io_err(key, e))?;
        }
        fs::rename(&tmp, &path).map_err(|e| Self::io_err(key, e))?;
        Ok(next)
    }

    fn remove(&self, key: &str, expected: u64) -> Result<(), StoreError> {
        let _g = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.document_path(key);
        let _lock = self.acquire(key, &path)?;

        let found = match self.read_envelope(key) {
            Ok(Some(env)) => env.version,
            Ok(None) | Err(StoreError::Corrupt { .. }) => 0,
            Err(e) => return Err(e),
        };
        if found != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected,
                found,
            });
        }
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_err(key, e)),
        }
    }

    fn append_line(&self, key: &str, line: &Value) -> Result<(), StoreError> {
        let _g = self.guard.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.log_path(key);
        let _lock = self.acquire(key, &path)?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Self::io_err(key, e))?;
        writeln!(f, "{line}").map_err(|e| Self::io_err(key, e))?;
        Ok(())
    }

    fn read_lines(&self, key: &str) -> Result<Vec<Value>, StoreError> {
        let raw = match fs::read_to_string(self.log_path(key)) {
            Ok(s) => s,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_err(key, e)),
        };
        let mut out = Vec::new();
        for (n, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(v) => out.push(v),
                Err(e) => warn!(key, line = n + 1, error = %e, "skipping unparsable log line"),
            }
        }
        Ok(out)
    }
}

// ----------------------------------------------------------------------------
// MemoryStore
// ----------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<HashMap<String, Versioned>>,
    logs: Mutex<HashMap<String, Vec<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Versioned>, StoreError> {
        let docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(docs.get(key).cloned())
    }

    fn commit(&self, key: &str, expected: u64, data: &Value) -> Result<u64, StoreError> {
        let mut docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        let found = docs.get(key).map(|v| v.version).unwrap_or(0);
        if found != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected,
                found,
            });
        }
        let next = found + 1;
        docs.insert(
            key.to_string(),
            Versioned {
                version: next,
                data: data.clone(),
            },
        );
        Ok(next)
    }

    fn remove(&self, key: &str, expected: u64) -> Result<(), StoreError> {
        let mut docs = self.docs.lock().unwrap_or_else(|e| e.into_inner());
        let found = docs.get(key).map(|v| v.version).unwrap_or(0);
        if found != expected {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected,
                found,
            });
        }
        docs.remove(key);
        Ok(())
    }

    fn append_line(&self, key: &str, line: &Value) -> Result<(), StoreError> {
        let mut logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        logs.entry(key.to_string()).or_default().push(line.clone());
        Ok(())
    }

    fn read_lines(&self, key: &str) -> Result<Vec<Value>, StoreError> {
        let logs = self.logs.lock().unwrap_or_else(|e| e.into_inner());
        Ok(logs.get(key).cloned().unwrap_or_default())
    }
}
