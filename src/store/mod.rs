//! Block stores.
//!
//! A store persists sorted blocks of encoded records and hands them back by key. The merge engine only needs the
//! three operations of the [`Store`] trait, so any backend can be plugged in.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod file;
pub mod kv;
pub mod mem;

pub use file::FileStore;
pub use kv::KvStore;
pub use mem::MemoryStore;

/// Row delimiter used by the line-oriented stores.
pub const ROW_DELIMITER: char = '\n';

/// Store error.
#[derive(Debug)]
pub enum StoreError {
    /// An empty block was passed to [`Store::write`].
    EmptyRows,
    /// An empty key was passed to [`Store::read`].
    EmptyKey,
    /// A row contains the row delimiter.
    Delimiter,
    /// No block is stored under the key.
    UnknownKey(String),
    /// The path is not scoped under the store's private directory.
    OutsideRoot(PathBuf),
    /// Common I/O error.
    IO(io::Error),
    /// Embedded key-value database error.
    Kv(redb::Error),
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            StoreError::IO(err) => Some(err),
            StoreError::Kv(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            StoreError::EmptyRows => write!(f, "block rows are empty"),
            StoreError::EmptyKey => write!(f, "block key is empty"),
            StoreError::Delimiter => write!(f, "block row contains the row delimiter"),
            StoreError::UnknownKey(key) => write!(f, "block {} not found", key),
            StoreError::OutsideRoot(path) => write!(f, "path {} is outside of the store directory", path.display()),
            StoreError::IO(err) => write!(f, "I/O operation failed: {}", err),
            StoreError::Kv(err) => write!(f, "key-value database operation failed: {}", err),
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> Self {
        StoreError::IO(err)
    }
}

impl From<redb::Error> for StoreError {
    fn from(err: redb::Error) -> Self {
        StoreError::Kv(err)
    }
}

/// Block store interface.
pub trait Store {
    /// Persists a non-empty block of rows under a fresh key and returns the key.
    /// A reader either sees the whole block or nothing.
    fn write(&mut self, rows: &[String]) -> Result<String, StoreError>;

    /// Returns the rows previously written under `key`, in the order they were written.
    fn read(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Removes the storage associated with `keys`. Called once when a sort run ends.
    fn clear(&mut self, keys: &[String]) -> Result<(), StoreError>;
}

const MAX_ID: u64 = i64::MAX as u64 - 1;

/// Unique id generator used for block keys and file names.
///
/// Ids have the form `{seed}-{n}` where `seed` is the creation timestamp in milliseconds and `n` is a monotonic
/// counter. The generator can be shared between stores through an [`std::sync::Arc`].
#[derive(Debug)]
pub struct IdGenerator {
    seed: u64,
    counter: Mutex<u64>,
}

impl IdGenerator {
    /// Creates a generator seeded with the current timestamp.
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();

        IdGenerator::with_seed(seed)
    }

    /// Creates a generator with an explicit seed.
    pub fn with_seed(seed: u64) -> Self {
        IdGenerator {
            seed,
            counter: Mutex::new(0),
        }
    }

    /// Returns the next id.
    pub fn next_id(&self) -> String {
        let mut counter = self.counter.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *counter >= MAX_ID {
            *counter = 0;
        }
        *counter += 1;

        format!("{}-{}", self.seed, *counter)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        IdGenerator::new()
    }
}

/// Checks that `path` lives strictly inside `root`.
/// Only the part below `root` is inspected, so the root itself may be any valid path.
pub(crate) fn ensure_scoped(root: &Path, path: &Path) -> Result<(), StoreError> {
    let nested = match path.strip_prefix(root) {
        Ok(nested) => nested,
        Err(_) => return Err(StoreError::OutsideRoot(path.to_path_buf())),
    };

    let plain = nested.components().all(|component| matches!(component, Component::Normal(_)));
    if nested.as_os_str().is_empty() || !plain {
        return Err(StoreError::OutsideRoot(path.to_path_buf()));
    }

    return Ok(());
}

/// Checks a block before it is written by a line-oriented store.
pub(crate) fn check_rows(rows: &[String]) -> Result<(), StoreError> {
    if rows.is_empty() {
        return Err(StoreError::EmptyRows);
    }
    if rows.iter().any(|row| row.contains(ROW_DELIMITER)) {
        return Err(StoreError::Delimiter);
    }

    return Ok(());
}
