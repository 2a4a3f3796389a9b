//! Per-compiler validity fingerprints.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use kiln_common::ContentHash;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CacheError;
use crate::table::{delete_table, read_table, write_table};

const TABLE_KIND: &str = "validity";

/// An opaque fingerprint of a file as seen by one compiler.
///
/// States are only comparable within the table of the compiler that
/// produced them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct ValidityState(ContentHash);

impl ValidityState {
    /// Fingerprints raw bytes.
    pub fn of(bytes: &[u8]) -> Self {
        Self(ContentHash::from_bytes(bytes))
    }

    /// Wraps an already-computed hash.
    pub fn from_hash(hash: ContentHash) -> Self {
        Self(hash)
    }

    /// Fingerprints the current content of a file.
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        Ok(Self::of(&std::fs::read(path)?))
    }

    /// Returns the underlying hash.
    pub fn hash(&self) -> ContentHash {
        self.0
    }
}

/// Persistent map from file path to the [`ValidityState`] a compiler last
/// processed it with.
///
/// Mutations stay in memory until [`force_flush`](Self::force_flush); flushing
/// an unchanged store does nothing, so it is safe to flush after every stage.
pub struct ValidityStateStore {
    path: PathBuf,
    entries: BTreeMap<PathBuf, ValidityState>,
    dirty: bool,
}

impl ValidityStateStore {
    /// Opens the store backed by `path`.
    ///
    /// A missing file yields an empty store; an unreadable one is an error.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        let entries = read_table(path, TABLE_KIND)?.unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            entries,
            dirty: false,
        })
    }

    /// Creates an empty store that will be written to `path` on flush.
    pub fn empty(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: BTreeMap::new(),
            dirty: true,
        }
    }

    /// Returns the stored state of `file`, if any.
    pub fn get(&self, file: &Path) -> Option<ValidityState> {
        self.entries.get(file).copied()
    }

    /// Records the state `file` was processed with.
    pub fn put(&mut self, file: &Path, state: ValidityState) {
        if self.entries.insert(file.to_path_buf(), state) != Some(state) {
            self.dirty = true;
        }
    }

    /// Forgets `file`, returning its previous state.
    pub fn remove(&mut self, file: &Path) -> Option<ValidityState> {
        let removed = self.entries.remove(file);
        if removed.is_some() {
            self.dirty = true;
        }
        removed
    }

    /// Iterates over all tracked paths in sorted order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries.keys().map(PathBuf::as_path)
    }

    /// Number of tracked files.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no file is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes pending changes to disk.
    pub fn force_flush(&mut self) -> Result<(), CacheError> {
        if !self.dirty {
            return Ok(());
        }
        write_table(&self.path, TABLE_KIND, &self.entries)?;
        self.dirty = false;
        Ok(())
    }

    /// Drops every entry and deletes the backing file.
    pub fn wipe_and_reinitialize(&mut self) -> Result<(), CacheError> {
        debug!(path = %self.path.display(), "wiping validity table");
        self.entries.clear();
        self.dirty = true;
        delete_table(&self.path)
    }

    /// Flushes and releases the store.
    pub fn close(mut self) -> Result<(), CacheError> {
        self.force_flush()
    }
}
