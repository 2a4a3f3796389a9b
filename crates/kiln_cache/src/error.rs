//! Failures of the persistent stores.

use std::path::PathBuf;

/// Why a cache file could not be read or written.
///
/// The build never fails because of a `CacheError`. The orchestrator turns
/// any of these into a "rebuild requested" decision and carries on with a
/// fresh, empty store.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Reading, writing, or deleting a file under the cache directory failed.
    #[error("cannot access {path}: {source}")]
    Io {
        /// The file or directory involved.
        path: PathBuf,
        /// What the filesystem reported.
        source: std::io::Error,
    },

    /// The ledger record is not valid JSON for the current layout.
    #[error("unreadable build status ledger: {reason}")]
    LedgerParse {
        /// What the JSON decoder reported.
        reason: String,
    },

    /// A table file is truncated, foreign, or of another table kind.
    #[error("table {path} has a bad header: {reason}")]
    InvalidHeader {
        /// The table file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The payload does not hash to the checksum stored in the header.
    #[error("table {path} is damaged: payload hashes to {actual}, header says {expected}")]
    ChecksumMismatch {
        /// The table file.
        path: PathBuf,
        /// Checksum recorded in the header.
        expected: String,
        /// Checksum of the payload as read.
        actual: String,
    },

    /// The table was written by a different cache format.
    #[error("table {path} uses format {actual}, this build reads format {expected}")]
    VersionMismatch {
        /// The table file.
        path: PathBuf,
        /// Format this build writes.
        expected: u32,
        /// Format found in the file.
        actual: u32,
    },

    /// bincode could not encode or decode a table.
    #[error("cannot encode or decode table: {reason}")]
    Serialization {
        /// What bincode reported.
        reason: String,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}
