//! The build status ledger and the rebuild marker.
//!
//! The ledger is a small JSON record written with `compilation_in_progress`
//! set before any stage runs and rewritten when the build finishes. Finding
//! it missing, unreadable, in an old format, still marked in progress, or
//! stamped with a different filesystem epoch means the caches can't be
//! trusted and the next build must be a full rebuild.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CacheError;

/// Version of the on-disk cache layout. Any mismatch forces a rebuild.
pub const CACHE_FORMAT_VERSION: u32 = 1;

const STATUS_FILE: &str = "status.json";
const REBUILD_MARKER_FILE: &str = "rebuild.marker";

/// The persisted ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildStatus {
    /// Cache layout version the record was written by.
    pub cache_format_version: u32,
    /// Set while a build is running.
    pub compilation_in_progress: bool,
    /// Identity stamp of the cache storage the build ran against.
    pub filesystem_epoch: i64,
}

impl BuildStatus {
    /// A record for the current cache format.
    pub fn current(compilation_in_progress: bool, filesystem_epoch: i64) -> Self {
        Self {
            cache_format_version: CACHE_FORMAT_VERSION,
            compilation_in_progress,
            filesystem_epoch,
        }
    }
}

/// Outcome of reading the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerRead {
    /// No ledger has been written.
    Missing,
    /// The ledger exists but cannot be read; carries the reason.
    Corrupt(String),
    /// A well-formed record.
    Present(BuildStatus),
}

/// Reads and writes the ledger record and the rebuild marker in a cache
/// directory.
pub struct BuildStatusLedger {
    dir: PathBuf,
}

impl BuildStatusLedger {
    /// Creates a ledger rooted at the cache directory.
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            dir: cache_dir.to_path_buf(),
        }
    }

    fn status_path(&self) -> PathBuf {
        self.dir.join(STATUS_FILE)
    }

    fn marker_path(&self) -> PathBuf {
        self.dir.join(REBUILD_MARKER_FILE)
    }

    /// Reads the ledger record. Never fails; problems are reported as
    /// [`LedgerRead::Corrupt`].
    pub fn read(&self) -> LedgerRead {
        let path = self.status_path();
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return LedgerRead::Missing,
            Err(e) => return LedgerRead::Corrupt(e.to_string()),
        };
        match serde_json::from_str(&content) {
            Ok(status) => LedgerRead::Present(status),
            Err(e) => LedgerRead::Corrupt(e.to_string()),
        }
    }

    /// Writes the ledger record.
    pub fn write(&self, status: &BuildStatus) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        let json = serde_json::to_string_pretty(status).map_err(|e| CacheError::LedgerParse {
            reason: e.to_string(),
        })?;
        let path = self.status_path();
        std::fs::write(&path, json).map_err(|e| CacheError::io(path, e))
    }

    /// Decides whether the caches can be trusted.
    ///
    /// Returns a human-readable reason when a full rebuild is required.
    pub fn rebuild_reason(&self, current_epoch: i64) -> Option<String> {
        if self.marker_path().exists() {
            let reason = self
                .rebuild_marker()
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| {
                    "compiler caches are out of date, project rebuild is required".to_string()
                });
            return Some(reason);
        }
        let reason = match self.read() {
            LedgerRead::Missing => "build caches are missing".to_string(),
            LedgerRead::Corrupt(why) => {
                debug!(%why, "ledger unreadable");
                "build caches are corrupted".to_string()
            }
            LedgerRead::Present(status) => {
                if status.cache_format_version != CACHE_FORMAT_VERSION {
                    format!(
                        "build caches have an old format (version {}, expected {})",
                        status.cache_format_version, CACHE_FORMAT_VERSION
                    )
                } else if status.compilation_in_progress {
                    "previous compilation did not complete".to_string()
                } else if status.filesystem_epoch != current_epoch {
                    "cache storage was replaced since the last build".to_string()
                } else {
                    return None;
                }
            }
        };
        Some(reason)
    }

    /// Records that the next build must be a rebuild.
    pub fn write_rebuild_marker(&self, reason: &str) -> Result<(), CacheError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        let path = self.marker_path();
        std::fs::write(&path, reason).map_err(|e| CacheError::io(path, e))
    }

    /// Returns the reason stored in the rebuild marker, if present.
    pub fn rebuild_marker(&self) -> Option<String> {
        std::fs::read_to_string(self.marker_path()).ok()
    }

    /// Deletes the rebuild marker.
    pub fn clear_rebuild_marker(&self) -> Result<(), CacheError> {
        let path = self.marker_path();
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> (tempfile::TempDir, BuildStatusLedger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = BuildStatusLedger::new(&dir.path().join("cache"));
        (dir, ledger)
    }

    #[test]
    fn missing_ledger() {
        let (_dir, ledger) = ledger();
        assert_eq!(ledger.read(), LedgerRead::Missing);
        assert_eq!(
            ledger.rebuild_reason(7).as_deref(),
            Some("build caches are missing")
        );
    }

    #[test]
    fn write_then_read() {
        let (_dir, ledger) = ledger();
        let status = BuildStatus::current(false, 7);
        ledger.write(&status).unwrap();
        assert_eq!(ledger.read(), LedgerRead::Present(status));
        assert!(ledger.rebuild_reason(7).is_none());
    }

    #[test]
    fn corrupt_ledger() {
        let (dir, ledger) = ledger();
        std::fs::create_dir_all(dir.path().join("cache")).unwrap();
        std::fs::write(dir.path().join("cache").join(STATUS_FILE), "{ not json").unwrap();
        assert!(matches!(ledger.read(), LedgerRead::Corrupt(_)));
        assert_eq!(
            ledger.rebuild_reason(7).as_deref(),
            Some("build caches are corrupted")
        );
    }

    #[test]
    fn in_progress_forces_rebuild() {
        let (_dir, ledger) = ledger();
        ledger.write(&BuildStatus::current(true, 7)).unwrap();
        assert_eq!(
            ledger.rebuild_reason(7).as_deref(),
            Some("previous compilation did not complete")
        );
    }

    #[test]
    fn old_format_forces_rebuild() {
        let (_dir, ledger) = ledger();
        let status = BuildStatus {
            cache_format_version: CACHE_FORMAT_VERSION + 1,
            compilation_in_progress: false,
            filesystem_epoch: 7,
        };
        ledger.write(&status).unwrap();
        assert!(ledger.rebuild_reason(7).unwrap().contains("old format"));
    }

    #[test]
    fn epoch_change_forces_rebuild() {
        let (_dir, ledger) = ledger();
        ledger.write(&BuildStatus::current(false, 7)).unwrap();
        assert!(ledger.rebuild_reason(8).unwrap().contains("replaced"));
    }

    #[test]
    fn marker_takes_precedence() {
        let (_dir, ledger) = ledger();
        ledger.write(&BuildStatus::current(false, 7)).unwrap();
        ledger.write_rebuild_marker("cache corrupted").unwrap();
        assert_eq!(ledger.rebuild_marker().as_deref(), Some("cache corrupted"));
        assert_eq!(ledger.rebuild_reason(7).as_deref(), Some("cache corrupted"));

        ledger.write_rebuild_marker("").unwrap();
        assert!(ledger.rebuild_reason(7).unwrap().contains("out of date"));

        ledger.clear_rebuild_marker().unwrap();
        ledger.clear_rebuild_marker().unwrap();
        assert!(ledger.rebuild_marker().is_none());
        assert!(ledger.rebuild_reason(7).is_none());
    }
}
