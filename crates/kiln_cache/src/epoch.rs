//! Identity stamp of the cache storage.
//!
//! The stamp is created together with the cache storage and recorded in the
//! ledger by every build. If the storage is deleted or replaced underneath a
//! surviving ledger, the stamps no longer agree.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CacheError;

const EPOCH_FILE: &str = "storage.epoch";

/// Returns the epoch stamp of the storage in `cache_dir`, creating it if
/// the storage is new.
pub fn filesystem_epoch(cache_dir: &Path) -> Result<i64, CacheError> {
    let path = cache_dir.join(EPOCH_FILE);
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            if let Ok(stamp) = content.trim().parse::<i64>() {
                return Ok(stamp);
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(CacheError::io(path, e)),
    }

    std::fs::create_dir_all(cache_dir).map_err(|e| CacheError::io(cache_dir, e))?;
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default();
    std::fs::write(&path, stamp.to_string()).map_err(|e| CacheError::io(&path, e))?;
    Ok(stamp)
}
