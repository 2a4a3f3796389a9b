//! Checksummed binary table files.
//!
//! Every persistent table is a single file laid out as a 4-byte little-endian
//! header length, a bincode-encoded [`TableHeader`], and a bincode-encoded
//! payload. The header carries magic bytes, the table format version, the
//! table kind, and an XXH3 checksum of the payload, so that truncated,
//! foreign, or stale files are reported as corruption instead of being
//! silently misread.

use std::path::Path;

use kiln_common::ContentHash;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Magic bytes identifying a kiln table file.
const TABLE_MAGIC: [u8; 4] = *b"KILN";

/// Current table format version. Increment on breaking changes to the header
/// or to any payload layout.
pub const TABLE_FORMAT_VERSION: u32 = 1;

/// Header prepended to every table file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableHeader {
    /// Magic bytes: must be `b"KILN"`.
    pub magic: [u8; 4],
    /// Table format version.
    pub format_version: u32,
    /// What the payload holds (`"validity"`, `"graph"`, `"outputs"`).
    pub kind: String,
    /// Content hash of the payload bytes.
    pub checksum: ContentHash,
}

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

/// Writes `value` to `path` as a table of the given kind.
///
/// The file is written to a sibling temporary file first and renamed into
/// place, so a crash mid-write leaves either the old table or the new one.
pub fn write_table<T: Serialize>(path: &Path, kind: &str, value: &T) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
    }

    let payload = bincode::serde::encode_to_vec(value, bincode_config()).map_err(|e| {
        CacheError::Serialization {
            reason: e.to_string(),
        }
    })?;

    let header = TableHeader {
        magic: TABLE_MAGIC,
        format_version: TABLE_FORMAT_VERSION,
        kind: kind.to_string(),
        checksum: ContentHash::from_bytes(&payload),
    };
    let header_bytes = bincode::serde::encode_to_vec(&header, bincode_config()).map_err(|e| {
        CacheError::Serialization {
            reason: e.to_string(),
        }
    })?;

    let header_len = header_bytes.len() as u32;
    let mut output = Vec::with_capacity(4 + header_bytes.len() + payload.len());
    output.extend_from_slice(&header_len.to_le_bytes());
    output.extend_from_slice(&header_bytes);
    output.extend_from_slice(&payload);

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &output).map_err(|e| CacheError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| CacheError::io(path, e))
}

/// Reads a table of the given kind from `path`.
///
/// Returns `Ok(None)` if the file does not exist. Any other failure
/// (unreadable file, bad header, wrong kind or version, checksum mismatch,
/// undecodable payload) is an `Err` the caller treats as corruption.
pub fn read_table<T: DeserializeOwned>(path: &Path, kind: &str) -> Result<Option<T>, CacheError> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::io(path, e)),
    };

    let invalid = |reason: &str| CacheError::InvalidHeader {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if raw.len() < 4 {
        return Err(invalid("file too short for header length"));
    }
    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&raw[..4]);
    let header_len = u32::from_le_bytes(len_bytes) as usize;
    if raw.len() < 4 + header_len {
        return Err(invalid("truncated header"));
    }

    let (header, _): (TableHeader, usize) =
        bincode::serde::decode_from_slice(&raw[4..4 + header_len], bincode_config())
            .map_err(|e| invalid(&e.to_string()))?;

    if header.magic != TABLE_MAGIC {
        return Err(invalid("missing magic bytes"));
    }
    if header.format_version != TABLE_FORMAT_VERSION {
        return Err(CacheError::VersionMismatch {
            path: path.to_path_buf(),
            expected: TABLE_FORMAT_VERSION,
            actual: header.format_version,
        });
    }
    if header.kind != kind {
        return Err(invalid(&format!(
            "expected a {kind} table, found {}",
            header.kind
        )));
    }

    let payload = &raw[4 + header_len..];
    let actual = ContentHash::from_bytes(payload);
    if actual != header.checksum {
        return Err(CacheError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: header.checksum.to_string(),
            actual: actual.to_string(),
        });
    }

    let (value, _): (T, usize) = bincode::serde::decode_from_slice(payload, bincode_config())
        .map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })?;
    Ok(Some(value))
}

/// Deletes a table file, ignoring a file that is already gone.
pub fn delete_table(path: &Path) -> Result<(), CacheError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}
