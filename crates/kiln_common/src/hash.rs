//! Content hashing for validity fingerprints and symbol shapes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An XXH3-128 digest.
///
/// Equal digests are treated as equal content. Validity states fingerprint
/// source files with it, and the dependency graph uses it as the "shape" of
/// a symbol so that shape changes can be detected across builds.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Hashes one byte slice.
    pub fn from_bytes(data: &[u8]) -> Self {
        let hash = xxhash_rust::xxh3::xxh3_128(data);
        Self(hash.to_le_bytes())
    }

    /// Computes a single hash over several byte slices.
    ///
    /// Each part is length-prefixed so that `["ab", "c"]` and `["a", "bc"]`
    /// hash differently.
    pub fn from_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = xxhash_rust::xxh3::Xxh3::new();
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part);
        }
        Self(hasher.digest128().to_le_bytes())
    }

    /// The digest bytes, little-endian.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}
