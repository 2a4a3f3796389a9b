//! Interned symbol identifiers for the cross-file dependency graph.

use lasso::ThreadedRodeo;
use serde::{Deserialize, Serialize};

/// A symbol name (class, function, resource key...) as seen by the
/// dependency graph.
///
/// Symbols are interned strings represented as a `u32` index, giving O(1)
/// equality and cheap copies. Ids are only meaningful for the interner that
/// produced them and are never persisted; on disk symbols are stored by name.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct SymbolId(u32);

impl SymbolId {
    /// Creates a `SymbolId` from a raw `u32` index.
    ///
    /// Intended for tests. In normal use ids come from [`SymbolInterner::intern`].
    pub fn from_raw(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw `u32` index of this symbol.
    pub fn as_raw(self) -> u32 {
        self.0
    }
}

// SAFETY: `SymbolId` wraps a `u32`, which always fits in `usize` on the
// supported 32-bit and 64-bit targets. `try_from_usize` rejects values that
// don't fit in `u32`.
unsafe impl lasso::Key for SymbolId {
    fn into_usize(self) -> usize {
        self.0 as usize
    }

    fn try_from_usize(int: usize) -> Option<Self> {
        u32::try_from(int).ok().map(SymbolId)
    }
}

/// Thread-safe symbol interner backed by [`lasso::ThreadedRodeo`].
pub struct SymbolInterner {
    rodeo: ThreadedRodeo<SymbolId>,
}

impl SymbolInterner {
    /// Creates a new empty interner.
    pub fn new() -> Self {
        Self {
            rodeo: ThreadedRodeo::new(),
        }
    }

    /// Interns a symbol name, returning its [`SymbolId`].
    pub fn intern(&self, name: &str) -> SymbolId {
        self.rodeo.get_or_intern(name)
    }

    /// Looks up a symbol without interning it.
    pub fn get(&self, name: &str) -> Option<SymbolId> {
        self.rodeo.get(name)
    }

    /// Resolves a [`SymbolId`] back to its name.
    ///
    /// # Panics
    ///
    /// Panics if the id was not created by this interner.
    pub fn resolve(&self, id: SymbolId) -> &str {
        self.rodeo.resolve(&id)
    }
}

impl Default for SymbolInterner {
    fn default() -> Self {
        Self::new()
    }
}
