//! Message codes with category prefixes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The area a message code belongs to, determining its prefix letter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum Category {
    /// Project configuration problems, prefixed with `C`.
    Config,
    /// Messages produced by compilers, prefixed with `E`.
    Compiler,
    /// Cache and build-state messages, prefixed with `K`.
    Cache,
    /// Internal failures, prefixed with `X`.
    Internal,
}

impl Category {
    /// Returns the single-character prefix for this category.
    pub fn prefix(self) -> char {
        match self {
            Category::Config => 'C',
            Category::Compiler => 'E',
            Category::Cache => 'K',
            Category::Internal => 'X',
        }
    }
}

/// A structured message code combining a category prefix and a number.
///
/// Displayed as the prefix followed by a zero-padded 3-digit number,
/// e.g. `C001`, `K102`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct DiagnosticCode {
    /// The category of this code.
    pub category: Category,
    /// The numeric identifier within the category.
    pub number: u16,
}

impl DiagnosticCode {
    /// Creates a new diagnostic code.
    pub const fn new(category: Category, number: u16) -> Self {
        Self { category, number }
    }

    /// A module has sources but no output directory.
    pub const MISSING_OUTPUT: Self = Self::new(Category::Config, 1);
    /// An output directory could not be created.
    pub const CANNOT_CREATE_OUTPUT: Self = Self::new(Category::Config, 2);
    /// Output and source roots overlap.
    pub const OUTPUT_SOURCE_OVERLAP: Self = Self::new(Category::Config, 3);
    /// A compiler rejected the project configuration.
    pub const COMPILER_CONFIGURATION: Self = Self::new(Category::Config, 4);
    /// A rebuild was requested or performed.
    pub const REBUILD_REQUESTED: Self = Self::new(Category::Cache, 101);
    /// Build caches could not be persisted.
    pub const CACHE_FLUSH_FAILED: Self = Self::new(Category::Cache, 102);
    /// A stale output could not be deleted.
    pub const DELETE_FAILED: Self = Self::new(Category::Cache, 103);
    /// An unexpected failure inside a compiler or the build itself.
    pub const INTERNAL: Self = Self::new(Category::Internal, 1);
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:03}", self.category.prefix(), self.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_prefixes() {
        assert_eq!(Category::Config.prefix(), 'C');
        assert_eq!(Category::Compiler.prefix(), 'E');
        assert_eq!(Category::Cache.prefix(), 'K');
        assert_eq!(Category::Internal.prefix(), 'X');
    }

    #[test]
    fn display_format() {
        assert_eq!(format!("{}", DiagnosticCode::MISSING_OUTPUT), "C001");
        assert_eq!(format!("{}", DiagnosticCode::REBUILD_REQUESTED), "K101");
        assert_eq!(
            format!("{}", DiagnosticCode::new(Category::Compiler, 42)),
            "E042"
        );
    }

    #[test]
    fn serde_roundtrip() {
        let code = DiagnosticCode::CACHE_FLUSH_FAILED;
        let json = serde_json::to_string(&code).unwrap();
        let back: DiagnosticCode = serde_json::from_str(&json).unwrap();
        assert_eq!(code, back);
    }
}
