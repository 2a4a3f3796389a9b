//! File locations attached to messages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Where a message points: a file and an optional line and column.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Location {
    /// The file the message refers to.
    pub file: PathBuf,
    /// 1-based line number, if known.
    pub line: Option<u32>,
    /// 1-based column number, if known.
    pub column: Option<u32>,
}

impl Location {
    /// A location covering a whole file.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            file: path.as_ref().to_path_buf(),
            line: None,
            column: None,
        }
    }

    /// A location pointing at a line and column in a file.
    pub fn at(path: impl AsRef<Path>, line: u32, column: u32) -> Self {
        Self {
            file: path.as_ref().to_path_buf(),
            line: Some(line),
            column: Some(column),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.file.display())?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
            if let Some(column) = self.column {
                write!(f, ":{column}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_file_only() {
        assert_eq!(format!("{}", Location::file("src/a.src")), "src/a.src");
    }

    #[test]
    fn display_line_col() {
        assert_eq!(format!("{}", Location::at("src/a.src", 3, 7)), "src/a.src:3:7");
    }
}
