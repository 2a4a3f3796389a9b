//! Message severity levels ordered from least to most severe.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How serious a build message is. Declaration order is severity order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational message, e.g. "rebuild requested: caches are out of date".
    Info,
    /// A potential problem that does not fail the build.
    Warning,
    /// A problem that fails the build.
    Error,
}

impl Severity {
    /// Whether a message of this severity fails the build.
    pub fn is_error(self) -> bool {
        self == Severity::Error
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}
