//! The core diagnostic type.

use crate::code::DiagnosticCode;
use crate::location::Location;
use crate::severity::Severity;
use serde::{Deserialize, Serialize};

/// A structured build message.
///
/// Use the constructors [`error`](Self::error), [`warning`](Self::warning)
/// and [`info`](Self::info), then chain builder methods:
///
/// ```
/// use kiln_diagnostics::{Diagnostic, Location};
///
/// let diag = Diagnostic::error("cannot resolve symbol S")
///     .with_location(Location::at("src/b.src", 2, 1))
///     .with_note("S was removed from a.src");
/// assert!(diag.severity.is_error());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity level.
    pub severity: Severity,
    /// Optional structured code.
    pub code: Option<DiagnosticCode>,
    /// The main message text.
    pub message: String,
    /// Where the message points, if anywhere.
    pub location: Option<Location>,
    /// The compiler or component that produced the message.
    pub origin: Option<String>,
    /// Additional context lines.
    pub notes: Vec<String>,
}

impl Diagnostic {
    fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            code: None,
            message: message.into(),
            location: None,
            origin: None,
            notes: Vec::new(),
        }
    }

    /// Creates an error diagnostic.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    /// Creates a warning diagnostic.
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    /// Creates an informational diagnostic.
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(Severity::Info, message)
    }

    /// Attaches a structured code.
    pub fn with_code(mut self, code: DiagnosticCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attaches a location.
    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    /// Records the component that produced this message.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Adds a note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}
