//! Rendering backends for human-readable and machine-readable output.

use crate::diagnostic::Diagnostic;

/// Formats a diagnostic for some output target.
pub trait DiagnosticRenderer {
    /// Renders a single diagnostic into a string.
    fn render(&self, diag: &Diagnostic) -> String;
}

/// Renders diagnostics in a rustc-style terminal format.
///
/// ```text
/// error[E001]: cannot resolve symbol S
///   --> src/b.src:2:1
///    = origin: toy
///    = note: ...
/// ```
pub struct TerminalRenderer {
    /// Whether to use ANSI color codes for the severity.
    pub color: bool,
}

impl TerminalRenderer {
    /// Creates a new terminal renderer.
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn severity_label(&self, diag: &Diagnostic) -> String {
        if !self.color {
            return diag.severity.to_string();
        }
        let ansi = match diag.severity {
            crate::Severity::Error => "31",
            crate::Severity::Warning => "33",
            crate::Severity::Info => "36",
        };
        format!("\x1b[1;{ansi}m{}\x1b[0m", diag.severity)
    }
}

impl DiagnosticRenderer for TerminalRenderer {
    fn render(&self, diag: &Diagnostic) -> String {
        let mut out = self.severity_label(diag);
        if let Some(code) = diag.code {
            out.push_str(&format!("[{code}]"));
        }
        out.push_str(&format!(": {}\n", diag.message));

        if let Some(location) = &diag.location {
            out.push_str(&format!("  --> {location}\n"));
        }
        if let Some(origin) = &diag.origin {
            out.push_str(&format!("   = origin: {origin}\n"));
        }
        for note in &diag.notes {
            out.push_str(&format!("   = note: {note}\n"));
        }
        out
    }
}

/// Renders each diagnostic as a single JSON object line.
pub struct JsonRenderer;

impl DiagnosticRenderer for JsonRenderer {
    fn render(&self, diag: &Diagnostic) -> String {
        // Serializing plain data into a String cannot fail.
        serde_json::to_string(diag).unwrap_or_default()
    }
}
