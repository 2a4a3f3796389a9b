//! Build messages, severity management, and rendering.
//!
//! Compilers and the orchestrator report problems as structured
//! [`Diagnostic`] values. The thread-safe [`DiagnosticSink`] accumulates them
//! for the duration of a build, and [`DiagnosticRenderer`] implementations
//! format them for the terminal or as JSON lines.

#![warn(missing_docs)]

pub mod code;
pub mod diagnostic;
pub mod location;
pub mod renderer;
pub mod severity;
pub mod sink;

pub use code::{Category, DiagnosticCode};
pub use diagnostic::Diagnostic;
pub use location::Location;
pub use renderer::{DiagnosticRenderer, JsonRenderer, TerminalRenderer};
pub use severity::Severity;
pub use sink::DiagnosticSink;
