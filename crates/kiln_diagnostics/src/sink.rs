//! Thread-safe message accumulator for the duration of a build.

use crate::diagnostic::Diagnostic;
use crate::severity::Severity;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Collects the messages of one build from any thread.
///
/// Per-severity counts are atomics so that `has_errors` checks in the round
/// loop never take the lock.
pub struct DiagnosticSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
    counts: [AtomicUsize; 3],
}

fn slot(severity: Severity) -> usize {
    match severity {
        Severity::Info => 0,
        Severity::Warning => 1,
        Severity::Error => 2,
    }
}

impl DiagnosticSink {
    /// Creates a sink with no messages.
    pub fn new() -> Self {
        Self {
            diagnostics: Mutex::new(Vec::new()),
            counts: Default::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Diagnostic>> {
        self.diagnostics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records a message.
    pub fn emit(&self, diag: Diagnostic) {
        self.counts[slot(diag.severity)].fetch_add(1, Ordering::Relaxed);
        self.lock().push(diag);
    }

    /// Whether any error has been recorded.
    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    /// How many messages of `severity` have been recorded.
    pub fn count(&self, severity: Severity) -> usize {
        self.counts[slot(severity)].load(Ordering::Relaxed)
    }

    /// Shorthand for `count(Severity::Error)`.
    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    /// Drains the recorded messages. Counts keep their values.
    pub fn take_all(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.lock())
    }

    /// A copy of the recorded messages.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.lock().clone()
    }
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::new()
    }
}
