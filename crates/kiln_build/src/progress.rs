//! Progress reporting, cancellation, and bounded blocking waits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::status::StageExit;

/// Receives progress and answers whether the build has been cancelled.
pub trait ProgressSink {
    /// Returns `true` once the build should stop.
    fn is_cancelled(&self) -> bool;

    /// Reports progress as a fraction in `0.0..=1.0` with a short description.
    fn report(&self, fraction: f64, text: &str);
}

/// A cloneable cancellation flag shared between the build and its caller.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A [`ProgressSink`] that logs progress through `tracing`.
#[derive(Clone, Default)]
pub struct LoggingProgress {
    token: CancellationToken,
}

impl LoggingProgress {
    /// Creates a sink observing `token`.
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

impl ProgressSink for LoggingProgress {
    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    fn report(&self, fraction: f64, text: &str) {
        debug!(percent = (fraction * 100.0).round() as u32, "{text}");
    }
}

/// Something the build waits on before compiling, e.g. an indexer.
pub trait ReadinessGate {
    /// Returns `true` once compiling may start.
    fn is_ready(&self) -> bool;
}

/// A gate that is always open.
pub struct AlwaysReady;

impl ReadinessGate for AlwaysReady {
    fn is_ready(&self) -> bool {
        true
    }
}

/// Blocks until `gate` is ready, polling every `poll` and re-checking
/// cancellation on every poll.
pub fn wait_until_ready(
    gate: &dyn ReadinessGate,
    progress: &dyn ProgressSink,
    poll: Duration,
) -> Result<(), StageExit> {
    loop {
        if progress.is_cancelled() {
            return Err(StageExit::Cancelled);
        }
        if gate.is_ready() {
            return Ok(());
        }
        std::thread::sleep(poll);
    }
}
