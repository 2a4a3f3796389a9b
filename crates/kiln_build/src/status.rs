//! Build outcomes and stage control flow.

use std::fmt;
use std::time::Duration;

use kiln_common::InternalError;
use kiln_diagnostics::Diagnostic;
use serde::Serialize;

/// Terminal result of one orchestration run.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Nothing needed to be done.
    UpToDate,
    /// Work was performed without errors.
    Success,
    /// Some stage reported an error.
    Errors,
    /// The build was cancelled.
    Cancelled,
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::UpToDate => write!(f, "up-to-date"),
            ExitStatus::Success => write!(f, "success"),
            ExitStatus::Errors => write!(f, "errors"),
            ExitStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Why a stage stopped early.
#[derive(Debug)]
pub enum StageExit {
    /// Cancellation was observed.
    Cancelled,
    /// Errors were reported and later stages must not run.
    FatalErrors,
    /// A dry run found work to do.
    OutOfDate,
    /// An unexpected failure.
    Internal(InternalError),
}

impl From<InternalError> for StageExit {
    fn from(err: InternalError) -> Self {
        StageExit::Internal(err)
    }
}

/// Result of a stage: whether it did any effective work.
pub type StageResult = Result<bool, StageExit>;

/// How many rounds the translation stage ran for one chunk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChunkRounds {
    /// Names of the chunk's modules.
    pub modules: Vec<String>,
    /// Number of rounds started.
    pub rounds: usize,
}

/// Everything a caller learns about a finished build.
#[derive(Clone, Debug, Serialize)]
pub struct BuildReport {
    /// The terminal status.
    pub status: ExitStatus,
    /// Whether any stage performed effective work.
    pub did_work: bool,
    /// Whether this run was a full rebuild.
    pub rebuild: bool,
    /// Why a full rebuild was requested, if it was.
    pub rebuild_reason: Option<String>,
    /// Round counts of each translated chunk, in processing order.
    pub chunks: Vec<ChunkRounds>,
    /// Number of error-severity messages.
    pub errors: usize,
    /// Number of warning-severity messages.
    pub warnings: usize,
    /// All messages reported during the build.
    pub diagnostics: Vec<Diagnostic>,
    /// Human-readable summary.
    pub message: String,
    /// Wall-clock duration.
    #[serde(skip)]
    pub duration: Duration,
}

/// Summarizes a build for display.
pub fn status_message(status: ExitStatus, errors: usize, warnings: usize, duration: Duration) -> String {
    let base = match status {
        ExitStatus::Cancelled => return "compilation aborted".to_string(),
        ExitStatus::UpToDate => return "all files are up-to-date".to_string(),
        ExitStatus::Success if warnings > 0 => {
            format!("compilation completed successfully with {warnings} warnings")
        }
        ExitStatus::Success => "compilation completed successfully".to_string(),
        ExitStatus::Errors => {
            format!("compilation completed with {errors} errors and {warnings} warnings")
        }
    };
    format!("{base} in {}", format_duration(duration))
}

fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{millis} ms")
    } else {
        let secs = duration.as_secs();
        if secs < 60 {
            format!("{secs} s {} ms", millis % 1000)
        } else {
            format!("{} m {} s", secs / 60, secs % 60)
        }
    }
}
