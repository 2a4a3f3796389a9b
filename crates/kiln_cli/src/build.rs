//! `kiln make`, `kiln compile`, and `kiln rebuild`.
//!
//! All three share one flow:
//!
//! 1. Find the project root (walk up looking for `kiln.toml`)
//! 2. Load the config and resolve the project model
//! 3. Select the compile scope from `-m` / `-f`
//! 4. Run the orchestrator in the requested mode
//! 5. Render diagnostics and the summary
//! 6. Flush the caches

use tracing::warn;

use crate::pipeline::{
    exit_code, load_project, open_orchestrator, render_report, resolve_project_root, select_scope,
};
use crate::{BuildArgs, GlobalArgs};

/// Which orchestrator entry point a command maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Incremental build of what changed.
    Make,
    /// Forced recompilation of everything in scope.
    Compile,
    /// Clear caches and outputs, then build everything in scope.
    Rebuild,
}

impl Mode {
    fn verb(self) -> &'static str {
        match self {
            Mode::Make => "Building",
            Mode::Compile => "Compiling",
            Mode::Rebuild => "Rebuilding",
        }
    }
}

/// Runs a build command and returns the process exit code.
pub fn run(mode: Mode, args: &BuildArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project_dir = resolve_project_root(global)?;
    let project = load_project(&project_dir)?;

    if !global.quiet {
        eprintln!("{:>12} {}", mode.verb(), project.name());
    }

    let scope = select_scope(&project, args)?;
    let mut orchestrator = open_orchestrator(project);

    let report = match mode {
        Mode::Make => orchestrator.make(&*scope),
        Mode::Compile => orchestrator.compile(&*scope),
        Mode::Rebuild => orchestrator.rebuild(&*scope),
    };

    let close = orchestrator.close();
    let report = report?;
    if let Err(e) = close {
        warn!("failed to flush build caches: {e}");
    }

    render_report(&report, args.format, global);
    Ok(exit_code(report.status))
}
