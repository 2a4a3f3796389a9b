//! The per-build context handed to compilers and build tasks.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use kiln_diagnostics::{Diagnostic, DiagnosticSink, Severity};
use tracing::info;

use crate::model::{ModuleId, ProjectModel};
use crate::progress::ProgressSink;
use crate::scope::CompileScope;
use crate::status::StageExit;

/// What kind of build is running.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildFlags {
    /// Full rebuild: outputs are deleted first and every file is compiled.
    pub rebuild: bool,
    /// Compile every file in scope regardless of validity state.
    pub force: bool,
    /// Decide whether anything would be built, without writing anything.
    pub dry_run: bool,
}

/// Shared state of one build attempt.
pub struct CompileContext<'a> {
    project: &'a ProjectModel,
    scope: &'a dyn CompileScope,
    diagnostics: &'a DiagnosticSink,
    progress: &'a dyn ProgressSink,
    flags: BuildFlags,
    rebuild_reason: RefCell<Option<String>>,
}

impl<'a> CompileContext<'a> {
    /// Creates a context for one build attempt.
    pub fn new(
        project: &'a ProjectModel,
        scope: &'a dyn CompileScope,
        diagnostics: &'a DiagnosticSink,
        progress: &'a dyn ProgressSink,
        flags: BuildFlags,
    ) -> Self {
        Self {
            project,
            scope,
            diagnostics,
            progress,
            flags,
            rebuild_reason: RefCell::new(None),
        }
    }

    /// The project being built.
    pub fn project(&self) -> &'a ProjectModel {
        self.project
    }

    /// The compile scope.
    pub fn scope(&self) -> &'a dyn CompileScope {
        self.scope
    }

    /// The progress sink.
    pub fn progress(&self) -> &'a dyn ProgressSink {
        self.progress
    }

    /// The build flags.
    pub fn flags(&self) -> BuildFlags {
        self.flags
    }

    /// Returns `true` for a full rebuild.
    pub fn is_rebuild(&self) -> bool {
        self.flags.rebuild
    }

    /// Returns `true` for a dry run.
    pub fn is_dry_run(&self) -> bool {
        self.flags.dry_run
    }

    /// Reports a message.
    pub fn emit(&self, diag: Diagnostic) {
        self.diagnostics.emit(diag);
    }

    /// Number of messages reported at `severity`.
    pub fn message_count(&self, severity: Severity) -> usize {
        self.diagnostics.count(severity)
    }

    /// Returns `true` if any error has been reported.
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }

    /// Asks for a full rebuild once this attempt finishes.
    ///
    /// The first reason wins.
    pub fn request_rebuild_next_time(&self, reason: impl Into<String>) {
        let mut slot = self.rebuild_reason.borrow_mut();
        if slot.is_none() {
            let reason = reason.into();
            info!(%reason, "full rebuild requested");
            *slot = Some(reason);
        }
    }

    /// Returns `true` once a rebuild has been requested.
    pub fn is_rebuild_requested(&self) -> bool {
        self.rebuild_reason.borrow().is_some()
    }

    /// The reason given for the requested rebuild.
    pub fn rebuild_reason(&self) -> Option<String> {
        self.rebuild_reason.borrow().clone()
    }

    /// Returns `Err(StageExit::Cancelled)` if cancellation was requested.
    pub fn check_cancelled(&self) -> Result<(), StageExit> {
        if self.progress.is_cancelled() {
            Err(StageExit::Cancelled)
        } else {
            Ok(())
        }
    }

    /// The module owning `file`.
    pub fn module_of(&self, file: &Path) -> Option<ModuleId> {
        self.project.module_of(file).map(|(id, _)| id)
    }

    /// Where output for `file` goes: the module's test or production
    /// output directory.
    pub fn output_dir_for(&self, file: &Path) -> Option<PathBuf> {
        let (id, is_test) = self.project.module_of(file)?;
        self.project
            .module(id)
            .output_for(is_test)
            .map(Path::to_path_buf)
    }

    /// Where the generation stage writes sources for `module`.
    pub fn generation_output_dir(&self, module: ModuleId) -> Option<&'a Path> {
        self.project.module(module).generated_root.as_deref()
    }
}
