//! The top-level build driver.
//!
//! One attempt walks `ValidatingConfig → CheckingCacheStatus →
//! RefreshingOutputs → RunningPipeline → Finalizing`. Cleanup runs after
//! every attempt regardless of how it ended: transient graph state is
//! dropped, caches are flushed, and the status ledger is rewritten. When an
//! attempt asks for a full rebuild, the orchestrator runs exactly one more
//! attempt as a rebuild of the whole project.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Instant;

use kiln_cache::{BuildStatus, CacheError, CacheManager, LedgerRead};
use kiln_common::{InternalError, KilnResult};
use kiln_diagnostics::{Diagnostic, DiagnosticCode, DiagnosticSink, Location, Severity};
use tracing::{info, warn};

use crate::compiler::CompilerRegistry;
use crate::context::{BuildFlags, CompileContext};
use crate::model::{ModuleId, ProjectModel};
use crate::pipeline::{flush_caches, CompilerPipeline};
use crate::planner::{plan_chunks, ModuleChunk};
use crate::progress::{wait_until_ready, AlwaysReady, LoggingProgress, ProgressSink, ReadinessGate};
use crate::reconcile::OutputReconciler;
use crate::scope::{CompileScope, ProjectScope};
use crate::status::{status_message, BuildReport, ChunkRounds, ExitStatus, StageExit, StageResult};

/// What one attempt produced, before escalation is decided.
struct Attempt {
    report: BuildReport,
    rebuild_request: Option<String>,
    internal: Option<InternalError>,
}

/// Drives incremental builds of one project.
///
/// The orchestrator owns the project's caches for as long as it lives;
/// builds run one at a time through `&mut self`.
pub struct BuildOrchestrator {
    project: ProjectModel,
    registry: CompilerRegistry,
    caches: CacheManager,
    chunks: Vec<ModuleChunk>,
    progress: Box<dyn ProgressSink>,
    gate: Box<dyn ReadinessGate>,
    outputs_refreshed: bool,
}

impl BuildOrchestrator {
    /// Creates an orchestrator; module chunks are planned once here.
    pub fn new(project: ProjectModel, registry: CompilerRegistry, caches: CacheManager) -> Self {
        let chunks = plan_chunks(&project);
        Self {
            project,
            registry,
            caches,
            chunks,
            progress: Box::new(LoggingProgress::default()),
            gate: Box::new(AlwaysReady),
            outputs_refreshed: false,
        }
    }

    /// Replaces the progress and cancellation sink.
    pub fn with_progress(mut self, progress: impl ProgressSink + 'static) -> Self {
        self.progress = Box::new(progress);
        self
    }

    /// Makes builds wait for `gate` before compiling.
    pub fn with_readiness_gate(mut self, gate: impl ReadinessGate + 'static) -> Self {
        self.gate = Box::new(gate);
        self
    }

    /// The project being built.
    pub fn project(&self) -> &ProjectModel {
        &self.project
    }

    /// The module chunks in build order.
    pub fn chunks(&self) -> &[ModuleChunk] {
        &self.chunks
    }

    /// The caches, for inspection.
    pub fn caches(&mut self) -> &mut CacheManager {
        &mut self.caches
    }

    /// Builds what changed in `scope`.
    pub fn make(&mut self, scope: &dyn CompileScope) -> KilnResult<BuildReport> {
        self.run(scope, BuildFlags::default())
    }

    /// Recompiles everything in `scope` without a full rebuild.
    pub fn compile(&mut self, scope: &dyn CompileScope) -> KilnResult<BuildReport> {
        self.run(
            scope,
            BuildFlags {
                force: true,
                ..BuildFlags::default()
            },
        )
    }

    /// Deletes the outputs of `scope`, clears all caches, and compiles
    /// everything in `scope`.
    pub fn rebuild(&mut self, scope: &dyn CompileScope) -> KilnResult<BuildReport> {
        self.run(
            scope,
            BuildFlags {
                rebuild: true,
                ..BuildFlags::default()
            },
        )
    }

    /// Runs the decision logic of [`Self::make`] without writing anything.
    pub fn is_up_to_date(&mut self, scope: &dyn CompileScope) -> KilnResult<bool> {
        let report = self.run(
            scope,
            BuildFlags {
                dry_run: true,
                ..BuildFlags::default()
            },
        )?;
        Ok(report.status == ExitStatus::UpToDate)
    }

    /// Flushes and releases the caches.
    pub fn close(self) -> Result<(), CacheError> {
        self.caches.close()
    }

    fn run(&mut self, scope: &dyn CompileScope, flags: BuildFlags) -> KilnResult<BuildReport> {
        let first = self.attempt(scope, flags, Vec::new());
        let completed = first.report.status != ExitStatus::Cancelled;
        if flags.rebuild && completed && first.internal.is_none() && first.rebuild_request.is_none()
        {
            self.clear_rebuild_marker();
        }

        let reason = match first.rebuild_request {
            Some(reason) if !flags.dry_run && !flags.rebuild => reason,
            _ => {
                return match first.internal {
                    Some(err) => Err(err),
                    None => Ok(first.report),
                }
            }
        };

        info!(%reason, "performing full rebuild");
        let note = Diagnostic::info(format!("performing full rebuild: {reason}"))
            .with_code(DiagnosticCode::REBUILD_REQUESTED);
        let flags = BuildFlags {
            rebuild: true,
            force: false,
            dry_run: false,
        };
        let second = self.attempt(&ProjectScope, flags, vec![note]);
        if second.internal.is_none()
            && second.rebuild_request.is_none()
            && second.report.status != ExitStatus::Cancelled
        {
            self.clear_rebuild_marker();
        }
        // The requested rebuild runs even when the first attempt failed
        // internally; that failure is still the one reported.
        if let Some(err) = first.internal.or(second.internal) {
            return Err(err);
        }
        let mut report = second.report;
        report.rebuild_reason = Some(reason);
        Ok(report)
    }

    fn clear_rebuild_marker(&self) {
        if let Err(e) = self.caches.ledger().clear_rebuild_marker() {
            warn!(error = %e, "cannot delete rebuild marker");
        }
    }

    fn attempt(
        &mut self,
        scope: &dyn CompileScope,
        flags: BuildFlags,
        carried: Vec<Diagnostic>,
    ) -> Attempt {
        let started = Instant::now();
        let Self {
            project,
            registry,
            caches,
            chunks,
            progress,
            gate,
            outputs_refreshed,
        } = self;

        let diagnostics = DiagnosticSink::new();
        for diag in carried {
            diagnostics.emit(diag);
        }
        let ctx = CompileContext::new(project, scope, &diagnostics, &**progress, flags);
        info!(
            project = project.name(),
            rebuild = flags.rebuild,
            force = flags.force,
            dry_run = flags.dry_run,
            "build started"
        );

        let mut stages = Stages {
            ctx: &ctx,
            registry,
            caches: &mut *caches,
            chunks,
            gate: &**gate,
            outputs_refreshed: &mut *outputs_refreshed,
            chunk_rounds: Vec::new(),
            validated: false,
        };
        let outcome = stages.run();
        let chunk_rounds = std::mem::take(&mut stages.chunk_rounds);
        let validated = stages.validated;

        // Cleanup.
        caches.graph().reset_state();
        let (did_work, cancelled, internal) = match outcome {
            Ok(did_work) => (did_work, false, None),
            Err(StageExit::OutOfDate) => (true, false, None),
            Err(StageExit::Cancelled) => (false, true, None),
            Err(StageExit::FatalErrors) => (false, false, None),
            Err(StageExit::Internal(err)) => (false, false, Some(err)),
        };
        if let Some(err) = &internal {
            let mut diag = Diagnostic::error(format!("internal error: {}", err.message))
                .with_code(DiagnosticCode::INTERNAL);
            if let Some(origin) = &err.origin {
                diag = diag.with_origin(origin.clone());
            }
            ctx.emit(diag);
        }
        // A configuration error leaves caches and ledger untouched.
        if validated && !flags.dry_run {
            flush_caches(&ctx, caches);
            let ledger = caches.ledger();
            if let Some(reason) = ctx.rebuild_reason() {
                if let Err(e) = ledger.write_rebuild_marker(&reason) {
                    warn!(error = %e, "cannot write rebuild marker");
                }
            }
            let epoch = caches.epoch().unwrap_or_else(|e| {
                warn!(error = %e, "cannot read cache storage stamp");
                0
            });
            if let Err(e) = ledger.write(&BuildStatus::current(internal.is_some(), epoch)) {
                warn!(error = %e, "cannot write build status");
            }
        }

        let status = if cancelled {
            ExitStatus::Cancelled
        } else if ctx.has_errors() {
            ExitStatus::Errors
        } else if did_work {
            ExitStatus::Success
        } else {
            ExitStatus::UpToDate
        };

        let duration = started.elapsed();
        let errors = ctx.message_count(Severity::Error);
        let warnings = ctx.message_count(Severity::Warning);
        let message = status_message(status, errors, warnings, duration);
        info!(%status, errors, warnings, ?duration, "{message}");

        let rebuild_request = ctx.rebuild_reason();
        Attempt {
            report: BuildReport {
                status,
                did_work,
                rebuild: flags.rebuild,
                rebuild_reason: rebuild_request.clone(),
                chunks: chunk_rounds,
                errors,
                warnings,
                diagnostics: diagnostics.take_all(),
                message,
                duration,
            },
            rebuild_request,
            internal,
        }
    }
}

/// The stages of one attempt, borrowing what they need from the
/// orchestrator.
struct Stages<'c, 'a> {
    ctx: &'c CompileContext<'a>,
    registry: &'c CompilerRegistry,
    caches: &'c mut CacheManager,
    chunks: &'c [ModuleChunk],
    gate: &'c dyn ReadinessGate,
    outputs_refreshed: &'c mut bool,
    chunk_rounds: Vec<ChunkRounds>,
    validated: bool,
}

impl Stages<'_, '_> {
    fn run(&mut self) -> StageResult {
        self.validate_config()?;
        self.validated = true;
        if !self.ctx.is_rebuild() && self.check_cache_status()? {
            return Ok(false);
        }

        if !self.ctx.is_dry_run() {
            let epoch = self.caches.epoch().unwrap_or_else(|e| {
                warn!(error = %e, "cannot read cache storage stamp");
                0
            });
            if let Err(e) = self.caches.ledger().write(&BuildStatus::current(true, epoch)) {
                warn!(error = %e, "cannot write build status");
            }
        }

        self.refresh_outputs()?;

        let reconciler = OutputReconciler::new(self.ctx);
        let affected = self.ctx.scope().affected_modules(self.ctx.project());
        if self.ctx.is_rebuild() {
            reconciler.delete_all(self.caches, &affected);
            if let Err(e) = self.caches.clear_all() {
                warn!(error = %e, "cannot clear build caches");
                self.ctx
                    .request_rebuild_next_time(format!("cannot clear build caches: {e}"));
            }
        } else if self.ctx.flags().force && self.ctx.project().settings().clear_output_directory {
            let owned = self.exclusively_owned(&affected);
            if !owned.is_empty() {
                reconciler.delete_all(self.caches, &owned);
                // Outputs are gone; keep the sources dirty until recompiled.
                let project = self.ctx.project();
                for id in &owned {
                    for file in project.source_files(*id) {
                        self.caches.outputs().mark(&file);
                    }
                }
            }
        }

        // Tasks may write; a dry run never runs them.
        let run_tasks = !self.ctx.is_dry_run();
        if run_tasks {
            for task in self.registry.before_tasks() {
                self.ctx.check_cancelled()?;
                if !task.execute(self.ctx) {
                    info!(task = task.name(), "before-build task stopped the build");
                    return Err(StageExit::Cancelled);
                }
            }
        }

        wait_until_ready(
            self.gate,
            self.ctx.progress(),
            self.ctx.project().settings().readiness_poll,
        )?;

        let mut pipeline = CompilerPipeline::new(self.ctx, self.registry, self.chunks);
        let result = pipeline.run(self.caches);
        self.chunk_rounds = pipeline.chunk_rounds().to_vec();

        match result {
            Ok(_) | Err(StageExit::FatalErrors) if run_tasks => {
                for task in self.registry.after_tasks() {
                    if !task.execute(self.ctx) {
                        info!(task = task.name(), "after-build task stopped the build");
                        return Err(StageExit::Cancelled);
                    }
                }
            }
            _ => {}
        }
        result
    }

    fn validate_config(&self) -> Result<(), StageExit> {
        let ctx = self.ctx;
        let project = ctx.project();
        let affected = ctx.scope().affected_modules(project);

        for id in &affected {
            let module = project.module(*id);
            for root in &module.source_roots {
                if module.output_for(root.is_test).is_some() || !has_files(&root.path) {
                    continue;
                }
                let kind = if root.is_test { "test output" } else { "output" };
                ctx.emit(
                    Diagnostic::error(format!(
                        "module '{}' has sources but no {kind} directory",
                        module.name
                    ))
                    .with_code(DiagnosticCode::MISSING_OUTPUT)
                    .with_location(Location::file(&root.path)),
                );
            }
        }

        if ctx.is_rebuild() && project.settings().clear_output_directory {
            let sources: Vec<PathBuf> = project
                .modules()
                .iter()
                .flat_map(|m| m.all_roots())
                .map(|r| r.path)
                .collect();
            for id in &affected {
                for output in project.module(*id).output_dirs() {
                    for source in &sources {
                        if output.starts_with(source) || source.starts_with(output) {
                            ctx.emit(
                                Diagnostic::error(format!(
                                    "output directory {} intersects source root {}; clearing it would delete sources",
                                    output.display(),
                                    source.display()
                                ))
                                .with_code(DiagnosticCode::OUTPUT_SOURCE_OVERLAP),
                            );
                        }
                    }
                }
            }
        }

        if !self.registry.validate_configuration(ctx) && !ctx.has_errors() {
            ctx.emit(
                Diagnostic::error("a compiler rejected the project configuration")
                    .with_code(DiagnosticCode::COMPILER_CONFIGURATION),
            );
        }

        if ctx.has_errors() {
            return Err(StageExit::FatalErrors);
        }
        Ok(())
    }

    /// Returns `true` if the caches cannot be trusted and a rebuild was
    /// requested instead of running the stages.
    fn check_cache_status(&mut self) -> Result<bool, StageExit> {
        let ctx = self.ctx;
        let ledger = self.caches.ledger();
        if ctx.is_dry_run() && matches!(ledger.read(), LedgerRead::Missing) {
            return Err(StageExit::OutOfDate);
        }

        // A dry run leaves the reports for the build that acts on them.
        let corruption = if ctx.is_dry_run() {
            self.caches.corruption_reports().to_vec()
        } else {
            self.caches.take_corruption_reports()
        };
        let reason = if !corruption.is_empty() {
            Some(format!("build caches are corrupted: {}", corruption.join("; ")))
        } else {
            match self.caches.epoch() {
                Ok(epoch) => ledger.rebuild_reason(epoch),
                Err(e) => Some(format!("cannot read cache storage stamp: {e}")),
            }
        };

        match reason {
            None => Ok(false),
            Some(_) if ctx.is_dry_run() => Err(StageExit::OutOfDate),
            Some(reason) => {
                ctx.request_rebuild_next_time(reason);
                Ok(true)
            }
        }
    }

    fn refresh_outputs(&mut self) -> Result<(), StageExit> {
        let ctx = self.ctx;
        if *self.outputs_refreshed && !ctx.project().settings().refresh_outputs_on_start {
            return Ok(());
        }
        let errors_before = ctx.message_count(Severity::Error);
        OutputReconciler::new(ctx).refresh(&ctx.project().all_output_dirs())?;
        if ctx.message_count(Severity::Error) > errors_before {
            return Err(StageExit::FatalErrors);
        }
        if !ctx.is_dry_run() {
            *self.outputs_refreshed = true;
        }
        Ok(())
    }

    /// Modules of `affected` fully covered by the scope whose output roots
    /// no module outside `affected` writes to.
    fn exclusively_owned(&self, affected: &[ModuleId]) -> Vec<ModuleId> {
        let project = self.ctx.project();
        let scope = self.ctx.scope();
        let in_scope: BTreeSet<ModuleId> = affected.iter().copied().collect();
        let foreign_outputs: BTreeSet<PathBuf> = project
            .modules()
            .iter()
            .filter(|m| !in_scope.contains(&m.id))
            .flat_map(|m| m.output_dirs())
            .map(|p| p.to_path_buf())
            .collect();
        affected
            .iter()
            .copied()
            .filter(|id| {
                project
                    .module(*id)
                    .output_dirs()
                    .iter()
                    .all(|dir| !foreign_outputs.contains(*dir))
            })
            .filter(|id| {
                project
                    .source_files(*id)
                    .iter()
                    .all(|file| scope.belongs(project, file))
            })
            .collect()
    }
}

fn has_files(dir: &std::path::Path) -> bool {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .any(|e| e.file_type().is_file())
}
