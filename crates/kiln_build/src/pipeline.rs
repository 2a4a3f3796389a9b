//! Runs the compiler stages in their fixed order.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use kiln_cache::{CacheManager, ValidityState};
use kiln_diagnostics::{Diagnostic, DiagnosticCode};
use tracing::{debug, warn};

use crate::compiler::{validity_table_name, CompilerRegistry, FileProcessor, ProcessingItem, StageKind};
use crate::context::CompileContext;
use crate::planner::ModuleChunk;
use crate::status::{ChunkRounds, StageExit, StageResult};
use crate::translate::TranslationRoundEngine;

/// Turns tables found corrupted since the last check into a rebuild
/// request. Returns `true` if there were any.
pub(crate) fn check_cache_corruption(ctx: &CompileContext<'_>, caches: &mut CacheManager) -> bool {
    let reports = caches.take_corruption_reports();
    if reports.is_empty() {
        return false;
    }
    let reason = format!("build caches are corrupted: {}", reports.join("; "));
    warn!(%reason, "cache corruption detected during build");
    ctx.request_rebuild_next_time(reason.clone());
    ctx.emit(Diagnostic::error(reason).with_code(DiagnosticCode::REBUILD_REQUESTED));
    true
}

/// Persists every table; a failure requests a rebuild instead of failing
/// the build.
pub(crate) fn flush_caches(ctx: &CompileContext<'_>, caches: &mut CacheManager) {
    if let Err(e) = caches.flush_all() {
        warn!(error = %e, "failed to persist build caches");
        ctx.emit(
            Diagnostic::warning(format!("cannot persist build caches: {e}"))
                .with_code(DiagnosticCode::CACHE_FLUSH_FAILED),
        );
        ctx.request_rebuild_next_time(format!("cannot persist build caches: {e}"));
    }
}

/// The ordered stages of one build.
pub struct CompilerPipeline<'c, 'a> {
    ctx: &'c CompileContext<'a>,
    registry: &'c CompilerRegistry,
    chunks: &'c [ModuleChunk],
    chunk_rounds: Vec<ChunkRounds>,
}

impl<'c, 'a> CompilerPipeline<'c, 'a> {
    /// Creates a pipeline over `chunks`, already in dependency order.
    pub fn new(
        ctx: &'c CompileContext<'a>,
        registry: &'c CompilerRegistry,
        chunks: &'c [ModuleChunk],
    ) -> Self {
        Self {
            ctx,
            registry,
            chunks,
            chunk_rounds: Vec::new(),
        }
    }

    /// Round counts the translation stage recorded.
    pub fn chunk_rounds(&self) -> &[ChunkRounds] {
        &self.chunk_rounds
    }

    /// Runs every stage; returns whether any performed effective work.
    ///
    /// Caches are flushed after each stage. A stage that reports errors
    /// ends the pipeline with [`StageExit::FatalErrors`].
    pub fn run(&mut self, caches: &mut CacheManager) -> StageResult {
        let ctx = self.ctx;
        let mut did_work = false;
        for stage in StageKind::PIPELINE {
            ctx.check_cancelled()?;
            let result = if stage == StageKind::Translation {
                let mut engine = TranslationRoundEngine::new(ctx, self.registry.ordered_translators());
                let result = engine.run(caches, self.chunks);
                self.chunk_rounds = engine.into_chunk_rounds();
                result
            } else {
                self.run_processors(stage, caches)
            };
            check_cache_corruption(ctx, caches);
            if !ctx.is_dry_run() {
                flush_caches(ctx, caches);
            }
            let stage_work = result?;
            debug!(%stage, did_work = stage_work, "stage finished");
            did_work |= stage_work;
            if ctx.has_errors() {
                return Err(StageExit::FatalErrors);
            }
        }
        Ok(did_work)
    }

    fn run_processors(&self, stage: StageKind, caches: &mut CacheManager) -> StageResult {
        let mut deferred: Vec<(String, Vec<(PathBuf, ValidityState)>)> = Vec::new();
        let result = self.run_processors_deferred(stage, caches, &mut deferred);
        // Applied even when the stage stopped early, so that work already
        // done is not repeated.
        if !self.ctx.is_dry_run() {
            for (table, states) in deferred {
                let store = caches.validity(&table);
                for (file, state) in states {
                    store.put(&file, state);
                }
            }
        }
        result
    }

    fn run_processors_deferred(
        &self,
        stage: StageKind,
        caches: &mut CacheManager,
        deferred: &mut Vec<(String, Vec<(PathBuf, ValidityState)>)>,
    ) -> StageResult {
        let ctx = self.ctx;
        let mut did_work = false;
        for processor in self.registry.processors_for(stage) {
            ctx.check_cancelled()?;
            let table = validity_table_name(stage, processor.id());
            let items = processor
                .processing_items(ctx)
                .map_err(|e| e.with_origin(processor.id()))?;

            let outdated = outdated_files(ctx, caches, &table, &items);
            let force = ctx.flags().force || ctx.is_rebuild();
            let changed: Vec<ProcessingItem> = {
                let store = caches.validity(&table);
                items
                    .into_iter()
                    .filter(|item| force || store.get(&item.file) != Some(item.state))
                    .collect()
            };

            if ctx.is_dry_run() {
                if !changed.is_empty() || !outdated.is_empty() {
                    return Err(StageExit::OutOfDate);
                }
                continue;
            }

            if !outdated.is_empty() {
                process_outdated(ctx, processor, &outdated)?;
                let store = caches.validity(&table);
                for file in &outdated {
                    store.remove(file);
                }
                did_work = true;
            }

            if changed.is_empty() {
                continue;
            }
            debug!(%stage, processor = processor.id(), files = changed.len(), "processing");
            let done: BTreeSet<PathBuf> = processor
                .process(ctx, &changed)
                .map_err(|e| e.with_origin(processor.id()))?
                .into_iter()
                .collect();
            let states = changed
                .into_iter()
                .filter(|item| done.contains(&item.file))
                .map(|item| (item.file, item.state))
                .collect();
            deferred.push((table, states));
            did_work = true;
        }
        Ok(did_work)
    }
}

/// Files the processor handled before that are no longer among its items
/// and belong to the scope.
fn outdated_files(
    ctx: &CompileContext<'_>,
    caches: &mut CacheManager,
    table: &str,
    items: &[ProcessingItem],
) -> Vec<PathBuf> {
    let current: BTreeSet<&Path> = items.iter().map(|i| i.file.as_path()).collect();
    caches
        .validity(table)
        .paths()
        .filter(|p| !current.contains(p))
        .filter(|p| ctx.scope().belongs(ctx.project(), p) || !p.exists())
        .map(Path::to_path_buf)
        .collect()
}

fn process_outdated(
    ctx: &CompileContext<'_>,
    processor: &dyn FileProcessor,
    files: &[PathBuf],
) -> Result<(), StageExit> {
    processor
        .process_outdated(ctx, files)
        .map_err(|e| StageExit::Internal(e.with_origin(processor.id())))
}
