//! The translation stage: a per-chunk fixpoint over changed symbols.
//!
//! Round 0 of a chunk compiles every file whose validity state changed or
//! that an earlier build marked for recompilation. After each round the
//! dependency graph is asked which files reference a symbol that changed;
//! those files of the chunk form the next round, files of later chunks are
//! marked so their own round 0 picks them up. The loop ends when a round
//! discovers no new dependents or any error has been reported.

use std::collections::BTreeSet;
use std::path::PathBuf;

use kiln_cache::{CacheManager, DependentsFilter};
use tracing::{debug, info};

use crate::compiler::{validity_table_name, ContentKind, StageKind, Translator};
use crate::context::CompileContext;
use crate::model::ModuleId;
use crate::pipeline::check_cache_corruption;
use crate::planner::ModuleChunk;
use crate::reconcile::OutputReconciler;
use crate::sink::TranslatorsOutputSink;
use crate::status::{ChunkRounds, StageExit, StageResult};

/// Bookkeeping of one chunk, kept across its rounds.
#[derive(Default)]
struct ChunkState {
    filter: DependentsFilter,
    compiled: BTreeSet<PathBuf>,
    failed: BTreeSet<PathBuf>,
    all_dependent: BTreeSet<PathBuf>,
    to_recompile: BTreeSet<PathBuf>,
    rounds: usize,
}

/// Runs the translators over module chunks in dependency order.
pub struct TranslationRoundEngine<'c, 'a> {
    ctx: &'c CompileContext<'a>,
    translators: Vec<&'c dyn Translator>,
    sink: TranslatorsOutputSink,
    processed: BTreeSet<ModuleId>,
    produced_kinds: BTreeSet<ContentKind>,
    chunk_rounds: Vec<ChunkRounds>,
}

impl<'c, 'a> TranslationRoundEngine<'c, 'a> {
    /// Creates an engine running `translators` in the given order.
    pub fn new(ctx: &'c CompileContext<'a>, translators: Vec<&'c dyn Translator>) -> Self {
        Self {
            ctx,
            translators,
            sink: TranslatorsOutputSink::new(),
            processed: BTreeSet::new(),
            produced_kinds: BTreeSet::new(),
            chunk_rounds: Vec::new(),
        }
    }

    /// Modules fully translated so far in this build.
    pub fn processed_modules(&self) -> &BTreeSet<ModuleId> {
        &self.processed
    }

    /// Round counts of every chunk translated so far.
    pub fn chunk_rounds(&self) -> &[ChunkRounds] {
        &self.chunk_rounds
    }

    /// Consumes the engine, returning the round counts.
    pub fn into_chunk_rounds(self) -> Vec<ChunkRounds> {
        self.chunk_rounds
    }

    /// Translates `chunks` in order; returns whether anything was compiled.
    ///
    /// Postponed output is flushed at the end whatever the outcome.
    pub fn run(&mut self, caches: &mut CacheManager, chunks: &[ModuleChunk]) -> StageResult {
        let result = self.run_chunks(caches, chunks);
        if !self.ctx.is_dry_run() {
            self.sink.flush_postponed(self.ctx, caches);
        }
        result
    }

    fn run_chunks(&mut self, caches: &mut CacheManager, chunks: &[ModuleChunk]) -> StageResult {
        let affected: BTreeSet<ModuleId> = self
            .ctx
            .scope()
            .affected_modules(self.ctx.project())
            .into_iter()
            .collect();
        let mut did_work = false;
        for (index, chunk) in chunks.iter().enumerate() {
            self.ctx.check_cancelled()?;
            if !chunk.modules().iter().any(|m| affected.contains(m)) {
                continue;
            }
            let names = chunk.names(self.ctx.project());
            self.ctx.progress().report(
                index as f64 / chunks.len() as f64,
                &format!("translating {}", names.join(", ")),
            );
            did_work |= self.translate_chunk(caches, chunk)?;
        }
        Ok(did_work)
    }

    fn translate_chunk(&mut self, caches: &mut CacheManager, chunk: &ModuleChunk) -> StageResult {
        let mut state = ChunkState::default();
        let result = self.run_rounds(caches, chunk, &mut state);

        check_cache_corruption(self.ctx, caches);

        self.chunk_rounds.push(ChunkRounds {
            modules: chunk.names(self.ctx.project()),
            rounds: state.rounds,
        });

        let succeeded = result.is_ok() && !self.ctx.has_errors();
        if self.ctx.is_dry_run() {
            caches.graph().discard_staged();
        } else if succeeded {
            let graph = caches.graph();
            graph.commit();
            graph.clear_traverse_roots();
            self.processed.extend(chunk.modules().iter().copied());
            let outputs = caches.outputs();
            for file in state.to_recompile.iter().chain(&state.failed) {
                outputs.mark(file);
            }
        } else {
            caches.graph().discard_staged();
            self.sink.discard_postponed_for(&state.compiled);
            let outputs = caches.outputs();
            for file in state
                .compiled
                .iter()
                .chain(&state.failed)
                .chain(&state.all_dependent)
                .chain(&state.to_recompile)
            {
                outputs.mark(file);
            }
            debug!(
                marked = state.compiled.len() + state.all_dependent.len(),
                "chunk did not complete, sources marked for recompilation"
            );
        }

        let did_work = result?;
        if self.ctx.has_errors() {
            return Err(StageExit::FatalErrors);
        }
        Ok(did_work)
    }

    /// Files of `chunk` in the compile scope, sorted.
    fn chunk_files(&self, chunk: &ModuleChunk) -> Vec<PathBuf> {
        let project = self.ctx.project();
        let scope = self.ctx.scope();
        let mut files: Vec<PathBuf> = chunk
            .modules()
            .iter()
            .flat_map(|id| project.source_files(*id))
            .filter(|f| scope.belongs(project, f))
            .collect();
        files.sort();
        files.dedup();
        files
    }

    fn belongs_to_chunk(&self, chunk: &ModuleChunk, file: &std::path::Path) -> bool {
        self.ctx.module_of(file).is_some_and(|m| chunk.contains(m))
    }

    fn run_rounds(
        &mut self,
        caches: &mut CacheManager,
        chunk: &ModuleChunk,
        state: &mut ChunkState,
    ) -> StageResult {
        let ctx = self.ctx;
        let mut did_work = false;

        let reconciler = OutputReconciler::new(ctx);
        for translator in &self.translators {
            let removed = reconciler.clear_if_stale(caches, translator.id(), chunk)?;
            if removed > 0 {
                debug!(translator = translator.id(), removed, "cleared orphaned outputs");
                did_work = true;
            }
        }

        let force_all = ctx.flags().force || ctx.is_rebuild();
        // Chunk files seen so far; a rescan only adds files not in here.
        let mut known = BTreeSet::new();
        let mut next_round: Option<BTreeSet<PathBuf>> = None;
        loop {
            ctx.check_cancelled()?;
            state.rounds += 1;
            self.sink.start_round();

            // Dependents of the previous round skip the validity check.
            let dependents = next_round.take().unwrap_or_default();
            let mut candidates: Vec<PathBuf> = if dependents.is_empty() {
                self.chunk_files(chunk)
            } else {
                dependents.iter().cloned().collect()
            };
            known.extend(candidates.iter().cloned());

            for (i, translator) in self.translators.iter().enumerate() {
                ctx.check_cancelled()?;
                if translator
                    .input_kinds()
                    .iter()
                    .any(|k| self.produced_kinds.contains(k))
                {
                    for file in self.chunk_files(chunk) {
                        if known.insert(file.clone()) {
                            candidates.push(file);
                        }
                    }
                }

                let table = validity_table_name(StageKind::Translation, translator.id());
                let files: Vec<PathBuf> = candidates
                    .iter()
                    .filter(|f| translator.is_applicable_to(f))
                    .filter(|f| {
                        force_all
                            || dependents.contains(*f)
                            || is_dirty(caches, &table, *translator, f)
                    })
                    .cloned()
                    .collect();
                if files.is_empty() {
                    continue;
                }
                if ctx.is_dry_run() {
                    return Err(StageExit::OutOfDate);
                }

                debug!(
                    translator = translator.id(),
                    round = state.rounds - 1,
                    files = files.len(),
                    "translating"
                );
                translator
                    .translate(ctx, chunk, &files, &mut self.sink)
                    .map_err(|e| e.with_origin(translator.id()))?;
                self.sink
                    .finish_translator(ctx, caches, *translator, &self.translators[i + 1..]);
                self.produced_kinds
                    .extend(translator.output_kinds().iter().copied());
                did_work = true;
            }

            state.compiled.extend(self.sink.compiled().iter().cloned());
            state.failed.extend(self.sink.failed().iter().cloned());

            if ctx.is_rebuild() {
                break;
            }
            let compiled_something =
                !self.sink.compiled().is_empty() || !self.sink.failed().is_empty();
            if !compiled_something && !caches.graph().has_unprocessed_traverse_roots() {
                break;
            }

            let graph = caches.graph();
            for file in self.sink.failed() {
                graph.mark_changed(file);
            }
            let round_files: BTreeSet<&PathBuf> = self
                .sink
                .compiled()
                .iter()
                .chain(self.sink.failed())
                .collect();
            let processed = &self.processed;
            let dependents = graph.find_dependents(&mut state.filter, |file| {
                round_files.contains(&file.to_path_buf())
                    || ctx.module_of(file).is_some_and(|m| processed.contains(&m))
            });
            graph.clear_traverse_roots();
            info!(
                round = state.rounds - 1,
                dependents = dependents.len(),
                "dependency analysis"
            );

            let mut in_chunk = BTreeSet::new();
            for file in dependents {
                state.all_dependent.insert(file.clone());
                if self.belongs_to_chunk(chunk, &file)
                    && ctx.scope().belongs(ctx.project(), &file)
                    && file.is_file()
                {
                    in_chunk.insert(file);
                } else {
                    state.to_recompile.insert(file);
                }
            }

            if ctx.has_errors() || in_chunk.is_empty() {
                break;
            }
            next_round = Some(in_chunk);
        }
        Ok(did_work)
    }
}

/// A file needs translating if it was marked by an earlier build or its
/// validity state differs from the stored one.
fn is_dirty(
    caches: &mut CacheManager,
    table: &str,
    translator: &dyn Translator,
    file: &std::path::Path,
) -> bool {
    if caches.outputs().is_marked(file) {
        return true;
    }
    match translator.validity_state(file) {
        Some(current) => caches.validity(table).get(file) != Some(current),
        None => false,
    }
}
