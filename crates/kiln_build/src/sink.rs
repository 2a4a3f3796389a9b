//! Buffers translator output and persists it into the caches.
//!
//! Each item is either committed right after the translator that produced
//! it finishes, or postponed while a translator later in the same round
//! would still compile its source. Postponed items are flushed once at the
//! end of the translation stage.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use kiln_cache::{CacheManager, OutputRecord, ValidityState};
use kiln_diagnostics::{Diagnostic, DiagnosticCode, Location};
use tracing::debug;

use crate::compiler::{validity_table_name, CompiledSource, OutputSink, StageKind, Translator};
use crate::context::CompileContext;
use crate::reconcile::{delete_path, prune_empty_dirs};

/// A compiled source waiting to be persisted.
struct SinkItem {
    translator: String,
    compiled: CompiledSource,
    state: Option<ValidityState>,
}

enum SinkEntry {
    /// A later translator of this round may still compile the source.
    Pending(SinkItem),
    /// Nothing else will touch the source this round.
    Ready(SinkItem),
}

/// Collects what translators produce during the translation stage.
#[derive(Default)]
pub struct TranslatorsOutputSink {
    incoming: Vec<CompiledSource>,
    postponed: Vec<SinkItem>,
    compiled: BTreeSet<PathBuf>,
    failed: BTreeSet<PathBuf>,
}

impl OutputSink for TranslatorsOutputSink {
    fn add(&mut self, compiled: CompiledSource) {
        self.incoming.push(compiled);
    }

    fn add_failed(&mut self, source: &Path) {
        self.failed.insert(source.to_path_buf());
    }
}

impl TranslatorsOutputSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sources compiled successfully since the last [`Self::start_round`].
    pub fn compiled(&self) -> &BTreeSet<PathBuf> {
        &self.compiled
    }

    /// Sources that failed since the last [`Self::start_round`].
    pub fn failed(&self) -> &BTreeSet<PathBuf> {
        &self.failed
    }

    /// Forgets the per-round compiled and failed sets.
    pub fn start_round(&mut self) {
        self.compiled.clear();
        self.failed.clear();
    }

    /// Number of items still postponed.
    pub fn postponed_len(&self) -> usize {
        self.postponed.len()
    }

    /// Resolves what `translator` just produced.
    ///
    /// Symbols are staged in the dependency graph immediately so that the
    /// round's dependency query sees them. Items whose source one of
    /// `remaining` would also compile are postponed; the rest are committed.
    pub fn finish_translator(
        &mut self,
        ctx: &CompileContext<'_>,
        caches: &mut CacheManager,
        translator: &dyn Translator,
        remaining: &[&dyn Translator],
    ) {
        let incoming = std::mem::take(&mut self.incoming);
        for compiled in incoming {
            self.failed.remove(&compiled.source);
            self.compiled.insert(compiled.source.clone());
            if let Some(symbols) = &compiled.symbols {
                caches.graph().stage_file(&compiled.source, symbols);
            }
            let item = SinkItem {
                translator: translator.id().to_string(),
                state: translator.validity_state(&compiled.source),
                compiled,
            };
            let entry = if remaining.iter().any(|t| t.is_applicable_to(&item.compiled.source)) {
                SinkEntry::Pending(item)
            } else {
                SinkEntry::Ready(item)
            };
            match entry {
                SinkEntry::Ready(item) => commit(ctx, caches, item),
                SinkEntry::Pending(item) => {
                    debug!(source = %item.compiled.source.display(), "output postponed");
                    self.postponed.push(item);
                }
            }
        }
    }

    /// Drops postponed items of `sources` without persisting them.
    pub fn discard_postponed_for(&mut self, sources: &BTreeSet<PathBuf>) {
        self.postponed
            .retain(|item| !sources.contains(&item.compiled.source));
    }

    /// Commits every postponed item.
    pub fn flush_postponed(&mut self, ctx: &CompileContext<'_>, caches: &mut CacheManager) {
        for item in std::mem::take(&mut self.postponed) {
            commit(ctx, caches, item);
        }
    }
}

/// Persists one item: records its outputs, drops outputs of the previous
/// compilation that were not produced again, stores the validity state, and
/// clears the recompile mark.
fn commit(ctx: &CompileContext<'_>, caches: &mut CacheManager, item: SinkItem) {
    let SinkItem {
        translator,
        compiled,
        state,
    } = item;
    let project = ctx.project();
    let module = match project.module_of(&compiled.source) {
        Some((id, _)) => project.module(id).name.clone(),
        None => return,
    };

    let table = validity_table_name(StageKind::Translation, &translator);
    let parts = caches.parts(&table);
    let previous = parts.outputs.record_of(&translator, &compiled.source).cloned();
    if let Some(previous) = previous {
        let mut touched = BTreeSet::new();
        for stale in previous
            .outputs
            .iter()
            .filter(|o| !compiled.outputs.contains(o))
        {
            match delete_path(stale) {
                Ok(()) => {
                    if let Some(parent) = stale.parent() {
                        touched.insert(parent.to_path_buf());
                    }
                }
                Err(e) => ctx.emit(
                    Diagnostic::warning(format!("cannot delete {}: {e}", stale.display()))
                        .with_code(DiagnosticCode::DELETE_FAILED)
                        .with_location(Location::file(stale)),
                ),
            }
        }
        prune_empty_dirs(touched, &project.all_output_dirs());
    }

    parts.outputs.record(
        &translator,
        &compiled.source,
        OutputRecord {
            module,
            outputs: compiled.outputs,
        },
    );
    match state {
        Some(state) => parts.validity.put(&compiled.source, state),
        None => {
            parts.validity.remove(&compiled.source);
        }
    }
    parts.outputs.unmark(&compiled.source);
}
