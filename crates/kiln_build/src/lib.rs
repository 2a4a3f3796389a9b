//! The incremental build orchestrator.
//!
//! [`BuildOrchestrator`] decides what must be rebuilt and drives a fixed
//! pipeline of compiler stages over module chunks in dependency order:
//!
//! 1. [`planner`] groups modules into strongly-connected chunks and orders them.
//! 2. [`pipeline`] runs the stages in their fixed order; file-processing
//!    stages use per-compiler validity tables to skip unchanged inputs.
//! 3. [`translate`] runs the translation stage as a per-chunk fixpoint:
//!    recompiled files whose symbols changed pull their dependents into the
//!    next round until no new dependents appear.
//! 4. [`reconcile`] keeps output directories consistent with sources.
//!
//! Compilers plug in through the traits in [`compiler`]; the project layout
//! comes from [`model`], and callers choose what to build with a
//! [`scope::CompileScope`].

#![warn(missing_docs)]

pub mod compiler;
pub mod context;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod planner;
pub mod progress;
pub mod reconcile;
pub mod scope;
pub mod sink;
pub mod status;
pub mod translate;

pub use compiler::{
    validity_table_name, BuildTask, CompiledSource, Compiler, CompilerRegistry, CompilerSorter,
    ContentKind, FileProcessor, OutputSink, ProcessingItem, StageKind, Translator,
};
pub use context::{BuildFlags, CompileContext};
pub use model::{BuildSettings, Module, ModuleId, ProjectModel, SourceRoot};
pub use orchestrator::BuildOrchestrator;
pub use pipeline::CompilerPipeline;
pub use planner::{plan_chunks, ModuleChunk};
pub use progress::{AlwaysReady, CancellationToken, LoggingProgress, ProgressSink, ReadinessGate};
pub use reconcile::{OutputReconciler, RefreshReport};
pub use scope::{CompileScope, CompositeScope, FileSetScope, ModuleScope, ProjectScope};
pub use sink::TranslatorsOutputSink;
pub use status::{status_message, BuildReport, ChunkRounds, ExitStatus, StageExit};
pub use translate::TranslationRoundEngine;
