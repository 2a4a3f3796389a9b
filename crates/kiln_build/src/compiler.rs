//! Compiler plug-in traits and the registry that holds them.
//!
//! Every compiler belongs to one [`StageKind`]. Translation-stage compilers
//! implement [`Translator`] and take part in the dependency-driven round
//! loop; compilers of every other stage implement [`FileProcessor`] and run
//! once per build over the items they report.

use std::fmt;
use std::path::{Path, PathBuf};

use kiln_cache::{FileSymbols, ValidityState};
use kiln_common::KilnResult;

use crate::context::CompileContext;
use crate::planner::ModuleChunk;

/// The fixed stages of the build pipeline.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum StageKind {
    /// Produces new sources into generated roots.
    SourceGeneration,
    /// Rewrites sources before translation.
    SourceInstrumentation,
    /// Inspects or transforms sources before translation.
    SourceProcessing,
    /// Turns sources into outputs; runs as a fixpoint over module chunks.
    Translation,
    /// Rewrites translated outputs.
    ClassInstrumentation,
    /// Post-processes translated outputs.
    ClassPostProcessing,
    /// Assembles outputs into packages.
    Packaging,
    /// Checks the final result.
    Validation,
}

impl StageKind {
    /// The stages in execution order.
    pub const PIPELINE: [StageKind; 8] = [
        StageKind::SourceGeneration,
        StageKind::SourceInstrumentation,
        StageKind::SourceProcessing,
        StageKind::Translation,
        StageKind::ClassInstrumentation,
        StageKind::ClassPostProcessing,
        StageKind::Packaging,
        StageKind::Validation,
    ];

    /// Short stable name, also used to key validity tables.
    pub fn name(self) -> &'static str {
        match self {
            StageKind::SourceGeneration => "generation",
            StageKind::SourceInstrumentation => "source-instrumentation",
            StageKind::SourceProcessing => "source-processing",
            StageKind::Translation => "translation",
            StageKind::ClassInstrumentation => "output-instrumentation",
            StageKind::ClassPostProcessing => "post-processing",
            StageKind::Packaging => "packaging",
            StageKind::Validation => "validation",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name of the validity table a compiler of `stage` keeps its states in.
pub fn validity_table_name(stage: StageKind, compiler_id: &str) -> String {
    format!("{}-{}", stage.name(), compiler_id)
}

/// A kind of file content a translator consumes or produces.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ContentKind(pub &'static str);

/// Behavior shared by all compilers.
pub trait Compiler {
    /// Stable identifier; keys the compiler's validity table.
    fn id(&self) -> &str;

    /// Human-readable description for progress output.
    fn description(&self) -> String {
        self.id().to_string()
    }

    /// Checks the project configuration before anything is touched.
    ///
    /// Returning `false` aborts the build; the compiler is expected to have
    /// reported why.
    fn validate_configuration(&self, _ctx: &CompileContext<'_>) -> bool {
        true
    }
}

/// A file a processor wants to handle, with its current validity state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessingItem {
    /// The file.
    pub file: PathBuf,
    /// Its state as seen by the processor.
    pub state: ValidityState,
}

/// A compiler of any non-translation stage.
pub trait FileProcessor: Compiler {
    /// The stage the processor runs in.
    fn stage(&self) -> StageKind;

    /// Every file the processor is responsible for in this build.
    fn processing_items(&self, ctx: &CompileContext<'_>) -> KilnResult<Vec<ProcessingItem>>;

    /// Processes the items that changed; returns the files processed
    /// successfully.
    fn process(
        &self,
        ctx: &CompileContext<'_>,
        items: &[ProcessingItem],
    ) -> KilnResult<Vec<PathBuf>>;

    /// Cleans up after files processed earlier that are no longer items.
    fn process_outdated(&self, _ctx: &CompileContext<'_>, _files: &[PathBuf]) -> KilnResult<()> {
        Ok(())
    }
}

/// One source file a translator compiled successfully.
#[derive(Clone, Debug)]
pub struct CompiledSource {
    /// The source file.
    pub source: PathBuf,
    /// Files written for it.
    pub outputs: Vec<PathBuf>,
    /// Symbols extracted from it, if the translator tracks dependencies.
    pub symbols: Option<FileSymbols>,
}

/// Collects what a translator produced.
pub trait OutputSink {
    /// Records a successfully compiled source.
    fn add(&mut self, compiled: CompiledSource);

    /// Records a source that failed to compile.
    fn add_failed(&mut self, source: &Path);
}

/// A translation-stage compiler.
pub trait Translator: Compiler {
    /// Content kinds the translator reads.
    fn input_kinds(&self) -> &[ContentKind];

    /// Content kinds the translator writes.
    fn output_kinds(&self) -> &[ContentKind];

    /// Returns `true` if the translator compiles `file`. Must be pure.
    fn is_applicable_to(&self, file: &Path) -> bool;

    /// The translator's view of `file`; `None` if it cannot be read.
    fn validity_state(&self, file: &Path) -> Option<ValidityState> {
        ValidityState::of_file(file).ok()
    }

    /// Compiles `files` of `chunk`, reporting results to `sink` and
    /// problems through the context.
    fn translate(
        &self,
        ctx: &CompileContext<'_>,
        chunk: &ModuleChunk,
        files: &[PathBuf],
        sink: &mut dyn OutputSink,
    ) -> KilnResult<()>;
}

/// Reorders translators once per build.
pub trait CompilerSorter {
    /// Permutes `translators` in place.
    fn sort<'a>(&self, translators: &mut Vec<&'a dyn Translator>);
}

/// A hook run before or after the pipeline.
pub trait BuildTask {
    /// Name for logging.
    fn name(&self) -> &str;

    /// Runs the task; `false` aborts the build as cancelled.
    fn execute(&self, ctx: &CompileContext<'_>) -> bool;
}

/// Every compiler and task taking part in builds.
#[derive(Default)]
pub struct CompilerRegistry {
    processors: Vec<Box<dyn FileProcessor>>,
    translators: Vec<Box<dyn Translator>>,
    sorter: Option<Box<dyn CompilerSorter>>,
    before_tasks: Vec<Box<dyn BuildTask>>,
    after_tasks: Vec<Box<dyn BuildTask>>,
}

impl CompilerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a file processor.
    pub fn register_processor(&mut self, processor: Box<dyn FileProcessor>) {
        self.processors.push(processor);
    }

    /// Registers a translator.
    pub fn register_translator(&mut self, translator: Box<dyn Translator>) {
        self.translators.push(translator);
    }

    /// Installs the translator sorter.
    pub fn set_sorter(&mut self, sorter: Box<dyn CompilerSorter>) {
        self.sorter = Some(sorter);
    }

    /// Adds a task run before the pipeline.
    pub fn add_before_task(&mut self, task: Box<dyn BuildTask>) {
        self.before_tasks.push(task);
    }

    /// Adds a task run after the pipeline.
    pub fn add_after_task(&mut self, task: Box<dyn BuildTask>) {
        self.after_tasks.push(task);
    }

    /// Processors of `stage`, in registration order.
    pub fn processors_for(&self, stage: StageKind) -> impl Iterator<Item = &dyn FileProcessor> {
        self.processors
            .iter()
            .filter(move |p| p.stage() == stage)
            .map(|p| p.as_ref())
    }

    /// All processors.
    pub fn processors(&self) -> impl Iterator<Item = &dyn FileProcessor> {
        self.processors.iter().map(|p| p.as_ref())
    }

    /// Translators in the order this build uses.
    pub fn ordered_translators(&self) -> Vec<&dyn Translator> {
        let mut translators: Vec<&dyn Translator> =
            self.translators.iter().map(|t| t.as_ref()).collect();
        if let Some(sorter) = &self.sorter {
            sorter.sort(&mut translators);
        }
        translators
    }

    /// Tasks run before the pipeline.
    pub fn before_tasks(&self) -> &[Box<dyn BuildTask>] {
        &self.before_tasks
    }

    /// Tasks run after the pipeline.
    pub fn after_tasks(&self) -> &[Box<dyn BuildTask>] {
        &self.after_tasks
    }

    /// Asks every compiler to validate the configuration; all are asked
    /// even after one refuses.
    pub fn validate_configuration(&self, ctx: &CompileContext<'_>) -> bool {
        let mut ok = true;
        for processor in &self.processors {
            ok &= processor.validate_configuration(ctx);
        }
        for translator in &self.translators {
            ok &= translator.validate_configuration(ctx);
        }
        ok
    }
}
