//! A toy language and project fixtures shared by the orchestrator tests.
//!
//! A `.src` file is a list of lines:
//!
//! - `def NAME SHAPE` defines symbol `NAME` with the given shape;
//! - `use NAME` references a symbol;
//! - `error MESSAGE` makes compilation of the file fail;
//! - anything else is body text that never affects dependents.
//!
//! Compiling a file copies it to `<output>/<stem>.out`.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use kiln_build::{
    BuildOrchestrator, CancellationToken, CompileContext, CompiledSource, Compiler,
    CompilerRegistry, ContentKind, LoggingProgress, ModuleChunk, OutputSink, ProjectModel,
    Translator,
};
use kiln_cache::{CacheManager, FileSymbols};
use kiln_common::{ContentHash, InternalError, KilnResult};
use kiln_config::load_config;
use kiln_diagnostics::{Diagnostic, Location};
use tempfile::TempDir;

const TOY_SOURCE: ContentKind = ContentKind("toy-source");
const TOY_OUTPUT: ContentKind = ContentKind("toy-output");

/// File names passed to each `translate` call, in call order.
#[derive(Clone, Default)]
pub struct CompileLog(Arc<Mutex<Vec<Vec<String>>>>);

impl CompileLog {
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.0.lock().unwrap().clone()
    }

    pub fn compiled(&self) -> Vec<String> {
        self.calls().into_iter().flatten().collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    fn push(&self, files: &[PathBuf]) {
        let names = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        self.0.lock().unwrap().push(names);
    }
}

/// Translator for the toy language.
pub struct ToyTranslator {
    log: CompileLog,
    cancel_on: Option<(String, CancellationToken)>,
    reads_own_output: bool,
}

impl ToyTranslator {
    pub fn new(log: CompileLog) -> Self {
        Self {
            log,
            cancel_on: None,
            reads_own_output: false,
        }
    }

    /// Lists its own output kind among its inputs, so every round after the
    /// first rescans the chunk for new files.
    pub fn reading_own_output(mut self) -> Self {
        self.reads_own_output = true;
        self
    }

    /// Cancels `token` while compiling the file called `file_name`.
    pub fn cancelling_on(mut self, file_name: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((file_name.to_string(), token));
        self
    }

    fn compile_one(
        &self,
        ctx: &CompileContext<'_>,
        file: &Path,
        sink: &mut dyn OutputSink,
    ) -> KilnResult<()> {
        let text = fs::read_to_string(file)
            .map_err(|e| InternalError::new(format!("cannot read {}: {e}", file.display())))?;

        let mut symbols = FileSymbols::new();
        let mut failed = false;
        for (line_no, line) in text.lines().enumerate() {
            let words: Vec<&str> = line.split_whitespace().collect();
            match words.as_slice() {
                ["def", name, shape] => {
                    symbols = symbols.define(*name, ContentHash::from_bytes(shape.as_bytes()));
                }
                ["use", name] => symbols = symbols.reference(*name),
                ["error", rest @ ..] => {
                    ctx.emit(
                        Diagnostic::error(rest.join(" "))
                            .with_location(Location::at(file, line_no as u32 + 1, 1)),
                    );
                    failed = true;
                }
                _ => {}
            }
        }
        if failed {
            sink.add_failed(file);
            return Ok(());
        }

        let out_dir = ctx
            .output_dir_for(file)
            .ok_or_else(|| InternalError::new(format!("no output for {}", file.display())))?;
        let stem = file.file_stem().unwrap_or_default().to_string_lossy();
        let output = out_dir.join(format!("{stem}.out"));
        fs::create_dir_all(&out_dir).map_err(|e| InternalError::new(e.to_string()))?;
        fs::write(&output, &text).map_err(|e| InternalError::new(e.to_string()))?;
        sink.add(CompiledSource {
            source: file.to_path_buf(),
            outputs: vec![output],
            symbols: Some(symbols),
        });
        Ok(())
    }
}

impl Compiler for ToyTranslator {
    fn id(&self) -> &str {
        "toy"
    }
}

impl Translator for ToyTranslator {
    fn input_kinds(&self) -> &[ContentKind] {
        if self.reads_own_output {
            &[TOY_SOURCE, TOY_OUTPUT]
        } else {
            &[TOY_SOURCE]
        }
    }

    fn output_kinds(&self) -> &[ContentKind] {
        &[TOY_OUTPUT]
    }

    fn is_applicable_to(&self, file: &Path) -> bool {
        file.extension().is_some_and(|e| e == "src")
    }

    fn translate(
        &self,
        ctx: &CompileContext<'_>,
        _chunk: &ModuleChunk,
        files: &[PathBuf],
        sink: &mut dyn OutputSink,
    ) -> KilnResult<()> {
        self.log.push(files);
        for file in files {
            if let Some((name, token)) = &self.cancel_on {
                if file.file_name().is_some_and(|n| n == name.as_str()) {
                    token.cancel();
                }
            }
            self.compile_one(ctx, file, sink)?;
        }
        Ok(())
    }
}

/// A project laid out in a temporary directory.
pub struct Fixture {
    pub dir: TempDir,
}

impl Fixture {
    /// Creates a project whose `kiln.toml` is `config`.
    pub fn new(config: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("kiln.toml"), config).unwrap();
        Self { dir }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn read(&self, rel: &str) -> Option<String> {
        fs::read_to_string(self.path(rel)).ok()
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.path(rel)).unwrap();
    }

    pub fn project(&self) -> ProjectModel {
        let config = load_config(self.dir.path()).unwrap();
        ProjectModel::from_config(self.dir.path(), &config)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.project().settings().cache_dir.clone()
    }

    /// An orchestrator with a fresh view of the caches, as a new process
    /// would have.
    pub fn orchestrator(&self, translator: ToyTranslator) -> BuildOrchestrator {
        self.orchestrator_with(translator, CancellationToken::new())
    }

    pub fn orchestrator_with(
        &self,
        translator: ToyTranslator,
        token: CancellationToken,
    ) -> BuildOrchestrator {
        let mut registry = CompilerRegistry::new();
        registry.register_translator(Box::new(translator));
        self.orchestrator_for(registry, token)
    }

    pub fn orchestrator_for(
        &self,
        registry: CompilerRegistry,
        token: CancellationToken,
    ) -> BuildOrchestrator {
        let project = self.project();
        let caches = CacheManager::open(&project.settings().cache_dir);
        BuildOrchestrator::new(project, registry, caches).with_progress(LoggingProgress::new(token))
    }
}

/// Two modules, `b` depending on `a`.
pub const TWO_MODULES: &str = r#"
[project]
name = "two"

[[module]]
name = "a"
sources = ["a/src"]
output = "out/a"

[[module]]
name = "b"
sources = ["b/src"]
output = "out/b"
dependencies = ["a"]
"#;

/// Two modules depending on each other.
pub const CYCLE: &str = r#"
[project]
name = "cycle"

[[module]]
name = "a"
sources = ["a/src"]
output = "out/a"
dependencies = ["b"]

[[module]]
name = "b"
sources = ["b/src"]
output = "out/b"
dependencies = ["a"]
"#;

/// A chain `a <- b <- c`.
pub const CHAIN: &str = r#"
[project]
name = "chain"

[[module]]
name = "a"
sources = ["a/src"]
output = "out/a"

[[module]]
name = "b"
sources = ["b/src"]
output = "out/b"
dependencies = ["a"]

[[module]]
name = "c"
sources = ["c/src"]
output = "out/c"
dependencies = ["b"]
"#;
