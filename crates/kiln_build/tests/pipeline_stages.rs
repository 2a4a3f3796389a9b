//! Stage ordering, file processors, build tasks, and configuration checks.

mod common;

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use common::{CompileLog, Fixture, ToyTranslator, TWO_MODULES};
use kiln_build::{
    BuildTask, CancellationToken, CompileContext, Compiler, CompilerRegistry, ExitStatus,
    FileProcessor, ProcessingItem, ProjectScope, ReadinessGate, StageKind,
};
use kiln_cache::{BuildStatusLedger, LedgerRead, ValidityState};
use kiln_common::{InternalError, KilnResult};
use kiln_diagnostics::DiagnosticCode;

const GENERATED: &str = r#"
[project]
name = "gen"

[[module]]
name = "a"
sources = ["a/src"]
output = "out/a"
generated = "gen/a"
"#;

/// Turns every `.gen` file into `<generated root>/<stem>.src`.
struct Generator {
    processed: Arc<Mutex<Vec<PathBuf>>>,
}

impl Compiler for Generator {
    fn id(&self) -> &str {
        "gen"
    }
}

impl FileProcessor for Generator {
    fn stage(&self) -> StageKind {
        StageKind::SourceGeneration
    }

    fn processing_items(&self, ctx: &CompileContext<'_>) -> KilnResult<Vec<ProcessingItem>> {
        ctx.scope()
            .files(ctx.project())
            .into_iter()
            .filter(|f| f.extension().is_some_and(|e| e == "gen"))
            .map(|file| -> KilnResult<ProcessingItem> {
                let state = ValidityState::of_file(&file)
                    .map_err(|e| InternalError::new(e.to_string()))?;
                Ok(ProcessingItem { file, state })
            })
            .collect()
    }

    fn process(
        &self,
        ctx: &CompileContext<'_>,
        items: &[ProcessingItem],
    ) -> KilnResult<Vec<PathBuf>> {
        let mut done = Vec::new();
        for item in items {
            let module = ctx.module_of(&item.file).unwrap();
            let root = ctx.generation_output_dir(module).unwrap();
            let stem = item.file.file_stem().unwrap().to_string_lossy().into_owned();
            fs::create_dir_all(root).unwrap();
            fs::write(root.join(format!("{stem}.src")), fs::read(&item.file).unwrap()).unwrap();
            self.processed.lock().unwrap().push(item.file.clone());
            done.push(item.file.clone());
        }
        Ok(done)
    }

    fn process_outdated(&self, ctx: &CompileContext<'_>, files: &[PathBuf]) -> KilnResult<()> {
        let root = ctx.project().module_by_name("a").unwrap().generated_root.clone().unwrap();
        for file in files {
            let stem = file.file_stem().unwrap().to_string_lossy().into_owned();
            let _ = fs::remove_file(root.join(format!("{stem}.src")));
        }
        Ok(())
    }
}

#[test]
fn generated_sources_are_translated_in_the_same_build() {
    let fx = Fixture::new(GENERATED);
    fx.write("a/src/G.gen", "def S 1\n");
    let processed = Arc::new(Mutex::new(Vec::new()));
    let log = CompileLog::default();
    let mut registry = CompilerRegistry::new();
    registry.register_processor(Box::new(Generator {
        processed: processed.clone(),
    }));
    registry.register_translator(Box::new(ToyTranslator::new(log.clone())));
    let mut orch = fx.orchestrator_for(registry, CancellationToken::new());

    let report = orch.make(&ProjectScope).unwrap();
    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(fx.read("gen/a/G.src").as_deref(), Some("def S 1\n"));
    assert_eq!(fx.read("out/a/G.out").as_deref(), Some("def S 1\n"));

    processed.lock().unwrap().clear();
    assert_eq!(orch.make(&ProjectScope).unwrap().status, ExitStatus::UpToDate);
    assert!(processed.lock().unwrap().is_empty());

    fx.remove("a/src/G.gen");
    let report = orch.make(&ProjectScope).unwrap();
    assert_eq!(report.status, ExitStatus::Success);
    assert!(fx.read("gen/a/G.src").is_none());
    assert!(fx.read("out/a/G.out").is_none());
}

#[test]
fn deleted_source_takes_its_output_and_notifies_dependents() {
    let fx = Fixture::new(TWO_MODULES);
    fx.write("a/src/X.src", "def S 1\n");
    fx.write("a/src/Y.src", "use S\n");
    let log = CompileLog::default();
    let mut orch = fx.orchestrator(ToyTranslator::new(log.clone()));
    orch.make(&ProjectScope).unwrap();

    fx.remove("a/src/X.src");
    log.clear();
    let report = orch.make(&ProjectScope).unwrap();
    assert_eq!(report.status, ExitStatus::Success);
    assert!(fx.read("out/a/X.out").is_none());
    assert_eq!(log.compiled(), vec!["Y.src".to_string()]);
    assert_eq!(report.chunks[0].rounds, 2);
}

// ---------------------------------------------------------------------------
// Configuration validation
// ---------------------------------------------------------------------------

#[test]
fn module_without_output_fails_before_touching_caches() {
    let fx = Fixture::new(
        r#"
[project]
name = "broken"

[[module]]
name = "a"
sources = ["a/src"]
"#,
    );
    fx.write("a/src/X.src", "def S 1\n");
    let report = fx
        .orchestrator(ToyTranslator::new(CompileLog::default()))
        .make(&ProjectScope)
        .unwrap();
    assert_eq!(report.status, ExitStatus::Errors);
    assert_eq!(
        report.diagnostics[0].code,
        Some(DiagnosticCode::MISSING_OUTPUT)
    );
    assert!(!fx.cache_dir().exists());
}

#[test]
fn empty_module_needs_no_output() {
    let fx = Fixture::new(
        r#"
[project]
name = "empty"

[[module]]
name = "a"
sources = ["a/src"]
"#,
    );
    let report = fx
        .orchestrator(ToyTranslator::new(CompileLog::default()))
        .make(&ProjectScope)
        .unwrap();
    assert_ne!(report.status, ExitStatus::Errors);
}

#[test]
fn output_inside_sources_is_rejected_on_rebuild() {
    let fx = Fixture::new(
        r#"
[project]
name = "overlap"

[[module]]
name = "a"
sources = ["a/src"]
output = "a/src/out"
"#,
    );
    let source = fx.write("a/src/X.src", "def S 1\n");
    let report = fx
        .orchestrator(ToyTranslator::new(CompileLog::default()))
        .rebuild(&ProjectScope)
        .unwrap();
    assert_eq!(report.status, ExitStatus::Errors);
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.code == Some(DiagnosticCode::OUTPUT_SOURCE_OVERLAP)));
    assert!(source.exists());
}

struct Veto;

impl Compiler for Veto {
    fn id(&self) -> &str {
        "veto"
    }

    fn validate_configuration(&self, _ctx: &CompileContext<'_>) -> bool {
        false
    }
}

impl FileProcessor for Veto {
    fn stage(&self) -> StageKind {
        StageKind::Validation
    }

    fn processing_items(&self, _ctx: &CompileContext<'_>) -> KilnResult<Vec<ProcessingItem>> {
        Ok(Vec::new())
    }

    fn process(
        &self,
        _ctx: &CompileContext<'_>,
        _items: &[ProcessingItem],
    ) -> KilnResult<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

#[test]
fn compiler_can_veto_configuration() {
    let fx = Fixture::new(TWO_MODULES);
    fx.write("a/src/X.src", "def S 1\n");
    let mut registry = CompilerRegistry::new();
    registry.register_processor(Box::new(Veto));
    let report = fx
        .orchestrator_for(registry, CancellationToken::new())
        .make(&ProjectScope)
        .unwrap();
    assert_eq!(report.status, ExitStatus::Errors);
    assert!(report
        .diagnostics
        .iter()
        .any(|d| d.code == Some(DiagnosticCode::COMPILER_CONFIGURATION)));
}

// ---------------------------------------------------------------------------
// Tasks, readiness, and internal failures
// ---------------------------------------------------------------------------

struct StopTask;

impl BuildTask for StopTask {
    fn name(&self) -> &str {
        "stop"
    }

    fn execute(&self, _ctx: &CompileContext<'_>) -> bool {
        false
    }
}

#[test]
fn before_task_can_stop_the_build() {
    let fx = Fixture::new(TWO_MODULES);
    fx.write("a/src/X.src", "def S 1\n");
    let log = CompileLog::default();
    let mut registry = CompilerRegistry::new();
    registry.register_translator(Box::new(ToyTranslator::new(log.clone())));
    registry.add_before_task(Box::new(StopTask));
    let report = fx
        .orchestrator_for(registry, CancellationToken::new())
        .make(&ProjectScope)
        .unwrap();
    assert_eq!(report.status, ExitStatus::Cancelled);
    assert!(log.compiled().is_empty());
}

struct CountingTask(Arc<AtomicU32>);

impl BuildTask for CountingTask {
    fn name(&self) -> &str {
        "count"
    }

    fn execute(&self, _ctx: &CompileContext<'_>) -> bool {
        self.0.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[test]
fn status_check_runs_no_tasks() {
    let fx = Fixture::new(TWO_MODULES);
    fx.write("a/src/X.src", "def S 1\n");
    let runs = Arc::new(AtomicU32::new(0));
    let mut registry = CompilerRegistry::new();
    registry.register_translator(Box::new(ToyTranslator::new(CompileLog::default())));
    registry.add_before_task(Box::new(CountingTask(runs.clone())));
    registry.add_after_task(Box::new(CountingTask(runs.clone())));
    let mut orch = fx.orchestrator_for(registry, CancellationToken::new());

    orch.make(&ProjectScope).unwrap();
    let after_build = runs.load(Ordering::SeqCst);
    assert!(after_build >= 2);

    assert!(orch.is_up_to_date(&ProjectScope).unwrap());
    fx.write("a/src/X.src", "def S 2\n");
    assert!(!orch.is_up_to_date(&ProjectScope).unwrap());
    assert_eq!(runs.load(Ordering::SeqCst), after_build);

    orch.make(&ProjectScope).unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), after_build + 2);
}

struct CountingGate(Arc<AtomicU32>);

impl ReadinessGate for CountingGate {
    fn is_ready(&self) -> bool {
        self.0.fetch_add(1, Ordering::SeqCst) >= 2
    }
}

#[test]
fn build_waits_for_readiness() {
    let fx = Fixture::new(
        r#"
[project]
name = "wait"

[build]
readiness_poll_ms = 1

[[module]]
name = "a"
sources = ["a/src"]
output = "out/a"
"#,
    );
    fx.write("a/src/X.src", "def S 1\n");
    let polls = Arc::new(AtomicU32::new(0));
    let report = fx
        .orchestrator(ToyTranslator::new(CompileLog::default()))
        .with_readiness_gate(CountingGate(polls.clone()))
        .make(&ProjectScope)
        .unwrap();
    assert_eq!(report.status, ExitStatus::Success);
    assert!(polls.load(Ordering::SeqCst) >= 3);
}

struct Exploding;

impl Compiler for Exploding {
    fn id(&self) -> &str {
        "exploding"
    }
}

impl FileProcessor for Exploding {
    fn stage(&self) -> StageKind {
        StageKind::Packaging
    }

    fn processing_items(&self, _ctx: &CompileContext<'_>) -> KilnResult<Vec<ProcessingItem>> {
        Err(InternalError::new("packager crashed"))
    }

    fn process(
        &self,
        _ctx: &CompileContext<'_>,
        _items: &[ProcessingItem],
    ) -> KilnResult<Vec<PathBuf>> {
        Ok(Vec::new())
    }
}

#[test]
fn internal_error_names_its_origin_and_forces_rebuild_next_time() {
    let fx = Fixture::new(TWO_MODULES);
    fx.write("a/src/X.src", "def S 1\n");
    let mut registry = CompilerRegistry::new();
    registry.register_translator(Box::new(ToyTranslator::new(CompileLog::default())));
    registry.register_processor(Box::new(Exploding));
    let err = fx
        .orchestrator_for(registry, CancellationToken::new())
        .make(&ProjectScope)
        .unwrap_err();
    assert_eq!(err.origin.as_deref(), Some("exploding"));

    match BuildStatusLedger::new(&fx.cache_dir()).read() {
        LedgerRead::Present(status) => assert!(status.compilation_in_progress),
        other => panic!("unexpected ledger state: {other:?}"),
    }

    let report = fx
        .orchestrator(ToyTranslator::new(CompileLog::default()))
        .make(&ProjectScope)
        .unwrap();
    assert!(report.rebuild);
    assert_eq!(report.status, ExitStatus::Success);
}

/// A packager whose first `failures` runs crash.
struct FlakyPackager {
    failures: Arc<AtomicU32>,
    runs: Arc<AtomicU32>,
}

impl Compiler for FlakyPackager {
    fn id(&self) -> &str {
        "flaky"
    }
}

impl FileProcessor for FlakyPackager {
    fn stage(&self) -> StageKind {
        StageKind::Packaging
    }

    fn processing_items(&self, ctx: &CompileContext<'_>) -> KilnResult<Vec<ProcessingItem>> {
        let file = ctx.project().root().join("a/src/X.src");
        let state = ValidityState::of_file(&file).map_err(|e| InternalError::new(e.to_string()))?;
        Ok(vec![ProcessingItem { file, state }])
    }

    fn process(
        &self,
        _ctx: &CompileContext<'_>,
        items: &[ProcessingItem],
    ) -> KilnResult<Vec<PathBuf>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(InternalError::new("packager crashed"));
        }
        Ok(items.iter().map(|i| i.file.clone()).collect())
    }
}

fn flaky_registry(failures: u32, runs: &Arc<AtomicU32>) -> CompilerRegistry {
    let mut registry = CompilerRegistry::new();
    registry.register_translator(Box::new(ToyTranslator::new(CompileLog::default())));
    registry.register_processor(Box::new(FlakyPackager {
        failures: Arc::new(AtomicU32::new(failures)),
        runs: runs.clone(),
    }));
    registry
}

#[test]
fn requested_rebuild_runs_even_after_internal_error() {
    let fx = Fixture::new(TWO_MODULES);
    fx.write("a/src/X.src", "def S 1\n");
    let runs = Arc::new(AtomicU32::new(0));
    let report = fx
        .orchestrator_for(flaky_registry(0, &runs), CancellationToken::new())
        .make(&ProjectScope)
        .unwrap();
    assert_eq!(report.status, ExitStatus::Success);

    // Found corrupted when the packager's table is first opened.
    fs::write(fx.cache_dir().join("validity/packaging-flaky.tbl"), b"junk").unwrap();
    runs.store(0, Ordering::SeqCst);
    let err = fx
        .orchestrator_for(flaky_registry(1, &runs), CancellationToken::new())
        .make(&ProjectScope)
        .unwrap_err();
    assert_eq!(err.origin.as_deref(), Some("flaky"));

    // The crash, then the rebuild it escalated to.
    assert_eq!(runs.load(Ordering::SeqCst), 2);
    let ledger = BuildStatusLedger::new(&fx.cache_dir());
    assert!(ledger.rebuild_marker().is_none());
    match ledger.read() {
        LedgerRead::Present(status) => assert!(!status.compilation_in_progress),
        other => panic!("unexpected ledger state: {other:?}"),
    }
}
