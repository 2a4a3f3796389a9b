//! End-to-end incremental builds of small toy-language projects.

mod common;

use common::{CompileLog, Fixture, ToyTranslator, CHAIN, CYCLE, TWO_MODULES};
use kiln_build::{CancellationToken, ExitStatus, FileSetScope, ModuleScope, ProjectScope};
use kiln_cache::{BuildStatusLedger, LedgerRead};

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Single chunk, no dependents
// ---------------------------------------------------------------------------

#[test]
fn first_build_compiles_then_second_is_up_to_date() {
    let fx = Fixture::new(TWO_MODULES);
    fx.write("a/src/X.src", "def S 1\n");
    let log = CompileLog::default();
    let mut orch = fx.orchestrator(ToyTranslator::new(log.clone()));

    let first = orch.make(&ProjectScope).unwrap();
    assert_eq!(first.status, ExitStatus::Success);
    assert!(first.did_work);
    assert_eq!(first.chunks[0].modules, names(&["a"]));
    assert_eq!(first.chunks[0].rounds, 1);
    assert_eq!(fx.read("out/a/X.out").as_deref(), Some("def S 1\n"));

    log.clear();
    let second = orch.make(&ProjectScope).unwrap();
    assert_eq!(second.status, ExitStatus::UpToDate);
    assert!(!second.did_work);
    assert!(!second.rebuild);
    assert!(log.compiled().is_empty());
    assert_eq!(second.message, "all files are up-to-date");
}

#[test]
fn up_to_date_survives_a_new_process() {
    let fx = Fixture::new(TWO_MODULES);
    fx.write("a/src/X.src", "def S 1\n");
    fx.orchestrator(ToyTranslator::new(CompileLog::default()))
        .make(&ProjectScope)
        .unwrap();

    let log = CompileLog::default();
    let report = fx
        .orchestrator(ToyTranslator::new(log.clone()))
        .make(&ProjectScope)
        .unwrap();
    assert_eq!(report.status, ExitStatus::UpToDate);
    assert!(log.compiled().is_empty());
}

// ---------------------------------------------------------------------------
// Dependency propagation
// ---------------------------------------------------------------------------

#[test]
fn shape_change_recompiles_dependent_in_later_chunk() {
    let fx = Fixture::new(TWO_MODULES);
    fx.write("a/src/X.src", "def S 1\n");
    fx.write("b/src/Y.src", "use S\n");
    let log = CompileLog::default();
    let mut orch = fx.orchestrator(ToyTranslator::new(log.clone()));
    orch.make(&ProjectScope).unwrap();

    fx.write("a/src/X.src", "def S 2\n");
    log.clear();
    let report = orch.make(&ProjectScope).unwrap();

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(log.calls(), vec![names(&["X.src"]), names(&["Y.src"])]);
    assert_eq!(report.chunks.len(), 2);
    assert_eq!(report.chunks[1].modules, names(&["b"]));
    assert_eq!(report.chunks[1].rounds, 1);

    log.clear();
    assert_eq!(orch.make(&ProjectScope).unwrap().status, ExitStatus::UpToDate);
    assert!(log.compiled().is_empty());
}

#[test]
fn shape_change_inside_cycle_takes_a_second_round() {
    let fx = Fixture::new(CYCLE);
    fx.write("a/src/X.src", "def S 1\n");
    fx.write("b/src/Y.src", "use S\n");
    let log = CompileLog::default();
    let mut orch = fx.orchestrator(ToyTranslator::new(log.clone()));
    orch.make(&ProjectScope).unwrap();
    assert_eq!(orch.chunks().len(), 1);

    fx.write("a/src/X.src", "def S 2\n");
    log.clear();
    let report = orch.make(&ProjectScope).unwrap();

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.chunks.len(), 1);
    assert_eq!(report.chunks[0].modules, names(&["a", "b"]));
    assert_eq!(report.chunks[0].rounds, 2);
    assert_eq!(log.calls(), vec![names(&["X.src"]), names(&["Y.src"])]);
}

#[test]
fn later_rounds_compile_only_dependents_when_inputs_overlap_outputs() {
    let fx = Fixture::new(CYCLE);
    fx.write("a/src/X.src", "def S 1\n");
    fx.write("a/src/W.src", "def T 1\n");
    fx.write("b/src/Y.src", "use S\n");
    let log = CompileLog::default();
    let mut orch = fx.orchestrator(ToyTranslator::new(log.clone()).reading_own_output());
    orch.make(&ProjectScope).unwrap();

    fx.write("a/src/X.src", "def S 2\n");
    log.clear();
    let report = orch.make(&ProjectScope).unwrap();

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(report.chunks[0].rounds, 2);
    assert_eq!(log.calls(), vec![names(&["X.src"]), names(&["Y.src"])]);
}

#[test]
fn new_file_is_compiled_once_across_rounds() {
    let fx = Fixture::new(CYCLE);
    fx.write("a/src/X.src", "def S 1\n");
    fx.write("b/src/Y.src", "use S\n");
    let log = CompileLog::default();
    let mut orch = fx.orchestrator(ToyTranslator::new(log.clone()).reading_own_output());
    orch.make(&ProjectScope).unwrap();

    fx.write("a/src/X.src", "def S 2\n");
    fx.write("b/src/Z.src", "def U 1\n");
    log.clear();
    let report = orch.make(&ProjectScope).unwrap();

    assert_eq!(report.status, ExitStatus::Success);
    let compiled = log.compiled();
    assert_eq!(compiled.iter().filter(|f| *f == "Z.src").count(), 1);
    assert_eq!(compiled.iter().filter(|f| *f == "Y.src").count(), 1);
    assert_eq!(compiled.iter().filter(|f| *f == "X.src").count(), 1);

    log.clear();
    assert_eq!(orch.make(&ProjectScope).unwrap().status, ExitStatus::UpToDate);
    assert!(log.compiled().is_empty());
}

#[test]
fn body_change_does_not_touch_dependents() {
    let fx = Fixture::new(CYCLE);
    fx.write("a/src/X.src", "def S 1\n");
    fx.write("b/src/Y.src", "use S\n");
    let log = CompileLog::default();
    let mut orch = fx.orchestrator(ToyTranslator::new(log.clone()));
    orch.make(&ProjectScope).unwrap();

    fx.write("a/src/X.src", "def S 1\nsome body text\n");
    log.clear();
    let report = orch.make(&ProjectScope).unwrap();

    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(log.compiled(), names(&["X.src"]));
    assert_eq!(report.chunks[0].rounds, 1);
}

#[test]
fn processed_modules_are_never_revisited() {
    // `a` is built before `b`, yet references a symbol `b` defines.
    let fx = Fixture::new(TWO_MODULES);
    fx.write("a/src/X.src", "use T\n");
    fx.write("b/src/Y.src", "def T 1\n");
    let log = CompileLog::default();
    let mut orch = fx.orchestrator(ToyTranslator::new(log.clone()));
    orch.make(&ProjectScope).unwrap();

    fx.write("b/src/Y.src", "def T 2\n");
    log.clear();
    let report = orch.make(&ProjectScope).unwrap();
    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(log.compiled(), names(&["Y.src"]));

    log.clear();
    assert_eq!(orch.make(&ProjectScope).unwrap().status, ExitStatus::UpToDate);
    assert!(log.compiled().is_empty());
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[test]
fn errors_stop_further_rounds_and_keep_work_for_next_build() {
    let fx = Fixture::new(CYCLE);
    fx.write("a/src/X.src", "def S 1\n");
    fx.write("b/src/Y.src", "use S\n");
    let log = CompileLog::default();
    let mut orch = fx.orchestrator(ToyTranslator::new(log.clone()));
    orch.make(&ProjectScope).unwrap();

    fx.write("a/src/X.src", "def S 2\nerror broken definition\n");
    log.clear();
    let failed = orch.make(&ProjectScope).unwrap();
    assert_eq!(failed.status, ExitStatus::Errors);
    assert_eq!(failed.errors, 1);
    assert_eq!(failed.chunks[0].rounds, 1);
    assert_eq!(log.compiled(), names(&["X.src"]));
    assert!(failed.message.contains("1 errors"));

    fx.write("a/src/X.src", "def S 2\n");
    log.clear();
    let fixed = orch.make(&ProjectScope).unwrap();
    assert_eq!(fixed.status, ExitStatus::Success);
    let compiled = log.compiled();
    assert!(compiled.contains(&"X.src".to_string()));
    assert!(compiled.contains(&"Y.src".to_string()));

    log.clear();
    assert_eq!(orch.make(&ProjectScope).unwrap().status, ExitStatus::UpToDate);
}

#[test]
fn errors_in_one_chunk_skip_later_chunks() {
    let fx = Fixture::new(CHAIN);
    fx.write("a/src/A.src", "def P 1\nerror nope\n");
    fx.write("b/src/B.src", "def Q 1\n");
    fx.write("c/src/C.src", "def R 1\n");
    let log = CompileLog::default();
    let mut orch = fx.orchestrator(ToyTranslator::new(log.clone()));

    let report = orch.make(&ProjectScope).unwrap();
    assert_eq!(report.status, ExitStatus::Errors);
    assert_eq!(log.compiled(), names(&["A.src"]));
    assert!(fx.read("out/b/B.out").is_none());
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[test]
fn cancellation_mid_chunk_leaves_consistent_state() {
    let fx = Fixture::new(CHAIN);
    fx.write("a/src/A.src", "def P 1\n");
    fx.write("b/src/Q.src", "def T 1\n");
    fx.write("b/src/R.src", "use T\n");
    fx.write("c/src/Z.src", "def U 1\n");
    fx.orchestrator(ToyTranslator::new(CompileLog::default()))
        .make(&ProjectScope)
        .unwrap();

    fx.write("b/src/Q.src", "def T 2\n");
    fx.write("c/src/Z.src", "def U 2\n");
    let token = CancellationToken::new();
    let log = CompileLog::default();
    let translator = ToyTranslator::new(log.clone()).cancelling_on("R.src", token.clone());
    let report = fx
        .orchestrator_with(translator, token)
        .make(&ProjectScope)
        .unwrap();

    assert_eq!(report.status, ExitStatus::Cancelled);
    assert_eq!(report.message, "compilation aborted");
    assert_eq!(log.calls(), vec![names(&["Q.src"]), names(&["R.src"])]);
    assert!(!log.compiled().contains(&"Z.src".to_string()));

    match BuildStatusLedger::new(&fx.cache_dir()).read() {
        LedgerRead::Present(status) => assert!(!status.compilation_in_progress),
        other => panic!("unexpected ledger state: {other:?}"),
    }

    let log = CompileLog::default();
    let next = fx
        .orchestrator(ToyTranslator::new(log.clone()))
        .make(&ProjectScope)
        .unwrap();
    assert_eq!(next.status, ExitStatus::Success);
    assert!(!next.rebuild);
    assert!(log.compiled().contains(&"Z.src".to_string()));
}

#[test]
fn cancellation_before_build_compiles_nothing() {
    let fx = Fixture::new(TWO_MODULES);
    fx.write("a/src/X.src", "def S 1\n");
    let token = CancellationToken::new();
    token.cancel();
    let log = CompileLog::default();
    let report = fx
        .orchestrator_with(ToyTranslator::new(log.clone()), token)
        .make(&ProjectScope)
        .unwrap();
    assert_eq!(report.status, ExitStatus::Cancelled);
    assert!(log.compiled().is_empty());
}

// ---------------------------------------------------------------------------
// Scopes and forced compilation
// ---------------------------------------------------------------------------

#[test]
fn compile_recompiles_everything_in_scope() {
    let fx = Fixture::new(TWO_MODULES);
    fx.write("a/src/X.src", "def S 1\n");
    fx.write("b/src/Y.src", "use S\n");
    let log = CompileLog::default();
    let mut orch = fx.orchestrator(ToyTranslator::new(log.clone()));
    orch.make(&ProjectScope).unwrap();

    log.clear();
    let a = orch.project().module_by_name("a").unwrap().id;
    let report = orch.compile(&ModuleScope::new([a])).unwrap();
    assert_eq!(report.status, ExitStatus::Success);
    assert!(!report.rebuild);
    assert_eq!(log.compiled(), names(&["X.src"]));
}

#[test]
fn file_scope_compiles_only_listed_files() {
    let fx = Fixture::new(TWO_MODULES);
    let x = fx.write("a/src/X.src", "def S 1\n");
    fx.write("a/src/W.src", "def V 1\n");
    let log = CompileLog::default();
    let mut orch = fx.orchestrator(ToyTranslator::new(log.clone()));
    orch.make(&ProjectScope).unwrap();

    fx.write("a/src/X.src", "def S 1\nbody\n");
    fx.write("a/src/W.src", "def V 1\nbody\n");
    log.clear();
    let report = orch.make(&FileSetScope::new([x])).unwrap();
    assert_eq!(report.status, ExitStatus::Success);
    assert_eq!(log.compiled(), names(&["X.src"]));

    log.clear();
    orch.make(&ProjectScope).unwrap();
    assert_eq!(log.compiled(), names(&["W.src"]));
}

// ---------------------------------------------------------------------------
// Dry runs
// ---------------------------------------------------------------------------

#[test]
fn is_up_to_date_decides_without_writing() {
    let fx = Fixture::new(TWO_MODULES);
    fx.write("a/src/X.src", "def S 1\n");
    let log = CompileLog::default();
    let mut orch = fx.orchestrator(ToyTranslator::new(log.clone()));
    assert!(!orch.is_up_to_date(&ProjectScope).unwrap());
    assert!(!fx.cache_dir().join("status.json").exists());

    orch.make(&ProjectScope).unwrap();
    assert!(orch.is_up_to_date(&ProjectScope).unwrap());

    fx.write("a/src/X.src", "def S 2\n");
    log.clear();
    assert!(!orch.is_up_to_date(&ProjectScope).unwrap());
    assert!(log.compiled().is_empty());
    assert_eq!(fx.read("out/a/X.out").as_deref(), Some("def S 1\n"));

    assert_eq!(orch.make(&ProjectScope).unwrap().status, ExitStatus::Success);
    assert_eq!(fx.read("out/a/X.out").as_deref(), Some("def S 2\n"));
}
