//! Shared plumbing for the build commands: project discovery, scope
//! selection, orchestrator setup, and report rendering.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use kiln_build::{
    BuildOrchestrator, BuildReport, CancellationToken, CompileScope, CompilerRegistry,
    CompositeScope, ExitStatus, FileSetScope, LoggingProgress, ModuleScope, ProjectModel,
    ProjectScope,
};
use kiln_cache::CacheManager;
use kiln_config::CONFIG_FILE_NAME;
use kiln_diagnostics::{DiagnosticRenderer, JsonRenderer, TerminalRenderer};

use crate::resources::ResourceCopier;
use crate::{BuildArgs, GlobalArgs, ReportFormat};

/// Walks up from `start` looking for a directory containing `kiln.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE_NAME).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(format!(
                "could not find {CONFIG_FILE_NAME} in {} or any parent directory",
                start.display()
            )
            .into());
        }
    }
}

/// Resolves the project root directory from global CLI args.
///
/// If `--config` is specified, uses that path (file → parent dir, dir → itself).
/// Otherwise walks up from the current directory looking for `kiln.toml`.
pub fn resolve_project_root(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(ref config_path) = global.config {
        let p = PathBuf::from(config_path);
        if p.is_file() {
            Ok(p.parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")))
        } else {
            Ok(p)
        }
    } else {
        find_project_root(&std::env::current_dir()?)
    }
}

/// Loads `kiln.toml` and resolves it into a project model.
pub fn load_project(project_dir: &Path) -> Result<ProjectModel, Box<dyn std::error::Error>> {
    let config = kiln_config::load_config(project_dir)?;
    Ok(ProjectModel::from_config(project_dir, &config))
}

/// Builds the compile scope selected by `-m` and `-f`.
///
/// With neither flag the whole project is in scope; with both, the union.
pub fn select_scope(
    project: &ProjectModel,
    args: &BuildArgs,
) -> Result<Arc<dyn CompileScope>, Box<dyn std::error::Error>> {
    let mut scopes: Vec<Arc<dyn CompileScope>> = Vec::new();

    if !args.modules.is_empty() {
        let mut ids = Vec::with_capacity(args.modules.len());
        for name in &args.modules {
            let module = project
                .module_by_name(name)
                .ok_or_else(|| format!("unknown module '{name}'"))?;
            ids.push(module.id);
        }
        scopes.push(Arc::new(ModuleScope::new(ids)));
    }

    if !args.files.is_empty() {
        let files = args.files.iter().map(|f| project.root().join(f));
        scopes.push(Arc::new(FileSetScope::new(files)));
    }

    Ok(match scopes.pop() {
        None => Arc::new(ProjectScope),
        Some(only) if scopes.is_empty() => only,
        Some(last) => {
            scopes.push(last);
            Arc::new(CompositeScope::new(scopes))
        }
    })
}

/// The compilers shipped with the CLI.
pub fn default_registry(project: &ProjectModel) -> CompilerRegistry {
    let mut registry = CompilerRegistry::new();
    registry.register_translator(Box::new(ResourceCopier::new(
        project.settings().resource_extensions.clone(),
    )));
    registry
}

/// Opens the project's caches and wires up an orchestrator.
pub fn open_orchestrator(project: ProjectModel) -> BuildOrchestrator {
    let registry = default_registry(&project);
    let caches = CacheManager::open(&project.settings().cache_dir);
    BuildOrchestrator::new(project, registry, caches)
        .with_progress(LoggingProgress::new(CancellationToken::new()))
}

/// Prints the diagnostics and summary of a finished build.
pub fn render_report(report: &BuildReport, format: ReportFormat, global: &GlobalArgs) {
    match format {
        ReportFormat::Text => {
            let renderer = TerminalRenderer::new(global.color);
            for diag in &report.diagnostics {
                if global.quiet && !diag.severity.is_error() {
                    continue;
                }
                eprintln!("{}", renderer.render(diag));
            }
            if !global.quiet {
                if let Some(reason) = &report.rebuild_reason {
                    eprintln!("   Rebuilt ({reason})");
                }
                eprintln!("    Finished {}", report.message);
            }
        }
        ReportFormat::Json => {
            let renderer = JsonRenderer;
            for diag in &report.diagnostics {
                println!("{}", renderer.render(diag));
            }
            let summary = serde_json::json!({
                "status": report.status,
                "rebuild": report.rebuild,
                "rebuild_reason": report.rebuild_reason,
                "chunks": report.chunks,
                "errors": report.errors,
                "warnings": report.warnings,
                "message": report.message,
            });
            println!("{summary}");
        }
    }
}

/// Maps a build status to the process exit code.
pub fn exit_code(status: ExitStatus) -> i32 {
    match status {
        ExitStatus::UpToDate | ExitStatus::Success => 0,
        ExitStatus::Errors => 1,
        ExitStatus::Cancelled => 2,
    }
}
