//! Keeps output directories consistent with the sources that produced them.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kiln_cache::CacheManager;
use kiln_diagnostics::{Diagnostic, DiagnosticCode, Location};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::compiler::{validity_table_name, StageKind};
use crate::context::CompileContext;
use crate::model::ModuleId;
use crate::planner::ModuleChunk;
use crate::status::StageExit;

const DELETE_ATTEMPTS: u32 = 10;
const DELETE_PAUSE: Duration = Duration::from_millis(50);

/// Deletes a file or directory tree, retrying transient failures.
///
/// A path that does not exist counts as deleted.
pub fn delete_path(path: &Path) -> io::Result<()> {
    let mut attempt = 1;
    loop {
        let result = match std::fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
            Ok(_) => std::fs::remove_file(path),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) if attempt >= DELETE_ATTEMPTS => return Err(e),
            Err(_) => {
                attempt += 1;
                std::thread::sleep(DELETE_PAUSE);
            }
        }
    }
}

/// What a refresh walk saw.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Output roots that were missing and got created.
    pub created_dirs: usize,
    /// Files found under the output roots.
    pub files: usize,
}

/// An output whose source is gone or now belongs to another module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Orphan {
    /// The source the outputs were produced from.
    pub source: PathBuf,
    /// The outputs to delete.
    pub outputs: Vec<PathBuf>,
}

/// Deletes, prunes, and refreshes build outputs.
pub struct OutputReconciler<'c, 'a> {
    ctx: &'c CompileContext<'a>,
}

impl<'c, 'a> OutputReconciler<'c, 'a> {
    /// Creates a reconciler for one build.
    pub fn new(ctx: &'c CompileContext<'a>) -> Self {
        Self { ctx }
    }

    fn is_externally_managed(&self, path: &Path) -> bool {
        self.ctx
            .project()
            .settings()
            .externally_managed
            .iter()
            .any(|managed| path.starts_with(managed))
    }

    fn contains_externally_managed(&self, dir: &Path) -> bool {
        self.ctx
            .project()
            .settings()
            .externally_managed
            .iter()
            .any(|managed| managed.starts_with(dir))
    }

    fn report_delete_failure(&self, path: &Path, err: &io::Error) {
        self.ctx.emit(
            Diagnostic::warning(format!("cannot delete {}: {err}", path.display()))
                .with_code(DiagnosticCode::DELETE_FAILED)
                .with_location(Location::file(path)),
        );
    }

    /// Removes every output of `modules` ahead of a full rebuild.
    ///
    /// With `clear_output_directory` the whole content of each output root
    /// goes; otherwise only outputs the index attributes to those modules.
    /// Externally managed paths survive either way. Returns the number of
    /// paths deleted.
    pub fn delete_all(&self, caches: &mut CacheManager, modules: &[ModuleId]) -> usize {
        let project = self.ctx.project();
        let roots: BTreeSet<PathBuf> = modules
            .iter()
            .flat_map(|id| project.module(*id).output_dirs())
            .map(Path::to_path_buf)
            .collect();

        let mut deleted = 0;
        let mut touched_dirs = BTreeSet::new();
        if project.settings().clear_output_directory {
            for root in &roots {
                deleted += self.clear_dir(root, &mut touched_dirs);
            }
        } else {
            let names: BTreeSet<&str> = modules
                .iter()
                .map(|id| project.module(*id).name.as_str())
                .collect();
            let tracked: Vec<PathBuf> = caches
                .outputs()
                .all_outputs()
                .filter(|(_, record)| names.contains(record.module.as_str()))
                .flat_map(|(_, record)| record.outputs.iter().cloned())
                .collect();
            for output in tracked {
                if self.is_externally_managed(&output) {
                    continue;
                }
                match delete_path(&output) {
                    Ok(()) => {
                        deleted += 1;
                        if let Some(parent) = output.parent() {
                            touched_dirs.insert(parent.to_path_buf());
                        }
                    }
                    Err(e) => self.report_delete_failure(&output, &e),
                }
            }
        }

        prune_empty_dirs(touched_dirs, &project.all_output_dirs());
        info!(deleted, roots = roots.len(), "deleted build outputs");
        deleted
    }

    fn clear_dir(&self, dir: &Path, touched: &mut BTreeSet<PathBuf>) -> usize {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        let mut deleted = 0;
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if self.is_externally_managed(&path) {
                continue;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir && self.contains_externally_managed(&path) {
                deleted += self.clear_dir(&path, touched);
                touched.insert(path);
                continue;
            }
            match delete_path(&path) {
                Ok(()) => deleted += 1,
                Err(e) => self.report_delete_failure(&path, &e),
            }
        }
        deleted
    }

    /// Outputs `translator` produced for sources of `chunk` that were
    /// deleted or moved to another module since.
    pub fn find_orphans(
        &self,
        caches: &mut CacheManager,
        translator: &str,
        chunk: &ModuleChunk,
    ) -> Vec<Orphan> {
        let project = self.ctx.project();
        let names: BTreeSet<String> = chunk.names(project).into_iter().collect();
        caches
            .outputs()
            .entries(translator)
            .filter(|(_, record)| names.contains(&record.module))
            .filter(|(source, record)| {
                if !source.is_file() {
                    return true;
                }
                match project.module_of(source) {
                    Some((id, _)) => project.module(id).name != record.module,
                    None => true,
                }
            })
            .map(|(source, record)| Orphan {
                source: source.to_path_buf(),
                outputs: record.outputs.clone(),
            })
            .collect()
    }

    /// Deletes orphaned outputs and forgets their sources.
    ///
    /// Symbols the lost sources defined become changed in the dependency
    /// graph, so their dependents are recompiled.
    pub fn delete_orphans(
        &self,
        caches: &mut CacheManager,
        translator: &str,
        orphans: &[Orphan],
    ) -> usize {
        let table = validity_table_name(StageKind::Translation, translator);
        let mut touched = BTreeSet::new();
        let mut deleted = 0;
        for orphan in orphans {
            for output in &orphan.outputs {
                if self.is_externally_managed(output) {
                    continue;
                }
                match delete_path(output) {
                    Ok(()) => {
                        deleted += 1;
                        debug!(output = %output.display(), "deleted orphaned output");
                        if let Some(parent) = output.parent() {
                            touched.insert(parent.to_path_buf());
                        }
                    }
                    Err(e) => self.report_delete_failure(output, &e),
                }
            }
            let parts = caches.parts(&table);
            parts.outputs.remove(translator, &orphan.source);
            parts.outputs.unmark(&orphan.source);
            parts.validity.remove(&orphan.source);
            if !orphan.source.is_file() {
                parts.graph.remove_file(&orphan.source);
            }
        }
        prune_empty_dirs(touched, &self.ctx.project().all_output_dirs());
        deleted
    }

    /// Clears orphans of `translator` in `chunk` before it translates.
    ///
    /// In a dry run nothing is deleted; finding an orphan means the build
    /// is out of date.
    pub fn clear_if_stale(
        &self,
        caches: &mut CacheManager,
        translator: &str,
        chunk: &ModuleChunk,
    ) -> Result<usize, StageExit> {
        let orphans = self.find_orphans(caches, translator, chunk);
        if orphans.is_empty() {
            return Ok(0);
        }
        if self.ctx.is_dry_run() {
            return Err(StageExit::OutOfDate);
        }
        Ok(self.delete_orphans(caches, translator, &orphans))
    }

    /// Makes sure every output root exists and walks it so that files left
    /// by an earlier process are seen.
    ///
    /// Idempotent; empty directories are never removed.
    pub fn refresh(&self, dirs: &[PathBuf]) -> Result<RefreshReport, StageExit> {
        let mut report = RefreshReport::default();
        for dir in dirs {
            self.ctx.check_cancelled()?;
            if !dir.exists() {
                if self.ctx.is_dry_run() {
                    continue;
                }
                if let Err(e) = std::fs::create_dir_all(dir) {
                    self.ctx.emit(
                        Diagnostic::error(format!(
                            "cannot create output directory {}: {e}",
                            dir.display()
                        ))
                        .with_code(DiagnosticCode::CANNOT_CREATE_OUTPUT),
                    );
                    continue;
                }
                report.created_dirs += 1;
            }
            for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
                self.ctx.check_cancelled()?;
                if entry.file_type().is_file() {
                    report.files += 1;
                }
            }
        }
        info!(
            roots = dirs.len(),
            created = report.created_dirs,
            files = report.files,
            "refreshed output roots"
        );
        Ok(report)
    }
}

/// Removes directories left empty, walking up from each of `dirs` and
/// stopping at output roots.
pub fn prune_empty_dirs(dirs: impl IntoIterator<Item = PathBuf>, roots: &[PathBuf]) {
    let mut dirs: Vec<PathBuf> = dirs.into_iter().collect();
    // Deepest first, so children go before their parents.
    dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));
    for dir in dirs {
        let mut current = Some(dir.as_path());
        while let Some(dir) = current {
            if roots.iter().any(|r| r == dir) || !roots.iter().any(|r| dir.starts_with(r)) {
                break;
            }
            let empty = std::fs::read_dir(dir)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if !empty || std::fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}
