//! Compile scopes: which files and modules a build considers.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::model::{ModuleId, ProjectModel};

/// The universe of candidate files and modules for one build.
pub trait CompileScope {
    /// Every candidate file, sorted.
    fn files(&self, project: &ProjectModel) -> Vec<PathBuf>;

    /// Returns `true` if `file` is a candidate.
    fn belongs(&self, project: &ProjectModel, file: &Path) -> bool;

    /// Modules whose files may be compiled, in project order.
    fn affected_modules(&self, project: &ProjectModel) -> Vec<ModuleId>;
}

/// Every file of every module.
pub struct ProjectScope;

impl CompileScope for ProjectScope {
    fn files(&self, project: &ProjectModel) -> Vec<PathBuf> {
        project
            .modules()
            .iter()
            .flat_map(|m| project.source_files(m.id))
            .collect()
    }

    fn belongs(&self, project: &ProjectModel, file: &Path) -> bool {
        project.module_of(file).is_some()
    }

    fn affected_modules(&self, project: &ProjectModel) -> Vec<ModuleId> {
        project.modules().iter().map(|m| m.id).collect()
    }
}

/// Every file of a fixed set of modules.
pub struct ModuleScope {
    modules: BTreeSet<ModuleId>,
}

impl ModuleScope {
    /// A scope covering the given modules.
    pub fn new(modules: impl IntoIterator<Item = ModuleId>) -> Self {
        Self {
            modules: modules.into_iter().collect(),
        }
    }
}

impl CompileScope for ModuleScope {
    fn files(&self, project: &ProjectModel) -> Vec<PathBuf> {
        self.modules
            .iter()
            .flat_map(|id| project.source_files(*id))
            .collect()
    }

    fn belongs(&self, project: &ProjectModel, file: &Path) -> bool {
        project
            .module_of(file)
            .is_some_and(|(id, _)| self.modules.contains(&id))
    }

    fn affected_modules(&self, _project: &ProjectModel) -> Vec<ModuleId> {
        self.modules.iter().copied().collect()
    }
}

/// An explicit list of files.
pub struct FileSetScope {
    files: BTreeSet<PathBuf>,
}

impl FileSetScope {
    /// A scope covering exactly the given files.
    pub fn new(files: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            files: files.into_iter().collect(),
        }
    }
}

impl CompileScope for FileSetScope {
    fn files(&self, project: &ProjectModel) -> Vec<PathBuf> {
        self.files
            .iter()
            .filter(|f| f.is_file() && project.module_of(f).is_some())
            .cloned()
            .collect()
    }

    fn belongs(&self, _project: &ProjectModel, file: &Path) -> bool {
        self.files.contains(file)
    }

    fn affected_modules(&self, project: &ProjectModel) -> Vec<ModuleId> {
        let modules: BTreeSet<ModuleId> = self
            .files
            .iter()
            .filter_map(|f| project.module_of(f).map(|(id, _)| id))
            .collect();
        modules.into_iter().collect()
    }
}

/// The union of several scopes.
pub struct CompositeScope {
    scopes: Vec<Arc<dyn CompileScope>>,
}

impl CompositeScope {
    /// A scope covering everything any of `scopes` covers.
    pub fn new(scopes: Vec<Arc<dyn CompileScope>>) -> Self {
        Self { scopes }
    }
}

impl CompileScope for CompositeScope {
    fn files(&self, project: &ProjectModel) -> Vec<PathBuf> {
        let files: BTreeSet<PathBuf> = self
            .scopes
            .iter()
            .flat_map(|s| s.files(project))
            .collect();
        files.into_iter().collect()
    }

    fn belongs(&self, project: &ProjectModel, file: &Path) -> bool {
        self.scopes.iter().any(|s| s.belongs(project, file))
    }

    fn affected_modules(&self, project: &ProjectModel) -> Vec<ModuleId> {
        let modules: BTreeSet<ModuleId> = self
            .scopes
            .iter()
            .flat_map(|s| s.affected_modules(project))
            .collect();
        modules.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_config::load_config_from_str;

    fn project(dir: &Path) -> ProjectModel {
        let config = load_config_from_str(
            r#"
[project]
name = "demo"

[[module]]
name = "a"
sources = ["a"]
output = "out/a"

[[module]]
name = "b"
sources = ["b"]
output = "out/b"
"#,
        )
        .unwrap();
        for (file, body) in [("a/x.src", ""), ("b/y.src", ""), ("b/z.src", "")] {
            let path = dir.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, body).unwrap();
        }
        ProjectModel::from_config(dir, &config)
    }

    #[test]
    fn project_scope_covers_everything() {
        let dir = tempfile::tempdir().unwrap();
        let project = project(dir.path());
        assert_eq!(ProjectScope.files(&project).len(), 3);
        assert_eq!(ProjectScope.affected_modules(&project).len(), 2);
        assert!(!ProjectScope.belongs(&project, &dir.path().join("other/q.src")));
    }

    #[test]
    fn module_scope_limits_files() {
        let dir = tempfile::tempdir().unwrap();
        let project = project(dir.path());
        let scope = ModuleScope::new([ModuleId::from_raw(1)]);
        assert_eq!(scope.files(&project).len(), 2);
        assert!(scope.belongs(&project, &dir.path().join("b/y.src")));
        assert!(!scope.belongs(&project, &dir.path().join("a/x.src")));
    }

    #[test]
    fn file_set_scope_skips_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let project = project(dir.path());
        let scope = FileSetScope::new([
            dir.path().join("a/x.src"),
            dir.path().join("a/gone.src"),
        ]);
        assert_eq!(scope.files(&project), vec![dir.path().join("a/x.src")]);
        assert_eq!(scope.affected_modules(&project), vec![ModuleId::from_raw(0)]);
    }

    #[test]
    fn composite_is_a_union() {
        let dir = tempfile::tempdir().unwrap();
        let project = project(dir.path());
        let scope = CompositeScope::new(vec![
            Arc::new(FileSetScope::new([dir.path().join("a/x.src")])),
            Arc::new(ModuleScope::new([ModuleId::from_raw(1)])),
        ]);
        assert_eq!(scope.files(&project).len(), 3);
        assert!(scope.belongs(&project, &dir.path().join("a/x.src")));
        assert_eq!(scope.affected_modules(&project).len(), 2);
    }
}
