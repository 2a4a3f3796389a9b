//! The project model: modules, their roots, and their dependency edges.

use std::path::{Path, PathBuf};
use std::time::Duration;

use kiln_config::ProjectConfig;
use walkdir::WalkDir;

/// Index of a module within its [`ProjectModel`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ModuleId(u32);

impl ModuleId {
    /// Creates a `ModuleId` from a raw index.
    pub fn from_raw(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index.
    pub fn as_raw(self) -> u32 {
        self.0
    }

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A directory holding sources of a module.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceRoot {
    /// Absolute path of the root.
    pub path: PathBuf,
    /// Whether the root holds test sources.
    pub is_test: bool,
}

/// A named compilation unit.
#[derive(Clone, Debug)]
pub struct Module {
    /// The module's index in the project.
    pub id: ModuleId,
    /// The module name.
    pub name: String,
    /// Production and test source roots.
    pub source_roots: Vec<SourceRoot>,
    /// Production output directory.
    pub output: Option<PathBuf>,
    /// Test output directory.
    pub test_output: Option<PathBuf>,
    /// Root receiving sources produced by the generation stage.
    pub generated_root: Option<PathBuf>,
    /// Modules this module depends on.
    pub dependencies: Vec<ModuleId>,
}

impl Module {
    /// The output directory for production or test sources.
    pub fn output_for(&self, is_test: bool) -> Option<&Path> {
        if is_test {
            self.test_output.as_deref()
        } else {
            self.output.as_deref()
        }
    }

    /// Every configured output directory of the module.
    pub fn output_dirs(&self) -> Vec<&Path> {
        self.output
            .iter()
            .chain(self.test_output.iter())
            .map(PathBuf::as_path)
            .collect()
    }

    /// Source roots plus the generated root, which counts as production sources.
    pub fn all_roots(&self) -> Vec<SourceRoot> {
        let mut roots = self.source_roots.clone();
        if let Some(generated) = &self.generated_root {
            roots.push(SourceRoot {
                path: generated.clone(),
                is_test: false,
            });
        }
        roots
    }
}

/// Build-wide settings with paths resolved against the project directory.
#[derive(Clone, Debug)]
pub struct BuildSettings {
    /// Directory holding the persistent caches.
    pub cache_dir: PathBuf,
    /// Whether a rebuild wipes whole output roots.
    pub clear_output_directory: bool,
    /// Whether outputs are refreshed on every build.
    pub refresh_outputs_on_start: bool,
    /// Polling interval of blocking waits.
    pub readiness_poll: Duration,
    /// Paths the reconciler must never delete.
    pub externally_managed: Vec<PathBuf>,
    /// Extensions handled by resource copying.
    pub resource_extensions: Vec<String>,
}

/// The modules of a project, immutable for the duration of a build.
#[derive(Clone, Debug)]
pub struct ProjectModel {
    root: PathBuf,
    name: String,
    modules: Vec<Module>,
    settings: BuildSettings,
}

impl ProjectModel {
    /// Builds the model from a validated configuration.
    pub fn from_config(project_dir: &Path, config: &ProjectConfig) -> Self {
        let resolve = |p: &str| project_dir.join(p);
        let id_of = |name: &str| {
            config
                .modules
                .iter()
                .position(|m| m.name == name)
                .map(|i| ModuleId(i as u32))
        };

        let modules = config
            .modules
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let mut source_roots: Vec<SourceRoot> = m
                    .sources
                    .iter()
                    .map(|s| SourceRoot {
                        path: resolve(s),
                        is_test: false,
                    })
                    .collect();
                source_roots.extend(m.tests.iter().map(|s| SourceRoot {
                    path: resolve(s),
                    is_test: true,
                }));
                Module {
                    id: ModuleId(i as u32),
                    name: m.name.clone(),
                    source_roots,
                    output: m.output.as_deref().map(resolve),
                    test_output: m.test_output.as_deref().map(resolve),
                    generated_root: m.generated.as_deref().map(resolve),
                    dependencies: m.dependencies.iter().filter_map(|d| id_of(d)).collect(),
                }
            })
            .collect();

        let build = &config.build;
        let settings = BuildSettings {
            cache_dir: resolve(&build.cache_dir),
            clear_output_directory: build.clear_output_directory,
            refresh_outputs_on_start: build.refresh_outputs_on_start,
            readiness_poll: Duration::from_millis(build.readiness_poll_ms),
            externally_managed: build.externally_managed.iter().map(|p| resolve(p)).collect(),
            resource_extensions: build.resource_extensions.clone(),
        };

        Self {
            root: project_dir.to_path_buf(),
            name: config.project.name.clone(),
            modules,
            settings,
        }
    }

    /// The project directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The project name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Build-wide settings.
    pub fn settings(&self) -> &BuildSettings {
        &self.settings
    }

    /// All modules in declaration order.
    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    /// Looks up a module by id.
    ///
    /// # Panics
    ///
    /// Panics if the id does not belong to this project.
    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.index()]
    }

    /// Looks up a module by name.
    pub fn module_by_name(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    /// Finds the module owning `file` and whether it is a test source.
    ///
    /// The deepest matching root wins, so nested roots resolve to the inner
    /// module.
    pub fn module_of(&self, file: &Path) -> Option<(ModuleId, bool)> {
        let mut best: Option<(usize, ModuleId, bool)> = None;
        for module in &self.modules {
            for root in module.all_roots() {
                if file.starts_with(&root.path) {
                    let depth = root.path.components().count();
                    if best.map_or(true, |(d, _, _)| depth > d) {
                        best = Some((depth, module.id, root.is_test));
                    }
                }
            }
        }
        best.map(|(_, id, is_test)| (id, is_test))
    }

    /// Every file currently under the module's roots, sorted.
    pub fn source_files(&self, id: ModuleId) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .module(id)
            .all_roots()
            .iter()
            .flat_map(|root| {
                WalkDir::new(&root.path)
                    .into_iter()
                    .filter_map(Result::ok)
                    .filter(|e| e.file_type().is_file())
                    .map(|e| e.into_path())
            })
            .collect();
        files.sort();
        files.dedup();
        files
    }

    /// Returns `true` if any of the module's own source roots holds a file.
    pub fn has_source_content(&self, id: ModuleId) -> bool {
        self.module(id).source_roots.iter().any(|root| {
            WalkDir::new(&root.path)
                .into_iter()
                .filter_map(Result::ok)
                .any(|e| e.file_type().is_file())
        })
    }

    /// Every configured output directory, in module order.
    pub fn all_output_dirs(&self) -> Vec<PathBuf> {
        self.modules
            .iter()
            .flat_map(|m| m.output_dirs())
            .map(Path::to_path_buf)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_config::load_config_from_str;

    const CONFIG: &str = r#"
[project]
name = "demo"

[[module]]
name = "core"
sources = ["core/src"]
tests = ["core/tests"]
output = "out/core"
test_output = "out/core-test"
generated = "gen/core"

[[module]]
name = "app"
sources = ["app/src"]
output = "out/app"
dependencies = ["core"]
"#;

    fn model(dir: &Path) -> ProjectModel {
        ProjectModel::from_config(dir, &load_config_from_str(CONFIG).unwrap())
    }

    #[test]
    fn resolves_paths_and_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let project = model(dir.path());
        let app = project.module_by_name("app").unwrap();
        assert_eq!(app.dependencies, vec![ModuleId::from_raw(0)]);
        assert_eq!(app.output.as_deref(), Some(dir.path().join("out/app").as_path()));
        assert_eq!(project.settings().cache_dir, dir.path().join(".kiln/cache"));
        assert_eq!(project.all_output_dirs().len(), 3);
    }

    #[test]
    fn module_of_distinguishes_tests_and_generated() {
        let dir = tempfile::tempdir().unwrap();
        let project = model(dir.path());
        let core = ModuleId::from_raw(0);
        assert_eq!(
            project.module_of(&dir.path().join("core/src/a.src")),
            Some((core, false))
        );
        assert_eq!(
            project.module_of(&dir.path().join("core/tests/t.src")),
            Some((core, true))
        );
        assert_eq!(
            project.module_of(&dir.path().join("gen/core/g.src")),
            Some((core, false))
        );
        assert!(project.module_of(&dir.path().join("elsewhere/x.src")).is_none());
    }

    #[test]
    fn source_files_walks_roots() {
        let dir = tempfile::tempdir().unwrap();
        let project = model(dir.path());
        std::fs::create_dir_all(dir.path().join("core/src/pkg")).unwrap();
        std::fs::create_dir_all(dir.path().join("gen/core")).unwrap();
        std::fs::write(dir.path().join("core/src/b.src"), "").unwrap();
        std::fs::write(dir.path().join("core/src/pkg/a.src"), "").unwrap();
        std::fs::write(dir.path().join("gen/core/g.src"), "").unwrap();

        let files = project.source_files(ModuleId::from_raw(0));
        assert_eq!(files.len(), 3);
        assert!(project.has_source_content(ModuleId::from_raw(0)));
        assert!(!project.has_source_content(ModuleId::from_raw(1)));
    }
}
