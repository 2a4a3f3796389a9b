//! Configuration types deserialized from `kiln.toml`.

use serde::Deserialize;

/// The top-level project configuration parsed from `kiln.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectConfig {
    /// Core project metadata.
    pub project: ProjectMeta,
    /// Build-wide settings.
    #[serde(default)]
    pub build: BuildConfig,
    /// The project's modules, in declaration order.
    #[serde(default, rename = "module")]
    pub modules: Vec<ModuleConfig>,
}

/// Core project metadata required in every `kiln.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectMeta {
    /// The project name.
    pub name: String,
    /// The project version string.
    #[serde(default)]
    pub version: String,
}

/// Build-wide settings from the `[build]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    /// Directory holding persistent build caches, relative to the project.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
    /// Whether a rebuild wipes whole output roots rather than only tracked outputs.
    #[serde(default = "default_true")]
    pub clear_output_directory: bool,
    /// Refresh output trees on every build instead of once per process.
    #[serde(default)]
    pub refresh_outputs_on_start: bool,
    /// Polling interval, in milliseconds, of blocking waits.
    #[serde(default = "default_poll_ms")]
    pub readiness_poll_ms: u64,
    /// Paths that the output reconciler must never delete.
    #[serde(default)]
    pub externally_managed: Vec<String>,
    /// File extensions handled by the built-in resource copier.
    #[serde(default = "default_resource_extensions")]
    pub resource_extensions: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            clear_output_directory: true,
            refresh_outputs_on_start: false,
            readiness_poll_ms: default_poll_ms(),
            externally_managed: Vec::new(),
            resource_extensions: default_resource_extensions(),
        }
    }
}

fn default_cache_dir() -> String {
    ".kiln/cache".to_string()
}

fn default_true() -> bool {
    true
}

fn default_poll_ms() -> u64 {
    500
}

fn default_resource_extensions() -> Vec<String> {
    ["txt", "json", "properties"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// A single `[[module]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleConfig {
    /// The module name, unique within the project.
    pub name: String,
    /// Production source roots.
    #[serde(default)]
    pub sources: Vec<String>,
    /// Test source roots.
    #[serde(default)]
    pub tests: Vec<String>,
    /// Production output directory.
    #[serde(default)]
    pub output: Option<String>,
    /// Test output directory.
    #[serde(default)]
    pub test_output: Option<String>,
    /// Root for sources produced by the generation stage.
    #[serde(default)]
    pub generated: Option<String>,
    /// Names of modules this module depends on.
    #[serde(default)]
    pub dependencies: Vec<String>,
}
