//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::ProjectConfig;
use std::collections::HashSet;
use std::path::Path;

/// The name of the project configuration file.
pub const CONFIG_FILE_NAME: &str = "kiln.toml";

/// Loads and validates a `kiln.toml` configuration from a project directory.
pub fn load_config(project_dir: &Path) -> Result<ProjectConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE_NAME);
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<ProjectConfig, ConfigError> {
    let config: ProjectConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Checks required fields and the consistency of the module graph.
///
/// Output directories are not checked here: a module without sources may
/// legitimately omit them, and that check needs the filesystem.
fn validate_config(config: &ProjectConfig) -> Result<(), ConfigError> {
    if config.project.name.is_empty() {
        return Err(ConfigError::MissingField("project.name".to_string()));
    }
    if config.build.readiness_poll_ms == 0 {
        return Err(ConfigError::ValidationError(
            "build.readiness_poll_ms must be positive".to_string(),
        ));
    }

    let mut names = HashSet::new();
    for module in &config.modules {
        if module.name.is_empty() {
            return Err(ConfigError::MissingField("module.name".to_string()));
        }
        if !names.insert(module.name.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate module name '{}'",
                module.name
            )));
        }
    }

    for module in &config.modules {
        for dep in &module.dependencies {
            if dep == &module.name {
                return Err(ConfigError::ValidationError(format!(
                    "module '{}' depends on itself",
                    module.name
                )));
            }
            if !names.contains(dep.as_str()) {
                return Err(ConfigError::UnknownModule {
                    module: module.name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
    Ok(())
}
