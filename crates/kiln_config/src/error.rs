//! What can go wrong while reading `kiln.toml`.

/// A `kiln.toml` that could not be read or does not describe a usable project.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read kiln.toml: {0}")]
    IoError(#[from] std::io::Error),

    /// The file is not valid TOML for the project layout.
    #[error("malformed kiln.toml: {0}")]
    ParseError(String),

    /// A module lists a dependency that no `[[module]]` table declares.
    #[error("module '{module}' depends on unknown module '{dependency}'")]
    UnknownModule {
        /// The module declaring the dependency.
        module: String,
        /// The name it could not resolve.
        dependency: String,
    },

    /// A field the project cannot do without is absent or empty.
    #[error("kiln.toml is missing {0}")]
    MissingField(String),

    /// The file parsed but describes an impossible project.
    #[error("invalid kiln.toml: {0}")]
    ValidationError(String),
}
