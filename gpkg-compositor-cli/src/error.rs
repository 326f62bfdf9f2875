//! CLI error type.

use std::fmt;
use std::io;

use gpkg_compositor::config::ConfigFileError;
use gpkg_compositor::gpkg::GpkgError;
use gpkg_compositor::BuildError;

/// Errors surfaced to the user by the CLI.
#[derive(Debug)]
pub enum CliError {
    /// Invalid arguments or settings.
    Config(String),
    /// The settings file could not be read.
    Settings(ConfigFileError),
    /// Logging could not be set up.
    Logging(io::Error),
    /// A source GeoPackage could not be opened.
    Source { spec: String, error: GpkgError },
    /// The build failed.
    Build(BuildError),
    /// The build was stopped with Ctrl+C.
    Cancelled,
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Cancelled => 130,
            CliError::Config(_) | CliError::Settings(_) => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "{}", msg),
            CliError::Settings(e) => write!(f, "Failed to load settings: {}", e),
            CliError::Logging(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Source { spec, error } => {
                write!(f, "Failed to open source '{}': {}", spec, error)
            }
            CliError::Build(e) => write!(f, "Build failed: {}", e),
            CliError::Cancelled => write!(f, "Build cancelled"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Settings(e)
    }
}

impl From<BuildError> for CliError {
    fn from(e: BuildError) -> Self {
        CliError::Build(e)
    }
}
