//! Build-level error types.

use thiserror::Error;

use crate::config::ConfigError;
use crate::gpkg::GpkgError;
use crate::layer::LayerError;
use crate::pyramid::PlanError;

/// Fatal errors that end a build before or while it prepares.
///
/// Per-feature, per-tile and per-media failures never surface here; they
/// are logged and counted in the build report.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The build configuration was rejected.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The requested target table already exists.
    #[error("Table '{0}' already exists in the target GeoPackage")]
    TableExists(String),

    /// The target container could not be opened, created or written.
    #[error("Target GeoPackage error: {0}")]
    Target(GpkgError),

    /// The tile pyramid could not be planned.
    #[error("Planning failed: {0}")]
    Plan(#[from] PlanError),

    /// A contributing layer could not be read while preparing.
    #[error("Layer '{layer}' could not be read: {source}")]
    Layer {
        layer: String,
        #[source]
        source: LayerError,
    },

    /// The background build task stopped unexpectedly.
    #[error("Build task failed: {0}")]
    Task(String),
}

impl From<GpkgError> for BuildError {
    fn from(err: GpkgError) -> Self {
        match err {
            GpkgError::TableExists(table) => BuildError::TableExists(table),
            other => BuildError::Target(other),
        }
    }
}

/// Failure while migrating one source's styles or one item's media.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error(transparent)]
    Gpkg(#[from] GpkgError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_exists_is_lifted() {
        let err = BuildError::from(GpkgError::TableExists("roads".to_string()));
        assert!(matches!(err, BuildError::TableExists(ref t) if t == "roads"));
        assert_eq!(
            err.to_string(),
            "Table 'roads' already exists in the target GeoPackage"
        );
    }

    #[test]
    fn test_plan_errors_are_fatal() {
        let err = BuildError::from(PlanError::NoOverlap);
        assert!(matches!(err, BuildError::Plan(PlanError::NoOverlap)));
    }

    #[test]
    fn test_other_gpkg_errors_are_target_errors() {
        let err = BuildError::from(GpkgError::MissingTable("x".to_string()));
        assert!(matches!(err, BuildError::Target(_)));
    }
}
