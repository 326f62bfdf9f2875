//! GPKG Compositor - merge geospatial layers into GeoPackages
//!
//! This library builds one self-consistent GeoPackage layer out of several
//! contributing layers:
//!
//! - a merged feature table with a harmonized schema, re-linked styles and
//!   deduplicated media attachments
//! - a web-Mercator tile pyramid composited from raster or rendered layers
//!
//! Builds run in the background, report throttled [`build::BuildStatus`]
//! updates and can be cancelled at any time.
//!
//! # Modules
//!
//! | Module | Role |
//! |---|---|
//! | [`coord`] | Tile and bounding box math |
//! | [`layer`] | Layer abstraction and collaborator traits |
//! | [`gpkg`] | GeoPackage data access and GeoPackage-backed layers |
//! | [`schema`] | Schema merging |
//! | [`style`] | Style and icon migration |
//! | [`media`] | Media attachment migration |
//! | [`pyramid`] | Tile pyramid planning |
//! | [`composite`] | Tile compositing and encoding |
//! | [`build`] | Build orchestration, status and progress |
//! | [`config`] | Build configuration and settings |
//!
//! # Example
//!
//! ```ignore
//! use gpkg_compositor::build::BuildOrchestrator;
//! use gpkg_compositor::config::TileBuildConfig;
//! use tokio_util::sync::CancellationToken;
//!
//! let orchestrator = BuildOrchestrator::default();
//! let (tx, mut rx) = orchestrator.status_channel();
//! let config = TileBuildConfig::new("out.gpkg", "basemap", layers, 0, 8);
//! let outcome = orchestrator
//!     .build_tile_layer(config, tx, CancellationToken::new())
//!     .await;
//! ```

pub mod build;
pub mod composite;
pub mod config;
pub mod coord;
pub mod error;
pub mod gpkg;
pub mod layer;
pub mod logging;
pub mod media;
pub mod pyramid;
pub mod schema;
pub mod style;

pub use build::{BuildOrchestrator, BuildOutcome, BuildReport, BuildState, BuildStatus};
pub use config::{CompositorSettings, FeatureBuildConfig, TileBuildConfig};
pub use error::BuildError;
pub use layer::LayerSource;

/// Version of the library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
