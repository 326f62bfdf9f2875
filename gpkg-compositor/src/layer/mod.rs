//! Layer abstraction consumed by the compositor.
//!
//! A [`LayerSource`] describes one contributing layer: where it came from,
//! its extent, opacity and rendering order, and the collaborators that can
//! produce its content. Two collaborator traits sit at this seam:
//!
//! - [`TileRenderer`] - renders the layer into a single web-Mercator tile
//! - [`VectorSource`] - exposes a vector layer's schema, features, styling
//!   and media relations
//!
//! Both are implemented outside the compositor core (map renderers, format
//! readers). The [`crate::gpkg`] module ships GeoPackage-backed
//! implementations used by the CLI.
//!
//! ```text
//!   LayerSource ──┬── Vector { VectorSource, Option<TileRenderer> }
//!                 └── Raster { TileRenderer }
//! ```

mod types;

pub use types::{
    Feature, FeatureStyleLink, Geometry, GeometryType, IconRow, MediaReference, MediaRow,
    StyleKind, StyleRow, TableStyleDefault, Value,
};

use std::fmt;
use std::ops::ControlFlow;
use std::path::PathBuf;

use image::RgbaImage;
use thiserror::Error;

use crate::coord::{BoundingBox, TileCoord};
use crate::schema::RawColumnSet;

/// Errors raised by layer collaborators.
#[derive(Debug, Error)]
pub enum LayerError {
    /// Rendering a tile failed.
    #[error("Render failed for tile {tile}: {reason}")]
    Render { tile: TileCoord, reason: String },

    /// Reading from the layer's backing store failed.
    #[error("Read failed: {0}")]
    Read(String),

    /// A referenced row does not exist.
    #[error("{table} row {id} not found")]
    MissingRow { table: String, id: i64 },

    /// SQLite error from a GeoPackage-backed layer.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Image decoding error.
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Renders one layer into web-Mercator tiles.
///
/// Returning `Ok(None)` means the layer has nothing to draw for the tile.
/// Errors are tolerated by the compositor: the layer simply contributes
/// nothing to that tile.
pub trait TileRenderer: Send {
    fn render_tile(&self, tile: TileCoord) -> Result<Option<RgbaImage>, LayerError>;
}

/// Read access to a vector layer.
///
/// Implementations are driven from a single background thread, so they need
/// to be `Send` but not `Sync`.
pub trait VectorSource: Send {
    /// Column set of the source feature table, including the primary key
    /// and geometry columns.
    fn columns(&self) -> Result<RawColumnSet, LayerError>;

    /// Number of features, used for progress reporting.
    fn feature_count(&self) -> Result<u64, LayerError>;

    /// Visits every feature in id order until `visit` breaks.
    fn for_each_feature(
        &self,
        visit: &mut dyn FnMut(Feature) -> ControlFlow<()>,
    ) -> Result<(), LayerError>;

    /// Style rows referenced by this layer.
    fn style_rows(&self) -> Result<Vec<StyleRow>, LayerError>;

    /// Icon rows referenced by this layer.
    fn icon_rows(&self) -> Result<Vec<IconRow>, LayerError>;

    /// True if the layer references any style or icon row.
    fn has_styles(&self) -> Result<bool, LayerError> {
        Ok(!self.style_rows()?.is_empty() || !self.icon_rows()?.is_empty())
    }

    /// Feature-level style and icon assignments.
    fn feature_style_mapping(&self) -> Result<Vec<FeatureStyleLink>, LayerError>;

    /// Table-level default style and icon assignments.
    fn table_style_mapping(&self) -> Result<Vec<TableStyleDefault>, LayerError>;

    /// Non-icon media rows attached to a feature.
    fn media_relations(&self, feature_id: i64) -> Result<Vec<MediaReference>, LayerError>;

    /// Fetches the payload of a referenced media row.
    fn media_row(&self, reference: &MediaReference) -> Result<MediaRow, LayerError>;
}

/// Kind-specific collaborators of a layer.
pub enum LayerKind {
    Vector {
        source: Box<dyn VectorSource>,
        renderer: Option<Box<dyn TileRenderer>>,
    },
    Raster {
        renderer: Box<dyn TileRenderer>,
    },
}

impl fmt::Debug for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Vector { renderer, .. } => f
                .debug_struct("Vector")
                .field("renderer", &renderer.is_some())
                .finish(),
            LayerKind::Raster { .. } => f.debug_struct("Raster").finish(),
        }
    }
}

/// One contributing layer of a build.
///
/// Owned by the caller and only read by the compositor.
#[derive(Debug)]
pub struct LayerSource {
    /// Stable identity of the layer, used as the parent id of id remaps.
    pub id: String,
    /// Path of the container the layer was read from.
    pub container_path: PathBuf,
    /// Table or layer name inside the origin container.
    pub table_name: String,
    /// Layer extent, if known.
    pub extent: Option<BoundingBox>,
    /// Opacity used when compositing, 0.0 to 1.0.
    pub opacity: f32,
    /// Layers with a lower index are drawn first.
    pub rendering_order: i32,
    pub kind: LayerKind,
}

impl LayerSource {
    pub fn vector(
        id: impl Into<String>,
        container_path: impl Into<PathBuf>,
        table_name: impl Into<String>,
        source: Box<dyn VectorSource>,
    ) -> Self {
        Self {
            id: id.into(),
            container_path: container_path.into(),
            table_name: table_name.into(),
            extent: None,
            opacity: 1.0,
            rendering_order: 0,
            kind: LayerKind::Vector {
                source,
                renderer: None,
            },
        }
    }

    pub fn raster(
        id: impl Into<String>,
        container_path: impl Into<PathBuf>,
        table_name: impl Into<String>,
        renderer: Box<dyn TileRenderer>,
    ) -> Self {
        Self {
            id: id.into(),
            container_path: container_path.into(),
            table_name: table_name.into(),
            extent: None,
            opacity: 1.0,
            rendering_order: 0,
            kind: LayerKind::Raster { renderer },
        }
    }

    pub fn with_extent(mut self, extent: BoundingBox) -> Self {
        self.extent = Some(extent);
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_rendering_order(mut self, order: i32) -> Self {
        self.rendering_order = order;
        self
    }

    /// Attaches a renderer to a vector layer so it can join tile builds.
    pub fn with_renderer(mut self, renderer: Box<dyn TileRenderer>) -> Self {
        match &mut self.kind {
            LayerKind::Vector { renderer: slot, .. } => *slot = Some(renderer),
            LayerKind::Raster { renderer: slot } => *slot = renderer,
        }
        self
    }

    pub fn vector_source(&self) -> Option<&dyn VectorSource> {
        match &self.kind {
            LayerKind::Vector { source, .. } => Some(source.as_ref()),
            LayerKind::Raster { .. } => None,
        }
    }

    pub fn renderer(&self) -> Option<&dyn TileRenderer> {
        match &self.kind {
            LayerKind::Vector { renderer, .. } => renderer.as_deref(),
            LayerKind::Raster { renderer } => Some(renderer.as_ref()),
        }
    }
}
