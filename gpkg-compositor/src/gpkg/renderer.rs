//! [`TileRenderer`] over a web-Mercator tile table of an existing GeoPackage.

use std::path::Path;

use image::RgbaImage;

use crate::coord::{BoundingBox, TileCoord};
use crate::layer::{LayerError, TileRenderer};

use super::{GeoPackage, GpkgError, GpkgResult};

/// Serves stored tiles of one tile table as layer images.
///
/// Tiles are decoded with whatever format `image` detects, so PNG and JPEG
/// tables both work. Missing tiles render as nothing.
#[derive(Debug)]
pub struct GeoPackageTileRenderer {
    gpkg: GeoPackage,
    table: String,
}

impl GeoPackageTileRenderer {
    pub fn open(path: impl AsRef<Path>, table: impl Into<String>) -> GpkgResult<Self> {
        let gpkg = GeoPackage::open_read_only(path)?;
        let table = table.into();
        if !gpkg.table_exists(&table)? {
            return Err(GpkgError::MissingTable(table));
        }
        Ok(Self { gpkg, table })
    }

    /// Extent recorded in `gpkg_contents`.
    pub fn extent(&self) -> GpkgResult<Option<BoundingBox>> {
        self.gpkg.contents_bounds(&self.table)
    }
}

impl TileRenderer for GeoPackageTileRenderer {
    fn render_tile(&self, tile: TileCoord) -> Result<Option<RgbaImage>, LayerError> {
        let Some(bytes) = self.gpkg.read_tile(&self.table, &tile)? else {
            return Ok(None);
        };
        let image = image::load_from_memory(&bytes)?;
        Ok(Some(image.to_rgba8()))
    }
}
