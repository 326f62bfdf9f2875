//! Web-Mercator tile tables and the tile scaling extension.

use rusqlite::{params, OptionalExtension};

use crate::coord::{BoundingBox, TileCoord, WEB_MERCATOR_HALF_WORLD};

use super::{quote, GeoPackage, GpkgError, GpkgResult, SRS_WEB_MERCATOR, SRS_WGS84};

/// Name of the tile scaling extension table.
pub const TILE_SCALING_TABLE: &str = "gpkgext_tile_scaling";
/// Extension name registered for scaled tile tables.
pub const TILE_SCALING_EXTENSION: &str = "nga_tile_scaling";
const TILE_SCALING_DEFINITION: &str = "http://ngageoint.github.io/GeoPackage/docs/extensions/tile-scaling.html";

/// Scaling configuration of one tile table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileScalingRow {
    pub scaling_type: String,
    pub zoom_in: Option<u8>,
    pub zoom_out: Option<u8>,
}

impl GeoPackage {
    /// Creates an XYZ web-Mercator tile table with one tile matrix per zoom
    /// in `min_zoom..=max_zoom`.
    ///
    /// The matrix set spans the whole EPSG:3857 world; `contents` (EPSG:4326)
    /// records where tiles actually exist.
    pub fn create_tile_table(
        &self,
        table: &str,
        contents: &BoundingBox,
        min_zoom: u8,
        max_zoom: u8,
        tile_size: u32,
    ) -> GpkgResult<()> {
        if self.table_exists(table)? {
            return Err(GpkgError::TableExists(table.to_string()));
        }

        self.conn().execute_batch(&format!(
            "CREATE TABLE {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                zoom_level INTEGER NOT NULL,
                tile_column INTEGER NOT NULL,
                tile_row INTEGER NOT NULL,
                tile_data BLOB NOT NULL,
                UNIQUE (zoom_level, tile_column, tile_row)
            )",
            quote(table)
        ))?;
        self.register_contents(table, "tiles", Some(contents), Some(SRS_WGS84))?;
        self.conn().execute(
            "INSERT INTO gpkg_tile_matrix_set (table_name, srs_id, min_x, min_y, max_x, max_y)
             VALUES (?1, ?2, ?3, ?3, ?4, ?4)",
            params![
                table,
                SRS_WEB_MERCATOR,
                -WEB_MERCATOR_HALF_WORLD,
                WEB_MERCATOR_HALF_WORLD
            ],
        )?;

        let mut insert = self.conn().prepare(
            "INSERT INTO gpkg_tile_matrix
                (table_name, zoom_level, matrix_width, matrix_height,
                 tile_width, tile_height, pixel_x_size, pixel_y_size)
             VALUES (?1, ?2, ?3, ?3, ?4, ?4, ?5, ?5)",
        )?;
        for zoom in min_zoom..=max_zoom {
            let matrix = 1i64 << zoom;
            let pixel_size = 2.0 * WEB_MERCATOR_HALF_WORLD / (matrix as f64 * tile_size as f64);
            insert.execute(params![table, zoom, matrix, tile_size, pixel_size])?;
        }
        Ok(())
    }

    /// Writes one tile, replacing any existing tile at the same coordinate.
    pub fn insert_tile(&self, table: &str, tile: &TileCoord, data: &[u8]) -> GpkgResult<()> {
        let mut statement = self.conn().prepare_cached(&format!(
            "INSERT OR REPLACE INTO {} (zoom_level, tile_column, tile_row, tile_data)
             VALUES (?1, ?2, ?3, ?4)",
            quote(table)
        ))?;
        statement.execute(params![tile.zoom, tile.col, tile.row, data])?;
        Ok(())
    }

    /// Reads one tile's encoded bytes.
    pub fn read_tile(&self, table: &str, tile: &TileCoord) -> GpkgResult<Option<Vec<u8>>> {
        let mut statement = self.conn().prepare_cached(&format!(
            "SELECT tile_data FROM {}
              WHERE zoom_level = ?1 AND tile_column = ?2 AND tile_row = ?3",
            quote(table)
        ))?;
        Ok(statement
            .query_row(params![tile.zoom, tile.col, tile.row], |row| row.get(0))
            .optional()?)
    }

    /// Number of tiles stored at each zoom level, ascending.
    pub fn tile_counts_by_zoom(&self, table: &str) -> GpkgResult<Vec<(u8, u64)>> {
        let mut statement = self.conn().prepare(&format!(
            "SELECT zoom_level, COUNT(*) FROM {} GROUP BY zoom_level ORDER BY zoom_level",
            quote(table)
        ))?;
        let counts = statement
            .query_map([], |row| {
                let zoom: u8 = row.get(0)?;
                let count: i64 = row.get(1)?;
                Ok((zoom, count as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    /// Zoom levels with a tile matrix defined for `table`.
    pub fn tile_matrix_zooms(&self, table: &str) -> GpkgResult<Vec<u8>> {
        let mut statement = self.conn().prepare(
            "SELECT zoom_level FROM gpkg_tile_matrix WHERE table_name = ?1 ORDER BY zoom_level",
        )?;
        let zooms = statement
            .query_map([table], |row| row.get(0))?
            .collect::<Result<Vec<u8>, _>>()?;
        Ok(zooms)
    }

    /// Records `in_out` tile scaling for a tile table and registers the
    /// extension.
    pub fn create_tile_scaling(&self, table: &str, zoom_in: u8, zoom_out: u8) -> GpkgResult<()> {
        self.conn().execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {TILE_SCALING_TABLE} (
                table_name TEXT PRIMARY KEY NOT NULL,
                scaling_type TEXT NOT NULL,
                zoom_in INTEGER,
                zoom_out INTEGER
            )"
        ))?;
        self.register_extension(
            Some(TILE_SCALING_TABLE),
            None,
            TILE_SCALING_EXTENSION,
            TILE_SCALING_DEFINITION,
        )?;
        self.register_extension(
            Some(table),
            Some("tile_data"),
            TILE_SCALING_EXTENSION,
            TILE_SCALING_DEFINITION,
        )?;
        self.conn().execute(
            &format!(
                "INSERT OR REPLACE INTO {TILE_SCALING_TABLE}
                    (table_name, scaling_type, zoom_in, zoom_out)
                 VALUES (?1, 'in_out', ?2, ?3)"
            ),
            params![table, zoom_in, zoom_out],
        )?;
        Ok(())
    }

    /// Scaling configuration of a tile table, if any.
    pub fn tile_scaling(&self, table: &str) -> GpkgResult<Option<TileScalingRow>> {
        if !self.table_exists(TILE_SCALING_TABLE)? {
            return Ok(None);
        }
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT scaling_type, zoom_in, zoom_out FROM {TILE_SCALING_TABLE}
                      WHERE table_name = ?1"
                ),
                [table],
                |row| {
                    Ok(TileScalingRow {
                        scaling_type: row.get(0)?,
                        zoom_in: row.get(1)?,
                        zoom_out: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox() -> BoundingBox {
        BoundingBox::new(10.0, 10.0, 12.0, 12.0)
    }

    #[test]
    fn test_create_tile_table_defines_matrices() {
        let gpkg = GeoPackage::open_in_memory().unwrap();
        gpkg.create_tile_table("basemap", &bbox(), 2, 4, 256).unwrap();

        assert_eq!(gpkg.tile_matrix_zooms("basemap").unwrap(), vec![2, 3, 4]);
        let width: i64 = gpkg
            .conn()
            .query_row(
                "SELECT matrix_width FROM gpkg_tile_matrix WHERE table_name = 'basemap' AND zoom_level = 3",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(width, 8);
        assert_eq!(gpkg.contents_bounds("basemap").unwrap(), Some(bbox()));
    }

    #[test]
    fn test_insert_tile_replaces_existing() {
        let gpkg = GeoPackage::open_in_memory().unwrap();
        gpkg.create_tile_table("basemap", &bbox(), 0, 2, 256).unwrap();
        let tile = TileCoord::new(2, 2, 1);

        gpkg.insert_tile("basemap", &tile, &[1, 2, 3]).unwrap();
        gpkg.insert_tile("basemap", &tile, &[4, 5]).unwrap();

        assert_eq!(gpkg.read_tile("basemap", &tile).unwrap(), Some(vec![4, 5]));
        assert_eq!(gpkg.row_count("basemap").unwrap(), 1);
        assert_eq!(gpkg.tile_counts_by_zoom("basemap").unwrap(), vec![(2, 1)]);
        assert_eq!(
            gpkg.read_tile("basemap", &TileCoord::new(2, 0, 0)).unwrap(),
            None
        );
    }

    #[test]
    fn test_tile_scaling_recorded() {
        let gpkg = GeoPackage::open_in_memory().unwrap();
        gpkg.create_tile_table("basemap", &bbox(), 0, 6, 256).unwrap();
        assert_eq!(gpkg.tile_scaling("basemap").unwrap(), None);

        gpkg.create_tile_scaling("basemap", 6, 1).unwrap();
        let scaling = gpkg.tile_scaling("basemap").unwrap().unwrap();
        assert_eq!(scaling.scaling_type, "in_out");
        assert_eq!(scaling.zoom_in, Some(6));
        assert_eq!(scaling.zoom_out, Some(1));
    }

    #[test]
    fn test_duplicate_tile_table_rejected() {
        let gpkg = GeoPackage::open_in_memory().unwrap();
        gpkg.create_tile_table("basemap", &bbox(), 0, 1, 256).unwrap();
        let result = gpkg.create_tile_table("basemap", &bbox(), 0, 1, 256);
        assert!(matches!(result, Err(GpkgError::TableExists(_))));
    }
}
