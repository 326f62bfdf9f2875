//! GeoPackage data-access layer.
//!
//! A thin layer over `rusqlite` that knows the handful of GeoPackage tables
//! the compositor writes and reads:
//!
//! - core metadata (`gpkg_spatial_ref_sys`, `gpkg_contents`,
//!   `gpkg_geometry_columns`, `gpkg_tile_matrix_set`, `gpkg_tile_matrix`,
//!   `gpkg_extensions`)
//! - feature tables ([`features`])
//! - web-Mercator tile tables and the tile scaling extension ([`tiles`])
//! - the feature style extension ([`style`])
//! - related-tables media ([`media`])
//!
//! Every [`GeoPackage`] owns exactly one SQLite connection. Dropping it
//! closes the connection; [`GeoPackage::close`] does the same but reports
//! errors.
//!
//! The [`source`] and [`renderer`] submodules adapt existing GeoPackages to
//! the [`crate::layer`] collaborator traits.

pub mod features;
pub mod geometry;
pub mod media;
pub mod renderer;
pub mod source;
pub mod style;
pub mod tiles;

pub use geometry::{encode_point, parse_geometry};
pub use renderer::GeoPackageTileRenderer;
pub use source::GeoPackageVectorSource;

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use thiserror::Error;
use tracing::debug;

use crate::coord::{self, BoundingBox};

/// `application_id` of a GeoPackage file ("GPKG").
pub const GPKG_APPLICATION_ID: i32 = 0x4750_4B47;
/// `user_version` written for GeoPackage 1.3.
pub const GPKG_USER_VERSION: i32 = 10300;
/// WGS 84 geographic.
pub const SRS_WGS84: i32 = 4326;
/// WGS 84 / Pseudo-Mercator.
pub const SRS_WEB_MERCATOR: i32 = 3857;

/// Errors raised by the GeoPackage data-access layer.
#[derive(Debug, Error)]
pub enum GpkgError {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The requested table already exists in the container.
    #[error("Table '{0}' already exists")]
    TableExists(String),

    /// A table the operation needs does not exist.
    #[error("Table '{0}' does not exist")]
    MissingTable(String),

    /// The file is not a GeoPackage.
    #[error("Not a GeoPackage: {}", .0.display())]
    NotAGeoPackage(PathBuf),

    /// The file does not exist.
    #[error("GeoPackage not found: {}", .0.display())]
    NotFound(PathBuf),

    /// A geometry blob could not be parsed.
    #[error("Invalid geometry: {0}")]
    Geometry(String),

    /// The table layout is not supported.
    #[error("Unsupported table '{table}': {reason}")]
    Unsupported { table: String, reason: String },
}

/// Result type for GeoPackage operations.
pub type GpkgResult<T> = Result<T, GpkgError>;

/// Quotes an SQL identifier.
pub(crate) fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// An open GeoPackage container.
pub struct GeoPackage {
    conn: Connection,
    path: PathBuf,
}

impl std::fmt::Debug for GeoPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoPackage")
            .field("path", &self.path)
            .finish()
    }
}

impl GeoPackage {
    /// Opens `path`, creating a new GeoPackage if the file does not exist.
    ///
    /// Core metadata tables are created when missing, so an empty SQLite
    /// file is upgraded in place.
    pub fn create_or_open(path: impl AsRef<Path>) -> GpkgResult<Self> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();
        let conn = Connection::open(&path)?;
        let gpkg = Self { conn, path };

        if existed && !gpkg.is_geopackage()? && gpkg.has_user_tables()? {
            return Err(GpkgError::NotAGeoPackage(gpkg.path));
        }
        gpkg.initialize()?;
        debug!(path = %gpkg.path.display(), created = !existed, "Opened target GeoPackage");
        Ok(gpkg)
    }

    /// Opens an existing GeoPackage for reading and writing.
    pub fn open(path: impl AsRef<Path>) -> GpkgResult<Self> {
        Self::open_with_flags(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_WRITE)
    }

    /// Opens an existing GeoPackage without write access.
    pub fn open_read_only(path: impl AsRef<Path>) -> GpkgResult<Self> {
        Self::open_with_flags(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_ONLY)
    }

    fn open_with_flags(path: &Path, flags: OpenFlags) -> GpkgResult<Self> {
        if !path.exists() {
            return Err(GpkgError::NotFound(path.to_path_buf()));
        }
        let conn = Connection::open_with_flags(path, flags | OpenFlags::SQLITE_OPEN_NO_MUTEX)?;
        let gpkg = Self {
            conn,
            path: path.to_path_buf(),
        };
        if !gpkg.table_exists("gpkg_contents")? {
            return Err(GpkgError::NotAGeoPackage(gpkg.path));
        }
        Ok(gpkg)
    }

    /// Creates a transient in-memory GeoPackage.
    pub fn open_in_memory() -> GpkgResult<Self> {
        let gpkg = Self {
            conn: Connection::open_in_memory()?,
            path: PathBuf::from(":memory:"),
        };
        gpkg.initialize()?;
        Ok(gpkg)
    }

    /// Path of the container file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Closes the connection, reporting any error SQLite raises while doing so.
    pub fn close(self) -> GpkgResult<()> {
        let path = self.path;
        self.conn.close().map_err(|(_, e)| GpkgError::Sqlite(e))?;
        debug!(path = %path.display(), "Closed GeoPackage");
        Ok(())
    }

    /// Returns true if a table or view with this name exists.
    pub fn table_exists(&self, name: &str) -> GpkgResult<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?1 COLLATE NOCASE",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Starts a transaction on the connection.
    pub fn begin(&self) -> GpkgResult<()> {
        self.conn.execute_batch("BEGIN")?;
        Ok(())
    }

    /// Commits the open transaction, if any.
    pub fn commit(&self) -> GpkgResult<()> {
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("COMMIT")?;
        }
        Ok(())
    }

    /// Bounds of a table from `gpkg_contents`, converted to EPSG:4326.
    pub fn contents_bounds(&self, table: &str) -> GpkgResult<Option<BoundingBox>> {
        let row: Option<(Option<f64>, Option<f64>, Option<f64>, Option<f64>, Option<i32>)> = self
            .conn
            .query_row(
                "SELECT min_x, min_y, max_x, max_y, srs_id FROM gpkg_contents WHERE table_name = ?1",
                [table],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
            )
            .optional()?;

        Ok(match row {
            Some((Some(min_x), Some(min_y), Some(max_x), Some(max_y), srs)) => {
                let bbox = if srs == Some(SRS_WEB_MERCATOR) {
                    BoundingBox::new(
                        coord::meters_to_lon(min_x),
                        coord::meters_to_lat(min_y),
                        coord::meters_to_lon(max_x),
                        coord::meters_to_lat(max_y),
                    )
                } else {
                    BoundingBox::new(min_x, min_y, max_x, max_y)
                };
                Some(bbox)
            }
            _ => None,
        })
    }

    /// Adds a `gpkg_contents` row.
    pub(crate) fn register_contents(
        &self,
        table: &str,
        data_type: &str,
        bounds: Option<&BoundingBox>,
        srs_id: Option<i32>,
    ) -> GpkgResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO gpkg_contents
                (table_name, data_type, identifier, min_x, min_y, max_x, max_y, srs_id)
             VALUES (?1, ?2, ?1, ?3, ?4, ?5, ?6, ?7)",
            params![
                table,
                data_type,
                bounds.map(|b| b.min_lon),
                bounds.map(|b| b.min_lat),
                bounds.map(|b| b.max_lon),
                bounds.map(|b| b.max_lat),
                srs_id,
            ],
        )?;
        Ok(())
    }

    /// Overwrites the bounds of a `gpkg_contents` row.
    pub fn set_contents_bounds(&self, table: &str, bounds: &BoundingBox) -> GpkgResult<()> {
        self.conn.execute(
            "UPDATE gpkg_contents
                SET min_x = ?2, min_y = ?3, max_x = ?4, max_y = ?5,
                    last_change = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
              WHERE table_name = ?1",
            params![table, bounds.min_lon, bounds.min_lat, bounds.max_lon, bounds.max_lat],
        )?;
        Ok(())
    }

    /// Adds a `gpkg_extensions` row.
    pub(crate) fn register_extension(
        &self,
        table: Option<&str>,
        column: Option<&str>,
        extension: &str,
        definition: &str,
    ) -> GpkgResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO gpkg_extensions
                (table_name, column_name, extension_name, definition, scope)
             VALUES (?1, ?2, ?3, ?4, 'read-write')",
            params![table, column, extension, definition],
        )?;
        Ok(())
    }

    fn is_geopackage(&self) -> GpkgResult<bool> {
        let application_id: i32 = self
            .conn
            .query_row("PRAGMA application_id", [], |row| row.get(0))?;
        Ok(application_id == GPKG_APPLICATION_ID || self.table_exists("gpkg_contents")?)
    }

    fn has_user_tables(&self) -> GpkgResult<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn initialize(&self) -> GpkgResult<()> {
        self.conn.execute_batch(&format!(
            "PRAGMA application_id = {GPKG_APPLICATION_ID};
             PRAGMA user_version = {GPKG_USER_VERSION};
             {CORE_SCHEMA}"
        ))?;

        let mut insert = self.conn.prepare(
            "INSERT OR IGNORE INTO gpkg_spatial_ref_sys
                (srs_name, srs_id, organization, organization_coordsys_id, definition, description)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for srs in SPATIAL_REFERENCE_SYSTEMS {
            insert.execute(params![
                srs.name,
                srs.id,
                srs.organization,
                srs.organization_id,
                srs.definition,
                srs.description
            ])?;
        }
        Ok(())
    }
}

const CORE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS gpkg_spatial_ref_sys (
    srs_name TEXT NOT NULL,
    srs_id INTEGER NOT NULL PRIMARY KEY,
    organization TEXT NOT NULL,
    organization_coordsys_id INTEGER NOT NULL,
    definition TEXT NOT NULL,
    description TEXT
);
CREATE TABLE IF NOT EXISTS gpkg_contents (
    table_name TEXT NOT NULL PRIMARY KEY,
    data_type TEXT NOT NULL,
    identifier TEXT UNIQUE,
    description TEXT DEFAULT '',
    last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    min_x DOUBLE,
    min_y DOUBLE,
    max_x DOUBLE,
    max_y DOUBLE,
    srs_id INTEGER
);
CREATE TABLE IF NOT EXISTS gpkg_geometry_columns (
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    geometry_type_name TEXT NOT NULL,
    srs_id INTEGER NOT NULL,
    z TINYINT NOT NULL,
    m TINYINT NOT NULL,
    CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name)
);
CREATE TABLE IF NOT EXISTS gpkg_tile_matrix_set (
    table_name TEXT NOT NULL PRIMARY KEY,
    srs_id INTEGER NOT NULL,
    min_x DOUBLE NOT NULL,
    min_y DOUBLE NOT NULL,
    max_x DOUBLE NOT NULL,
    max_y DOUBLE NOT NULL
);
CREATE TABLE IF NOT EXISTS gpkg_tile_matrix (
    table_name TEXT NOT NULL,
    zoom_level INTEGER NOT NULL,
    matrix_width INTEGER NOT NULL,
    matrix_height INTEGER NOT NULL,
    tile_width INTEGER NOT NULL,
    tile_height INTEGER NOT NULL,
    pixel_x_size DOUBLE NOT NULL,
    pixel_y_size DOUBLE NOT NULL,
    CONSTRAINT pk_ttm PRIMARY KEY (table_name, zoom_level)
);
CREATE TABLE IF NOT EXISTS gpkg_extensions (
    table_name TEXT,
    column_name TEXT,
    extension_name TEXT NOT NULL,
    definition TEXT NOT NULL,
    scope TEXT NOT NULL,
    CONSTRAINT ge_tce UNIQUE (table_name, column_name, extension_name)
);
";

struct SpatialReferenceSystem {
    name: &'static str,
    id: i32,
    organization: &'static str,
    organization_id: i32,
    definition: &'static str,
    description: &'static str,
}

const SPATIAL_REFERENCE_SYSTEMS: &[SpatialReferenceSystem] = &[
    SpatialReferenceSystem {
        name: "Undefined cartesian SRS",
        id: -1,
        organization: "NONE",
        organization_id: -1,
        definition: "undefined",
        description: "undefined cartesian coordinate reference system",
    },
    SpatialReferenceSystem {
        name: "Undefined geographic SRS",
        id: 0,
        organization: "NONE",
        organization_id: 0,
        definition: "undefined",
        description: "undefined geographic coordinate reference system",
    },
    SpatialReferenceSystem {
        name: "WGS 84 geodetic",
        id: SRS_WGS84,
        organization: "EPSG",
        organization_id: 4326,
        definition: "GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563,AUTHORITY[\"EPSG\",\"7030\"]],AUTHORITY[\"EPSG\",\"6326\"]],PRIMEM[\"Greenwich\",0,AUTHORITY[\"EPSG\",\"8901\"]],UNIT[\"degree\",0.0174532925199433,AUTHORITY[\"EPSG\",\"9122\"]],AUTHORITY[\"EPSG\",\"4326\"]]",
        description: "longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid",
    },
    SpatialReferenceSystem {
        name: "WGS 84 / Pseudo-Mercator",
        id: SRS_WEB_MERCATOR,
        organization: "EPSG",
        organization_id: 3857,
        definition: "PROJCS[\"WGS 84 / Pseudo-Mercator\",GEOGCS[\"WGS 84\",DATUM[\"WGS_1984\",SPHEROID[\"WGS 84\",6378137,298.257223563,AUTHORITY[\"EPSG\",\"7030\"]],AUTHORITY[\"EPSG\",\"6326\"]],PRIMEM[\"Greenwich\",0,AUTHORITY[\"EPSG\",\"8901\"]],UNIT[\"degree\",0.0174532925199433,AUTHORITY[\"EPSG\",\"9122\"]],AUTHORITY[\"EPSG\",\"4326\"]],PROJECTION[\"Mercator_1SP\"],PARAMETER[\"central_meridian\",0],PARAMETER[\"scale_factor\",1],PARAMETER[\"false_easting\",0],PARAMETER[\"false_northing\",0],UNIT[\"metre\",1,AUTHORITY[\"EPSG\",\"9001\"]],AXIS[\"X\",EAST],AXIS[\"Y\",NORTH],EXTENSION[\"PROJ4\",\"+proj=merc +a=6378137 +b=6378137 +lat_ts=0.0 +lon_0=0.0 +x_0=0.0 +y_0=0 +k=1.0 +units=m +nadgrids=@null +wktext +no_defs\"],AUTHORITY[\"EPSG\",\"3857\"]]",
        description: "Spherical Mercator projection coordinate system",
    },
];
