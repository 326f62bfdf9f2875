//! Coordinate type definitions

use std::fmt;

use serde::{Deserialize, Serialize};

/// Web Mercator valid latitude range
pub const MIN_LAT: f64 = -85.05112878;
pub const MAX_LAT: f64 = 85.05112878;

/// Valid longitude range
pub const MIN_LON: f64 = -180.0;
pub const MAX_LON: f64 = 180.0;

/// Zoom levels accepted for tile pyramids
pub const MIN_ZOOM: u8 = 0;
pub const MAX_ZOOM: u8 = 20;

/// Half the circumference of the EPSG:3857 world, in meters.
pub const WEB_MERCATOR_HALF_WORLD: f64 = 20_037_508.342_789_244;

/// Tile coordinates in the Web Mercator XYZ grid.
///
/// Row 0 is the northernmost row and column 0 the westernmost column,
/// matching the tile_row/tile_column layout of a GeoPackage tile table
/// whose matrix set covers the whole EPSG:3857 world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    /// Zoom level
    pub zoom: u8,
    /// Y coordinate (north-south), 0 at north
    pub row: u32,
    /// X coordinate (east-west), 0 at west
    pub col: u32,
}

impl TileCoord {
    pub fn new(zoom: u8, col: u32, row: u32) -> Self {
        Self { zoom, row, col }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.col, self.row)
    }
}

/// Axis-aligned geographic bounding box in EPSG:4326 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn new(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Self {
        Self {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// The whole Web Mercator world.
    pub fn world() -> Self {
        Self::new(MIN_LON, MIN_LAT, MAX_LON, MAX_LAT)
    }

    /// Returns true when all edges are finite and min <= max on both axes.
    pub fn is_valid(&self) -> bool {
        [self.min_lon, self.min_lat, self.max_lon, self.max_lat]
            .iter()
            .all(|v| v.is_finite())
            && self.min_lon <= self.max_lon
            && self.min_lat <= self.max_lat
    }

    /// Intersection of two boxes, or `None` when they do not overlap.
    ///
    /// Boxes that only share an edge are considered overlapping.
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let min_lon = self.min_lon.max(other.min_lon);
        let min_lat = self.min_lat.max(other.min_lat);
        let max_lon = self.max_lon.min(other.max_lon);
        let max_lat = self.max_lat.min(other.max_lat);

        if min_lon > max_lon || min_lat > max_lat {
            return None;
        }
        Some(BoundingBox::new(min_lon, min_lat, max_lon, max_lat))
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.intersection(other).is_some()
    }

    /// Smallest box covering both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox::new(
            self.min_lon.min(other.min_lon),
            self.min_lat.min(other.min_lat),
            self.max_lon.max(other.max_lon),
            self.max_lat.max(other.max_lat),
        )
    }

    /// Clamp latitudes into the range Web Mercator can represent.
    pub fn clamp_to_mercator(&self) -> BoundingBox {
        BoundingBox::new(
            self.min_lon.clamp(MIN_LON, MAX_LON),
            self.min_lat.clamp(MIN_LAT, MAX_LAT),
            self.max_lon.clamp(MIN_LON, MAX_LON),
            self.max_lat.clamp(MIN_LAT, MAX_LAT),
        )
    }
}

/// Inclusive range of tiles covering a bounding box at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
    pub zoom: u8,
    pub min_col: u32,
    pub max_col: u32,
    pub min_row: u32,
    pub max_row: u32,
}

impl TileRange {
    /// Number of tiles in the range.
    pub fn tile_count(&self) -> u64 {
        let cols = (self.max_col - self.min_col) as u64 + 1;
        let rows = (self.max_row - self.min_row) as u64 + 1;
        cols * rows
    }

    /// Tiles in row-major order (row outer, column inner).
    pub fn tiles(&self) -> impl Iterator<Item = TileCoord> + '_ {
        let zoom = self.zoom;
        let (min_col, max_col) = (self.min_col, self.max_col);
        (self.min_row..=self.max_row)
            .flat_map(move |row| (min_col..=max_col).map(move |col| TileCoord::new(zoom, col, row)))
    }
}

/// Errors that can occur during coordinate conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordError {
    /// Latitude is outside valid range (-85.05112878 to 85.05112878)
    InvalidLatitude(f64),
    /// Longitude is outside valid range (-180.0 to 180.0)
    InvalidLongitude(f64),
    /// Zoom level is outside valid range
    InvalidZoom(u8),
}

impl fmt::Display for CoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordError::InvalidLatitude(lat) => {
                write!(
                    f,
                    "Invalid latitude: {} (must be between {} and {})",
                    lat, MIN_LAT, MAX_LAT
                )
            }
            CoordError::InvalidLongitude(lon) => {
                write!(
                    f,
                    "Invalid longitude: {} (must be between {} and {})",
                    lon, MIN_LON, MAX_LON
                )
            }
            CoordError::InvalidZoom(zoom) => {
                write!(
                    f,
                    "Invalid zoom level: {} (must be between {} and {})",
                    zoom, MIN_ZOOM, MAX_ZOOM
                )
            }
        }
    }
}

impl std::error::Error for CoordError {}
