//! Coordinate conversion module
//!
//! Provides conversions between geographic coordinates (latitude/longitude)
//! and Web Mercator tile coordinates, plus the bounding-box arithmetic the
//! pyramid planner and tile compositor share.

mod types;

pub use types::{
    BoundingBox, CoordError, TileCoord, TileRange, MAX_LAT, MAX_LON, MAX_ZOOM, MIN_LAT, MIN_LON,
    MIN_ZOOM, WEB_MERCATOR_HALF_WORLD,
};

use std::f64::consts::PI;

/// Fractional tile position of a geographic point at a zoom level.
///
/// The integer part is the tile column/row, the fraction the position
/// inside that tile. Latitude is clamped to the Web Mercator range.
#[inline]
pub fn fractional_tile(lat: f64, lon: f64, zoom: u8) -> (f64, f64) {
    let n = 2.0_f64.powi(zoom as i32);
    let lat = lat.clamp(MIN_LAT, MAX_LAT);

    let x = (lon + 180.0) / 360.0 * n;
    let lat_rad = lat * PI / 180.0;
    let y = (1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n;
    (x, y)
}

/// Converts geographic coordinates to tile coordinates.
///
/// # Arguments
///
/// * `lat` - Latitude in degrees (-85.05112878 to 85.05112878)
/// * `lon` - Longitude in degrees (-180.0 to 180.0)
/// * `zoom` - Zoom level (0 to `MAX_ZOOM`)
///
/// Points on the east or south edge of the world map onto the last
/// column/row rather than one past it.
#[inline]
pub fn to_tile_coords(lat: f64, lon: f64, zoom: u8) -> Result<TileCoord, CoordError> {
    if !(MIN_LAT..=MAX_LAT).contains(&lat) {
        return Err(CoordError::InvalidLatitude(lat));
    }
    if !(MIN_LON..=MAX_LON).contains(&lon) {
        return Err(CoordError::InvalidLongitude(lon));
    }
    if zoom > MAX_ZOOM {
        return Err(CoordError::InvalidZoom(zoom));
    }

    let max_index = (1u64 << zoom) - 1;
    let (x, y) = fractional_tile(lat, lon, zoom);
    let col = (x.max(0.0) as u64).min(max_index) as u32;
    let row = (y.max(0.0) as u64).min(max_index) as u32;

    Ok(TileCoord { zoom, row, col })
}

/// Converts tile coordinates back to geographic coordinates.
///
/// Returns the latitude/longitude of the tile's northwest corner.
#[inline]
pub fn tile_to_lat_lon(tile: &TileCoord) -> (f64, f64) {
    let n = 2.0_f64.powi(tile.zoom as i32);

    let lon = tile.col as f64 / n * 360.0 - 180.0;

    let y = tile.row as f64 / n;
    let lat_rad = (PI * (1.0 - 2.0 * y)).sinh().atan();
    let lat = lat_rad * 180.0 / PI;

    (lat, lon)
}

/// Geographic bounds of a tile.
pub fn tile_bounds(tile: &TileCoord) -> BoundingBox {
    let (max_lat, min_lon) = tile_to_lat_lon(tile);
    let (min_lat, max_lon) = tile_to_lat_lon(&TileCoord::new(tile.zoom, tile.col + 1, tile.row + 1));
    BoundingBox::new(min_lon, min_lat, max_lon, max_lat)
}

/// Range of tiles at `zoom` covering `bbox`.
///
/// The box is clamped to the Web Mercator world first, so any valid box
/// yields a non-empty range.
pub fn tile_range(bbox: &BoundingBox, zoom: u8) -> Result<TileRange, CoordError> {
    let bbox = bbox.clamp_to_mercator();
    let north_west = to_tile_coords(bbox.max_lat, bbox.min_lon, zoom)?;
    let south_east = to_tile_coords(bbox.min_lat, bbox.max_lon, zoom)?;

    Ok(TileRange {
        zoom,
        min_col: north_west.col,
        max_col: south_east.col,
        min_row: north_west.row,
        max_row: south_east.row,
    })
}

/// Pixel position of a geographic point relative to a tile's top-left corner.
///
/// Values fall outside `0..tile_size` for points outside the tile.
pub fn pixel_in_tile(lat: f64, lon: f64, tile: &TileCoord, tile_size: u32) -> (f64, f64) {
    let (x, y) = fractional_tile(lat, lon, tile.zoom);
    let size = tile_size as f64;
    ((x - tile.col as f64) * size, (y - tile.row as f64) * size)
}

/// Projects a longitude onto EPSG:3857 meters.
pub fn lon_to_meters(lon: f64) -> f64 {
    lon * WEB_MERCATOR_HALF_WORLD / 180.0
}

/// Projects a latitude onto EPSG:3857 meters.
pub fn lat_to_meters(lat: f64) -> f64 {
    let lat = lat.clamp(MIN_LAT, MAX_LAT);
    let y = ((90.0 + lat) * PI / 360.0).tan().ln() / (PI / 180.0);
    y * WEB_MERCATOR_HALF_WORLD / 180.0
}

/// Inverse of [`lon_to_meters`].
pub fn meters_to_lon(x: f64) -> f64 {
    x / WEB_MERCATOR_HALF_WORLD * 180.0
}

/// Inverse of [`lat_to_meters`].
pub fn meters_to_lat(y: f64) -> f64 {
    let lat = y / WEB_MERCATOR_HALF_WORLD * 180.0;
    180.0 / PI * (2.0 * (lat * PI / 180.0).exp().atan() - PI / 2.0)
}
