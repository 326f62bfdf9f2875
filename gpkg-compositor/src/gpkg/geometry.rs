//! GeoPackage binary geometry header handling.
//!
//! Only the header and the leading WKB type word are interpreted; the
//! geometry body is carried through untouched. Layout of the header:
//!
//! ```text
//! "GP" | version | flags | srs_id (i32) | envelope (0/32/48/64 bytes) | WKB
//! ```
//!
//! Flag bit 0 is the header byte order (1 = little endian), bits 1-3 the
//! envelope indicator and bit 4 the empty-geometry flag.

use crate::coord::BoundingBox;
use crate::layer::{Geometry, GeometryType};

use super::{GpkgError, GpkgResult};

const MAGIC: &[u8; 2] = b"GP";
const HEADER_LEN: usize = 8;

fn read_f64(bytes: &[u8], offset: usize, little_endian: bool) -> GpkgResult<f64> {
    let raw: [u8; 8] = bytes
        .get(offset..offset + 8)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| GpkgError::Geometry("truncated double".to_string()))?;
    Ok(if little_endian {
        f64::from_le_bytes(raw)
    } else {
        f64::from_be_bytes(raw)
    })
}

fn read_u32(bytes: &[u8], offset: usize, little_endian: bool) -> GpkgResult<u32> {
    let raw: [u8; 4] = bytes
        .get(offset..offset + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| GpkgError::Geometry("truncated integer".to_string()))?;
    Ok(if little_endian {
        u32::from_le_bytes(raw)
    } else {
        u32::from_be_bytes(raw)
    })
}

fn envelope_len(indicator: u8) -> GpkgResult<usize> {
    match indicator {
        0 => Ok(0),
        1 => Ok(32),
        2 | 3 => Ok(48),
        4 => Ok(64),
        other => Err(GpkgError::Geometry(format!(
            "invalid envelope indicator {}",
            other
        ))),
    }
}

/// Parses a GeoPackage geometry blob into a [`Geometry`].
///
/// The envelope comes from the header when present; for points without
/// an envelope it is derived from the coordinates.
pub fn parse_geometry(data: Vec<u8>) -> GpkgResult<Geometry> {
    if data.len() < HEADER_LEN || &data[0..2] != MAGIC {
        return Err(GpkgError::Geometry("missing GP header".to_string()));
    }
    let flags = data[3];
    let header_le = flags & 0x01 == 1;
    let indicator = (flags >> 1) & 0x07;
    let empty = flags & 0x10 != 0;
    let env_len = envelope_len(indicator)?;

    let mut envelope = if env_len > 0 {
        let min_x = read_f64(&data, HEADER_LEN, header_le)?;
        let max_x = read_f64(&data, HEADER_LEN + 8, header_le)?;
        let min_y = read_f64(&data, HEADER_LEN + 16, header_le)?;
        let max_y = read_f64(&data, HEADER_LEN + 24, header_le)?;
        Some(BoundingBox::new(min_x, min_y, max_x, max_y))
    } else {
        None
    };

    let wkb = HEADER_LEN + env_len;
    let geometry_type = match data.get(wkb) {
        Some(&order) => {
            let wkb_le = order == 1;
            let code = read_u32(&data, wkb + 1, wkb_le)?;
            let geometry_type = GeometryType::from_wkb_code(code);
            if envelope.is_none() && !empty && geometry_type == GeometryType::Point {
                let x = read_f64(&data, wkb + 5, wkb_le)?;
                let y = read_f64(&data, wkb + 13, wkb_le)?;
                if x.is_finite() && y.is_finite() {
                    envelope = Some(BoundingBox::new(x, y, x, y));
                }
            }
            geometry_type
        }
        None => GeometryType::Geometry,
    };

    Ok(Geometry {
        data,
        geometry_type,
        envelope,
    })
}

/// Encodes a WGS 84 point as a GeoPackage geometry blob with an envelope.
pub fn encode_point(lon: f64, lat: f64) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + 32 + 21);
    out.extend_from_slice(MAGIC);
    out.push(0);
    // little endian header, xy envelope
    out.push(0b0000_0011);
    out.extend_from_slice(&super::SRS_WGS84.to_le_bytes());
    for v in [lon, lon, lat, lat] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out.push(1);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&lon.to_le_bytes());
    out.extend_from_slice(&lat.to_le_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoded_point_parses() {
        let geometry = parse_geometry(encode_point(12.5, -3.25)).unwrap();
        assert_eq!(geometry.geometry_type, GeometryType::Point);
        assert_eq!(
            geometry.envelope,
            Some(BoundingBox::new(12.5, -3.25, 12.5, -3.25))
        );
    }

    #[test]
    fn test_point_without_envelope_derives_one() {
        let mut data = vec![b'G', b'P', 0, 0b0000_0001];
        data.extend_from_slice(&4326i32.to_le_bytes());
        data.push(1);
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&7.0f64.to_le_bytes());
        data.extend_from_slice(&8.0f64.to_le_bytes());

        let geometry = parse_geometry(data).unwrap();
        assert_eq!(geometry.envelope, Some(BoundingBox::new(7.0, 8.0, 7.0, 8.0)));
    }

    #[test]
    fn test_polygon_type_read_from_big_endian_wkb() {
        let mut data = vec![b'G', b'P', 0, 0b0000_0001];
        data.extend_from_slice(&4326i32.to_le_bytes());
        data.push(0);
        data.extend_from_slice(&3u32.to_be_bytes());
        let geometry = parse_geometry(data).unwrap();
        assert_eq!(geometry.geometry_type, GeometryType::Polygon);
        assert_eq!(geometry.envelope, None);
    }

    #[test]
    fn test_rejects_non_geopackage_blob() {
        assert!(parse_geometry(vec![1, 2, 3]).is_err());
        assert!(parse_geometry(b"XX\0\0\0\0\0\0".to_vec()).is_err());
    }
}
