//! Value types exchanged with layer collaborators.

use std::fmt;
use std::path::PathBuf;

use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};

use crate::coord::BoundingBox;

/// A single attribute value of a feature row.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(v) => Value::Integer(v),
            ValueRef::Real(v) => Value::Real(v),
            ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
            ValueRef::Blob(v) => Value::Blob(v.to_vec()),
        }
    }
}

/// Simple-features geometry type names used for style qualification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GeometryType {
    Geometry,
    Point,
    LineString,
    Polygon,
    MultiPoint,
    MultiLineString,
    MultiPolygon,
    GeometryCollection,
}

impl GeometryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryType::Geometry => "GEOMETRY",
            GeometryType::Point => "POINT",
            GeometryType::LineString => "LINESTRING",
            GeometryType::Polygon => "POLYGON",
            GeometryType::MultiPoint => "MULTIPOINT",
            GeometryType::MultiLineString => "MULTILINESTRING",
            GeometryType::MultiPolygon => "MULTIPOLYGON",
            GeometryType::GeometryCollection => "GEOMETRYCOLLECTION",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "GEOMETRY" => Some(GeometryType::Geometry),
            "POINT" => Some(GeometryType::Point),
            "LINESTRING" => Some(GeometryType::LineString),
            "POLYGON" => Some(GeometryType::Polygon),
            "MULTIPOINT" => Some(GeometryType::MultiPoint),
            "MULTILINESTRING" => Some(GeometryType::MultiLineString),
            "MULTIPOLYGON" => Some(GeometryType::MultiPolygon),
            "GEOMETRYCOLLECTION" => Some(GeometryType::GeometryCollection),
            _ => None,
        }
    }

    /// Maps a WKB geometry type code (ignoring Z/M offsets) to a type.
    pub fn from_wkb_code(code: u32) -> Self {
        match code % 1000 {
            1 => GeometryType::Point,
            2 => GeometryType::LineString,
            3 => GeometryType::Polygon,
            4 => GeometryType::MultiPoint,
            5 => GeometryType::MultiLineString,
            6 => GeometryType::MultiPolygon,
            7 => GeometryType::GeometryCollection,
            _ => GeometryType::Geometry,
        }
    }
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoded geometry of a feature, kept opaque apart from its envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    /// GeoPackage binary geometry (header + WKB).
    pub data: Vec<u8>,
    pub geometry_type: GeometryType,
    pub envelope: Option<BoundingBox>,
}

/// One feature row read from a vector source.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Source-local feature id.
    pub id: i64,
    pub geometry: Option<Geometry>,
    /// Attribute values keyed by source column name.
    pub values: Vec<(String, Value)>,
}

impl Feature {
    pub fn geometry_type(&self) -> GeometryType {
        self.geometry
            .as_ref()
            .map(|g| g.geometry_type)
            .unwrap_or(GeometryType::Geometry)
    }

    pub fn envelope(&self) -> Option<BoundingBox> {
        self.geometry.as_ref().and_then(|g| g.envelope)
    }
}

/// A style row from the feature style extension.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StyleRow {
    /// Source-local id before migration, target id afterwards.
    pub id: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Stroke color as `#RRGGBB`.
    pub color: Option<String>,
    pub opacity: Option<f64>,
    pub width: Option<f64>,
    pub fill_color: Option<String>,
    pub fill_opacity: Option<f64>,
}

/// An icon row from the feature style extension.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IconRow {
    /// Source-local id before migration, target id afterwards.
    pub id: Option<i64>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub data: Vec<u8>,
    pub content_type: String,
    pub width: Option<f64>,
    pub height: Option<f64>,
    /// Horizontal anchor as a fraction of the width.
    pub anchor_u: Option<f64>,
    /// Vertical anchor as a fraction of the height.
    pub anchor_v: Option<f64>,
}

/// Which style table a mapping row points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StyleKind {
    Style,
    Icon,
}

/// A feature-level style or icon assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureStyleLink {
    pub feature_id: i64,
    pub kind: StyleKind,
    /// Source-local style or icon id.
    pub related_id: i64,
    /// Geometry type the mapping is qualified by, if any.
    pub geometry_type: Option<GeometryType>,
}

/// A table-level default style or icon assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct TableStyleDefault {
    pub kind: StyleKind,
    /// Source-local style or icon id.
    pub related_id: i64,
    /// `None` applies to every geometry type.
    pub geometry_type: Option<GeometryType>,
}

/// Reference from a feature to a row of a media table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaReference {
    pub container_path: PathBuf,
    pub media_table: String,
    pub media_row_id: i64,
}

/// Binary payload of a media row.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRow {
    pub data: Vec<u8>,
    pub content_type: String,
}
