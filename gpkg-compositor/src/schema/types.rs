//! Column and schema types.

use std::fmt;

use chrono::{SecondsFormat, Utc};

use crate::layer::Value;

/// GeoPackage attribute data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    TinyInt,
    SmallInt,
    MediumInt,
    Integer,
    Float,
    Double,
    Real,
    Text,
    Blob,
    Date,
    DateTime,
}

impl DataType {
    /// SQL type name as written in a table definition.
    pub fn sql_name(&self) -> &'static str {
        match self {
            DataType::Boolean => "BOOLEAN",
            DataType::TinyInt => "TINYINT",
            DataType::SmallInt => "SMALLINT",
            DataType::MediumInt => "MEDIUMINT",
            DataType::Integer => "INTEGER",
            DataType::Float => "FLOAT",
            DataType::Double => "DOUBLE",
            DataType::Real => "REAL",
            DataType::Text => "TEXT",
            DataType::Blob => "BLOB",
            DataType::Date => "DATE",
            DataType::DateTime => "DATETIME",
        }
    }

    /// Suffix appended to a column name when a same-named column of a
    /// different type already exists.
    pub fn suffix(&self) -> String {
        self.sql_name().to_ascii_lowercase()
    }

    /// Parses a declared SQL type such as `TEXT(50)` into a type and an
    /// optional maximum length.
    pub fn parse_declared(declared: &str) -> (DataType, Option<u32>) {
        let declared = declared.trim().to_ascii_uppercase();
        let (name, max_length) = match declared.find('(') {
            Some(open) => {
                let length = declared[open + 1..]
                    .trim_end_matches(')')
                    .trim()
                    .parse::<u32>()
                    .ok();
                (declared[..open].trim().to_string(), length)
            }
            None => (declared, None),
        };

        let data_type = match name.as_str() {
            "BOOLEAN" | "BOOL" => DataType::Boolean,
            "TINYINT" => DataType::TinyInt,
            "SMALLINT" => DataType::SmallInt,
            "MEDIUMINT" => DataType::MediumInt,
            "INT" | "INTEGER" | "BIGINT" => DataType::Integer,
            "FLOAT" => DataType::Float,
            "DOUBLE" => DataType::Double,
            "REAL" | "NUMERIC" => DataType::Real,
            "BLOB" => DataType::Blob,
            "DATE" => DataType::Date,
            "DATETIME" | "TIMESTAMP" => DataType::DateTime,
            _ => DataType::Text,
        };
        (data_type, max_length)
    }

    /// Value used to fill a required column the compositor has no data for.
    pub fn fill_value(&self) -> Value {
        match self {
            DataType::Boolean
            | DataType::TinyInt
            | DataType::SmallInt
            | DataType::MediumInt
            | DataType::Integer => Value::Integer(0),
            DataType::Float | DataType::Double | DataType::Real => Value::Real(0.0),
            DataType::Text => Value::Text(String::new()),
            DataType::Blob => Value::Blob(Vec::new()),
            DataType::Date => Value::Text(Utc::now().format("%Y-%m-%d").to_string()),
            DataType::DateTime => {
                Value::Text(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
            }
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// Definition of a single attribute column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub not_null: bool,
    /// Default as an SQL literal, e.g. `'unknown'` or `0`.
    pub default_value: Option<String>,
    pub max_length: Option<u32>,
    pub primary_key: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            not_null: false,
            default_value: None,
            max_length: None,
            primary_key: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn with_default(mut self, literal: impl Into<String>) -> Self {
        self.default_value = Some(literal.into());
        self
    }

    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Column definition fragment for `CREATE TABLE`.
    pub fn to_sql(&self) -> String {
        let mut sql = format!("\"{}\" {}", self.name, self.data_type.sql_name());
        if let Some(length) = self.max_length {
            sql.push_str(&format!("({})", length));
        }
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if let Some(default) = &self.default_value {
            sql.push_str(" DEFAULT ");
            sql.push_str(default);
        }
        sql
    }
}

/// Columns of one source feature table, as read from the source.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawColumnSet {
    pub columns: Vec<ColumnDef>,
    /// Name of the geometry column, if the table has one.
    pub geometry_column: Option<String>,
}

impl RawColumnSet {
    pub fn new(columns: Vec<ColumnDef>, geometry_column: Option<String>) -> Self {
        Self {
            columns,
            geometry_column,
        }
    }

    /// Columns other than the primary key and geometry column.
    pub fn attribute_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(move |c| {
            !c.primary_key
                && !self
                    .geometry_column
                    .as_deref()
                    .is_some_and(|g| g.eq_ignore_ascii_case(&c.name))
        })
    }
}

/// Harmonized attribute schema of a merged feature table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MergedFeatureSchema {
    pub columns: Vec<ColumnDef>,
}

impl MergedFeatureSchema {
    /// Primary key column of every merged feature table.
    pub const ID_COLUMN: &'static str = "id";
    /// Geometry column of every merged feature table.
    pub const GEOMETRY_COLUMN: &'static str = "geom";

    /// Position of a column, compared case-insensitively like SQLite does.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.position(name).map(|i| &self.columns[i])
    }

    pub fn is_reserved(name: &str) -> bool {
        name.eq_ignore_ascii_case(Self::ID_COLUMN) || name.eq_ignore_ascii_case(Self::GEOMETRY_COLUMN)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}
