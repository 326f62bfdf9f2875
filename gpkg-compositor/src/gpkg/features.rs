//! Feature tables.

use rusqlite::params_from_iter;

use crate::coord::BoundingBox;
use crate::layer::{GeometryType, Value};
use crate::schema::{ColumnDef, DataType, MergedFeatureSchema, RawColumnSet};

use super::{quote, GeoPackage, GpkgError, GpkgResult, SRS_WGS84};

impl GeoPackage {
    /// Creates a feature table with the standard `id`/`geom` columns
    /// followed by `schema`'s attribute columns, and registers it in
    /// `gpkg_contents` and `gpkg_geometry_columns`.
    ///
    /// Fails with [`GpkgError::TableExists`] if the name is taken.
    pub fn create_feature_table(
        &self,
        table: &str,
        schema: &MergedFeatureSchema,
        bounds: Option<&BoundingBox>,
    ) -> GpkgResult<()> {
        if self.table_exists(table)? {
            return Err(GpkgError::TableExists(table.to_string()));
        }

        let mut columns = vec![
            format!(
                "{} INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL",
                quote(MergedFeatureSchema::ID_COLUMN)
            ),
            format!("{} GEOMETRY", quote(MergedFeatureSchema::GEOMETRY_COLUMN)),
        ];
        columns.extend(schema.columns.iter().map(ColumnDef::to_sql));

        self.conn().execute_batch(&format!(
            "CREATE TABLE {} ({})",
            quote(table),
            columns.join(", ")
        ))?;
        self.register_contents(table, "features", bounds, Some(SRS_WGS84))?;
        self.conn().execute(
            "INSERT INTO gpkg_geometry_columns
                (table_name, column_name, geometry_type_name, srs_id, z, m)
             VALUES (?1, ?2, ?3, ?4, 0, 0)",
            rusqlite::params![
                table,
                MergedFeatureSchema::GEOMETRY_COLUMN,
                GeometryType::Geometry.as_str(),
                SRS_WGS84
            ],
        )?;
        Ok(())
    }

    /// Inserts one feature row and returns its new id.
    ///
    /// `values` are matched against `schema` by merged column name; merged
    /// columns without a value are written as NULL so column defaults never
    /// leak into copied rows.
    pub fn insert_feature(
        &self,
        table: &str,
        schema: &MergedFeatureSchema,
        geometry: Option<&[u8]>,
        values: &[(String, Value)],
    ) -> GpkgResult<i64> {
        let mut names = vec![quote(MergedFeatureSchema::GEOMETRY_COLUMN)];
        names.extend(schema.columns.iter().map(|c| quote(&c.name)));
        let placeholders = vec!["?"; names.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(table),
            names.join(", "),
            placeholders
        );

        let mut row = Vec::with_capacity(names.len());
        row.push(match geometry {
            Some(bytes) => Value::Blob(bytes.to_vec()),
            None => Value::Null,
        });
        for column in &schema.columns {
            let value = values
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&column.name))
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null);
            row.push(value);
        }

        let mut statement = self.conn().prepare_cached(&sql)?;
        statement.execute(params_from_iter(row.iter()))?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Number of rows in a table.
    pub fn row_count(&self, table: &str) -> GpkgResult<u64> {
        let count: i64 = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM {}", quote(table)),
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Reads the column set of an existing table.
    ///
    /// The geometry column is looked up in `gpkg_geometry_columns`.
    pub fn table_columns(&self, table: &str) -> GpkgResult<RawColumnSet> {
        if !self.table_exists(table)? {
            return Err(GpkgError::MissingTable(table.to_string()));
        }

        let mut statement = self
            .conn()
            .prepare(&format!("PRAGMA table_info({})", quote(table)))?;
        let columns = statement
            .query_map([], |row| {
                let name: String = row.get("name")?;
                let declared: String = row.get("type")?;
                let not_null: bool = row.get("notnull")?;
                let default_value: Option<String> = row.get("dflt_value")?;
                let pk: i64 = row.get("pk")?;

                let (data_type, max_length) = DataType::parse_declared(&declared);
                Ok(ColumnDef {
                    name,
                    data_type,
                    not_null,
                    default_value,
                    max_length,
                    primary_key: pk > 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let geometry_column = self.geometry_column(table)?;
        Ok(RawColumnSet::new(columns, geometry_column))
    }

    /// Geometry column name of a feature table, if registered.
    pub fn geometry_column(&self, table: &str) -> GpkgResult<Option<String>> {
        use rusqlite::OptionalExtension;
        Ok(self
            .conn()
            .query_row(
                "SELECT column_name FROM gpkg_geometry_columns WHERE table_name = ?1 COLLATE NOCASE",
                [table],
                |row| row.get(0),
            )
            .optional()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpkg::encode_point;

    fn schema() -> MergedFeatureSchema {
        MergedFeatureSchema {
            columns: vec![
                ColumnDef::new("name", DataType::Text).with_max_length(40),
                ColumnDef::new("count", DataType::Integer)
                    .not_null()
                    .with_default("0"),
            ],
        }
    }

    #[test]
    fn test_create_and_insert_features() {
        let gpkg = GeoPackage::open_in_memory().unwrap();
        gpkg.create_feature_table("places", &schema(), None).unwrap();

        let id = gpkg
            .insert_feature(
                "places",
                &schema(),
                Some(&encode_point(1.0, 2.0)),
                &[
                    ("NAME".to_string(), Value::Text("Harbor".to_string())),
                    ("count".to_string(), Value::Integer(3)),
                ],
            )
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(gpkg.row_count("places").unwrap(), 1);

        let name: String = gpkg
            .conn()
            .query_row("SELECT name FROM places WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(name, "Harbor");
    }

    #[test]
    fn test_existing_table_is_rejected() {
        let gpkg = GeoPackage::open_in_memory().unwrap();
        gpkg.create_feature_table("places", &schema(), None).unwrap();
        let result = gpkg.create_feature_table("PLACES", &schema(), None);
        assert!(matches!(result, Err(GpkgError::TableExists(_))));
    }

    #[test]
    fn test_table_columns_reads_constraints() {
        let gpkg = GeoPackage::open_in_memory().unwrap();
        gpkg.create_feature_table("places", &schema(), None).unwrap();

        let columns = gpkg.table_columns("places").unwrap();
        assert_eq!(columns.geometry_column.as_deref(), Some("geom"));

        let names: Vec<_> = columns.attribute_columns().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["name", "count"]);

        let count = columns.columns.iter().find(|c| c.name == "count").unwrap();
        assert!(count.not_null);
        assert_eq!(count.default_value.as_deref(), Some("0"));
        let name = columns.columns.iter().find(|c| c.name == "name").unwrap();
        assert_eq!(name.max_length, Some(40));
        assert!(columns.columns.iter().any(|c| c.primary_key && c.name == "id"));
    }

    #[test]
    fn test_geometry_column_registered() {
        let gpkg = GeoPackage::open_in_memory().unwrap();
        gpkg.create_feature_table("places", &schema(), None).unwrap();
        let geometry_type: String = gpkg
            .conn()
            .query_row(
                "SELECT geometry_type_name FROM gpkg_geometry_columns WHERE table_name = 'places'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(geometry_type, "GEOMETRY");
    }
}
