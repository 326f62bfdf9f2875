//! Related-tables extension and media tables.

use rusqlite::{params, params_from_iter, OptionalExtension};

use crate::layer::{MediaRow, Value};
use crate::schema::{ColumnDef, MergedFeatureSchema};

use super::{quote, GeoPackage, GpkgResult};

pub const RELATIONS_TABLE: &str = "gpkgext_relations";
pub const RELATED_TABLES_EXTENSION: &str = "related_tables";
pub const MEDIA_RELATION: &str = "media";
const RELATED_TABLES_DEFINITION: &str = "http://docs.opengeospatial.org/is/18-000/18-000.html";

/// One row of `gpkgext_relations`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub base_table: String,
    pub related_table: String,
    pub relation_name: String,
    pub mapping_table: String,
}

/// Name of the mapping table linking `base` features to `media` rows.
pub fn media_mapping_table(base: &str, media: &str) -> String {
    format!("{base}_{media}")
}

impl GeoPackage {
    /// Registers a relation in `gpkgext_relations`, creating the registry
    /// on first use.
    pub(crate) fn register_relation(
        &self,
        base: &str,
        related: &str,
        relation_name: &str,
        mapping: &str,
    ) -> GpkgResult<()> {
        self.conn().execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {RELATIONS_TABLE} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                base_table_name TEXT NOT NULL,
                base_primary_column TEXT NOT NULL DEFAULT 'id',
                related_table_name TEXT NOT NULL,
                related_primary_column TEXT NOT NULL DEFAULT 'id',
                relation_name TEXT NOT NULL,
                mapping_table_name TEXT NOT NULL UNIQUE
            )"
        ))?;
        self.register_extension(
            Some(RELATIONS_TABLE),
            None,
            RELATED_TABLES_EXTENSION,
            RELATED_TABLES_DEFINITION,
        )?;
        self.register_extension(
            Some(mapping),
            None,
            RELATED_TABLES_EXTENSION,
            RELATED_TABLES_DEFINITION,
        )?;
        self.conn().execute(
            &format!(
                "INSERT OR IGNORE INTO {RELATIONS_TABLE}
                    (base_table_name, related_table_name, relation_name, mapping_table_name)
                 VALUES (?1, ?2, ?3, ?4)"
            ),
            params![base, related, relation_name, mapping],
        )?;
        Ok(())
    }

    /// Relations whose base table is `base`.
    pub fn related_tables(&self, base: &str) -> GpkgResult<Vec<Relation>> {
        if !self.table_exists(RELATIONS_TABLE)? {
            return Ok(Vec::new());
        }
        let mut statement = self.conn().prepare(&format!(
            "SELECT base_table_name, related_table_name, relation_name, mapping_table_name
               FROM {RELATIONS_TABLE}
              WHERE base_table_name = ?1 COLLATE NOCASE
              ORDER BY id"
        ))?;
        let relations = statement
            .query_map([base], |row| {
                Ok(Relation {
                    base_table: row.get(0)?,
                    related_table: row.get(1)?,
                    relation_name: row.get(2)?,
                    mapping_table: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(relations)
    }

    /// Creates a media table unless it already exists.
    pub fn create_media_table(&self, table: &str) -> GpkgResult<()> {
        self.conn().execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                data BLOB NOT NULL,
                content_type TEXT NOT NULL
            )",
            quote(table)
        ))?;
        self.register_contents(table, "attributes", None, None)?;
        Ok(())
    }

    /// Creates the mapping table between a feature table and a media table
    /// and registers the relation. Returns the mapping table name.
    pub fn create_media_relation(&self, base: &str, media: &str) -> GpkgResult<String> {
        let mapping = media_mapping_table(base, media);
        self.conn().execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                base_id INTEGER NOT NULL,
                related_id INTEGER NOT NULL
            )",
            quote(&mapping)
        ))?;
        self.register_relation(base, media, MEDIA_RELATION, &mapping)?;
        Ok(mapping)
    }

    /// Columns of a media table that an insert has to fill besides `data`
    /// and `content_type`: NOT NULL and without a default.
    pub fn media_required_columns(&self, table: &str) -> GpkgResult<Vec<ColumnDef>> {
        let columns = self.table_columns(table)?;
        Ok(columns
            .columns
            .into_iter()
            .filter(|column| {
                let standard = column.primary_key
                    || column.name.eq_ignore_ascii_case(MergedFeatureSchema::ID_COLUMN)
                    || column.name.eq_ignore_ascii_case("data")
                    || column.name.eq_ignore_ascii_case("content_type");
                !standard && column.not_null && column.default_value.is_none()
            })
            .collect())
    }

    /// Inserts a media row and returns its id.
    ///
    /// Each of the `required` columns gets a type-appropriate filler value.
    pub fn insert_media(
        &self,
        table: &str,
        required: &[ColumnDef],
        media: &MediaRow,
    ) -> GpkgResult<i64> {
        let mut names = vec![quote("data"), quote("content_type")];
        let mut values = vec![
            Value::Blob(media.data.clone()),
            Value::Text(media.content_type.clone()),
        ];
        for column in required {
            names.push(quote(&column.name));
            values.push(column.data_type.fill_value());
        }

        let mut statement = self.conn().prepare_cached(&format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote(table),
            names.join(", "),
            vec!["?"; names.len()].join(", ")
        ))?;
        statement.execute(params_from_iter(values.iter()))?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Reads one media row.
    pub fn read_media(&self, table: &str, id: i64) -> GpkgResult<Option<MediaRow>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT data, content_type FROM {} WHERE id = ?1", quote(table)),
                [id],
                |row| {
                    Ok(MediaRow {
                        data: row.get(0)?,
                        content_type: row.get(1)?,
                    })
                },
            )
            .optional()?)
    }

    /// Ids of every row in a media table, ascending.
    pub fn media_row_ids(&self, table: &str) -> GpkgResult<Vec<i64>> {
        let mut statement = self
            .conn()
            .prepare(&format!("SELECT id FROM {} ORDER BY id", quote(table)))?;
        let ids = statement
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }

    /// Links a base row to a related row through a mapping table.
    pub fn insert_relation_link(&self, mapping: &str, base_id: i64, related_id: i64) -> GpkgResult<()> {
        let mut statement = self.conn().prepare_cached(&format!(
            "INSERT INTO {} (base_id, related_id) VALUES (?1, ?2)",
            quote(mapping)
        ))?;
        statement.execute(params![base_id, related_id])?;
        Ok(())
    }

    /// Related ids linked to `base_id` through a mapping table.
    pub fn related_ids(&self, mapping: &str, base_id: i64) -> GpkgResult<Vec<i64>> {
        let mut statement = self.conn().prepare_cached(&format!(
            "SELECT related_id FROM {} WHERE base_id = ?1 ORDER BY related_id",
            quote(mapping)
        ))?;
        let ids = statement
            .query_map([base_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png() -> MediaRow {
        MediaRow {
            data: vec![0x89, b'P', b'N', b'G'],
            content_type: "image/png".to_string(),
        }
    }

    #[test]
    fn test_media_relation_roundtrip() {
        let gpkg = GeoPackage::open_in_memory().unwrap();
        gpkg.create_media_table("media").unwrap();
        let mapping = gpkg.create_media_relation("parks", "media").unwrap();
        assert_eq!(mapping, "parks_media");

        let id = gpkg.insert_media("media", &[], &png()).unwrap();
        gpkg.insert_relation_link(&mapping, 5, id).unwrap();

        assert_eq!(gpkg.related_ids(&mapping, 5).unwrap(), vec![id]);
        assert_eq!(gpkg.read_media("media", id).unwrap(), Some(png()));
        assert_eq!(gpkg.media_row_ids("media").unwrap(), vec![id]);

        let relations = gpkg.related_tables("parks").unwrap();
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].relation_name, MEDIA_RELATION);
        assert_eq!(relations[0].related_table, "media");
    }

    #[test]
    fn test_insert_media_fills_required_columns() {
        let gpkg = GeoPackage::open_in_memory().unwrap();
        gpkg.conn()
            .execute_batch(
                "CREATE TABLE photos (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    data BLOB NOT NULL,
                    content_type TEXT NOT NULL,
                    caption TEXT NOT NULL,
                    rating INTEGER NOT NULL,
                    taken DATETIME NOT NULL,
                    note TEXT,
                    source TEXT NOT NULL DEFAULT 'survey'
                )",
            )
            .unwrap();

        let required = gpkg.media_required_columns("photos").unwrap();
        let names: Vec<&str> = required.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["caption", "rating", "taken"]);

        let id = gpkg.insert_media("photos", &required, &png()).unwrap();
        let (caption, rating, source): (String, i64, String) = gpkg
            .conn()
            .query_row(
                "SELECT caption, rating, source FROM photos WHERE id = ?1",
                [id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(caption, "");
        assert_eq!(rating, 0);
        assert_eq!(source, "survey");
    }

    #[test]
    fn test_create_media_table_is_idempotent() {
        let gpkg = GeoPackage::open_in_memory().unwrap();
        gpkg.create_media_table("media").unwrap();
        let id = gpkg.insert_media("media", &[], &png()).unwrap();
        gpkg.create_media_table("media").unwrap();
        assert_eq!(gpkg.media_row_ids("media").unwrap(), vec![id]);
    }
}
