//! Feature style extension tables.
//!
//! Shared `nga_style` / `nga_icon` tables hold the rows; every styled
//! feature table `t` gets four mapping tables:
//!
//! | table | base | related |
//! |---|---|---|
//! | `nga_style_t` | feature id | style id |
//! | `nga_icon_t` | feature id | icon id |
//! | `nga_style_default_t` | `nga_table_style` id | style id |
//! | `nga_icon_default_t` | `nga_table_style` id | icon id |
//!
//! Each mapping row optionally carries a geometry type name; NULL applies
//! to every geometry type.

use rusqlite::{params, OptionalExtension, Row};

use crate::layer::{FeatureStyleLink, GeometryType, IconRow, StyleKind, StyleRow, TableStyleDefault};

use super::{quote, GeoPackage, GpkgResult};

pub const STYLE_TABLE: &str = "nga_style";
pub const ICON_TABLE: &str = "nga_icon";
pub const TABLE_STYLE_TABLE: &str = "nga_table_style";
pub const FEATURE_STYLE_EXTENSION: &str = "nga_feature_style";
const FEATURE_STYLE_DEFINITION: &str = "http://ngageoint.github.io/GeoPackage/docs/extensions/feature-style.html";

/// Name of the mapping table for `kind` on `table`.
pub fn mapping_table(kind: StyleKind, table: &str, table_default: bool) -> String {
    let prefix = match kind {
        StyleKind::Style => STYLE_TABLE,
        StyleKind::Icon => ICON_TABLE,
    };
    if table_default {
        format!("{prefix}_default_{table}")
    } else {
        format!("{prefix}_{table}")
    }
}

fn related_table(kind: StyleKind) -> &'static str {
    match kind {
        StyleKind::Style => STYLE_TABLE,
        StyleKind::Icon => ICON_TABLE,
    }
}

fn relation_name(kind: StyleKind) -> &'static str {
    match kind {
        StyleKind::Style => "attributes",
        StyleKind::Icon => "media",
    }
}

fn geometry_type_column(row: &Row<'_>, index: usize) -> rusqlite::Result<Option<GeometryType>> {
    let name: Option<String> = row.get(index)?;
    Ok(name.as_deref().and_then(GeometryType::parse))
}

const STYLE_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS nga_style (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    name TEXT,
    description TEXT,
    color TEXT,
    opacity REAL,
    width REAL,
    fill_color TEXT,
    fill_opacity REAL
);
CREATE TABLE IF NOT EXISTS nga_icon (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    name TEXT,
    description TEXT,
    data BLOB NOT NULL,
    content_type TEXT NOT NULL,
    width REAL,
    height REAL,
    anchor_u REAL,
    anchor_v REAL
);
CREATE TABLE IF NOT EXISTS nga_table_style (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    table_name TEXT NOT NULL UNIQUE
);
";

impl GeoPackage {
    /// Creates the shared style tables and the four mapping tables for
    /// `table`, registering their relations.
    pub fn create_style_extension(&self, table: &str) -> GpkgResult<()> {
        self.conn().execute_batch(STYLE_SCHEMA)?;
        self.register_extension(Some(table), None, FEATURE_STYLE_EXTENSION, FEATURE_STYLE_DEFINITION)?;
        self.conn().execute(
            "INSERT OR IGNORE INTO nga_table_style (table_name) VALUES (?1)",
            [table],
        )?;

        for kind in [StyleKind::Style, StyleKind::Icon] {
            for table_default in [false, true] {
                let mapping = mapping_table(kind, table, table_default);
                self.conn().execute_batch(&format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        base_id INTEGER NOT NULL,
                        related_id INTEGER NOT NULL,
                        geometry_type_name TEXT
                    )",
                    quote(&mapping)
                ))?;
                let base = if table_default { TABLE_STYLE_TABLE } else { table };
                self.register_relation(base, related_table(kind), relation_name(kind), &mapping)?;
            }
        }
        Ok(())
    }

    /// Returns true if `table` has style mapping tables.
    pub fn has_style_extension(&self, table: &str) -> GpkgResult<bool> {
        self.table_exists(&mapping_table(StyleKind::Style, table, false))
    }

    /// Inserts a style row, letting SQLite assign the id.
    pub fn insert_style(&self, style: &StyleRow) -> GpkgResult<i64> {
        self.conn().execute(
            "INSERT INTO nga_style
                (name, description, color, opacity, width, fill_color, fill_opacity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                style.name,
                style.description,
                style.color,
                style.opacity,
                style.width,
                style.fill_color,
                style.fill_opacity
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Inserts an icon row, letting SQLite assign the id.
    pub fn insert_icon(&self, icon: &IconRow) -> GpkgResult<i64> {
        self.conn().execute(
            "INSERT INTO nga_icon
                (name, description, data, content_type, width, height, anchor_u, anchor_v)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                icon.name,
                icon.description,
                icon.data,
                icon.content_type,
                icon.width,
                icon.height,
                icon.anchor_u,
                icon.anchor_v
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Maps a feature of `table` to a style or icon.
    pub fn insert_feature_style(
        &self,
        table: &str,
        kind: StyleKind,
        feature_id: i64,
        related_id: i64,
        geometry_type: Option<GeometryType>,
    ) -> GpkgResult<()> {
        let mut statement = self.conn().prepare_cached(&format!(
            "INSERT INTO {} (base_id, related_id, geometry_type_name) VALUES (?1, ?2, ?3)",
            quote(&mapping_table(kind, table, false))
        ))?;
        statement.execute(params![feature_id, related_id, geometry_type.map(|g| g.as_str())])?;
        Ok(())
    }

    /// Sets a table-level default style or icon for `table`.
    pub fn insert_table_style_default(
        &self,
        table: &str,
        kind: StyleKind,
        related_id: i64,
        geometry_type: Option<GeometryType>,
    ) -> GpkgResult<()> {
        let base_id = self.table_style_id(table)?;
        self.conn().execute(
            &format!(
                "INSERT INTO {} (base_id, related_id, geometry_type_name) VALUES (?1, ?2, ?3)",
                quote(&mapping_table(kind, table, true))
            ),
            params![base_id, related_id, geometry_type.map(|g| g.as_str())],
        )?;
        Ok(())
    }

    fn table_style_id(&self, table: &str) -> GpkgResult<i64> {
        let id: Option<i64> = self
            .conn()
            .query_row(
                "SELECT id FROM nga_table_style WHERE table_name = ?1",
                [table],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => Ok(id),
            None => {
                self.conn()
                    .execute("INSERT INTO nga_table_style (table_name) VALUES (?1)", [table])?;
                Ok(self.conn().last_insert_rowid())
            }
        }
    }

    /// True if any mapping of `table` references a style or icon row.
    pub fn has_style_rows(&self, table: &str) -> GpkgResult<bool> {
        if !self.has_style_extension(table)? {
            return Ok(false);
        }
        let mappings: Vec<String> = [StyleKind::Style, StyleKind::Icon]
            .into_iter()
            .flat_map(|kind| {
                [false, true].map(|table_default| {
                    format!(
                        "SELECT 1 FROM {}",
                        quote(&mapping_table(kind, table, table_default))
                    )
                })
            })
            .collect();
        let exists: bool = self.conn().query_row(
            &format!("SELECT EXISTS ({})", mappings.join(" UNION ALL ")),
            [],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Style rows referenced by any mapping of `table`.
    pub fn style_rows(&self, table: &str) -> GpkgResult<Vec<StyleRow>> {
        if !self.has_style_extension(table)? {
            return Ok(Vec::new());
        }
        let mut statement = self.conn().prepare(&format!(
            "SELECT id, name, description, color, opacity, width, fill_color, fill_opacity
               FROM nga_style
              WHERE id IN (SELECT related_id FROM {} UNION SELECT related_id FROM {})
              ORDER BY id",
            quote(&mapping_table(StyleKind::Style, table, false)),
            quote(&mapping_table(StyleKind::Style, table, true)),
        ))?;
        let rows = statement
            .query_map([], |row| {
                Ok(StyleRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    color: row.get(3)?,
                    opacity: row.get(4)?,
                    width: row.get(5)?,
                    fill_color: row.get(6)?,
                    fill_opacity: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Icon rows referenced by any mapping of `table`.
    pub fn icon_rows(&self, table: &str) -> GpkgResult<Vec<IconRow>> {
        if !self.has_style_extension(table)? {
            return Ok(Vec::new());
        }
        let mut statement = self.conn().prepare(&format!(
            "SELECT id, name, description, data, content_type, width, height, anchor_u, anchor_v
               FROM nga_icon
              WHERE id IN (SELECT related_id FROM {} UNION SELECT related_id FROM {})
              ORDER BY id",
            quote(&mapping_table(StyleKind::Icon, table, false)),
            quote(&mapping_table(StyleKind::Icon, table, true)),
        ))?;
        let rows = statement
            .query_map([], |row| {
                Ok(IconRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                    data: row.get(3)?,
                    content_type: row.get(4)?,
                    width: row.get(5)?,
                    height: row.get(6)?,
                    anchor_u: row.get(7)?,
                    anchor_v: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Feature-level style and icon mappings of `table`.
    pub fn feature_style_links(&self, table: &str) -> GpkgResult<Vec<FeatureStyleLink>> {
        if !self.has_style_extension(table)? {
            return Ok(Vec::new());
        }
        let mut links = Vec::new();
        for kind in [StyleKind::Style, StyleKind::Icon] {
            let mut statement = self.conn().prepare(&format!(
                "SELECT base_id, related_id, geometry_type_name FROM {} ORDER BY base_id",
                quote(&mapping_table(kind, table, false))
            ))?;
            let rows = statement.query_map([], |row| {
                Ok(FeatureStyleLink {
                    feature_id: row.get(0)?,
                    kind,
                    related_id: row.get(1)?,
                    geometry_type: geometry_type_column(row, 2)?,
                })
            })?;
            for link in rows {
                links.push(link?);
            }
        }
        Ok(links)
    }

    /// Table-level default style and icon mappings of `table`.
    pub fn table_style_defaults(&self, table: &str) -> GpkgResult<Vec<TableStyleDefault>> {
        if !self.has_style_extension(table)? {
            return Ok(Vec::new());
        }
        let mut defaults = Vec::new();
        for kind in [StyleKind::Style, StyleKind::Icon] {
            let mut statement = self.conn().prepare(&format!(
                "SELECT related_id, geometry_type_name FROM {}",
                quote(&mapping_table(kind, table, true))
            ))?;
            let rows = statement.query_map([], |row| {
                Ok(TableStyleDefault {
                    kind,
                    related_id: row.get(0)?,
                    geometry_type: geometry_type_column(row, 1)?,
                })
            })?;
            for default in rows {
                defaults.push(default?);
            }
        }
        Ok(defaults)
    }
}
