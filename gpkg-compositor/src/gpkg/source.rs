//! [`VectorSource`] over a feature table of an existing GeoPackage.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::coord::BoundingBox;
use crate::layer::{
    Feature, FeatureStyleLink, Geometry, GeometryType, IconRow, LayerError, MediaReference,
    MediaRow, StyleRow, TableStyleDefault, Value, VectorSource,
};
use crate::schema::RawColumnSet;

use super::media::MEDIA_RELATION;
use super::style::ICON_TABLE;
use super::{parse_geometry, quote, GeoPackage, GpkgError, GpkgResult};

impl From<GpkgError> for LayerError {
    fn from(err: GpkgError) -> Self {
        match err {
            GpkgError::Sqlite(e) => LayerError::Sqlite(e),
            other => LayerError::Read(other.to_string()),
        }
    }
}

/// Reads one feature table of a GeoPackage opened read-only.
#[derive(Debug)]
pub struct GeoPackageVectorSource {
    gpkg: GeoPackage,
    table: String,
}

impl GeoPackageVectorSource {
    /// Opens `table` in the GeoPackage at `path`.
    pub fn open(path: impl AsRef<Path>, table: impl Into<String>) -> GpkgResult<Self> {
        let gpkg = GeoPackage::open_read_only(path)?;
        let table = table.into();
        if !gpkg.table_exists(&table)? {
            return Err(GpkgError::MissingTable(table));
        }
        if gpkg.geometry_column(&table)?.is_none() {
            return Err(GpkgError::Unsupported {
                table,
                reason: "no geometry column registered".to_string(),
            });
        }
        debug!(path = %gpkg.path().display(), table = %table, "Opened vector source");
        Ok(Self { gpkg, table })
    }

    pub fn path(&self) -> PathBuf {
        self.gpkg.path().to_path_buf()
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Extent recorded in `gpkg_contents`.
    pub fn extent(&self) -> GpkgResult<Option<BoundingBox>> {
        self.gpkg.contents_bounds(&self.table)
    }
}

impl VectorSource for GeoPackageVectorSource {
    fn columns(&self) -> Result<RawColumnSet, LayerError> {
        Ok(self.gpkg.table_columns(&self.table)?)
    }

    fn feature_count(&self) -> Result<u64, LayerError> {
        Ok(self.gpkg.row_count(&self.table)?)
    }

    fn for_each_feature(
        &self,
        visit: &mut dyn FnMut(Feature) -> ControlFlow<()>,
    ) -> Result<(), LayerError> {
        let columns = self.columns()?;
        let id_column = columns
            .columns
            .iter()
            .find(|c| c.primary_key)
            .map(|c| c.name.clone())
            .ok_or_else(|| LayerError::Read(format!("{} has no primary key", self.table)))?;
        let geometry_column = columns.geometry_column.clone();

        let mut statement = self.gpkg.conn().prepare(&format!(
            "SELECT * FROM {} ORDER BY {}",
            quote(&self.table),
            quote(&id_column)
        ))?;
        let names: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();

        let mut rows = statement.query([])?;
        while let Some(row) = rows.next()? {
            let mut id = None;
            let mut geometry = None;
            let mut values = Vec::with_capacity(names.len());

            for (index, name) in names.iter().enumerate() {
                let value = Value::from(row.get_ref(index)?);
                if name.eq_ignore_ascii_case(&id_column) {
                    if let Value::Integer(v) = value {
                        id = Some(v);
                    }
                } else if geometry_column
                    .as_deref()
                    .is_some_and(|g| g.eq_ignore_ascii_case(name))
                {
                    if let Value::Blob(data) = value {
                        geometry = Some(match parse_geometry(data.clone()) {
                            Ok(parsed) => parsed,
                            Err(e) => {
                                warn!(table = %self.table, error = %e, "Unparseable geometry header");
                                Geometry {
                                    data,
                                    geometry_type: GeometryType::Geometry,
                                    envelope: None,
                                }
                            }
                        });
                    }
                } else {
                    values.push((name.clone(), value));
                }
            }

            let Some(id) = id else {
                warn!(table = %self.table, "Skipping row without integer id");
                continue;
            };
            if visit(Feature { id, geometry, values }).is_break() {
                break;
            }
        }
        Ok(())
    }

    fn style_rows(&self) -> Result<Vec<StyleRow>, LayerError> {
        Ok(self.gpkg.style_rows(&self.table)?)
    }

    fn icon_rows(&self) -> Result<Vec<IconRow>, LayerError> {
        Ok(self.gpkg.icon_rows(&self.table)?)
    }

    fn has_styles(&self) -> Result<bool, LayerError> {
        Ok(self.gpkg.has_style_rows(&self.table)?)
    }

    fn feature_style_mapping(&self) -> Result<Vec<FeatureStyleLink>, LayerError> {
        Ok(self.gpkg.feature_style_links(&self.table)?)
    }

    fn table_style_mapping(&self) -> Result<Vec<TableStyleDefault>, LayerError> {
        Ok(self.gpkg.table_style_defaults(&self.table)?)
    }

    fn media_relations(&self, feature_id: i64) -> Result<Vec<MediaReference>, LayerError> {
        let mut references = Vec::new();
        for relation in self.gpkg.related_tables(&self.table)? {
            if relation.relation_name != MEDIA_RELATION
                || relation.related_table.eq_ignore_ascii_case(ICON_TABLE)
            {
                continue;
            }
            for media_row_id in self.gpkg.related_ids(&relation.mapping_table, feature_id)? {
                references.push(MediaReference {
                    container_path: self.path(),
                    media_table: relation.related_table.clone(),
                    media_row_id,
                });
            }
        }
        Ok(references)
    }

    fn media_row(&self, reference: &MediaReference) -> Result<MediaRow, LayerError> {
        self.gpkg
            .read_media(&reference.media_table, reference.media_row_id)?
            .ok_or_else(|| LayerError::MissingRow {
                table: reference.media_table.clone(),
                id: reference.media_row_id,
            })
    }
}
