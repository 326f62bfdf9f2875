//! Media attachment migration.
//!
//! Media rows referenced by copied features are inserted into one shared
//! target media table. Every source row is identified by a [`MediaKey`];
//! the [`InsertedMediaMap`] records where each key landed so a blob
//! referenced by several features, from any number of sources, is stored
//! once and linked many times.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::MigrationError;
use crate::gpkg::GeoPackage;
use crate::layer::{MediaReference, VectorSource};
use crate::schema::ColumnDef;

/// Identity of a media row in its origin container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaKey {
    pub container_path: PathBuf,
    pub media_table: String,
    pub media_row_id: i64,
}

impl MediaKey {
    pub fn new(container_path: &Path, media_table: &str, media_row_id: i64) -> Self {
        let container_path =
            fs::canonicalize(container_path).unwrap_or_else(|_| container_path.to_path_buf());
        Self {
            container_path,
            media_table: media_table.to_ascii_lowercase(),
            media_row_id,
        }
    }
}

impl From<&MediaReference> for MediaKey {
    fn from(reference: &MediaReference) -> Self {
        MediaKey::new(
            &reference.container_path,
            &reference.media_table,
            reference.media_row_id,
        )
    }
}

/// Dedupe key to target media row id.
#[derive(Debug, Default)]
pub struct InsertedMediaMap {
    rows: HashMap<MediaKey, i64>,
}

impl InsertedMediaMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &MediaKey) -> Option<i64> {
        self.rows.get(key).copied()
    }

    pub fn insert(&mut self, key: MediaKey, target_id: i64) {
        self.rows.insert(key, target_id);
    }
}

/// Outcome of attaching one feature's media.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MediaAttachment {
    pub inserted: u64,
    pub reused: u64,
    pub links: u64,
    pub failed: u64,
}

/// Target media tables, created on first use.
#[derive(Debug)]
struct PreparedMedia {
    mapping_table: String,
    /// Extra columns every media insert has to fill.
    required_columns: Vec<ColumnDef>,
}

/// Copies media referenced by source features into the target.
#[derive(Debug)]
pub struct MediaAttachmentMigrator {
    target_table: String,
    media_table: String,
    prepared: Option<PreparedMedia>,
}

impl MediaAttachmentMigrator {
    pub fn new(target_table: impl Into<String>, media_table: impl Into<String>) -> Self {
        Self {
            target_table: target_table.into(),
            media_table: media_table.into(),
            prepared: None,
        }
    }

    /// Seeds `inserted` with the rows of an existing target media table.
    ///
    /// A layer appended from the target container itself then links to
    /// the rows already there instead of duplicating them.
    pub fn prescan(
        &self,
        target: &GeoPackage,
        inserted: &mut InsertedMediaMap,
    ) -> Result<usize, MigrationError> {
        if !target.table_exists(&self.media_table)? {
            return Ok(0);
        }
        let ids = target.media_row_ids(&self.media_table)?;
        for id in &ids {
            inserted.insert(MediaKey::new(target.path(), &self.media_table, *id), *id);
        }
        debug!(table = %self.media_table, rows = ids.len(), "Pre-scanned target media");
        Ok(ids.len())
    }

    fn prepare(&self, target: &GeoPackage) -> Result<PreparedMedia, MigrationError> {
        target.create_media_table(&self.media_table)?;
        let mapping_table = target.create_media_relation(&self.target_table, &self.media_table)?;
        let required_columns = target.media_required_columns(&self.media_table)?;
        debug!(
            table = %self.media_table,
            required = required_columns.len(),
            "Prepared target media table"
        );
        Ok(PreparedMedia {
            mapping_table,
            required_columns,
        })
    }

    /// Copies and links the media of one feature.
    ///
    /// A media row that cannot be fetched is logged and left unlinked;
    /// the remaining references of the feature are still processed.
    pub fn attach(
        &mut self,
        target: &GeoPackage,
        source: &dyn VectorSource,
        source_feature_id: i64,
        target_feature_id: i64,
        inserted: &mut InsertedMediaMap,
    ) -> Result<MediaAttachment, MigrationError> {
        let mut attachment = MediaAttachment::default();
        let references = source.media_relations(source_feature_id)?;
        if references.is_empty() {
            return Ok(attachment);
        }
        if self.prepared.is_none() {
            self.prepared = Some(self.prepare(target)?);
        }
        let Some(prepared) = &self.prepared else {
            return Ok(attachment);
        };

        for reference in &references {
            let key = MediaKey::from(reference);
            let media_id = match inserted.get(&key) {
                Some(id) => {
                    attachment.reused += 1;
                    id
                }
                None => {
                    let row = match source.media_row(reference) {
                        Ok(row) => row,
                        Err(e) => {
                            warn!(
                                feature = source_feature_id,
                                media_table = %reference.media_table,
                                media_id = reference.media_row_id,
                                error = %e,
                                "Skipping media row"
                            );
                            attachment.failed += 1;
                            continue;
                        }
                    };
                    let id = target.insert_media(&self.media_table, &prepared.required_columns, &row)?;
                    inserted.insert(key, id);
                    attachment.inserted += 1;
                    id
                }
            };
            target.insert_relation_link(&prepared.mapping_table, target_feature_id, media_id)?;
            attachment.links += 1;
        }
        Ok(attachment)
    }
}
