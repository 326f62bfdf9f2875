//! Style and icon migration into a merged feature table.
//!
//! Every contributing source gets its own [`SourceRemap`] inside one
//! [`IdRemap`] per build. The remap is filled the first time a source is
//! migrated and reused for every feature copied from that source, so a
//! style row shared by many features is inserted into the target once.
//!
//! Feature-level links are written per copied feature through
//! [`StyleRelationshipMigrator::link_feature`]. Table-level defaults are
//! copied only when a single source contributes; with several sources
//! they are skipped and each feature's effective default is written as a
//! feature-level link instead.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::error::MigrationError;
use crate::gpkg::{GeoPackage, GpkgResult};
use crate::layer::{
    Feature, FeatureStyleLink, GeometryType, StyleKind, TableStyleDefault, VectorSource,
};

/// Old-to-new id maps of one source.
#[derive(Debug, Clone, Default)]
pub struct SourceRemap {
    pub style_mapping: HashMap<i64, i64>,
    pub icon_mapping: HashMap<i64, i64>,
    feature_links: HashMap<i64, Vec<FeatureStyleLink>>,
    table_defaults: Vec<TableStyleDefault>,
}

impl SourceRemap {
    fn mapping(&self, kind: StyleKind) -> &HashMap<i64, i64> {
        match kind {
            StyleKind::Style => &self.style_mapping,
            StyleKind::Icon => &self.icon_mapping,
        }
    }

    /// Target id of a source-local style or icon id.
    pub fn remapped(&self, kind: StyleKind, old_id: i64) -> Option<i64> {
        self.mapping(kind).get(&old_id).copied()
    }

    /// Source-local id the feature is styled with, looking at its own
    /// mappings first and, if `use_defaults`, the table defaults.
    ///
    /// Mappings qualified by the feature's geometry type win over
    /// unqualified ones.
    pub fn effective_id(
        &self,
        kind: StyleKind,
        feature_id: i64,
        geometry_type: GeometryType,
        use_defaults: bool,
    ) -> Option<i64> {
        let own = self.feature_links.get(&feature_id).and_then(|links| {
            let of_kind = move || links.iter().filter(move |l| l.kind == kind);
            of_kind()
                .find(|l| l.geometry_type == Some(geometry_type))
                .or_else(|| of_kind().find(|l| l.geometry_type.is_none()))
                .or_else(|| of_kind().next())
                .map(|l| l.related_id)
        });
        if own.is_some() || !use_defaults {
            return own;
        }

        let defaults = move || self.table_defaults.iter().filter(move |d| d.kind == kind);
        defaults()
            .find(|d| d.geometry_type == Some(geometry_type))
            .or_else(|| defaults().find(|d| d.geometry_type.is_none()))
            .map(|d| d.related_id)
    }
}

/// Per-build remap table indexed by source identity.
#[derive(Debug, Default)]
pub struct IdRemap {
    sources: HashMap<String, SourceRemap>,
}

impl IdRemap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remap of a source, created empty on first access.
    pub fn entry(&mut self, parent_id: &str) -> &mut SourceRemap {
        self.sources.entry(parent_id.to_string()).or_default()
    }

    pub fn get(&self, parent_id: &str) -> Option<&SourceRemap> {
        self.sources.get(parent_id)
    }

    pub fn contains(&self, parent_id: &str) -> bool {
        self.sources.contains_key(parent_id)
    }
}

/// Rows written while migrating one source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StyleMigration {
    pub styles_inserted: u64,
    pub icons_inserted: u64,
    pub defaults_copied: u64,
}

/// Copies style and icon rows and their mappings into a target table.
#[derive(Debug, Clone)]
pub struct StyleRelationshipMigrator {
    target_table: String,
    source_count: usize,
}

impl StyleRelationshipMigrator {
    /// `source_count` is the number of sources contributing to the target.
    pub fn new(target_table: impl Into<String>, source_count: usize) -> Self {
        Self {
            target_table: target_table.into(),
            source_count,
        }
    }

    /// Whether table-level defaults are copied verbatim.
    pub fn copies_table_defaults(&self) -> bool {
        self.source_count == 1
    }

    /// Creates the style extension tables for the target table.
    pub fn prepare(&self, target: &GeoPackage) -> GpkgResult<()> {
        target.create_style_extension(&self.target_table)
    }

    /// Migrates the style and icon rows of one source.
    ///
    /// Rows are inserted without their source id so the target assigns a
    /// new one. A source that was already migrated is not inserted again.
    pub fn migrate(
        &self,
        target: &GeoPackage,
        parent_id: &str,
        source: &dyn VectorSource,
        remap: &mut IdRemap,
    ) -> Result<StyleMigration, MigrationError> {
        let mut migration = StyleMigration::default();
        if remap.contains(parent_id) {
            debug!(source = %parent_id, "Styles already migrated");
            return Ok(migration);
        }

        let styles = source.style_rows()?;
        let icons = source.icon_rows()?;
        let feature_links = source.feature_style_mapping()?;
        let table_defaults = source.table_style_mapping()?;

        let entry = remap.entry(parent_id);
        for mut style in styles {
            let Some(old_id) = style.id.take() else {
                continue;
            };
            if entry.style_mapping.contains_key(&old_id) {
                continue;
            }
            let new_id = target.insert_style(&style)?;
            entry.style_mapping.insert(old_id, new_id);
            migration.styles_inserted += 1;
        }
        for mut icon in icons {
            let Some(old_id) = icon.id.take() else {
                continue;
            };
            if entry.icon_mapping.contains_key(&old_id) {
                continue;
            }
            let new_id = target.insert_icon(&icon)?;
            entry.icon_mapping.insert(old_id, new_id);
            migration.icons_inserted += 1;
        }

        for link in feature_links {
            entry.feature_links.entry(link.feature_id).or_default().push(link);
        }

        if self.copies_table_defaults() {
            for default in &table_defaults {
                if let Some(new_id) = entry.remapped(default.kind, default.related_id) {
                    target.insert_table_style_default(
                        &self.target_table,
                        default.kind,
                        new_id,
                        default.geometry_type,
                    )?;
                    migration.defaults_copied += 1;
                }
            }
        } else if !table_defaults.is_empty() {
            debug!(
                source = %parent_id,
                defaults = table_defaults.len(),
                "Several sources contribute; table defaults not copied"
            );
        }
        entry.table_defaults = table_defaults;

        info!(
            source = %parent_id,
            table = %self.target_table,
            styles = migration.styles_inserted,
            icons = migration.icons_inserted,
            "Migrated styles"
        );
        Ok(migration)
    }

    /// Writes the feature-level style and icon links of a copied feature.
    ///
    /// Returns the number of links written.
    pub fn link_feature(
        &self,
        target: &GeoPackage,
        remap: &SourceRemap,
        feature: &Feature,
        target_feature_id: i64,
    ) -> Result<u32, MigrationError> {
        let use_defaults = !self.copies_table_defaults();
        let mut written = 0;
        for kind in [StyleKind::Style, StyleKind::Icon] {
            let Some(old_id) =
                remap.effective_id(kind, feature.id, feature.geometry_type(), use_defaults)
            else {
                continue;
            };
            match remap.remapped(kind, old_id) {
                Some(new_id) => {
                    target.insert_feature_style(
                        &self.target_table,
                        kind,
                        target_feature_id,
                        new_id,
                        None,
                    )?;
                    written += 1;
                }
                None => debug!(
                    feature = feature.id,
                    related = old_id,
                    "Mapping points at a row the source did not provide"
                ),
            }
        }
        Ok(written)
    }
}
