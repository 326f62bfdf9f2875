//! Merged feature layer build.
//!
//! ```text
//! Preparing:  validate → read source columns → merge schemas
//!             → open target → create table → style extension → media prescan
//! Executing:  per source: migrate styles
//!             per feature: filter → insert → link styles → attach media
//! ```
//!
//! Inserts are committed every `batch_size` features. A cancelled build
//! commits what it has written so far.

use std::collections::HashSet;
use std::ops::ControlFlow;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{CompositorSettings, FeatureBuildConfig};
use crate::coord::BoundingBox;
use crate::error::BuildError;
use crate::gpkg::GeoPackage;
use crate::layer::{Feature, LayerSource, Value, VectorSource};
use crate::media::{InsertedMediaMap, MediaAttachmentMigrator};
use crate::schema::{MergedFeatureSchema, NameChanges, RawColumnSet, SchemaMerger};
use crate::style::{IdRemap, SourceRemap, StyleRelationshipMigrator};

use super::progress::TileTimer;
use super::status::{BuildState, StatusReporter};
use super::{BuildOutcome, BuildReport};

/// One contributing source after the preparing phase.
struct PreparedSource<'a> {
    layer: &'a LayerSource,
    source: &'a dyn VectorSource,
    name_changes: NameChanges,
    /// Lowercased primary key and geometry column names.
    skipped_columns: HashSet<String>,
}

/// Mutable state of the executing phase.
struct CopyState {
    report: BuildReport,
    timer: TileTimer,
    extent: Option<BoundingBox>,
    pending: usize,
    fatal: Option<BuildError>,
}

/// Runs a feature build on the calling thread.
pub(crate) fn run(
    config: &FeatureBuildConfig,
    settings: &CompositorSettings,
    reporter: &StatusReporter,
    cancel: &CancellationToken,
) -> Result<BuildOutcome, BuildError> {
    let started = Instant::now();
    reporter.phase(BuildState::Preparing, "Preparing feature layer");
    config.validate()?;

    let sources = prepare_sources(config)?;
    let (schema, name_changes) = SchemaMerger::merge_all(sources.iter().map(|(_, _, c)| c));
    let sources: Vec<PreparedSource<'_>> = sources
        .into_iter()
        .zip(name_changes)
        .map(|((layer, source, columns), name_changes)| PreparedSource {
            layer,
            source,
            skipped_columns: skipped_columns(&columns),
            name_changes,
        })
        .collect();
    info!(
        table = %config.table_name,
        sources = sources.len(),
        columns = schema.columns.len(),
        "Merged source schemas"
    );

    let target = GeoPackage::create_or_open(&config.target_path)?;
    target.create_feature_table(&config.table_name, &schema, config.bounding_box.as_ref())?;

    let styles = StyleRelationshipMigrator::new(&config.table_name, sources.len());
    let styled = sources.iter().any(has_styles);
    if styled {
        styles.prepare(&target)?;
    }

    let mut media = MediaAttachmentMigrator::new(&config.table_name, &settings.features.media_table);
    let mut inserted_media = InsertedMediaMap::new();
    if let Err(e) = media.prescan(&target, &mut inserted_media) {
        warn!(error = %e, "Could not pre-scan target media table");
    }

    let total: u64 = sources
        .iter()
        .map(|s| {
            s.source.feature_count().unwrap_or_else(|e| {
                warn!(source = %s.layer.id, error = %e, "Could not count features");
                0
            })
        })
        .sum();

    let mut state = CopyState {
        report: BuildReport::new(&config.table_name),
        timer: TileTimer::new(total),
        extent: None,
        pending: 0,
        fatal: None,
    };

    reporter.phase(BuildState::Executing, format!("Copying {} features", total));
    target.begin()?;

    let mut remap = IdRemap::new();
    let mut cancelled = false;
    for prepared in &sources {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        if styled {
            match styles.migrate(&target, &prepared.layer.id, prepared.source, &mut remap) {
                Ok(migration) => {
                    state.report.styles_inserted += migration.styles_inserted;
                    state.report.icons_inserted += migration.icons_inserted;
                    state.report.defaults_copied += migration.defaults_copied;
                }
                Err(e) => warn!(
                    source = %prepared.layer.id,
                    error = %e,
                    "Style migration failed; features keep no style"
                ),
            }
        }
        let empty = SourceRemap::default();
        let source_remap = remap.get(&prepared.layer.id).unwrap_or(&empty);

        let result = prepared.source.for_each_feature(&mut |feature| {
            if cancel.is_cancelled() {
                cancelled = true;
                return ControlFlow::Break(());
            }
            state.timer.start_item();
            copy_feature(
                &target,
                config,
                &schema,
                prepared,
                feature,
                styled.then_some((&styles, source_remap)),
                &mut media,
                &mut inserted_media,
                &mut state,
            );
            state.timer.finish_item();

            if state.pending >= settings.features.batch_size {
                if let Err(e) = target.commit().and_then(|_| target.begin()) {
                    state.fatal = Some(e.into());
                    return ControlFlow::Break(());
                }
                state.pending = 0;
            }
            reporter.progress(
                format!(
                    "Copied {} of {} features",
                    state.report.features_copied, total
                ),
                state.timer.percent(),
                state.timer.eta_seconds(),
            );
            ControlFlow::Continue(())
        });

        if let Some(fatal) = state.fatal.take() {
            let _ = target.commit();
            return Err(fatal);
        }
        if let Err(e) = result {
            warn!(source = %prepared.layer.id, error = %e, "Reading features failed; source skipped");
        }
        if cancelled {
            break;
        }
    }

    target.commit()?;
    if let Some(extent) = state.extent {
        target.set_contents_bounds(&config.table_name, &extent)?;
    }
    if let Err(e) = target.close() {
        warn!(error = %e, "Closing target GeoPackage failed");
    }

    let mut report = state.report;
    report.elapsed = started.elapsed();
    info!(
        table = %report.table_name,
        copied = report.features_copied,
        skipped = report.features_skipped,
        media = report.media_inserted,
        cancelled,
        "Feature build finished"
    );
    Ok(if cancelled {
        BuildOutcome::Cancelled(report)
    } else {
        BuildOutcome::Completed(report)
    })
}

/// Reads every source's column set; a source that cannot be read is fatal.
fn prepare_sources(
    config: &FeatureBuildConfig,
) -> Result<Vec<(&LayerSource, &dyn VectorSource, RawColumnSet)>, BuildError> {
    let mut sources = Vec::with_capacity(config.layers.len());
    for layer in &config.layers {
        let Some(source) = layer.vector_source() else {
            continue;
        };
        let columns = source.columns().map_err(|e| BuildError::Layer {
            layer: layer.id.clone(),
            source: e,
        })?;
        sources.push((layer, source, columns));
    }
    Ok(sources)
}

fn skipped_columns(columns: &RawColumnSet) -> HashSet<String> {
    columns
        .columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| c.name.to_ascii_lowercase())
        .chain(columns.geometry_column.iter().map(|g| g.to_ascii_lowercase()))
        .collect()
}

fn has_styles(prepared: &PreparedSource<'_>) -> bool {
    prepared.source.has_styles().unwrap_or_else(|e| {
        warn!(source = %prepared.layer.id, error = %e, "Could not read styles");
        false
    })
}

/// Maps source values onto merged column names.
fn target_values(prepared: &PreparedSource<'_>, values: Vec<(String, Value)>) -> Vec<(String, Value)> {
    values
        .into_iter()
        .filter(|(name, _)| !prepared.skipped_columns.contains(&name.to_ascii_lowercase()))
        .map(|(name, value)| match prepared.name_changes.get(&name) {
            Some(renamed) => (renamed.clone(), value),
            None => (name, value),
        })
        .collect()
}

/// Copies one feature. Failures are logged and counted, never returned.
#[allow(clippy::too_many_arguments)]
fn copy_feature(
    target: &GeoPackage,
    config: &FeatureBuildConfig,
    schema: &MergedFeatureSchema,
    prepared: &PreparedSource<'_>,
    mut feature: Feature,
    styles: Option<(&StyleRelationshipMigrator, &SourceRemap)>,
    media: &mut MediaAttachmentMigrator,
    inserted_media: &mut InsertedMediaMap,
    state: &mut CopyState,
) {
    let envelope = feature.envelope();
    if let (Some(filter), Some(envelope)) = (config.bounding_box.as_ref(), envelope.as_ref()) {
        if !envelope.intersects(filter) {
            state.report.features_filtered += 1;
            return;
        }
    }

    let geometry = feature.geometry.as_ref().map(|g| g.data.as_slice());
    let values = target_values(prepared, std::mem::take(&mut feature.values));
    let target_id = match target.insert_feature(&config.table_name, schema, geometry, &values) {
        Ok(id) => id,
        Err(e) => {
            warn!(
                source = %prepared.layer.id,
                feature = feature.id,
                error = %e,
                "Skipping feature"
            );
            state.report.features_skipped += 1;
            return;
        }
    };
    state.report.features_copied += 1;
    state.pending += 1;
    if let Some(envelope) = envelope {
        state.extent = Some(match state.extent {
            Some(extent) => extent.union(&envelope),
            None => envelope,
        });
    }

    if let Some((migrator, remap)) = styles {
        match migrator.link_feature(target, remap, &feature, target_id) {
            Ok(links) => state.report.style_links += u64::from(links),
            Err(e) => warn!(feature = feature.id, error = %e, "Linking feature style failed"),
        }
    }

    match media.attach(target, prepared.source, feature.id, target_id, inserted_media) {
        Ok(attachment) => {
            state.report.media_inserted += attachment.inserted;
            state.report.media_reused += attachment.reused;
            state.report.media_links += attachment.links;
            state.report.media_failed += attachment.failed;
        }
        Err(e) => {
            warn!(feature = feature.id, error = %e, "Attaching media failed");
            state.report.media_failed += 1;
        }
    }
    debug!(source = %prepared.layer.id, feature = feature.id, target = target_id, "Copied feature");
}
