//! Tile pyramid build.
//!
//! ```text
//! Preparing:  validate → plan levels → open target → create tile table
//!             → tile scaling extension
//! Executing:  per planned tile: composite layers → encode → insert
//! ```
//!
//! Tiles are visited zoom by zoom, rows north to south, columns west to
//! east. Blank tiles are not written.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::composite::TileCompositor;
use crate::config::{CompositorSettings, TileBuildConfig};
use crate::coord::BoundingBox;
use crate::error::BuildError;
use crate::gpkg::GeoPackage;
use crate::layer::LayerSource;
use crate::pyramid::TilePyramidPlanner;

use super::progress::TileTimer;
use super::status::{BuildState, StatusReporter};
use super::{BuildOutcome, BuildReport};

/// Tiles written per transaction.
const TILE_COMMIT_INTERVAL: u64 = 100;

/// Runs a tile build on the calling thread.
pub(crate) fn run(
    config: &TileBuildConfig,
    settings: &CompositorSettings,
    reporter: &StatusReporter,
    cancel: &CancellationToken,
) -> Result<BuildOutcome, BuildError> {
    let started = Instant::now();
    reporter.phase(BuildState::Preparing, "Planning tile pyramid");
    config.validate()?;

    let extents: Vec<BoundingBox> = config.layers.iter().filter_map(|l| l.extent).collect();
    let plan = TilePyramidPlanner::plan(
        config.bounding_box.as_ref(),
        &extents,
        config.min_zoom,
        config.max_zoom,
        config.scaling,
    )?;
    info!(
        table = %config.table_name,
        levels = ?plan.levels,
        tiles = plan.tile_count,
        "Planned tile build"
    );

    let target = GeoPackage::create_or_open(&config.target_path)?;
    target.create_tile_table(
        &config.table_name,
        &plan.bbox,
        config.min_zoom,
        config.max_zoom,
        settings.tiles.tile_size,
    )?;
    if let Some(scaling) = plan.scaling {
        target.create_tile_scaling(&config.table_name, scaling.zoom_in, scaling.zoom_out)?;
    }

    let mut layers: Vec<&LayerSource> = config.layers.iter().collect();
    TileCompositor::sort_layers(&mut layers);
    let compositor = TileCompositor::new(
        plan.bbox,
        settings.tiles.tile_size,
        settings.tiles.encode_settings(),
    );

    let mut report = BuildReport::new(&config.table_name);
    report.tiles_planned = plan.tile_count;
    report.levels = plan.levels.clone();
    let mut timer = TileTimer::new(plan.tile_count);

    reporter.phase(
        BuildState::Executing,
        format!("Rendering {} tiles", plan.tile_count),
    );
    target.begin()?;

    let mut cancelled = false;
    for tile in plan.tiles() {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        timer.start_item();

        match compositor.composite(tile, &layers) {
            Ok(composited) => {
                if composited.failed_layers > 0 {
                    report.tiles_with_failed_layers += 1;
                }
                match composited.encoded {
                    Some(encoded) => match target.insert_tile(&config.table_name, &tile, &encoded.data) {
                        Ok(()) => report.tiles_written += 1,
                        Err(e) => {
                            warn!(
                                zoom = tile.zoom,
                                col = tile.col,
                                row = tile.row,
                                error = %e,
                                "Writing tile failed"
                            );
                            report.tiles_failed += 1;
                        }
                    },
                    None => report.tiles_blank += 1,
                }
            }
            Err(e) => {
                warn!(
                    zoom = tile.zoom,
                    col = tile.col,
                    row = tile.row,
                    error = %e,
                    "Encoding tile failed"
                );
                report.tiles_failed += 1;
            }
        }

        timer.finish_item();
        if timer.processed() % TILE_COMMIT_INTERVAL == 0 {
            target.commit()?;
            target.begin()?;
            debug!(processed = timer.processed(), "Committed tile batch");
        }
        reporter.progress(
            format!(
                "Processed {} of {} tiles (zoom {})",
                timer.processed(),
                plan.tile_count,
                tile.zoom
            ),
            timer.percent(),
            timer.eta_seconds(),
        );
    }

    target.commit()?;
    if let Err(e) = target.close() {
        warn!(error = %e, "Closing target GeoPackage failed");
    }

    report.elapsed = started.elapsed();
    info!(
        table = %report.table_name,
        written = report.tiles_written,
        blank = report.tiles_blank,
        failed = report.tiles_failed,
        cancelled,
        "Tile build finished"
    );
    Ok(if cancelled {
        BuildOutcome::Cancelled(report)
    } else {
        BuildOutcome::Completed(report)
    })
}
