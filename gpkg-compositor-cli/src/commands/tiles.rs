//! Build-tiles command - composite tile tables into one tile pyramid.

use std::path::PathBuf;

use tracing::info;

use gpkg_compositor::config::TileBuildConfig;
use gpkg_compositor::coord::BoundingBox;
use gpkg_compositor::gpkg::GeoPackageTileRenderer;
use gpkg_compositor::layer::LayerSource;

use super::common::{into_report, print_header, watch_progress, SourceSpec};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the build-tiles command.
pub struct TilesArgs {
    pub target: PathBuf,
    pub table: String,
    pub sources: Vec<SourceSpec>,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub scaling: bool,
    pub bbox: Option<BoundingBox>,
}

/// Run the build-tiles command.
pub async fn run(runner: &CliRunner, args: TilesArgs) -> Result<(), CliError> {
    let mut layers = Vec::with_capacity(args.sources.len());
    for (order, spec) in args.sources.iter().enumerate() {
        let renderer = GeoPackageTileRenderer::open(&spec.path, spec.table.clone()).map_err(
            |error| CliError::Source {
                spec: spec.layer_id(),
                error,
            },
        )?;
        let extent = renderer.extent().ok().flatten();

        let mut layer = LayerSource::raster(spec.layer_id(), &spec.path, &spec.table, Box::new(renderer))
            .with_rendering_order(order as i32)
            .with_opacity(spec.opacity.unwrap_or(1.0));
        if let Some(extent) = extent {
            layer = layer.with_extent(extent);
        }
        layers.push(layer);
    }

    let tiles = &runner.settings().tiles;
    println!("GPKG Compositor v{}", gpkg_compositor::VERSION);
    println!("====================");
    println!();
    println!("Target:  {} ({})", args.target.display(), args.table);
    println!(
        "Zoom:    {}-{}{}",
        args.min_zoom,
        args.max_zoom,
        if args.scaling { " (scaling)" } else { "" }
    );
    println!(
        "Tiles:   {}px, JPEG quality {}, PNG {} bits",
        tiles.tile_size, tiles.jpeg_quality, tiles.png_bits
    );
    for spec in &args.sources {
        println!(
            "Source:  {} (opacity {:.2})",
            spec.layer_id(),
            spec.opacity.unwrap_or(1.0)
        );
    }
    println!();
    println!("Press Ctrl+C to stop; tiles written so far are kept");
    println!();

    let mut config = TileBuildConfig::new(
        &args.target,
        &args.table,
        layers,
        args.min_zoom,
        args.max_zoom,
    )
    .with_scaling(args.scaling);
    if let Some(bbox) = args.bbox {
        config = config.with_bounding_box(bbox);
    }

    let orchestrator = runner.orchestrator();
    let cancel = runner.cancel_on_ctrl_c()?;
    let (tx, rx) = orchestrator.status_channel();
    let progress = watch_progress(rx);

    let outcome = orchestrator.build_tile_layer(config, tx, cancel).await;
    let _ = progress.await;
    let report = into_report(outcome)?;

    info!(table = %report.table_name, written = report.tiles_written, "Tile build finished");
    print_header(&report);
    println!();
    println!("Tiles");
    println!("─────");
    println!("  Levels:  {:?}", report.levels);
    println!("  Planned: {}", report.tiles_planned);
    println!("  Written: {}", report.tiles_written);
    println!("  Blank:   {}", report.tiles_blank);
    println!(
        "  Failed:  {} ({} with failed layers)",
        report.tiles_failed, report.tiles_with_failed_layers
    );
    Ok(())
}
