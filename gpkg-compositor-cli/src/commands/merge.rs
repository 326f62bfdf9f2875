//! Merge-features command - merge feature tables into one table.

use std::path::PathBuf;

use tracing::info;

use gpkg_compositor::config::FeatureBuildConfig;
use gpkg_compositor::coord::BoundingBox;
use gpkg_compositor::gpkg::GeoPackageVectorSource;
use gpkg_compositor::layer::LayerSource;

use super::common::{into_report, print_header, watch_progress, SourceSpec};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the merge-features command.
pub struct MergeArgs {
    pub target: PathBuf,
    pub table: String,
    pub sources: Vec<SourceSpec>,
    pub bbox: Option<BoundingBox>,
}

/// Run the merge-features command.
pub async fn run(runner: &CliRunner, args: MergeArgs) -> Result<(), CliError> {
    let mut layers = Vec::with_capacity(args.sources.len());
    for spec in &args.sources {
        if spec.opacity.is_some() {
            return Err(CliError::Config(format!(
                "Opacity has no effect on feature sources: {}",
                spec.layer_id()
            )));
        }
        let source = GeoPackageVectorSource::open(&spec.path, spec.table.clone()).map_err(
            |error| CliError::Source {
                spec: spec.layer_id(),
                error,
            },
        )?;
        let extent = source.extent().ok().flatten();

        let mut layer = LayerSource::vector(spec.layer_id(), &spec.path, &spec.table, Box::new(source));
        if let Some(extent) = extent {
            layer = layer.with_extent(extent);
        }
        layers.push(layer);
    }

    println!("GPKG Compositor v{}", gpkg_compositor::VERSION);
    println!("====================");
    println!();
    println!("Target:  {} ({})", args.target.display(), args.table);
    for spec in &args.sources {
        println!("Source:  {}", spec.layer_id());
    }
    println!();
    println!("Press Ctrl+C to stop; features copied so far are kept");
    println!();

    let mut config = FeatureBuildConfig::new(&args.target, &args.table, layers);
    if let Some(bbox) = args.bbox {
        config = config.with_bounding_box(bbox);
    }

    let orchestrator = runner.orchestrator();
    let cancel = runner.cancel_on_ctrl_c()?;
    let (tx, rx) = orchestrator.status_channel();
    let progress = watch_progress(rx);

    let outcome = orchestrator.build_feature_layer(config, tx, cancel).await;
    let _ = progress.await;
    let report = into_report(outcome)?;

    info!(table = %report.table_name, copied = report.features_copied, "Merge finished");
    print_header(&report);
    println!();
    println!("Features");
    println!("────────");
    println!("  Copied:   {}", report.features_copied);
    println!("  Skipped:  {}", report.features_skipped);
    println!("  Filtered: {}", report.features_filtered);
    println!();
    println!("Styles");
    println!("──────");
    println!("  Styles inserted: {}", report.styles_inserted);
    println!("  Icons inserted:  {}", report.icons_inserted);
    println!("  Table defaults:  {}", report.defaults_copied);
    println!("  Feature links:   {}", report.style_links);
    println!();
    println!("Media");
    println!("─────");
    println!(
        "  Rows: {} inserted, {} reused, {} failed",
        report.media_inserted, report.media_reused, report.media_failed
    );
    println!("  Links: {}", report.media_links);
    Ok(())
}
