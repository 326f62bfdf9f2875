//! GPKG Compositor CLI - Command-line interface
//!
//! Drives the compositor library against GeoPackage sources:
//!
//! - `merge-features` merges feature tables into one target table
//! - `build-tiles` composites tile tables into one tile pyramid

mod commands;
mod error;
mod runner;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::common::{parse_bbox, SourceSpec};
use error::CliError;
use gpkg_compositor::coord::BoundingBox;

#[derive(Debug, Parser)]
#[command(name = "gpkg-compositor")]
#[command(version, about = "Merge GeoPackage layers into one feature table or tile pyramid")]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the log file
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Merge feature tables into a new table of the target GeoPackage
    MergeFeatures {
        /// Target GeoPackage, created if missing
        #[arg(long)]
        target: PathBuf,

        /// Name of the new feature table
        #[arg(long)]
        table: String,

        /// Source feature table as PATH:TABLE (repeatable)
        #[arg(long = "source", required = true, value_parser = SourceSpec::parse)]
        sources: Vec<SourceSpec>,

        /// Only copy features intersecting MIN_LON,MIN_LAT,MAX_LON,MAX_LAT
        #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
        bbox: Option<BoundingBox>,
    },

    /// Composite tile tables into a new tile pyramid
    BuildTiles {
        /// Target GeoPackage, created if missing
        #[arg(long)]
        target: PathBuf,

        /// Name of the new tile table
        #[arg(long)]
        table: String,

        /// Source tile table as PATH:TABLE[@OPACITY] (repeatable, bottom first)
        #[arg(long = "source", required = true, value_parser = SourceSpec::parse)]
        sources: Vec<SourceSpec>,

        /// Lowest zoom level
        #[arg(long, default_value_t = 0)]
        min_zoom: u8,

        /// Highest zoom level
        #[arg(long)]
        max_zoom: u8,

        /// Write a sparse pyramid with the tile scaling extension
        #[arg(long)]
        scaling: bool,

        /// Only build tiles within MIN_LON,MIN_LAT,MAX_LON,MAX_LAT
        #[arg(long, value_parser = parse_bbox, allow_hyphen_values = true)]
        bbox: Option<BoundingBox>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = run(cli).await;
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let runner = runner::CliRunner::new(cli.config.as_deref(), cli.log_dir.as_deref())?;

    match cli.command {
        Commands::MergeFeatures {
            target,
            table,
            sources,
            bbox,
        } => {
            runner.log_startup("merge-features");
            commands::merge::run(
                &runner,
                commands::merge::MergeArgs {
                    target,
                    table,
                    sources,
                    bbox,
                },
            )
            .await
        }
        Commands::BuildTiles {
            target,
            table,
            sources,
            min_zoom,
            max_zoom,
            scaling,
            bbox,
        } => {
            runner.log_startup("build-tiles");
            commands::tiles::run(
                &runner,
                commands::tiles::TilesArgs {
                    target,
                    table,
                    sources,
                    min_zoom,
                    max_zoom,
                    scaling,
                    bbox,
                },
            )
            .await
        }
    }
}
