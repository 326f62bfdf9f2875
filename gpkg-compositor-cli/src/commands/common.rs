//! Common types and utilities shared across CLI commands.

use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use gpkg_compositor::build::{BuildOutcome, BuildReport, BuildStatus};
use gpkg_compositor::coord::BoundingBox;

use crate::error::CliError;

/// A source table given as `PATH:TABLE`, optionally followed by `@OPACITY`.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSpec {
    pub path: PathBuf,
    pub table: String,
    pub opacity: Option<f32>,
}

impl SourceSpec {
    /// Parses a `--source` argument.
    ///
    /// The table is split off at the last `:` so Windows drive letters work.
    pub fn parse(arg: &str) -> Result<Self, String> {
        let (rest, opacity) = match arg.rsplit_once('@') {
            Some((rest, opacity)) => {
                let opacity: f32 = opacity
                    .parse()
                    .map_err(|_| format!("invalid opacity '{}'", opacity))?;
                (rest, Some(opacity))
            }
            None => (arg, None),
        };

        let (path, table) = rest
            .rsplit_once(':')
            .ok_or_else(|| format!("expected PATH:TABLE, got '{}'", arg))?;
        if path.is_empty() || table.is_empty() {
            return Err(format!("expected PATH:TABLE, got '{}'", arg));
        }

        Ok(Self {
            path: PathBuf::from(path),
            table: table.to_string(),
            opacity,
        })
    }

    /// Layer id shown in logs and status messages.
    ///
    /// Built from the full path so same-named files in different
    /// directories stay distinct.
    pub fn layer_id(&self) -> String {
        format!("{}:{}", self.path.display(), self.table)
    }
}

/// Parses `MIN_LON,MIN_LAT,MAX_LON,MAX_LAT`.
pub fn parse_bbox(arg: &str) -> Result<BoundingBox, String> {
    let values = arg
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("invalid bounding box '{}': {}", arg, e))?;

    match values.as_slice() {
        [min_lon, min_lat, max_lon, max_lat] => {
            let bbox = BoundingBox::new(*min_lon, *min_lat, *max_lon, *max_lat);
            if bbox.is_valid() {
                Ok(bbox)
            } else {
                Err(format!("bounding box '{}' has a minimum above its maximum", arg))
            }
        }
        _ => Err(format!(
            "expected MIN_LON,MIN_LAT,MAX_LON,MAX_LAT, got '{}'",
            arg
        )),
    }
}

/// Shows status updates on a progress bar until the channel closes.
pub fn watch_progress(mut rx: mpsc::Receiver<BuildStatus>) -> JoinHandle<()> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .map(|style| style.progress_chars("=> "))
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    tokio::spawn(async move {
        while let Some(status) = rx.recv().await {
            bar.set_position(status.progress_percent.round() as u64);
            let message = match status.eta_seconds {
                Some(eta) => format!("{} (eta {}s)", status.message, eta),
                None => status.message.clone(),
            };
            bar.set_message(message);
            if status.state.is_terminal() {
                bar.finish_with_message(format!("{}: {}", status.state, status.message));
            }
        }
        if !bar.is_finished() {
            bar.abandon();
        }
    })
}

/// Turns a build outcome into the report or a CLI error.
pub fn into_report(outcome: BuildOutcome) -> Result<BuildReport, CliError> {
    match outcome {
        BuildOutcome::Completed(report) => Ok(report),
        BuildOutcome::Cancelled(report) => {
            print_header(&report);
            println!("  Stopped early; the target holds everything written so far.");
            Err(CliError::Cancelled)
        }
        BuildOutcome::Failed(e) => Err(CliError::Build(e)),
    }
}

/// Prints the lines every report starts with.
pub fn print_header(report: &BuildReport) {
    println!();
    println!("Table:   {}", report.table_name);
    println!("Started: {}", report.started_at.to_rfc3339());
    println!("Elapsed: {:.1}s", report.elapsed.as_secs_f64());
}
