//! Build orchestration.
//!
//! [`BuildOrchestrator`] is the entry point for both top-level operations:
//!
//! - [`build_feature_layer`](BuildOrchestrator::build_feature_layer) merges
//!   vector layers into one feature table
//! - [`build_tile_layer`](BuildOrchestrator::build_tile_layer) composites
//!   layers into a tile pyramid
//!
//! Each build runs on a blocking worker thread since the GeoPackage layer
//! is synchronous. The caller observes it through a bounded
//! [`BuildStatus`] channel and stops it through a [`CancellationToken`].
//!
//! ```text
//! Starting ─► Preparing ─► Executing ─► Completed
//!                 │            │
//!                 ├────────────┴──────► Cancelled
//!                 └────────────────────► Failed
//! ```
//!
//! Only setup problems fail a build. Per-feature, per-tile and per-media
//! failures are logged and counted in the [`BuildReport`].

mod feature;
pub mod progress;
pub mod status;
mod tile;

pub use progress::TileTimer;
pub use status::{status_channel, BuildState, BuildStatus, StatusReporter};

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{CompositorSettings, FeatureBuildConfig, TileBuildConfig};
use crate::error::BuildError;

/// Counts collected while a build runs.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub table_name: String,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,

    pub features_copied: u64,
    pub features_skipped: u64,
    /// Features outside the bounding box filter.
    pub features_filtered: u64,
    pub styles_inserted: u64,
    pub icons_inserted: u64,
    pub defaults_copied: u64,
    pub style_links: u64,
    pub media_inserted: u64,
    pub media_reused: u64,
    pub media_links: u64,
    pub media_failed: u64,

    /// Zoom levels generated, ascending.
    pub levels: Vec<u8>,
    pub tiles_planned: u64,
    pub tiles_written: u64,
    pub tiles_blank: u64,
    pub tiles_failed: u64,
    pub tiles_with_failed_layers: u64,
}

impl BuildReport {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            features_copied: 0,
            features_skipped: 0,
            features_filtered: 0,
            styles_inserted: 0,
            icons_inserted: 0,
            defaults_copied: 0,
            style_links: 0,
            media_inserted: 0,
            media_reused: 0,
            media_links: 0,
            media_failed: 0,
            levels: Vec::new(),
            tiles_planned: 0,
            tiles_written: 0,
            tiles_blank: 0,
            tiles_failed: 0,
            tiles_with_failed_layers: 0,
        }
    }
}

/// How a build ended.
#[derive(Debug)]
pub enum BuildOutcome {
    Completed(BuildReport),
    Failed(BuildError),
    /// Stopped by the caller; the target holds everything written so far.
    Cancelled(BuildReport),
}

impl BuildOutcome {
    pub fn state(&self) -> BuildState {
        match self {
            BuildOutcome::Completed(_) => BuildState::Completed,
            BuildOutcome::Failed(_) => BuildState::Failed,
            BuildOutcome::Cancelled(_) => BuildState::Cancelled,
        }
    }

    pub fn report(&self) -> Option<&BuildReport> {
        match self {
            BuildOutcome::Completed(report) | BuildOutcome::Cancelled(report) => Some(report),
            BuildOutcome::Failed(_) => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, BuildOutcome::Completed(_))
    }
}

/// Runs feature and tile builds.
///
/// At most one build may target a given container path at a time;
/// serializing builds is up to the caller.
#[derive(Debug, Clone, Default)]
pub struct BuildOrchestrator {
    settings: CompositorSettings,
}

impl BuildOrchestrator {
    pub fn new(settings: CompositorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CompositorSettings {
        &self.settings
    }

    /// A status channel sized from the settings.
    pub fn status_channel(&self) -> (mpsc::Sender<BuildStatus>, mpsc::Receiver<BuildStatus>) {
        status_channel(self.settings.status.channel_capacity)
    }

    /// Merges the configured vector layers into a new feature table.
    pub async fn build_feature_layer(
        &self,
        config: FeatureBuildConfig,
        status: mpsc::Sender<BuildStatus>,
        cancel: CancellationToken,
    ) -> BuildOutcome {
        let settings = self.settings.clone();
        self.run("feature", status, cancel, move |reporter, cancel| {
            feature::run(&config, &settings, reporter, cancel)
        })
        .await
    }

    /// Composites the configured layers into a new tile pyramid.
    pub async fn build_tile_layer(
        &self,
        config: TileBuildConfig,
        status: mpsc::Sender<BuildStatus>,
        cancel: CancellationToken,
    ) -> BuildOutcome {
        let settings = self.settings.clone();
        self.run("tile", status, cancel, move |reporter, cancel| {
            tile::run(&config, &settings, reporter, cancel)
        })
        .await
    }

    async fn run<F>(
        &self,
        kind: &'static str,
        status: mpsc::Sender<BuildStatus>,
        cancel: CancellationToken,
        job: F,
    ) -> BuildOutcome
    where
        F: FnOnce(&StatusReporter, &CancellationToken) -> Result<BuildOutcome, BuildError>
            + Send
            + 'static,
    {
        let reporter = StatusReporter::new(status, self.settings.status.interval);
        reporter.phase(BuildState::Starting, format!("Starting {} build", kind));
        info!(kind, "Build started");

        let worker = reporter.clone();
        let worker_cancel = cancel.clone();
        let joined = tokio::task::spawn_blocking(move || job(&worker, &worker_cancel)).await;

        let outcome = match joined {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => BuildOutcome::Failed(e),
            Err(e) => BuildOutcome::Failed(BuildError::Task(e.to_string())),
        };

        match &outcome {
            BuildOutcome::Completed(report) => {
                info!(kind, table = %report.table_name, elapsed = ?report.elapsed, "Build completed");
                reporter
                    .finish(BuildState::Completed, format!("Built {}", report.table_name), None)
                    .await;
            }
            BuildOutcome::Cancelled(report) => {
                info!(kind, table = %report.table_name, "Build cancelled");
                reporter
                    .finish(BuildState::Cancelled, "Build cancelled", None)
                    .await;
            }
            BuildOutcome::Failed(e) => {
                warn!(kind, error = %e, "Build failed");
                reporter
                    .finish(BuildState::Failed, "Build failed", Some(e.to_string()))
                    .await;
            }
        }
        outcome
    }
}
