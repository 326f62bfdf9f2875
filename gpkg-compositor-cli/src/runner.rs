//! Shared setup for CLI commands: settings, logging and Ctrl+C handling.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::info;

use gpkg_compositor::build::BuildOrchestrator;
use gpkg_compositor::config::{default_config_path, CompositorSettings};
use gpkg_compositor::logging::{default_log_dir, default_log_file, init_logging, LoggingGuard};

use crate::error::CliError;

/// Holds what every command needs for its lifetime.
pub struct CliRunner {
    settings: CompositorSettings,
    logging: LoggingGuard,
}

impl CliRunner {
    /// Loads settings and installs logging.
    ///
    /// An explicit `config` path must exist; the default path is optional.
    pub fn new(config: Option<&Path>, log_dir: Option<&Path>) -> Result<Self, CliError> {
        let settings = match config {
            Some(path) => {
                if !path.exists() {
                    return Err(CliError::Config(format!(
                        "Settings file not found: {}",
                        path.display()
                    )));
                }
                CompositorSettings::load(path)?
            }
            None => CompositorSettings::load_default()?,
        };

        let log_dir = log_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(default_log_dir);
        let logging = init_logging(&log_dir, default_log_file()).map_err(CliError::Logging)?;

        Ok(Self {
            settings,
            logging,
        })
    }

    pub fn settings(&self) -> &CompositorSettings {
        &self.settings
    }

    pub fn orchestrator(&self) -> BuildOrchestrator {
        BuildOrchestrator::new(self.settings.clone())
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            command,
            version = gpkg_compositor::VERSION,
            config = ?default_config_path(),
            log = %self.logging.path().display(),
            "GPKG Compositor starting"
        );
    }

    /// A token cancelled on the first Ctrl+C.
    pub fn cancel_on_ctrl_c(&self) -> Result<CancellationToken, CliError> {
        let cancel = CancellationToken::new();
        let handler_cancel = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!();
            eprintln!("Received interrupt, stopping build...");
            handler_cancel.cancel();
        })
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;
        Ok(cancel)
    }
}
