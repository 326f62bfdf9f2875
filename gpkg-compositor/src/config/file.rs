//! Settings file handling for `<config dir>/gpkg-compositor/config.ini`.
//!
//! A missing file yields the defaults; every key present overrides the
//! corresponding default. Parsing lives in [`super::parser`].

use std::path::{Path, PathBuf};

use ini::Ini;
use thiserror::Error;

use super::settings::CompositorSettings;

/// Directory name under the platform config directory.
pub const CONFIG_DIR_NAME: &str = "gpkg-compositor";

/// Settings file name.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Settings file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read settings file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Invalid setting value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

/// Default settings file path, `None` if the platform has no config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

impl CompositorSettings {
    /// Loads settings from `path`, falling back to defaults when the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Loads settings from the default path, or defaults if there is none.
    pub fn load_default() -> Result<Self, ConfigFileError> {
        match default_config_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }
}
