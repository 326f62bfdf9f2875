//! Build configuration and compositor settings.
//!
//! Two kinds of configuration live here:
//!
//! - [`FeatureBuildConfig`] / [`TileBuildConfig`] - what a single build
//!   produces, validated before any container is touched
//! - [`CompositorSettings`] - process-wide tunables loaded from an INI file
//!
//! # Settings file
//!
//! ```ini
//! [status]
//! interval_ms = 100
//! channel_capacity = 64
//!
//! [tiles]
//! tile_size = 256
//! jpeg_quality = 70
//! png_bits = 5
//!
//! [features]
//! batch_size = 500
//! media_table = media
//! ```

mod file;
mod parser;
mod settings;

pub use file::{default_config_path, ConfigFileError, CONFIG_DIR_NAME, CONFIG_FILE_NAME};
pub use settings::{
    CompositorSettings, FeatureSettings, StatusSettings, TileSettings,
    DEFAULT_FEATURE_BATCH_SIZE, DEFAULT_JPEG_QUALITY, DEFAULT_MEDIA_TABLE, DEFAULT_PNG_BITS,
    DEFAULT_STATUS_CHANNEL_CAPACITY, DEFAULT_STATUS_INTERVAL_MS, DEFAULT_TILE_SIZE,
};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

use crate::coord::{BoundingBox, MAX_ZOOM};
use crate::layer::LayerSource;

/// Build configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid table name '{0}'")]
    InvalidTableName(String),

    #[error("No contributing layers")]
    NoLayers,

    #[error("Layer '{layer}' cannot be used: {reason}")]
    UnsupportedLayer { layer: String, reason: String },

    #[error("Layer id '{0}' is used by more than one layer")]
    DuplicateLayerId(String),

    #[error("Layer '{layer}' has opacity {opacity}, expected 0.0 to 1.0")]
    InvalidOpacity { layer: String, opacity: f32 },

    #[error("Invalid zoom range {min}..={max}")]
    InvalidZoomRange { min: u8, max: u8 },

    #[error("Invalid bounding box")]
    InvalidBoundingBox,
}

/// True for plain SQL identifiers usable as table names.
pub fn is_valid_table_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());
    pattern.is_match(name)
}

/// Configuration of a merged feature layer build.
#[derive(Debug)]
pub struct FeatureBuildConfig {
    pub target_path: PathBuf,
    pub table_name: String,
    /// Contributing vector layers, in merge order.
    pub layers: Vec<LayerSource>,
    /// Only features intersecting this box are copied.
    pub bounding_box: Option<BoundingBox>,
}

impl FeatureBuildConfig {
    pub fn new(
        target_path: impl Into<PathBuf>,
        table_name: impl Into<String>,
        layers: Vec<LayerSource>,
    ) -> Self {
        Self {
            target_path: target_path.into(),
            table_name: table_name.into(),
            layers,
            bounding_box: None,
        }
    }

    pub fn with_bounding_box(mut self, bbox: BoundingBox) -> Self {
        self.bounding_box = Some(bbox);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_common(&self.table_name, &self.layers, self.bounding_box.as_ref())?;
        for layer in &self.layers {
            if layer.vector_source().is_none() {
                return Err(ConfigError::UnsupportedLayer {
                    layer: layer.id.clone(),
                    reason: "feature builds need vector layers".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Configuration of a tile pyramid build.
#[derive(Debug)]
pub struct TileBuildConfig {
    pub target_path: PathBuf,
    pub table_name: String,
    /// Contributing layers; each is drawn in its rendering order.
    pub layers: Vec<LayerSource>,
    pub bounding_box: Option<BoundingBox>,
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// Generate a sparse pyramid and register the tile scaling extension.
    pub scaling: bool,
}

impl TileBuildConfig {
    pub fn new(
        target_path: impl Into<PathBuf>,
        table_name: impl Into<String>,
        layers: Vec<LayerSource>,
        min_zoom: u8,
        max_zoom: u8,
    ) -> Self {
        Self {
            target_path: target_path.into(),
            table_name: table_name.into(),
            layers,
            bounding_box: None,
            min_zoom,
            max_zoom,
            scaling: false,
        }
    }

    pub fn with_bounding_box(mut self, bbox: BoundingBox) -> Self {
        self.bounding_box = Some(bbox);
        self
    }

    pub fn with_scaling(mut self, scaling: bool) -> Self {
        self.scaling = scaling;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_common(&self.table_name, &self.layers, self.bounding_box.as_ref())?;
        if self.min_zoom > self.max_zoom || self.max_zoom > MAX_ZOOM {
            return Err(ConfigError::InvalidZoomRange {
                min: self.min_zoom,
                max: self.max_zoom,
            });
        }
        for layer in &self.layers {
            if layer.renderer().is_none() {
                return Err(ConfigError::UnsupportedLayer {
                    layer: layer.id.clone(),
                    reason: "tile builds need a tile renderer".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn validate_common(
    table_name: &str,
    layers: &[LayerSource],
    bbox: Option<&BoundingBox>,
) -> Result<(), ConfigError> {
    if !is_valid_table_name(table_name) {
        return Err(ConfigError::InvalidTableName(table_name.to_string()));
    }
    if layers.is_empty() {
        return Err(ConfigError::NoLayers);
    }
    let mut ids = HashSet::new();
    for layer in layers {
        if !ids.insert(layer.id.as_str()) {
            return Err(ConfigError::DuplicateLayerId(layer.id.clone()));
        }
        if !(0.0..=1.0).contains(&layer.opacity) {
            return Err(ConfigError::InvalidOpacity {
                layer: layer.id.clone(),
                opacity: layer.opacity,
            });
        }
    }
    if bbox.is_some_and(|b| !b.is_valid()) {
        return Err(ConfigError::InvalidBoundingBox);
    }
    Ok(())
}
