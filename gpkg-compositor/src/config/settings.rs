//! Compositor tunables.

use std::time::Duration;

use crate::composite::EncodeSettings;

/// Minimum interval between intermediate status updates.
pub const DEFAULT_STATUS_INTERVAL_MS: u64 = 100;

/// Capacity of the bounded status channel.
pub const DEFAULT_STATUS_CHANNEL_CAPACITY: usize = 64;

/// JPEG quality for opaque tiles (0.7).
pub const DEFAULT_JPEG_QUALITY: u8 = 70;

/// Significant bits per channel kept in PNG tiles.
pub const DEFAULT_PNG_BITS: u8 = 5;

/// Edge length of generated tiles in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Feature inserts per transaction.
pub const DEFAULT_FEATURE_BATCH_SIZE: usize = 500;

/// Name of the shared media table in the target.
pub const DEFAULT_MEDIA_TABLE: &str = "media";

/// Runtime tunables shared by both build paths.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompositorSettings {
    pub status: StatusSettings,
    pub tiles: TileSettings,
    pub features: FeatureSettings,
}

/// `[status]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSettings {
    pub interval: Duration,
    pub channel_capacity: usize,
}

/// `[tiles]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSettings {
    pub tile_size: u32,
    pub jpeg_quality: u8,
    pub png_bits: u8,
}

/// `[features]` section.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSettings {
    pub batch_size: usize,
    pub media_table: String,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_STATUS_INTERVAL_MS),
            channel_capacity: DEFAULT_STATUS_CHANNEL_CAPACITY,
        }
    }
}

impl Default for TileSettings {
    fn default() -> Self {
        Self {
            tile_size: DEFAULT_TILE_SIZE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            png_bits: DEFAULT_PNG_BITS,
        }
    }
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_FEATURE_BATCH_SIZE,
            media_table: DEFAULT_MEDIA_TABLE.to_string(),
        }
    }
}

impl TileSettings {
    pub fn encode_settings(&self) -> EncodeSettings {
        EncodeSettings {
            jpeg_quality: self.jpeg_quality,
            png_bits: self.png_bits,
        }
    }
}
