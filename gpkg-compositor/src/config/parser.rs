//! INI parsing for [`CompositorSettings`].
//!
//! The single place where INI key names are mapped to struct fields.

use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use super::file::ConfigFileError;
use super::settings::CompositorSettings;
use super::is_valid_table_name;

/// Starts from the defaults and overlays every value found in `ini`.
pub(super) fn parse_ini(ini: &Ini) -> Result<CompositorSettings, ConfigFileError> {
    let mut settings = CompositorSettings::default();

    // [status] section
    if let Some(section) = ini.section(Some("status")) {
        if let Some(ms) = parse_number::<u64>(section, "status", "interval_ms")? {
            settings.status.interval = Duration::from_millis(ms);
        }
        if let Some(capacity) = parse_number::<usize>(section, "status", "channel_capacity")? {
            if capacity == 0 {
                return Err(invalid("status", "channel_capacity", "0", "must be at least 1"));
            }
            settings.status.channel_capacity = capacity;
        }
    }

    // [tiles] section
    if let Some(section) = ini.section(Some("tiles")) {
        if let Some(size) = parse_number::<u32>(section, "tiles", "tile_size")? {
            if !(16..=4096).contains(&size) {
                return Err(invalid(
                    "tiles",
                    "tile_size",
                    &size.to_string(),
                    "must be between 16 and 4096",
                ));
            }
            settings.tiles.tile_size = size;
        }
        if let Some(quality) = parse_number::<u8>(section, "tiles", "jpeg_quality")? {
            if !(1..=100).contains(&quality) {
                return Err(invalid(
                    "tiles",
                    "jpeg_quality",
                    &quality.to_string(),
                    "must be between 1 and 100",
                ));
            }
            settings.tiles.jpeg_quality = quality;
        }
        if let Some(bits) = parse_number::<u8>(section, "tiles", "png_bits")? {
            if !(1..=8).contains(&bits) {
                return Err(invalid(
                    "tiles",
                    "png_bits",
                    &bits.to_string(),
                    "must be between 1 and 8",
                ));
            }
            settings.tiles.png_bits = bits;
        }
    }

    // [features] section
    if let Some(section) = ini.section(Some("features")) {
        if let Some(batch) = parse_number::<usize>(section, "features", "batch_size")? {
            if batch == 0 {
                return Err(invalid("features", "batch_size", "0", "must be at least 1"));
            }
            settings.features.batch_size = batch;
        }
        if let Some(v) = section.get("media_table") {
            let v = v.trim();
            if !is_valid_table_name(v) {
                return Err(invalid(
                    "features",
                    "media_table",
                    v,
                    "must be a plain SQL identifier",
                ));
            }
            settings.features.media_table = v.to_string();
        }
    }

    Ok(settings)
}

fn parse_number<T: FromStr>(
    section: &Properties,
    section_name: &str,
    key: &str,
) -> Result<Option<T>, ConfigFileError> {
    let Some(raw) = section.get(key) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|_| invalid(section_name, key, raw, "must be a non-negative integer"))
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
