//! Tile image encoding.
//!
//! Opaque tiles are stored as JPEG. Tiles with any transparency are stored
//! as PNG after reducing every channel to a fixed number of significant
//! bits, which keeps the deflate stream small for rendered map content.

use std::fmt;
use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};

/// Format a tile was encoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileEncoding {
    Png,
    Jpeg,
}

impl TileEncoding {
    pub fn content_type(&self) -> &'static str {
        match self {
            TileEncoding::Png => "image/png",
            TileEncoding::Jpeg => "image/jpeg",
        }
    }
}

/// Encoder tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeSettings {
    /// JPEG quality, 1 to 100.
    pub jpeg_quality: u8,
    /// Significant bits kept per channel in PNG tiles, 1 to 8.
    pub png_bits: u8,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            jpeg_quality: 70,
            png_bits: 5,
        }
    }
}

/// Errors that can occur while encoding a tile.
#[derive(Debug)]
pub enum EncodeError {
    /// The underlying image codec failed.
    Codec(image::ImageError),
    /// The image has a zero dimension.
    EmptyImage,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::Codec(e) => write!(f, "Codec error: {}", e),
            EncodeError::EmptyImage => write!(f, "Cannot encode an empty image"),
        }
    }
}

impl std::error::Error for EncodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EncodeError::Codec(e) => Some(e),
            EncodeError::EmptyImage => None,
        }
    }
}

impl From<image::ImageError> for EncodeError {
    fn from(err: image::ImageError) -> Self {
        EncodeError::Codec(err)
    }
}

/// True if no pixel has any coverage.
pub fn is_blank(image: &RgbaImage) -> bool {
    image.pixels().all(|p| p.0[3] == 0)
}

/// True if some pixel is not fully opaque.
pub fn has_transparency(image: &RgbaImage) -> bool {
    image.pixels().any(|p| p.0[3] < 255)
}

/// Keeps the top `bits` bits of every channel, replicating them into the
/// low bits so full white stays 255.
pub fn quantize(image: &mut RgbaImage, bits: u8) {
    let bits = bits.clamp(1, 8);
    if bits == 8 {
        return;
    }
    let shift = 8 - bits;
    for channel in image.iter_mut() {
        let high = *channel >> shift;
        let mut value = high << shift;
        let mut filled = bits;
        while filled < 8 {
            value |= (high << shift) >> filled;
            filled += bits;
        }
        *channel = value;
    }
}

/// Encodes a composited tile, choosing PNG or JPEG by transparency.
pub fn encode_tile(
    image: &RgbaImage,
    settings: &EncodeSettings,
) -> Result<(Vec<u8>, TileEncoding), EncodeError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(EncodeError::EmptyImage);
    }

    let mut out = Cursor::new(Vec::new());
    if has_transparency(image) {
        let mut quantized = image.clone();
        quantize(&mut quantized, settings.png_bits);
        let encoder =
            PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive);
        encoder.write_image(quantized.as_raw(), width, height, ExtendedColorType::Rgba8)?;
        Ok((out.into_inner(), TileEncoding::Png))
    } else {
        let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
        let encoder = JpegEncoder::new_with_quality(&mut out, settings.jpeg_quality.clamp(1, 100));
        encoder.write_image(rgb.as_raw(), width, height, ExtendedColorType::Rgb8)?;
        Ok((out.into_inner(), TileEncoding::Jpeg))
    }
}
