//! Tile compositing.
//!
//! [`TileCompositor`] renders one tile of a plan: it asks every layer for
//! its image of the tile, draws them bottom to top at their opacity onto a
//! premultiplied canvas clipped to the plan's content bounds, and encodes
//! the result.
//!
//! A layer that fails to render is logged and contributes nothing. A tile
//! that ends up fully transparent is reported as blank and not written.

pub mod blend;
pub mod encode;

pub use encode::{encode_tile, EncodeError, EncodeSettings, TileEncoding};

use image::imageops::{self, FilterType};
use image::RgbaImage;
use tracing::{debug, warn};

use crate::coord::{self, BoundingBox, TileCoord};
use crate::layer::LayerSource;

/// Pixel rectangle inside a tile, end-exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelRect {
    pub fn full(size: u32) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: size,
            y1: size,
        }
    }
}

/// An encoded tile ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedTile {
    pub data: Vec<u8>,
    pub encoding: TileEncoding,
}

/// Result of compositing one tile.
#[derive(Debug)]
pub struct CompositedTile {
    pub tile: TileCoord,
    /// `None` when the tile is blank.
    pub encoded: Option<EncodedTile>,
    /// Layers that failed to render this tile.
    pub failed_layers: u32,
}

/// Composites layers into encoded tiles.
#[derive(Debug, Clone)]
pub struct TileCompositor {
    bounds: BoundingBox,
    tile_size: u32,
    settings: EncodeSettings,
}

impl TileCompositor {
    /// `bounds` is the content extent drawing is clipped to.
    pub fn new(bounds: BoundingBox, tile_size: u32, settings: EncodeSettings) -> Self {
        Self {
            bounds,
            tile_size,
            settings,
        }
    }

    /// Orders layers by ascending rendering order; ties keep their order.
    pub fn sort_layers(layers: &mut [&LayerSource]) {
        layers.sort_by_key(|layer| layer.rendering_order);
    }

    /// Pixel area of `tile` covered by the content bounds, padded by one
    /// pixel. `None` if the tile lies entirely outside them.
    pub fn clip_rect(&self, tile: &TileCoord) -> Option<PixelRect> {
        let tile_bounds = coord::tile_bounds(tile);
        let inside = tile_bounds.intersection(&self.bounds)?;

        let size = self.tile_size as f64;
        let (left, top) = coord::pixel_in_tile(inside.max_lat, inside.min_lon, tile, self.tile_size);
        let (right, bottom) =
            coord::pixel_in_tile(inside.min_lat, inside.max_lon, tile, self.tile_size);

        let clamp = |v: f64| v.clamp(0.0, size) as u32;
        Some(PixelRect {
            x0: clamp(left.floor() - 1.0),
            y0: clamp(top.floor() - 1.0),
            x1: clamp(right.ceil() + 1.0),
            y1: clamp(bottom.ceil() + 1.0),
        })
    }

    /// Draws `layers` (already sorted) into `tile` and encodes the result.
    ///
    /// Encoding failures are returned; layer failures are not.
    pub fn composite(
        &self,
        tile: TileCoord,
        layers: &[&LayerSource],
    ) -> Result<CompositedTile, EncodeError> {
        let clip = self
            .clip_rect(&tile)
            .unwrap_or_else(|| PixelRect::full(self.tile_size));
        let mut canvas = vec![[0u8; 4]; (self.tile_size * self.tile_size) as usize];
        let mut failed_layers = 0;

        for layer in layers {
            let Some(renderer) = layer.renderer() else {
                continue;
            };
            let image = match renderer.render_tile(tile) {
                Ok(Some(image)) => image,
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        layer = %layer.id,
                        zoom = tile.zoom,
                        col = tile.col,
                        row = tile.row,
                        error = %e,
                        "Layer failed to render tile"
                    );
                    failed_layers += 1;
                    continue;
                }
            };
            self.draw(&mut canvas, &image, layer.opacity, &clip);
        }

        let image = self.finish(canvas);
        if encode::is_blank(&image) {
            debug!(zoom = tile.zoom, col = tile.col, row = tile.row, "Blank tile");
            return Ok(CompositedTile {
                tile,
                encoded: None,
                failed_layers,
            });
        }

        let (data, encoding) = encode_tile(&image, &self.settings)?;
        Ok(CompositedTile {
            tile,
            encoded: Some(EncodedTile { data, encoding }),
            failed_layers,
        })
    }

    fn draw(&self, canvas: &mut [[u8; 4]], image: &RgbaImage, opacity: f32, clip: &PixelRect) {
        let resized;
        let image = if image.dimensions() == (self.tile_size, self.tile_size) {
            image
        } else {
            resized = imageops::resize(image, self.tile_size, self.tile_size, FilterType::Triangle);
            &resized
        };

        for y in clip.y0..clip.y1 {
            for x in clip.x0..clip.x1 {
                let index = (y * self.tile_size + x) as usize;
                let src = blend::premultiply(image.get_pixel(x, y).0);
                canvas[index] = blend::over(canvas[index], src, opacity);
            }
        }
    }

    fn finish(&self, canvas: Vec<[u8; 4]>) -> RgbaImage {
        let raw: Vec<u8> = canvas.into_iter().flat_map(blend::unpremultiply).collect();
        RgbaImage::from_raw(self.tile_size, self.tile_size, raw)
            .unwrap_or_else(|| RgbaImage::new(self.tile_size, self.tile_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::{LayerError, TileRenderer};
    use image::Rgba;

    struct Solid([u8; 4]);

    impl TileRenderer for Solid {
        fn render_tile(&self, _tile: TileCoord) -> Result<Option<RgbaImage>, LayerError> {
            Ok(Some(RgbaImage::from_pixel(256, 256, Rgba(self.0))))
        }
    }

    struct Nothing;

    impl TileRenderer for Nothing {
        fn render_tile(&self, _tile: TileCoord) -> Result<Option<RgbaImage>, LayerError> {
            Ok(None)
        }
    }

    struct Broken;

    impl TileRenderer for Broken {
        fn render_tile(&self, tile: TileCoord) -> Result<Option<RgbaImage>, LayerError> {
            Err(LayerError::Render {
                tile,
                reason: "boom".to_string(),
            })
        }
    }

    fn raster(id: &str, renderer: Box<dyn TileRenderer>, order: i32) -> LayerSource {
        LayerSource::raster(id, "/tmp/src.gpkg", "tiles", renderer).with_rendering_order(order)
    }

    fn compositor() -> TileCompositor {
        TileCompositor::new(BoundingBox::world(), 256, EncodeSettings::default())
    }

    fn decode(tile: &CompositedTile) -> RgbaImage {
        let encoded = tile.encoded.as_ref().unwrap();
        image::load_from_memory(&encoded.data).unwrap().to_rgba8()
    }

    #[test]
    fn test_later_layer_draws_over_earlier() {
        let bottom = raster("bottom", Box::new(Solid([255, 0, 0, 255])), 0);
        let top = raster("top", Box::new(Solid([0, 0, 255, 255])), 1);
        let mut layers = vec![&top, &bottom];
        TileCompositor::sort_layers(&mut layers);
        assert_eq!(layers[0].id, "bottom");

        let tile = compositor().composite(TileCoord::new(0, 0, 0), &layers).unwrap();
        let encoded = tile.encoded.as_ref().unwrap();
        assert_eq!(encoded.encoding, TileEncoding::Jpeg);
        let px = decode(&tile).get_pixel(128, 128).0;
        assert!(px[2] > 200 && px[0] < 50);
    }

    #[test]
    fn test_opacity_produces_png() {
        let layer = raster("a", Box::new(Solid([0, 255, 0, 255])), 0).with_opacity(0.5);
        let tile = compositor()
            .composite(TileCoord::new(0, 0, 0), &[&layer])
            .unwrap();
        assert_eq!(tile.encoded.as_ref().unwrap().encoding, TileEncoding::Png);
        let alpha = decode(&tile).get_pixel(10, 10).0[3];
        assert!((120..=135).contains(&alpha));
    }

    #[test]
    fn test_empty_layers_give_blank_tile() {
        let nothing = raster("n", Box::new(Nothing), 0);
        let clear = raster("c", Box::new(Solid([9, 9, 9, 0])), 1);
        let tile = compositor()
            .composite(TileCoord::new(3, 1, 1), &[&nothing, &clear])
            .unwrap();
        assert!(tile.encoded.is_none());
        assert_eq!(tile.failed_layers, 0);
    }

    #[test]
    fn test_failed_layer_contributes_nothing() {
        let broken = raster("b", Box::new(Broken), 0);
        let solid = raster("s", Box::new(Solid([1, 2, 3, 255])), 1);
        let tile = compositor()
            .composite(TileCoord::new(1, 0, 0), &[&broken, &solid])
            .unwrap();
        assert_eq!(tile.failed_layers, 1);
        assert!(tile.encoded.is_some());

        let only_broken = compositor()
            .composite(TileCoord::new(1, 0, 0), &[&broken])
            .unwrap();
        assert!(only_broken.encoded.is_none());
    }

    #[test]
    fn test_drawing_clipped_to_content_bounds() {
        // Western half of the world only.
        let bounds = BoundingBox::new(-180.0, -80.0, 0.0, 80.0);
        let compositor = TileCompositor::new(bounds, 256, EncodeSettings::default());
        let clip = compositor.clip_rect(&TileCoord::new(0, 0, 0)).unwrap();
        assert_eq!(clip.x0, 0);
        assert_eq!(clip.x1, 129);

        let layer = raster("s", Box::new(Solid([200, 10, 10, 255])), 0);
        let tile = compositor
            .composite(TileCoord::new(0, 0, 0), &[&layer])
            .unwrap();
        let image = decode(&tile);
        assert_eq!(image.get_pixel(250, 128).0[3], 0);
        assert!(image.get_pixel(5, 128).0[3] > 0);
    }

    #[test]
    fn test_tile_outside_bounds_has_no_clip() {
        let bounds = BoundingBox::new(10.0, 10.0, 12.0, 12.0);
        let compositor = TileCompositor::new(bounds, 256, EncodeSettings::default());
        assert!(compositor.clip_rect(&TileCoord::new(2, 0, 3)).is_none());
    }

    #[test]
    fn test_small_layer_images_are_scaled() {
        struct Tiny;
        impl TileRenderer for Tiny {
            fn render_tile(&self, _tile: TileCoord) -> Result<Option<RgbaImage>, LayerError> {
                Ok(Some(RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255]))))
            }
        }
        let layer = raster("t", Box::new(Tiny), 0);
        let tile = compositor()
            .composite(TileCoord::new(0, 0, 0), &[&layer])
            .unwrap();
        assert_eq!(decode(&tile).dimensions(), (256, 256));
    }
}
