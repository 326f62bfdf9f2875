//! Tile pyramid planning.
//!
//! Decides which zoom levels a tile build materializes and how many tiles
//! that is. Without scaling every level in the zoom range is generated.
//! With scaling the planner walks down from the maximum zoom, stops one
//! level after the extent first fits a single tile, and keeps every other
//! collected level; the GeoPackage tile scaling extension fills the gaps.
//!
//! ```text
//! max ── max-2 ── max-4 ── ... ── lowest collected
//!  │       │        │                 │
//!  └ zoom_in = max - min_zoom,  zoom_out = 1
//! ```

use thiserror::Error;
use tracing::debug;

use crate::coord::{self, BoundingBox, CoordError, TileCoord, TileRange, MAX_ZOOM};

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Invalid zoom range {min}..={max}")]
    InvalidZoomRange { min: u8, max: u8 },

    #[error("Bounding box does not overlap any layer extent")]
    NoOverlap,

    #[error("Invalid bounding box")]
    InvalidBoundingBox,

    #[error(transparent)]
    Coord(#[from] CoordError),
}

/// Tile scaling extension parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingParams {
    pub zoom_in: u8,
    pub zoom_out: u8,
}

/// The concrete tile work of a tile build.
#[derive(Debug, Clone, PartialEq)]
pub struct TileMatrixPlan {
    /// Zoom levels to generate, ascending.
    pub levels: Vec<u8>,
    /// Tile range per entry of `levels`.
    pub ranges: Vec<TileRange>,
    /// Estimated number of tiles to render.
    pub tile_count: u64,
    /// Requested filter intersected with the union of layer extents.
    pub bbox: BoundingBox,
    pub min_zoom: u8,
    pub max_zoom: u8,
    pub scaling: Option<ScalingParams>,
}

impl TileMatrixPlan {
    /// Every tile of the plan: zoom ascending, then rows north to south,
    /// then columns west to east.
    pub fn tiles(&self) -> impl Iterator<Item = TileCoord> + '_ {
        self.ranges.iter().flat_map(|range| range.tiles())
    }
}

/// Computes [`TileMatrixPlan`]s.
pub struct TilePyramidPlanner;

impl TilePyramidPlanner {
    /// Plans a tile build.
    ///
    /// `filter` defaults to the union of `extents`, and to the whole world
    /// when neither is known.
    pub fn plan(
        filter: Option<&BoundingBox>,
        extents: &[BoundingBox],
        min_zoom: u8,
        max_zoom: u8,
        scaling_requested: bool,
    ) -> Result<TileMatrixPlan, PlanError> {
        if min_zoom > max_zoom || max_zoom > MAX_ZOOM {
            return Err(PlanError::InvalidZoomRange {
                min: min_zoom,
                max: max_zoom,
            });
        }

        let bbox = Self::content_bounds(filter, extents)?;
        let ranges = if scaling_requested {
            Self::sparse_levels(&bbox, min_zoom, max_zoom)?
        } else {
            (min_zoom..=max_zoom)
                .map(|zoom| coord::tile_range(&bbox, zoom))
                .collect::<Result<Vec<_>, _>>()?
        };

        let scaling = if scaling_requested {
            let highest = ranges.last().map(|r| r.zoom).unwrap_or(max_zoom);
            Some(ScalingParams {
                zoom_in: highest - min_zoom,
                zoom_out: 1,
            })
        } else {
            None
        };

        let plan = TileMatrixPlan {
            levels: ranges.iter().map(|r| r.zoom).collect(),
            tile_count: ranges.iter().map(TileRange::tile_count).sum(),
            ranges,
            bbox,
            min_zoom,
            max_zoom,
            scaling,
        };
        debug!(
            levels = ?plan.levels,
            tiles = plan.tile_count,
            scaling = scaling_requested,
            "Planned tile pyramid"
        );
        Ok(plan)
    }

    fn content_bounds(
        filter: Option<&BoundingBox>,
        extents: &[BoundingBox],
    ) -> Result<BoundingBox, PlanError> {
        if filter.is_some_and(|f| !f.is_valid()) {
            return Err(PlanError::InvalidBoundingBox);
        }
        let union = extents
            .iter()
            .filter(|e| e.is_valid())
            .copied()
            .reduce(|acc, e| acc.union(&e));

        let bbox = match (filter, union) {
            (Some(filter), Some(union)) => {
                filter.intersection(&union).ok_or(PlanError::NoOverlap)?
            }
            (Some(filter), None) => *filter,
            (None, Some(union)) => union,
            (None, None) => BoundingBox::world(),
        };
        Ok(bbox.clamp_to_mercator())
    }

    /// Levels kept in scaling mode, ascending.
    fn sparse_levels(
        bbox: &BoundingBox,
        min_zoom: u8,
        max_zoom: u8,
    ) -> Result<Vec<TileRange>, PlanError> {
        let mut collected = Vec::new();
        let mut single_tile_seen = false;
        for zoom in (min_zoom..=max_zoom).rev() {
            let range = coord::tile_range(bbox, zoom)?;
            collected.push(range);
            if range.tile_count() == 1 {
                if single_tile_seen {
                    break;
                }
                single_tile_seen = true;
            }
        }

        let last = collected.len() - 1;
        let mut kept: Vec<TileRange> = collected
            .iter()
            .enumerate()
            .filter(|(i, _)| i % 2 == 0 || *i == last)
            .map(|(_, r)| *r)
            .collect();
        kept.reverse();
        Ok(kept)
    }
}
