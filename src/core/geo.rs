//! Tile pyramid arithmetic for the EPSG:3857 grid.
//!
//! Every operator that lines up rasters from different sources goes through
//! [`tile_range_for_extent`], so tile indices at the same zoom are directly
//! comparable without any further transform.

use crate::core::bounds::Extent;
use crate::core::constants::{BASE_SPAN, EARTH_RADIUS, MAX_ZOOM, ORIGIN};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Fractional tile positions this close to an integer are snapped onto it.
const SNAP_EPSILON: f64 = 1e-9;

/// Represents a point in projected coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl Default for Point {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Represents a single tile of the pyramid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    pub z: u8,
    pub x: i64,
    pub y: i64,
}

impl TileCoord {
    pub fn new(z: u8, x: i64, y: i64) -> Self {
        Self { z, x, y }
    }

    /// The tile containing `point` at `zoom`
    pub fn from_point(point: &Point, zoom: u8) -> Self {
        let span = tile_span(zoom);
        let fx = snap((point.x - ORIGIN.0) / span);
        let fy = snap((ORIGIN.1 - point.y) / span);
        Self::new(zoom, fx.floor() as i64, fy.floor() as i64)
    }

    pub fn center(&self) -> Point {
        tile_center(self.z, self.x, self.y)
    }

    pub fn extent(&self) -> Extent {
        tile_extent(self.z, self.x, self.y)
    }
}

/// An inclusive rectangle of tile coordinates at one zoom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRange {
    pub min_x: i64,
    pub min_y: i64,
    pub max_x: i64,
    pub max_y: i64,
}

impl TileRange {
    pub fn new(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Range spanning `width * height` tiles from an origin tile
    pub fn from_origin(x: i64, y: i64, width: usize, height: usize) -> Self {
        Self::new(x, y, x + width as i64 - 1, y + height as i64 - 1)
    }

    pub fn width(&self) -> usize {
        (self.max_x - self.min_x + 1).max(0) as usize
    }

    pub fn height(&self) -> usize {
        (self.max_y - self.min_y + 1).max(0) as usize
    }

    pub fn tile_count(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn intersection(&self, other: &TileRange) -> Option<TileRange> {
        let range = TileRange::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        );
        if range.min_x > range.max_x || range.min_y > range.max_y {
            None
        } else {
            Some(range)
        }
    }

    pub fn union(&self, other: &TileRange) -> TileRange {
        TileRange::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    /// Geographic extent covered by every tile of the range
    pub fn extent(&self, zoom: u8) -> Extent {
        let nw = tile_extent(zoom, self.min_x, self.min_y);
        let se = tile_extent(zoom, self.max_x, self.max_y);
        Extent::new(nw.min_x, se.min_y, se.max_x, nw.max_y)
    }
}

fn snap(value: f64) -> f64 {
    let rounded = value.round();
    if (value - rounded).abs() < SNAP_EPSILON {
        rounded
    } else {
        value
    }
}

/// Width of one tile at `zoom`, in projected metres
pub fn tile_span(zoom: u8) -> f64 {
    BASE_SPAN / 2f64.powi(zoom as i32)
}

/// Smallest inclusive tile range whose tiles fully cover `extent` at `zoom`.
///
/// An extent edge lying exactly on a tile boundary does not pull the
/// neighbouring tile into the range.
pub fn tile_range_for_extent(extent: &Extent, zoom: u8) -> TileRange {
    let span = tile_span(zoom);

    let min_x = snap((extent.min_x - ORIGIN.0) / span).floor() as i64;
    let max_x = (snap((extent.max_x - ORIGIN.0) / span).ceil() as i64 - 1).max(min_x);
    let min_y = snap((ORIGIN.1 - extent.max_y) / span).floor() as i64;
    let max_y = (snap((ORIGIN.1 - extent.min_y) / span).ceil() as i64 - 1).max(min_y);

    TileRange::new(min_x, min_y, max_x, max_y)
}

/// Geographic extent of a single tile
pub fn tile_extent(zoom: u8, x: i64, y: i64) -> Extent {
    let span = tile_span(zoom);
    Extent::new(
        ORIGIN.0 + x as f64 * span,
        ORIGIN.1 - (y + 1) as f64 * span,
        ORIGIN.0 + (x + 1) as f64 * span,
        ORIGIN.1 - y as f64 * span,
    )
}

/// Geographic centroid of a tile
pub fn tile_center(zoom: u8, x: i64, y: i64) -> Point {
    let span = tile_span(zoom);
    Point::new(
        ORIGIN.0 + (x as f64 + 0.5) * span,
        ORIGIN.1 - (y as f64 + 0.5) * span,
    )
}

/// Latitude in degrees of a projected northing
pub fn latitude_of(y: f64) -> f64 {
    (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees()
}

/// Mercator scale factor (projected length / ground length) at a northing
pub fn scale_factor_at(y: f64) -> f64 {
    1.0 / latitude_of(y).to_radians().cos()
}

/// Finest zoom whose tile range over `extent` stays within `tile_budget` tiles
pub fn zoom_from_extent(extent: &Extent, tile_budget: u64) -> u8 {
    let mut zoom = 0;
    for z in 0..=MAX_ZOOM {
        if tile_range_for_extent(extent, z).tile_count() > tile_budget {
            break;
        }
        zoom = z;
    }
    zoom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_span_halves_per_zoom() {
        assert_eq!(tile_span(0), BASE_SPAN);
        assert!((tile_span(1) * 2.0 - BASE_SPAN).abs() < 1e-6);
        assert!((tile_span(20) - BASE_SPAN / 1_048_576.0).abs() < 1e-9);
    }

    #[test]
    fn test_range_covers_extent() {
        let extents = [
            Extent::new(-20_839.0, 6_579_722.0, 12_889.5, 6_640_615.0),
            Extent::new(0.5, 0.5, 0.75, 0.75),
            Extent::new(-1_000_000.3, -42.0, 1_234_567.8, 987_654.3),
        ];

        for extent in extents {
            for zoom in [0u8, 3, 10, 17, 20] {
                let range = tile_range_for_extent(&extent, zoom);
                let covered = range.extent(zoom);
                assert!(covered.contains_extent(&extent), "zoom {zoom}: {covered:?}");

                for corner in [
                    Point::new(extent.min_x, extent.min_y),
                    Point::new(extent.max_x, extent.max_y),
                    extent.center(),
                ] {
                    let tile = TileCoord::from_point(&corner, zoom);
                    assert!(range.contains(tile.x, tile.y), "zoom {zoom}: {tile:?}");
                }
            }
        }
    }

    #[test]
    fn test_aligned_extent_keeps_exact_window() {
        let range = TileRange::new(10, 20, 13, 25);
        let extent = range.extent(12);
        assert_eq!(tile_range_for_extent(&extent, 12), range);
    }

    #[test]
    fn test_tile_center_inside_tile() {
        let center = tile_center(5, 7, 9);
        assert_eq!(TileCoord::from_point(&center, 5), TileCoord::new(5, 7, 9));
        assert!(tile_extent(5, 7, 9).contains(&center));
    }

    #[test]
    fn test_zoom_zero_is_single_tile() {
        let world = Extent::new(-HALF, -HALF, HALF, HALF);
        assert_eq!(tile_range_for_extent(&world, 0), TileRange::new(0, 0, 0, 0));
    }

    const HALF: f64 = crate::core::constants::HALF_WORLD;

    #[test]
    fn test_scale_factor_at_equator_is_one() {
        assert!((scale_factor_at(0.0) - 1.0).abs() < 1e-12);
        // 60 degrees north
        let y = EARTH_RADIUS * (PI / 4.0 + 60f64.to_radians() / 2.0).tan().ln();
        assert!((scale_factor_at(y) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_zoom_from_extent_respects_budget() {
        let extent = Extent::new(-20_839.0, 6_579_722.0, 12_889.5, 6_640_615.0);
        let zoom = zoom_from_extent(&extent, 10_000);
        assert!(tile_range_for_extent(&extent, zoom).tile_count() <= 10_000);
        assert!(tile_range_for_extent(&extent, zoom + 1).tile_count() > 10_000);
    }
}
