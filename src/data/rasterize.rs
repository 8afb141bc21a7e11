//! Burning feature geometries into tile grids.
//!
//! A tile takes a feature's value when the tile centre intersects the
//! feature geometry. Only the tiles of the feature's bounding range that
//! also fall inside the output window are tested.

use crate::core::geo::{tile_center, tile_range_for_extent, TileRange};
use crate::data::geojson::GeoJsonFeature;
use crate::grid::{BooleanTileGrid, CellValue, Grid};
use geo::{BoundingRect, Intersects};
use geo_types::Point;

/// Rasterizes `features` into a new grid over `range` at `zoom`.
///
/// `value_of` picks the value a feature burns in; features for which it
/// returns `None` are skipped. Later features overwrite earlier ones. When a
/// mask is given, tiles where it is false stay at no-data.
pub fn rasterize<T, F>(
    features: &[GeoJsonFeature],
    zoom: u8,
    range: TileRange,
    mask: Option<&BooleanTileGrid>,
    mut value_of: F,
) -> Grid<T>
where
    T: CellValue,
    F: FnMut(&GeoJsonFeature) -> Option<T>,
{
    let mut grid = Grid::<T>::from_range(zoom, range);
    let mut burned = 0usize;

    for feature in features {
        let geometry = match &feature.geometry {
            Some(g) => g.to_geo(),
            None => continue,
        };
        let value = match value_of(feature) {
            Some(v) => v,
            None => continue,
        };
        let bbox = match geometry.bounding_rect() {
            Some(rect) => rect,
            None => continue,
        };
        let window = match tile_range_for_extent(&bbox.into(), zoom).intersection(&range) {
            Some(window) => window,
            None => continue,
        };

        for y in window.min_y..=window.max_y {
            for x in window.min_x..=window.max_x {
                if let Some(mask) = mask {
                    if !mask.get(x, y) {
                        continue;
                    }
                }
                let center = tile_center(zoom, x, y);
                if geometry.intersects(&Point::new(center.x, center.y))
                    && grid.set(x, y, value).is_ok()
                {
                    burned += 1;
                }
            }
        }
    }

    log::debug!(
        "rasterized {} features into {}x{} tiles at zoom {} ({} tiles set)",
        features.len(),
        grid.width,
        grid.height,
        zoom,
        burned
    );

    grid
}

/// Presence raster: true wherever any feature covers a tile centre
pub fn rasterize_presence(
    features: &[GeoJsonFeature],
    zoom: u8,
    range: TileRange,
    mask: Option<&BooleanTileGrid>,
) -> BooleanTileGrid {
    rasterize(features, zoom, range, mask, |_| Some(true))
}
