//! Nearest-true-tile distance transform.

use crate::core::geo::tile_span;
use crate::grid::{BooleanTileGrid, NumericTileGrid};
use crate::spatial::index::{SeedIndex, SeedTile};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum KernelError {
    #[error("No seed points: the input contains no true tiles")]
    NoSeedPoints,

    #[error("Kernel {kernel} expects a {expected} grid")]
    WrongInput { kernel: String, expected: String },

    #[error("Worker failure: {0}")]
    Worker(String),
}

/// Distance in projected metres from every tile of `grid` to its nearest
/// true tile, over the same window.
pub fn distance_transform(grid: &BooleanTileGrid) -> Result<NumericTileGrid, KernelError> {
    let seeds: Vec<SeedTile> = grid
        .iter()
        .filter(|&(_, _, v)| v)
        .map(|(x, y, _)| SeedTile::new(x, y))
        .collect();

    if seeds.is_empty() {
        return Err(KernelError::NoSeedPoints);
    }

    #[cfg(feature = "debug")]
    let seed_count = seeds.len();
    let index = SeedIndex::new(seeds);
    let span = tile_span(grid.zoom);

    let mut out: NumericTileGrid = grid.with_window_of(f64::NAN);
    out.fill_with(|x, y| {
        index
            .nearest_distance(x, y)
            .map(|tiles| tiles * span)
            .unwrap_or(f64::NAN)
    });
    out.set_property("unit", "m");

    #[cfg(feature = "debug")]
    log::debug!(
        "distance transform over {}x{} tiles at zoom {} from {} seeds",
        grid.width,
        grid.height,
        grid.zoom,
        seed_count
    );

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::geo::tile_center;

    #[test]
    fn test_single_seed_matches_geographic_distance() {
        let zoom = 14;
        let mut grid = BooleanTileGrid::new(zoom, 100, 200, 7, 5);
        grid.set(103, 202, true).unwrap();

        let distances = distance_transform(&grid).unwrap();
        let seed = tile_center(zoom, 103, 202);
        for (x, y, d) in distances.iter() {
            let expected = tile_center(zoom, x, y).distance_to(&seed);
            assert!((d - expected).abs() < 1e-6, "tile ({x}, {y}): {d} vs {expected}");
        }
        assert_eq!(distances.get(103, 202), 0.0);
        assert_eq!(distances.range(), grid.range());
    }

    #[test]
    fn test_nearest_of_several_seeds() {
        let mut grid = BooleanTileGrid::new(0, 0, 0, 5, 1);
        grid.set(0, 0, true).unwrap();
        grid.set(4, 0, true).unwrap();

        let distances = distance_transform(&grid).unwrap();
        let span = tile_span(0);
        let row: Vec<f64> = distances.values().iter().map(|d| d / span).collect();
        assert_eq!(row, vec![0.0, 1.0, 2.0, 1.0, 0.0]);
    }

    #[test]
    fn test_no_seed_points_is_an_error() {
        let grid = BooleanTileGrid::new(10, 0, 0, 4, 4);
        assert_eq!(distance_transform(&grid), Err(KernelError::NoSeedPoints));
    }
}
