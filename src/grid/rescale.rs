//! Resampling grids between zoom levels.
//!
//! A tile at zoom `z` covers exactly the four tiles `(2x..2x+1, 2y..2y+1)` at
//! `z + 1`, so moving between zooms is pure integer arithmetic on indices.

use super::{CellValue, Grid};
use crate::core::geo::TileRange;
use fxhash::FxHashMap;

impl<T: CellValue> Grid<T> {
    /// Resamples onto `range` at `zoom`.
    ///
    /// Refining copies each source tile into all of its children. Coarsening
    /// aggregates each block of finer tiles with [`CellValue::coarsen`].
    /// Equal zooms copy the overlapping window.
    pub fn rescale_to_range(&self, zoom: u8, range: TileRange) -> Grid<T> {
        let mut out: Grid<T> = self.with_window_of(T::NO_DATA);
        out.zoom = zoom;
        out.x = range.min_x;
        out.y = range.min_y;
        out.width = range.width();
        out.height = range.height();
        out.values = vec![T::NO_DATA; out.width * out.height];

        if zoom == self.zoom {
            out.fill_with(|x, y| self.get(x, y));
        } else if zoom > self.zoom {
            let factor = 1i64 << (zoom - self.zoom);
            out.fill_with(|x, y| self.get(x.div_euclid(factor), y.div_euclid(factor)));
        } else {
            let factor = 1i64 << (self.zoom - zoom);
            let total = (factor * factor) as usize;
            let source = self.range();
            let mut samples = Vec::new();

            out.fill_with(|x, y| {
                samples.clear();
                let block = TileRange::new(
                    x * factor,
                    y * factor,
                    x * factor + factor - 1,
                    y * factor + factor - 1,
                );
                if let Some(window) = block.intersection(&source) {
                    for sy in window.min_y..=window.max_y {
                        for sx in window.min_x..=window.max_x {
                            samples.push(self.get(sx, sy));
                        }
                    }
                }
                T::coarsen(&samples, total)
            });
        }

        out
    }
}

/// True when at least half of the `total` tiles are true; missing tiles count as false
pub fn majority(samples: &[bool], total: usize) -> bool {
    let trues = samples.iter().filter(|&&v| v).count();
    trues > 0 && trues * 2 >= total
}

/// Mean of the non-NaN samples, NaN when there are none
pub fn mean_ignoring_nan(samples: &[f64]) -> f64 {
    let (sum, count) = samples
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

/// Most frequent non-zero code; ties go to the smallest code
pub fn mode_ignoring_zero(samples: &[u16]) -> u16 {
    let mut counts: FxHashMap<u16, usize> = FxHashMap::default();
    for &code in samples.iter().filter(|&&c| c != 0) {
        *counts.entry(code).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
        .map(|(code, _)| code)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{BooleanTileGrid, CategoricalTileGrid, NumericTileGrid};

    #[test]
    fn test_same_zoom_same_range_is_identity() {
        let grid =
            NumericTileGrid::from_values(8, 4, 6, 2, 2, vec![1.0, f64::NAN, 3.0, 4.0]).unwrap();
        assert_eq!(grid.rescale_to_range(8, grid.range()), grid);
    }

    #[test]
    fn test_refine_copies_parent_value() {
        let grid = NumericTileGrid::from_values(1, 0, 0, 2, 1, vec![5.0, 7.0]).unwrap();
        let fine = grid.rescale_to_range(3, TileRange::new(0, 0, 7, 3));
        for (x, y, v) in fine.iter() {
            let expected = if x < 4 && y < 4 { 5.0 } else { 7.0 };
            assert_eq!(v, expected, "tile ({x}, {y})");
        }
    }

    #[test]
    fn test_coarsen_numeric_mean_ignores_nan() {
        let grid =
            NumericTileGrid::from_values(2, 0, 0, 2, 2, vec![1.0, f64::NAN, 3.0, 5.0]).unwrap();
        let coarse = grid.rescale_to_range(1, TileRange::new(0, 0, 0, 0));
        assert_eq!(coarse.get(0, 0), 3.0);

        let empty = NumericTileGrid::new(2, 0, 0, 2, 2);
        assert!(empty.rescale_to_range(1, TileRange::new(0, 0, 0, 0)).get(0, 0).is_nan());
    }

    #[test]
    fn test_coarsen_boolean_majority() {
        let half = BooleanTileGrid::from_values(2, 0, 0, 2, 2, vec![true, true, false, false])
            .unwrap();
        assert!(half.rescale_to_range(1, TileRange::new(0, 0, 0, 0)).get(0, 0));

        let quarter = BooleanTileGrid::from_values(2, 0, 0, 2, 2, vec![true, false, false, false])
            .unwrap();
        assert!(!quarter.rescale_to_range(1, TileRange::new(0, 0, 0, 0)).get(0, 0));
    }

    #[test]
    fn test_coarsen_boolean_counts_missing_tiles_as_false() {
        // Only two of the four children are inside the window.
        let grid = BooleanTileGrid::from_values(2, 0, 0, 1, 2, vec![true, false]).unwrap();
        assert!(!grid.rescale_to_range(1, TileRange::new(0, 0, 0, 0)).get(0, 0));
    }

    #[test]
    fn test_coarsen_categorical_mode() {
        let grid = CategoricalTileGrid::from_values(2, 0, 0, 2, 2, vec![0, 0, 4, 4]).unwrap();
        assert_eq!(grid.rescale_to_range(1, TileRange::new(0, 0, 0, 0)).get(0, 0), 4);
        assert_eq!(mode_ignoring_zero(&[3, 2, 3, 2]), 2);
        assert_eq!(mode_ignoring_zero(&[0, 0]), 0);
    }

    #[test]
    fn test_metadata_survives_rescale() {
        let mut grid = NumericTileGrid::filled(4, 0, 0, 1, 1, 2.0).with_name("density");
        grid.set_property("unit", "people/km²");
        let fine = grid.rescale_to_range(5, TileRange::new(0, 0, 1, 1));
        assert_eq!(fine.name.as_deref(), Some("density"));
        assert_eq!(fine.properties.get("unit").map(String::as_str), Some("people/km²"));
    }
}
