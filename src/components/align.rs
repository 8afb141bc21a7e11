//! Lining up rasters of different zooms and windows before element-wise work.
//!
//! Operators evaluate at the finest zoom among their raster inputs. Coarser
//! inputs are rescaled onto the output window; inputs already at that zoom
//! are used as they are, since reads outside a window return no-data.

use crate::core::geo::TileRange;
use crate::graph::value::Value;
use crate::grid::{NumericTileGrid, TileGrid};
use std::sync::Arc;

/// Zoom and window an element-wise operator writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alignment {
    pub zoom: u8,
    pub range: TileRange,
}

/// `range` at `from` expressed at the finer or equal zoom `to`
pub fn range_at_zoom(range: TileRange, from: u8, to: u8) -> TileRange {
    if to <= from {
        return range;
    }
    let factor = 1i64 << (to - from);
    TileRange::new(
        range.min_x * factor,
        range.min_y * factor,
        range.max_x * factor + factor - 1,
        range.max_y * factor + factor - 1,
    )
}

fn finest_zoom(grids: &[&TileGrid]) -> Option<u8> {
    grids.iter().map(|g| g.zoom()).max()
}

/// Finest zoom over the union of the finest inputs' windows
pub fn union_alignment(grids: &[&TileGrid]) -> Option<Alignment> {
    let zoom = finest_zoom(grids)?;
    let range = grids
        .iter()
        .filter(|g| g.zoom() == zoom)
        .map(|g| g.range())
        .reduce(|a, b| a.union(&b))?;
    Some(Alignment { zoom, range })
}

/// Finest zoom over the intersection of every input's window, `None` when
/// the windows do not overlap
pub fn intersection_alignment(grids: &[&TileGrid]) -> Option<Alignment> {
    let zoom = finest_zoom(grids)?;
    let mut ranges = grids.iter().map(|g| range_at_zoom(g.range(), g.zoom(), zoom));
    let first = ranges.next()?;
    let range = ranges.try_fold(first, |acc, r| acc.intersection(&r))?;
    Some(Alignment { zoom, range })
}

/// The grid as seen at the alignment zoom
pub fn align(grid: &Arc<TileGrid>, alignment: &Alignment) -> Arc<TileGrid> {
    if grid.zoom() == alignment.zoom {
        grid.clone()
    } else {
        log::debug!(
            "rescaling {:?} grid from zoom {} to {}",
            grid.variant(),
            grid.zoom(),
            alignment.zoom
        );
        Arc::new(grid.rescale_to_range(alignment.zoom, alignment.range))
    }
}

/// A numeric operand: either a raster or a number broadcast over every tile
#[derive(Debug, Clone)]
pub enum Operand {
    Grid(Arc<TileGrid>),
    Number(f64),
}

impl Operand {
    pub fn from_value(value: &Value) -> Option<Operand> {
        match value {
            Value::Raster(grid) => Some(Operand::Grid(grid.clone())),
            Value::Number(n) => Some(Operand::Number(*n)),
            _ => None,
        }
    }

    pub fn grid(&self) -> Option<&TileGrid> {
        match self {
            Operand::Grid(g) => Some(g.as_ref()),
            Operand::Number(_) => None,
        }
    }

    pub fn aligned(&self, alignment: &Alignment) -> Operand {
        match self {
            Operand::Grid(g) => Operand::Grid(align(g, alignment)),
            Operand::Number(n) => Operand::Number(*n),
        }
    }

    /// Value at a tile; booleans read as 0/1, categories as their code
    pub fn get(&self, x: i64, y: i64) -> f64 {
        match self {
            Operand::Grid(g) => g.value_at(x, y),
            Operand::Number(n) => *n,
        }
    }
}

/// Aligns all operands to the union of their raster windows
pub fn align_operands(operands: &[Operand]) -> Option<(Alignment, Vec<Operand>)> {
    let grids: Vec<&TileGrid> = operands.iter().filter_map(|o| o.grid()).collect();
    let alignment = union_alignment(&grids)?;
    let aligned = operands.iter().map(|o| o.aligned(&alignment)).collect();
    Some((alignment, aligned))
}

/// Empty numeric grid covering an alignment
pub fn numeric_output(alignment: &Alignment) -> NumericTileGrid {
    NumericTileGrid::from_range(alignment.zoom, alignment.range)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::BooleanTileGrid;

    #[test]
    fn test_range_at_finer_zoom() {
        let range = TileRange::new(1, 2, 1, 3);
        assert_eq!(range_at_zoom(range, 10, 12), TileRange::new(4, 8, 7, 15));
        assert_eq!(range_at_zoom(range, 12, 12), range);
    }

    #[test]
    fn test_union_alignment_uses_finest_windows() {
        let coarse: TileGrid = NumericTileGrid::new(10, 0, 0, 4, 4).into();
        let fine: TileGrid = NumericTileGrid::new(12, 8, 8, 4, 4).into();
        let alignment = union_alignment(&[&coarse, &fine]).unwrap();
        assert_eq!(alignment.zoom, 12);
        assert_eq!(alignment.range, TileRange::new(8, 8, 11, 11));
    }

    #[test]
    fn test_intersection_alignment() {
        let a: TileGrid = BooleanTileGrid::new(3, 0, 0, 4, 4).into();
        let b: TileGrid = BooleanTileGrid::new(3, 2, 2, 4, 4).into();
        let alignment = intersection_alignment(&[&a, &b]).unwrap();
        assert_eq!(alignment.range, TileRange::new(2, 2, 3, 3));

        let far: TileGrid = BooleanTileGrid::new(3, 100, 100, 1, 1).into();
        assert!(intersection_alignment(&[&a, &far]).is_none());
    }

    #[test]
    fn test_number_operand_broadcasts() {
        let operand = Operand::Number(4.0);
        assert_eq!(operand.get(-10, 99), 4.0);
        assert!(align_operands(&[operand]).is_none());
    }
}
