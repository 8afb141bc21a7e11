//! Tile grids: the raster value container flowing between components.
//!
//! A grid is a rectangular window of tiles at one zoom holding one value per
//! tile in row-major order. Reads outside the window return the variant's
//! no-data value instead of failing, so operators can sample neighbouring
//! grids of different extents without bounds checks.

pub mod record;
pub mod rescale;
pub mod stats;

use crate::core::bounds::Extent;
use crate::core::geo::{tile_range_for_extent, TileRange};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

pub use record::TileGridRecord;
pub use stats::{GridStats, GridSummary, LabelCount};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GridError {
    #[error("tile ({x}, {y}) is outside the grid window {range:?}")]
    OutOfBounds { x: i64, y: i64, range: TileRange },

    #[error("expected {expected} values for a {width}x{height} grid, got {actual}")]
    LengthMismatch {
        width: usize,
        height: usize,
        expected: usize,
        actual: usize,
    },

    #[error("grid window must be at least 1x1")]
    EmptyWindow,

    #[error("value {value:?} at index {index} is not valid for a {variant:?} grid")]
    InvalidValue {
        variant: GridVariant,
        index: usize,
        value: Option<f64>,
    },
}

/// The three kinds of raster the engine knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridVariant {
    Boolean,
    Numeric,
    Categorical,
}

/// One entry of a categorical label table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLabel {
    pub code: u16,
    pub name: String,
    #[serde(default)]
    pub colour: [u8; 4],
}

impl CategoryLabel {
    pub fn new(code: u16, name: impl Into<String>, colour: [u8; 4]) -> Self {
        Self {
            code,
            name: name.into(),
            colour,
        }
    }
}

/// A value that can live in a tile grid
pub trait CellValue: Copy + Debug + Send + Sync + 'static {
    const VARIANT: GridVariant;

    /// Returned by reads outside the grid window
    const NO_DATA: Self;

    /// Equality where no-data compares equal to itself
    fn same(a: Self, b: Self) -> bool;

    /// Aggregates the in-window samples of `total` finer tiles into one
    /// coarser tile; the remaining `total - samples.len()` tiles are no-data.
    fn coarsen(samples: &[Self], total: usize) -> Self;

    fn to_record(self) -> Option<f64>;

    fn from_record(value: Option<f64>) -> Option<Self>;
}

impl CellValue for bool {
    const VARIANT: GridVariant = GridVariant::Boolean;
    const NO_DATA: Self = false;

    fn same(a: Self, b: Self) -> bool {
        a == b
    }

    fn coarsen(samples: &[Self], total: usize) -> Self {
        rescale::majority(samples, total)
    }

    fn to_record(self) -> Option<f64> {
        Some(if self { 1.0 } else { 0.0 })
    }

    fn from_record(value: Option<f64>) -> Option<Self> {
        match value {
            Some(v) if v == 0.0 => Some(false),
            Some(v) if v == 1.0 => Some(true),
            _ => None,
        }
    }
}

impl CellValue for f64 {
    const VARIANT: GridVariant = GridVariant::Numeric;
    const NO_DATA: Self = f64::NAN;

    fn same(a: Self, b: Self) -> bool {
        (a.is_nan() && b.is_nan()) || a == b
    }

    fn coarsen(samples: &[Self], _total: usize) -> Self {
        rescale::mean_ignoring_nan(samples)
    }

    fn to_record(self) -> Option<f64> {
        if self.is_nan() {
            None
        } else {
            Some(self)
        }
    }

    fn from_record(value: Option<f64>) -> Option<Self> {
        Some(value.unwrap_or(f64::NAN))
    }
}

impl CellValue for u16 {
    const VARIANT: GridVariant = GridVariant::Categorical;
    const NO_DATA: Self = 0;

    fn same(a: Self, b: Self) -> bool {
        a == b
    }

    fn coarsen(samples: &[Self], _total: usize) -> Self {
        rescale::mode_ignoring_zero(samples)
    }

    fn to_record(self) -> Option<f64> {
        Some(self as f64)
    }

    fn from_record(value: Option<f64>) -> Option<Self> {
        match value {
            Some(v) if v.fract() == 0.0 && (0.0..=u16::MAX as f64).contains(&v) => Some(v as u16),
            _ => None,
        }
    }
}

/// A rectangular window of tiles at a fixed zoom
#[derive(Debug, Clone)]
pub struct Grid<T: CellValue> {
    pub zoom: u8,
    pub x: i64,
    pub y: i64,
    pub width: usize,
    pub height: usize,
    values: Vec<T>,
    pub name: Option<String>,
    /// Free-form metadata, e.g. physical unit
    pub properties: BTreeMap<String, String>,
    /// Label table, only meaningful for categorical grids
    pub labels: Vec<CategoryLabel>,
}

pub type BooleanTileGrid = Grid<bool>;
pub type NumericTileGrid = Grid<f64>;
pub type CategoricalTileGrid = Grid<u16>;

impl<T: CellValue> Grid<T> {
    /// Creates a grid filled with no-data.
    ///
    /// Panics if `width` or `height` is zero.
    pub fn new(zoom: u8, x: i64, y: i64, width: usize, height: usize) -> Self {
        Self::filled(zoom, x, y, width, height, T::NO_DATA)
    }

    /// Creates a grid with every tile set to `value`.
    ///
    /// Panics if `width` or `height` is zero.
    pub fn filled(zoom: u8, x: i64, y: i64, width: usize, height: usize, value: T) -> Self {
        assert!(width >= 1 && height >= 1, "grid window must be at least 1x1");
        Self {
            zoom,
            x,
            y,
            width,
            height,
            values: vec![value; width * height],
            name: None,
            properties: BTreeMap::new(),
            labels: Vec::new(),
        }
    }

    pub fn from_range(zoom: u8, range: TileRange) -> Self {
        Self::new(zoom, range.min_x, range.min_y, range.width(), range.height())
    }

    /// Grid covering `extent` at `zoom`, filled with no-data
    pub fn for_extent(extent: &Extent, zoom: u8) -> Self {
        Self::from_range(zoom, tile_range_for_extent(extent, zoom))
    }

    /// Builds a grid from row-major values
    pub fn from_values(
        zoom: u8,
        x: i64,
        y: i64,
        width: usize,
        height: usize,
        values: Vec<T>,
    ) -> Result<Self, GridError> {
        if width == 0 || height == 0 {
            return Err(GridError::EmptyWindow);
        }
        if values.len() != width * height {
            return Err(GridError::LengthMismatch {
                width,
                height,
                expected: width * height,
                actual: values.len(),
            });
        }
        Ok(Self {
            zoom,
            x,
            y,
            width,
            height,
            values,
            name: None,
            properties: BTreeMap::new(),
            labels: Vec::new(),
        })
    }

    /// Empty grid sharing this grid's window and metadata
    pub fn like(&self) -> Self {
        self.with_window_of::<T>(T::NO_DATA)
    }

    /// Grid of another value type over the same window, metadata carried along
    pub fn with_window_of<U: CellValue>(&self, fill: U) -> Grid<U> {
        let mut grid = Grid::filled(self.zoom, self.x, self.y, self.width, self.height, fill);
        grid.name = self.name.clone();
        grid.properties = self.properties.clone();
        grid.labels = self.labels.clone();
        grid
    }

    pub fn range(&self) -> TileRange {
        TileRange::from_origin(self.x, self.y, self.width, self.height)
    }

    pub fn extent(&self) -> Extent {
        self.range().extent(self.zoom)
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.x
            && y >= self.y
            && x < self.x + self.width as i64
            && y < self.y + self.height as i64
    }

    fn index(&self, x: i64, y: i64) -> Option<usize> {
        if self.contains(x, y) {
            Some((y - self.y) as usize * self.width + (x - self.x) as usize)
        } else {
            None
        }
    }

    /// Value at `(x, y)`, or no-data outside the window
    pub fn get(&self, x: i64, y: i64) -> T {
        self.index(x, y).map(|i| self.values[i]).unwrap_or(T::NO_DATA)
    }

    pub fn set(&mut self, x: i64, y: i64, value: T) -> Result<(), GridError> {
        match self.index(x, y) {
            Some(i) => {
                self.values[i] = value;
                Ok(())
            }
            None => Err(GridError::OutOfBounds {
                x,
                y,
                range: self.range(),
            }),
        }
    }

    /// Row-major traversal of every `(x, y, value)` in the window
    pub fn iter(&self) -> impl Iterator<Item = (i64, i64, T)> + '_ {
        let (x0, y0, width) = (self.x, self.y, self.width);
        self.values.iter().enumerate().map(move |(i, &v)| {
            (x0 + (i % width) as i64, y0 + (i / width) as i64, v)
        })
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Number of tiles in the window
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// New grid over the same window with `f` applied to every tile
    pub fn map<U: CellValue>(&self, mut f: impl FnMut(i64, i64, T) -> U) -> Grid<U> {
        let mut out = self.with_window_of(U::NO_DATA);
        for (slot, (x, y, v)) in out.values.iter_mut().zip(self.iter()) {
            *slot = f(x, y, v);
        }
        out
    }

    /// Fills every tile of the window from `f`
    pub fn fill_with(&mut self, mut f: impl FnMut(i64, i64) -> T) {
        let (x0, y0, width) = (self.x, self.y, self.width);
        for (i, slot) in self.values.iter_mut().enumerate() {
            *slot = f(x0 + (i % width) as i64, y0 + (i / width) as i64);
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_labels(mut self, labels: Vec<CategoryLabel>) -> Self {
        self.labels = labels;
        self
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }
}

impl<T: CellValue> PartialEq for Grid<T> {
    fn eq(&self, other: &Self) -> bool {
        self.zoom == other.zoom
            && self.x == other.x
            && self.y == other.y
            && self.width == other.width
            && self.height == other.height
            && self.name == other.name
            && self.properties == other.properties
            && self.labels == other.labels
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| T::same(*a, *b))
    }
}

/// Any of the three grid variants
#[derive(Debug, Clone, PartialEq)]
pub enum TileGrid {
    Boolean(BooleanTileGrid),
    Numeric(NumericTileGrid),
    Categorical(CategoricalTileGrid),
}

macro_rules! each_variant {
    ($grid:expr, $g:ident => $body:expr) => {
        match $grid {
            TileGrid::Boolean($g) => $body,
            TileGrid::Numeric($g) => $body,
            TileGrid::Categorical($g) => $body,
        }
    };
}

impl TileGrid {
    pub fn variant(&self) -> GridVariant {
        match self {
            TileGrid::Boolean(_) => GridVariant::Boolean,
            TileGrid::Numeric(_) => GridVariant::Numeric,
            TileGrid::Categorical(_) => GridVariant::Categorical,
        }
    }

    pub fn zoom(&self) -> u8 {
        each_variant!(self, g => g.zoom)
    }

    pub fn range(&self) -> TileRange {
        each_variant!(self, g => g.range())
    }

    pub fn extent(&self) -> Extent {
        each_variant!(self, g => g.extent())
    }

    pub fn name(&self) -> Option<&str> {
        each_variant!(self, g => g.name.as_deref())
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        each_variant!(self, g => &g.properties)
    }

    pub fn properties_mut(&mut self) -> &mut BTreeMap<String, String> {
        each_variant!(self, g => &mut g.properties)
    }

    pub fn set_name(&mut self, name: Option<String>) {
        each_variant!(self, g => g.name = name)
    }

    pub fn labels(&self) -> &[CategoryLabel] {
        each_variant!(self, g => &g.labels)
    }

    /// Samples a tile as a number: booleans as 0/1, categories as their code
    pub fn value_at(&self, x: i64, y: i64) -> f64 {
        match self {
            TileGrid::Boolean(g) => {
                if g.get(x, y) {
                    1.0
                } else {
                    0.0
                }
            }
            TileGrid::Numeric(g) => g.get(x, y),
            TileGrid::Categorical(g) => g.get(x, y) as f64,
        }
    }

    pub fn rescale(&self, zoom: u8, reference: &Extent) -> TileGrid {
        self.rescale_to_range(zoom, tile_range_for_extent(reference, zoom))
    }

    pub fn rescale_to_range(&self, zoom: u8, range: TileRange) -> TileGrid {
        match self {
            TileGrid::Boolean(g) => TileGrid::Boolean(g.rescale_to_range(zoom, range)),
            TileGrid::Numeric(g) => TileGrid::Numeric(g.rescale_to_range(zoom, range)),
            TileGrid::Categorical(g) => TileGrid::Categorical(g.rescale_to_range(zoom, range)),
        }
    }

    pub fn stats(&self) -> GridStats {
        match self {
            TileGrid::Boolean(g) => g.stats(),
            TileGrid::Numeric(g) => g.stats(),
            TileGrid::Categorical(g) => g.stats(),
        }
    }

    pub fn as_boolean(&self) -> Option<&BooleanTileGrid> {
        match self {
            TileGrid::Boolean(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_numeric(&self) -> Option<&NumericTileGrid> {
        match self {
            TileGrid::Numeric(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_categorical(&self) -> Option<&CategoricalTileGrid> {
        match self {
            TileGrid::Categorical(g) => Some(g),
            _ => None,
        }
    }
}

impl From<BooleanTileGrid> for TileGrid {
    fn from(grid: BooleanTileGrid) -> Self {
        TileGrid::Boolean(grid)
    }
}

impl From<NumericTileGrid> for TileGrid {
    fn from(grid: NumericTileGrid) -> Self {
        TileGrid::Numeric(grid)
    }
}

impl From<CategoricalTileGrid> for TileGrid {
    fn from(grid: CategoricalTileGrid) -> Self {
        TileGrid::Categorical(grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_after_set() {
        let mut grid = NumericTileGrid::new(10, 100, 200, 3, 2);
        grid.set(102, 201, 4.5).unwrap();
        assert_eq!(grid.get(102, 201), 4.5);
        assert!(grid.get(100, 200).is_nan());

        let mut flags = BooleanTileGrid::new(10, 0, 0, 2, 2);
        flags.set(1, 1, true).unwrap();
        assert!(flags.get(1, 1));
        assert!(!flags.get(0, 1));
    }

    #[test]
    fn test_reads_outside_window_return_defaults() {
        let numeric = NumericTileGrid::filled(4, 0, 0, 2, 2, 1.0);
        let boolean = BooleanTileGrid::filled(4, 0, 0, 2, 2, true);
        let categorical = CategoricalTileGrid::filled(4, 0, 0, 2, 2, 7);

        for (x, y) in [(-1, 0), (2, 0), (0, -1), (0, 2), (i64::MAX, i64::MIN)] {
            assert!(numeric.get(x, y).is_nan());
            assert!(!boolean.get(x, y));
            assert_eq!(categorical.get(x, y), 0);
        }
    }

    #[test]
    fn test_set_outside_window_fails() {
        let mut grid = BooleanTileGrid::new(3, 5, 5, 1, 1);
        let err = grid.set(6, 5, true).unwrap_err();
        assert!(matches!(err, GridError::OutOfBounds { x: 6, y: 5, .. }));
    }

    #[test]
    fn test_iter_is_row_major_and_restartable() {
        let grid = Grid::from_values(1, 10, 20, 2, 2, vec![1u16, 2, 3, 4]).unwrap();
        let first: Vec<_> = grid.iter().collect();
        assert_eq!(
            first,
            vec![(10, 20, 1), (11, 20, 2), (10, 21, 3), (11, 21, 4)]
        );
        assert_eq!(grid.iter().count(), 4);
    }

    #[test]
    fn test_from_values_checks_length() {
        let err = Grid::from_values(1, 0, 0, 2, 2, vec![1.0, 2.0]).unwrap_err();
        assert_eq!(
            err,
            GridError::LengthMismatch {
                width: 2,
                height: 2,
                expected: 4,
                actual: 2
            }
        );
    }

    #[test]
    fn test_clone_is_deep() {
        let original = NumericTileGrid::filled(2, 0, 0, 2, 1, 3.0);
        let mut copy = original.clone();
        copy.set(0, 0, 9.0).unwrap();
        copy.set_property("unit", "m");
        assert_eq!(original.get(0, 0), 3.0);
        assert!(original.properties.is_empty());
    }

    #[test]
    fn test_nan_grids_compare_equal() {
        let a = NumericTileGrid::new(2, 0, 0, 2, 2);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_value_at_normalises_variants() {
        let grid = TileGrid::from(BooleanTileGrid::filled(0, 0, 0, 1, 1, true));
        assert_eq!(grid.value_at(0, 0), 1.0);
        assert_eq!(grid.value_at(1, 0), 0.0);
        assert_eq!(grid.variant(), GridVariant::Boolean);
    }
}
