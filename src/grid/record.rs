//! Plain-data form of a grid used to cross the worker boundary and to
//! persist layers as JSON. No-data numeric tiles travel as `None`.

use super::{CategoryLabel, CellValue, Grid, GridError, GridVariant, TileGrid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileGridRecord {
    pub variant: GridVariant,
    pub zoom: u8,
    pub x: i64,
    pub y: i64,
    pub width: usize,
    pub height: usize,
    pub values: Vec<Option<f64>>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: Vec<CategoryLabel>,
}

fn to_record<T: CellValue>(grid: &Grid<T>) -> TileGridRecord {
    TileGridRecord {
        variant: T::VARIANT,
        zoom: grid.zoom,
        x: grid.x,
        y: grid.y,
        width: grid.width,
        height: grid.height,
        values: grid.values().iter().map(|v| v.to_record()).collect(),
        name: grid.name.clone(),
        properties: grid.properties.clone(),
        labels: grid.labels.clone(),
    }
}

fn from_record<T: CellValue>(record: TileGridRecord) -> Result<Grid<T>, GridError> {
    let values = record
        .values
        .iter()
        .enumerate()
        .map(|(index, &value)| {
            T::from_record(value).ok_or(GridError::InvalidValue {
                variant: T::VARIANT,
                index,
                value,
            })
        })
        .collect::<Result<Vec<T>, GridError>>()?;

    let mut grid = Grid::from_values(
        record.zoom,
        record.x,
        record.y,
        record.width,
        record.height,
        values,
    )?;
    grid.name = record.name;
    grid.properties = record.properties;
    grid.labels = record.labels;
    Ok(grid)
}

impl TileGrid {
    pub fn to_record(&self) -> TileGridRecord {
        match self {
            TileGrid::Boolean(g) => to_record(g),
            TileGrid::Numeric(g) => to_record(g),
            TileGrid::Categorical(g) => to_record(g),
        }
    }

    /// Rebuilds a grid, validating the window and every value
    pub fn from_record(record: TileGridRecord) -> Result<TileGrid, GridError> {
        Ok(match record.variant {
            GridVariant::Boolean => TileGrid::Boolean(from_record(record)?),
            GridVariant::Numeric => TileGrid::Numeric(from_record(record)?),
            GridVariant::Categorical => TileGrid::Categorical(from_record(record)?),
        })
    }
}

impl From<&TileGrid> for TileGridRecord {
    fn from(grid: &TileGrid) -> Self {
        grid.to_record()
    }
}

impl TryFrom<TileGridRecord> for TileGrid {
    type Error = GridError;

    fn try_from(record: TileGridRecord) -> Result<Self, Self::Error> {
        TileGrid::from_record(record)
    }
}
