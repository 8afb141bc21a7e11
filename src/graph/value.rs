use crate::grid::{GridVariant, TileGrid};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A unit annotation flowing through property sockets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyValue {
    /// Property key, e.g. "area"
    pub kind: String,
    pub unit: String,
}

/// One bar of a chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartBar {
    pub label: String,
    pub count: usize,
    /// Ground area in km²
    pub area: f64,
    #[serde(default)]
    pub colour: Option<[u8; 4]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub title: Option<String>,
    pub bars: Vec<ChartBar>,
}

/// A raster a terminal node wants displayed.
///
/// The executor hands it to the layer sink only after accepting the
/// evaluation that produced it.
#[derive(Debug, Clone)]
pub struct LayerRequest {
    pub name: String,
    pub grid: Arc<TileGrid>,
}

/// A value flowing along a connection
#[derive(Debug, Clone)]
pub enum Value {
    Raster(Arc<TileGrid>),
    Number(f64),
    Property(PropertyValue),
    Chart(Arc<ChartData>),
    Layer(Arc<LayerRequest>),
}

impl Value {
    pub fn raster(grid: impl Into<TileGrid>) -> Self {
        Value::Raster(Arc::new(grid.into()))
    }

    pub fn as_raster(&self) -> Option<&Arc<TileGrid>> {
        match self {
            Value::Raster(grid) => Some(grid),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_property(&self) -> Option<&PropertyValue> {
        match self {
            Value::Property(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_chart(&self) -> Option<&Arc<ChartData>> {
        match self {
            Value::Chart(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_layer(&self) -> Option<&Arc<LayerRequest>> {
        match self {
            Value::Layer(l) => Some(l),
            _ => None,
        }
    }

    pub fn variant(&self) -> Option<GridVariant> {
        self.as_raster().map(|g| g.variant())
    }

    /// Identity comparison used for memoization: shared values by
    /// pointer, numbers by bit pattern, properties by value.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Raster(a), Value::Raster(b)) => Arc::ptr_eq(a, b),
            (Value::Number(a), Value::Number(b)) => a.to_bits() == b.to_bits(),
            (Value::Property(a), Value::Property(b)) => a == b,
            (Value::Chart(a), Value::Chart(b)) => Arc::ptr_eq(a, b),
            (Value::Layer(a), Value::Layer(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Short human readable description used in error messages
    pub fn describe(&self) -> &'static str {
        match self {
            Value::Raster(grid) => match grid.variant() {
                GridVariant::Boolean => "boolean raster",
                GridVariant::Numeric => "numeric raster",
                GridVariant::Categorical => "categorical raster",
            },
            Value::Number(_) => "number",
            Value::Property(_) => "property",
            Value::Chart(_) => "chart",
            Value::Layer(_) => "map layer",
        }
    }
}

/// Values produced by a node, keyed by output socket name
pub type Outputs = BTreeMap<String, Value>;

/// Values received by a node, keyed by input socket name, in connection order
pub type Inputs = BTreeMap<String, Vec<Value>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::NumericTileGrid;

    #[test]
    fn test_raster_identity_is_by_pointer() {
        let grid = Arc::new(TileGrid::from(NumericTileGrid::filled(1, 0, 0, 1, 1, 2.0)));
        let a = Value::Raster(grid.clone());
        let b = Value::Raster(grid.as_ref().clone().into());
        assert!(a.same(&Value::Raster(grid)));
        assert!(!a.same(&b));
    }

    #[test]
    fn test_number_identity_is_bitwise() {
        assert!(Value::Number(f64::NAN).same(&Value::Number(f64::NAN)));
        assert!(!Value::Number(0.0).same(&Value::Number(-0.0)));
        assert!(!Value::Number(1.0).same(&Value::Property(PropertyValue {
            kind: "area".into(),
            unit: "km²".into()
        })));
    }
}
