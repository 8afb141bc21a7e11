//! The static catalogue of operators a graph node can instantiate.
//!
//! Every component implements [`Component`]: it derives its sockets from the
//! node's data record and turns input values into output values. Components
//! are registered by tag in a fixed table; [`ComponentLibrary`] holds one
//! instance of each, shared by every node using that tag.

pub mod align;
pub mod arithmetic;
pub mod cache;
pub mod calculations;
pub mod conversions;
pub mod expression;
pub mod outputs;
pub mod set_ops;
pub mod sources;

use crate::background::{PoolError, WorkerPool};
use crate::core::config::{EngineConfig, ProjectSettings};
use crate::data::{FeatureSource, FetchError};
use crate::graph::node::{NodeData, NodeId};
use crate::graph::socket::Sockets;
use crate::graph::value::{Inputs, Outputs, Value};
use crate::grid::{BooleanTileGrid, CategoricalTileGrid, NumericTileGrid, TileGrid};
use crate::spatial::KernelError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

pub use outputs::{LayerSink, LayerStore, PublishedLayer};

/// Why a node produced no outputs
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ComponentError {
    /// The node's data record is unusable; the node never evaluates
    #[error("{0}")]
    Config(String),

    /// A required input socket received no value
    #[error("No input")]
    MissingInput(String),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("{0}")]
    InvalidInput(String),
}

impl From<PoolError> for ComponentError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Failed(crate::background::JobFailure::Kernel(kernel)) => {
                ComponentError::Kernel(kernel)
            }
            other => ComponentError::Kernel(KernelError::Worker(other.to_string())),
        }
    }
}

pub type ComponentResult<T> = std::result::Result<T, ComponentError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Category {
    Inputs,
    Outputs,
    Conversions,
    Calculations,
    Charts,
    SetOperations,
    Arithmetic,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::Inputs => "Inputs",
            Category::Outputs => "Outputs",
            Category::Conversions => "Conversions",
            Category::Calculations => "Calculations",
            Category::Charts => "Charts",
            Category::SetOperations => "Set operations",
            Category::Arithmetic => "Arithmetic",
        };
        f.write_str(name)
    }
}

/// Everything a component sees when evaluating one node
#[derive(Debug, Clone)]
pub struct EvalRequest {
    pub node: NodeId,
    pub data: NodeData,
    pub inputs: Inputs,
    /// Output sockets with at least one downstream connection
    pub connected_outputs: BTreeSet<String>,
}

impl EvalRequest {
    pub fn new(node: NodeId, data: NodeData) -> Self {
        Self {
            node,
            data,
            inputs: Inputs::new(),
            connected_outputs: BTreeSet::new(),
        }
    }

    pub fn with_input(mut self, socket: impl Into<String>, value: Value) -> Self {
        self.inputs.entry(socket.into()).or_default().push(value);
        self
    }

    pub fn with_connected_output(mut self, socket: impl Into<String>) -> Self {
        self.connected_outputs.insert(socket.into());
        self
    }

    /// All values received on a socket, in connection order
    pub fn values(&self, socket: &str) -> &[Value] {
        self.inputs.get(socket).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, socket: &str) -> Option<&Value> {
        self.values(socket).first()
    }

    pub fn require(&self, socket: &str) -> ComponentResult<&Value> {
        self.first(socket)
            .ok_or_else(|| ComponentError::MissingInput(socket.to_string()))
    }

    pub fn raster(&self, socket: &str) -> ComponentResult<&Arc<TileGrid>> {
        let value = self.require(socket)?;
        value.as_raster().ok_or_else(|| {
            ComponentError::InvalidInput(format!(
                "Expected a raster on '{}', got a {}",
                socket,
                value.describe()
            ))
        })
    }

    pub fn numeric(&self, socket: &str) -> ComponentResult<&NumericTileGrid> {
        expect_numeric(self.raster(socket)?, socket)
    }

    pub fn boolean(&self, socket: &str) -> ComponentResult<&BooleanTileGrid> {
        expect_boolean(self.raster(socket)?, socket)
    }

    pub fn categorical(&self, socket: &str) -> ComponentResult<&CategoricalTileGrid> {
        self.raster(socket)?.as_categorical().ok_or_else(|| {
            ComponentError::InvalidInput(format!("Expected a categorical raster on '{}'", socket))
        })
    }

    pub fn number(&self, socket: &str) -> ComponentResult<f64> {
        let value = self.require(socket)?;
        value.as_number().ok_or_else(|| {
            ComponentError::InvalidInput(format!(
                "Expected a number on '{}', got a {}",
                socket,
                value.describe()
            ))
        })
    }

    /// Whether anything downstream consumes `output`
    pub fn wants(&self, output: &str) -> bool {
        self.connected_outputs.contains(output)
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

pub(crate) fn expect_numeric<'a>(grid: &'a TileGrid, socket: &str) -> ComponentResult<&'a NumericTileGrid> {
    grid.as_numeric().ok_or_else(|| {
        ComponentError::InvalidInput(format!("Expected a numeric raster on '{}'", socket))
    })
}

pub(crate) fn expect_boolean<'a>(grid: &'a TileGrid, socket: &str) -> ComponentResult<&'a BooleanTileGrid> {
    grid.as_boolean().ok_or_else(|| {
        ComponentError::InvalidInput(format!("Expected a boolean raster on '{}'", socket))
    })
}

/// Shared collaborators available to every evaluation
#[derive(Clone)]
pub struct EvalContext {
    pub project: ProjectSettings,
    /// Tiles outside the mask are left empty by source components
    pub mask: Option<Arc<BooleanTileGrid>>,
    pub pool: Arc<WorkerPool>,
    pub features: Arc<dyn FeatureSource>,
    pub layers: Arc<dyn LayerSink>,
}

impl fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalContext")
            .field("project", &self.project)
            .field("mask", &self.mask.is_some())
            .field("workers", &self.pool.worker_count())
            .finish()
    }
}

#[async_trait]
pub trait Component: Send + Sync {
    fn tag(&self) -> &'static str;

    fn category(&self) -> Category;

    /// Sockets of a node with the given data; configuration errors surface here
    fn sockets(&self, data: &NodeData) -> ComponentResult<Sockets>;

    async fn evaluate(&self, request: EvalRequest, ctx: &EvalContext) -> ComponentResult<Outputs>;
}

pub type ComponentFactory = fn(&EngineConfig) -> Arc<dyn Component>;

struct Registry(BTreeMap<&'static str, ComponentFactory>);

impl Registry {
    fn add(&mut self, tag: &'static str, factory: ComponentFactory) {
        self.0.insert(tag, factory);
    }
}

static REGISTRY: Lazy<BTreeMap<&'static str, ComponentFactory>> = Lazy::new(|| {
    use arithmetic::{BinaryOp, BinaryOperator, UnaryOp, UnaryOperator, VariadicOp, VariadicOperator};
    use set_ops::{SetOp, SetOperator};

    let mut r = Registry(BTreeMap::new());

    // Inputs
    r.add(sources::NUMERIC_CONSTANT, |_| Arc::new(sources::NumericConstant));
    r.add(sources::LAND_COVER, |c| Arc::new(sources::LandCover::new(c)));
    r.add(sources::CENSUS, |c| Arc::new(sources::Census::new(c)));
    r.add(sources::GREEN_SPACES, |c| Arc::new(sources::GreenSpaces::new(c)));
    r.add(sources::BOUNDARIES, |c| Arc::new(sources::Boundaries::new(c)));

    // Outputs
    r.add(outputs::MAP_LAYER, |_| Arc::new(outputs::MapLayer));

    // Conversions
    r.add(conversions::NUMBER_TO_NUMERIC, |_| Arc::new(conversions::NumberToNumeric));
    r.add(conversions::NUMERIC_TO_NUMBER, |_| Arc::new(conversions::NumericToNumber));
    r.add(conversions::CATEGORICAL, |_| Arc::new(conversions::CategoricalToBoolean));

    // Calculations
    r.add(calculations::AREA, |_| Arc::new(calculations::Area));
    r.add(calculations::DISTANCE_MAP, |c| Arc::new(calculations::DistanceMap::new(c)));
    r.add(calculations::SCALE_FACTOR, |_| Arc::new(calculations::ScaleFactor));
    r.add(calculations::CELL_AREA, |_| Arc::new(calculations::CellArea));
    r.add(calculations::RESCALE, |_| Arc::new(calculations::Rescale));

    // Charts
    r.add(outputs::BAR_CHART, |_| Arc::new(outputs::BarChart));

    // Set operations
    r.add("Union", |_| Arc::new(SetOperator::new(SetOp::Union)));
    r.add("Intersection", |_| Arc::new(SetOperator::new(SetOp::Intersection)));
    r.add("Symmetric difference", |_| Arc::new(SetOperator::new(SetOp::SymmetricDifference)));
    r.add("Set difference", |_| Arc::new(SetOperator::new(SetOp::Difference)));
    r.add("Complement", |_| Arc::new(SetOperator::new(SetOp::Complement)));

    // Arithmetic
    r.add(arithmetic::MASK, |_| Arc::new(arithmetic::Mask));
    r.add(expression::EXPRESSION, |_| Arc::new(expression::Expression));
    r.add(arithmetic::FILL, |_| Arc::new(arithmetic::Fill));
    r.add("Sum", |_| Arc::new(VariadicOperator::new(VariadicOp::Sum)));
    r.add("Product", |_| Arc::new(VariadicOperator::new(VariadicOp::Product)));
    r.add("Merge", |_| Arc::new(VariadicOperator::new(VariadicOp::Merge)));
    r.add("Add", |_| Arc::new(BinaryOperator::new(BinaryOp::Add)));
    r.add("Subtract", |_| Arc::new(BinaryOperator::new(BinaryOp::Subtract)));
    r.add("Multiply", |_| Arc::new(BinaryOperator::new(BinaryOp::Multiply)));
    r.add("Divide", |_| Arc::new(BinaryOperator::new(BinaryOp::Divide)));
    r.add("Power", |_| Arc::new(BinaryOperator::new(BinaryOp::Power)));
    r.add("Min", |_| Arc::new(BinaryOperator::new(BinaryOp::Min)));
    r.add("Max", |_| Arc::new(BinaryOperator::new(BinaryOp::Max)));
    r.add("Less", |_| Arc::new(BinaryOperator::new(BinaryOp::Less)));
    r.add("Greater", |_| Arc::new(BinaryOperator::new(BinaryOp::Greater)));
    r.add("Negate", |_| Arc::new(UnaryOperator::new(UnaryOp::Negate)));
    r.add("Reciprocal", |_| Arc::new(UnaryOperator::new(UnaryOp::Reciprocal)));

    r.0
});

/// Tags of every registered component
pub fn registered_tags() -> impl Iterator<Item = &'static str> {
    REGISTRY.keys().copied()
}

/// One instance of every registered component
pub struct ComponentLibrary {
    components: BTreeMap<&'static str, Arc<dyn Component>>,
}

impl ComponentLibrary {
    pub fn new(config: &EngineConfig) -> Self {
        let components = REGISTRY
            .iter()
            .map(|(&tag, factory)| (tag, factory(config)))
            .collect();
        Self { components }
    }

    pub fn get(&self, tag: &str) -> Option<&Arc<dyn Component>> {
        self.components.get(tag)
    }

    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.components.keys().copied()
    }

    /// Tags grouped by category, for palettes
    pub fn by_category(&self) -> BTreeMap<Category, Vec<&'static str>> {
        let mut groups: BTreeMap<Category, Vec<&'static str>> = BTreeMap::new();
        for (tag, component) in &self.components {
            groups.entry(component.category()).or_default().push(tag);
        }
        groups
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tag_instantiates_with_matching_tag() {
        let library = ComponentLibrary::new(&EngineConfig::default());
        assert_eq!(library.len(), 37);
        for tag in registered_tags() {
            let component = library.get(tag).unwrap();
            assert_eq!(component.tag(), tag);
        }
    }

    #[test]
    fn test_categories_group_tags() {
        let library = ComponentLibrary::new(&EngineConfig::default());
        let groups = library.by_category();
        assert!(groups[&Category::SetOperations].contains(&"Union"));
        assert!(groups[&Category::Arithmetic].contains(&"Expression"));
        assert!(groups[&Category::Inputs].contains(&"Numeric constant"));
    }

    #[test]
    fn test_missing_input_message() {
        let err = ComponentError::MissingInput("in".to_string());
        assert_eq!(err.to_string(), "No input");
    }
}
