//! # rasterflow
//!
//! A tile-indexed raster dataflow engine.
//!
//! Models are graphs of components. Source components rasterize vector
//! features onto the Web Mercator tile pyramid; operators combine, mask and
//! measure those rasters; output components publish map layers and charts.
//! The [`graph::Executor`] re-evaluates only what an edit invalidates and
//! offloads heavy kernels to a worker pool.

pub mod background;
pub mod components;
pub mod core;
pub mod data;
pub mod graph;
pub mod grid;
pub mod prelude;
pub mod spatial;
pub use crate::core::constants;

// Re-export public API
pub use crate::core::{
    bounds::Extent,
    config::{EngineConfig, EngineProfile, ProjectSettings},
    geo::TileRange,
};

pub use components::{Component, ComponentError, ComponentLibrary, LayerSink, LayerStore};

pub use data::{FeatureSource, MemoryFeatureSource};

pub use graph::{Connection, Executor, GraphDocument, NodeEvent, NodeId, NodeState, Value};

pub use grid::{BooleanTileGrid, CategoricalTileGrid, NumericTileGrid, TileGrid};

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, EngineError>;

/// Common error types
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Grid error: {0}")]
    Grid(#[from] grid::GridError),

    #[error("Graph error: {0}")]
    Graph(#[from] graph::GraphError),

    #[error("Component error: {0}")]
    Component(#[from] components::ComponentError),

    #[error("Kernel error: {0}")]
    Kernel(#[from] spatial::KernelError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] background::PoolError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] data::FetchError),

    #[error("Expression error: {0}")]
    Expression(#[from] components::expression::ExpressionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error type alias for convenience
pub type Error = EngineError;

/// Installs the `env_logger` backend, honouring `RUST_LOG`
#[cfg(feature = "debug")]
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .is_test(cfg!(test))
        .try_init();
}
