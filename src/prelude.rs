//! Prelude module for common rasterflow types and traits
//!
//! This module re-exports the most commonly used types, traits, and functions
//! for easy importing with `use rasterflow::prelude::*;`

pub use crate::core::{
    bounds::Extent,
    config::{CacheConfig, EngineConfig, EngineProfile, ProjectSettings, WorkerPoolConfig},
    geo::{tile_range_for_extent, TileRange},
};

pub use crate::grid::{
    BooleanTileGrid, CategoricalTileGrid, CategoryLabel, Grid, GridVariant, NumericTileGrid,
    TileGrid, TileGridRecord,
};

pub use crate::graph::{
    Connection, Executor, Graph, GraphDocument, NodeData, NodeEvent, NodeId, NodeState, Outputs,
    PropertyValue, SocketKind, Value,
};

pub use crate::components::{
    Category, Component, ComponentError, ComponentLibrary, EvalContext, EvalRequest, LayerSink,
    LayerStore, PublishedLayer,
};

pub use crate::data::{
    FeatureCollection, FeatureSource, GeoJsonFeature, GeoJsonGeometry, MemoryFeatureSource,
};

pub use crate::background::{JobDescriptor, KernelKind, WorkerPool};

pub use crate::{Error as EngineError, Result};

pub use std::sync::Arc;
