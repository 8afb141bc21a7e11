//! Terminal components: map layers and charts.

use crate::components::calculations::ground_area_km2;
use crate::components::{Category, Component, ComponentResult, EvalContext, EvalRequest};
use crate::graph::node::{NodeData, NodeId};
use crate::graph::socket::{Socket, SocketKind, Sockets};
use crate::graph::value::{ChartBar, ChartData, LayerRequest, Outputs, Value};
use crate::grid::{BooleanTileGrid, CategoricalTileGrid, NumericTileGrid, TileGrid};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const MAP_LAYER: &str = "Map layer";
pub const BAR_CHART: &str = "Bar chart";

/// Output key carrying a map layer's [`LayerRequest`]
pub const LAYER_OUTPUT: &str = "layer";

const HISTOGRAM_BINS: usize = 10;

/// A raster published for display
#[derive(Debug, Clone)]
pub struct PublishedLayer {
    pub node: NodeId,
    pub name: String,
    pub grid: Arc<TileGrid>,
}

/// Receives rasters published by map layer nodes
pub trait LayerSink: Send + Sync {
    fn publish(&self, node: NodeId, name: &str, grid: Arc<TileGrid>);

    /// Called when the publishing node is removed from the graph
    fn withdraw(&self, _node: NodeId) {}
}

/// In-memory layer sink keyed by publishing node
#[derive(Debug, Default)]
pub struct LayerStore {
    layers: Mutex<BTreeMap<NodeId, PublishedLayer>>,
}

impl LayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, node: NodeId) -> Option<PublishedLayer> {
        self.layers.lock().ok()?.get(&node).cloned()
    }

    /// Every published layer, in node order
    pub fn layers(&self) -> Vec<PublishedLayer> {
        match self.layers.lock() {
            Ok(guard) => guard.values().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.layers.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LayerSink for LayerStore {
    fn publish(&self, node: NodeId, name: &str, grid: Arc<TileGrid>) {
        if let Ok(mut guard) = self.layers.lock() {
            log::debug!("publishing layer '{}' from node {}", name, node);
            guard.insert(
                node,
                PublishedLayer {
                    node,
                    name: name.to_string(),
                    grid,
                },
            );
        }
    }

    fn withdraw(&self, node: NodeId) {
        if let Ok(mut guard) = self.layers.lock() {
            guard.remove(&node);
        }
    }
}

/// Prepares its input raster for the layer sink.
///
/// The request travels in the `layer` output; the executor publishes it once
/// the evaluation is accepted, so superseded evaluations never reach the sink.
pub struct MapLayer;

#[async_trait]
impl Component for MapLayer {
    fn tag(&self) -> &'static str {
        MAP_LAYER
    }

    fn category(&self) -> Category {
        Category::Outputs
    }

    fn sockets(&self, _data: &NodeData) -> ComponentResult<Sockets> {
        Ok(Sockets::new()
            .input(Socket::new("in", "Input", SocketKind::AnyRaster))
            .input(Socket::new("props", "Properties", SocketKind::Property).variadic()))
    }

    async fn evaluate(&self, request: EvalRequest, _ctx: &EvalContext) -> ComponentResult<Outputs> {
        let input = request.raster("in")?;
        let name = request
            .data_str("name")
            .map(str::to_string)
            .or_else(|| input.name().map(str::to_string))
            .unwrap_or_else(|| format!("Layer {}", request.node));

        let properties: Vec<_> = request
            .values("props")
            .iter()
            .filter_map(Value::as_property)
            .collect();

        // Upstream grids are shared, so annotations go on a private copy
        let grid = if properties.is_empty() {
            input.clone()
        } else {
            let mut copy = input.as_ref().clone();
            for property in properties {
                copy.properties_mut()
                    .insert(property.kind.clone(), property.unit.clone());
            }
            Arc::new(copy)
        };

        let layer = LayerRequest { name, grid };
        Ok(Outputs::from([(LAYER_OUTPUT.to_string(), Value::Layer(Arc::new(layer)))]))
    }
}

fn area_where<T: crate::grid::CellValue>(grid: &crate::grid::Grid<T>, mut pred: impl FnMut(T) -> bool) -> (usize, f64) {
    grid.iter()
        .filter(|&(_, _, v)| pred(v))
        .fold((0, 0.0), |(count, area), (x, y, _)| {
            (count + 1, area + ground_area_km2(grid.zoom, x, y))
        })
}

fn categorical_bars(grid: &CategoricalTileGrid) -> Vec<ChartBar> {
    grid.code_counts()
        .into_keys()
        .filter(|&code| code != 0)
        .map(|code| {
            let (count, area) = area_where(grid, |v| v == code);
            let label = grid.labels.iter().find(|l| l.code == code);
            ChartBar {
                label: label
                    .map(|l| l.name.clone())
                    .unwrap_or_else(|| format!("Unknown ({})", code)),
                count,
                area,
                colour: label.map(|l| l.colour),
            }
        })
        .collect()
}

fn boolean_bars(grid: &BooleanTileGrid) -> Vec<ChartBar> {
    [true, false]
        .into_iter()
        .map(|wanted| {
            let (count, area) = area_where(grid, |v| v == wanted);
            ChartBar {
                label: wanted.to_string(),
                count,
                area,
                colour: None,
            }
        })
        .collect()
}

fn numeric_bars(grid: &NumericTileGrid) -> Vec<ChartBar> {
    let Some((min, max)) = grid.min_max() else {
        return Vec::new();
    };
    let bins = if max > min { HISTOGRAM_BINS } else { 1 };
    let width = (max - min) / bins as f64;

    let mut bars: Vec<ChartBar> = (0..bins)
        .map(|i| {
            let low = min + width * i as f64;
            let high = if i + 1 == bins { max } else { low + width };
            ChartBar {
                label: format!("{:.2} to {:.2}", low, high),
                count: 0,
                area: 0.0,
                colour: None,
            }
        })
        .collect();

    for (x, y, v) in grid.iter().filter(|(_, _, v)| !v.is_nan()) {
        let bin = if width > 0.0 {
            (((v - min) / width) as usize).min(bins - 1)
        } else {
            0
        };
        bars[bin].count += 1;
        bars[bin].area += ground_area_km2(grid.zoom, x, y);
    }
    bars
}

/// Tile counts and ground areas per category, truth value or value bin
pub fn chart_of(grid: &TileGrid, title: Option<String>) -> ChartData {
    let bars = match grid {
        TileGrid::Categorical(g) => categorical_bars(g),
        TileGrid::Boolean(g) => boolean_bars(g),
        TileGrid::Numeric(g) => numeric_bars(g),
    };
    ChartData { title, bars }
}

pub struct BarChart;

#[async_trait]
impl Component for BarChart {
    fn tag(&self) -> &'static str {
        BAR_CHART
    }

    fn category(&self) -> Category {
        Category::Charts
    }

    fn sockets(&self, _data: &NodeData) -> ComponentResult<Sockets> {
        Ok(Sockets::new()
            .input(Socket::new("in", "Input", SocketKind::AnyRaster))
            .output(Socket::new("out", "Chart", SocketKind::Chart)))
    }

    async fn evaluate(&self, request: EvalRequest, _ctx: &EvalContext) -> ComponentResult<Outputs> {
        let input = request.raster("in")?;
        let title = request
            .data_str("title")
            .map(str::to_string)
            .or_else(|| input.name().map(str::to_string));
        let chart = chart_of(input, title);
        Ok(Outputs::from([("out".to_string(), Value::Chart(Arc::new(chart)))]))
    }
}
