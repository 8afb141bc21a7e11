//! Per-tile geometric calculations and resampling.

use crate::background::{JobDescriptor, KernelKind};
use crate::components::cache::ResultCache;
use crate::components::{expect_boolean, Category, Component, ComponentError, ComponentResult, EvalContext, EvalRequest};
use crate::core::config::EngineConfig;
use crate::core::constants::{M2_PER_KM2, MAX_ZOOM};
use crate::core::geo::{scale_factor_at, tile_center, tile_range_for_extent, tile_span};
use crate::graph::node::NodeData;
use crate::graph::socket::{Socket, SocketKind, Sockets};
use crate::graph::value::{Outputs, PropertyValue, Value};
use crate::grid::{NumericTileGrid, TileGrid};
use async_trait::async_trait;
use std::sync::Arc;

pub const AREA: &str = "Area";
pub const DISTANCE_MAP: &str = "Distance map";
pub const SCALE_FACTOR: &str = "Scale factor";
pub const CELL_AREA: &str = "Cell area";
pub const RESCALE: &str = "Rescale";

/// Ground area of one tile in km², corrected for Mercator distortion
pub fn ground_area_km2(zoom: u8, x: i64, y: i64) -> f64 {
    let k = scale_factor_at(tile_center(zoom, x, y).y);
    let side = tile_span(zoom) / k;
    side * side / M2_PER_KM2
}

fn unit_output(unit: &str) -> Value {
    Value::Property(PropertyValue {
        kind: "unit".to_string(),
        unit: unit.to_string(),
    })
}

fn with_unit(out: NumericTileGrid, unit: &str) -> Outputs {
    Outputs::from([
        ("out".to_string(), Value::raster(out)),
        ("unit".to_string(), unit_output(unit)),
    ])
}

/// Area of every true tile; false tiles are 0
pub struct Area;

#[async_trait]
impl Component for Area {
    fn tag(&self) -> &'static str {
        AREA
    }

    fn category(&self) -> Category {
        Category::Calculations
    }

    fn sockets(&self, _data: &NodeData) -> ComponentResult<Sockets> {
        Ok(Sockets::new()
            .input(Socket::new("in", "Input", SocketKind::BooleanRaster))
            .output(Socket::new("out", "Area", SocketKind::NumericRaster))
            .output(Socket::new("unit", "Unit", SocketKind::Property)))
    }

    async fn evaluate(&self, request: EvalRequest, _ctx: &EvalContext) -> ComponentResult<Outputs> {
        let input = request.boolean("in")?;
        let zoom = input.zoom;
        let mut out: NumericTileGrid = input.map(|x, y, v| if v { ground_area_km2(zoom, x, y) } else { 0.0 });
        out.set_property("unit", "km²");
        Ok(with_unit(out, "km²"))
    }
}

/// Ground area of every tile of the input's window
pub struct CellArea;

#[async_trait]
impl Component for CellArea {
    fn tag(&self) -> &'static str {
        CELL_AREA
    }

    fn category(&self) -> Category {
        Category::Calculations
    }

    fn sockets(&self, _data: &NodeData) -> ComponentResult<Sockets> {
        Ok(Sockets::new()
            .input(Socket::new("in", "Input", SocketKind::AnyRaster))
            .output(Socket::new("out", "Cell area", SocketKind::NumericRaster))
            .output(Socket::new("unit", "Unit", SocketKind::Property)))
    }

    async fn evaluate(&self, request: EvalRequest, _ctx: &EvalContext) -> ComponentResult<Outputs> {
        let input = request.raster("in")?;
        let zoom = input.zoom();
        let mut out = NumericTileGrid::from_range(zoom, input.range());
        out.fill_with(|x, y| ground_area_km2(zoom, x, y));
        out.set_property("unit", "km²");
        Ok(with_unit(out, "km²"))
    }
}

/// Mercator scale factor at every tile centre
pub struct ScaleFactor;

#[async_trait]
impl Component for ScaleFactor {
    fn tag(&self) -> &'static str {
        SCALE_FACTOR
    }

    fn category(&self) -> Category {
        Category::Calculations
    }

    fn sockets(&self, _data: &NodeData) -> ComponentResult<Sockets> {
        Ok(Sockets::new()
            .input(Socket::new("in", "Input", SocketKind::AnyRaster))
            .output(Socket::new("out", "Scale factor", SocketKind::NumericRaster)))
    }

    async fn evaluate(&self, request: EvalRequest, _ctx: &EvalContext) -> ComponentResult<Outputs> {
        let input = request.raster("in")?;
        let zoom = input.zoom();
        let mut out = NumericTileGrid::from_range(zoom, input.range());
        out.fill_with(|x, y| scale_factor_at(tile_center(zoom, x, y).y));
        Ok(Outputs::from([("out".to_string(), Value::raster(out))]))
    }
}

fn target_zoom(data: &NodeData) -> ComponentResult<u8> {
    let zoom = data
        .get("zoom")
        .ok_or_else(|| ComponentError::Config("No zoom set".to_string()))?;
    let zoom = match zoom {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    zoom.filter(|&z| z <= MAX_ZOOM as u64)
        .map(|z| z as u8)
        .ok_or_else(|| ComponentError::Config(format!("Zoom must be between 0 and {}", MAX_ZOOM)))
}

/// Resamples a numeric grid to `data.zoom` over the project extent
pub struct Rescale;

#[async_trait]
impl Component for Rescale {
    fn tag(&self) -> &'static str {
        RESCALE
    }

    fn category(&self) -> Category {
        Category::Calculations
    }

    fn sockets(&self, data: &NodeData) -> ComponentResult<Sockets> {
        target_zoom(data)?;
        Ok(Sockets::new()
            .input(Socket::new("in", "Input", SocketKind::NumericRaster))
            .output(Socket::new("out", "Output", SocketKind::NumericRaster)))
    }

    async fn evaluate(&self, request: EvalRequest, ctx: &EvalContext) -> ComponentResult<Outputs> {
        let zoom = target_zoom(&request.data)?;
        let input = request.numeric("in")?;
        let out = input.rescale_to_range(zoom, tile_range_for_extent(&ctx.project.extent, zoom));
        Ok(Outputs::from([("out".to_string(), Value::raster(out))]))
    }
}

type DistanceEntry = (Arc<TileGrid>, Arc<TileGrid>);

/// Distance to the nearest true tile, computed on the worker pool.
///
/// Results are cached by input identity: the same input `Arc` yields the
/// same output `Arc` without another round trip through the pool.
pub struct DistanceMap {
    max_zoom: u8,
    cache: ResultCache<usize, DistanceEntry>,
}

impl DistanceMap {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            max_zoom: config.max_distance_zoom,
            cache: ResultCache::new(config.cache.distance_cache_entries),
        }
    }

    fn cached(&self, input: &Arc<TileGrid>) -> Option<Arc<TileGrid>> {
        let (key, output) = self.cache.get(&(Arc::as_ptr(input) as usize))?;
        Arc::ptr_eq(&key, input).then_some(output)
    }
}

#[async_trait]
impl Component for DistanceMap {
    fn tag(&self) -> &'static str {
        DISTANCE_MAP
    }

    fn category(&self) -> Category {
        Category::Calculations
    }

    fn sockets(&self, _data: &NodeData) -> ComponentResult<Sockets> {
        Ok(Sockets::new()
            .input(Socket::new("in", "Input", SocketKind::BooleanRaster))
            .output(Socket::new("out", "Distance", SocketKind::NumericRaster))
            .output(Socket::new("unit", "Unit", SocketKind::Property)))
    }

    async fn evaluate(&self, request: EvalRequest, ctx: &EvalContext) -> ComponentResult<Outputs> {
        let input = request.raster("in")?.clone();
        expect_boolean(&input, "in")?;

        let output = match self.cached(&input) {
            Some(output) => {
                log::debug!("distance map cache hit for node {}", request.node);
                output
            }
            None => {
                let coarse;
                let job_input: &TileGrid = if input.zoom() > self.max_zoom {
                    coarse = input.rescale(self.max_zoom, &input.extent());
                    &coarse
                } else {
                    &input
                };

                let started = instant::Instant::now();
                let handle = ctx.pool.submit(&JobDescriptor::new(KernelKind::DistanceTransform, job_input))?;
                let record = handle.wait().await?;
                let grid = TileGrid::from_record(record)
                    .map_err(|e| ComponentError::InvalidInput(e.to_string()))?;
                log::info!(
                    "distance map for node {} finished in {:?} at zoom {}",
                    request.node,
                    started.elapsed(),
                    grid.zoom()
                );

                let output = Arc::new(grid);
                self.cache.put(Arc::as_ptr(&input) as usize, (input.clone(), output.clone()));
                output
            }
        };

        Ok(Outputs::from([
            ("out".to_string(), Value::Raster(output)),
            ("unit".to_string(), unit_output("m")),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::testing::{context, context_with, request};
    use crate::core::bounds::Extent;
    use crate::core::config::ProjectSettings;
    use crate::data::MemoryFeatureSource;
    use crate::grid::BooleanTileGrid;
    use crate::spatial::KernelError;
    use serde_json::json;

    #[test]
    fn test_ground_area_shrinks_away_from_equator() {
        let zoom = 10;
        let equator = ground_area_km2(zoom, 0, 512);
        let north = ground_area_km2(zoom, 0, 300);
        let span_km = tile_span(zoom) / 1000.0;
        assert!((equator - span_km * span_km).abs() / equator < 1e-3);
        assert!(north < equator);
    }

    #[tokio::test]
    async fn test_area_is_zero_on_false_tiles() {
        let grid = BooleanTileGrid::from_values(12, 2000, 1300, 2, 1, vec![true, false]).unwrap();
        let outputs = Area
            .evaluate(request().with_input("in", Value::raster(grid)), &context())
            .await
            .unwrap();
        let out = outputs["out"].as_raster().unwrap().as_numeric().unwrap().clone();
        assert!((out.get(2000, 1300) - ground_area_km2(12, 2000, 1300)).abs() < 1e-12);
        assert_eq!(out.get(2001, 1300), 0.0);
        assert_eq!(outputs["unit"].as_property().unwrap().unit, "km²");
    }

    #[tokio::test]
    async fn test_cell_area_and_scale_factor_cover_input_window() {
        let input = Value::raster(crate::grid::CategoricalTileGrid::new(8, 10, 90, 3, 2));
        let outputs = CellArea
            .evaluate(request().with_input("in", input.clone()), &context())
            .await
            .unwrap();
        let area = outputs["out"].as_raster().unwrap();
        assert_eq!(area.range(), input.as_raster().unwrap().range());

        let outputs = ScaleFactor
            .evaluate(request().with_input("in", input), &context())
            .await
            .unwrap();
        let scale = outputs["out"].as_raster().unwrap().as_numeric().unwrap().clone();
        assert!(scale.values().iter().all(|&k| k >= 1.0));
    }

    #[tokio::test]
    async fn test_rescale_requires_zoom() {
        assert!(matches!(Rescale.sockets(&NodeData::new()), Err(ComponentError::Config(_))));

        let mut data = NodeData::new();
        data.insert("zoom".to_string(), json!("forty"));
        assert!(Rescale.sockets(&data).is_err());

        data.insert("zoom".to_string(), json!(3));
        assert!(Rescale.sockets(&data).is_ok());
    }

    #[tokio::test]
    async fn test_rescale_over_project_extent() {
        let project = ProjectSettings::new(Extent::new(0.0, -15_000_000.0, 15_000_000.0, 0.0), 2);
        let ctx = context_with(MemoryFeatureSource::new(), project);
        let grid = NumericTileGrid::filled(1, 1, 1, 1, 1, 4.0);

        let mut req = request().with_input("in", Value::raster(grid));
        req.data.insert("zoom".to_string(), json!(2));
        let outputs = Rescale.evaluate(req, &ctx).await.unwrap();
        let out = outputs["out"].as_raster().unwrap();
        assert_eq!(out.zoom(), 2);
        assert_eq!(out.range(), project.tile_range());
        assert!(out.as_numeric().unwrap().values().iter().all(|&v| v == 4.0));
    }

    #[tokio::test]
    async fn test_distance_map_caches_by_input_identity() {
        let component = DistanceMap::new(&EngineConfig::default());
        let mut grid = BooleanTileGrid::new(10, 0, 0, 3, 3);
        grid.set(1, 1, true).unwrap();
        let input = Value::raster(grid);

        let first = component
            .evaluate(request().with_input("in", input.clone()), &context())
            .await
            .unwrap();
        let second = component
            .evaluate(request().with_input("in", input), &context())
            .await
            .unwrap();
        assert!(first["out"].same(&second["out"]));
        assert_eq!(first["out"].as_raster().unwrap().as_numeric().unwrap().get(1, 1), 0.0);
    }

    #[tokio::test]
    async fn test_distance_map_without_seeds() {
        let component = DistanceMap::new(&EngineConfig::default());
        let input = Value::raster(BooleanTileGrid::new(10, 0, 0, 2, 2));
        let err = component
            .evaluate(request().with_input("in", input), &context())
            .await
            .unwrap_err();
        assert_eq!(err, ComponentError::Kernel(KernelError::NoSeedPoints));
    }

    #[tokio::test]
    async fn test_distance_map_coarsens_fine_inputs() {
        let config = EngineConfig {
            max_distance_zoom: 4,
            ..EngineConfig::default()
        };
        let component = DistanceMap::new(&config);
        let grid = BooleanTileGrid::filled(6, 0, 0, 8, 8, true);
        let outputs = component
            .evaluate(request().with_input("in", Value::raster(grid)), &context())
            .await
            .unwrap();
        assert_eq!(outputs["out"].as_raster().unwrap().zoom(), 4);
    }
}
