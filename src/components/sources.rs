//! Input components: constants and feature-service layers rendered into the
//! project window.
//!
//! Layer-backed sources fetch a feature collection for the project extent,
//! burn it into a grid at the project zoom and keep the result per layer.
//! Only outputs with a downstream connection are fetched and produced.

use crate::components::cache::ResultCache;
use crate::components::{Category, Component, ComponentError, ComponentResult, EvalContext, EvalRequest};
use crate::core::config::EngineConfig;
use crate::data::{rasterize, rasterize_presence, FeatureCollection};
use crate::graph::node::NodeData;
use crate::graph::socket::{Socket, SocketKind, Sockets};
use crate::graph::value::{Outputs, Value};
use crate::grid::{BooleanTileGrid, CategoryLabel, TileGrid};
use async_trait::async_trait;
use std::sync::Arc;

pub const NUMERIC_CONSTANT: &str = "Numeric constant";
pub const LAND_COVER: &str = "Land cover";
pub const CENSUS: &str = "Census";
pub const GREEN_SPACES: &str = "Green spaces";
pub const BOUNDARIES: &str = "Boundaries";

pub const LAND_COVER_LAYER: &str = "land_cover";
pub const CENSUS_LAYER: &str = "census";
pub const DEFAULT_BOUNDARY_LAYER: &str = "boundaries";

/// Property holding the land cover class code
const LAND_COVER_CODE: &str = "code";

fn constant_value(data: &NodeData) -> ComponentResult<f64> {
    match data.get("value") {
        None | Some(serde_json::Value::Null) => Ok(0.0),
        Some(serde_json::Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| ComponentError::Config(format!("Invalid number {}", n))),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ComponentError::Config(format!("'{}' is not a number", s))),
        Some(other) => Err(ComponentError::Config(format!("'{}' is not a number", other))),
    }
}

/// A number typed into the node
pub struct NumericConstant;

#[async_trait]
impl Component for NumericConstant {
    fn tag(&self) -> &'static str {
        NUMERIC_CONSTANT
    }

    fn category(&self) -> Category {
        Category::Inputs
    }

    fn sockets(&self, data: &NodeData) -> ComponentResult<Sockets> {
        constant_value(data)?;
        Ok(Sockets::new().output(Socket::new("out", "Number", SocketKind::Number)))
    }

    async fn evaluate(&self, request: EvalRequest, _ctx: &EvalContext) -> ComponentResult<Outputs> {
        let value = constant_value(&request.data)?;
        Ok(Outputs::from([("out".to_string(), Value::Number(value))]))
    }
}

/// The project mask at the project zoom and window, if one is set
fn project_mask(ctx: &EvalContext) -> Option<Arc<BooleanTileGrid>> {
    let mask = ctx.mask.as_ref()?;
    let range = ctx.project.tile_range();
    if mask.zoom == ctx.project.zoom && mask.range() == range {
        Some(mask.clone())
    } else {
        Some(Arc::new(mask.rescale_to_range(ctx.project.zoom, range)))
    }
}

async fn fetch_layer(ctx: &EvalContext, layer: &str) -> ComponentResult<FeatureCollection> {
    match ctx.features.fetch(layer, &ctx.project.extent).await {
        Ok(features) => {
            log::info!("fetched {} features from layer '{}'", features.len(), layer);
            Ok(features)
        }
        Err(err) => {
            log::warn!("fetching layer '{}' failed: {}", layer, err);
            Err(err.into())
        }
    }
}

/// Presence raster of one layer, cached by layer name
async fn presence_layer(
    ctx: &EvalContext,
    cache: &ResultCache<String, Arc<TileGrid>>,
    layer: &str,
    name: &str,
) -> ComponentResult<Arc<TileGrid>> {
    if let Some(grid) = cache.get(&layer.to_string()) {
        log::debug!("source cache hit for layer '{}'", layer);
        return Ok(grid);
    }
    let features = fetch_layer(ctx, layer).await?;
    let mask = project_mask(ctx);
    let grid = rasterize_presence(
        &features.features,
        ctx.project.zoom,
        ctx.project.tile_range(),
        mask.as_deref(),
    )
    .with_name(name);

    let grid = Arc::new(TileGrid::from(grid));
    cache.put(layer.to_string(), grid.clone());
    Ok(grid)
}

/// UKCEH land cover classes
pub fn land_cover_labels() -> Vec<CategoryLabel> {
    const CLASSES: [(&str, [u8; 4]); 21] = [
        ("Deciduous woodland", [255, 0, 0, 255]),
        ("Coniferous woodland", [0, 102, 0, 255]),
        ("Arable", [115, 38, 0, 255]),
        ("Improved grassland", [0, 255, 0, 255]),
        ("Neutral grassland", [127, 229, 127, 255]),
        ("Calcareous grassland", [112, 168, 0, 255]),
        ("Acid grassland", [153, 129, 0, 255]),
        ("Fen", [255, 255, 0, 255]),
        ("Heather", [128, 26, 128, 255]),
        ("Heather grassland", [230, 140, 166, 255]),
        ("Bog", [0, 128, 115, 255]),
        ("Inland rock", [210, 210, 255, 255]),
        ("Saltwater", [0, 0, 128, 255]),
        ("Freshwater", [0, 0, 255, 255]),
        ("Supralittoral rock", [204, 179, 0, 255]),
        ("Supralittoral sediment", [204, 179, 0, 255]),
        ("Littoral rock", [255, 255, 128, 255]),
        ("Littoral sediment", [255, 255, 128, 255]),
        ("Saltmarsh", [128, 128, 255, 255]),
        ("Urban", [0, 0, 0, 255]),
        ("Suburban", [128, 128, 128, 255]),
    ];
    CLASSES
        .iter()
        .zip(1u16..)
        .map(|(&(name, colour), code)| CategoryLabel::new(code, name, colour))
        .collect()
}

/// Categorical land cover by class code
pub struct LandCover {
    cache: ResultCache<String, Arc<TileGrid>>,
}

impl LandCover {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            cache: ResultCache::new(config.cache.source_cache_entries),
        }
    }
}

#[async_trait]
impl Component for LandCover {
    fn tag(&self) -> &'static str {
        LAND_COVER
    }

    fn category(&self) -> Category {
        Category::Inputs
    }

    fn sockets(&self, _data: &NodeData) -> ComponentResult<Sockets> {
        Ok(Sockets::new().output(Socket::new("out", "Land cover", SocketKind::CategoricalRaster)))
    }

    async fn evaluate(&self, request: EvalRequest, ctx: &EvalContext) -> ComponentResult<Outputs> {
        if !request.wants("out") {
            return Ok(Outputs::new());
        }
        let key = LAND_COVER_LAYER.to_string();
        let grid = match self.cache.get(&key) {
            Some(grid) => grid,
            None => {
                let features = fetch_layer(ctx, LAND_COVER_LAYER).await?;
                let mask = project_mask(ctx);
                let grid = rasterize(
                    &features.features,
                    ctx.project.zoom,
                    ctx.project.tile_range(),
                    mask.as_deref(),
                    |feature| {
                        feature
                            .number_property(LAND_COVER_CODE)
                            .filter(|code| *code >= 1.0 && *code <= u16::MAX as f64)
                            .map(|code| code as u16)
                    },
                )
                .with_name("Land cover")
                .with_labels(land_cover_labels());

                let grid = Arc::new(TileGrid::from(grid));
                self.cache.put(key, grid.clone());
                grid
            }
        };
        Ok(Outputs::from([("out".to_string(), Value::Raster(grid))]))
    }
}

/// A census variable: feature property, display name and unit
struct CensusVariable {
    property: &'static str,
    name: &'static str,
    unit: &'static str,
}

const CENSUS_VARIABLES: [CensusVariable; 3] = [
    CensusVariable {
        property: "population_density",
        name: "Population density",
        unit: "people/km²",
    },
    CensusVariable {
        property: "households",
        name: "Households",
        unit: "households",
    },
    CensusVariable {
        property: "median_age",
        name: "Median age",
        unit: "years",
    },
];

/// Census area statistics, one numeric output per variable
pub struct Census {
    cache: ResultCache<String, Arc<TileGrid>>,
}

impl Census {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            cache: ResultCache::new(config.cache.source_cache_entries),
        }
    }
}

#[async_trait]
impl Component for Census {
    fn tag(&self) -> &'static str {
        CENSUS
    }

    fn category(&self) -> Category {
        Category::Inputs
    }

    fn sockets(&self, _data: &NodeData) -> ComponentResult<Sockets> {
        Ok(CENSUS_VARIABLES.iter().fold(Sockets::new(), |sockets, variable| {
            sockets.output(Socket::new(variable.property, variable.name, SocketKind::NumericRaster))
        }))
    }

    async fn evaluate(&self, request: EvalRequest, ctx: &EvalContext) -> ComponentResult<Outputs> {
        let mut outputs = Outputs::new();
        let mut features: Option<FeatureCollection> = None;

        for variable in CENSUS_VARIABLES.iter().filter(|v| request.wants(v.property)) {
            let key = format!("{}/{}", CENSUS_LAYER, variable.property);
            if let Some(grid) = self.cache.get(&key) {
                outputs.insert(variable.property.to_string(), Value::Raster(grid));
                continue;
            }

            let collection = match features.take() {
                Some(collection) => collection,
                None => fetch_layer(ctx, CENSUS_LAYER).await?,
            };
            let mask = project_mask(ctx);
            let mut grid = rasterize(
                &collection.features,
                ctx.project.zoom,
                ctx.project.tile_range(),
                mask.as_deref(),
                |feature| feature.number_property(variable.property),
            )
            .with_name(variable.name);
            grid.set_property("unit", variable.unit);
            features = Some(collection);

            let grid = Arc::new(TileGrid::from(grid));
            self.cache.put(key, grid.clone());
            outputs.insert(variable.property.to_string(), Value::Raster(grid));
        }
        Ok(outputs)
    }
}

/// Green space layers: (output name, layer)
const GREEN_SPACE_LAYERS: [(&str, &str); 3] = [
    ("Green space", "greenspace_site"),
    ("Private gardens", "private_gardens"),
    ("Private gardens (RGB filtered)", "private_gardens_rgb"),
];

/// Boolean presence of each green space layer
pub struct GreenSpaces {
    cache: ResultCache<String, Arc<TileGrid>>,
}

impl GreenSpaces {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            cache: ResultCache::new(config.cache.source_cache_entries),
        }
    }
}

#[async_trait]
impl Component for GreenSpaces {
    fn tag(&self) -> &'static str {
        GREEN_SPACES
    }

    fn category(&self) -> Category {
        Category::Inputs
    }

    fn sockets(&self, _data: &NodeData) -> ComponentResult<Sockets> {
        Ok(GREEN_SPACE_LAYERS.iter().fold(Sockets::new(), |sockets, (name, _)| {
            sockets.output(Socket::new(*name, *name, SocketKind::BooleanRaster))
        }))
    }

    async fn evaluate(&self, request: EvalRequest, ctx: &EvalContext) -> ComponentResult<Outputs> {
        let mut outputs = Outputs::new();
        for (name, layer) in GREEN_SPACE_LAYERS.iter().filter(|(name, _)| request.wants(name)) {
            let grid = presence_layer(ctx, &self.cache, layer, &format!("OS {}", name)).await?;
            outputs.insert(name.to_string(), Value::Raster(grid));
        }
        Ok(outputs)
    }
}

/// Boolean presence of an arbitrary boundary layer named by `data.layer`
pub struct Boundaries {
    cache: ResultCache<String, Arc<TileGrid>>,
}

impl Boundaries {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            cache: ResultCache::new(config.cache.source_cache_entries),
        }
    }
}

fn boundary_layer(data: &NodeData) -> ComponentResult<&str> {
    match data.get("layer") {
        None | Some(serde_json::Value::Null) => Ok(DEFAULT_BOUNDARY_LAYER),
        Some(serde_json::Value::String(layer)) if !layer.trim().is_empty() => Ok(layer.trim()),
        Some(other) => Err(ComponentError::Config(format!("Invalid layer {}", other))),
    }
}

#[async_trait]
impl Component for Boundaries {
    fn tag(&self) -> &'static str {
        BOUNDARIES
    }

    fn category(&self) -> Category {
        Category::Inputs
    }

    fn sockets(&self, data: &NodeData) -> ComponentResult<Sockets> {
        boundary_layer(data)?;
        Ok(Sockets::new().output(Socket::new("out", "Boundary", SocketKind::BooleanRaster)))
    }

    async fn evaluate(&self, request: EvalRequest, ctx: &EvalContext) -> ComponentResult<Outputs> {
        if !request.wants("out") {
            return Ok(Outputs::new());
        }
        let layer = boundary_layer(&request.data)?;
        let grid = presence_layer(ctx, &self.cache, layer, layer).await?;
        Ok(Outputs::from([("out".to_string(), Value::Raster(grid))]))
    }
}
