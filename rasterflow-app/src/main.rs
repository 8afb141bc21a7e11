//! rasterflow CLI
//!
//! Evaluates a saved graph document against GeoJSON layers on disk and writes
//! every published map layer, with its statistics, as JSON.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use rasterflow::core::bounds::Extent;
use rasterflow::data::{FeatureCollection, FeatureSource, FetchError};
use rasterflow::grid::{GridStats, TileGridRecord};
use rasterflow::{EngineConfig, Executor, GraphDocument, LayerStore, NodeEvent, ProjectSettings};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "rasterflow")]
#[command(about = "Evaluate a raster dataflow graph", long_about = None)]
struct Args {
    /// Graph document to evaluate
    graph: PathBuf,

    /// Directory holding one `<layer>.geojson` file per feature layer
    #[arg(long, default_value = "layers")]
    layers: PathBuf,

    /// Engine configuration (JSON); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Project extent as min_x,min_y,max_x,max_y in EPSG:3857 metres
    #[arg(long, value_delimiter = ',', num_args = 4, allow_hyphen_values = true)]
    extent: Option<Vec<f64>>,

    /// Project zoom level
    #[arg(long)]
    zoom: Option<u8>,

    /// Output file for published layers
    #[arg(long, default_value = "layers.json")]
    output: PathBuf,

    /// Number of worker threads
    #[arg(long)]
    workers: Option<usize>,
}

/// Serves layers from `<dir>/<layer>.geojson`
struct DirectoryFeatureSource {
    dir: PathBuf,
}

#[async_trait]
impl FeatureSource for DirectoryFeatureSource {
    async fn fetch(&self, layer: &str, extent: &Extent) -> Result<FeatureCollection, FetchError> {
        let path = self.dir.join(format!("{}.geojson", layer));
        let text = tokio::fs::read_to_string(&path).await.map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => FetchError::UnknownLayer(layer.to_string()),
            _ => FetchError::Transport(format!("{}: {}", path.display(), err)),
        })?;
        let collection = FeatureCollection::from_geojson_str(&text)
            .map_err(|err| FetchError::Parse(format!("{}: {}", path.display(), err)))?;
        Ok(collection.within(extent))
    }
}

#[derive(Serialize)]
struct LayerOutput {
    node: u32,
    name: String,
    stats: GridStats,
    grid: TileGridRecord,
}

fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };

    if let Some(extent) = &args.extent {
        let &[min_x, min_y, max_x, max_y] = extent.as_slice() else {
            bail!("--extent takes exactly four numbers");
        };
        config.project = ProjectSettings::new(Extent::new(min_x, min_y, max_x, max_y), config.project.zoom);
    }
    if let Some(zoom) = args.zoom {
        config.project.zoom = zoom;
    }
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    Ok(config)
}

fn read_document(path: &Path) -> Result<GraphDocument> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading graph {}", path.display()))?;
    GraphDocument::from_json(&text).with_context(|| format!("parsing graph {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = load_config(&args)?;
    let document = read_document(&args.graph)?;

    let features = Arc::new(DirectoryFeatureSource { dir: args.layers.clone() });
    let layers = Arc::new(LayerStore::new());
    let mut executor = Executor::new(&config, features, layers.clone())?;
    executor.load_document(&document)?;

    let events = executor.subscribe();
    executor.process().await;

    let mut failures = 0;
    for event in events.try_iter() {
        if let NodeEvent::Errored { node, message } = event {
            log::error!("node {} failed: {}", node, message);
            failures += 1;
        }
    }

    let outputs: Vec<LayerOutput> = layers
        .layers()
        .into_iter()
        .map(|layer| LayerOutput {
            node: layer.node.0,
            name: layer.name,
            stats: layer.grid.stats(),
            grid: layer.grid.to_record(),
        })
        .collect();

    let json = serde_json::to_string_pretty(&outputs)?;
    std::fs::write(&args.output, json).with_context(|| format!("writing {}", args.output.display()))?;
    log::info!(
        "wrote {} layers to {} ({} nodes failed)",
        outputs.len(),
        args.output.display(),
        failures
    );
    Ok(())
}
