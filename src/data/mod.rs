pub mod geojson;
pub mod rasterize;
pub mod source;

pub use geojson::{FeatureCollection, GeoJson, GeoJsonFeature, GeoJsonGeometry};
pub use rasterize::{rasterize, rasterize_presence};
pub use source::{FeatureSource, FetchError, MemoryFeatureSource};
