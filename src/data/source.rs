use crate::core::bounds::Extent;
use crate::data::geojson::FeatureCollection;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetchError {
    #[error("Unknown layer '{0}'")]
    UnknownLayer(String),

    #[error("Fetch failed: {0}")]
    Transport(String),

    #[error("Malformed feature collection: {0}")]
    Parse(String),
}

/// Provider of feature collections for a named layer within an extent
#[async_trait]
pub trait FeatureSource: Send + Sync {
    async fn fetch(&self, layer: &str, extent: &Extent) -> Result<FeatureCollection, FetchError>;
}

/// Feature source backed by collections held in memory
#[derive(Debug, Default)]
pub struct MemoryFeatureSource {
    layers: BTreeMap<String, FeatureCollection>,
    fetches: AtomicUsize,
}

impl MemoryFeatureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, layer: impl Into<String>, features: FeatureCollection) -> Self {
        self.insert(layer, features);
        self
    }

    pub fn insert(&mut self, layer: impl Into<String>, features: FeatureCollection) {
        self.layers.insert(layer.into(), features);
    }

    pub fn layer_names(&self) -> impl Iterator<Item = &str> {
        self.layers.keys().map(String::as_str)
    }

    /// Number of fetches served so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeatureSource for MemoryFeatureSource {
    async fn fetch(&self, layer: &str, extent: &Extent) -> Result<FeatureCollection, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.layers
            .get(layer)
            .map(|collection| collection.within(extent))
            .ok_or_else(|| FetchError::UnknownLayer(layer.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::geojson::{GeoJsonFeature, GeoJsonGeometry};

    #[tokio::test]
    async fn test_memory_source_fetch() {
        let source = MemoryFeatureSource::new().with_layer(
            "parks",
            FeatureCollection::new(vec![GeoJsonFeature::new(GeoJsonGeometry::Point {
                coordinates: [1.0, 1.0],
            })]),
        );

        let extent = Extent::new(0.0, 0.0, 2.0, 2.0);
        assert_eq!(source.fetch("parks", &extent).await.unwrap().len(), 1);
        assert_eq!(
            source.fetch("rivers", &extent).await,
            Err(FetchError::UnknownLayer("rivers".to_string()))
        );
        assert_eq!(source.fetch_count(), 2);
    }
}
