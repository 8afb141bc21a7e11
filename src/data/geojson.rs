//! GeoJSON-shaped feature collections, as returned by feature services in
//! projected (EPSG:3857) coordinates.

use crate::core::bounds::Extent;
use geo::BoundingRect;
use geo_types::{
    Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon, Point,
    Polygon,
};
use serde::{Deserialize, Serialize};

/// GeoJSON geometry types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeoJsonGeometry {
    Point {
        coordinates: [f64; 2],
    },
    LineString {
        coordinates: Vec<[f64; 2]>,
    },
    Polygon {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPoint {
        coordinates: Vec<[f64; 2]>,
    },
    MultiLineString {
        coordinates: Vec<Vec<[f64; 2]>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<[f64; 2]>>>,
    },
    GeometryCollection {
        geometries: Vec<GeoJsonGeometry>,
    },
}

fn polygon(rings: &[Vec<[f64; 2]>]) -> Polygon<f64> {
    let mut rings = rings.iter().map(|ring| LineString::from(ring.clone()));
    let exterior = rings.next().unwrap_or_else(|| LineString::new(Vec::new()));
    Polygon::new(exterior, rings.collect())
}

impl GeoJsonGeometry {
    /// Converts into a `geo` geometry for spatial predicates
    pub fn to_geo(&self) -> Geometry<f64> {
        match self {
            GeoJsonGeometry::Point { coordinates } => {
                Geometry::Point(Point::new(coordinates[0], coordinates[1]))
            }
            GeoJsonGeometry::LineString { coordinates } => {
                Geometry::LineString(LineString::from(coordinates.clone()))
            }
            GeoJsonGeometry::Polygon { coordinates } => Geometry::Polygon(polygon(coordinates)),
            GeoJsonGeometry::MultiPoint { coordinates } => Geometry::MultiPoint(MultiPoint(
                coordinates.iter().map(|c| Point::new(c[0], c[1])).collect(),
            )),
            GeoJsonGeometry::MultiLineString { coordinates } => {
                Geometry::MultiLineString(MultiLineString(
                    coordinates
                        .iter()
                        .map(|line| LineString::from(line.clone()))
                        .collect(),
                ))
            }
            GeoJsonGeometry::MultiPolygon { coordinates } => Geometry::MultiPolygon(
                MultiPolygon(coordinates.iter().map(|rings| polygon(rings)).collect()),
            ),
            GeoJsonGeometry::GeometryCollection { geometries } => Geometry::GeometryCollection(
                GeometryCollection(geometries.iter().map(|g| g.to_geo()).collect()),
            ),
        }
    }

    /// Bounding extent, `None` for empty geometries
    pub fn extent(&self) -> Option<Extent> {
        self.to_geo().bounding_rect().map(Extent::from)
    }
}

/// GeoJSON feature with geometry and properties
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoJsonFeature {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    pub geometry: Option<GeoJsonGeometry>,
    #[serde(default)]
    pub properties: Option<serde_json::Map<String, serde_json::Value>>,
}

impl GeoJsonFeature {
    pub fn new(geometry: GeoJsonGeometry) -> Self {
        Self {
            id: None,
            geometry: Some(geometry),
            properties: None,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.properties
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value);
        self
    }

    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.as_ref().and_then(|props| props.get(key))
    }

    /// A property read as a number; numeric strings are accepted too
    pub fn number_property(&self, key: &str) -> Option<f64> {
        match self.property(key)? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn string_property(&self, key: &str) -> Option<String> {
        match self.property(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Root GeoJSON object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum GeoJson {
    Feature(GeoJsonFeature),
    FeatureCollection { features: Vec<GeoJsonFeature> },
    Geometry(GeoJsonGeometry),
}

/// The result shape of every feature fetch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    pub features: Vec<GeoJsonFeature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<GeoJsonFeature>) -> Self {
        Self { features }
    }

    /// Parses any GeoJSON document; a bare geometry becomes a single feature
    pub fn from_geojson_str(json: &str) -> Result<Self, serde_json::Error> {
        let features = match serde_json::from_str::<GeoJson>(json)? {
            GeoJson::FeatureCollection { features } => features,
            GeoJson::Feature(feature) => vec![feature],
            GeoJson::Geometry(geometry) => vec![GeoJsonFeature::new(geometry)],
        };
        Ok(Self { features })
    }

    pub fn to_geojson(&self) -> GeoJson {
        GeoJson::FeatureCollection {
            features: self.features.clone(),
        }
    }

    /// Features whose bounding extent touches `extent`
    pub fn within(&self, extent: &Extent) -> FeatureCollection {
        FeatureCollection::new(
            self.features
                .iter()
                .filter(|f| {
                    f.geometry
                        .as_ref()
                        .and_then(|g| g.extent())
                        .map_or(false, |e| e.intersects(extent))
                })
                .cloned()
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, size: f64) -> GeoJsonGeometry {
        GeoJsonGeometry::Polygon {
            coordinates: vec![vec![
                [x0, y0],
                [x0 + size, y0],
                [x0 + size, y0 + size],
                [x0, y0 + size],
                [x0, y0],
            ]],
        }
    }

    #[test]
    fn test_feature_collection_parsing() {
        let json = r#"
        {
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "properties": {"code": 4, "name": "Woodland"},
                    "geometry": {
                        "type": "Point",
                        "coordinates": [100.0, 200.0]
                    }
                }
            ]
        }
        "#;

        let collection = FeatureCollection::from_geojson_str(json).unwrap();
        assert_eq!(collection.len(), 1);
        let feature = &collection.features[0];
        assert_eq!(feature.number_property("code"), Some(4.0));
        assert_eq!(feature.string_property("name").as_deref(), Some("Woodland"));
    }

    #[test]
    fn test_bare_geometry_becomes_feature() {
        let json = r#"{"type": "Point", "coordinates": [1.0, 2.0]}"#;
        let collection = FeatureCollection::from_geojson_str(json).unwrap();
        assert_eq!(collection.len(), 1);
    }

    #[test]
    fn test_geometry_extent() {
        let extent = square(10.0, 20.0, 5.0).extent().unwrap();
        assert_eq!(extent, Extent::new(10.0, 20.0, 15.0, 25.0));
    }

    #[test]
    fn test_within_filters_by_extent() {
        let collection = FeatureCollection::new(vec![
            GeoJsonFeature::new(square(0.0, 0.0, 1.0)),
            GeoJsonFeature::new(square(100.0, 100.0, 1.0)),
        ]);
        let nearby = collection.within(&Extent::new(-5.0, -5.0, 5.0, 5.0));
        assert_eq!(nearby.len(), 1);
    }

    #[test]
    fn test_numeric_string_property() {
        let feature = GeoJsonFeature::new(square(0.0, 0.0, 1.0))
            .with_property("density", serde_json::json!(" 12.5 "));
        assert_eq!(feature.number_property("density"), Some(12.5));
    }
}
