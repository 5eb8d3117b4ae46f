use std::fs;

use camino::Utf8Path;
use geo_types::Geometry;
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use serde_json::{Value, json};

use crate::crs::Crs;
use crate::error::EtlError;

/// One row of a tract table: attributes plus an optional geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct TractFeature {
    pub properties: JsonObject,
    pub geometry: Option<Geometry<f64>>,
}

impl TractFeature {
    pub fn attribute(&self, column: &str) -> Option<&Value> {
        self.properties.get(column)
    }
}

/// In-memory table of tract features sharing one CRS. This is the content of
/// a normalized geometry file and of the national assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub crs: Crs,
    pub features: Vec<TractFeature>,
}

impl FeatureTable {
    pub fn new(crs: Crs) -> Self {
        Self {
            crs,
            features: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.features
            .iter()
            .any(|feature| feature.properties.contains_key(column))
    }

    /// Serializes as a GeoJSON FeatureCollection. The CRS travels in a
    /// legacy `crs` member so that normalized files keep their source datum.
    pub fn to_geojson_bytes(&self) -> Result<Vec<u8>, EtlError> {
        let features = self
            .features
            .iter()
            .map(|feature| Feature {
                bbox: None,
                geometry: feature
                    .geometry
                    .as_ref()
                    .map(|geometry| geojson::Geometry::new(geojson::Value::from(geometry))),
                id: None,
                properties: Some(feature.properties.clone()),
                foreign_members: None,
            })
            .collect();

        let mut foreign_members = JsonObject::new();
        foreign_members.insert(
            "crs".to_string(),
            json!({ "type": "name", "properties": { "name": self.crs.urn() } }),
        );
        let collection = FeatureCollection {
            bbox: None,
            features,
            foreign_members: Some(foreign_members),
        };
        serde_json::to_vec(&collection).map_err(|err| EtlError::Filesystem(err.to_string()))
    }

    pub fn from_geojson_str(text: &str, path: &Utf8Path) -> Result<Self, EtlError> {
        let read_err = |message: String| EtlError::NormalizedRead {
            path: path.to_path_buf(),
            message,
        };
        let geojson: GeoJson = text.parse().map_err(|err: geojson::Error| read_err(err.to_string()))?;
        let GeoJson::FeatureCollection(collection) = geojson else {
            return Err(read_err("expected a FeatureCollection".to_string()));
        };

        // RFC 7946 files without a crs member are WGS84.
        let crs = match collection
            .foreign_members
            .as_ref()
            .and_then(|members| members.get("crs"))
            .and_then(|crs| crs.pointer("/properties/name"))
            .and_then(Value::as_str)
        {
            Some(name) => Crs::from_name(name)?,
            None => Crs::Wgs84,
        };

        let mut features = Vec::with_capacity(collection.features.len());
        for feature in collection.features {
            let geometry = match feature.geometry {
                Some(geometry) => Some(
                    Geometry::<f64>::try_from(geometry).map_err(|err| read_err(err.to_string()))?,
                ),
                None => None,
            };
            features.push(TractFeature {
                properties: feature.properties.unwrap_or_default(),
                geometry,
            });
        }
        Ok(Self { crs, features })
    }

    pub fn read_normalized(path: &Utf8Path) -> Result<Self, EtlError> {
        let text = fs::read_to_string(path.as_std_path()).map_err(|err| EtlError::NormalizedRead {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Self::from_geojson_str(&text, path)
    }
}
