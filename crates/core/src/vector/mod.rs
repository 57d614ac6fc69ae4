//! Vector layers: features with a geometry and typed attributes
//!
//! Layers are stored as JSON feature collections. A file either holds one
//! collection or a package of named collections (edit logs). Column sets
//! are checked on load with [`FeatureCollection::require_columns`].

use crate::error::{Error, Result};
use geo::{Geometry, LineString, MultiLineString, MultiPolygon, Point};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Attribute value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            AttributeValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            AttributeValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            AttributeValue::Int(v) => Some(*v != 0),
            AttributeValue::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}

/// A geographic feature with geometry and attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(default)]
    pub geometry: Option<Geometry<f64>>,
    #[serde(default)]
    pub properties: BTreeMap<String, AttributeValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Feature {
    pub fn new(geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            geometry: Some(geometry.into()),
            properties: BTreeMap::new(),
            id: None,
        }
    }

    /// Feature without geometry, e.g. an attribute-only edit row
    pub fn empty() -> Self {
        Self {
            geometry: None,
            properties: BTreeMap::new(),
            id: None,
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.set_property(key, value.into());
        self
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.properties.insert(key.into(), value);
    }

    pub fn get_property(&self, key: &str) -> Option<&AttributeValue> {
        self.properties.get(key).filter(|v| !v.is_null())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get_property(key).and_then(AttributeValue::as_f64)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get_property(key).and_then(AttributeValue::as_i64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get_property(key).and_then(AttributeValue::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get_property(key).and_then(AttributeValue::as_bool)
    }

    /// Attribute as text, numbers included
    pub fn get_text(&self, key: &str) -> Option<String> {
        match self.get_property(key)? {
            AttributeValue::String(s) => Some(s.clone()),
            AttributeValue::Int(v) => Some(v.to_string()),
            AttributeValue::Float(v) => Some(v.to_string()),
            AttributeValue::Bool(v) => Some(v.to_string()),
            AttributeValue::Null => None,
        }
    }

    pub fn point(&self) -> Option<Point<f64>> {
        match self.geometry.as_ref()? {
            Geometry::Point(p) => Some(*p),
            Geometry::MultiPoint(mp) if mp.0.len() == 1 => Some(mp.0[0]),
            _ => None,
        }
    }

    /// Line parts of a (multi)line geometry
    pub fn lines(&self) -> Vec<LineString<f64>> {
        match &self.geometry {
            Some(Geometry::LineString(l)) => vec![l.clone()],
            Some(Geometry::MultiLineString(MultiLineString(ls))) => ls.clone(),
            _ => Vec::new(),
        }
    }

    /// Polygonal geometry as a multi-polygon
    pub fn multi_polygon(&self) -> Option<MultiPolygon<f64>> {
        match self.geometry.as_ref()? {
            Geometry::Polygon(p) => Some(MultiPolygon(vec![p.clone()])),
            Geometry::MultiPolygon(mp) => Some(mp.clone()),
            Geometry::Rect(r) => Some(MultiPolygon(vec![r.to_polygon()])),
            _ => None,
        }
    }
}

/// Collection of features
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(default)]
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new() -> Self {
        Self { features: Vec::new() }
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// Fail unless every feature carries every column (nulls allowed)
    pub fn require_columns(&self, layer: &str, columns: &[&str]) -> Result<()> {
        for (row, feature) in self.features.iter().enumerate() {
            if let Some(missing) = columns.iter().find(|c| !feature.properties.contains_key(**c)) {
                return Err(Error::InvalidParameter {
                    name: "layer",
                    value: layer.to_string(),
                    reason: format!("row {row} lacks column '{missing}'"),
                });
            }
        }
        Ok(())
    }

    /// Fail unless every feature has a geometry of the expected kind
    pub fn require_geometry(&self, layer: &str, kind: GeometryKind) -> Result<()> {
        for (row, feature) in self.features.iter().enumerate() {
            let ok = match kind {
                GeometryKind::Point => feature.point().is_some(),
                GeometryKind::Line => !feature.lines().is_empty(),
                GeometryKind::Polygon => feature.multi_polygon().is_some(),
            };
            if !ok {
                return Err(Error::Geometry(format!(
                    "layer {layer} row {row}: expected {kind:?} geometry"
                )));
            }
        }
        Ok(())
    }
}

impl IntoIterator for FeatureCollection {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}

impl FromIterator<Feature> for FeatureCollection {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        Self {
            features: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryKind {
    Point,
    Line,
    Polygon,
}

/// Input layers the build phases read, with their schema
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// Water-level zones (peilgebieden)
    Zones,
    /// Hydro-object centre lines
    HydroLines,
    /// Lines that absorb crossings lying along them
    FilterLines,
    /// Candidate basin area polygons
    Areas,
    /// Structure inventory keyed by code
    Inventory,
}

impl LayerKind {
    pub fn geometry(self) -> Option<GeometryKind> {
        match self {
            LayerKind::Zones | LayerKind::Areas => Some(GeometryKind::Polygon),
            LayerKind::HydroLines | LayerKind::FilterLines => Some(GeometryKind::Line),
            LayerKind::Inventory => None,
        }
    }

    pub fn columns(self) -> &'static [&'static str] {
        match self {
            LayerKind::Zones => &["code", "target_level", "category"],
            LayerKind::HydroLines => &[],
            LayerKind::FilterLines => &[],
            LayerKind::Areas => &["code"],
            LayerKind::Inventory => &["code", "flow_rate"],
        }
    }
}

/// Read one feature collection
pub fn read_collection(path: &Path) -> Result<FeatureCollection> {
    crate::io::read_json(path)
}

/// Read a layer and check it against its schema
pub fn read_layer(path: &Path, kind: LayerKind) -> Result<FeatureCollection> {
    let layer = read_collection(path)?;
    let name = path.display().to_string();
    layer.require_columns(&name, kind.columns())?;
    if let Some(geometry) = kind.geometry() {
        layer.require_geometry(&name, geometry)?;
    }
    Ok(layer)
}

/// Read a package of named layers
pub fn read_package(path: &Path) -> Result<BTreeMap<String, FeatureCollection>> {
    crate::io::read_json(path)
}

pub fn write_collection(path: &Path, layer: &FeatureCollection) -> Result<()> {
    crate::io::write_json_atomic(path, layer)
}
