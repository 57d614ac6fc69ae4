//! Water-level zones (peilgebieden)
//!
//! A zone is a polygon with one target level. Zones feed the crossings
//! extractor and the aggregation engine, and are addressed by their
//! position in the zone list those steps share.

use geo::{Area, MultiPolygon, Polygon};
use hydronet_core::geometry::split_pinched;
use hydronet_core::model::Category;
use hydronet_core::vector::FeatureCollection;
use hydronet_core::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub code: String,
    pub geometry: MultiPolygon<f64>,
    #[serde(default)]
    pub target_level: Option<f64>,
    #[serde(default)]
    pub category: Option<Category>,
}

impl Zone {
    pub fn new(code: impl Into<String>, geometry: MultiPolygon<f64>) -> Self {
        Self {
            code: code.into(),
            geometry,
            target_level: None,
            category: None,
        }
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    pub fn with_target_level(mut self, level: f64) -> Self {
        self.target_level = Some(level);
        self
    }

    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }
}

/// Read zones from a zones layer (`code`, `target_level`, `category`).
///
/// Features without a polygon are skipped with a warning; an unknown
/// category is an error.
pub fn zones_from_layer(layer: &FeatureCollection) -> Result<Vec<Zone>> {
    let mut zones = Vec::with_capacity(layer.len());
    for (i, feature) in layer.iter().enumerate() {
        let code = feature.get_text("code").unwrap_or_else(|| format!("zone-{}", i + 1));
        let Some(geometry) = feature.multi_polygon() else {
            warn!("zone {code} has no polygon geometry, skipped");
            continue;
        };
        let category = feature
            .get_str("category")
            .map(str::parse::<Category>)
            .transpose()
            .map_err(|e| Error::Other(format!("zone {code}: {e}")))?;
        zones.push(Zone {
            code,
            geometry,
            target_level: feature.get_f64("target_level"),
            category,
        });
    }
    Ok(zones)
}

/// Split butterfly zones at their pinch points.
///
/// A pinched part becomes separate zones only when every lobe is larger
/// than `lobe_area`; otherwise the lobes stay together in the original
/// zone. Split-off lobes keep the code, level and category of their zone.
pub fn split_butterflies(zones: Vec<Zone>, lobe_area: f64) -> Vec<Zone> {
    let mut out = Vec::with_capacity(zones.len());
    for zone in zones {
        let mut kept: Vec<Polygon<f64>> = Vec::new();
        let mut lobes: Vec<Polygon<f64>> = Vec::new();
        for part in &zone.geometry.0 {
            let pieces = split_pinched(part);
            if pieces.len() > 1 && pieces.iter().all(|p| p.unsigned_area() > lobe_area) {
                debug!("zone {} split into {} lobes", zone.code, pieces.len());
                lobes.extend(pieces);
            } else {
                kept.push(part.clone());
            }
        }
        if lobes.is_empty() {
            out.push(zone);
            continue;
        }
        let template = Zone {
            geometry: MultiPolygon(vec![]),
            ..zone
        };
        if !kept.is_empty() {
            out.push(Zone {
                geometry: MultiPolygon(kept),
                ..template.clone()
            });
        }
        out.extend(lobes.into_iter().map(|lobe| Zone {
            geometry: MultiPolygon(vec![lobe]),
            ..template.clone()
        }));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::LineString;
    use hydronet_core::vector::{AttributeValue, Feature};

    fn butterfly(scale: f64) -> Polygon<f64> {
        // two squares sharing the vertex (scale, scale)
        let s = scale;
        Polygon::new(
            LineString::from(vec![
                (0.0, 0.0),
                (s, 0.0),
                (s, s),
                (2.0 * s, s),
                (2.0 * s, 2.0 * s),
                (s, 2.0 * s),
                (s, s),
                (0.0, s),
                (0.0, 0.0),
            ]),
            vec![],
        )
    }

    #[test]
    fn test_large_lobes_become_zones() {
        let zone = Zone::new("A", MultiPolygon(vec![butterfly(20.0)])).with_target_level(-0.4);
        let out = split_butterflies(vec![zone], 100.0);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|z| z.code == "A" && z.target_level == Some(-0.4)));
        assert!(out.iter().all(|z| (z.area() - 400.0).abs() < 1e-9));
    }

    #[test]
    fn test_small_lobes_stay_merged() {
        let zone = Zone::new("A", MultiPolygon(vec![butterfly(5.0)]));
        let out = split_butterflies(vec![zone], 100.0);
        assert_eq!(out.len(), 1);
        assert!((out[0].area() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_zones_from_layer() {
        let square = hydronet_core::geometry::rectangle(0.0, 0.0, 1.0, 1.0);
        let layer: FeatureCollection = vec![
            Feature::new(square.clone())
                .with("code", "PG1")
                .with("target_level", -0.5)
                .with("category", "hoofdwater"),
            Feature::new(square).with("category", AttributeValue::Null),
            Feature::empty().with("code", "no-geometry"),
        ]
        .into_iter()
        .collect();

        let zones = zones_from_layer(&layer).unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0].category, Some(Category::Hoofdwater));
        assert_eq!(zones[0].target_level, Some(-0.5));
        assert_eq!(zones[1].code, "zone-2");
        assert_eq!(zones[1].category, None);
    }
}
