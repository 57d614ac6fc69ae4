//! Assignment of candidate area polygons to Basin nodes
//!
//! Each candidate area ends up on exactly one Basin. The strategies run in
//! order and each only sees the areas the previous ones left over:
//!
//! 1. areas sharing a code go together to the basin they overlap most in total
//! 2. single areas go to the basin polygon they overlap most
//! 3. the same, against basin polygons grown with an alternative area layer
//! 4. the basin node nearest to the area centroid
//!
//! A manual code-to-basin table is applied last and wins. The assigned
//! areas are dissolved per basin and replace the model's area rows.

use geo::{Contains, MultiPolygon, Point};
use hydronet_core::geometry::{dissolve, union};
use hydronet_core::model::{NodeId, NodeType};
use hydronet_core::spatial::{centroid_coord, PointIndex, PolygonIndex};
use hydronet_core::vector::FeatureCollection;
use hydronet_core::{Algorithm, Diagnostics, Error, Model, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// A polygon waiting for a basin
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateArea {
    pub code: Option<String>,
    pub geometry: MultiPolygon<f64>,
}

/// Candidate areas from a layer with an optional `code` column
pub fn candidates_from_layer(layer: &FeatureCollection) -> Vec<CandidateArea> {
    layer
        .iter()
        .filter_map(|f| {
            f.multi_polygon().map(|geometry| CandidateArea {
                code: f.get_text("code"),
                geometry,
            })
        })
        .collect()
}

/// Strategy that settled an area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignedBy {
    Code,
    Overlap,
    Alternative,
    Nearest,
    Override,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentReport {
    /// Basin and strategy per candidate area, in input order
    pub assigned: Vec<(NodeId, AssignedBy)>,
    pub diagnostics: Diagnostics,
}

impl AssignmentReport {
    pub fn count(&self, by: AssignedBy) -> usize {
        self.assigned.iter().filter(|(_, b)| *b == by).count()
    }
}

/// Parameters for area assignment
#[derive(Debug, Clone)]
pub struct AssignmentParams {
    /// Parts below this area are dropped after dissolving (m²)
    pub sliver_area: f64,
}

impl Default for AssignmentParams {
    fn default() -> Self {
        Self { sliver_area: 1.0 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssignmentInput {
    pub model: Model,
    pub areas: Vec<CandidateArea>,
    pub alternative: Option<Vec<MultiPolygon<f64>>>,
    /// Area code to basin, applied last
    pub overrides: BTreeMap<String, NodeId>,
}

#[derive(Debug, Clone)]
pub struct AssignmentOutput {
    pub model: Model,
    pub report: AssignmentReport,
}

/// Basin–area assignment algorithm
#[derive(Debug, Clone, Default)]
pub struct AssignBasinAreas;

impl Algorithm for AssignBasinAreas {
    type Input = AssignmentInput;
    type Output = AssignmentOutput;
    type Params = AssignmentParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Area assignment"
    }

    fn description(&self) -> &'static str {
        "Assign candidate area polygons to Basin nodes and dissolve them per basin"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        let AssignmentInput {
            mut model,
            areas,
            alternative,
            overrides,
        } = input;
        let report = assign_basin_areas(&mut model, &areas, alternative.as_deref(), &overrides, &params)?;
        Ok(AssignmentOutput { model, report })
    }
}

/// Most-overlapping basin for each unassigned area
fn by_overlap(
    index: &PolygonIndex,
    areas: &[CandidateArea],
    basins: &[(NodeId, Point<f64>)],
    assigned: &mut [Option<(NodeId, AssignedBy)>],
    by: AssignedBy,
) {
    for (i, area) in areas.iter().enumerate() {
        if assigned[i].is_some() {
            continue;
        }
        if let Some((idx, _)) = index.most_overlapping(&area.geometry) {
            assigned[i] = Some((basins[idx].0, by));
        }
    }
}

/// Assign `areas` to the model's basins and replace its area rows.
pub fn assign_basin_areas(
    model: &mut Model,
    areas: &[CandidateArea],
    alternative: Option<&[MultiPolygon<f64>]>,
    overrides: &BTreeMap<String, NodeId>,
    params: &AssignmentParams,
) -> Result<AssignmentReport> {
    let basins: Vec<(NodeId, Point<f64>)> = model
        .nodes_of_type(NodeType::Basin)
        .map(|n| (n.id, n.geometry))
        .collect();
    if basins.is_empty() {
        return Err(Error::not_found("basin", "any"));
    }
    let mut diagnostics = Diagnostics::new();
    let polygons: Vec<MultiPolygon<f64>> = basins.iter().map(|(id, _)| model.basin_polygon(*id)).collect();
    let index = PolygonIndex::new(polygons.clone());
    let mut assigned: Vec<Option<(NodeId, AssignedBy)>> = vec![None; areas.len()];

    let mut by_code: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for (i, area) in areas.iter().enumerate() {
        if let Some(code) = area.code.as_deref() {
            by_code.entry(code).or_default().push(i);
        }
    }
    for members in by_code.values() {
        let mut totals: BTreeMap<usize, f64> = BTreeMap::new();
        for &i in members {
            for (idx, overlap) in index.overlaps(&areas[i].geometry) {
                *totals.entry(idx).or_default() += overlap;
            }
        }
        let best = totals
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)));
        if let Some((idx, _)) = best {
            for &i in members {
                assigned[i] = Some((basins[idx].0, AssignedBy::Code));
            }
        }
    }

    by_overlap(&index, areas, &basins, &mut assigned, AssignedBy::Overlap);

    if let Some(alternative) = alternative {
        if assigned.iter().any(Option::is_none) {
            let mut grown = polygons;
            for alt in alternative {
                let inside: Vec<usize> = basins
                    .iter()
                    .enumerate()
                    .filter(|(_, (_, p))| alt.contains(p))
                    .map(|(idx, _)| idx)
                    .collect();
                if let [idx] = inside.as_slice() {
                    grown[*idx] = union(&grown[*idx], alt);
                }
            }
            let grown_index = PolygonIndex::new(grown);
            by_overlap(&grown_index, areas, &basins, &mut assigned, AssignedBy::Alternative);
        }
    }

    let points = PointIndex::new(basins.iter().map(|(id, p)| (*p, *id)));
    for (i, area) in areas.iter().enumerate() {
        if assigned[i].is_some() {
            continue;
        }
        let nearest = centroid_coord(&area.geometry).and_then(|c| points.nearest(Point(c)));
        match nearest {
            Some((id, distance)) => {
                debug!("area {i} assigned to nearest basin {id} at {distance:.1} m");
                assigned[i] = Some((id, AssignedBy::Nearest));
            }
            None => diagnostics.warn("area-basin", i, "area has no centroid"),
        }
    }

    for (i, area) in areas.iter().enumerate() {
        let Some(target) = area.code.as_ref().and_then(|c| overrides.get(c)) else {
            continue;
        };
        if model.basin(*target).is_err() {
            diagnostics.warn("area-basin", target, format!("override for area {i} names no basin"));
            continue;
        }
        assigned[i] = Some((*target, AssignedBy::Override));
    }

    let rows: Vec<(NodeId, MultiPolygon<f64>)> = areas
        .iter()
        .zip(&assigned)
        .filter_map(|(area, a)| a.map(|(id, _)| (id, area.geometry.clone())))
        .collect();
    let dissolved = dissolve(&rows, params.sliver_area);
    for (id, _) in &basins {
        if !dissolved.contains_key(id) {
            diagnostics.warn("area-basin", id, "basin received no area");
        }
    }
    model.replace_areas(dissolved.into_iter().collect())?;

    let report = AssignmentReport {
        assigned: assigned.into_iter().flatten().collect(),
        diagnostics,
    };
    info!(
        "assigned {} areas: {} by code, {} by overlap, {} by alternative, {} nearest, {} overridden",
        report.assigned.len(),
        report.count(AssignedBy::Code),
        report.count(AssignedBy::Overlap),
        report.count(AssignedBy::Alternative),
        report.count(AssignedBy::Nearest),
        report.count(AssignedBy::Override),
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::Area;
    use hydronet_core::geometry::rectangle;
    use hydronet_core::model::NodeMeta;

    fn mp(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![rectangle(x0, y0, x1, y1)])
    }

    fn area(code: Option<&str>, geometry: MultiPolygon<f64>) -> CandidateArea {
        CandidateArea {
            code: code.map(str::to_string),
            geometry,
        }
    }

    /// Basins at (5,5) and (15,5) owning the two halves of a 20x10 strip
    fn model() -> (Model, NodeId, NodeId) {
        let mut m = Model::new();
        let a = m
            .add_node(NodeType::Basin, Point::new(5.0, 5.0), NodeMeta::default(), None)
            .unwrap();
        let b = m
            .add_node(NodeType::Basin, Point::new(15.0, 5.0), NodeMeta::default(), None)
            .unwrap();
        m.add_area(mp(0.0, 0.0, 10.0, 10.0), Some(a), None, None).unwrap();
        m.add_area(mp(10.0, 0.0, 20.0, 10.0), Some(b), None, None).unwrap();
        (m, a, b)
    }

    fn basin_area(m: &Model, id: NodeId) -> f64 {
        m.basin_polygon(id).unsigned_area()
    }

    #[test]
    fn test_code_group_follows_total_overlap() {
        let (mut m, a, b) = model();
        // X-2 alone overlaps b more, but the X group overlaps a more
        let areas = vec![
            area(Some("X"), mp(0.0, 0.0, 8.0, 10.0)),
            area(Some("X"), mp(8.0, 0.0, 13.0, 10.0)),
            area(None, mp(13.0, 0.0, 20.0, 10.0)),
        ];
        let report = assign_basin_areas(&mut m, &areas, None, &BTreeMap::new(), &AssignmentParams::default()).unwrap();
        assert_eq!(report.assigned[0], (a, AssignedBy::Code));
        assert_eq!(report.assigned[1], (a, AssignedBy::Code));
        assert_eq!(report.assigned[2], (b, AssignedBy::Overlap));
        assert_relative_eq!(basin_area(&m, a), 130.0, epsilon = 1e-6);
        assert_relative_eq!(basin_area(&m, b), 70.0, epsilon = 1e-6);
        assert_eq!(m.unassigned_areas().count(), 0);
        assert_eq!(m.areas().count(), 2);
    }

    #[test]
    fn test_alternative_then_nearest() {
        let (mut m, a, b) = model();
        let areas = vec![
            // outside both basins, inside the alternative polygon around b
            area(None, mp(15.0, 20.0, 18.0, 25.0)),
            // far away, nearest node is a
            area(None, mp(-50.0, 0.0, -40.0, 10.0)),
        ];
        let alternative = vec![mp(10.0, 0.0, 20.0, 30.0)];
        let report = assign_basin_areas(
            &mut m,
            &areas,
            Some(&alternative),
            &BTreeMap::new(),
            &AssignmentParams::default(),
        )
        .unwrap();
        assert_eq!(report.assigned[0], (b, AssignedBy::Alternative));
        assert_eq!(report.assigned[1], (a, AssignedBy::Nearest));
    }

    #[test]
    fn test_override_wins() {
        let (mut m, a, b) = model();
        let areas = vec![area(Some("P7"), mp(1.0, 1.0, 4.0, 4.0)), area(None, mp(12.0, 0.0, 20.0, 10.0))];
        let overrides = BTreeMap::from([("P7".to_string(), b)]);
        let report = assign_basin_areas(&mut m, &areas, None, &overrides, &AssignmentParams::default()).unwrap();
        assert_eq!(report.assigned[0], (b, AssignedBy::Override));
        // a lost all its area
        assert_eq!(m.areas_of(a).count(), 0);
        assert_eq!(report.diagnostics.by_rule("area-basin").count(), 1);
    }

    #[test]
    fn test_no_basins() {
        let mut m = Model::new();
        let err = assign_basin_areas(&mut m, &[], None, &BTreeMap::new(), &AssignmentParams::default()).unwrap_err();
        assert!(err.is_not_found());
    }
}
