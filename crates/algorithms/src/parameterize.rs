//! Parameter propagation over the flow graph
//!
//! Fills quantities the source data leaves open by walking the directed
//! flow graph:
//!
//! - **target level** of a Basin from the minimum upstream level of the
//!   pumps and outlets right below it, with culverts following the chosen
//!   level; failing that from a level on its area rows, the cross-section
//!   of an adjacent water course or the bottom raster under the basin
//! - **capacity** of pumps and outlets from an inventory, or a specific
//!   discharge over the upstream basin area
//! - **rating curves** of weirs from the upstream basin level
//! - **Manning** length, width and slope from links and cross-sections
//!
//! Quantities already set are never overwritten. Every quantity that stays
//! open is recorded in the [`Diagnostics`] of the report.

use crate::forcing::mm_per_day_to_m_per_s;
use crate::statistics::zonal_statistics;
use geo::MultiPolygon;
use hydronet_core::config::{AuthorityConfig, FlowUnit};
use hydronet_core::model::{
    Adjacent, LinkKind, NodeData, NodeId, NodeType, Profile, RatingCurve, RatingRow,
};
use hydronet_core::raster::rasterize_polygons;
use hydronet_core::vector::FeatureCollection;
use hydronet_core::{Algorithm, Diagnostics, Error, Model, Raster, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

/// Minimum height of a weir crest above the basin bottom (m)
const CREST_CLEARANCE: f64 = 0.1;
/// Head over the crest at which a generated rating curve reaches capacity (m)
const RATING_HEAD: f64 = 1.0;

/// Parameters for propagation
#[derive(Debug, Clone)]
pub struct PropagationParams {
    /// Code prefixes marking an outlet or pump as a culvert
    pub culvert_prefixes: Vec<String>,
    /// Fallback level is bottom + (invert - bottom) / divisor
    pub profile_divisor: f64,
    /// Capacity fallback, mm/day over the upstream area
    pub specific_discharge: f64,
    pub manning_n: f64,
    /// Depth of generated basin profiles (m)
    pub depth_profile: f64,
    /// Capacity in m³/s per structure code
    pub inventory: BTreeMap<String, f64>,
    /// Mean water-course bottom under each basin, see [`basin_bottom_levels`]
    pub bottom_levels: BTreeMap<NodeId, f64>,
}

impl Default for PropagationParams {
    fn default() -> Self {
        Self {
            culvert_prefixes: vec!["DKR".into(), "KDU".into()],
            profile_divisor: 3.0,
            specific_discharge: 15.0,
            manning_n: 0.04,
            depth_profile: 2.0,
            inventory: BTreeMap::new(),
            bottom_levels: BTreeMap::new(),
        }
    }
}

impl PropagationParams {
    pub fn from_authority(config: &AuthorityConfig, inventory: BTreeMap<String, f64>) -> Self {
        Self {
            culvert_prefixes: config.culvert_prefixes.clone(),
            profile_divisor: config.profile_divisor,
            specific_discharge: config.specific_discharge,
            manning_n: config.manning_n,
            depth_profile: config.depth_profile,
            inventory,
            bottom_levels: BTreeMap::new(),
        }
    }

    fn is_culvert(&self, code: Option<&str>) -> bool {
        code.is_some_and(|c| self.culvert_prefixes.iter().any(|p| c.starts_with(p.as_str())))
    }
}

/// Structure capacities from an inventory layer (`code`, `flow_rate`), in m³/s
pub fn inventory_from_layer(layer: &FeatureCollection, unit: FlowUnit) -> BTreeMap<String, f64> {
    layer
        .iter()
        .filter_map(|f| Some((f.get_text("code")?, unit.to_m3s(f.get_f64("flow_rate")?))))
        .collect()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PropagationReport {
    /// Basins still without a target level
    pub unknown_basins: Vec<NodeId>,
    /// Basins without a target level or without any outflow
    pub internal_basins: Vec<NodeId>,
    pub diagnostics: Diagnostics,
}

impl PropagationReport {
    /// Fail on the first basin left without a target level
    pub fn require_target_levels(&self) -> Result<()> {
        match self.unknown_basins.first() {
            Some(id) => Err(Error::Unassigned {
                quantity: "target_level",
                kind: "Basin",
                id: id.to_string(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PropagationOutput {
    pub model: Model,
    pub report: PropagationReport,
}

/// Parameter propagation algorithm
#[derive(Debug, Clone, Default)]
pub struct PropagateParameters;

impl Algorithm for PropagateParameters {
    type Input = Model;
    type Output = PropagationOutput;
    type Params = PropagationParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Parameter propagation"
    }

    fn description(&self) -> &'static str {
        "Infer target levels, capacities, rating curves and Manning parameters along the flow graph"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        let mut model = input;
        let report = propagate(&mut model, &params)?;
        Ok(PropagationOutput { model, report })
    }
}

/// Run every propagation step in order.
pub fn propagate(model: &mut Model, params: &PropagationParams) -> Result<PropagationReport> {
    if !(params.profile_divisor.is_finite() && params.profile_divisor > 0.0) {
        return Err(Error::InvalidParameter {
            name: "profile_divisor",
            value: params.profile_divisor.to_string(),
            reason: "must be a positive number".into(),
        });
    }
    let mut diagnostics = Diagnostics::new();
    let unknown_basins = set_target_levels(model, params, &mut diagnostics)?;
    generate_basin_profiles(model, params.depth_profile, &mut diagnostics)?;
    set_initial_states(model, &mut diagnostics)?;
    set_flow_rates(model, params, &mut diagnostics)?;
    set_rating_curves(model, params, &mut diagnostics)?;
    set_manning(model, params, &mut diagnostics)?;
    let unknown_basins: Vec<NodeId> = unknown_basins
        .into_iter()
        .filter(|&id| target_level(model, id).is_none())
        .collect();
    let internal_basins = report_internal_basins(model);
    info!(
        "propagation done: {} basins without target level, {} diagnostics",
        unknown_basins.len(),
        diagnostics.len()
    );
    Ok(PropagationReport {
        unknown_basins,
        internal_basins,
        diagnostics,
    })
}

fn basin_ids(model: &Model) -> Vec<NodeId> {
    model.nodes_of_type(NodeType::Basin).map(|n| n.id).collect()
}

fn target_level(model: &Model, id: NodeId) -> Option<f64> {
    model.basin(id).ok().and_then(|b| b.target_level)
}

/// Pumps and outlets directly downstream of a node, with their level and culvert flag
fn downstream_structures(model: &Model, id: NodeId, params: &PropagationParams) -> Vec<(NodeId, Option<f64>, bool)> {
    model
        .graph()
        .downstream(id)
        .to_vec()
        .into_iter()
        .filter_map(|s| model.get_node(s))
        .filter_map(|n| {
            n.data.as_structure().map(|st| {
                (n.id, st.min_upstream_level, params.is_culvert(n.meta.code.as_deref()))
            })
        })
        .collect()
}

/// `bottom + depth / divisor` of the first profiled flow link leaving the
/// basin, else of the first one entering it
fn profile_fallback(model: &Model, id: NodeId, divisor: f64) -> Option<f64> {
    let profiled = |outgoing: bool| {
        model
            .incident_links(id)
            .filter(|l| l.kind == LinkKind::Flow && (l.from == id) == outgoing)
            .find_map(|l| model.link_profile(l))
    };
    profiled(true)
        .or_else(|| profiled(false))
        .map(|cs| cs.bottom_level + cs.depth() / divisor)
}

/// Fill missing Basin target levels and sync downstream culverts.
///
/// Sources in order: downstream non-culvert structures, any downstream
/// structure, a level on the basin's area rows, the water-course profile,
/// then `bottom + depth_profile / divisor` from the bottom raster.
/// Returns the basins that end without a level.
pub fn set_target_levels(
    model: &mut Model,
    params: &PropagationParams,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<NodeId>> {
    let mut levels: Vec<(NodeId, f64)> = Vec::new();
    let mut culverts: Vec<(NodeId, f64)> = Vec::new();
    let mut unknown = Vec::new();

    for id in basin_ids(model) {
        let structures = downstream_structures(model, id, params);
        let chosen = match target_level(model, id) {
            Some(level) => Some(level),
            None => {
                let min_of = |culvert: Option<bool>| {
                    structures
                        .iter()
                        .filter(|s| culvert.map_or(true, |c| s.2 == c))
                        .filter_map(|s| s.1)
                        .min_by(f64::total_cmp)
                };
                let from_structures = min_of(Some(false)).or_else(|| min_of(None));
                let from_area = model.areas_of(id).find_map(|a| a.target_level);
                let from_profile = profile_fallback(model, id, params.profile_divisor);
                let from_bottom = params
                    .bottom_levels
                    .get(&id)
                    .map(|bottom| bottom + params.depth_profile / params.profile_divisor);
                let level = from_structures.or(from_area).or(from_profile).or(from_bottom);
                match level {
                    Some(level) => {
                        if from_structures.is_none() {
                            let source = if from_area.is_some() {
                                "area"
                            } else if from_profile.is_some() {
                                "water-course profile"
                            } else {
                                "bottom raster"
                            };
                            diagnostics.info("target-level", id, format!("from {source}: {level:.3}"));
                        }
                        levels.push((id, level));
                    }
                    None => {
                        diagnostics.warn("target-level", id, "no downstream structure level, area level or profile");
                        unknown.push(id);
                    }
                }
                level
            }
        };
        if let Some(level) = chosen {
            culverts.extend(
                structures
                    .iter()
                    .filter(|s| s.2 && s.1 != Some(level))
                    .map(|s| (s.0, level)),
            );
        }
    }

    for (id, level) in levels {
        model.update_node_data(id, |data| {
            if let Some(basin) = data.as_basin_mut() {
                basin.target_level = Some(level);
            }
        })?;
    }
    for (id, level) in culverts {
        debug!("culvert {id} follows upstream level {level}");
        model.update_node_data(id, |data| {
            if let Some(st) = data.as_structure_mut() {
                st.min_upstream_level = Some(level);
            }
        })?;
    }
    Ok(unknown)
}

/// Mean of `bottom` over the cells whose centre lies in each basin's area.
///
/// Basins covering no cell centre are left out.
pub fn basin_bottom_levels(model: &Model, bottom: &Raster<f64>) -> Result<BTreeMap<NodeId, f64>> {
    let ids = basin_ids(model);
    let shapes: Vec<(i32, MultiPolygon<f64>)> = ids
        .iter()
        .enumerate()
        .map(|(i, &id)| (i as i32 + 1, model.basin_polygon(id)))
        .collect();
    let (rows, cols) = bottom.shape();
    let zones = rasterize_polygons(&shapes, *bottom.transform(), rows, cols);
    let levels: BTreeMap<NodeId, f64> = zonal_statistics(bottom, &zones)?
        .into_iter()
        .filter_map(|(zone, stats)| ids.get(zone as usize - 1).map(|&id| (id, stats.mean)))
        .collect();
    debug!("bottom level for {} of {} basins", levels.len(), ids.len());
    Ok(levels)
}

/// Build a two-row profile for basins without a valid one.
///
/// The level comes from the basin's target level, or else from a target
/// level carried by one of its area rows.
pub fn generate_basin_profiles(model: &mut Model, depth: f64, diagnostics: &mut Diagnostics) -> Result<()> {
    let mut profiles: Vec<(NodeId, Profile, Option<f64>)> = Vec::new();
    for id in basin_ids(model) {
        let basin = model.basin(id)?;
        if basin.profile.validate().is_ok() {
            continue;
        }
        let area_level = model.areas_of(id).find_map(|a| a.target_level);
        let Some(level) = basin.target_level.or(area_level) else {
            diagnostics.warn("profile", id, "no level to build a profile from");
            continue;
        };
        let polygon = model.basin_polygon(id);
        match Profile::from_area(&polygon, level, depth) {
            Ok(profile) => {
                let set_level = basin.target_level.is_none().then_some(level);
                profiles.push((id, profile, set_level));
            }
            Err(e) => diagnostics.warn("profile", id, format!("profile not built: {e}")),
        }
    }
    for (id, profile, level) in profiles {
        model.update_node_data(id, |data| {
            if let Some(basin) = data.as_basin_mut() {
                basin.profile = profile;
                if level.is_some() {
                    basin.target_level = level;
                }
            }
        })?;
    }
    Ok(())
}

/// Start basins without an initial level at their target level, kept
/// within the profile range
pub fn set_initial_states(model: &mut Model, diagnostics: &mut Diagnostics) -> Result<()> {
    let mut states = Vec::new();
    for id in basin_ids(model) {
        let basin = model.basin(id)?;
        if basin.state.is_some() {
            continue;
        }
        let (Some(bottom), Some(top)) = (basin.profile.bottom(), basin.profile.top()) else {
            continue;
        };
        match basin.target_level {
            Some(level) => states.push((id, level.clamp(bottom, top))),
            None => diagnostics.warn("state", id, "no target level for the initial state"),
        }
    }
    for (id, state) in states {
        model.update_node_data(id, |data| {
            if let Some(basin) = data.as_basin_mut() {
                basin.state = Some(state);
            }
        })?;
    }
    Ok(())
}

/// Polygon area of all basins upstream of a node, the node itself excluded
pub fn upstream_basin_area(model: &Model, id: NodeId) -> f64 {
    model
        .graph()
        .all_upstream(id)
        .into_iter()
        .filter(|&n| n != id && model.get_node(n).is_some_and(|n| n.node_type() == NodeType::Basin))
        .map(|n| geo::Area::unsigned_area(&model.basin_polygon(n)))
        .sum()
}

/// Capacity from the inventory, else specific discharge over the upstream area
fn capacity(model: &Model, id: NodeId, params: &PropagationParams) -> Option<f64> {
    let node = model.get_node(id)?;
    if let Some(q) = node.meta.code.as_ref().and_then(|c| params.inventory.get(c)) {
        return Some(*q);
    }
    let area = upstream_basin_area(model, id);
    (area > 0.0).then(|| mm_per_day_to_m_per_s(params.specific_discharge) * area)
}

/// Fill missing pump and outlet capacities
pub fn set_flow_rates(model: &mut Model, params: &PropagationParams, diagnostics: &mut Diagnostics) -> Result<()> {
    let mut rates = Vec::new();
    for node in model.nodes() {
        let Some(st) = node.data.as_structure() else {
            continue;
        };
        if st.flow_rate.is_some() {
            continue;
        }
        match capacity(model, node.id, params) {
            Some(q) => rates.push((node.id, q)),
            None => diagnostics.warn("flow-rate", node.id, "no inventory entry and no upstream basin area"),
        }
    }
    for (id, q) in rates {
        model.update_node_data(id, |data| {
            if let Some(st) = data.as_structure_mut() {
                st.flow_rate = Some(q);
            }
        })?;
    }
    Ok(())
}

/// Level right upstream of a node: a Basin target level or a LevelBoundary level
fn upstream_level(model: &Model, id: NodeId) -> Option<(Option<NodeId>, f64)> {
    let upstream = match model.graph().upstream(id) {
        Adjacent::One(n) => vec![n],
        Adjacent::Many(ns) => ns,
    };
    upstream.into_iter().find_map(|n| match &model.get_node(n)?.data {
        NodeData::Basin(b) => b.target_level.map(|l| (Some(n), l)),
        NodeData::LevelBoundary(lb) => lb.level.map(|l| (None, l)),
        _ => None,
    })
}

/// Generate a two-row rating curve for every empty TabulatedRatingCurve.
///
/// The crest sits at the upstream level, no lower than the basin bottom
/// plus 10 cm and no higher than its profile top. Flow reaches the
/// structure capacity one metre above the crest.
pub fn set_rating_curves(model: &mut Model, params: &PropagationParams, diagnostics: &mut Diagnostics) -> Result<()> {
    let mut curves = Vec::new();
    for node in model.nodes_of_type(NodeType::TabulatedRatingCurve) {
        if !matches!(&node.data, NodeData::TabulatedRatingCurve(c) if c.rows.is_empty()) {
            continue;
        }
        let Some((basin, level)) = upstream_level(model, node.id) else {
            diagnostics.warn("crest-level", node.id, "no upstream level");
            continue;
        };
        let mut crest = level;
        if let Some(profile) = basin.and_then(|b| model.basin(b).ok()).map(|b| &b.profile) {
            if let Some(bottom) = profile.bottom() {
                crest = crest.max(bottom + CREST_CLEARANCE);
            }
            if let Some(top) = profile.top() {
                crest = crest.min(top);
            }
        }
        let Some(q) = capacity(model, node.id, params) else {
            diagnostics.warn("flow-rate", node.id, "rating curve without capacity");
            continue;
        };
        curves.push((
            node.id,
            RatingCurve {
                rows: vec![
                    RatingRow { level: crest, flow_rate: 0.0 },
                    RatingRow {
                        level: crest + RATING_HEAD,
                        flow_rate: q,
                    },
                ],
            },
        ));
    }
    for (id, curve) in curves {
        model.update_node_data(id, |data| {
            if let NodeData::TabulatedRatingCurve(c) = data {
                *c = curve;
            }
        })?;
    }
    Ok(())
}

/// Fill missing Manning length, width, slope and roughness.
///
/// The width is the bottom width of the upstream water course, at least a
/// third of its top width; the slope is its side slope.
pub fn set_manning(model: &mut Model, params: &PropagationParams, diagnostics: &mut Diagnostics) -> Result<()> {
    let mut updates = Vec::new();
    for node in model.nodes_of_type(NodeType::ManningResistance) {
        let NodeData::ManningResistance(m) = &node.data else {
            continue;
        };
        let links: Vec<_> = model.incident_links(node.id).filter(|l| l.is_flow()).collect();
        let profile = links
            .iter()
            .filter(|l| l.to == node.id)
            .chain(links.iter().filter(|l| l.from == node.id))
            .find_map(|l| model.link_profile(l));

        let mut m = m.clone();
        if m.length.is_none() {
            let length = model.incident_length(node.id);
            if length > 0.0 {
                m.length = Some(length);
            } else {
                diagnostics.warn("manning", node.id, "no incident links to measure a length");
            }
        }
        match profile {
            Some(cs) => {
                if m.profile_width.is_none() {
                    m.profile_width = Some(cs.bottom_width.max(cs.invert_width / 3.0));
                }
                if m.profile_slope.is_none() {
                    m.profile_slope = cs.side_slope();
                }
            }
            None if m.profile_width.is_none() || m.profile_slope.is_none() => {
                diagnostics.warn("manning", node.id, "no cross-section for width and slope");
            }
            None => {}
        }
        if m.manning_n.is_none() {
            m.manning_n = Some(params.manning_n);
        }
        updates.push((node.id, m));
    }
    for (id, m) in updates {
        model.update_node_data(id, |data| {
            if let NodeData::ManningResistance(current) = data {
                *current = m;
            }
        })?;
    }
    Ok(())
}

/// Basins without a target level, plus basins with no outflow at all
pub fn report_internal_basins(model: &Model) -> Vec<NodeId> {
    let graph = model.graph();
    let internal: BTreeSet<NodeId> = model
        .nodes_of_type(NodeType::Basin)
        .filter(|n| {
            let no_level = n.data.as_basin().is_some_and(|b| b.target_level.is_none());
            no_level || graph.out_degree(n.id) == 0
        })
        .map(|n| n.id)
        .collect();
    internal.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::{MultiPolygon, Point};
    use hydronet_core::geometry::rectangle;
    use hydronet_core::model::{
        Basin, CrossSection, FlowBoundaryStatic, ManningStatic, NodeMeta, ProfileId, ProfileRow, StructureStatic,
    };

    fn structure(level: Option<f64>) -> StructureStatic {
        StructureStatic {
            min_upstream_level: level,
            ..StructureStatic::default()
        }
    }

    fn add(model: &mut Model, t: NodeType, x: f64, data: Option<NodeData>) -> NodeId {
        model.add_node(t, Point::new(x, 0.0), NodeMeta::default(), data).unwrap()
    }

    fn add_coded(model: &mut Model, t: NodeType, x: f64, code: &str, data: NodeData) -> NodeId {
        model
            .add_node(t, Point::new(x, 0.0), NodeMeta::default().with_code(code), Some(data))
            .unwrap()
    }

    fn flow(model: &mut Model, a: NodeId, b: NodeId) -> hydronet_core::model::LinkId {
        model.add_link(a, b, LinkKind::Flow, None).unwrap()
    }

    fn profile(model: &mut Model, bottom: f64, invert: f64) -> ProfileId {
        model.add_cross_section(CrossSection {
            id: ProfileId(0),
            bottom_level: bottom,
            invert_level: invert,
            bottom_width: 2.0,
            invert_width: 12.0,
        })
    }

    #[test]
    fn test_target_level_from_profile_fallback() {
        // boundary -> basin -> pump (no level) -> terminal; profile on the inflow
        let mut m = Model::new();
        let fb = add(
            &mut m,
            NodeType::FlowBoundary,
            -10.0,
            Some(NodeData::FlowBoundary(FlowBoundaryStatic { flow_rate: Some(1.0) })),
        );
        let b = add(&mut m, NodeType::Basin, 0.0, None);
        let p = add(&mut m, NodeType::Pump, 10.0, Some(NodeData::Pump(structure(None))));
        let t = add(&mut m, NodeType::Terminal, 20.0, None);
        let inflow = flow(&mut m, fb, b);
        flow(&mut m, b, p);
        flow(&mut m, p, t);
        let pid = profile(&mut m, 1.0, 4.0);
        m.set_link_profile(inflow, Some(pid)).unwrap();

        let mut diag = Diagnostics::new();
        let unknown = set_target_levels(&mut m, &PropagationParams::default(), &mut diag).unwrap();
        assert!(unknown.is_empty());
        assert_relative_eq!(m.basin(b).unwrap().target_level.unwrap(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_prefers_non_culvert_and_syncs_culverts() {
        let mut m = Model::new();
        let b = add(&mut m, NodeType::Basin, 0.0, None);
        let weir = add_coded(&mut m, NodeType::Outlet, 10.0, "KST1", NodeData::Outlet(structure(Some(-0.6))));
        let culvert = add_coded(&mut m, NodeType::Outlet, 10.0, "DKR9", NodeData::Outlet(structure(Some(-0.9))));
        let t = add(&mut m, NodeType::Terminal, 20.0, None);
        flow(&mut m, b, weir);
        flow(&mut m, b, culvert);
        flow(&mut m, weir, t);
        flow(&mut m, culvert, t);

        let mut diag = Diagnostics::new();
        set_target_levels(&mut m, &PropagationParams::default(), &mut diag).unwrap();
        assert_relative_eq!(m.basin(b).unwrap().target_level.unwrap(), -0.6);
        let culvert_level = m.node(culvert).unwrap().data.as_structure().unwrap().min_upstream_level;
        assert_eq!(culvert_level, Some(-0.6));
    }

    #[test]
    fn test_unknown_basin_is_reported() {
        let mut m = Model::new();
        let b = add(&mut m, NodeType::Basin, 0.0, None);
        let report = propagate(&mut m, &PropagationParams::default()).unwrap();
        assert_eq!(report.unknown_basins, vec![b]);
        assert_eq!(report.internal_basins, vec![b]);
        assert_eq!(report.diagnostics.by_rule("target-level").count(), 1);
        assert!(matches!(
            report.require_target_levels(),
            Err(Error::Unassigned { quantity: "target_level", .. })
        ));
    }

    #[test]
    fn test_target_level_from_area_row_only() {
        // basin -> pump (no level) -> terminal, the area row carries the level
        let mut m = Model::new();
        let b = add(&mut m, NodeType::Basin, 0.0, None);
        let p = add(&mut m, NodeType::Pump, 10.0, Some(NodeData::Pump(structure(None))));
        let t = add(&mut m, NodeType::Terminal, 20.0, None);
        flow(&mut m, b, p);
        flow(&mut m, p, t);
        m.add_area(MultiPolygon(vec![rectangle(-5.0, -5.0, 5.0, 5.0)]), Some(b), None, Some(-0.4))
            .unwrap();

        let report = propagate(&mut m, &PropagationParams::default()).unwrap();
        assert_eq!(m.basin(b).unwrap().target_level, Some(-0.4));
        assert!(report.unknown_basins.is_empty());
        assert!(report.internal_basins.is_empty());
        report.require_target_levels().unwrap();
    }

    #[test]
    fn test_target_level_from_bottom_raster() {
        let mut m = Model::new();
        let b = add(&mut m, NodeType::Basin, 5.0, None);
        let t = add(&mut m, NodeType::Terminal, 40.0, None);
        let p = add(&mut m, NodeType::Pump, 20.0, Some(NodeData::Pump(structure(None))));
        flow(&mut m, b, p);
        flow(&mut m, p, t);
        m.add_area(MultiPolygon(vec![rectangle(0.0, 0.0, 20.0, 10.0)]), Some(b), None, None)
            .unwrap();
        // two cells under the basin, one outside
        let mut bottom: Raster<f64> = Raster::from_vec(vec![-2.0, -1.0, 50.0], 1, 3).unwrap();
        bottom.set_transform(hydronet_core::GeoTransform::new(0.0, 10.0, 10.0, -10.0));

        let levels = basin_bottom_levels(&m, &bottom).unwrap();
        assert_relative_eq!(levels[&b], -1.5);

        let params = PropagationParams {
            bottom_levels: levels,
            ..PropagationParams::default()
        };
        let report = propagate(&mut m, &params).unwrap();
        assert!(report.unknown_basins.is_empty());
        assert_relative_eq!(m.basin(b).unwrap().target_level.unwrap(), -1.5 + 2.0 / 3.0, epsilon = 1e-9);
        assert_eq!(report.diagnostics.by_rule("target-level").count(), 1);
    }

    #[test]
    fn test_flow_rate_inventory_then_specific_discharge() {
        let mut m = Model::new();
        let b = add(&mut m, NodeType::Basin, 0.0, None);
        m.add_area(MultiPolygon(vec![rectangle(-50.0, -50.0, 50.0, 50.0)]), Some(b), None, None)
            .unwrap();
        let listed = add_coded(&mut m, NodeType::Pump, 10.0, "GM1", NodeData::Pump(structure(Some(0.0))));
        let other = add_coded(&mut m, NodeType::Outlet, 10.0, "KST2", NodeData::Outlet(structure(Some(0.0))));
        let t = add(&mut m, NodeType::Terminal, 20.0, None);
        for s in [listed, other] {
            flow(&mut m, b, s);
            flow(&mut m, s, t);
        }
        let params = PropagationParams {
            inventory: BTreeMap::from([("GM1".to_string(), 0.5)]),
            ..PropagationParams::default()
        };
        let mut diag = Diagnostics::new();
        set_flow_rates(&mut m, &params, &mut diag).unwrap();
        let rate = |id| m.node(id).unwrap().data.as_structure().unwrap().flow_rate.unwrap();
        assert_relative_eq!(rate(listed), 0.5);
        // 15 mm/day over 10 000 m²
        assert_relative_eq!(rate(other), 0.015 * 10_000.0 / 86_400.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rating_curve_crest_bounds() {
        let mut m = Model::new();
        let basin = Basin {
            target_level: Some(-2.0),
            ..Basin::with_profile(
                Profile::new(vec![
                    ProfileRow { level: -1.5, area: 10.0 },
                    ProfileRow { level: 0.5, area: 100.0 },
                ])
                .unwrap(),
            )
        };
        let b = add(&mut m, NodeType::Basin, 0.0, Some(NodeData::Basin(basin)));
        m.add_area(MultiPolygon(vec![rectangle(-10.0, -10.0, 10.0, 10.0)]), Some(b), None, None)
            .unwrap();
        let trc = add(
            &mut m,
            NodeType::TabulatedRatingCurve,
            10.0,
            Some(NodeData::TabulatedRatingCurve(RatingCurve::default())),
        );
        let t = add(&mut m, NodeType::Terminal, 20.0, None);
        flow(&mut m, b, trc);
        flow(&mut m, trc, t);

        let mut diag = Diagnostics::new();
        set_rating_curves(&mut m, &PropagationParams::default(), &mut diag).unwrap();
        let NodeData::TabulatedRatingCurve(curve) = &m.node(trc).unwrap().data else {
            panic!("not a rating curve");
        };
        assert_relative_eq!(curve.crest_level().unwrap(), -1.4, epsilon = 1e-9);
        assert!(curve.is_ordered());
        assert!(curve.rows[1].flow_rate > 0.0);
    }

    #[test]
    fn test_manning_from_links_and_profile() {
        let mut m = Model::new();
        let a = add(&mut m, NodeType::Basin, 0.0, None);
        let mr = add(
            &mut m,
            NodeType::ManningResistance,
            30.0,
            Some(NodeData::ManningResistance(ManningStatic::default())),
        );
        let b = add(&mut m, NodeType::Basin, 70.0, None);
        let inflow = flow(&mut m, a, mr);
        flow(&mut m, mr, b);
        let pid = profile(&mut m, -2.0, 0.0);
        m.set_link_profile(inflow, Some(pid)).unwrap();

        let mut diag = Diagnostics::new();
        set_manning(&mut m, &PropagationParams::default(), &mut diag).unwrap();
        let NodeData::ManningResistance(ms) = &m.node(mr).unwrap().data else {
            panic!("not a manning node");
        };
        assert_relative_eq!(ms.length.unwrap(), 70.0);
        // bottom width 2, floored at 12 / 3
        assert_relative_eq!(ms.profile_width.unwrap(), 4.0);
        // (12 - 2) / 2 / 2
        assert_relative_eq!(ms.profile_slope.unwrap(), 2.5);
        assert_relative_eq!(ms.manning_n.unwrap(), 0.04);
        assert!(diag.is_empty());
    }

    #[test]
    fn test_profiles_and_states_from_area_level() {
        let mut m = Model::new();
        let b = add(&mut m, NodeType::Basin, 0.0, None);
        m.add_area(MultiPolygon(vec![rectangle(-10.0, -10.0, 10.0, 10.0)]), Some(b), None, Some(-0.4))
            .unwrap();
        let mut diag = Diagnostics::new();
        generate_basin_profiles(&mut m, 2.0, &mut diag).unwrap();
        set_initial_states(&mut m, &mut diag).unwrap();
        let basin = m.basin(b).unwrap();
        assert_eq!(basin.profile.rows.len(), 2);
        assert_relative_eq!(basin.profile.top().unwrap(), -0.4);
        assert_eq!(basin.target_level, Some(-0.4));
        assert_eq!(basin.state, Some(-0.4));
        assert!(m.validate().is_empty());
    }

    #[test]
    fn test_existing_values_are_kept() {
        let mut m = Model::new();
        let b = add(&mut m, NodeType::Basin, 0.0, None);
        m.update_node_data(b, |d| {
            if let Some(basin) = d.as_basin_mut() {
                basin.target_level = Some(1.25);
            }
        })
        .unwrap();
        let p = add(&mut m, NodeType::Pump, 10.0, Some(NodeData::Pump(structure(Some(0.3)))));
        flow(&mut m, b, p);
        let mut diag = Diagnostics::new();
        set_target_levels(&mut m, &PropagationParams::default(), &mut diag).unwrap();
        assert_eq!(m.basin(b).unwrap().target_level, Some(1.25));
    }
}
