//! Network model: typed node, link and basin tables
//!
//! The tables are private. Reads go through accessors and every write goes
//! through the mutation API in [`mutate`], which keeps identifiers unique,
//! link endpoints valid, flow links within the permitted type pairs and
//! basin areas tied to Basin nodes.

mod basin;
mod graph;
mod ids;
mod link;
mod mutate;
mod node;

pub use basin::{Basin, BasinArea, BasinForcing, BasinTimeRow, Profile, ProfileRow};
pub use graph::{Adjacent, NetworkGraph};
pub use ids::{AreaId, LinkId, NodeId, ProfileId};
pub use link::{can_connect, control_neighbours, flow_neighbours, CrossSection, Link, LinkKind};
pub use mutate::AreaFixMethod;
pub use node::{
    Category, DiscreteControlStatic, FlowBoundaryStatic, FlowDemandStatic, LevelBoundaryStatic,
    LevelDemandStatic, ManningStatic, Node, NodeData, NodeMeta, NodeType, RatingCurve, RatingRow,
    StructureFunction, StructureStatic,
};

use crate::error::{Error, Result};
use crate::spatial::PointIndex;
use geo::{Contains, MultiPolygon, Point};
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet};

/// Serialized form of the model tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Database {
    #[serde(default)]
    pub node: Vec<Node>,
    #[serde(default)]
    pub link: Vec<Link>,
    #[serde(default, rename = "basin.area")]
    pub basin_area: Vec<BasinArea>,
    #[serde(default, rename = "basin.time")]
    pub basin_time: Vec<BasinTimeRow>,
    #[serde(default)]
    pub profile: Vec<CrossSection>,
}

/// A broken invariant found by [`Model::validate`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub rule: String,
    pub id: String,
    pub message: String,
}

impl Violation {
    fn new(rule: &'static str, id: impl ToString, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            id: id.to_string(),
            message: message.into(),
        }
    }

    /// Topology rules that no later build phase can repair
    pub fn is_structural(&self) -> bool {
        matches!(
            self.rule.as_str(),
            "unique-id" | "link-endpoints" | "type-pair" | "duplicate-pair" | "row-consistency"
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct Model {
    nodes: BTreeMap<NodeId, Node>,
    links: BTreeMap<LinkId, Link>,
    areas: BTreeMap<AreaId, BasinArea>,
    cross_sections: BTreeMap<ProfileId, CrossSection>,
    basin_time: Vec<BasinTimeRow>,
    graph: OnceCell<NetworkGraph>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load tables, rejecting duplicate identifiers.
    pub fn from_database(db: Database) -> Result<Self> {
        let mut model = Model::new();
        for node in db.node {
            if model.nodes.insert(node.id, node.clone()).is_some() {
                return Err(Error::invariant("unique-id", format!("duplicate node id {}", node.id)));
            }
        }
        for link in db.link {
            if model.links.insert(link.id, link.clone()).is_some() {
                return Err(Error::invariant("unique-id", format!("duplicate link id {}", link.id)));
            }
        }
        for area in db.basin_area {
            if model.areas.insert(area.id, area.clone()).is_some() {
                return Err(Error::invariant("unique-id", format!("duplicate area id {}", area.id)));
            }
        }
        for cs in db.profile {
            if model.cross_sections.insert(cs.id, cs.clone()).is_some() {
                return Err(Error::invariant("unique-id", format!("duplicate profile id {}", cs.id)));
            }
        }
        model.basin_time = db.basin_time;
        Ok(model)
    }

    pub fn to_database(&self) -> Database {
        Database {
            node: self.nodes.values().cloned().collect(),
            link: self.links.values().cloned().collect(),
            basin_area: self.areas.values().cloned().collect(),
            basin_time: self.basin_time.clone(),
            profile: self.cross_sections.values().cloned().collect(),
        }
    }

    // --- nodes ---

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(&id).ok_or_else(|| Error::not_found("node", id))
    }

    pub fn get_node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(move |n| n.node_type() == node_type)
    }

    pub fn basin(&self, id: NodeId) -> Result<&Basin> {
        self.node(id)?
            .data
            .as_basin()
            .ok_or_else(|| Error::invariant("row-consistency", format!("node {id} is not a Basin")))
    }

    pub fn next_node_id(&self) -> NodeId {
        self.nodes.keys().next_back().map_or(NodeId(1), |id| id.next())
    }

    /// Node nearest to `point`, optionally restricted to one type
    pub fn nearest_node(&self, point: Point<f64>, node_type: Option<NodeType>) -> Option<(NodeId, f64)> {
        let index = PointIndex::new(
            self.nodes
                .values()
                .filter(|n| node_type.map_or(true, |t| n.node_type() == t))
                .map(|n| (n.geometry, n.id)),
        );
        index.nearest(point)
    }

    /// Nodes whose point lies inside `polygon`
    pub fn nodes_within(&self, polygon: &MultiPolygon<f64>) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|n| polygon.contains(&n.geometry))
            .map(|n| n.id)
            .collect()
    }

    // --- links ---

    pub fn link(&self, id: LinkId) -> Result<&Link> {
        self.links.get(&id).ok_or_else(|| Error::not_found("link", id))
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn next_link_id(&self) -> LinkId {
        self.links.keys().next_back().map_or(LinkId(1), |id| id.next())
    }

    /// Links starting or ending at `node`
    pub fn incident_links(&self, node: NodeId) -> impl Iterator<Item = &Link> {
        self.links.values().filter(move |l| l.from == node || l.to == node)
    }

    /// Link of `kind` from `from` to `to`, if any
    pub fn find_link(&self, from: NodeId, to: NodeId, kind: LinkKind) -> Option<&Link> {
        self.links
            .values()
            .find(|l| l.from == from && l.to == to && l.kind == kind)
    }

    // --- basin areas ---

    pub fn area(&self, id: AreaId) -> Result<&BasinArea> {
        self.areas.get(&id).ok_or_else(|| Error::not_found("basin area", id))
    }

    pub fn areas(&self) -> impl Iterator<Item = &BasinArea> {
        self.areas.values()
    }

    pub fn next_area_id(&self) -> AreaId {
        self.areas.keys().next_back().map_or(AreaId(1), |id| id.next())
    }

    pub fn areas_of(&self, node: NodeId) -> impl Iterator<Item = &BasinArea> {
        self.areas.values().filter(move |a| a.node_id == Some(node))
    }

    /// Union of all area rows assigned to a basin
    pub fn basin_polygon(&self, node: NodeId) -> MultiPolygon<f64> {
        let parts: Vec<&MultiPolygon<f64>> = self.areas_of(node).map(|a| &a.geometry).collect();
        crate::geometry::union_all(parts)
    }

    pub fn unassigned_areas(&self) -> impl Iterator<Item = &BasinArea> {
        self.areas.values().filter(|a| a.node_id.is_none())
    }

    // --- cross sections and time series ---

    pub fn cross_section(&self, id: ProfileId) -> Result<&CrossSection> {
        self.cross_sections
            .get(&id)
            .ok_or_else(|| Error::not_found("profile", id))
    }

    pub fn cross_sections(&self) -> impl Iterator<Item = &CrossSection> {
        self.cross_sections.values()
    }

    /// Cross-section referenced by a link
    pub fn link_profile(&self, link: &Link) -> Option<&CrossSection> {
        link.profile_id.and_then(|id| self.cross_sections.get(&id))
    }

    pub fn basin_time(&self) -> &[BasinTimeRow] {
        &self.basin_time
    }

    // --- graph view ---

    /// Directed flow graph, built on first use after a mutation
    pub fn graph(&self) -> &NetworkGraph {
        self.graph
            .get_or_init(|| NetworkGraph::build(self.nodes.keys().copied(), self.links.values()))
    }

    pub fn reset_graph(&mut self) {
        self.graph = OnceCell::new();
    }

    pub fn upstream_node_id(&self, id: NodeId) -> Result<Adjacent> {
        self.node(id)?;
        Ok(self.graph().upstream(id))
    }

    pub fn downstream_node_id(&self, id: NodeId) -> Result<Adjacent> {
        self.node(id)?;
        Ok(self.graph().downstream(id))
    }

    // --- invariants ---

    /// Every violated invariant, without touching the model
    pub fn validate(&self) -> Vec<Violation> {
        let mut out = Vec::new();

        let mut pairs: BTreeMap<(NodeId, NodeId, LinkKind), LinkId> = BTreeMap::new();
        for link in self.links.values() {
            let (from, to) = match (self.nodes.get(&link.from), self.nodes.get(&link.to)) {
                (Some(f), Some(t)) => (f, t),
                _ => {
                    out.push(Violation::new(
                        "link-endpoints",
                        link.id,
                        format!("link {} references missing node {} or {}", link.id, link.from, link.to),
                    ));
                    continue;
                }
            };
            if link.from == link.to {
                out.push(Violation::new("link-endpoints", link.id, "link starts and ends at the same node"));
            }
            if !can_connect(link.kind, from.node_type(), to.node_type()) {
                out.push(Violation::new(
                    "type-pair",
                    link.id,
                    format!("{:?} link {} -> {} not permitted", link.kind, from.node_type(), to.node_type()),
                ));
            }
            if let Some(first) = pairs.insert((link.from, link.to, link.kind), link.id) {
                out.push(Violation::new(
                    "duplicate-pair",
                    link.id,
                    format!("duplicates link {first} ({} -> {})", link.from, link.to),
                ));
            }
            if let Some(pid) = link.profile_id {
                if !self.cross_sections.contains_key(&pid) {
                    out.push(Violation::new("row-consistency", link.id, format!("missing profile {pid}")));
                }
            }
        }

        let mut basins_with_area = BTreeSet::new();
        for area in self.areas.values() {
            match area.node_id {
                None => out.push(Violation::new("area-basin", area.id, "area row has no basin")),
                Some(nid) => match self.nodes.get(&nid).map(Node::node_type) {
                    Some(NodeType::Basin) => {
                        basins_with_area.insert(nid);
                    }
                    Some(other) => out.push(Violation::new(
                        "area-basin",
                        area.id,
                        format!("area assigned to {other} node {nid}"),
                    )),
                    None => out.push(Violation::new(
                        "area-basin",
                        area.id,
                        format!("area assigned to missing node {nid}"),
                    )),
                },
            }
        }

        for node in self.nodes.values() {
            let Some(basin) = node.data.as_basin() else {
                continue;
            };
            if !basins_with_area.contains(&node.id) {
                out.push(Violation::new("area-basin", node.id, "basin has no area row"));
            }
            if let Err(Error::InvariantViolation { message, .. }) = basin.profile.validate() {
                out.push(Violation::new("profile-monotone", node.id, message));
            } else if let Some(state) = basin.state {
                if !basin.profile.contains_level(state) {
                    out.push(Violation::new(
                        "state-in-range",
                        node.id,
                        format!("initial level {state} outside profile range"),
                    ));
                }
            }
        }

        for row in &self.basin_time {
            if self.nodes.get(&row.node_id).map(Node::node_type) != Some(NodeType::Basin) {
                out.push(Violation::new(
                    "row-consistency",
                    row.node_id,
                    format!("basin.time row at {} for non-basin node", row.time),
                ));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::rectangle;

    pub(crate) fn basin_at(model: &mut Model, x: f64, y: f64) -> NodeId {
        model
            .add_node(NodeType::Basin, Point::new(x, y), NodeMeta::default(), None)
            .unwrap()
    }

    #[test]
    fn test_database_roundtrip_keeps_tables() {
        let mut model = Model::new();
        let a = basin_at(&mut model, 0.0, 0.0);
        model
            .add_area(MultiPolygon(vec![rectangle(-1.0, -1.0, 1.0, 1.0)]), Some(a), None, None)
            .unwrap();
        let json = serde_json::to_string(&model.to_database()).unwrap();
        let back = Model::from_database(serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(back.node_count(), 1);
        assert_eq!(back.areas_of(a).count(), 1);
    }

    #[test]
    fn test_duplicate_id_rejected_on_load() {
        let mut model = Model::new();
        basin_at(&mut model, 0.0, 0.0);
        let mut db = model.to_database();
        db.node.push(db.node[0].clone());
        assert!(matches!(
            Model::from_database(db),
            Err(Error::InvariantViolation { rule: "unique-id", .. })
        ));
    }

    #[test]
    fn test_validate_reports_missing_area_and_profile() {
        let mut model = Model::new();
        let a = basin_at(&mut model, 0.0, 0.0);
        let rules: Vec<String> = model.validate().into_iter().map(|v| v.rule).collect();
        assert!(rules.contains(&"area-basin".to_string()));
        assert!(rules.contains(&"profile-monotone".to_string()));
        assert!(model.validate().iter().all(|v| v.id == a.to_string()));
        assert!(model.validate().iter().all(|v| !v.is_structural()));
    }

    #[test]
    fn test_nearest_node_of_type() {
        let mut model = Model::new();
        let a = basin_at(&mut model, 0.0, 0.0);
        model
            .add_node(NodeType::Terminal, Point::new(1.0, 0.0), NodeMeta::default(), None)
            .unwrap();
        let hit = model.nearest_node(Point::new(0.9, 0.0), Some(NodeType::Basin));
        assert_eq!(hit.map(|h| h.0), Some(a));
        let square = MultiPolygon(vec![rectangle(0.5, -1.0, 2.0, 1.0)]);
        assert_eq!(model.nodes_within(&square).len(), 1);
    }
}
