//! Directed links and the permitted type-pair matrix

use crate::model::node::{Category, NodeType};
use crate::model::{LinkId, NodeId, ProfileId};
use geo::LineString;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Flow,
    Control,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub from: NodeId,
    pub to: NodeId,
    pub kind: LinkKind,
    pub geometry: LineString<f64>,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    /// Cross-section profile of the water course this link follows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<ProfileId>,
}

impl Link {
    pub fn is_flow(&self) -> bool {
        self.kind == LinkKind::Flow
    }

    /// The endpoint that is not `node`, if `node` is an endpoint at all
    pub fn other_end(&self, node: NodeId) -> Option<NodeId> {
        if self.from == node {
            Some(self.to)
        } else if self.to == node {
            Some(self.from)
        } else {
            None
        }
    }
}

/// Node types a flow link may point to from `from`
pub fn flow_neighbours(from: NodeType) -> &'static [NodeType] {
    use NodeType::*;
    match from {
        Basin => &[Pump, Outlet, TabulatedRatingCurve, ManningResistance],
        LevelBoundary => &[Pump, Outlet, TabulatedRatingCurve],
        FlowBoundary => &[Basin, Terminal, LevelBoundary],
        Pump | Outlet | TabulatedRatingCurve => &[Basin, Terminal, LevelBoundary],
        ManningResistance => &[Basin],
        Terminal | DiscreteControl | ContinuousControl | FlowDemand | LevelDemand => &[],
    }
}

/// Node types a control link may point to from `from`
pub fn control_neighbours(from: NodeType) -> &'static [NodeType] {
    use NodeType::*;
    match from {
        DiscreteControl => &[Pump, Outlet, TabulatedRatingCurve, ManningResistance],
        ContinuousControl => &[Pump, Outlet],
        FlowDemand => &[Pump, Outlet],
        LevelDemand => &[Basin],
        _ => &[],
    }
}

/// Whether a link of `kind` from `from` to `to` is permitted
pub fn can_connect(kind: LinkKind, from: NodeType, to: NodeType) -> bool {
    match kind {
        LinkKind::Flow => flow_neighbours(from).contains(&to),
        LinkKind::Control => control_neighbours(from).contains(&to),
    }
}

/// Trapezoidal cross-section of a water course
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossSection {
    pub id: ProfileId,
    pub bottom_level: f64,
    /// Level of the top of the embankment (insteek)
    pub invert_level: f64,
    pub bottom_width: f64,
    pub invert_width: f64,
}

impl CrossSection {
    pub fn depth(&self) -> f64 {
        self.invert_level - self.bottom_level
    }

    /// Horizontal run per unit rise of the banks
    pub fn side_slope(&self) -> Option<f64> {
        let depth = self.depth();
        (depth > 0.0).then(|| (self.invert_width - self.bottom_width).max(0.0) / 2.0 / depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_boundary_cannot_feed_manning() {
        assert!(!can_connect(LinkKind::Flow, NodeType::LevelBoundary, NodeType::ManningResistance));
        assert!(can_connect(LinkKind::Flow, NodeType::LevelBoundary, NodeType::Outlet));
    }

    #[test]
    fn test_basin_to_basin_forbidden() {
        assert!(!can_connect(LinkKind::Flow, NodeType::Basin, NodeType::Basin));
        assert!(can_connect(LinkKind::Flow, NodeType::Basin, NodeType::Pump));
        assert!(can_connect(LinkKind::Flow, NodeType::Pump, NodeType::Basin));
    }

    #[test]
    fn test_control_matrix() {
        assert!(can_connect(LinkKind::Control, NodeType::DiscreteControl, NodeType::Pump));
        assert!(!can_connect(LinkKind::Flow, NodeType::DiscreteControl, NodeType::Pump));
        assert!(!can_connect(LinkKind::Control, NodeType::Basin, NodeType::Pump));
    }

    #[test]
    fn test_cross_section_slope() {
        let cs = CrossSection {
            id: ProfileId(1),
            bottom_level: 1.0,
            invert_level: 3.0,
            bottom_width: 2.0,
            invert_width: 10.0,
        };
        assert_eq!(cs.side_slope(), Some(2.0));
    }
}
