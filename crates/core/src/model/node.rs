//! Node types and their per-type data

use crate::model::basin::Basin;
use crate::model::NodeId;
use geo::Point;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Closed set of node types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Basin,
    LevelBoundary,
    FlowBoundary,
    Terminal,
    Pump,
    Outlet,
    TabulatedRatingCurve,
    ManningResistance,
    DiscreteControl,
    ContinuousControl,
    FlowDemand,
    LevelDemand,
}

impl NodeType {
    pub const ALL: [NodeType; 12] = [
        NodeType::Basin,
        NodeType::LevelBoundary,
        NodeType::FlowBoundary,
        NodeType::Terminal,
        NodeType::Pump,
        NodeType::Outlet,
        NodeType::TabulatedRatingCurve,
        NodeType::ManningResistance,
        NodeType::DiscreteControl,
        NodeType::ContinuousControl,
        NodeType::FlowDemand,
        NodeType::LevelDemand,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Basin => "Basin",
            NodeType::LevelBoundary => "LevelBoundary",
            NodeType::FlowBoundary => "FlowBoundary",
            NodeType::Terminal => "Terminal",
            NodeType::Pump => "Pump",
            NodeType::Outlet => "Outlet",
            NodeType::TabulatedRatingCurve => "TabulatedRatingCurve",
            NodeType::ManningResistance => "ManningResistance",
            NodeType::DiscreteControl => "DiscreteControl",
            NodeType::ContinuousControl => "ContinuousControl",
            NodeType::FlowDemand => "FlowDemand",
            NodeType::LevelDemand => "LevelDemand",
        }
    }

    /// Types whose node cannot exist without a static row
    pub fn is_parameterized(self) -> bool {
        matches!(
            self,
            NodeType::LevelBoundary
                | NodeType::FlowBoundary
                | NodeType::Pump
                | NodeType::Outlet
                | NodeType::TabulatedRatingCurve
                | NodeType::ManningResistance
                | NodeType::FlowDemand
                | NodeType::LevelDemand
        )
    }

    /// Flow structures sitting between two basins
    pub fn is_structure(self) -> bool {
        matches!(
            self,
            NodeType::Pump
                | NodeType::Outlet
                | NodeType::TabulatedRatingCurve
                | NodeType::ManningResistance
        )
    }

    pub fn is_boundary(self) -> bool {
        matches!(
            self,
            NodeType::LevelBoundary | NodeType::FlowBoundary | NodeType::Terminal
        )
    }

    pub fn is_control(self) -> bool {
        matches!(
            self,
            NodeType::DiscreteControl
                | NodeType::ContinuousControl
                | NodeType::FlowDemand
                | NodeType::LevelDemand
        )
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        NodeType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| crate::Error::InvalidParameter {
                name: "node_type",
                value: s.to_string(),
                reason: "unknown node type".into(),
            })
    }
}

/// Category of a water-level zone, basin or link
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Primary open-water network
    Hoofdwater,
    /// Regional (secondary) water
    Regional,
    /// Storage-only reservoir without a flow-through role
    Bergend,
}

impl FromStr for Category {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "hoofdwater" | "primary" => Ok(Category::Hoofdwater),
            "regional" | "regionaal" | "doorgaand" | "secondary" => Ok(Category::Regional),
            "bergend" | "storage" => Ok(Category::Bergend),
            other => Err(crate::Error::InvalidParameter {
                name: "category",
                value: other.to_string(),
                reason: "expected hoofdwater, regional or bergend".into(),
            }),
        }
    }
}

/// Function a pump or outlet serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureFunction {
    /// Drainage (outflow)
    Afvoer,
    /// Supply (inflow)
    Aanvoer,
    Circulatie,
}

/// Static row of a Pump or Outlet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureStatic {
    /// Capacity in m³/s
    pub flow_rate: Option<f64>,
    pub min_upstream_level: Option<f64>,
    pub max_downstream_level: Option<f64>,
    pub active: bool,
    #[serde(default)]
    pub functions: Vec<StructureFunction>,
}

impl Default for StructureStatic {
    fn default() -> Self {
        Self {
            flow_rate: None,
            min_upstream_level: None,
            max_downstream_level: None,
            active: true,
            functions: vec![StructureFunction::Afvoer],
        }
    }
}

/// One (level, flow) pair of a rating curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatingRow {
    pub level: f64,
    pub flow_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingCurve {
    pub rows: Vec<RatingRow>,
}

impl RatingCurve {
    /// Lowest level of the table, where flow starts
    pub fn crest_level(&self) -> Option<f64> {
        self.rows.first().map(|r| r.level)
    }

    /// Ordered by strictly increasing level with non-negative flow
    pub fn is_ordered(&self) -> bool {
        self.rows.windows(2).all(|w| w[1].level > w[0].level) && self.rows.iter().all(|r| r.flow_rate >= 0.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManningStatic {
    pub length: Option<f64>,
    pub manning_n: Option<f64>,
    pub profile_width: Option<f64>,
    pub profile_slope: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelBoundaryStatic {
    pub level: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowBoundaryStatic {
    pub flow_rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowDemandStatic {
    pub demand: Option<f64>,
    pub priority: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelDemandStatic {
    pub min_level: Option<f64>,
    pub max_level: Option<f64>,
    pub priority: Option<i32>,
}

/// Condition a discrete controller listens to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscreteControlStatic {
    pub listen_node_id: Option<NodeId>,
    #[serde(default)]
    pub thresholds: Vec<f64>,
}

/// Per-type data. The variant fixes the node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node_type")]
pub enum NodeData {
    Basin(Basin),
    LevelBoundary(LevelBoundaryStatic),
    FlowBoundary(FlowBoundaryStatic),
    Terminal,
    Pump(StructureStatic),
    Outlet(StructureStatic),
    TabulatedRatingCurve(RatingCurve),
    ManningResistance(ManningStatic),
    DiscreteControl(DiscreteControlStatic),
    ContinuousControl,
    FlowDemand(FlowDemandStatic),
    LevelDemand(LevelDemandStatic),
}

impl NodeData {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeData::Basin(_) => NodeType::Basin,
            NodeData::LevelBoundary(_) => NodeType::LevelBoundary,
            NodeData::FlowBoundary(_) => NodeType::FlowBoundary,
            NodeData::Terminal => NodeType::Terminal,
            NodeData::Pump(_) => NodeType::Pump,
            NodeData::Outlet(_) => NodeType::Outlet,
            NodeData::TabulatedRatingCurve(_) => NodeType::TabulatedRatingCurve,
            NodeData::ManningResistance(_) => NodeType::ManningResistance,
            NodeData::DiscreteControl(_) => NodeType::DiscreteControl,
            NodeData::ContinuousControl => NodeType::ContinuousControl,
            NodeData::FlowDemand(_) => NodeType::FlowDemand,
            NodeData::LevelDemand(_) => NodeType::LevelDemand,
        }
    }

    /// Data for types that need no parameters up front
    pub fn unparameterized(node_type: NodeType) -> Option<NodeData> {
        match node_type {
            NodeType::Basin => Some(NodeData::Basin(Basin::default())),
            NodeType::Terminal => Some(NodeData::Terminal),
            NodeType::DiscreteControl => Some(NodeData::DiscreteControl(DiscreteControlStatic::default())),
            NodeType::ContinuousControl => Some(NodeData::ContinuousControl),
            _ => None,
        }
    }

    /// Empty static rows for any type, used when ingesting unparameterized structures
    pub fn empty(node_type: NodeType) -> NodeData {
        match node_type {
            NodeType::LevelBoundary => NodeData::LevelBoundary(LevelBoundaryStatic::default()),
            NodeType::FlowBoundary => NodeData::FlowBoundary(FlowBoundaryStatic::default()),
            NodeType::Pump => NodeData::Pump(StructureStatic::default()),
            NodeType::Outlet => NodeData::Outlet(StructureStatic::default()),
            NodeType::TabulatedRatingCurve => NodeData::TabulatedRatingCurve(RatingCurve::default()),
            NodeType::ManningResistance => NodeData::ManningResistance(ManningStatic::default()),
            NodeType::FlowDemand => NodeData::FlowDemand(FlowDemandStatic::default()),
            NodeType::LevelDemand => NodeData::LevelDemand(LevelDemandStatic::default()),
            NodeType::Basin => NodeData::Basin(Basin::default()),
            NodeType::Terminal => NodeData::Terminal,
            NodeType::DiscreteControl => NodeData::DiscreteControl(DiscreteControlStatic::default()),
            NodeType::ContinuousControl => NodeData::ContinuousControl,
        }
    }

    pub fn as_basin(&self) -> Option<&Basin> {
        match self {
            NodeData::Basin(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_basin_mut(&mut self) -> Option<&mut Basin> {
        match self {
            NodeData::Basin(b) => Some(b),
            _ => None,
        }
    }

    /// Pump and Outlet static rows
    pub fn as_structure(&self) -> Option<&StructureStatic> {
        match self {
            NodeData::Pump(s) | NodeData::Outlet(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_structure_mut(&mut self) -> Option<&mut StructureStatic> {
        match self {
            NodeData::Pump(s) | NodeData::Outlet(s) => Some(s),
            _ => None,
        }
    }
}

/// Free-form attributes carried by every node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    #[serde(default)]
    pub name: String,
    /// Water authority the node was sourced from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority: Option<String>,
    /// Authority code (e.g. structure inventory key)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

impl NodeMeta {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub geometry: Point<f64>,
    #[serde(flatten)]
    pub meta: NodeMeta,
    pub data: NodeData,
}

impl Node {
    pub fn node_type(&self) -> NodeType {
        self.data.node_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_roundtrip_names() {
        for t in NodeType::ALL {
            assert_eq!(t.as_str().parse::<NodeType>().unwrap(), t);
        }
        assert!("Weir".parse::<NodeType>().is_err());
    }

    #[test]
    fn test_parameterized_types_have_no_default() {
        for t in NodeType::ALL {
            assert_eq!(t.is_parameterized(), NodeData::unparameterized(t).is_none(), "{t}");
            assert_eq!(NodeData::empty(t).node_type(), t);
        }
    }

    #[test]
    fn test_node_data_tagged_json() {
        let data = NodeData::Pump(StructureStatic {
            flow_rate: Some(1.5),
            ..StructureStatic::default()
        });
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["node_type"], "Pump");
        let back: NodeData = serde_json::from_value(json).unwrap();
        assert_eq!(back, data);
    }
}
