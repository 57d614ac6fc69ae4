//! Edit-log replay
//!
//! An edit log is a package of named layers, one per model operation. Each
//! row is one call; its columns are the call's arguments. Rows of all layers
//! are replayed in one sequence ordered by the optional `order` column.
//! A failing row is logged and replay continues.

use hydronet_core::model::{AreaFixMethod, LinkId, NodeData, NodeId, NodeType};
use hydronet_core::vector::{Feature, FeatureCollection, GeometryKind};
use hydronet_core::{Algorithm, Diagnostics, Error, Model, Result};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Points closer than this count as the same location
const SAME_POINT: f64 = 1e-6;

type Handler = fn(&mut Model, &Feature) -> Result<()>;

/// One registered operation: layer name, row schema and handler
pub struct Operation {
    pub name: &'static str,
    pub required: &'static [&'static str],
    pub geometry: Option<GeometryKind>,
    handler: Handler,
}

impl Operation {
    pub fn apply(&self, model: &mut Model, row: &Feature) -> Result<()> {
        (self.handler)(model, row)
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("required", &self.required)
            .finish()
    }
}

/// Every operation an edit log may name
pub const OPERATIONS: &[Operation] = &[
    Operation {
        name: "remove_node",
        required: &["node_id"],
        geometry: None,
        handler: remove_node,
    },
    Operation {
        name: "remove_link",
        required: &["link_id"],
        geometry: None,
        handler: remove_link,
    },
    Operation {
        name: "update_node",
        required: &["node_id", "node_type"],
        geometry: None,
        handler: update_node,
    },
    Operation {
        name: "move_node",
        required: &["node_id"],
        geometry: Some(GeometryKind::Point),
        handler: move_node,
    },
    Operation {
        name: "redirect_link",
        required: &["link_id"],
        geometry: None,
        handler: redirect_link,
    },
    Operation {
        name: "reverse_link",
        required: &["link_id"],
        geometry: None,
        handler: reverse_link,
    },
    Operation {
        name: "merge_basins",
        required: &["basin_id", "to_basin_id"],
        geometry: None,
        handler: merge_basins,
    },
    Operation {
        name: "split_basin",
        required: &[],
        geometry: Some(GeometryKind::Line),
        handler: split_basin,
    },
    Operation {
        name: "add_and_connect_node",
        required: &["from_basin_id", "to_basin_id", "node_type"],
        geometry: Some(GeometryKind::Point),
        handler: add_and_connect_node,
    },
    Operation {
        name: "fix_unassigned_basin_area",
        required: &[],
        geometry: None,
        handler: fix_unassigned_basin_area,
    },
];

pub fn operation(name: &str) -> Option<&'static Operation> {
    OPERATIONS.iter().find(|op| op.name == name)
}

fn int_arg(row: &Feature, column: &'static str) -> Result<i32> {
    let value = row.get_i64(column).ok_or_else(|| Error::InvalidParameter {
        name: column,
        value: format!("{:?}", row.get_property(column)),
        reason: "expected an integer identifier".into(),
    })?;
    i32::try_from(value).map_err(|_| Error::InvalidParameter {
        name: column,
        value: value.to_string(),
        reason: "identifier out of range".into(),
    })
}

fn node_arg(row: &Feature, column: &'static str) -> Result<NodeId> {
    int_arg(row, column).map(NodeId)
}

fn optional_node_arg(row: &Feature, column: &'static str) -> Result<Option<NodeId>> {
    match row.get_property(column) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(_) => node_arg(row, column).map(Some),
    }
}

fn link_arg(row: &Feature) -> Result<LinkId> {
    int_arg(row, "link_id").map(LinkId)
}

fn type_arg(row: &Feature) -> Result<NodeType> {
    row.get_str("node_type")
        .ok_or_else(|| Error::InvalidParameter {
            name: "node_type",
            value: format!("{:?}", row.get_property("node_type")),
            reason: "expected a node type name".into(),
        })?
        .parse()
}

fn point_arg(row: &Feature) -> Result<geo::Point<f64>> {
    row.point()
        .ok_or_else(|| Error::Geometry("edit row needs a point geometry".into()))
}

/// Static data for `node_type` filled from the row's columns
fn data_from_row(node_type: NodeType, row: &Feature) -> NodeData {
    let mut data = NodeData::empty(node_type);
    if let Some(s) = data.as_structure_mut() {
        s.flow_rate = row.get_f64("flow_rate");
        s.min_upstream_level = row.get_f64("min_upstream_level");
        s.max_downstream_level = row.get_f64("max_downstream_level");
    }
    if let Some(b) = data.as_basin_mut() {
        b.target_level = row.get_f64("target_level");
    }
    data
}

fn remove_node(model: &mut Model, row: &Feature) -> Result<()> {
    let cascade = row.get_bool("cascade_links").unwrap_or(true);
    model.remove_node(node_arg(row, "node_id")?, cascade)
}

fn remove_link(model: &mut Model, row: &Feature) -> Result<()> {
    model.remove_link(link_arg(row)?)
}

fn update_node(model: &mut Model, row: &Feature) -> Result<()> {
    let node_type = type_arg(row)?;
    let data = data_from_row(node_type, row);
    model.update_node(node_arg(row, "node_id")?, node_type, Some(data))
}

fn move_node(model: &mut Model, row: &Feature) -> Result<()> {
    model.move_node(node_arg(row, "node_id")?, point_arg(row)?)
}

fn redirect_link(model: &mut Model, row: &Feature) -> Result<()> {
    let from = optional_node_arg(row, "from_node_id")?;
    let to = optional_node_arg(row, "to_node_id")?;
    model.redirect_link(link_arg(row)?, from, to)
}

/// Reverse a link. With a `from_node_id` guard the link must still start
/// there, so a second replay does not flip it back.
fn reverse_link(model: &mut Model, row: &Feature) -> Result<()> {
    let id = link_arg(row)?;
    if let Some(from) = optional_node_arg(row, "from_node_id")? {
        if model.link(id)?.from != from {
            return Err(Error::not_found("link", format!("{id} from node {from}")));
        }
    }
    model.reverse_link(id)
}

fn merge_basins(model: &mut Model, row: &Feature) -> Result<()> {
    let connected = row.get_bool("are_connected").unwrap_or(true);
    model.merge_basins(node_arg(row, "basin_id")?, node_arg(row, "to_basin_id")?, connected)
}

fn split_basin(model: &mut Model, row: &Feature) -> Result<()> {
    let line = row
        .lines()
        .into_iter()
        .next()
        .ok_or_else(|| Error::Geometry("split_basin row needs a line geometry".into()))?;
    model.split_basin(&line).map(|_| ())
}

/// Insert a structure between two nodes unless one of the same type
/// already sits at the point
fn add_and_connect_node(model: &mut Model, row: &Feature) -> Result<()> {
    let node_type = type_arg(row)?;
    let point = point_arg(row)?;
    if let Some((existing, distance)) = model.nearest_node(point, Some(node_type)) {
        if distance <= SAME_POINT {
            debug!("{node_type} {existing} already at ({}, {})", point.x(), point.y());
            return Ok(());
        }
    }
    let data = data_from_row(node_type, row);
    model
        .add_and_connect_node(
            node_arg(row, "from_basin_id")?,
            node_arg(row, "to_basin_id")?,
            point,
            node_type,
            Some(data),
            row.get_text("name"),
        )
        .map(|_| ())
}

fn fix_unassigned_basin_area(model: &mut Model, row: &Feature) -> Result<()> {
    let method = match row.get_str("method").unwrap_or("within").to_ascii_lowercase().as_str() {
        "within" => AreaFixMethod::Within,
        "closest" => AreaFixMethod::Closest {
            distance: row.get_f64("distance").ok_or_else(|| Error::InvalidParameter {
                name: "distance",
                value: "null".into(),
                reason: "required for method 'closest'".into(),
            })?,
        },
        other => {
            return Err(Error::InvalidParameter {
                name: "method",
                value: other.to_string(),
                reason: "expected 'within' or 'closest'".into(),
            })
        }
    };
    model.fix_unassigned_basin_area(method).map(|_| ())
}

/// A row that was rejected during replay
#[derive(Debug, Clone, Serialize)]
pub struct FailedEdit {
    pub operation: &'static str,
    pub layer: String,
    pub row: usize,
    pub order: Option<f64>,
    pub message: String,
    #[serde(skip)]
    pub error: Arc<Error>,
}

/// Outcome of one replay pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    pub applied: usize,
    pub failed: usize,
    pub failures: Vec<FailedEdit>,
    /// Layers that name no known operation or fail the row schema
    pub skipped_layers: Vec<String>,
    pub diagnostics: Diagnostics,
}

struct Step<'a> {
    order: Option<f64>,
    layer: &'a str,
    row: usize,
    op: &'static Operation,
    feature: &'a Feature,
}

fn by_order(a: &Step<'_>, b: &Step<'_>) -> Ordering {
    match (a.order, b.order) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Replay every recognised layer of `log` against `model`.
///
/// Rows run in `order` sequence; rows without an order follow, in layer
/// name then row order. Failing rows leave the model as it was.
pub fn replay(model: &mut Model, log: &BTreeMap<String, FeatureCollection>) -> ReplayReport {
    let mut report = ReplayReport::default();
    let mut steps = Vec::new();
    for (layer, rows) in log {
        let Some(op) = operation(layer) else {
            warn!("edit log layer '{layer}' names no operation, skipped");
            report.diagnostics.warn("edit-log", layer, "unknown operation");
            report.skipped_layers.push(layer.clone());
            continue;
        };
        let schema = rows.require_columns(layer, op.required).and_then(|()| match op.geometry {
            Some(kind) => rows.require_geometry(layer, kind),
            None => Ok(()),
        });
        if let Err(e) = schema {
            warn!("edit log layer '{layer}' skipped: {e}");
            report.diagnostics.warn("edit-log", layer, e.to_string());
            report.skipped_layers.push(layer.clone());
            continue;
        }
        steps.extend(rows.iter().enumerate().map(|(row, feature)| Step {
            order: feature.get_f64("order"),
            layer: layer.as_str(),
            row,
            op,
            feature,
        }));
    }
    steps.sort_by(by_order);

    for step in steps {
        match step.op.apply(model, step.feature) {
            Ok(()) => {
                debug!("{} row {} applied", step.layer, step.row);
                report.applied += 1;
            }
            Err(e) => {
                warn!("{} row {} failed: {e}", step.layer, step.row);
                report
                    .diagnostics
                    .error(step.op.name, format!("{}#{}", step.layer, step.row), e.to_string());
                report.failures.push(FailedEdit {
                    operation: step.op.name,
                    layer: step.layer.to_string(),
                    row: step.row,
                    order: step.order,
                    message: e.to_string(),
                    error: Arc::new(e),
                });
                report.failed += 1;
            }
        }
    }
    info!(
        "edit log replayed: {} applied, {} failed, {} layer(s) skipped",
        report.applied,
        report.failed,
        report.skipped_layers.len()
    );
    report
}

pub struct ReplayInput {
    pub model: Model,
    pub log: BTreeMap<String, FeatureCollection>,
}

pub struct ReplayOutput {
    pub model: Model,
    pub report: ReplayReport,
}

/// Edit-log replay as an algorithm
#[derive(Debug, Clone, Default)]
pub struct ReplayEditLog;

impl Algorithm for ReplayEditLog {
    type Input = ReplayInput;
    type Output = ReplayOutput;
    type Params = ();
    type Error = Error;

    fn name(&self) -> &'static str {
        "Edit-log replay"
    }

    fn description(&self) -> &'static str {
        "Apply hand-authored model edits stored as one layer per operation"
    }

    fn execute(&self, input: Self::Input, _params: Self::Params) -> Result<Self::Output> {
        let ReplayInput { mut model, log } = input;
        let report = replay(&mut model, &log);
        Ok(ReplayOutput { model, report })
    }
}
