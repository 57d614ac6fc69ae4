//! Post-run validation of a model and its solver results
//!
//! Results are two JSON row tables in the results directory:
//! `basin.json` (level, storage and balance error per basin and time) and
//! `flow.json` (flow per link and time). The report combines the model's
//! invariant check with per-basin level and balance checks and per-link
//! flow conditions.

use chrono::NaiveDateTime;
use hydronet_core::io::{read_json, write_json_atomic};
use hydronet_core::model::{LinkId, NodeId, Violation};
use hydronet_core::{Algorithm, Error, Model, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

pub const BASIN_RESULTS: &str = "basin.json";
pub const FLOW_RESULTS: &str = "flow.json";
pub const REPORT_FILE: &str = "validation_report.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasinResult {
    pub node_id: NodeId,
    pub time: NaiveDateTime,
    pub level: f64,
    pub storage: f64,
    /// Relative water-balance error of the step
    pub balance_error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowResult {
    pub link_id: LinkId,
    pub time: NaiveDateTime,
    /// m³/s, negative against the link direction
    pub flow_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Results {
    pub basin: Vec<BasinResult>,
    pub flow: Vec<FlowResult>,
}

impl Results {
    /// Read both tables from a results directory
    pub fn read(dir: &Path) -> Result<Self> {
        let basin = read_json(&dir.join(BASIN_RESULTS))?;
        let flow = read_json(&dir.join(FLOW_RESULTS))?;
        Ok(Self { basin, flow })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationParams {
    /// Largest level change over the final window that still counts as stationary (m)
    pub stationarity_tolerance: f64,
    /// Share of the series, from the end, checked for stationarity
    pub stationarity_window: f64,
    /// Absolute balance error above which a basin is flagged
    pub balance_tolerance: f64,
}

impl Default for ValidationParams {
    fn default() -> Self {
        Self {
            stationarity_tolerance: 0.01,
            stationarity_window: 0.1,
            balance_tolerance: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasinCheck {
    pub node_id: NodeId,
    pub initial_level: f64,
    pub final_level: f64,
    /// Final minus initial level
    pub deviation: f64,
    pub max_balance_error: f64,
    pub stationary: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowCheck {
    pub link_id: LinkId,
    pub min_flow: f64,
    pub max_flow: f64,
    /// Flow ran against the link direction at some step
    pub reversed: bool,
    /// No flow at any step
    pub dry: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
    pub basins: Vec<BasinCheck>,
    pub flows: Vec<FlowCheck>,
    pub max_balance_error: f64,
    pub unbalanced_basins: usize,
    pub non_stationary_basins: usize,
    pub reversed_links: usize,
    pub dry_links: usize,
}

impl ValidationReport {
    /// True when the model breaks none of its invariants
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }
}

fn check_basin(node_id: NodeId, mut rows: Vec<&BasinResult>, params: &ValidationParams) -> Option<BasinCheck> {
    rows.sort_by_key(|r| r.time);
    let first = rows.first()?;
    let last = rows.last()?;
    let window = ((rows.len() as f64 * params.stationarity_window).ceil() as usize).clamp(1, rows.len());
    let tail = &rows[rows.len() - window..];
    let (lo, hi) = tail
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| (lo.min(r.level), hi.max(r.level)));
    let max_balance_error = rows.iter().map(|r| r.balance_error.abs()).fold(0.0, f64::max);
    Some(BasinCheck {
        node_id,
        initial_level: first.level,
        final_level: last.level,
        deviation: last.level - first.level,
        max_balance_error,
        stationary: hi - lo <= params.stationarity_tolerance,
    })
}

fn check_flow(link_id: LinkId, rows: &[&FlowResult]) -> Option<FlowCheck> {
    let min_flow = rows.iter().map(|r| r.flow_rate).reduce(f64::min)?;
    let max_flow = rows.iter().map(|r| r.flow_rate).reduce(f64::max)?;
    Some(FlowCheck {
        link_id,
        min_flow,
        max_flow,
        reversed: min_flow < 0.0,
        dry: min_flow == 0.0 && max_flow == 0.0,
    })
}

/// Check a model and, when present, its results
pub fn validate(model: &Model, results: Option<&Results>, params: &ValidationParams) -> ValidationReport {
    let mut report = ValidationReport {
        violations: model.validate(),
        ..ValidationReport::default()
    };
    for v in &report.violations {
        warn!("invariant {} broken at {}: {}", v.rule, v.id, v.message);
    }
    let Some(results) = results else {
        return report;
    };

    let mut per_basin: BTreeMap<NodeId, Vec<&BasinResult>> = BTreeMap::new();
    for row in &results.basin {
        per_basin.entry(row.node_id).or_default().push(row);
    }
    report.basins = per_basin
        .into_iter()
        .filter_map(|(id, rows)| check_basin(id, rows, params))
        .collect();

    let mut per_link: BTreeMap<LinkId, Vec<&FlowResult>> = BTreeMap::new();
    for row in &results.flow {
        per_link.entry(row.link_id).or_default().push(row);
    }
    report.flows = per_link
        .into_iter()
        .filter_map(|(id, rows)| check_flow(id, &rows))
        .collect();

    report.max_balance_error = report.basins.iter().map(|b| b.max_balance_error).fold(0.0, f64::max);
    report.unbalanced_basins = report
        .basins
        .iter()
        .filter(|b| b.max_balance_error > params.balance_tolerance)
        .count();
    report.non_stationary_basins = report.basins.iter().filter(|b| !b.stationary).count();
    report.reversed_links = report.flows.iter().filter(|f| f.reversed).count();
    report.dry_links = report.flows.iter().filter(|f| f.dry).count();

    info!(
        "validated {} basins and {} links: max balance error {:.2e}, {} non-stationary, {} reversed",
        report.basins.len(),
        report.flows.len(),
        report.max_balance_error,
        report.non_stationary_basins,
        report.reversed_links
    );
    report
}

pub struct ValidationInput {
    pub model: Model,
    pub results: Option<Results>,
}

/// Model and results validation as an algorithm
#[derive(Debug, Clone, Default)]
pub struct ValidateModel;

impl Algorithm for ValidateModel {
    type Input = ValidationInput;
    type Output = ValidationReport;
    type Params = ValidationParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Validation"
    }

    fn description(&self) -> &'static str {
        "Check model invariants, water balance, stationarity and flow conditions"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        Ok(validate(&input.model, input.results.as_ref(), &params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn t(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, day).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn level(node: i32, day: u32, level: f64, balance_error: f64) -> BasinResult {
        BasinResult {
            node_id: NodeId(node),
            time: t(day),
            level,
            storage: 0.0,
            balance_error,
        }
    }

    fn flow(link: i32, day: u32, flow_rate: f64) -> FlowResult {
        FlowResult {
            link_id: LinkId(link),
            time: t(day),
            flow_rate,
        }
    }

    #[test]
    fn test_basin_checks() {
        let results = Results {
            basin: vec![
                level(1, 2, 1.5, -0.02),
                level(1, 1, 1.0, 0.001),
                level(1, 3, 1.5, 0.0),
                level(2, 1, 0.0, 0.0),
                level(2, 2, 0.5, 0.0),
            ],
            flow: Vec::new(),
        };
        let report = validate(&Model::new(), Some(&results), &ValidationParams::default());
        assert!(report.is_valid());
        let b1 = &report.basins[0];
        assert_relative_eq!(b1.deviation, 0.5);
        assert_relative_eq!(b1.max_balance_error, 0.02);
        assert!(b1.stationary);
        assert_eq!(report.unbalanced_basins, 1);
        // a two-step series checks only its last step
        assert!(report.basins[1].stationary);
    }

    #[test]
    fn test_non_stationary_window() {
        let results = Results {
            basin: vec![level(1, 1, 1.0, 0.0), level(1, 2, 1.0, 0.0), level(1, 3, 1.2, 0.0)],
            flow: Vec::new(),
        };
        let params = ValidationParams {
            stationarity_window: 0.5,
            ..ValidationParams::default()
        };
        let report = validate(&Model::new(), Some(&results), &params);
        assert_eq!(report.non_stationary_basins, 1);
    }

    #[test]
    fn test_flow_conditions() {
        let results = Results {
            basin: Vec::new(),
            flow: vec![flow(1, 1, 0.5), flow(1, 2, -0.1), flow(2, 1, 0.0), flow(2, 2, 0.0)],
        };
        let report = validate(&Model::new(), Some(&results), &ValidationParams::default());
        assert_eq!(report.reversed_links, 1);
        assert_eq!(report.dry_links, 1);
        assert_relative_eq!(report.flows[0].min_flow, -0.1);
    }

    #[test]
    fn test_read_and_write() {
        let dir = tempfile::tempdir().unwrap();
        write_json_atomic(&dir.path().join(BASIN_RESULTS), &vec![level(1, 1, 1.0, 0.0)]).unwrap();
        write_json_atomic(&dir.path().join(FLOW_RESULTS), &vec![flow(1, 1, 0.2)]).unwrap();
        let results = Results::read(dir.path()).unwrap();
        assert_eq!(results.basin.len(), 1);

        let report = validate(&Model::new(), Some(&results), &ValidationParams::default());
        let path = dir.path().join(REPORT_FILE);
        report.write(&path).unwrap();
        let json: serde_json::Value = read_json(&path).unwrap();
        assert_eq!(json["flows"][0]["link_id"], 1);
    }

    #[test]
    fn test_missing_results_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Results::read(dir.path()).unwrap_err().is_not_found());
    }
}
