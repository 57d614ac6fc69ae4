//! End-to-end scenarios over the public build steps.
//!
//! Each test builds a small model by hand, runs one or more phases and
//! checks the outcome the way the CLI would see it.

use approx::assert_relative_eq;
use chrono::NaiveDate;
use geo::{Area, LineString, MultiPolygon, Point};
use hydronet_algorithms::aggregation::{aggregate_zones, AggregationParams};
use hydronet_algorithms::assignment::{assign_basin_areas, AssignmentParams, CandidateArea};
use hydronet_algorithms::crossings::{extract_crossings, CrossingKind, CrossingsInput, CrossingsParams};
use hydronet_algorithms::editlog::replay;
use hydronet_algorithms::forcing::{distribute_forcing, ForcingParams};
use hydronet_algorithms::parameterize::{propagate, PropagationParams};
use hydronet_algorithms::validation::{validate, ValidationParams};
use hydronet_algorithms::zone::Zone;
use hydronet_core::config::StaticForcing;
use hydronet_core::geometry::{rectangle, union_all};
use hydronet_core::io::{read_model, write_model};
use hydronet_core::model::{
    Category, CrossSection, FlowBoundaryStatic, LinkKind, NodeData, NodeId, NodeMeta, NodeType, ProfileId,
    StructureStatic,
};
use hydronet_core::vector::{Feature, FeatureCollection};
use hydronet_core::{Error, Model, ModelConfig};
use std::collections::BTreeMap;

fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
    MultiPolygon(vec![rectangle(x0, y0, x1, y1)])
}

fn structure(min_upstream_level: Option<f64>) -> StructureStatic {
    StructureStatic {
        min_upstream_level,
        ..StructureStatic::default()
    }
}

fn node(model: &mut Model, t: NodeType, x: f64, y: f64, data: Option<NodeData>) -> NodeId {
    model.add_node(t, Point::new(x, y), NodeMeta::default(), data).unwrap()
}

fn crossings(lines: Vec<LineString<f64>>, zones: Vec<Zone>, tolerance: f64) -> hydronet_algorithms::crossings::CrossingSet {
    let params = CrossingsParams {
        tolerance,
        ..CrossingsParams::default()
    };
    extract_crossings(CrossingsInput { lines, zones, filter: None }, &params).unwrap()
}

#[test]
fn scenario_adjacent_zones() {
    let set = crossings(
        vec![LineString::from(vec![(0.5, 0.5), (3.5, 0.5)])],
        vec![
            Zone::new("A", square(0.0, 0.0, 2.0, 2.0)),
            Zone::new("B", square(2.0, 0.0, 4.0, 2.0)),
        ],
        0.01,
    );
    assert_eq!(set.crossings.len(), 1);
    assert_eq!(set.crossings[0].kind, CrossingKind::Boundary);
    assert_relative_eq!(set.crossings[0].geometry.x(), 2.0);
    assert_relative_eq!(set.crossings[0].geometry.y(), 0.5);
}

#[test]
fn scenario_narrow_gap() {
    let set = crossings(
        vec![LineString::from(vec![(0.5, 0.5), (3.5, 0.5)])],
        vec![
            Zone::new("A", square(0.0, 0.0, 2.0, 2.0)),
            Zone::new("B", square(2.1, 0.0, 4.0, 2.0)),
        ],
        0.2,
    );
    assert_eq!(set.crossings.len(), 1);
    let x = set.crossings[0].geometry.x();
    assert!((2.0 - 0.2..=2.1 + 0.2).contains(&x));
}

#[test]
fn scenario_nested_zones() {
    let set = crossings(
        vec![LineString::from(vec![(0.05, 0.5), (3.5, 0.5)])],
        vec![
            Zone::new("inner", square(0.1, 0.1, 2.8, 1.9)),
            Zone::new("outer", square(0.0, 0.0, 4.0, 2.0)),
        ],
        0.02,
    );
    let xs: Vec<f64> = set.crossings.iter().map(|c| c.geometry.x()).collect();
    assert_eq!(xs.len(), 2);
    assert_relative_eq!(xs[0], 0.1, epsilon = 1e-9);
    assert_relative_eq!(xs[1], 2.8, epsilon = 1e-9);
    assert!(set.crossings.iter().all(|c| c.kind.code() == "00"));
}

/// A line that starts inside the inner zone only leaves it once
#[test]
fn scenario_nested_zones_line_starting_inside() {
    let set = crossings(
        vec![LineString::from(vec![(0.5, 0.5), (3.5, 0.5)])],
        vec![
            Zone::new("inner", square(0.1, 0.1, 2.8, 1.9)),
            Zone::new("outer", square(0.0, 0.0, 4.0, 2.0)),
        ],
        0.02,
    );
    assert_eq!(set.crossings.len(), 1);
    let c = &set.crossings[0];
    assert_eq!(c.kind, CrossingKind::Boundary);
    assert_eq!((c.zone_from, c.zone_to), (Some(0), Some(1)));
    assert_relative_eq!(c.geometry.x(), 2.8, epsilon = 1e-9);
    assert_relative_eq!(c.geometry.y(), 0.5);
}

#[test]
fn scenario_merge_then_split() {
    let mut m = Model::new();
    let a = node(&mut m, NodeType::Basin, 5.0, 5.0, None);
    let o = node(&mut m, NodeType::Outlet, 10.0, 5.0, Some(NodeData::Outlet(structure(None))));
    let b = node(&mut m, NodeType::Basin, 20.0, 5.0, None);
    m.add_area(square(0.0, 0.0, 10.0, 10.0), Some(a), None, None).unwrap();
    m.add_area(square(10.0, 0.0, 30.0, 10.0), Some(b), None, None).unwrap();
    m.add_link(a, o, LinkKind::Flow, None).unwrap();
    m.add_link(o, b, LinkKind::Flow, None).unwrap();

    m.merge_basins(a, b, true).unwrap();
    assert!(!m.contains_node(a));
    assert_relative_eq!(m.basin_polygon(b).unsigned_area(), 300.0, epsilon = 1e-6);

    let new = m
        .split_basin(&LineString::from(vec![(15.0, -1.0), (15.0, 11.0)]))
        .unwrap();
    let total = m.basin_polygon(b).unsigned_area() + m.basin_polygon(new).unsigned_area();
    assert_relative_eq!(total, 300.0, epsilon = 1e-6);
}

#[test]
fn scenario_propagation_fallback() {
    let mut m = Model::new();
    let fb = node(
        &mut m,
        NodeType::FlowBoundary,
        -10.0,
        0.0,
        Some(NodeData::FlowBoundary(FlowBoundaryStatic { flow_rate: Some(1.0) })),
    );
    let basin = node(&mut m, NodeType::Basin, 0.0, 0.0, None);
    let pump = node(&mut m, NodeType::Pump, 10.0, 0.0, Some(NodeData::Pump(structure(None))));
    let end = node(&mut m, NodeType::Terminal, 20.0, 0.0, None);
    let inflow = m.add_link(fb, basin, LinkKind::Flow, None).unwrap();
    m.add_link(basin, pump, LinkKind::Flow, None).unwrap();
    m.add_link(pump, end, LinkKind::Flow, None).unwrap();
    let profile = m.add_cross_section(CrossSection {
        id: ProfileId(0),
        bottom_level: 1.0,
        invert_level: 4.0,
        bottom_width: 2.0,
        invert_width: 8.0,
    });
    m.set_link_profile(inflow, Some(profile)).unwrap();

    let report = propagate(&mut m, &PropagationParams::default()).unwrap();
    assert!(report.unknown_basins.is_empty());
    assert_relative_eq!(m.basin(basin).unwrap().target_level.unwrap(), 2.0, epsilon = 1e-6);
}

#[test]
fn scenario_replay_idempotence() {
    let mut m = Model::new();
    m.add_node_with_id(NodeId(42), NodeType::Basin, Point::new(0.0, 0.0), NodeMeta::default(), None)
        .unwrap();
    node(&mut m, NodeType::Terminal, 5.0, 0.0, None);
    let log: BTreeMap<String, FeatureCollection> = [(
        "remove_node".to_string(),
        std::iter::once(Feature::empty().with("node_id", 42i64).with("order", 7.0)).collect(),
    )]
    .into_iter()
    .collect();

    let first = replay(&mut m, &log);
    assert_eq!((first.applied, first.failed), (1, 0));
    assert!(first.failures.is_empty());
    let after_first = serde_json::to_value(m.to_database()).unwrap();

    let second = replay(&mut m, &log);
    assert_eq!((second.applied, second.failed), (0, 1));
    let failure = &second.failures[0];
    assert_eq!(failure.operation, "remove_node");
    assert_eq!(failure.order, Some(7.0));
    assert!(matches!(&*failure.error, Error::NotFound { id, .. } if id == "42"));
    assert_eq!(serde_json::to_value(m.to_database()).unwrap(), after_first);
}

/// Zones -> crossings -> aggregation -> area assignment -> parameters ->
/// forcing -> model directory round trip
#[test]
fn pipeline_two_basins() {
    let zones = vec![
        Zone::new("A", square(0.0, 0.0, 100.0, 100.0)).with_category(Category::Hoofdwater),
        Zone::new("B", square(100.0, 0.0, 200.0, 100.0)).with_category(Category::Regional),
    ];
    let set = crossings(vec![LineString::from(vec![(50.0, 50.0), (150.0, 50.0)])], zones, 0.5);
    assert_eq!(set.in_use().count(), 1);
    let aggregation = aggregate_zones(&set, &AggregationParams { joker_area: 1.0 }).unwrap();
    assert_eq!(aggregation.groups.len(), 2);

    let mut m = Model::new();
    let b1 = node(&mut m, NodeType::Basin, 50.0, 50.0, None);
    let outlet = m
        .add_node(
            NodeType::Outlet,
            Point::new(100.0, 50.0),
            NodeMeta::default().with_code("KST1"),
            Some(NodeData::Outlet(structure(Some(-1.0)))),
        )
        .unwrap();
    let b2 = node(&mut m, NodeType::Basin, 150.0, 50.0, None);
    let pump = node(&mut m, NodeType::Pump, 200.0, 50.0, Some(NodeData::Pump(structure(Some(-1.5)))));
    let end = node(&mut m, NodeType::Terminal, 250.0, 50.0, None);
    for (from, to) in [(b1, outlet), (outlet, b2), (b2, pump), (pump, end)] {
        m.add_link(from, to, LinkKind::Flow, None).unwrap();
    }
    m.add_area(square(40.0, 40.0, 60.0, 60.0), Some(b1), None, None).unwrap();
    m.add_area(square(140.0, 40.0, 160.0, 60.0), Some(b2), None, None).unwrap();

    let candidates: Vec<CandidateArea> = aggregation
        .groups
        .iter()
        .map(|g| CandidateArea {
            code: g.codes.first().cloned(),
            geometry: union_all(g.zones.iter().map(|&i| &set.zones[i].geometry)),
        })
        .collect();
    let report = assign_basin_areas(&mut m, &candidates, None, &BTreeMap::new(), &AssignmentParams::default()).unwrap();
    assert_eq!(report.assigned.len(), 2);
    assert_relative_eq!(m.basin_polygon(b1).unsigned_area(), 10_000.0, epsilon = 1e-6);

    let report = propagate(&mut m, &PropagationParams::default()).unwrap();
    report.require_target_levels().unwrap();
    assert_relative_eq!(m.basin(b2).unwrap().target_level.unwrap(), -1.5);
    let q = |id| m.node(id).unwrap().data.as_structure().and_then(|s| s.flow_rate).unwrap();
    assert_relative_eq!(q(outlet), 15.0 / 1000.0 / 86_400.0 * 10_000.0, epsilon = 1e-12);
    assert!(q(pump) > q(outlet));

    let t0 = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
    let t1 = NaiveDate::from_ymd_opt(2020, 1, 10).unwrap().and_hms_opt(0, 0, 0).unwrap();
    let forcing = ForcingParams {
        static_forcing: StaticForcing {
            precipitation: 2.0,
            potential_evaporation: 0.5,
            ..StaticForcing::default()
        },
        start: t0,
        end: t1,
        primary_bands: Vec::new(),
    };
    assert_eq!(distribute_forcing(&mut m, None, &[], &forcing).unwrap(), 20);
    assert!(validate(&m, None, &ValidationParams::default()).is_valid());

    let dir = tempfile::tempdir().unwrap();
    let config = ModelConfig::new("pipeline", t0, t1);
    write_model(dir.path(), &config, &mut m).unwrap();
    let (loaded_config, loaded) = read_model(dir.path()).unwrap();
    assert_eq!(loaded_config, config);
    assert_eq!(loaded.node_count(), 5);
    assert_eq!(loaded.basin_time().len(), 20);
    assert_eq!(loaded.basin(b1).unwrap().target_level, Some(-1.0));
}
