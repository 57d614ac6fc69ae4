//! Aggregation of water-level zones into larger groups
//!
//! Crossings turn the zones into a directed graph. Groups grow along that
//! graph by category: neighbours with the same category join, and zones
//! smaller than the joker area join any group as wildcards. Zones that
//! drain in parallel into the same zone are grouped as well, and groups
//! sharing a zone are fused.

use crate::crossings::CrossingSet;
use hydronet_core::model::Category;
use hydronet_core::{Algorithm, Error, Result};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Parameters for zone aggregation
#[derive(Debug, Clone)]
pub struct AggregationParams {
    /// Zones below this area act as category wildcards (m²)
    pub joker_area: f64,
}

impl Default for AggregationParams {
    fn default() -> Self {
        Self { joker_area: 10_000.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateGroup {
    pub label: u32,
    pub category: Option<Category>,
    /// Zone indices, ascending
    pub zones: Vec<usize>,
    pub codes: Vec<String>,
    pub area: f64,
}

/// Group label per zone plus the groups themselves
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    /// `labels[i]` is the group label of zone `i`, starting at 1
    pub labels: Vec<u32>,
    pub groups: Vec<AggregateGroup>,
}

impl Aggregation {
    pub fn label_of(&self, zone: usize) -> Option<u32> {
        self.labels.get(zone).copied()
    }
}

/// Zone aggregation algorithm
#[derive(Debug, Clone, Default)]
pub struct AggregateZones;

impl Algorithm for AggregateZones {
    type Input = CrossingSet;
    type Output = Aggregation;
    type Params = AggregationParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Aggregation"
    }

    fn description(&self) -> &'static str {
        "Cluster water-level zones into category groups along the crossing graph"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        aggregate_zones(&input, &params)
    }
}

/// Zone graph: one node per zone plus one synthetic node per crossing
/// that leads out of (or in from) no zone.
fn zone_graph(set: &CrossingSet) -> (DiGraph<Option<usize>, ()>, Vec<NodeIndex>) {
    let mut graph: DiGraph<Option<usize>, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..set.zones.len()).map(|i| graph.add_node(Some(i))).collect();
    for c in set.in_use().filter(|c| c.is_boundary()) {
        let mut endpoint = |zone: Option<usize>| match zone.and_then(|z| nodes.get(z)) {
            Some(&n) => n,
            None => graph.add_node(None),
        };
        let from = endpoint(c.zone_from);
        let to = endpoint(c.zone_to);
        if from != to {
            graph.update_edge(from, to, ());
        }
    }
    (graph, nodes)
}

/// Source zones of equal category draining into the same node
fn parallel_pairs(
    graph: &DiGraph<Option<usize>, ()>,
    category: &[Option<Category>],
) -> Vec<Vec<usize>> {
    let mut groups = Vec::new();
    for v in graph.node_indices() {
        let mut by_category: BTreeMap<Category, Vec<usize>> = BTreeMap::new();
        for u in graph.neighbors_directed(v, Direction::Incoming) {
            let Some(zone) = graph[u] else {
                continue;
            };
            if graph.neighbors_directed(u, Direction::Incoming).next().is_some() {
                continue;
            }
            if let Some(cat) = category[zone] {
                by_category.entry(cat).or_default().push(zone);
            }
        }
        for mut members in by_category.into_values() {
            members.sort_unstable();
            members.dedup();
            if members.len() >= 2 {
                groups.push(members);
            }
        }
    }
    groups
}

fn compatible(a: Option<Category>, b: Option<Category>) -> bool {
    a.is_none() || b.is_none() || a == b
}

/// Assign every zone of `set` a group label.
pub fn aggregate_zones(set: &CrossingSet, params: &AggregationParams) -> Result<Aggregation> {
    if params.joker_area.is_nan() || params.joker_area < 0.0 {
        return Err(Error::InvalidParameter {
            name: "joker_area",
            value: params.joker_area.to_string(),
            reason: "must be a non-negative number".into(),
        });
    }
    let zones = &set.zones;
    let n = zones.len();
    let areas: Vec<f64> = zones.iter().map(|z| z.area()).collect();
    let wildcard: Vec<bool> = (0..n)
        .map(|i| zones[i].category.is_none() || areas[i] < params.joker_area)
        .collect();
    let category: Vec<Option<Category>> = zones.iter().map(|z| z.category).collect();

    let (graph, nodes) = zone_graph(set);
    let parallel = parallel_pairs(&graph, &category);

    // largest non-wildcards seed first so wildcards take their category
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        wildcard[a]
            .cmp(&wildcard[b])
            .then(areas[b].total_cmp(&areas[a]))
            .then(a.cmp(&b))
    });

    let mut visited = vec![false; n];
    let mut group_of = vec![0usize; n];
    let mut group_category: Vec<Option<Category>> = Vec::new();
    for &seed in &order {
        if visited[seed] {
            continue;
        }
        let g = group_category.len();
        let mut cat = if wildcard[seed] { None } else { category[seed] };
        visited[seed] = true;
        let mut stack = vec![seed];
        while let Some(u) = stack.pop() {
            group_of[u] = g;
            for w in graph.neighbors_undirected(nodes[u]) {
                let Some(z) = graph[w] else {
                    continue;
                };
                if visited[z] {
                    continue;
                }
                if !wildcard[z] {
                    if !compatible(cat, category[z]) {
                        continue;
                    }
                    cat = cat.or(category[z]);
                }
                visited[z] = true;
                stack.push(z);
            }
        }
        group_category.push(cat);
    }

    let mut uf: UnionFind<usize> = UnionFind::new(group_category.len());
    loop {
        let mut changed = false;
        for members in &parallel {
            let first = members[0];
            for &other in &members[1..] {
                let (a, b) = (uf.find(group_of[first]), uf.find(group_of[other]));
                if a == b || !compatible(group_category[a], group_category[b]) {
                    continue;
                }
                let merged = group_category[a].or(group_category[b]);
                uf.union(a, b);
                group_category[uf.find(a)] = merged;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    // labels follow the lowest zone index of each group
    let mut label_of_root: BTreeMap<usize, u32> = BTreeMap::new();
    let mut labels = vec![0u32; n];
    let mut groups: Vec<AggregateGroup> = Vec::new();
    for zone in 0..n {
        let root = uf.find(group_of[zone]);
        let next = label_of_root.len() as u32 + 1;
        let label = *label_of_root.entry(root).or_insert(next);
        labels[zone] = label;
        if label as usize > groups.len() {
            groups.push(AggregateGroup {
                label,
                category: group_category[root],
                zones: Vec::new(),
                codes: Vec::new(),
                area: 0.0,
            });
        }
        let group = &mut groups[label as usize - 1];
        group.zones.push(zone);
        group.codes.push(zones[zone].code.clone());
        group.area += areas[zone];
    }

    debug!("{} parallel source groups", parallel.len());
    info!("aggregated {n} zones into {} groups", groups.len());
    Ok(Aggregation { labels, groups })
}
