//! Directed flow graph derived from the link table

use crate::model::link::Link;
use crate::model::NodeId;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use petgraph::visit::{Bfs, EdgeRef, Reversed};
use petgraph::Direction;
use std::collections::{BTreeMap, BTreeSet};

/// Neighbours of a node in one direction: a single id when there is
/// exactly one, otherwise the ordered list (possibly empty)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Adjacent {
    One(NodeId),
    Many(Vec<NodeId>),
}

impl Adjacent {
    fn from_vec(mut ids: Vec<NodeId>) -> Self {
        ids.sort_unstable();
        ids.dedup();
        if ids.len() == 1 {
            Adjacent::One(ids[0])
        } else {
            Adjacent::Many(ids)
        }
    }

    pub fn single(&self) -> Option<NodeId> {
        match self {
            Adjacent::One(id) => Some(*id),
            Adjacent::Many(_) => None,
        }
    }

    pub fn to_vec(&self) -> Vec<NodeId> {
        match self {
            Adjacent::One(id) => vec![*id],
            Adjacent::Many(ids) => ids.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Adjacent::Many(ids) if ids.is_empty())
    }
}

/// Graph over every node, with an edge per flow link
#[derive(Debug, Clone)]
pub struct NetworkGraph {
    graph: DiGraph<NodeId, ()>,
    index: BTreeMap<NodeId, NodeIndex>,
}

impl NetworkGraph {
    pub fn build<'a>(nodes: impl IntoIterator<Item = NodeId>, links: impl IntoIterator<Item = &'a Link>) -> Self {
        let mut graph = DiGraph::new();
        let mut index = BTreeMap::new();
        for id in nodes {
            index.insert(id, graph.add_node(id));
        }
        for link in links.into_iter().filter(|l| l.is_flow()) {
            if let (Some(&a), Some(&b)) = (index.get(&link.from), index.get(&link.to)) {
                graph.add_edge(a, b, ());
            }
        }
        Self { graph, index }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn neighbours(&self, id: NodeId, dir: Direction) -> Vec<NodeId> {
        match self.index.get(&id) {
            Some(&idx) => self.graph.neighbors_directed(idx, dir).map(|n| self.graph[n]).collect(),
            None => Vec::new(),
        }
    }

    pub fn upstream(&self, id: NodeId) -> Adjacent {
        Adjacent::from_vec(self.neighbours(id, Direction::Incoming))
    }

    pub fn downstream(&self, id: NodeId) -> Adjacent {
        Adjacent::from_vec(self.neighbours(id, Direction::Outgoing))
    }

    pub fn in_degree(&self, id: NodeId) -> usize {
        self.index
            .get(&id)
            .map_or(0, |&idx| self.graph.edges_directed(idx, Direction::Incoming).count())
    }

    pub fn out_degree(&self, id: NodeId) -> usize {
        self.index
            .get(&id)
            .map_or(0, |&idx| self.graph.edges_directed(idx, Direction::Outgoing).count())
    }

    /// Every node reachable downstream of `id`, excluding `id`
    pub fn all_downstream(&self, id: NodeId) -> BTreeSet<NodeId> {
        let Some(&start) = self.index.get(&id) else {
            return BTreeSet::new();
        };
        let mut bfs = Bfs::new(&self.graph, start);
        let mut out = BTreeSet::new();
        while let Some(n) = bfs.next(&self.graph) {
            if n != start {
                out.insert(self.graph[n]);
            }
        }
        out
    }

    /// Every node from which `id` can be reached, excluding `id`
    pub fn all_upstream(&self, id: NodeId) -> BTreeSet<NodeId> {
        let Some(&start) = self.index.get(&id) else {
            return BTreeSet::new();
        };
        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(reversed, start);
        let mut out = BTreeSet::new();
        while let Some(n) = bfs.next(reversed) {
            if n != start {
                out.insert(self.graph[n]);
            }
        }
        out
    }

    /// Weakly connected components, each sorted, ordered by smallest member
    pub fn components(&self) -> Vec<Vec<NodeId>> {
        let mut uf = UnionFind::new(self.graph.node_count());
        for edge in self.graph.edge_references() {
            uf.union(edge.source().index(), edge.target().index());
        }
        let mut groups: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
        for idx in self.graph.node_indices() {
            groups.entry(uf.find(idx.index())).or_default().push(self.graph[idx]);
        }
        let mut out: Vec<Vec<NodeId>> = groups
            .into_values()
            .map(|mut g| {
                g.sort_unstable();
                g
            })
            .collect();
        out.sort_by_key(|g| g[0]);
        out
    }
}
