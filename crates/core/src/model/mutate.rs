//! Mutation API
//!
//! Every operation checks all of its preconditions before it writes, so a
//! failed call leaves the model exactly as it was. Successful writes drop
//! the cached graph.

use super::*;
use crate::geometry::{line_length, split_polygon, union_all};
use geo::{Area, Coord, InteriorPoint, LineString, MultiPolygon, Point};
use tracing::{debug, info, warn};

/// How [`Model::fix_unassigned_basin_area`] picks a basin for an orphan area
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AreaFixMethod {
    /// The single Basin node whose point lies inside the polygon
    Within,
    /// The single Basin node nearest to the polygon, within `distance`
    Closest { distance: f64 },
}

fn straight(a: Point<f64>, b: Point<f64>) -> LineString<f64> {
    LineString::from(vec![a.0, b.0])
}

fn node_polygon_distance(point: Point<f64>, polygon: &MultiPolygon<f64>) -> f64 {
    if polygon.contains(&point) {
        return 0.0;
    }
    polygon
        .0
        .iter()
        .flat_map(|p| std::iter::once(p.exterior()).chain(p.interiors()))
        .map(|ring| crate::geometry::point_line_distance(point.0, ring))
        .fold(f64::INFINITY, f64::min)
}

impl Model {
    fn touch(&mut self) {
        self.reset_graph();
    }

    fn resolve_data(&self, node_type: NodeType, data: Option<NodeData>) -> Result<NodeData> {
        match data {
            Some(d) if d.node_type() == node_type => Ok(d),
            Some(d) => Err(Error::invariant(
                "row-consistency",
                format!("data for {} supplied to a {node_type} node", d.node_type()),
            )),
            None => NodeData::unparameterized(node_type).ok_or_else(|| {
                Error::invariant(
                    "row-consistency",
                    format!("{node_type} requires static data"),
                )
            }),
        }
    }

    fn check_pair(&self, kind: LinkKind, from: NodeId, to: NodeId, skip: Option<LinkId>) -> Result<()> {
        if from == to {
            return Err(Error::invariant(
                "link-endpoints",
                format!("link would start and end at node {from}"),
            ));
        }
        let from_type = self.node(from)?.node_type();
        let to_type = self.node(to)?.node_type();
        if !can_connect(kind, from_type, to_type) {
            return Err(Error::invariant(
                "type-pair",
                format!("{kind:?} link {from_type} {from} -> {to_type} {to} not permitted"),
            ));
        }
        let duplicate = self
            .links
            .values()
            .any(|l| Some(l.id) != skip && l.from == from && l.to == to && l.kind == kind);
        if duplicate {
            return Err(Error::invariant(
                "duplicate-pair",
                format!("a link {from} -> {to} already exists"),
            ));
        }
        Ok(())
    }

    // --- nodes ---

    /// Add a node with the next free identifier.
    ///
    /// `data` may be omitted for types that need no parameters; for the
    /// parameterized types it is required and must match `node_type`.
    pub fn add_node(
        &mut self,
        node_type: NodeType,
        geometry: Point<f64>,
        meta: NodeMeta,
        data: Option<NodeData>,
    ) -> Result<NodeId> {
        let id = self.next_node_id();
        self.add_node_with_id(id, node_type, geometry, meta, data)?;
        Ok(id)
    }

    /// Add a node under a caller-chosen identifier
    pub fn add_node_with_id(
        &mut self,
        id: NodeId,
        node_type: NodeType,
        geometry: Point<f64>,
        meta: NodeMeta,
        data: Option<NodeData>,
    ) -> Result<()> {
        if self.nodes.contains_key(&id) {
            return Err(Error::invariant("unique-id", format!("node {id} already exists")));
        }
        if !geometry.x().is_finite() || !geometry.y().is_finite() {
            return Err(Error::Geometry(format!("node {id} has a non-finite point")));
        }
        let data = self.resolve_data(node_type, data)?;
        self.nodes.insert(id, Node { id, geometry, meta, data });
        self.touch();
        debug!("added {node_type} node {id}");
        Ok(())
    }

    /// Remove a node with its area rows and time series.
    ///
    /// Incident links are removed when `cascade_links` is set; otherwise
    /// their presence fails the call with [`Error::InUse`].
    pub fn remove_node(&mut self, id: NodeId, cascade_links: bool) -> Result<()> {
        self.node(id)?;
        let incident: Vec<LinkId> = self.incident_links(id).map(|l| l.id).collect();
        if !incident.is_empty() && !cascade_links {
            return Err(Error::InUse {
                kind: "node",
                id: id.to_string(),
                links: incident.iter().map(ToString::to_string).collect(),
            });
        }
        for link in &incident {
            self.links.remove(link);
        }
        self.areas.retain(|_, a| a.node_id != Some(id));
        self.basin_time.retain(|r| r.node_id != id);
        self.nodes.remove(&id);
        self.touch();
        info!("removed node {id} and {} link(s)", incident.len());
        Ok(())
    }

    /// Replace a node's type, discarding its old type-specific rows.
    ///
    /// A Basin that changes type keeps its area rows, now unassigned, so
    /// they can be re-homed by [`Model::fix_unassigned_basin_area`].
    pub fn update_node(&mut self, id: NodeId, new_type: NodeType, new_data: Option<NodeData>) -> Result<()> {
        let old_type = self.node(id)?.node_type();
        let data = self.resolve_data(new_type, new_data)?;
        for link in self.incident_links(id) {
            let from_type = if link.from == id { new_type } else { self.node(link.from)?.node_type() };
            let to_type = if link.to == id { new_type } else { self.node(link.to)?.node_type() };
            if !can_connect(link.kind, from_type, to_type) {
                return Err(Error::invariant(
                    "type-pair",
                    format!("link {} would become {from_type} -> {to_type}", link.id),
                ));
            }
        }

        if old_type == NodeType::Basin && new_type != NodeType::Basin {
            for area in self.areas.values_mut().filter(|a| a.node_id == Some(id)) {
                area.node_id = None;
            }
            self.basin_time.retain(|r| r.node_id != id);
        }
        if let Some(node) = self.nodes.get_mut(&id) {
            node.data = data;
        }
        self.touch();
        info!("node {id} changed from {old_type} to {new_type}");
        Ok(())
    }

    /// Edit a node's data in place. The type may not change.
    pub fn update_node_data(&mut self, id: NodeId, edit: impl FnOnce(&mut NodeData)) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or_else(|| Error::not_found("node", id))?;
        let before = node.node_type();
        let mut data = node.data.clone();
        edit(&mut data);
        if data.node_type() != before {
            return Err(Error::invariant(
                "row-consistency",
                format!("node {id} data changed type from {before} to {}", data.node_type()),
            ));
        }
        node.data = data;
        Ok(())
    }

    pub fn update_node_meta(&mut self, id: NodeId, edit: impl FnOnce(&mut NodeMeta)) -> Result<()> {
        let node = self.nodes.get_mut(&id).ok_or_else(|| Error::not_found("node", id))?;
        edit(&mut node.meta);
        Ok(())
    }

    /// Move a node. Link geometries follow on [`Model::snap_links`].
    pub fn move_node(&mut self, id: NodeId, geometry: Point<f64>) -> Result<()> {
        if !geometry.x().is_finite() || !geometry.y().is_finite() {
            return Err(Error::Geometry(format!("node {id} moved to a non-finite point")));
        }
        let node = self.nodes.get_mut(&id).ok_or_else(|| Error::not_found("node", id))?;
        node.geometry = geometry;
        Ok(())
    }

    // --- links ---

    /// Add a link; the geometry defaults to a straight line between the nodes.
    pub fn add_link(
        &mut self,
        from: NodeId,
        to: NodeId,
        kind: LinkKind,
        geometry: Option<LineString<f64>>,
    ) -> Result<LinkId> {
        self.check_pair(kind, from, to, None)?;
        let geometry = match geometry {
            Some(g) if g.0.len() >= 2 => g,
            _ => straight(self.node(from)?.geometry, self.node(to)?.geometry),
        };
        let id = self.next_link_id();
        self.links.insert(
            id,
            Link {
                id,
                from,
                to,
                kind,
                geometry,
                name: String::new(),
                category: None,
                profile_id: None,
            },
        );
        self.touch();
        Ok(id)
    }

    pub fn remove_link(&mut self, id: LinkId) -> Result<()> {
        self.links.remove(&id).ok_or_else(|| Error::not_found("link", id))?;
        self.touch();
        Ok(())
    }

    /// Point one or both ends of a link at other nodes
    pub fn redirect_link(&mut self, id: LinkId, from: Option<NodeId>, to: Option<NodeId>) -> Result<()> {
        let link = self.link(id)?;
        let new_from = from.unwrap_or(link.from);
        let new_to = to.unwrap_or(link.to);
        self.check_pair(link.kind, new_from, new_to, Some(id))?;
        let from_point = self.node(new_from)?.geometry;
        let to_point = self.node(new_to)?.geometry;
        if let Some(link) = self.links.get_mut(&id) {
            link.from = new_from;
            link.to = new_to;
            let coords = &mut link.geometry.0;
            if coords.len() < 2 {
                link.geometry = straight(from_point, to_point);
            } else {
                coords[0] = from_point.0;
                let last = coords.len() - 1;
                coords[last] = to_point.0;
            }
        }
        self.touch();
        info!("link {id} now runs {new_from} -> {new_to}");
        Ok(())
    }

    pub fn reverse_link(&mut self, id: LinkId) -> Result<()> {
        let link = self.link(id)?;
        self.check_pair(link.kind, link.to, link.from, Some(id))?;
        if let Some(link) = self.links.get_mut(&id) {
            std::mem::swap(&mut link.from, &mut link.to);
            link.geometry.0.reverse();
        }
        self.touch();
        Ok(())
    }

    /// Attach a cross-section to a link
    pub fn set_link_profile(&mut self, id: LinkId, profile: Option<ProfileId>) -> Result<()> {
        if let Some(pid) = profile {
            self.cross_section(pid)?;
        }
        let link = self.links.get_mut(&id).ok_or_else(|| Error::not_found("link", id))?;
        link.profile_id = profile;
        Ok(())
    }

    pub fn update_link_meta(&mut self, id: LinkId, name: String, category: Option<Category>) -> Result<()> {
        let link = self.links.get_mut(&id).ok_or_else(|| Error::not_found("link", id))?;
        link.name = name;
        link.category = category;
        Ok(())
    }

    /// Re-anchor every link geometry on its endpoint nodes
    pub fn snap_links(&mut self) {
        let points: BTreeMap<NodeId, Point<f64>> = self.nodes.values().map(|n| (n.id, n.geometry)).collect();
        for link in self.links.values_mut() {
            let (Some(&a), Some(&b)) = (points.get(&link.from), points.get(&link.to)) else {
                continue;
            };
            if link.geometry.0.len() < 2 {
                link.geometry = straight(a, b);
                continue;
            }
            let last = link.geometry.0.len() - 1;
            link.geometry.0[0] = a.0;
            link.geometry.0[last] = b.0;
        }
    }

    pub fn add_cross_section(&mut self, mut cross_section: CrossSection) -> ProfileId {
        let id = self
            .cross_sections
            .keys()
            .next_back()
            .map_or(ProfileId(1), |id| id.next());
        cross_section.id = id;
        self.cross_sections.insert(id, cross_section);
        id
    }

    // --- basins ---

    /// Fold `src` into `dst`.
    ///
    /// Structure nodes whose flow links only run between the two basins are
    /// connectors and are dropped with their links. With `are_connected`
    /// at least one connector must exist. Remaining links of `src` move to
    /// `dst` (links that would duplicate an existing pair are dropped), the
    /// area polygons are unioned and `src` is deleted.
    pub fn merge_basins(&mut self, src: NodeId, dst: NodeId, are_connected: bool) -> Result<()> {
        if src == dst {
            return Err(Error::invariant("link-endpoints", format!("cannot merge basin {src} into itself")));
        }
        self.basin(src)?;
        self.basin(dst)?;

        let pair = [src, dst];
        let connectors: BTreeSet<NodeId> = self
            .incident_links(src)
            .filter(|l| l.is_flow())
            .filter_map(|l| l.other_end(src))
            .filter(|&c| {
                let flow: Vec<&Link> = self.incident_links(c).filter(|l| l.is_flow()).collect();
                flow.iter().all(|l| l.other_end(c).is_some_and(|o| pair.contains(&o)))
                    && flow.iter().any(|l| l.other_end(c) == Some(dst))
            })
            .collect();
        if are_connected && connectors.is_empty() {
            return Err(Error::not_found("connection between basins", format!("{src}-{dst}")));
        }

        let drop_links: BTreeSet<LinkId> = self
            .links
            .values()
            .filter(|l| connectors.contains(&l.from) || connectors.contains(&l.to))
            .map(|l| l.id)
            .collect();
        let dst_point = self.node(dst)?.geometry;

        let mut pairs: BTreeSet<(NodeId, NodeId, LinkKind)> = self
            .links
            .values()
            .filter(|l| !drop_links.contains(&l.id) && l.from != src && l.to != src)
            .map(|l| (l.from, l.to, l.kind))
            .collect();
        let mut rehome = Vec::new();
        let mut duplicates = Vec::new();
        for link in self.incident_links(src).filter(|l| !drop_links.contains(&l.id)) {
            let from = if link.from == src { dst } else { link.from };
            let to = if link.to == src { dst } else { link.to };
            if pairs.insert((from, to, link.kind)) {
                rehome.push((link.id, from, to));
            } else {
                duplicates.push(link.id);
            }
        }

        for id in drop_links.iter().chain(&duplicates) {
            self.links.remove(id);
        }
        for connector in &connectors {
            self.nodes.remove(connector);
            self.areas.retain(|_, a| a.node_id != Some(*connector));
        }
        for (id, from, to) in rehome {
            if let Some(link) = self.links.get_mut(&id) {
                let end = if link.from == src {
                    link.geometry.0.first_mut()
                } else {
                    link.geometry.0.last_mut()
                };
                if let Some(end) = end {
                    *end = dst_point.0;
                }
                link.from = from;
                link.to = to;
            }
        }

        let src_rows: Vec<AreaId> = self.areas_of(src).map(|a| a.id).collect();
        let dst_rows: Vec<AreaId> = self.areas_of(dst).map(|a| a.id).collect();
        match dst_rows.first() {
            Some(&keep) => {
                let merged = union_all(
                    src_rows
                        .iter()
                        .chain(&dst_rows)
                        .filter_map(|id| self.areas.get(id))
                        .map(|a| &a.geometry),
                );
                for id in src_rows.iter().chain(&dst_rows[1..]) {
                    self.areas.remove(id);
                }
                if let Some(row) = self.areas.get_mut(&keep) {
                    row.geometry = merged;
                }
            }
            None => {
                for id in &src_rows {
                    if let Some(row) = self.areas.get_mut(id) {
                        row.node_id = Some(dst);
                    }
                }
            }
        }
        self.basin_time.retain(|r| r.node_id != src);
        self.nodes.remove(&src);
        self.touch();
        info!(
            "merged basin {src} into {dst}, dropped {} connector(s)",
            connectors.len()
        );
        Ok(())
    }

    /// Cut a basin area in two along `line` and give the second half its own Basin.
    ///
    /// The part holding the original basin point keeps the node (the larger
    /// part if neither does). The new Basin sits at an interior point of the
    /// other part, copies the original's data and takes over the links whose
    /// far end lies in its part. Returns the new node id.
    pub fn split_basin(&mut self, line: &LineString<f64>) -> Result<NodeId> {
        let mut hits = Vec::new();
        for area in self.areas.values() {
            if let Ok(parts) = split_polygon(&area.geometry, line) {
                hits.push((area.id, parts));
            }
        }
        let (area_id, (left, right)) = match hits.len() {
            0 => return Err(Error::not_found("basin area crossed by line", format!("{line:?}"))),
            1 => hits.remove(0),
            _ => {
                return Err(Error::Ambiguous {
                    what: "basin area to split".into(),
                    candidates: hits.iter().map(|h| h.0.to_string()).collect(),
                })
            }
        };
        let area = self.area(area_id)?.clone();
        let basin_id = area.node_id.ok_or_else(|| Error::Unassigned {
            quantity: "basin",
            kind: "basin area",
            id: area_id.to_string(),
        })?;
        let basin_node = self.node(basin_id)?.clone();
        if basin_node.data.as_basin().is_none() {
            return Err(Error::invariant(
                "area-basin",
                format!("area {area_id} is assigned to non-basin node {basin_id}"),
            ));
        }

        let (keep, other) = if left.contains(&basin_node.geometry) {
            (left, right)
        } else if right.contains(&basin_node.geometry) {
            (right, left)
        } else if left.unsigned_area() >= right.unsigned_area() {
            (left, right)
        } else {
            (right, left)
        };
        let new_point = other
            .interior_point()
            .ok_or_else(|| Error::Geometry(format!("split part of area {area_id} has no interior")))?;

        let new_id = self.next_node_id();
        let moved: Vec<LinkId> = self
            .incident_links(basin_id)
            .filter(|l| {
                l.other_end(basin_id)
                    .and_then(|o| self.nodes.get(&o))
                    .is_some_and(|o| other.contains(&o.geometry))
            })
            .map(|l| l.id)
            .collect();

        let new_area_id = self.next_area_id();
        self.nodes.insert(
            new_id,
            Node {
                id: new_id,
                geometry: new_point,
                meta: basin_node.meta.clone(),
                data: basin_node.data.clone(),
            },
        );
        if let Some(row) = self.areas.get_mut(&area_id) {
            row.geometry = keep;
        }
        self.areas.insert(
            new_area_id,
            BasinArea {
                id: new_area_id,
                node_id: Some(new_id),
                geometry: other,
                code: area.code.clone(),
                target_level: area.target_level,
            },
        );
        for id in &moved {
            if let Some(link) = self.links.get_mut(id) {
                let end = if link.from == basin_id {
                    link.from = new_id;
                    link.geometry.0.first_mut()
                } else {
                    link.to = new_id;
                    link.geometry.0.last_mut()
                };
                if let Some(end) = end {
                    *end = new_point.0;
                }
            }
        }
        let copied: Vec<BasinTimeRow> = self
            .basin_time
            .iter()
            .filter(|r| r.node_id == basin_id)
            .map(|r| BasinTimeRow { node_id: new_id, ..*r })
            .collect();
        self.basin_time.extend(copied);
        self.touch();
        info!("split basin {basin_id}: new basin {new_id} takes {} link(s)", moved.len());
        Ok(new_id)
    }

    /// Insert a structure between two nodes and connect it with two flow links
    pub fn add_and_connect_node(
        &mut self,
        from: NodeId,
        to: NodeId,
        geometry: Point<f64>,
        node_type: NodeType,
        data: Option<NodeData>,
        name: Option<String>,
    ) -> Result<NodeId> {
        let from_node = self.node(from)?;
        let to_node = self.node(to)?;
        let (from_type, to_type) = (from_node.node_type(), to_node.node_type());
        let (from_point, to_point) = (from_node.geometry, to_node.geometry);
        if !can_connect(LinkKind::Flow, from_type, node_type) || !can_connect(LinkKind::Flow, node_type, to_type) {
            return Err(Error::invariant(
                "type-pair",
                format!("{from_type} -> {node_type} -> {to_type} not permitted"),
            ));
        }
        let data = self.resolve_data(node_type, data)?;
        let id = self.next_node_id();
        let meta = NodeMeta::named(name.unwrap_or_default());
        self.nodes.insert(id, Node { id, geometry, meta, data });
        let first = self.next_link_id();
        let second = first.next();
        for (lid, a, b, pa, pb) in [
            (first, from, id, from_point, geometry),
            (second, id, to, geometry, to_point),
        ] {
            self.links.insert(
                lid,
                Link {
                    id: lid,
                    from: a,
                    to: b,
                    kind: LinkKind::Flow,
                    geometry: straight(pa, pb),
                    name: String::new(),
                    category: None,
                    profile_id: None,
                },
            );
        }
        self.touch();
        info!("inserted {node_type} {id} between {from} and {to}");
        Ok(id)
    }

    // --- areas ---

    pub fn add_area(
        &mut self,
        geometry: MultiPolygon<f64>,
        node_id: Option<NodeId>,
        code: Option<String>,
        target_level: Option<f64>,
    ) -> Result<AreaId> {
        if let Some(nid) = node_id {
            self.basin(nid)?;
        }
        let id = self.next_area_id();
        self.areas.insert(
            id,
            BasinArea {
                id,
                node_id,
                geometry,
                code,
                target_level,
            },
        );
        Ok(id)
    }

    /// Assign an area row to a Basin, or detach it
    pub fn set_area_node(&mut self, area: AreaId, node_id: Option<NodeId>) -> Result<()> {
        if let Some(nid) = node_id {
            self.basin(nid)?;
        }
        let row = self.areas.get_mut(&area).ok_or_else(|| Error::not_found("basin area", area))?;
        row.node_id = node_id;
        Ok(())
    }

    pub fn remove_area(&mut self, area: AreaId) -> Result<BasinArea> {
        self.areas.remove(&area).ok_or_else(|| Error::not_found("basin area", area))
    }

    /// Replace all area rows with `rows`, each assigned to a Basin
    pub fn replace_areas(&mut self, rows: Vec<(NodeId, MultiPolygon<f64>)>) -> Result<()> {
        for (nid, _) in &rows {
            self.basin(*nid)?;
        }
        self.areas.clear();
        for (i, (nid, geometry)) in rows.into_iter().enumerate() {
            let id = AreaId(i as i32 + 1);
            self.areas.insert(
                id,
                BasinArea {
                    id,
                    node_id: Some(nid),
                    geometry,
                    code: None,
                    target_level: None,
                },
            );
        }
        Ok(())
    }

    /// Attach area rows without a basin to an existing Basin.
    ///
    /// Orphans that match no basin, or several equally well, stay unassigned
    /// and are logged. When the chosen basin already has an area row the
    /// orphan is unioned into it. Returns the number of rows attached.
    pub fn fix_unassigned_basin_area(&mut self, method: AreaFixMethod) -> Result<usize> {
        if let AreaFixMethod::Closest { distance } = method {
            if distance.is_nan() || distance < 0.0 {
                return Err(Error::InvalidParameter {
                    name: "distance",
                    value: distance.to_string(),
                    reason: "must be a non-negative number".into(),
                });
            }
        }
        let basins: Vec<(NodeId, Point<f64>)> = self
            .nodes_of_type(NodeType::Basin)
            .map(|n| (n.id, n.geometry))
            .collect();
        let orphans: Vec<AreaId> = self.unassigned_areas().map(|a| a.id).collect();

        let mut fixed = 0;
        for area_id in orphans {
            let polygon = self.area(area_id)?.geometry.clone();
            let candidates: Vec<NodeId> = match method {
                AreaFixMethod::Within => basins
                    .iter()
                    .filter(|(_, p)| polygon.contains(p))
                    .map(|(id, _)| *id)
                    .collect(),
                AreaFixMethod::Closest { distance } => {
                    let scored: Vec<(NodeId, f64)> = basins
                        .iter()
                        .map(|(id, p)| (*id, node_polygon_distance(*p, &polygon)))
                        .filter(|(_, d)| *d <= distance)
                        .collect();
                    let best = scored.iter().map(|s| s.1).fold(f64::INFINITY, f64::min);
                    scored
                        .into_iter()
                        .filter(|(_, d)| *d <= best + 1e-9)
                        .map(|(id, _)| id)
                        .collect()
                }
            };
            let &[basin] = candidates.as_slice() else {
                warn!(
                    "area {area_id} left unassigned: {} candidate basin(s) by {method:?}",
                    candidates.len()
                );
                continue;
            };
            let existing = self.areas_of(basin).map(|a| a.id).next();
            match existing {
                Some(existing) => {
                    let merged = self
                        .areas
                        .get(&existing)
                        .map(|row| crate::geometry::union(&row.geometry, &polygon))
                        .unwrap_or_else(|| polygon.clone());
                    if let Some(row) = self.areas.get_mut(&existing) {
                        row.geometry = merged;
                    }
                    self.areas.remove(&area_id);
                }
                None => {
                    if let Some(row) = self.areas.get_mut(&area_id) {
                        row.node_id = Some(basin);
                    }
                }
            }
            debug!("area {area_id} attached to basin {basin}");
            fixed += 1;
        }
        Ok(fixed)
    }

    /// Replace the dynamic forcing rows
    pub fn set_basin_time(&mut self, rows: Vec<BasinTimeRow>) -> Result<()> {
        for row in &rows {
            self.basin(row.node_id)?;
        }
        self.basin_time = rows;
        Ok(())
    }

    /// Total length of the links touching a node
    pub fn incident_length(&self, id: NodeId) -> f64 {
        self.incident_links(id).map(|l| line_length(&l.geometry)).sum()
    }

    /// Coordinate of a node as a plain coordinate
    pub fn node_coord(&self, id: NodeId) -> Result<Coord<f64>> {
        Ok(self.node(id)?.geometry.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::rectangle;
    use approx::assert_relative_eq;

    fn mp(p: geo::Polygon<f64>) -> MultiPolygon<f64> {
        MultiPolygon(vec![p])
    }

    fn basin(model: &mut Model, x: f64, y: f64) -> NodeId {
        model
            .add_node(NodeType::Basin, Point::new(x, y), NodeMeta::default(), None)
            .unwrap()
    }

    fn outlet() -> Option<NodeData> {
        Some(NodeData::Outlet(StructureStatic::default()))
    }

    /// Basin a (0..10) -> outlet -> basin b (10..30), both 10 high
    fn two_basins() -> (Model, NodeId, NodeId, NodeId) {
        let mut m = Model::new();
        let a = basin(&mut m, 5.0, 5.0);
        let b = basin(&mut m, 20.0, 5.0);
        m.add_area(mp(rectangle(0.0, 0.0, 10.0, 10.0)), Some(a), None, None).unwrap();
        m.add_area(mp(rectangle(10.0, 0.0, 30.0, 10.0)), Some(b), None, None).unwrap();
        let o = m
            .add_and_connect_node(a, b, Point::new(10.0, 5.0), NodeType::Outlet, outlet(), None)
            .unwrap();
        (m, a, b, o)
    }

    #[test]
    fn test_add_then_remove_is_identity() {
        let (mut m, ..) = two_basins();
        let before: Vec<Node> = m.nodes().cloned().collect();
        let t = m
            .add_node(NodeType::Terminal, Point::new(50.0, 0.0), NodeMeta::default(), None)
            .unwrap();
        m.remove_node(t, false).unwrap();
        let after: Vec<Node> = m.nodes().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_parameterized_type_requires_data() {
        let mut m = Model::new();
        let err = m.add_node(NodeType::Pump, Point::new(0.0, 0.0), NodeMeta::default(), None);
        assert!(matches!(err, Err(Error::InvariantViolation { rule: "row-consistency", .. })));
        assert_eq!(m.node_count(), 0);
    }

    #[test]
    fn test_remove_node_in_use() {
        let (mut m, a, ..) = two_basins();
        assert!(matches!(m.remove_node(a, false), Err(Error::InUse { .. })));
        m.remove_node(a, true).unwrap();
        assert_eq!(m.link_count(), 1);
        assert_eq!(m.areas().count(), 1);
        assert!(m.remove_node(a, true).unwrap_err().is_not_found());
    }

    #[test]
    fn test_reverse_twice_is_identity() {
        let mut m = Model::new();
        let p = m
            .add_node(NodeType::Pump, Point::new(0.0, 0.0), NodeMeta::default(), Some(NodeData::Pump(StructureStatic::default())))
            .unwrap();
        let o = m
            .add_node(NodeType::Outlet, Point::new(1.0, 0.0), NodeMeta::default(), outlet())
            .unwrap();
        let a = basin(&mut m, 0.5, 1.0);
        let l = m.add_link(p, a, LinkKind::Flow, None).unwrap();
        m.add_link(a, o, LinkKind::Flow, None).unwrap();
        let before = m.link(l).unwrap().clone();
        m.reverse_link(l).unwrap();
        assert_eq!(m.link(l).unwrap().from, a);
        m.reverse_link(l).unwrap();
        assert_eq!(m.link(l).unwrap(), &before);
    }

    #[test]
    fn test_type_pair_enforced() {
        let mut m = Model::new();
        let lb = m
            .add_node(
                NodeType::LevelBoundary,
                Point::new(0.0, 0.0),
                NodeMeta::default(),
                Some(NodeData::LevelBoundary(LevelBoundaryStatic { level: Some(0.0) })),
            )
            .unwrap();
        let mr = m
            .add_node(
                NodeType::ManningResistance,
                Point::new(1.0, 0.0),
                NodeMeta::default(),
                Some(NodeData::ManningResistance(ManningStatic::default())),
            )
            .unwrap();
        let err = m.add_link(lb, mr, LinkKind::Flow, None).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation { rule: "type-pair", .. }));
        assert_eq!(m.link_count(), 0);
    }

    #[test]
    fn test_redirect_rejects_duplicate_and_loop() {
        let (mut m, a, b, o) = two_basins();
        let l = m.find_link(a, o, LinkKind::Flow).unwrap().id;
        let err = m.redirect_link(l, Some(o), None).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation { rule: "link-endpoints", .. }));
        let c = basin(&mut m, 40.0, 5.0);
        let l2 = m.find_link(o, b, LinkKind::Flow).unwrap().id;
        m.redirect_link(l2, None, Some(c)).unwrap();
        assert_eq!(m.downstream_node_id(o).unwrap(), Adjacent::One(c));
        let end = *m.link(l2).unwrap().geometry.0.last().unwrap();
        assert_eq!(end, Coord { x: 40.0, y: 5.0 });
    }

    #[test]
    fn test_update_basin_to_terminal_detaches_area() {
        let mut m = Model::new();
        let a = basin(&mut m, 5.0, 5.0);
        m.add_area(mp(rectangle(0.0, 0.0, 10.0, 10.0)), Some(a), None, None).unwrap();
        m.update_node(a, NodeType::Terminal, None).unwrap();
        assert_eq!(m.node(a).unwrap().node_type(), NodeType::Terminal);
        assert_eq!(m.unassigned_areas().count(), 1);
    }

    #[test]
    fn test_update_node_checks_links() {
        let (mut m, a, ..) = two_basins();
        let err = m.update_node(a, NodeType::Terminal, None).unwrap_err();
        assert!(matches!(err, Error::InvariantViolation { rule: "type-pair", .. }));
        assert_eq!(m.node(a).unwrap().node_type(), NodeType::Basin);
    }

    #[test]
    fn test_merge_then_split_keeps_area() {
        let (mut m, a, b, o) = two_basins();
        m.merge_basins(a, b, true).unwrap();
        assert!(m.get_node(a).is_none());
        assert!(m.get_node(o).is_none());
        assert_eq!(m.link_count(), 0);
        let merged: f64 = m.areas_of(b).map(|r| r.area()).sum();
        assert_relative_eq!(merged, 300.0, epsilon = 1e-6);

        let cut = LineString::from(vec![(15.0, -1.0), (15.0, 11.0)]);
        let new = m.split_basin(&cut).unwrap();
        let total: f64 = m.areas().map(|r| r.area()).sum();
        assert_relative_eq!(total, 300.0, epsilon = 1e-6);
        assert_eq!(m.areas_of(new).count(), 1);
        assert!(m.validate().iter().all(|v| v.rule != "area-basin"));
    }

    #[test]
    fn test_merge_connected_requires_connector() {
        let mut m = Model::new();
        let a = basin(&mut m, 0.0, 0.0);
        let b = basin(&mut m, 10.0, 0.0);
        assert!(m.merge_basins(a, b, true).unwrap_err().is_not_found());
        m.merge_basins(a, b, false).unwrap();
        assert_eq!(m.node_count(), 1);
    }

    #[test]
    fn test_split_miss_and_ambiguous() {
        let (mut m, ..) = two_basins();
        let miss = LineString::from(vec![(100.0, -1.0), (100.0, 11.0)]);
        assert!(m.split_basin(&miss).unwrap_err().is_not_found());
        let across = LineString::from(vec![(-1.0, 5.0), (31.0, 5.0)]);
        assert!(matches!(m.split_basin(&across), Err(Error::Ambiguous { .. })));
    }

    #[test]
    fn test_split_with_distant_line_leaves_model_unchanged() {
        let (mut m, ..) = two_basins();
        let before = serde_json::to_value(m.to_database()).unwrap();
        let far = LineString::from(vec![(100.0, 5.0), (101.0, 5.0)]);
        assert!(m.split_basin(&far).unwrap_err().is_not_found());
        assert_eq!(serde_json::to_value(m.to_database()).unwrap(), before);
    }

    #[test]
    fn test_fix_unassigned_within_and_closest() {
        let mut m = Model::new();
        let a = basin(&mut m, 5.0, 5.0);
        m.add_area(mp(rectangle(0.0, 0.0, 4.0, 10.0)), Some(a), None, None).unwrap();
        m.add_area(mp(rectangle(4.0, 0.0, 10.0, 10.0)), None, None, None).unwrap();
        m.add_area(mp(rectangle(12.0, 0.0, 14.0, 10.0)), None, None, None).unwrap();
        assert_eq!(m.fix_unassigned_basin_area(AreaFixMethod::Within).unwrap(), 1);
        assert_eq!(m.unassigned_areas().count(), 1);
        assert_eq!(m.fix_unassigned_basin_area(AreaFixMethod::Closest { distance: 2.0 }).unwrap(), 0);
        assert_eq!(m.fix_unassigned_basin_area(AreaFixMethod::Closest { distance: 8.0 }).unwrap(), 1);
        assert_eq!(m.unassigned_areas().count(), 0);
        assert_eq!(m.areas_of(a).count(), 1);
        let total: f64 = m.areas_of(a).map(|r| r.area()).sum();
        assert_relative_eq!(total, 120.0, epsilon = 1e-6);
    }

    #[test]
    fn test_snap_links_follows_moved_node() {
        let (mut m, a, _, o) = two_basins();
        m.move_node(a, Point::new(2.0, 2.0)).unwrap();
        m.snap_links();
        let l = m.find_link(a, o, LinkKind::Flow).unwrap();
        assert_eq!(l.geometry.0[0], Coord { x: 2.0, y: 2.0 });
    }
}
