//! Polygon overlay, splitting and cleanup

use crate::error::{Error, Result};
use geo::{Area, BooleanOps, BoundingRect, Contains, Coord, Intersects, LineString, MultiPolygon, Point, Polygon};
use std::collections::BTreeMap;
use std::f64::consts::PI;

/// Axis-aligned rectangle as a polygon
pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Polygon<f64> {
    Polygon::new(
        LineString::from(vec![
            (min_x, min_y),
            (max_x, min_y),
            (max_x, max_y),
            (min_x, max_y),
            (min_x, min_y),
        ]),
        vec![],
    )
}

/// Circle around a point, approximated with `segments` vertices.
pub fn buffer_point(point: Point<f64>, radius: f64, segments: usize) -> Polygon<f64> {
    let n = segments.max(4);
    let r = radius.abs();
    let mut coords: Vec<(f64, f64)> = (0..n)
        .map(|i| {
            let angle = 2.0 * PI * i as f64 / n as f64;
            (point.x() + r * angle.cos(), point.y() + r * angle.sin())
        })
        .collect();
    coords.push(coords[0]);
    Polygon::new(LineString::from(coords), vec![])
}

pub fn intersection(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    a.intersection(b)
}

pub fn union(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    a.union(b)
}

pub fn difference(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    a.difference(b)
}

/// Union of any number of multi-polygons
pub fn union_all<'a>(parts: impl IntoIterator<Item = &'a MultiPolygon<f64>>) -> MultiPolygon<f64> {
    parts
        .into_iter()
        .fold(MultiPolygon(vec![]), |acc, p| if acc.0.is_empty() { p.clone() } else { acc.union(p) })
}

/// Shared area of two multi-polygons. Disjoint bounding boxes short-circuit.
pub fn overlap_area(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> f64 {
    match (a.bounding_rect(), b.bounding_rect()) {
        (Some(ra), Some(rb)) => {
            let disjoint = ra.max().x < rb.min().x
                || rb.max().x < ra.min().x
                || ra.max().y < rb.min().y
                || rb.max().y < ra.min().y;
            if disjoint {
                return 0.0;
            }
        }
        _ => return 0.0,
    }
    a.intersection(b).unsigned_area()
}

/// Drop parts and holes smaller than `min_area`.
pub fn remove_slivers(mp: &MultiPolygon<f64>, min_area: f64) -> MultiPolygon<f64> {
    MultiPolygon(
        mp.0.iter()
            .filter(|p| p.unsigned_area() >= min_area)
            .map(|p| {
                let holes = p
                    .interiors()
                    .iter()
                    .filter(|ring| Polygon::new((*ring).clone(), vec![]).unsigned_area() >= min_area)
                    .cloned()
                    .collect();
                Polygon::new(p.exterior().clone(), holes)
            })
            .collect(),
    )
}

/// Group polygons by key and union each group, removing slivers below
/// `sliver_area` that the union leaves between near-touching parts.
pub fn dissolve<K: Ord + Clone>(
    features: &[(K, MultiPolygon<f64>)],
    sliver_area: f64,
) -> BTreeMap<K, MultiPolygon<f64>> {
    let mut groups: BTreeMap<K, Vec<&MultiPolygon<f64>>> = BTreeMap::new();
    for (key, poly) in features {
        groups.entry(key.clone()).or_default().push(poly);
    }
    groups
        .into_iter()
        .map(|(key, polys)| (key, remove_slivers(&union_all(polys), sliver_area)))
        .collect()
}

fn unit(dx: f64, dy: f64) -> Option<(f64, f64)> {
    let len = dx.hypot(dy);
    (len > 0.0).then(|| (dx / len, dy / len))
}

/// Split a polygon in two along a cutting line.
///
/// The line is extended past the polygon's extent at both ends and closed
/// on its left-hand side; the left part is returned first. Fails with
/// [`Error::Geometry`] when the line does not separate the polygon.
pub fn split_polygon(
    polygon: &MultiPolygon<f64>,
    cut: &LineString<f64>,
) -> Result<(MultiPolygon<f64>, MultiPolygon<f64>)> {
    let coords = &cut.0;
    if coords.len() < 2 {
        return Err(Error::Geometry("cutting line needs at least two vertices".into()));
    }
    // only the ends are extended; the drawn line itself has to touch the polygon
    if !polygon.0.iter().any(|p| cut.intersects(p)) {
        return Err(Error::Geometry("cutting line does not touch the polygon".into()));
    }
    let rect = polygon
        .bounding_rect()
        .ok_or_else(|| Error::Geometry("cannot split an empty polygon".into()))?;
    let reach = {
        let (min, max) = (rect.min(), rect.max());
        let mut span = (max.x - min.x).hypot(max.y - min.y);
        for c in coords {
            span = span.max((c.x - min.x).hypot(c.y - min.y));
        }
        span * 2.0 + 1.0
    };

    let first = coords[0];
    let last = coords[coords.len() - 1];
    let (sx, sy) = unit(coords[1].x - first.x, coords[1].y - first.y)
        .ok_or_else(|| Error::Geometry("degenerate cutting line".into()))?;
    let before_last = coords[coords.len() - 2];
    let (ex, ey) = unit(last.x - before_last.x, last.y - before_last.y)
        .ok_or_else(|| Error::Geometry("degenerate cutting line".into()))?;

    let start = Coord { x: first.x - sx * reach, y: first.y - sy * reach };
    let end = Coord { x: last.x + ex * reach, y: last.y + ey * reach };
    let (dx, dy) = unit(end.x - start.x, end.y - start.y)
        .ok_or_else(|| Error::Geometry("cutting line loops back on itself".into()))?;
    let (lx, ly) = (-dy * reach * 2.0, dx * reach * 2.0);

    let mut ring = Vec::with_capacity(coords.len() + 5);
    ring.push(start);
    ring.extend(coords.iter().copied());
    ring.push(end);
    ring.push(Coord { x: end.x + lx, y: end.y + ly });
    ring.push(Coord { x: start.x + lx, y: start.y + ly });
    ring.push(start);
    let left_side = MultiPolygon(vec![Polygon::new(LineString::new(ring), vec![])]);

    let left = intersection(polygon, &left_side);
    let right = difference(polygon, &left_side);
    let total = polygon.unsigned_area();
    let tiny = total * 1e-9;
    if left.unsigned_area() <= tiny || right.unsigned_area() <= tiny {
        return Err(Error::Geometry("cutting line does not cross the polygon".into()));
    }
    Ok((left, right))
}

/// Split self-touching ("butterfly") polygons at their pinch vertices.
///
/// A vertex visited twice by the exterior ring separates two lobes. Holes
/// go to the lobe that contains them.
pub fn split_pinched(polygon: &Polygon<f64>) -> Vec<Polygon<f64>> {
    let ring = &polygon.exterior().0;
    let open = if ring.len() > 1 && ring.first() == ring.last() {
        &ring[..ring.len() - 1]
    } else {
        &ring[..]
    };

    let pinch = (0..open.len()).find_map(|i| {
        (i + 1..open.len())
            .find(|&j| open[j] == open[i])
            .map(|j| (i, j))
    });
    let Some((i, j)) = pinch else {
        return vec![polygon.clone()];
    };

    // open[i] == open[j], so this lobe is already closed
    let lobe_a: Vec<Coord<f64>> = open[i..=j].to_vec();
    let mut lobe_b: Vec<Coord<f64>> = open[..=i].to_vec();
    lobe_b.extend_from_slice(&open[j + 1..]);
    lobe_b.push(lobe_b[0]);
    if lobe_b.len() < 4 || lobe_a.len() < 4 {
        return vec![polygon.clone()];
    }

    let a = Polygon::new(LineString::new(lobe_a), vec![]);
    let b = Polygon::new(LineString::new(lobe_b), vec![]);
    let (mut holes_a, mut holes_b) = (Vec::new(), Vec::new());
    for hole in polygon.interiors() {
        match hole.0.first() {
            Some(c) if a.contains(c) => holes_a.push(hole.clone()),
            _ => holes_b.push(hole.clone()),
        }
    }
    let a = Polygon::new(a.exterior().clone(), holes_a);
    let b = Polygon::new(b.exterior().clone(), holes_b);

    let mut out = split_pinched(&a);
    out.extend(split_pinched(&b));
    out
}
