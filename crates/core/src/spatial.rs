//! Spatial index and overlay helpers
//!
//! [`PolygonIndex`] answers the three overlay questions the model builders
//! keep asking: which polygon overlaps this one most, which polygons touch
//! this one, and which polygon holds this point. [`PointIndex`] finds the
//! nearest point-like feature.

use crate::geometry::{buffer_point, overlap_area, project_on_line};
use geo::{Area, BoundingRect, Centroid, Contains, Coord, Intersects, MultiPolygon, Point, Rect};
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};

type Envelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// How [`PolygonIndex::locate`] resolves a point held by several polygons
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TieBreak {
    /// Largest overlap with a circle of this radius around the point,
    /// then the smallest polygon (innermost of nested polygons)
    OverlapArea { radius: f64 },
    /// Polygon whose centroid is closest to the point
    NearestCentroid,
}

/// R-tree over polygon envelopes. Polygons are addressed by their position
/// in the slice the index was built from.
pub struct PolygonIndex {
    polygons: Vec<MultiPolygon<f64>>,
    tree: RTree<Envelope>,
}

fn envelope(rect: Rect<f64>, grow: f64) -> AABB<[f64; 2]> {
    AABB::from_corners(
        [rect.min().x - grow, rect.min().y - grow],
        [rect.max().x + grow, rect.max().y + grow],
    )
}

impl PolygonIndex {
    pub fn new(polygons: Vec<MultiPolygon<f64>>) -> Self {
        let entries = polygons
            .iter()
            .enumerate()
            .filter_map(|(idx, p)| {
                p.bounding_rect().map(|r| {
                    GeomWithData::new(
                        Rectangle::from_corners([r.min().x, r.min().y], [r.max().x, r.max().y]),
                        idx,
                    )
                })
            })
            .collect();
        Self {
            polygons,
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&MultiPolygon<f64>> {
        self.polygons.get(idx)
    }

    /// Indices whose envelope intersects `rect` grown by `grow`
    pub fn candidates(&self, rect: Rect<f64>, grow: f64) -> Vec<usize> {
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&envelope(rect, grow))
            .map(|e| e.data)
            .collect();
        hits.sort_unstable();
        hits
    }

    /// Overlap area between `shape` and every polygon it touches, largest first
    pub fn overlaps(&self, shape: &MultiPolygon<f64>) -> Vec<(usize, f64)> {
        let Some(rect) = shape.bounding_rect() else {
            return Vec::new();
        };
        let mut out: Vec<(usize, f64)> = self
            .candidates(rect, 0.0)
            .into_iter()
            .map(|idx| (idx, overlap_area(shape, &self.polygons[idx])))
            .filter(|(_, area)| *area > 0.0)
            .collect();
        out.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        out
    }

    /// The polygon sharing the largest area with `shape`
    pub fn most_overlapping(&self, shape: &MultiPolygon<f64>) -> Option<(usize, f64)> {
        self.overlaps(shape).into_iter().next()
    }

    /// Polygons touching polygon `idx`, or separated from it by at most `tolerance`
    pub fn touching(&self, idx: usize, tolerance: f64) -> Vec<usize> {
        let Some(shape) = self.polygons.get(idx) else {
            return Vec::new();
        };
        let Some(rect) = shape.bounding_rect() else {
            return Vec::new();
        };
        self.candidates(rect, tolerance)
            .into_iter()
            .filter(|&other| other != idx)
            .filter(|&other| {
                let candidate = &self.polygons[other];
                shape.intersects(candidate) || polygon_gap(shape, candidate) <= tolerance
            })
            .collect()
    }

    /// All polygons containing a point
    pub fn containing(&self, point: Point<f64>) -> Vec<usize> {
        let p = [point.x(), point.y()];
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&AABB::from_point(p))
            .map(|e| e.data)
            .filter(|&idx| self.polygons[idx].contains(&point) || self.polygons[idx].intersects(&point))
            .collect();
        hits.sort_unstable();
        hits
    }

    /// The single polygon a point belongs to, resolving ties per `tie_break`
    pub fn locate(&self, point: Point<f64>, tie_break: TieBreak) -> Option<usize> {
        let hits = self.containing(point);
        match hits.len() {
            0 => None,
            1 => Some(hits[0]),
            _ => Some(self.break_tie(point, &hits, tie_break)),
        }
    }

    fn break_tie(&self, point: Point<f64>, hits: &[usize], tie_break: TieBreak) -> usize {
        match tie_break {
            TieBreak::OverlapArea { radius } => {
                let probe = MultiPolygon(vec![buffer_point(point, radius, 16)]);
                let scored: Vec<(usize, f64, f64)> = hits
                    .iter()
                    .map(|&idx| {
                        let poly = &self.polygons[idx];
                        (idx, overlap_area(&probe, poly), poly.unsigned_area())
                    })
                    .collect();
                let best_overlap = scored.iter().map(|s| s.1).fold(f64::MIN, f64::max);
                let eps = best_overlap.abs() * 1e-6;
                scored
                    .into_iter()
                    .filter(|s| s.1 >= best_overlap - eps)
                    .min_by(|a, b| a.2.total_cmp(&b.2).then(a.0.cmp(&b.0)))
                    .map(|s| s.0)
                    .unwrap_or(hits[0])
            }
            TieBreak::NearestCentroid => hits
                .iter()
                .filter_map(|&idx| {
                    self.polygons[idx]
                        .centroid()
                        .map(|c| (idx, (c.x() - point.x()).hypot(c.y() - point.y())))
                })
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(idx, _)| idx)
                .unwrap_or(hits[0]),
        }
    }

    /// Polygon whose centroid is nearest to `point`, searched exhaustively
    pub fn nearest_centroid(&self, point: Point<f64>) -> Option<(usize, f64)> {
        self.polygons
            .iter()
            .enumerate()
            .filter_map(|(idx, p)| {
                p.centroid()
                    .map(|c| (idx, (c.x() - point.x()).hypot(c.y() - point.y())))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// Shortest distance between the boundaries of two polygons that do not
/// intersect. Attained at a vertex of one against an edge of the other.
pub fn polygon_gap(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> f64 {
    let rings = |mp: &MultiPolygon<f64>| {
        mp.0.iter()
            .flat_map(|p| std::iter::once(p.exterior().clone()).chain(p.interiors().iter().cloned()))
            .collect::<Vec<_>>()
    };
    let (ra, rb) = (rings(a), rings(b));
    let one_way = |from: &[geo::LineString<f64>], to: &[geo::LineString<f64>]| {
        from.iter()
            .flat_map(|ring| ring.0.iter().copied())
            .flat_map(|c| to.iter().filter_map(move |ring| project_on_line(c, ring)))
            .map(|p| p.distance)
            .fold(f64::INFINITY, f64::min)
    };
    one_way(&ra, &rb).min(one_way(&rb, &ra))
}

/// Nearest-neighbour index over points carrying a payload
pub struct PointIndex<T: Copy + PartialEq> {
    tree: RTree<GeomWithData<[f64; 2], T>>,
}

impl<T: Copy + PartialEq> PointIndex<T> {
    pub fn new(points: impl IntoIterator<Item = (Point<f64>, T)>) -> Self {
        let entries = points
            .into_iter()
            .map(|(p, data)| GeomWithData::new([p.x(), p.y()], data))
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Nearest payload and its distance
    pub fn nearest(&self, point: Point<f64>) -> Option<(T, f64)> {
        self.tree.nearest_neighbor(&[point.x(), point.y()]).map(|hit| {
            let [x, y] = *hit.geom();
            (hit.data, (x - point.x()).hypot(y - point.y()))
        })
    }

    /// Nearest payload within `max_distance`
    pub fn nearest_within(&self, point: Point<f64>, max_distance: f64) -> Option<(T, f64)> {
        self.nearest(point).filter(|(_, d)| *d <= max_distance)
    }

    /// All payloads within `distance`, nearest first
    pub fn within(&self, point: Point<f64>, distance: f64) -> Vec<(T, f64)> {
        let mut hits: Vec<(T, f64)> = self
            .tree
            .locate_within_distance([point.x(), point.y()], distance * distance)
            .map(|hit| {
                let [x, y] = *hit.geom();
                (hit.data, (x - point.x()).hypot(y - point.y()))
            })
            .collect();
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        hits
    }
}

/// Convenience: centroid of a multi-polygon as a coordinate
pub fn centroid_coord(mp: &MultiPolygon<f64>) -> Option<Coord<f64>> {
    mp.centroid().map(|p| p.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::rectangle;

    fn mp(p: geo::Polygon<f64>) -> MultiPolygon<f64> {
        MultiPolygon(vec![p])
    }

    fn two_squares() -> PolygonIndex {
        PolygonIndex::new(vec![
            mp(rectangle(0.0, 0.0, 2.0, 2.0)),
            mp(rectangle(2.0, 0.0, 4.0, 2.0)),
            mp(rectangle(10.0, 0.0, 12.0, 2.0)),
        ])
    }

    #[test]
    fn test_most_overlapping() {
        let index = two_squares();
        let shape = mp(rectangle(1.5, 0.0, 3.5, 1.0));
        let (idx, area) = index.most_overlapping(&shape).unwrap();
        assert_eq!(idx, 1);
        assert!((area - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_touching_with_tolerance() {
        let index = PolygonIndex::new(vec![
            mp(rectangle(0.0, 0.0, 2.0, 2.0)),
            mp(rectangle(2.1, 0.0, 4.0, 2.0)),
        ]);
        assert!(index.touching(0, 0.01).is_empty());
        assert_eq!(index.touching(0, 0.2), vec![1]);
    }

    #[test]
    fn test_locate_nested_prefers_inner() {
        let index = PolygonIndex::new(vec![
            mp(rectangle(0.0, 0.0, 4.0, 2.0)),
            mp(rectangle(0.1, 0.1, 2.8, 1.9)),
        ]);
        let hit = index.locate(Point::new(1.0, 1.0), TieBreak::OverlapArea { radius: 0.01 });
        assert_eq!(hit, Some(1));
        let outer = index.locate(Point::new(3.5, 1.0), TieBreak::OverlapArea { radius: 0.01 });
        assert_eq!(outer, Some(0));
    }

    #[test]
    fn test_point_index_nearest() {
        let index = PointIndex::new(vec![(Point::new(0.0, 0.0), 1), (Point::new(10.0, 0.0), 2)]);
        assert_eq!(index.nearest(Point::new(8.0, 1.0)).map(|h| h.0), Some(2));
        assert!(index.nearest_within(Point::new(5.0, 50.0), 10.0).is_none());
        assert_eq!(index.within(Point::new(1.0, 0.0), 20.0).len(), 2);
    }
}
