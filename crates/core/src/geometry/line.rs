//! Line measurements, projection and segment intersection

use geo::{Coord, LineString};

/// Euclidean length of a line string
pub fn line_length(line: &LineString<f64>) -> f64 {
    line.0
        .windows(2)
        .map(|w| (w[1].x - w[0].x).hypot(w[1].y - w[0].y))
        .sum()
}

/// Where a point projects onto a line string
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineProjection {
    /// Closest point on the line
    pub point: Coord<f64>,
    /// Distance from the query point to `point`
    pub distance: f64,
    /// Index of the segment holding `point`
    pub segment: usize,
    /// Distance along the line from its start to `point`
    pub along: f64,
}

fn project_on_segment(p: Coord<f64>, a: Coord<f64>, b: Coord<f64>) -> (Coord<f64>, f64) {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    let t = if len_sq == 0.0 {
        0.0
    } else {
        (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0)
    };
    (Coord { x: a.x + t * dx, y: a.y + t * dy }, t)
}

/// Project a point onto a line string. `None` for empty lines.
pub fn project_on_line(point: Coord<f64>, line: &LineString<f64>) -> Option<LineProjection> {
    let coords = &line.0;
    if coords.is_empty() {
        return None;
    }
    if coords.len() == 1 {
        let c = coords[0];
        return Some(LineProjection {
            point: c,
            distance: (c.x - point.x).hypot(c.y - point.y),
            segment: 0,
            along: 0.0,
        });
    }

    let mut best: Option<LineProjection> = None;
    let mut walked = 0.0;
    for (segment, w) in coords.windows(2).enumerate() {
        let seg_len = (w[1].x - w[0].x).hypot(w[1].y - w[0].y);
        let (proj, t) = project_on_segment(point, w[0], w[1]);
        let distance = (proj.x - point.x).hypot(proj.y - point.y);
        if best.map_or(true, |b| distance < b.distance) {
            best = Some(LineProjection {
                point: proj,
                distance,
                segment,
                along: walked + t * seg_len,
            });
        }
        walked += seg_len;
    }
    best
}

/// Shortest distance between a point and a line string
pub fn point_line_distance(point: Coord<f64>, line: &LineString<f64>) -> f64 {
    project_on_line(point, line).map_or(f64::INFINITY, |p| p.distance)
}

/// Intersection of segments `a0-a1` and `b0-b1`.
///
/// Returns the parameters `(t, u)` along both segments and the point.
/// Parallel and collinear segments yield `None`.
pub fn segment_intersection(
    a0: Coord<f64>,
    a1: Coord<f64>,
    b0: Coord<f64>,
    b1: Coord<f64>,
) -> Option<(f64, f64, Coord<f64>)> {
    let r = Coord { x: a1.x - a0.x, y: a1.y - a0.y };
    let s = Coord { x: b1.x - b0.x, y: b1.y - b0.y };
    let denom = r.x * s.y - r.y * s.x;
    if denom.abs() < 1e-12 {
        return None;
    }
    let qp = Coord { x: b0.x - a0.x, y: b0.y - a0.y };
    let t = (qp.x * s.y - qp.y * s.x) / denom;
    let u = (qp.x * r.y - qp.y * r.x) / denom;
    const EPS: f64 = 1e-9;
    if (-EPS..=1.0 + EPS).contains(&t) && (-EPS..=1.0 + EPS).contains(&u) {
        let t = t.clamp(0.0, 1.0);
        Some((t, u.clamp(0.0, 1.0), Coord { x: a0.x + t * r.x, y: a0.y + t * r.y }))
    } else {
        None
    }
}
