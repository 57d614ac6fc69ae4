//! Crossings between hydro-object lines and water-level zones
//!
//! Every place where a line passes from one zone into another is a
//! crossing; the aggregation engine reads them as directed zone-to-zone
//! edges and the model builder places structures on them.
//!
//! Zone boundaries that lie within `tolerance` of each other along a line
//! count as one boundary. That closes narrow gaps, collapses thin overlaps
//! and turns a line through a vertex shared by three zones into a single
//! crossing.

use crate::zone::{split_butterflies, Zone};
use geo::{BoundingRect, Coord, LineString, Point, Rect};
use hydronet_core::geometry::{point_line_distance, segment_intersection};
use hydronet_core::spatial::{PolygonIndex, TieBreak};
use hydronet_core::{Algorithm, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Classification of a crossing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CrossingKind {
    /// Breakpoint inside a single zone
    #[serde(rename = "-10")]
    Internal,
    /// Boundary between two distinct zones
    #[serde(rename = "00")]
    Boundary,
}

impl CrossingKind {
    pub fn code(self) -> &'static str {
        match self {
            CrossingKind::Internal => "-10",
            CrossingKind::Boundary => "00",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crossing {
    pub id: usize,
    pub geometry: Point<f64>,
    /// Index of the source line
    pub line: usize,
    /// Zone the line comes from, `None` outside every zone
    pub zone_from: Option<usize>,
    pub zone_to: Option<usize>,
    pub code_from: Option<String>,
    pub code_to: Option<String>,
    pub kind: CrossingKind,
    pub in_use: bool,
    /// Number of parallel crossings this one stands for
    pub parallel: usize,
}

impl Crossing {
    pub fn is_boundary(&self) -> bool {
        self.kind == CrossingKind::Boundary
    }
}

/// Parameters for crossing extraction
#[derive(Debug, Clone)]
pub struct CrossingsParams {
    /// Distance under which boundaries and junctions coincide (m)
    pub tolerance: f64,
    /// Minimum lobe area for a butterfly zone to be split (m²)
    pub lobe_area: f64,
    /// Also report `-10` breakpoints inside a zone
    pub include_internal: bool,
    /// Collapse crossings sharing both zones into one representative
    pub aggregate_parallel: bool,
}

impl Default for CrossingsParams {
    fn default() -> Self {
        Self {
            tolerance: 0.1,
            lobe_area: 100.0,
            include_internal: false,
            aggregate_parallel: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CrossingsInput {
    pub lines: Vec<LineString<f64>>,
    pub zones: Vec<Zone>,
    pub filter: Option<Vec<LineString<f64>>>,
}

/// Extracted crossings plus the zone list their indices refer to.
///
/// Butterfly splitting can change the zone list, so downstream steps must
/// use these zones rather than the input ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrossingSet {
    pub zones: Vec<Zone>,
    pub crossings: Vec<Crossing>,
}

impl CrossingSet {
    pub fn in_use(&self) -> impl Iterator<Item = &Crossing> {
        self.crossings.iter().filter(|c| c.in_use)
    }
}

/// Crossings extraction algorithm
#[derive(Debug, Clone, Default)]
pub struct ExtractCrossings;

impl Algorithm for ExtractCrossings {
    type Input = CrossingsInput;
    type Output = CrossingSet;
    type Params = CrossingsParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Crossings"
    }

    fn description(&self) -> &'static str {
        "Find where hydro-object lines pass from one water-level zone into another"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        extract_crossings(input, &params)
    }
}

/// A polyline with its cumulative vertex distances
struct Measured<'a> {
    coords: &'a [Coord<f64>],
    cumulative: Vec<f64>,
}

impl<'a> Measured<'a> {
    fn new(line: &'a LineString<f64>) -> Self {
        let coords = line.0.as_slice();
        let mut cumulative = Vec::with_capacity(coords.len());
        let mut total = 0.0;
        cumulative.push(0.0);
        for w in coords.windows(2) {
            total += (w[1].x - w[0].x).hypot(w[1].y - w[0].y);
            cumulative.push(total);
        }
        Self { coords, cumulative }
    }

    fn length(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    fn point_at(&self, along: f64) -> Coord<f64> {
        let along = along.clamp(0.0, self.length());
        for i in 1..self.coords.len() {
            if along <= self.cumulative[i] {
                let seg = self.cumulative[i] - self.cumulative[i - 1];
                let t = if seg > 0.0 { (along - self.cumulative[i - 1]) / seg } else { 0.0 };
                let (a, b) = (self.coords[i - 1], self.coords[i]);
                return Coord {
                    x: a.x + t * (b.x - a.x),
                    y: a.y + t * (b.y - a.y),
                };
            }
        }
        self.coords.last().copied().unwrap_or(Coord { x: 0.0, y: 0.0 })
    }

    /// Vertices strictly between two distances, with the end points
    fn slice(&self, from: f64, to: f64) -> LineString<f64> {
        let mut coords = vec![self.point_at(from)];
        for (i, &d) in self.cumulative.iter().enumerate() {
            if d > from && d < to {
                coords.push(self.coords[i]);
            }
        }
        coords.push(self.point_at(to));
        LineString::new(coords)
    }

    /// Distances along this line where segments of `ring` cross it
    fn hits(&self, ring: &LineString<f64>, out: &mut Vec<f64>) {
        for (i, a) in self.coords.windows(2).enumerate() {
            for b in ring.0.windows(2) {
                if let Some((t, _, _)) = segment_intersection(a[0], a[1], b[0], b[1]) {
                    let seg = self.cumulative[i + 1] - self.cumulative[i];
                    out.push(self.cumulative[i] + t * seg);
                }
            }
        }
    }
}

/// Group sorted distances into runs whose consecutive gaps are at most `tolerance`
fn cluster(mut values: Vec<f64>, tolerance: f64) -> Vec<(f64, f64)> {
    values.sort_by(f64::total_cmp);
    let mut runs: Vec<(f64, f64)> = Vec::new();
    for v in values {
        match runs.last_mut() {
            Some(run) if v - run.1 <= tolerance => run.1 = v,
            _ => runs.push((v, v)),
        }
    }
    runs
}

fn grown(rect: Rect<f64>, d: f64) -> Rect<f64> {
    Rect::new(
        Coord { x: rect.min().x - d, y: rect.min().y - d },
        Coord { x: rect.max().x + d, y: rect.max().y + d },
    )
}

fn rects_touch(a: Rect<f64>, b: Rect<f64>) -> bool {
    a.min().x <= b.max().x && b.min().x <= a.max().x && a.min().y <= b.max().y && b.min().y <= a.max().y
}

/// Distances along line `idx` where other lines cross or touch it
fn junctions(lines: &[LineString<f64>], measured: &Measured<'_>, idx: usize, tolerance: f64) -> Vec<f64> {
    let Some(rect) = lines[idx].bounding_rect() else {
        return Vec::new();
    };
    let rect = grown(rect, tolerance);
    let mut hits = Vec::new();
    for (j, other) in lines.iter().enumerate() {
        if j == idx || !other.bounding_rect().is_some_and(|r| rects_touch(rect, r)) {
            continue;
        }
        measured.hits(other, &mut hits);
    }
    let length = measured.length();
    cluster(hits, tolerance)
        .into_iter()
        .map(|(a, _)| a)
        .filter(|&d| d > tolerance && d < length - tolerance)
        .collect()
}

/// Filter line absorbing the whole piece, if any
fn absorbed(piece: &LineString<f64>, filter: &[LineString<f64>], tolerance: f64) -> bool {
    filter.iter().any(|f| {
        piece
            .0
            .iter()
            .all(|&c| point_line_distance(c, f) <= tolerance)
    })
}

/// Find all crossings of `lines` with `zones`.
///
/// Lines are cut at their junctions with other lines. Along each line the
/// zone boundaries are located, boundaries closer than `tolerance` are
/// merged, and every stretch between two boundaries is assigned the zone
/// holding its midpoint. A zone change gives a `00` crossing; with
/// `include_internal` a boundary touch without a change and every junction
/// give `-10` breakpoints.
pub fn extract_crossings(input: CrossingsInput, params: &CrossingsParams) -> Result<CrossingSet> {
    let tol = params.tolerance;
    if !tol.is_finite() || tol <= 0.0 {
        return Err(Error::InvalidParameter {
            name: "tolerance",
            value: tol.to_string(),
            reason: "must be a positive number".into(),
        });
    }

    let zones = split_butterflies(input.zones, params.lobe_area);
    let index = PolygonIndex::new(zones.iter().map(|z| z.geometry.clone()).collect());
    let tie = TieBreak::OverlapArea { radius: tol };
    let locate = |c: Coord<f64>| index.locate(Point(c), tie);

    let mut found: Vec<Crossing> = Vec::new();
    for (line_idx, line) in input.lines.iter().enumerate() {
        if line.0.len() < 2 {
            continue;
        }
        let measured = Measured::new(line);
        let length = measured.length();
        if length <= 0.0 {
            continue;
        }
        let Some(rect) = line.bounding_rect() else {
            continue;
        };

        let mut hits = Vec::new();
        for zone_idx in index.candidates(rect, tol) {
            for poly in &zones[zone_idx].geometry.0 {
                measured.hits(poly.exterior(), &mut hits);
                for hole in poly.interiors() {
                    measured.hits(hole, &mut hits);
                }
            }
        }
        // boundaries at the line ends have no zone on one side
        let boundaries: Vec<(f64, f64)> = cluster(hits, tol)
            .into_iter()
            .filter(|&(a, b)| a > tol && b < length - tol)
            .collect();

        let cuts = junctions(&input.lines, &measured, line_idx, tol);
        let mut stations = vec![0.0];
        stations.extend(cuts.iter().copied());
        stations.push(length);
        let piece_of = |d: f64| stations.windows(2).position(|w| d <= w[1]).unwrap_or(0);
        let in_use_of = |d: f64| match &input.filter {
            Some(filter) => {
                let k = piece_of(d);
                !absorbed(&measured.slice(stations[k], stations[k + 1]), filter, tol)
            }
            None => true,
        };

        let mut zone_seq = Vec::with_capacity(boundaries.len() + 1);
        let mut prev_end = 0.0;
        for &(a, b) in &boundaries {
            zone_seq.push(locate(measured.point_at((prev_end + a) / 2.0)));
            prev_end = b;
        }
        zone_seq.push(locate(measured.point_at((prev_end + length) / 2.0)));

        for (k, &(a, _)) in boundaries.iter().enumerate() {
            let (from, to) = (zone_seq[k], zone_seq[k + 1]);
            let kind = if from != to {
                CrossingKind::Boundary
            } else if params.include_internal {
                CrossingKind::Internal
            } else {
                continue;
            };
            found.push(crossing(&zones, measured.point_at(a), line_idx, from, to, kind, in_use_of(a)));
        }

        if params.include_internal {
            for &d in &cuts {
                if boundaries.iter().any(|&(a, b)| d >= a - tol && d <= b + tol) {
                    continue;
                }
                let c = measured.point_at(d);
                let zone = locate(c);
                found.push(crossing(&zones, c, line_idx, zone, zone, CrossingKind::Internal, in_use_of(d)));
            }
        }
    }

    let mut crossings = dedupe(found, tol);
    if params.aggregate_parallel {
        crossings = aggregate_parallel(crossings);
    }
    for (i, c) in crossings.iter_mut().enumerate() {
        c.id = i + 1;
    }
    info!(
        "{} crossings ({} in use) from {} lines over {} zones",
        crossings.len(),
        crossings.iter().filter(|c| c.in_use).count(),
        input.lines.len(),
        zones.len()
    );
    Ok(CrossingSet { zones, crossings })
}

fn crossing(
    zones: &[Zone],
    at: Coord<f64>,
    line: usize,
    from: Option<usize>,
    to: Option<usize>,
    kind: CrossingKind,
    in_use: bool,
) -> Crossing {
    let code = |z: Option<usize>| z.and_then(|i| zones.get(i)).map(|z| z.code.clone());
    Crossing {
        id: 0,
        geometry: Point(at),
        line,
        zone_from: from,
        zone_to: to,
        code_from: code(from),
        code_to: code(to),
        kind,
        in_use,
        parallel: 1,
    }
}

/// Drop crossings repeating an earlier one's zone pair within `tolerance`
fn dedupe(found: Vec<Crossing>, tolerance: f64) -> Vec<Crossing> {
    let mut kept: Vec<Crossing> = Vec::with_capacity(found.len());
    for c in found {
        let duplicate = kept.iter_mut().find(|k| {
            k.zone_from == c.zone_from
                && k.zone_to == c.zone_to
                && k.kind == c.kind
                && (k.geometry.x() - c.geometry.x()).hypot(k.geometry.y() - c.geometry.y()) <= tolerance
        });
        match duplicate {
            Some(k) => {
                // in use when any of the coinciding crossings is
                k.in_use |= c.in_use;
                debug!("dropped duplicate crossing on line {}", c.line);
            }
            None => kept.push(c),
        }
    }
    kept
}

/// Keep one in-use boundary crossing per directed zone pair
fn aggregate_parallel(crossings: Vec<Crossing>) -> Vec<Crossing> {
    let mut representative: BTreeMap<(usize, usize), usize> = BTreeMap::new();
    let mut out: Vec<Crossing> = Vec::with_capacity(crossings.len());
    for c in crossings {
        let key = match (c.in_use && c.is_boundary(), c.zone_from, c.zone_to) {
            (true, Some(a), Some(b)) => (a, b),
            _ => {
                out.push(c);
                continue;
            }
        };
        match representative.get(&key) {
            Some(&pos) => out[pos].parallel += c.parallel,
            None => {
                representative.insert(key, out.len());
                out.push(c);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::MultiPolygon;
    use hydronet_core::geometry::rectangle;

    fn zone(code: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Zone {
        Zone::new(code, MultiPolygon(vec![rectangle(x0, y0, x1, y1)]))
    }

    fn line(coords: &[(f64, f64)]) -> LineString<f64> {
        LineString::from(coords.to_vec())
    }

    fn params(tolerance: f64) -> CrossingsParams {
        CrossingsParams {
            tolerance,
            ..CrossingsParams::default()
        }
    }

    fn run(lines: Vec<LineString<f64>>, zones: Vec<Zone>, p: CrossingsParams) -> CrossingSet {
        ExtractCrossings
            .execute(CrossingsInput { lines, zones, filter: None }, p)
            .unwrap()
    }

    #[test]
    fn test_adjacent_zones_one_crossing() {
        let set = run(
            vec![line(&[(0.5, 0.5), (3.5, 0.5)])],
            vec![zone("A", 0.0, 0.0, 2.0, 2.0), zone("B", 2.0, 0.0, 4.0, 2.0)],
            params(0.01),
        );
        assert_eq!(set.crossings.len(), 1);
        let c = &set.crossings[0];
        assert_eq!(c.kind.code(), "00");
        assert_relative_eq!(c.geometry.x(), 2.0);
        assert_relative_eq!(c.geometry.y(), 0.5);
        assert_eq!((c.zone_from, c.zone_to), (Some(0), Some(1)));
        assert_eq!(c.code_to.as_deref(), Some("B"));
    }

    #[test]
    fn test_narrow_gap_one_crossing() {
        let set = run(
            vec![line(&[(0.5, 0.5), (3.5, 0.5)])],
            vec![zone("A", 0.0, 0.0, 2.0, 2.0), zone("B", 2.1, 0.0, 4.0, 2.0)],
            params(0.2),
        );
        assert_eq!(set.crossings.len(), 1);
        let x = set.crossings[0].geometry.x();
        assert!((x - 2.0).abs() <= 0.2 || (x - 2.1).abs() <= 0.2);
        assert_eq!(set.crossings[0].zone_to, Some(1));
    }

    #[test]
    fn test_thin_overlap_one_crossing() {
        let set = run(
            vec![line(&[(0.5, 0.5), (3.5, 0.5)])],
            vec![zone("A", 0.0, 0.0, 2.0, 2.0), zone("B", 1.95, 0.0, 4.0, 2.0)],
            params(0.1),
        );
        assert_eq!(set.crossings.len(), 1);
        let x = set.crossings[0].geometry.x();
        assert!((1.95..=2.0).contains(&x));
    }

    #[test]
    fn test_nested_zones_two_crossings() {
        // the line starts in the outer ring so that it crosses both inner edges
        let set = run(
            vec![line(&[(0.05, 0.5), (3.5, 0.5)])],
            vec![zone("inner", 0.1, 0.1, 2.8, 1.9), zone("outer", 0.0, 0.0, 4.0, 2.0)],
            params(0.02),
        );
        assert_eq!(set.crossings.len(), 2);
        assert_relative_eq!(set.crossings[0].geometry.x(), 0.1, epsilon = 1e-9);
        assert_relative_eq!(set.crossings[1].geometry.x(), 2.8, epsilon = 1e-9);
        assert_eq!(set.crossings[0].code_from.as_deref(), Some("outer"));
        assert_eq!(set.crossings[0].code_to.as_deref(), Some("inner"));
        assert!(set.crossings.iter().all(|c| c.kind == CrossingKind::Boundary));
    }

    #[test]
    fn test_star_vertex_single_crossing() {
        // three zones meet at (2, 1); the line passes through that vertex
        let zones = vec![
            zone("A", 0.0, 0.0, 2.0, 2.0),
            zone("B", 2.0, 1.0, 4.0, 2.0),
            zone("C", 2.0, 0.0, 4.0, 1.0),
        ];
        let set = run(vec![line(&[(1.0, 0.5), (3.0, 1.5)])], zones, params(0.05));
        assert_eq!(set.crossings.len(), 1);
        assert_eq!(set.crossings[0].code_from.as_deref(), Some("A"));
        assert_eq!(set.crossings[0].code_to.as_deref(), Some("B"));
    }

    #[test]
    fn test_line_leaving_all_zones() {
        let set = run(
            vec![line(&[(1.0, 1.0), (5.0, 1.0)])],
            vec![zone("A", 0.0, 0.0, 2.0, 2.0)],
            params(0.01),
        );
        assert_eq!(set.crossings.len(), 1);
        assert_eq!(set.crossings[0].zone_to, None);
    }

    #[test]
    fn test_junction_is_internal_breakpoint() {
        let lines = vec![line(&[(0.5, 1.0), (3.5, 1.0)]), line(&[(1.0, 0.2), (1.0, 1.0)])];
        let zones = vec![zone("A", 0.0, 0.0, 2.0, 2.0), zone("B", 2.0, 0.0, 4.0, 2.0)];
        let hidden = run(lines.clone(), zones.clone(), params(0.01));
        assert_eq!(hidden.crossings.len(), 1);

        let shown = run(
            lines,
            zones,
            CrossingsParams {
                include_internal: true,
                ..params(0.01)
            },
        );
        let internal: Vec<_> = shown.crossings.iter().filter(|c| c.kind == CrossingKind::Internal).collect();
        assert_eq!(internal.len(), 1);
        assert_relative_eq!(internal[0].geometry.x(), 1.0);
        assert_eq!(internal[0].zone_from, internal[0].zone_to);
    }

    #[test]
    fn test_filter_line_suppresses() {
        let lines = vec![line(&[(0.5, 0.5), (3.5, 0.5)])];
        let zones = vec![zone("A", 0.0, 0.0, 2.0, 2.0), zone("B", 2.0, 0.0, 4.0, 2.0)];
        let filter = vec![line(&[(0.0, 0.52), (4.0, 0.52)])];
        let set = extract_crossings(
            CrossingsInput {
                lines,
                zones,
                filter: Some(filter),
            },
            &params(0.05),
        )
        .unwrap();
        assert_eq!(set.crossings.len(), 1);
        assert!(!set.crossings[0].in_use);
        assert_eq!(set.in_use().count(), 0);
    }

    #[test]
    fn test_parallel_crossings_aggregate() {
        let lines = vec![line(&[(0.5, 0.5), (3.5, 0.5)]), line(&[(0.5, 1.5), (3.5, 1.5)])];
        let zones = vec![zone("A", 0.0, 0.0, 2.0, 2.0), zone("B", 2.0, 0.0, 4.0, 2.0)];
        let plain = run(lines.clone(), zones.clone(), params(0.01));
        assert_eq!(plain.crossings.len(), 2);

        let agg = run(
            lines,
            zones,
            CrossingsParams {
                aggregate_parallel: true,
                ..params(0.01)
            },
        );
        assert_eq!(agg.crossings.len(), 1);
        assert_eq!(agg.crossings[0].parallel, 2);
        assert_eq!(agg.crossings[0].id, 1);
    }

    #[test]
    fn test_rejects_bad_tolerance() {
        let err = extract_crossings(CrossingsInput::default(), &params(0.0)).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { name: "tolerance", .. }));
    }

    #[test]
    fn test_kind_serializes_as_code() {
        assert_eq!(serde_json::to_value(CrossingKind::Boundary).unwrap(), "00");
        assert_eq!(serde_json::to_value(CrossingKind::Internal).unwrap(), "-10");
    }
}
