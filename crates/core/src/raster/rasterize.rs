//! Burn polygons into an integer zone raster

use crate::raster::{GeoTransform, Raster};
use geo::{BoundingRect, Contains, MultiPolygon, Point};

/// Rasterize `(zone_id, polygon)` pairs onto a grid.
///
/// A cell belongs to a zone when its center lies inside the polygon. Zone
/// `0` marks unassigned cells, so ids must be non-zero. When polygons
/// overlap, the first one listed keeps the cell.
pub fn rasterize_polygons(
    shapes: &[(i32, MultiPolygon<f64>)],
    transform: GeoTransform,
    rows: usize,
    cols: usize,
) -> Raster<i32> {
    let mut zones: Raster<i32> = Raster::new(rows, cols);
    zones.set_transform(transform);
    zones.set_nodata(Some(0));

    for (zone_id, polygon) in shapes {
        let Some(rect) = polygon.bounding_rect() else {
            continue;
        };
        let Some((r0, c0, r1, c1)) = cell_window(&transform, rect, rows, cols) else {
            continue;
        };
        for row in r0..=r1 {
            for col in c0..=c1 {
                if zones.data()[(row, col)] != 0 {
                    continue;
                }
                let (x, y) = transform.pixel_to_geo(col, row);
                if polygon.contains(&Point::new(x, y)) {
                    zones.data_mut()[(row, col)] = *zone_id;
                }
            }
        }
    }

    zones
}

/// Inclusive (row, col) window covering a rectangle, clipped to the grid
pub fn cell_window(
    transform: &GeoTransform,
    rect: geo::Rect<f64>,
    rows: usize,
    cols: usize,
) -> Option<(usize, usize, usize, usize)> {
    if rows == 0 || cols == 0 {
        return None;
    }
    let (ca, ra) = transform.geo_to_pixel(rect.min().x, rect.min().y);
    let (cb, rb) = transform.geo_to_pixel(rect.max().x, rect.max().y);
    if !(ca.is_finite() && ra.is_finite() && cb.is_finite() && rb.is_finite()) {
        return None;
    }
    let clamp = |v: f64, n: usize| v.floor().clamp(0.0, (n - 1) as f64) as usize;
    let (c_lo, c_hi) = (ca.min(cb), ca.max(cb));
    let (r_lo, r_hi) = (ra.min(rb), ra.max(rb));
    if c_hi < 0.0 || r_hi < 0.0 || c_lo >= cols as f64 || r_lo >= rows as f64 {
        return None;
    }
    Some((clamp(r_lo, rows), clamp(c_lo, cols), clamp(r_hi, rows), clamp(c_hi, cols)))
}
