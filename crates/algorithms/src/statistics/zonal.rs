//! Zonal statistics
//!
//! Computes statistics for each zone of an integer zone raster, usually
//! one produced by [`rasterize_polygons`](hydronet_core::raster::rasterize_polygons)
//! with basin node ids as zone values. Zone `0` is unassigned.

use hydronet_core::raster::Raster;
use hydronet_core::{Error, Result};
use ndarray::Zip;
use std::collections::BTreeMap;

/// Result of zonal statistics for one zone
#[derive(Debug, Clone, PartialEq)]
pub struct ZonalResult {
    pub zone_id: i32,
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

fn check_grid(values: &Raster<f64>, zones: &Raster<i32>) -> Result<()> {
    let (er, ec) = values.shape();
    let (ar, ac) = zones.shape();
    if er != ar || ec != ac {
        return Err(Error::SizeMismatch { er, ec, ar, ac });
    }
    Ok(())
}

/// Compute zonal statistics.
///
/// Cells in zone `0`, no-data cells and NaN values are skipped. Zones
/// without a single valid cell do not appear in the result.
pub fn zonal_statistics(values: &Raster<f64>, zones: &Raster<i32>) -> Result<BTreeMap<i32, ZonalResult>> {
    check_grid(values, zones)?;

    let mut results: BTreeMap<i32, ZonalResult> = BTreeMap::new();
    Zip::from(values.data()).and(zones.data()).for_each(|&val, &zone| {
        if zone == 0 || val.is_nan() || values.is_nodata(val) {
            return;
        }
        let entry = results.entry(zone).or_insert(ZonalResult {
            zone_id: zone,
            count: 0,
            sum: 0.0,
            mean: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        });
        entry.count += 1;
        entry.sum += val;
        entry.min = entry.min.min(val);
        entry.max = entry.max.max(val);
    });

    for zr in results.values_mut() {
        zr.mean = zr.sum / zr.count as f64;
    }
    Ok(results)
}

/// Sum of valid cells per zone, with zero for every id in `expected`
/// that has no valid cell.
pub fn zonal_sum(values: &Raster<f64>, zones: &Raster<i32>, expected: &[i32]) -> Result<BTreeMap<i32, f64>> {
    let mut sums: BTreeMap<i32, f64> = zonal_statistics(values, zones)?
        .into_iter()
        .map(|(zone, zr)| (zone, zr.sum))
        .collect();
    for &zone in expected {
        sums.entry(zone).or_insert(0.0);
    }
    Ok(sums)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use hydronet_core::GeoTransform;

    fn grid<T: hydronet_core::RasterElement>(rows: usize, cols: usize) -> Raster<T> {
        let mut r = Raster::new(rows, cols);
        r.set_transform(GeoTransform::new(0.0, rows as f64, 1.0, -1.0));
        r
    }

    #[test]
    fn test_zonal_basic() {
        let mut values = grid::<f64>(4, 4);
        let mut zones = grid::<i32>(4, 4);
        for row in 0..4 {
            for col in 0..4 {
                values.set(row, col, (row * 4 + col) as f64).unwrap();
                zones.set(row, col, if col < 2 { 1 } else { 2 }).unwrap();
            }
        }

        let results = zonal_statistics(&values, &zones).unwrap();
        assert_eq!(results.len(), 2);
        let z1 = &results[&1];
        assert_eq!(z1.count, 8);
        // 0+1+4+5+8+9+12+13
        assert_relative_eq!(z1.sum, 52.0);
        assert_relative_eq!(z1.min, 0.0);
        assert_relative_eq!(z1.max, 13.0);
        assert_eq!(results[&2].count, 8);
    }

    #[test]
    fn test_zonal_skips_nan_and_zone_zero() {
        let mut values = grid::<f64>(3, 3);
        let mut zones: Raster<i32> = Raster::filled(3, 3, 1);
        zones.set_transform(*values.transform());
        values.data_mut().fill(5.0);
        values.set(1, 1, f64::NAN).unwrap();
        zones.set(0, 0, 0).unwrap();

        let z1 = &zonal_statistics(&values, &zones).unwrap()[&1];
        assert_eq!(z1.count, 7);
        assert_relative_eq!(z1.mean, 5.0);
    }

    #[test]
    fn test_zonal_dimension_mismatch() {
        let values: Raster<f64> = Raster::new(5, 5);
        let zones: Raster<i32> = Raster::new(3, 3);
        assert!(matches!(
            zonal_statistics(&values, &zones),
            Err(Error::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_zonal_sum_fills_missing() {
        let values = Raster::filled(2, 2, -2.0_f64);
        let zones: Raster<i32> = Raster::filled(2, 2, 7);
        let sums = zonal_sum(&values, &zones, &[7, 9]).unwrap();
        assert_relative_eq!(sums[&7], -8.0);
        assert_relative_eq!(sums[&9], 0.0);
    }
}
