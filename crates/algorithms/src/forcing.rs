//! Basin forcing: precipitation, evaporation, drainage and infiltration
//!
//! All rates written to the model are in m/s. Meteorological inputs come
//! in mm/day; groundwater budgets in m³/day per cell.

use crate::maybe_rayon::*;
use crate::statistics::zonal_sum;
use chrono::{Duration, NaiveDateTime};
use geo::{Area, BoundingRect, MultiPolygon, Point};
use hydronet_core::config::StaticForcing;
use hydronet_core::geometry::overlap_area;
use hydronet_core::model::{BasinForcing, BasinTimeRow, Category, NodeId, NodeType};
use hydronet_core::raster::{cell_window, rasterize_polygons};
use hydronet_core::spatial::centroid_coord;
use hydronet_core::{Algorithm, Error, GeoTransform, Model, Raster, Result};
use std::collections::BTreeMap;
use tracing::{debug, info};

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Makkink reference evaporation to open-water evaporation
pub const OPEN_WATER_FACTOR: f64 = 1.26;

pub fn mm_per_day_to_m_per_s(value: f64) -> f64 {
    value / 1000.0 / SECONDS_PER_DAY
}

/// Timestamps from `start` to `end` inclusive
pub fn time_steps(start: NaiveDateTime, end: NaiveDateTime, step: Duration) -> Vec<NaiveDateTime> {
    let mut out = Vec::new();
    if step <= Duration::zero() {
        return out;
    }
    let mut t = start;
    while t <= end {
        out.push(t);
        t += step;
    }
    out
}

fn basins(model: &Model) -> Vec<(NodeId, MultiPolygon<f64>, Point<f64>)> {
    model
        .nodes_of_type(NodeType::Basin)
        .map(|n| (n.id, model.basin_polygon(n.id), n.geometry))
        .collect()
}

/// Merge rows into the model's `basin.time` table, combining rows that
/// share basin and time with `merge`
fn merge_time_rows(
    model: &mut Model,
    rows: Vec<BasinTimeRow>,
    merge: impl Fn(&mut BasinForcing, &BasinForcing),
) -> Result<usize> {
    let count = rows.len();
    let mut table: BTreeMap<(NodeId, NaiveDateTime), BasinForcing> = model
        .basin_time()
        .iter()
        .map(|r| ((r.node_id, r.time), r.forcing))
        .collect();
    for row in rows {
        table
            .entry((row.node_id, row.time))
            .and_modify(|f| merge(f, &row.forcing))
            .or_insert(row.forcing);
    }
    model.set_basin_time(
        table
            .into_iter()
            .map(|((node_id, time), forcing)| BasinTimeRow { node_id, time, forcing })
            .collect(),
    )?;
    Ok(count)
}

fn set_meteo(f: &mut BasinForcing, new: &BasinForcing) {
    f.precipitation = new.precipitation;
    f.potential_evaporation = new.potential_evaporation;
}

fn set_budget(f: &mut BasinForcing, new: &BasinForcing) {
    f.drainage = new.drainage;
    f.infiltration = new.infiltration;
}

/// Apply one constant set of rates to every basin.
///
/// Sets each basin's static forcing and writes a `basin.time` row per
/// basin and timestep. Returns the number of rows written.
pub fn static_forcing(
    model: &mut Model,
    forcing: StaticForcing,
    start: NaiveDateTime,
    end: NaiveDateTime,
    step: Duration,
) -> Result<usize> {
    let rates = BasinForcing {
        precipitation: mm_per_day_to_m_per_s(forcing.precipitation),
        potential_evaporation: mm_per_day_to_m_per_s(forcing.potential_evaporation),
        drainage: mm_per_day_to_m_per_s(forcing.drainage),
        infiltration: mm_per_day_to_m_per_s(forcing.infiltration),
    };
    let ids: Vec<NodeId> = model.nodes_of_type(NodeType::Basin).map(|n| n.id).collect();
    for &id in &ids {
        model.update_node_data(id, |data| {
            if let Some(basin) = data.as_basin_mut() {
                basin.forcing = Some(rates);
            }
        })?;
    }
    let times = time_steps(start, end, step);
    let rows = ids
        .iter()
        .flat_map(|&node_id| {
            times.iter().map(move |&time| BasinTimeRow {
                node_id,
                time,
                forcing: rates,
            })
        })
        .collect();
    let n = merge_time_rows(model, rows, |f, new| *f = *new)?;
    info!("static forcing: {n} rows for {} basins", ids.len());
    Ok(n)
}

/// Daily precipitation and reference evaporation grids, mm/day
#[derive(Debug, Clone, Default)]
pub struct MeteoGrid {
    pub times: Vec<NaiveDateTime>,
    pub precipitation: Vec<Raster<f64>>,
    pub evaporation: Vec<Raster<f64>>,
}

impl MeteoGrid {
    /// Grids with one band per day from `start`
    pub fn daily(start: NaiveDateTime, precipitation: Vec<Raster<f64>>, evaporation: Vec<Raster<f64>>) -> Self {
        let times = (0..precipitation.len())
            .map(|i| start + Duration::days(i as i64))
            .collect();
        Self {
            times,
            precipitation,
            evaporation,
        }
    }

    fn validate(&self) -> Result<(GeoTransform, usize, usize)> {
        let n = self.times.len();
        if self.precipitation.len() != n || self.evaporation.len() != n {
            return Err(Error::InvalidParameter {
                name: "meteo",
                value: format!(
                    "{n} times, {} precipitation, {} evaporation grids",
                    self.precipitation.len(),
                    self.evaporation.len()
                ),
                reason: "one precipitation and one evaporation grid per time".into(),
            });
        }
        let first = self
            .precipitation
            .first()
            .ok_or_else(|| Error::not_found("meteo grid", "first time step"))?;
        for grid in self.precipitation.iter().chain(&self.evaporation) {
            if !grid.same_grid(first) {
                let (er, ec) = first.shape();
                let (ar, ac) = grid.shape();
                return Err(Error::SizeMismatch { er, ec, ar, ac });
            }
        }
        let (rows, cols) = first.shape();
        Ok((*first.transform(), rows, cols))
    }
}

/// Fractional overlap weights of a polygon with grid cells.
///
/// Weights sum to one. A polygon that misses the grid gets the single
/// cell nearest to its centroid (or to `fallback` when it has none).
pub fn overlap_weights(
    polygon: &MultiPolygon<f64>,
    fallback: Point<f64>,
    transform: &GeoTransform,
    rows: usize,
    cols: usize,
) -> Vec<(usize, usize, f64)> {
    let mut weights = Vec::new();
    if let Some((r0, c0, r1, c1)) = polygon.bounding_rect().and_then(|rect| cell_window(transform, rect, rows, cols)) {
        for row in r0..=r1 {
            for col in c0..=c1 {
                let cell = MultiPolygon(vec![transform.cell_rect(row, col).to_polygon()]);
                let shared = overlap_area(polygon, &cell);
                if shared > 0.0 {
                    weights.push((row, col, shared));
                }
            }
        }
    }
    let total: f64 = weights.iter().map(|w| w.2).sum();
    if total > 0.0 {
        for w in &mut weights {
            w.2 /= total;
        }
        return weights;
    }

    if rows == 0 || cols == 0 {
        return Vec::new();
    }
    let anchor = centroid_coord(polygon).unwrap_or(fallback.0);
    let (col, row) = transform.geo_to_pixel(anchor.x, anchor.y);
    let clamp = |v: f64, n: usize| {
        if v.is_finite() {
            v.floor().clamp(0.0, (n - 1) as f64) as usize
        } else {
            0
        }
    };
    vec![(clamp(row, rows), clamp(col, cols), 1.0)]
}

/// Weighted mean of the valid cells; weights of invalid cells drop out
fn weighted_mean(grid: &Raster<f64>, weights: &[(usize, usize, f64)]) -> Option<f64> {
    let (mut sum, mut wsum) = (0.0, 0.0);
    for &(row, col, w) in weights {
        let v = grid.data()[(row, col)];
        if v.is_nan() || grid.is_nodata(v) {
            continue;
        }
        sum += w * v;
        wsum += w;
    }
    (wsum > 0.0).then(|| sum / wsum)
}

/// Write per-basin precipitation and open-water evaporation series from
/// gridded daily data. Returns the number of rows written.
pub fn dynamic_forcing(model: &mut Model, meteo: &MeteoGrid) -> Result<usize> {
    let (transform, rows, cols) = meteo.validate()?;
    let basins = basins(model);
    let weights: Vec<Vec<(usize, usize, f64)>> = basins
        .as_slice()
        .into_par_iter()
        .map(|(_, polygon, point)| overlap_weights(polygon, *point, &transform, rows, cols))
        .collect();

    let mut out = Vec::with_capacity(basins.len() * meteo.times.len());
    for (k, &time) in meteo.times.iter().enumerate() {
        for ((id, _, _), w) in basins.iter().zip(&weights) {
            let p = weighted_mean(&meteo.precipitation[k], w).unwrap_or(0.0);
            let e = weighted_mean(&meteo.evaporation[k], w).unwrap_or(0.0);
            out.push(BasinTimeRow {
                node_id: *id,
                time,
                forcing: BasinForcing {
                    precipitation: mm_per_day_to_m_per_s(p),
                    potential_evaporation: mm_per_day_to_m_per_s(e) * OPEN_WATER_FACTOR,
                    drainage: 0.0,
                    infiltration: 0.0,
                },
            });
        }
    }
    let n = merge_time_rows(model, out, set_meteo)?;
    info!("dynamic forcing: {n} rows over {} time steps", meteo.times.len());
    Ok(n)
}

/// One month of groundwater budgets, one band per system
#[derive(Debug, Clone)]
pub struct BudgetStep {
    pub time: NaiveDateTime,
    pub bands: Vec<Raster<f64>>,
}

/// Split a step's bands into the primary sum (1-based `primary` bands)
/// and the secondary sum (all other bands)
fn split_bands(step: &BudgetStep, primary: &[usize]) -> Result<(Option<Raster<f64>>, Option<Raster<f64>>)> {
    let (mut first, mut second): (Vec<&Raster<f64>>, Vec<&Raster<f64>>) = (Vec::new(), Vec::new());
    for (i, band) in step.bands.iter().enumerate() {
        if primary.contains(&(i + 1)) {
            first.push(band);
        } else {
            second.push(band);
        }
    }
    let sum = |layers: Vec<&Raster<f64>>| {
        if layers.is_empty() {
            Ok(None)
        } else {
            Raster::stack_sum(&layers).map(Some)
        }
    };
    Ok((sum(first)?, sum(second)?))
}

/// Distribute groundwater budgets over basins.
///
/// Primary-system bands go to basins in the main-water category, the other
/// bands to all remaining basins. Each group's polygons are rasterized on
/// the budget grid and summed per basin; a negative total becomes drainage
/// and a positive total infiltration. Basins without cells get zero.
pub fn budget_forcing(model: &mut Model, steps: &[BudgetStep], primary_bands: &[usize]) -> Result<usize> {
    let all = basins(model);
    let mut layers: [Vec<(i32, MultiPolygon<f64>)>; 2] = [Vec::new(), Vec::new()];
    let mut areas: BTreeMap<i32, f64> = BTreeMap::new();
    for (id, polygon, _) in &all {
        let primary = model
            .get_node(*id)
            .is_some_and(|n| n.meta.category == Some(Category::Hoofdwater));
        areas.insert(id.0, polygon.unsigned_area());
        layers[usize::from(!primary)].push((id.0, polygon.clone()));
    }

    let mut out = Vec::new();
    for step in steps {
        let (primary, secondary) = split_bands(step, primary_bands)?;
        for (layer, grid) in layers.iter().zip([primary, secondary]) {
            let ids: Vec<i32> = layer.iter().map(|(id, _)| *id).collect();
            let sums = match grid {
                Some(grid) => {
                    let (rows, cols) = grid.shape();
                    let zones = rasterize_polygons(layer, *grid.transform(), rows, cols);
                    zonal_sum(&grid, &zones, &ids)?
                }
                None => ids.iter().map(|&id| (id, 0.0)).collect(),
            };
            for (id, total) in sums {
                let area = areas.get(&id).copied().unwrap_or(0.0);
                let rate = if area > 0.0 { total / area / SECONDS_PER_DAY } else { 0.0 };
                debug!("basin {id} budget {total:.1} m3/day at {}", step.time);
                out.push(BasinTimeRow {
                    node_id: NodeId(id),
                    time: step.time,
                    forcing: BasinForcing {
                        drainage: (-rate).max(0.0),
                        infiltration: rate.max(0.0),
                        ..BasinForcing::default()
                    },
                });
            }
        }
    }
    let n = merge_time_rows(model, out, set_budget)?;
    info!("groundwater budgets: {n} rows over {} steps", steps.len());
    Ok(n)
}

/// Inputs of a full forcing pass
#[derive(Debug, Clone, Default)]
pub struct ForcingInput {
    pub model: Model,
    /// Gridded daily meteo; static forcing is used without it
    pub meteo: Option<MeteoGrid>,
    pub budgets: Vec<BudgetStep>,
}

#[derive(Debug, Clone, Default)]
pub struct ForcingParams {
    pub static_forcing: StaticForcing,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// 1-based budget bands of the primary system
    pub primary_bands: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct ForcingOutput {
    pub model: Model,
    pub rows: usize,
}

/// Forcing and budget distribution as an algorithm
#[derive(Debug, Clone, Default)]
pub struct DistributeForcing;

impl Algorithm for DistributeForcing {
    type Input = ForcingInput;
    type Output = ForcingOutput;
    type Params = ForcingParams;
    type Error = Error;

    fn name(&self) -> &'static str {
        "Forcing"
    }

    fn description(&self) -> &'static str {
        "Write per-basin precipitation, evaporation, drainage and infiltration series"
    }

    fn execute(&self, input: Self::Input, params: Self::Params) -> Result<Self::Output> {
        let ForcingInput {
            mut model,
            meteo,
            budgets,
        } = input;
        let rows = distribute_forcing(&mut model, meteo.as_ref(), &budgets, &params)?;
        Ok(ForcingOutput { model, rows })
    }
}

/// Meteo forcing (gridded when given, static otherwise) followed by budgets.
/// Returns the size of the resulting `basin.time` table.
pub fn distribute_forcing(
    model: &mut Model,
    meteo: Option<&MeteoGrid>,
    budgets: &[BudgetStep],
    params: &ForcingParams,
) -> Result<usize> {
    match meteo {
        Some(grid) => dynamic_forcing(model, grid)?,
        None => static_forcing(model, params.static_forcing, params.start, params.end, Duration::days(1))?,
    };
    if !budgets.is_empty() {
        budget_forcing(model, budgets, &params.primary_bands)?;
    }
    Ok(model.basin_time().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;
    use hydronet_core::geometry::rectangle;
    use hydronet_core::model::NodeMeta;

    fn t(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, day).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn mp(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![rectangle(x0, y0, x1, y1)])
    }

    fn basin(model: &mut Model, x: f64, y: f64, area: Option<MultiPolygon<f64>>, meta: NodeMeta) -> NodeId {
        let id = model.add_node(NodeType::Basin, Point::new(x, y), meta, None).unwrap();
        if let Some(a) = area {
            model.add_area(a, Some(id), None, None).unwrap();
        }
        id
    }

    /// 2x2 grid of 10 m cells over (0,0)-(20,20)
    fn grid(values: [f64; 4]) -> Raster<f64> {
        let mut r = Raster::from_vec(values.to_vec(), 2, 2).unwrap();
        r.set_transform(GeoTransform::new(0.0, 20.0, 10.0, -10.0));
        r
    }

    #[test]
    fn test_mm_per_day() {
        assert_relative_eq!(mm_per_day_to_m_per_s(86.4), 1e-6, epsilon = 1e-18);
    }

    #[test]
    fn test_time_steps_inclusive() {
        assert_eq!(time_steps(t(1), t(3), Duration::days(1)).len(), 3);
        assert!(time_steps(t(1), t(3), Duration::zero()).is_empty());
    }

    #[test]
    fn test_static_forcing_rows() {
        let mut m = Model::new();
        let a = basin(&mut m, 0.0, 0.0, None, NodeMeta::default());
        basin(&mut m, 5.0, 0.0, None, NodeMeta::default());
        let forcing = StaticForcing {
            precipitation: 86.4,
            potential_evaporation: 43.2,
            drainage: 8.64,
            ..StaticForcing::default()
        };
        let n = static_forcing(&mut m, forcing, t(1), t(3), Duration::days(1)).unwrap();
        assert_eq!(n, 6);
        assert_eq!(m.basin_time().len(), 6);
        let rates = m.basin(a).unwrap().forcing.unwrap();
        assert_relative_eq!(rates.precipitation, 1e-6, epsilon = 1e-18);
        assert_relative_eq!(rates.potential_evaporation, 5e-7, epsilon = 1e-18);
        assert_relative_eq!(rates.drainage, 1e-7, epsilon = 1e-18);
        assert_eq!(rates.infiltration, 0.0);
        assert!(m.basin_time().iter().all(|r| r.forcing.drainage > 0.0));
    }

    #[test]
    fn test_overlap_weights_normalized() {
        let tf = GeoTransform::new(0.0, 20.0, 10.0, -10.0);
        let w = overlap_weights(&mp(5.0, 10.0, 20.0, 20.0), Point::new(0.0, 0.0), &tf, 2, 2);
        assert_eq!(w.len(), 2);
        let total: f64 = w.iter().map(|x| x.2).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        // a third of the polygon in the left cell
        let left = w.iter().find(|x| x.1 == 0).unwrap();
        assert_relative_eq!(left.2, 1.0 / 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_dynamic_forcing_means_and_nearest_cell() {
        let mut m = Model::new();
        let top = basin(&mut m, 10.0, 15.0, Some(mp(0.0, 10.0, 20.0, 20.0)), NodeMeta::default());
        let far = basin(&mut m, 105.0, 105.0, Some(mp(100.0, 100.0, 110.0, 110.0)), NodeMeta::default());
        let meteo = MeteoGrid::daily(t(1), vec![grid([1.0, 2.0, 3.0, 4.0])], vec![grid([2.0, 2.0, 2.0, 2.0])]);

        let n = dynamic_forcing(&mut m, &meteo).unwrap();
        assert_eq!(n, 2);
        let row = |id| m.basin_time().iter().find(|r| r.node_id == id).unwrap().forcing;
        assert_relative_eq!(row(top).precipitation, mm_per_day_to_m_per_s(1.5), epsilon = 1e-15);
        assert_relative_eq!(
            row(top).potential_evaporation,
            mm_per_day_to_m_per_s(2.0) * 1.26,
            epsilon = 1e-15
        );
        // nearest cell to (105, 105) is the top-right one
        assert_relative_eq!(row(far).precipitation, mm_per_day_to_m_per_s(2.0), epsilon = 1e-15);
    }

    #[test]
    fn test_budget_forcing_sign_split() {
        let mut m = Model::new();
        let main = basin(
            &mut m,
            10.0,
            10.0,
            Some(mp(0.0, 0.0, 20.0, 20.0)),
            NodeMeta::default().with_category(Category::Hoofdwater),
        );
        let other = basin(&mut m, 15.0, 15.0, Some(mp(0.0, 0.0, 20.0, 20.0)), NodeMeta::default());
        let steps = vec![BudgetStep {
            time: t(1),
            bands: vec![grid([-4.0; 4]), grid([2.0; 4])],
        }];

        budget_forcing(&mut m, &steps, &[1]).unwrap();
        let row = |id| m.basin_time().iter().find(|r| r.node_id == id).unwrap().forcing;
        assert_relative_eq!(row(main).drainage, 16.0 / 400.0 / SECONDS_PER_DAY, epsilon = 1e-15);
        assert_relative_eq!(row(main).infiltration, 0.0);
        assert_relative_eq!(row(other).infiltration, 8.0 / 400.0 / SECONDS_PER_DAY, epsilon = 1e-15);
        assert_relative_eq!(row(other).drainage, 0.0);
    }

    #[test]
    fn test_budget_keeps_meteo() {
        let mut m = Model::new();
        let id = basin(&mut m, 10.0, 10.0, Some(mp(0.0, 0.0, 20.0, 20.0)), NodeMeta::default());
        let forcing = StaticForcing {
            precipitation: 86.4,
            ..StaticForcing::default()
        };
        static_forcing(&mut m, forcing, t(1), t(1), Duration::days(1)).unwrap();
        let steps = vec![BudgetStep {
            time: t(1),
            bands: vec![grid([1.0; 4])],
        }];
        budget_forcing(&mut m, &steps, &[]).unwrap();
        assert_eq!(m.basin_time().len(), 1);
        let f = m.basin_time()[0].forcing;
        assert_eq!(m.basin_time()[0].node_id, id);
        assert_relative_eq!(f.precipitation, 1e-6, epsilon = 1e-18);
        assert!(f.infiltration > 0.0);
    }

    #[test]
    fn test_distribute_static_then_budgets() {
        let mut m = Model::new();
        basin(&mut m, 10.0, 10.0, Some(mp(0.0, 0.0, 20.0, 20.0)), NodeMeta::default());
        let params = ForcingParams {
            static_forcing: StaticForcing {
                precipitation: 2.0,
                potential_evaporation: 1.0,
                ..StaticForcing::default()
            },
            start: t(1),
            end: t(2),
            primary_bands: Vec::new(),
        };
        let budgets = vec![BudgetStep {
            time: t(15),
            bands: vec![grid([-1.0; 4])],
        }];
        let rows = distribute_forcing(&mut m, None, &budgets, &params).unwrap();
        assert_eq!(rows, 3);
    }
}
