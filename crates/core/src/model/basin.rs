//! Basin tables: profile, state, static forcing, areas and time series

use crate::error::{Error, Result};
use crate::model::{AreaId, NodeId};
use chrono::NaiveDateTime;
use geo::{Area, MultiPolygon};
use serde::{Deserialize, Serialize};

/// One row of a level → area curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub level: f64,
    pub area: f64,
}

/// Level → cumulative wetted area curve of a basin.
///
/// Levels are strictly increasing and areas non-decreasing; storage at a
/// level is the integral of area over level from the bottom.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile {
    pub rows: Vec<ProfileRow>,
}

impl Profile {
    pub fn new(rows: Vec<ProfileRow>) -> Result<Self> {
        let profile = Self { rows };
        profile.validate()?;
        Ok(profile)
    }

    /// Check the curve has at least two monotone rows
    pub fn validate(&self) -> Result<()> {
        if self.rows.len() < 2 {
            return Err(Error::invariant(
                "profile-monotone",
                format!("profile needs at least 2 rows, has {}", self.rows.len()),
            ));
        }
        for w in self.rows.windows(2) {
            if w[1].level <= w[0].level || w[1].area < w[0].area {
                return Err(Error::invariant(
                    "profile-monotone",
                    format!(
                        "rows ({}, {}) -> ({}, {}) are not increasing",
                        w[0].level, w[0].area, w[1].level, w[1].area
                    ),
                ));
            }
        }
        if self.rows.iter().any(|r| r.area < 0.0 || !r.level.is_finite()) {
            return Err(Error::invariant("profile-monotone", "negative area or non-finite level"));
        }
        Ok(())
    }

    pub fn bottom(&self) -> Option<f64> {
        self.rows.first().map(|r| r.level)
    }

    pub fn top(&self) -> Option<f64> {
        self.rows.last().map(|r| r.level)
    }

    pub fn contains_level(&self, level: f64) -> bool {
        match (self.bottom(), self.top()) {
            (Some(lo), Some(hi)) => level >= lo && level <= hi,
            _ => false,
        }
    }

    /// Wetted area at a level, linearly interpolated and held constant above the top
    pub fn area_at(&self, level: f64) -> f64 {
        let rows = &self.rows;
        match rows.len() {
            0 => 0.0,
            _ if level <= rows[0].level => rows[0].area,
            _ => rows
                .windows(2)
                .find(|w| level <= w[1].level)
                .map(|w| {
                    let f = (level - w[0].level) / (w[1].level - w[0].level);
                    w[0].area + f * (w[1].area - w[0].area)
                })
                .unwrap_or(rows[rows.len() - 1].area),
        }
    }

    /// Storage (m³) between the bottom and `level`
    pub fn storage_at(&self, level: f64) -> f64 {
        let mut storage = 0.0;
        for w in self.rows.windows(2) {
            if level <= w[0].level {
                break;
            }
            let upper = level.min(w[1].level);
            let a_upper = self.area_at(upper);
            storage += 0.5 * (w[0].area + a_upper) * (upper - w[0].level);
        }
        if let Some(last) = self.rows.last() {
            if level > last.level {
                storage += last.area * (level - last.level);
            }
        }
        storage
    }

    /// Two-row profile for a basin polygon: a small bottom area `depth`
    /// below the target level growing to the full polygon area at it.
    pub fn from_area(area: &MultiPolygon<f64>, target_level: f64, depth: f64) -> Result<Self> {
        if depth <= 0.0 {
            return Err(Error::InvalidParameter {
                name: "depth_profile",
                value: depth.to_string(),
                reason: "must be positive".into(),
            });
        }
        let surface = area.unsigned_area();
        if surface <= 0.0 {
            return Err(Error::Geometry("basin area polygon is empty".into()));
        }
        Profile::new(vec![
            ProfileRow {
                level: target_level - depth,
                area: (surface * 0.1).max(0.01),
            },
            ProfileRow {
                level: target_level,
                area: surface,
            },
        ])
    }
}

/// Static forcing rates in m/s
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BasinForcing {
    pub precipitation: f64,
    pub potential_evaporation: f64,
    pub drainage: f64,
    pub infiltration: f64,
}

/// Data of a Basin node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Basin {
    #[serde(default)]
    pub profile: Profile,
    /// Initial level
    #[serde(default)]
    pub state: Option<f64>,
    /// Streefpeil
    #[serde(default)]
    pub target_level: Option<f64>,
    #[serde(default, rename = "static")]
    pub forcing: Option<BasinForcing>,
}

impl Basin {
    pub fn with_profile(profile: Profile) -> Self {
        Self {
            profile,
            ..Self::default()
        }
    }
}

/// A row of `basin.area`: polygon plus the Basin it drains to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasinArea {
    pub id: AreaId,
    pub node_id: Option<NodeId>,
    pub geometry: MultiPolygon<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_level: Option<f64>,
}

impl BasinArea {
    pub fn area(&self) -> f64 {
        self.geometry.unsigned_area()
    }
}

/// A row of `basin.time`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasinTimeRow {
    pub node_id: NodeId,
    pub time: NaiveDateTime,
    #[serde(flatten)]
    pub forcing: BasinForcing,
}
