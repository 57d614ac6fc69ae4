//! Model and authority configuration
//!
//! Both live in JSON files. [`ModelConfig`] is the root file of a model
//! directory; [`AuthorityConfig`] holds the per-authority build policy.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::io::HydrologyBand;
use crate::model::NodeId;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const MODEL_FILE: &str = "model.json";
pub const AUTHORITY_FILE: &str = "authority.json";

/// External solver invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverSettings {
    pub executable: PathBuf,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_timeout() -> u64 {
    3600
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("ribasim"),
            timeout_seconds: default_timeout(),
            args: Vec::new(),
        }
    }
}

/// Root configuration of a model directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default = "default_crs")]
    pub crs: String,
    pub starttime: NaiveDateTime,
    pub endtime: NaiveDateTime,
    #[serde(default)]
    pub solver: SolverSettings,
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_crs() -> String {
    CRS::rd_new().identifier()
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_database() -> String {
    "database.json".into()
}

impl ModelConfig {
    pub fn new(name: impl Into<String>, starttime: NaiveDateTime, endtime: NaiveDateTime) -> Self {
        Self {
            name: name.into(),
            crs: default_crs(),
            starttime,
            endtime,
            solver: SolverSettings::default(),
            results_dir: default_results_dir(),
            database: default_database(),
        }
    }

    /// Check the time window and that the CRS is projected
    pub fn validate(&self) -> Result<()> {
        if self.endtime <= self.starttime {
            return Err(Error::InvalidParameter {
                name: "endtime",
                value: self.endtime.to_string(),
                reason: format!("must be after starttime {}", self.starttime),
            });
        }
        CRS::parse(&self.crs)?.require_projected()?;
        Ok(())
    }
}

/// Unit of flow rates in a structure inventory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowUnit {
    #[default]
    CubicMetrePerSecond,
    CubicMetrePerMinute,
}

impl FlowUnit {
    /// Convert a value in this unit to m³/s
    pub fn to_m3s(self, value: f64) -> f64 {
        match self {
            FlowUnit::CubicMetrePerSecond => value,
            FlowUnit::CubicMetrePerMinute => value / 60.0,
        }
    }
}

/// Input file names, relative to the authority directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputFiles {
    #[serde(default = "InputFiles::default_zones")]
    pub zones: String,
    #[serde(default = "InputFiles::default_lines")]
    pub lines: String,
    #[serde(default)]
    pub filter_lines: Option<String>,
    /// Candidate basin areas for assignment
    #[serde(default)]
    pub areas: Option<String>,
    #[serde(default)]
    pub alternative_areas: Option<String>,
    /// Structure inventory with `code` and `flow_rate` columns
    #[serde(default)]
    pub inventory: Option<String>,
    #[serde(default = "InputFiles::default_edits")]
    pub edits: String,
    /// Monthly groundwater budget rasters, one band per system
    #[serde(default)]
    pub budget_rasters: Vec<TimedRaster>,
    /// 1-based bands of each budget raster that belong to the primary system
    #[serde(default)]
    pub budget_primary_bands: Vec<usize>,
    /// Daily meteorological grids (mm/day), band `i` holds day `i` from the start time
    #[serde(default)]
    pub precipitation_raster: Option<String>,
    #[serde(default)]
    pub evaporation_raster: Option<String>,
    /// National hydrology raster; its bottom band gives basins without any
    /// other level source a target level
    #[serde(default)]
    pub hydrology_raster: Option<String>,
    /// 1-based band of `hydrology_raster` holding the water-course bottom
    #[serde(default = "InputFiles::default_bottom_band")]
    pub hydrology_bottom_band: usize,
}

impl InputFiles {
    fn default_zones() -> String {
        "zones.json".into()
    }

    fn default_lines() -> String {
        "lines.json".into()
    }

    fn default_edits() -> String {
        "edits.json".into()
    }

    fn default_bottom_band() -> usize {
        HydrologyBand::PrimaryBottomSummer.band()
    }

    /// Band of the hydrology raster to read bottom levels from
    pub fn bottom_band(&self) -> Result<HydrologyBand> {
        HydrologyBand::from_band(self.hydrology_bottom_band)
    }
}

impl Default for InputFiles {
    fn default() -> Self {
        Self {
            zones: Self::default_zones(),
            lines: Self::default_lines(),
            filter_lines: None,
            areas: None,
            alternative_areas: None,
            inventory: None,
            edits: Self::default_edits(),
            budget_rasters: Vec::new(),
            budget_primary_bands: Vec::new(),
            precipitation_raster: None,
            evaporation_raster: None,
            hydrology_raster: None,
            hydrology_bottom_band: Self::default_bottom_band(),
        }
    }
}

/// A raster valid from `time` on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedRaster {
    pub time: NaiveDateTime,
    pub path: String,
}

/// Static forcing applied to every basin, in mm/day
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticForcing {
    #[serde(default)]
    pub precipitation: f64,
    #[serde(default)]
    pub potential_evaporation: f64,
    /// Groundwater drainage into the basin, replaced by budget rasters where given
    #[serde(default)]
    pub drainage: f64,
    #[serde(default)]
    pub infiltration: f64,
}

/// Build policy of one water authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorityConfig {
    pub name: String,
    /// Distance under which zone boundaries count as coincident (m)
    pub crossing_tolerance: f64,
    /// Lobes of self-touching zones smaller than this are not split off (m²)
    #[serde(default = "defaults::butterfly_lobe_area")]
    pub butterfly_lobe_area: f64,
    /// Zones smaller than this act as category wildcards during aggregation (m²)
    #[serde(default = "defaults::joker_area")]
    pub joker_area: f64,
    /// Parts below this area are dropped when dissolving basin areas (m²)
    #[serde(default = "defaults::sliver_area")]
    pub sliver_area: f64,
    #[serde(default = "defaults::culvert_prefixes")]
    pub culvert_prefixes: Vec<String>,
    /// Target level fallback is bottom + (invert - bottom) / divisor
    #[serde(default = "defaults::profile_divisor")]
    pub profile_divisor: f64,
    /// Depth of generated basin profiles below target level (m)
    #[serde(default = "defaults::depth_profile")]
    pub depth_profile: f64,
    /// Capacity fallback for structures without inventory (mm/day over upstream area)
    #[serde(default = "defaults::specific_discharge")]
    pub specific_discharge: f64,
    #[serde(default)]
    pub inventory_flow_unit: FlowUnit,
    #[serde(default = "defaults::manning_n")]
    pub manning_n: f64,
    /// Search distance for orphan basin areas (m)
    #[serde(default = "defaults::closest_area_distance")]
    pub closest_area_distance: f64,
    #[serde(default = "defaults::yes")]
    pub aggregate_parallel_crossings: bool,
    #[serde(default)]
    pub static_forcing: StaticForcing,
    #[serde(default)]
    pub files: InputFiles,
    /// Manual area-code to basin assignments, applied last
    #[serde(default)]
    pub area_overrides: BTreeMap<String, NodeId>,
}

mod defaults {
    pub fn butterfly_lobe_area() -> f64 {
        100.0
    }
    pub fn joker_area() -> f64 {
        10_000.0
    }
    pub fn sliver_area() -> f64 {
        1.0
    }
    pub fn culvert_prefixes() -> Vec<String> {
        vec!["DKR".into(), "KDU".into()]
    }
    pub fn profile_divisor() -> f64 {
        3.0
    }
    pub fn depth_profile() -> f64 {
        2.0
    }
    pub fn specific_discharge() -> f64 {
        15.0
    }
    pub fn manning_n() -> f64 {
        0.04
    }
    pub fn closest_area_distance() -> f64 {
        100.0
    }
    pub fn yes() -> bool {
        true
    }
}

impl AuthorityConfig {
    /// Config with every optional value at its default
    pub fn new(name: impl Into<String>, crossing_tolerance: f64) -> Self {
        Self {
            name: name.into(),
            crossing_tolerance,
            butterfly_lobe_area: defaults::butterfly_lobe_area(),
            joker_area: defaults::joker_area(),
            sliver_area: defaults::sliver_area(),
            culvert_prefixes: defaults::culvert_prefixes(),
            profile_divisor: defaults::profile_divisor(),
            depth_profile: defaults::depth_profile(),
            specific_discharge: defaults::specific_discharge(),
            inventory_flow_unit: FlowUnit::default(),
            manning_n: defaults::manning_n(),
            closest_area_distance: defaults::closest_area_distance(),
            aggregate_parallel_crossings: true,
            static_forcing: StaticForcing::default(),
            files: InputFiles::default(),
            area_overrides: BTreeMap::new(),
        }
    }

    /// Read `<data_dir>/<authority>/authority.json`
    pub fn load(data_dir: &Path, authority: &str) -> Result<Self> {
        let path = data_dir.join(authority).join(AUTHORITY_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found("authority config", path.display()))
            }
            Err(err) => return Err(err.into()),
        };
        let config: AuthorityConfig = serde_json::from_slice(&bytes)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("crossing_tolerance", self.crossing_tolerance),
            ("depth_profile", self.depth_profile),
            ("manning_n", self.manning_n),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::InvalidParameter {
                    name,
                    value: value.to_string(),
                    reason: "must be a positive number".into(),
                });
            }
        }
        if self.profile_divisor <= 1.0 {
            return Err(Error::InvalidParameter {
                name: "profile_divisor",
                value: self.profile_divisor.to_string(),
                reason: "must be greater than 1".into(),
            });
        }
        self.files.bottom_band()?;
        Ok(())
    }

    /// Whether a structure code marks a culvert
    pub fn is_culvert(&self, code: &str) -> bool {
        self.culvert_prefixes.iter().any(|p| code.starts_with(p.as_str()))
    }
}
