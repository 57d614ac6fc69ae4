//! Bands of the national hydrology raster

use crate::error::{Error, Result};
use crate::raster::Raster;
use std::path::Path;

/// The twelve bands of the national hydrology raster, in file order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HydrologyBand {
    SurfaceElevation = 1,
    PrimaryBottomSummer = 2,
    PrimaryBottomWinter = 3,
    SecondaryBottomSummer = 4,
    SecondaryBottomWinter = 5,
    TertiaryBottomSummer = 6,
    TertiaryBottomWinter = 7,
    HighestGroundwater = 8,
    LowestGroundwater = 9,
    PrimaryWaterFraction = 10,
    SecondaryWaterFraction = 11,
    TertiaryWaterFraction = 12,
}

impl HydrologyBand {
    pub const ALL: [HydrologyBand; 12] = [
        HydrologyBand::SurfaceElevation,
        HydrologyBand::PrimaryBottomSummer,
        HydrologyBand::PrimaryBottomWinter,
        HydrologyBand::SecondaryBottomSummer,
        HydrologyBand::SecondaryBottomWinter,
        HydrologyBand::TertiaryBottomSummer,
        HydrologyBand::TertiaryBottomWinter,
        HydrologyBand::HighestGroundwater,
        HydrologyBand::LowestGroundwater,
        HydrologyBand::PrimaryWaterFraction,
        HydrologyBand::SecondaryWaterFraction,
        HydrologyBand::TertiaryWaterFraction,
    ];

    /// 1-based band number in the file
    pub fn band(self) -> usize {
        self as usize
    }

    pub fn from_band(band: usize) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|b| b.band() == band)
            .ok_or_else(|| Error::InvalidParameter {
                name: "band",
                value: band.to_string(),
                reason: "hydrology raster has bands 1-12".into(),
            })
    }

    /// Read this band from the national raster
    pub fn read(self, path: &Path) -> Result<Raster<f64>> {
        super::read_geotiff(path, Some(self.band()))
    }
}
