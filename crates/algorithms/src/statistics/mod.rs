//! Raster statistics per basin zone
//!
//! - **zonal**: statistics of a value raster over an integer zone raster

pub mod zonal;

pub use zonal::{zonal_statistics, zonal_sum, ZonalResult};
