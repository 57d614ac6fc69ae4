//! Raster grids used for national hydrology bands, budgets and meteo grids

mod element;
mod geotransform;
mod grid;
mod rasterize;

pub use element::RasterElement;
pub use geotransform::GeoTransform;
pub use grid::Raster;
pub use rasterize::{cell_window, rasterize_polygons};
