//! Reading and writing model directories, JSON tables and GeoTIFF rasters

mod hydrology;
mod model_file;
mod native;

pub use hydrology::HydrologyBand;
pub use model_file::{read_json, read_model, write_json_atomic, write_model};
pub use native::{
    band_count, read_all_bands, read_geotiff, read_geotiff_from_buffer, write_geotiff,
    write_geotiff_to_buffer, GeoTiffOptions,
};
