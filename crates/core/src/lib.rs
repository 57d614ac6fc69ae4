//! # Hydronet Core
//!
//! Core types, traits and I/O for building surface-water network models.
//!
//! This crate provides:
//! - `Model`: typed node, link and basin tables behind a mutation API
//! - Geometry utilities and spatial indexes for zones, lines and basins
//! - `Raster<T>` and `GeoTransform` for gridded inputs
//! - Model and authority configuration, model-file and GeoTIFF I/O
//! - A structured diagnostics channel for inference warnings

pub mod config;
pub mod crs;
pub mod diagnostics;
pub mod error;
pub mod geometry;
pub mod io;
pub mod model;
pub mod raster;
pub mod spatial;
pub mod vector;

pub use config::{AuthorityConfig, ModelConfig};
pub use crs::CRS;
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{Error, Result};
pub use model::Model;
pub use raster::{GeoTransform, Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{AuthorityConfig, ModelConfig};
    pub use crate::crs::CRS;
    pub use crate::diagnostics::Diagnostics;
    pub use crate::error::{Error, Result};
    pub use crate::model::{
        Adjacent, Link, LinkKind, Model, Node, NodeData, NodeId, NodeMeta, NodeType,
    };
    pub use crate::raster::{GeoTransform, Raster, RasterElement};
    pub use crate::Algorithm;
}

/// A build step over the network model.
///
/// Steps are pure functions of their input and parameters; the ones that
/// change the model take it by value in `Input` and hand it back in `Output`.
pub trait Algorithm {
    /// Input type for the algorithm
    type Input;
    /// Output type for the algorithm
    type Output;
    /// Parameters controlling algorithm behavior
    type Params: Default;
    /// Error type for algorithm execution
    type Error: std::error::Error;

    /// Returns the algorithm name
    fn name(&self) -> &'static str;

    /// Returns a description of what the algorithm does
    fn description(&self) -> &'static str;

    /// Execute the algorithm
    fn execute(&self, input: Self::Input, params: Self::Params) -> std::result::Result<Self::Output, Self::Error>;

    /// Execute with default parameters
    fn execute_default(&self, input: Self::Input) -> std::result::Result<Self::Output, Self::Error> {
        self.execute(input, Self::Params::default())
    }
}
