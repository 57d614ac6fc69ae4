//! # Hydronet Algorithms
//!
//! Build phases that turn authority datasets into a parameterized network model.
//!
//! ## Available Algorithm Categories
//!
//! - **crossings**: where hydro-object lines cross water-level zone boundaries
//! - **aggregation**: grouping zones into basins through the crossing network
//! - **assignment**: attaching candidate area polygons to Basin nodes
//! - **parameterize**: target levels, capacities, rating curves, profiles
//! - **forcing**: meteorological forcing and groundwater budgets
//! - **editlog**: replay of hand-authored model edits
//! - **solver** / **validation**: running the solver and checking its results
//! - **statistics**: zonal statistics on integer zone rasters

pub mod aggregation;
pub mod assignment;
pub mod crossings;
pub mod editlog;
pub mod forcing;
pub(crate) mod maybe_rayon;
pub mod parameterize;
pub mod solver;
pub mod statistics;
pub mod validation;
pub mod zone;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::aggregation::{aggregate_zones, AggregateZones, Aggregation, AggregationParams};
    pub use crate::assignment::{
        assign_basin_areas, candidates_from_layer, AssignBasinAreas, AssignmentParams, CandidateArea,
    };
    pub use crate::crossings::{
        extract_crossings, Crossing, CrossingKind, CrossingSet, CrossingsInput, CrossingsParams, ExtractCrossings,
    };
    pub use crate::editlog::{replay, FailedEdit, ReplayEditLog, ReplayReport};
    pub use crate::forcing::{
        budget_forcing, distribute_forcing, dynamic_forcing, static_forcing, BudgetStep, DistributeForcing,
        ForcingParams, MeteoGrid,
    };
    pub use crate::parameterize::{
        basin_bottom_levels, propagate, PropagateParameters, PropagationParams, PropagationReport,
    };
    pub use crate::solver::run_solver;
    pub use crate::statistics::{zonal_statistics, zonal_sum};
    pub use crate::validation::{validate, Results, ValidateModel, ValidationParams, ValidationReport};
    pub use crate::zone::{split_butterflies, zones_from_layer, Zone};
    pub use hydronet_core::prelude::*;
}
