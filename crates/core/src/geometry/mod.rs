//! Geometry utilities shared by the network model and the algorithms
//!
//! Everything works in projected coordinates (metres). Functions take
//! `geo` types and never mutate their inputs.

mod line;
mod polygon;

pub use line::{line_length, point_line_distance, project_on_line, segment_intersection, LineProjection};
pub use polygon::{
    buffer_point, difference, dissolve, intersection, overlap_area, rectangle,
    remove_slivers, split_pinched, split_polygon, union, union_all,
};
