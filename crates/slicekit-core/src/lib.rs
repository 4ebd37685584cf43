//! # SliceKit Core
//!
//! Core types for the SliceKit toolpath planning stack: fixed-point
//! micrometer coordinates, planar geometry primitives, the per-print
//! settings snapshot, and the shared error type.
//!
//! Everything in this crate is a plain value type. Geometry inputs
//! (boundary and content polygons) are produced upstream and consumed
//! read-only by the planner crate.

pub mod error;
pub mod geometry;
pub mod settings;
pub mod units;

pub use error::{Error, Result};
pub use geometry::{Point, PointMatrix, Polygon, Polygons};
pub use settings::{
    CoolingSettings, ExtrusionSettings, KinematicSettings, RetractionSettings, SeamMode,
    SeamSettings, SliceSettings, SpeedSettings,
};
pub use units::{scale, unscale, Coord};
