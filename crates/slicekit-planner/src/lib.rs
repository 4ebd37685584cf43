//! # SliceKit Planner
//!
//! The toolpath-synthesis and motion-planning core of the SliceKit
//! slicer. Given per-layer boundary and content polygons computed
//! upstream, it orders them, routes travel moves around solid material,
//! drives the retraction state machine, governs per-layer speed against
//! a minimum print-time floor, and hands an ordered move stream to a
//! G-code exporter.
//!
//! ## Components
//!
//! - [`comb`]: boundary-aware travel routing
//! - [`order`]: polygon tour ordering, seam placement, monotonic rasters
//! - [`time`]: acceleration-bounded print-time estimation
//! - [`plan`]: the per-layer move queue and state machine
//! - [`export`]: the exporter interface the planner flushes into
//! - [`pipeline`]: parallel per-layer planning with sequential flushing

pub mod comb;
pub mod export;
pub mod order;
pub mod pipeline;
pub mod plan;
pub mod time;

pub use comb::CombPlanner;
pub use export::{GcodeSink, RecordingSink, SinkOp};
pub use order::{OrderedPaths, PathOrderOptimizer};
pub use plan::{FlushState, LayerPlan, PathPoint, Retract, Style, StyleSet};
pub use pipeline::{plan_layers, IslandInput, LayerInput, PlanStats, Progress};
pub use time::{Position, TimeEstimate, TimeEstimateCalculator};
