//! The exporter interface the planner flushes into.
//!
//! The planner never emits G-code text itself; it drives a [`GcodeSink`]
//! with fully resolved moves. A writer backend turns those calls into
//! G-code for a concrete flavor, and [`RecordingSink`] captures them for
//! tests and dry runs.

use slicekit_core::{Coord, Point};

/// Receives the flushed move stream of a layer, in print order.
///
/// Speeds are mm/s, widths are micrometer [`Coord`]s, fan speeds are
/// percentages in `0.0..=100.0`.
pub trait GcodeSink {
    /// A travel when `line_width` is zero, an extrusion otherwise.
    fn move_to(&mut self, dest: Point, speed: f64, line_width: Coord);
    fn retract(&mut self);
    fn unretract(&mut self);
    fn switch_extruder(&mut self, extruder: u8);
    fn set_fan(&mut self, percent: f64);
    fn set_z(&mut self, z: Coord);
}

/// One recorded sink call.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkOp {
    Move {
        dest: Point,
        speed: f64,
        line_width: Coord,
    },
    Retract,
    Unretract,
    SwitchExtruder(u8),
    SetFan(f64),
    SetZ(Coord),
}

/// A sink that records every call for inspection.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub ops: Vec<SinkOp>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded moves with a nonzero line width.
    pub fn extrusions(&self) -> impl Iterator<Item = &SinkOp> {
        self.ops
            .iter()
            .filter(|op| matches!(op, SinkOp::Move { line_width, .. } if *line_width > 0))
    }

    /// Recorded moves with a zero line width.
    pub fn travels(&self) -> impl Iterator<Item = &SinkOp> {
        self.ops
            .iter()
            .filter(|op| matches!(op, SinkOp::Move { line_width, .. } if *line_width == 0))
    }

    pub fn count_retracts(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, SinkOp::Retract))
            .count()
    }
}

impl GcodeSink for RecordingSink {
    fn move_to(&mut self, dest: Point, speed: f64, line_width: Coord) {
        self.ops.push(SinkOp::Move {
            dest,
            speed,
            line_width,
        });
    }

    fn retract(&mut self) {
        self.ops.push(SinkOp::Retract);
    }

    fn unretract(&mut self) {
        self.ops.push(SinkOp::Unretract);
    }

    fn switch_extruder(&mut self, extruder: u8) {
        self.ops.push(SinkOp::SwitchExtruder(extruder));
    }

    fn set_fan(&mut self, percent: f64) {
        self.ops.push(SinkOp::SetFan(percent));
    }

    fn set_z(&mut self, z: Coord) {
        self.ops.push(SinkOp::SetZ(z));
    }
}
