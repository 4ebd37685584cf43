//! Per-print settings snapshot.
//!
//! A read-only bundle of every named value the planner consumes, grouped
//! into logical sections. Loading and persistence live upstream; the
//! planner reads one snapshot per layer-height tier and never writes it.
//!
//! All lengths are millimeters, speeds mm/s, accelerations mm/s²; the
//! planner converts to fixed-point micrometers at its edges.

use serde::{Deserialize, Serialize};

/// Extrusion geometry defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtrusionSettings {
    /// Default extrusion line width.
    pub line_width: f64,
    /// Layer height, used for extrusion flow and spiralize ramping.
    pub layer_height: f64,
    /// Filament diameter, used for the E-axis flow estimate.
    pub filament_diameter: f64,
    /// Fraction of the line width trimmed off the closing move of a
    /// seam-hidden loop.
    pub seam_overlap_fraction: f64,
    /// Lift the nozzle by this much on retracted travels (0 disables).
    pub zhop_height: f64,
    /// Print the outer wall as one continuous spiral.
    pub spiralize: bool,
}

impl Default for ExtrusionSettings {
    fn default() -> Self {
        Self {
            line_width: 0.4,
            layer_height: 0.2,
            filament_diameter: 1.75,
            seam_overlap_fraction: 0.2,
            zhop_height: 0.0,
            spiralize: false,
        }
    }
}

/// Per-feature print speeds in mm/s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeedSettings {
    pub travel: f64,
    pub outer_wall: f64,
    pub inner_wall: f64,
    pub infill: f64,
    pub support: f64,
    /// Bridges are speed-locked: the minimum-layer-time governor never
    /// rescales them.
    pub bridge: f64,
}

impl Default for SpeedSettings {
    fn default() -> Self {
        Self {
            travel: 150.0,
            outer_wall: 30.0,
            inner_wall: 60.0,
            infill: 80.0,
            support: 60.0,
            bridge: 40.0,
        }
    }
}

/// Retraction and travel-routing thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetractionSettings {
    /// Travels shorter than this never fire a requested retraction.
    pub min_travel: f64,
    /// A boundary-safe detour longer than the direct travel by more than
    /// this ratio is discarded in favor of a forced retraction.
    /// Tuned constant, preserved as-is.
    pub comb_detour_ratio: f64,
}

impl Default for RetractionSettings {
    fn default() -> Self {
        Self {
            min_travel: 1.5,
            comb_detour_ratio: 5.0,
        }
    }
}

/// Where a closed perimeter starts and stops extruding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeamMode {
    /// Hide the seam in the sharpest corner, preferring concave turns.
    Sharpest,
    /// Content-hashed pseudo-random vertex, stable per polygon.
    Random,
    /// Vertex nearest a caller-supplied anchor.
    Nearest,
    /// Rearmost vertex (largest Y).
    Rearmost,
}

/// Seam placement settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeamSettings {
    pub mode: SeamMode,
    /// Layer-index stagger period for shallow convex seams.
    /// Tuned constant, preserved as-is.
    pub convex_stagger: u32,
    /// Layer-index stagger period for shallow concave seams.
    /// Tuned constant, preserved as-is.
    pub concave_stagger: u32,
}

impl Default for SeamSettings {
    fn default() -> Self {
        Self {
            mode: SeamMode::Sharpest,
            convex_stagger: 3,
            concave_stagger: 5,
        }
    }
}

/// Machine kinematic limits, axis order X, Y, Z, E.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KinematicSettings {
    /// Per-axis maximum feed rate, mm/s.
    pub max_feedrate: [f64; 4],
    /// Per-axis maximum acceleration, mm/s².
    pub max_acceleration: [f64; 4],
    /// Default move acceleration, mm/s².
    pub acceleration: f64,
    /// Maximum instantaneous XY velocity change at a junction, mm/s.
    pub max_xy_jerk: f64,
    pub max_z_jerk: f64,
    pub max_e_jerk: f64,
    /// Lowest speed the trapezoid planner will plan a junction at.
    pub minimum_planner_speed: f64,
    /// Lowest feed rate accepted for a block.
    pub minimum_feedrate: f64,
}

impl Default for KinematicSettings {
    fn default() -> Self {
        Self {
            max_feedrate: [300.0, 300.0, 40.0, 45.0],
            max_acceleration: [9000.0, 9000.0, 100.0, 10000.0],
            acceleration: 3000.0,
            max_xy_jerk: 20.0,
            max_z_jerk: 0.4,
            max_e_jerk: 5.0,
            minimum_planner_speed: 0.05,
            minimum_feedrate: 0.01,
        }
    }
}

/// Cooling: the minimum-layer-time governor and the fan ramp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoolingSettings {
    /// Target minimum print time per layer, seconds. A soft floor: the
    /// governor slows variable-speed moves toward it but never errors
    /// when it cannot be met.
    pub min_layer_time: f64,
    /// Variable-speed moves are never slowed below this, mm/s.
    pub min_print_speed: f64,
    /// Fan percent for layers at or slower than `fan_min_time`.
    pub fan_speed_min: f64,
    /// Fan percent for layers at or faster than `fan_max_time`.
    pub fan_speed_max: f64,
    /// Layer duration at which the ramp reaches `fan_speed_min`, seconds.
    pub fan_min_time: f64,
    /// Layer duration at which the ramp reaches `fan_speed_max`, seconds.
    pub fan_max_time: f64,
    /// Absolute lower clamp on any non-zero fan request, percent.
    pub fan_speed_floor: f64,
    /// No fan at all below this layer index.
    pub first_fan_layer: u32,
}

impl Default for CoolingSettings {
    fn default() -> Self {
        Self {
            min_layer_time: 5.0,
            min_print_speed: 10.0,
            fan_speed_min: 35.0,
            fan_speed_max: 100.0,
            fan_min_time: 10.0,
            fan_max_time: 5.0,
            fan_speed_floor: 20.0,
            first_fan_layer: 2,
        }
    }
}

/// The complete settings snapshot consumed by the planner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SliceSettings {
    pub extrusion: ExtrusionSettings,
    pub speed: SpeedSettings,
    pub retraction: RetractionSettings,
    pub seam: SeamSettings,
    pub kinematics: KinematicSettings,
    pub cooling: CoolingSettings,
}
