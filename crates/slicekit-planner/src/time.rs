//! Acceleration-bounded print-time estimation.
//!
//! A simplified trapezoidal motion model over the queued moves of one
//! layer: each move becomes a block with a clamped feed rate, a clamped
//! acceleration, and a jerk-bounded junction speed against its
//! predecessor. A reverse pass lowers entry speeds to what the next
//! block can absorb; a forward pass raises them back where the previous
//! block has room to accelerate. Both passes are required because a
//! block's feasible entry speed depends on both neighbours; they run as
//! index sweeps over the block list, never through aliased references.
//!
//! Blocks live for one estimation pass and are cleared before the next.

use slicekit_core::KinematicSettings;

/// Axis order: X, Y, Z, E.
pub const NUM_AXES: usize = 4;

/// A machine position in millimeters, including extruder filament
/// position.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Position(pub [f64; NUM_AXES]);

impl Position {
    pub fn new(x: f64, y: f64, z: f64, e: f64) -> Self {
        Self([x, y, z, e])
    }
}

/// One planned move with its resulting velocity trapezoid.
#[derive(Debug, Clone)]
struct Block {
    distance: f64,
    nominal_feedrate: f64,
    acceleration: f64,
    max_entry_speed: f64,
    entry_speed: f64,
    initial_feedrate: f64,
    final_feedrate: f64,
    /// Distance from block start at which acceleration ends.
    accelerate_until: f64,
    /// Distance from block start at which deceleration begins.
    decelerate_after: f64,
    /// True when the block can reach nominal speed from any entry speed
    /// within its own length; such blocks never limit their neighbours.
    nominal_length: bool,
    /// False for speed-locked moves the governor must not rescale.
    adjustable: bool,
}

/// Split of the estimated layer time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TimeEstimate {
    /// Sum of all block times, seconds.
    pub total: f64,
    /// Time spent in travels and speed-locked moves.
    pub fixed: f64,
    /// Time spent in moves the minimum-layer-time governor may slow.
    pub variable: f64,
}

/// Simulates a queued move sequence against the machine's kinematic
/// limits and reports how long it takes.
#[derive(Debug, Clone)]
pub struct TimeEstimateCalculator {
    limits: KinematicSettings,
    position: Position,
    previous_feedrate: [f64; NUM_AXES],
    previous_nominal_feedrate: f64,
    blocks: Vec<Block>,
}

impl TimeEstimateCalculator {
    pub fn new(limits: &KinematicSettings) -> Self {
        Self {
            limits: limits.clone(),
            position: Position::default(),
            previous_feedrate: [0.0; NUM_AXES],
            previous_nominal_feedrate: 0.0,
            blocks: Vec::new(),
        }
    }

    /// Clear all blocks and restart the simulation from `position`.
    pub fn reset(&mut self, position: Position) {
        self.blocks.clear();
        self.previous_feedrate = [0.0; NUM_AXES];
        self.previous_nominal_feedrate = 0.0;
        self.position = position;
    }

    /// Queue a move to `to` at the requested feed rate. Zero-distance
    /// moves are dropped.
    pub fn plan(&mut self, to: Position, feedrate: f64, acceleration: f64, adjustable: bool) {
        let mut delta = [0.0; NUM_AXES];
        for i in 0..NUM_AXES {
            delta[i] = to.0[i] - self.position.0[i];
        }
        let mut distance = (delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2]).sqrt();
        if distance == 0.0 {
            distance = delta[3].abs();
        }
        if distance <= 0.0 {
            return;
        }
        self.position = to;

        let mut feedrate = feedrate.max(self.limits.minimum_feedrate);
        let mut current_feedrate = [0.0; NUM_AXES];
        for i in 0..NUM_AXES {
            current_feedrate[i] = delta[i] * feedrate / distance;
        }

        // Per-axis feed rate clamp.
        let mut factor = 1.0f64;
        for i in 0..NUM_AXES {
            let axis_feedrate = current_feedrate[i].abs();
            if axis_feedrate > self.limits.max_feedrate[i] {
                factor = factor.min(self.limits.max_feedrate[i] / axis_feedrate);
            }
        }
        feedrate *= factor;
        for f in &mut current_feedrate {
            *f *= factor;
        }

        // Per-axis acceleration clamp.
        let mut acceleration = acceleration;
        for i in 0..NUM_AXES {
            let unit = delta[i].abs() / distance;
            if unit * acceleration > self.limits.max_acceleration[i] {
                acceleration = self.limits.max_acceleration[i] / unit;
            }
        }

        // Jerk-bounded junction speed against the previous feed vector.
        let mut vmax_junction = self.limits.max_xy_jerk / 2.0;
        if current_feedrate[2].abs() > self.limits.max_z_jerk / 2.0 {
            vmax_junction = vmax_junction.min(self.limits.max_z_jerk / 2.0);
        }
        if current_feedrate[3].abs() > self.limits.max_e_jerk / 2.0 {
            vmax_junction = vmax_junction.min(self.limits.max_e_jerk / 2.0);
        }
        vmax_junction = vmax_junction.min(feedrate);
        if !self.blocks.is_empty() && self.previous_nominal_feedrate > 0.0001 {
            let xy_jerk = ((current_feedrate[0] - self.previous_feedrate[0]).powi(2)
                + (current_feedrate[1] - self.previous_feedrate[1]).powi(2))
            .sqrt();
            let mut junction_factor = 1.0f64;
            vmax_junction = feedrate;
            if xy_jerk > self.limits.max_xy_jerk {
                junction_factor = self.limits.max_xy_jerk / xy_jerk;
            }
            let z_jerk = (current_feedrate[2] - self.previous_feedrate[2]).abs();
            if z_jerk > self.limits.max_z_jerk {
                junction_factor = junction_factor.min(self.limits.max_z_jerk / z_jerk);
            }
            let e_jerk = (current_feedrate[3] - self.previous_feedrate[3]).abs();
            if e_jerk > self.limits.max_e_jerk {
                junction_factor = junction_factor.min(self.limits.max_e_jerk / e_jerk);
            }
            vmax_junction = self
                .previous_nominal_feedrate
                .min(vmax_junction * junction_factor);
        }

        let v_allowable =
            max_allowable_speed(-acceleration, self.limits.minimum_planner_speed, distance);
        let entry_speed = vmax_junction.min(v_allowable);

        self.blocks.push(Block {
            distance,
            nominal_feedrate: feedrate,
            acceleration,
            max_entry_speed: vmax_junction,
            entry_speed,
            initial_feedrate: entry_speed,
            final_feedrate: entry_speed,
            accelerate_until: 0.0,
            decelerate_after: 0.0,
            nominal_length: feedrate <= v_allowable,
            adjustable,
        });

        self.previous_feedrate = current_feedrate;
        self.previous_nominal_feedrate = feedrate;
    }

    /// Resolve every trapezoid and sum the block times.
    pub fn calculate(&mut self) -> TimeEstimate {
        self.reverse_pass();
        self.forward_pass();
        self.recalculate_trapezoids();

        let mut estimate = TimeEstimate::default();
        for block in &self.blocks {
            let plateau = block.decelerate_after - block.accelerate_until;
            let time = acceleration_time_from_distance(
                block.initial_feedrate,
                block.accelerate_until,
                block.acceleration,
            ) + plateau / block.nominal_feedrate
                + acceleration_time_from_distance(
                    block.final_feedrate,
                    block.distance - block.decelerate_after,
                    block.acceleration,
                );
            estimate.total += time;
            if block.adjustable {
                estimate.variable += time;
            } else {
                estimate.fixed += time;
            }
        }
        estimate
    }

    /// Lower entry speeds to what the following block can absorb under
    /// its deceleration limit.
    fn reverse_pass(&mut self) {
        for i in (0..self.blocks.len().saturating_sub(1)).rev() {
            let next_entry = self.blocks[i + 1].entry_speed;
            let block = &mut self.blocks[i];
            if block.entry_speed != block.max_entry_speed {
                if !block.nominal_length && block.max_entry_speed > next_entry {
                    block.entry_speed = block.max_entry_speed.min(max_allowable_speed(
                        -block.acceleration,
                        next_entry,
                        block.distance,
                    ));
                } else {
                    block.entry_speed = block.max_entry_speed;
                }
            }
        }
    }

    /// Raise entry speeds back where the previous block is long enough
    /// to accelerate into them, never past the junction bound.
    fn forward_pass(&mut self) {
        for i in 1..self.blocks.len() {
            let (prev_nominal_length, prev_entry, prev_acceleration, prev_distance) = {
                let prev = &self.blocks[i - 1];
                (
                    prev.nominal_length,
                    prev.entry_speed,
                    prev.acceleration,
                    prev.distance,
                )
            };
            if !prev_nominal_length && prev_entry < self.blocks[i].entry_speed {
                let reachable = max_allowable_speed(-prev_acceleration, prev_entry, prev_distance);
                let block = &mut self.blocks[i];
                block.entry_speed = block.entry_speed.min(reachable);
            }
        }
    }

    fn recalculate_trapezoids(&mut self) {
        for i in 0..self.blocks.len() {
            // The stream ends at rest relative to its own junctions: the
            // last block exits at its entry speed.
            let exit = if i + 1 < self.blocks.len() {
                self.blocks[i + 1].entry_speed
            } else {
                self.blocks[i].entry_speed
            };
            calculate_trapezoid(&mut self.blocks[i], exit);
        }
    }

    #[cfg(test)]
    fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

/// Highest speed from which `target_velocity` is reachable over
/// `distance` under (negative) `acceleration`.
fn max_allowable_speed(acceleration: f64, target_velocity: f64, distance: f64) -> f64 {
    (target_velocity * target_velocity - 2.0 * acceleration * distance).sqrt()
}

/// Distance needed to go from `initial` to `target` speed.
fn estimate_acceleration_distance(initial: f64, target: f64, acceleration: f64) -> f64 {
    if acceleration == 0.0 {
        return 0.0;
    }
    (target * target - initial * initial) / (2.0 * acceleration)
}

/// Acceleration distance when accel and decel must exactly span the
/// block and the plateau collapses to zero.
fn intersection_distance(initial: f64, final_rate: f64, acceleration: f64, distance: f64) -> f64 {
    if acceleration == 0.0 {
        return 0.0;
    }
    (2.0 * acceleration * distance - initial * initial + final_rate * final_rate)
        / (4.0 * acceleration)
}

/// Time to cover `distance` starting at `initial` speed under
/// `acceleration`.
fn acceleration_time_from_distance(initial: f64, distance: f64, acceleration: f64) -> f64 {
    if distance <= 0.0 {
        return 0.0;
    }
    if acceleration == 0.0 {
        return distance / initial;
    }
    let discriminant = (initial * initial + 2.0 * acceleration * distance).max(0.0);
    (discriminant.sqrt() - initial) / acceleration
}

fn calculate_trapezoid(block: &mut Block, exit: f64) {
    let mut accelerate_distance =
        estimate_acceleration_distance(block.entry_speed, block.nominal_feedrate, block.acceleration);
    let decelerate_distance =
        estimate_acceleration_distance(block.nominal_feedrate, exit, -block.acceleration);
    let mut plateau = block.distance - accelerate_distance - decelerate_distance;

    // Not enough room to reach nominal speed: accel and decel must span
    // the whole block with zero plateau.
    if plateau < 0.0 {
        accelerate_distance =
            intersection_distance(block.entry_speed, exit, block.acceleration, block.distance)
                .clamp(0.0, block.distance);
        plateau = 0.0;
    }

    block.accelerate_until = accelerate_distance;
    block.decelerate_after = accelerate_distance + plateau;
    block.initial_feedrate = block.entry_speed;
    block.final_feedrate = exit;
}
