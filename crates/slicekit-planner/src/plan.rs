//! The per-layer move queue and state machine.
//!
//! A [`LayerPlan`] collects travel and extrusion segments for one layer,
//! running the retraction policy and travel router as segments are
//! queued. After the layer is complete it is estimated, slowed to the
//! minimum-layer-time floor if needed, given its fan speed, and flushed
//! to a [`GcodeSink`] in queue order.
//!
//! Planning is per-layer and independent; flushing carries the true
//! cross-layer printer state in a [`FlushState`] and must run in layer
//! order.

use std::f64::consts::PI;
use std::mem;
use std::sync::Arc;

use slicekit_core::{scale, unscale, Coord, Point, Polygon, Polygons, SliceSettings};
use tracing::debug;

use crate::comb::CombPlanner;
use crate::export::GcodeSink;
use crate::order::{order_monotonic, PathOrderOptimizer};
use crate::time::{Position, TimeEstimate, TimeEstimateCalculator};

/// How a print feature is extruded. Created once per layer-height tier,
/// shared by reference, and never mutated after a segment references it.
#[derive(Debug, Clone, PartialEq)]
pub struct Style {
    pub label: &'static str,
    /// Nominal feed rate, mm/s.
    pub speed: f64,
    /// Extrusion width in micrometers; zero for travel.
    pub line_width: Coord,
    /// Polygons of this style close back to their start vertex.
    pub closed: bool,
    /// Lift the nozzle on retracted travels.
    pub zhop: bool,
    /// Move acceleration, mm/s².
    pub acceleration: f64,
    /// Trim the closing move to hide the seam.
    pub seam_hiding: bool,
    /// The minimum-layer-time governor never rescales this style.
    pub speed_locked: bool,
    /// Ramp Z linearly across the path instead of stepping per layer.
    pub spiralize: bool,
}

/// The tier-scoped style table.
#[derive(Debug, Clone)]
pub struct StyleSet {
    pub travel: Arc<Style>,
    pub outer_wall: Arc<Style>,
    pub inner_wall: Arc<Style>,
    pub infill: Arc<Style>,
    pub support: Arc<Style>,
    pub bridge: Arc<Style>,
}

impl StyleSet {
    pub fn from_settings(settings: &SliceSettings) -> Self {
        let width = scale(settings.extrusion.line_width);
        let accel = settings.kinematics.acceleration;
        let zhop = settings.extrusion.zhop_height > 0.0;
        let style = |label, speed, line_width, closed, seam_hiding, speed_locked, spiralize| {
            Arc::new(Style {
                label,
                speed,
                line_width,
                closed,
                zhop,
                acceleration: accel,
                seam_hiding,
                speed_locked,
                spiralize,
            })
        };
        Self {
            travel: style("travel", settings.speed.travel, 0, false, false, false, false),
            outer_wall: style(
                "outer-wall",
                settings.speed.outer_wall,
                width,
                true,
                true,
                false,
                settings.extrusion.spiralize,
            ),
            inner_wall: style(
                "inner-wall",
                settings.speed.inner_wall,
                width,
                true,
                false,
                false,
                false,
            ),
            infill: style("infill", settings.speed.infill, width, false, false, false, false),
            support: style(
                "support",
                settings.speed.support,
                width,
                false,
                false,
                false,
                false,
            ),
            bridge: style("bridge", settings.speed.bridge, width, false, false, true, false),
        }
    }
}

/// Retraction demand on a travel. Only ever escalates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Retract {
    #[default]
    None,
    /// Fires when the travel is longer than the minimum-travel threshold.
    Requested,
    /// Fires unconditionally: router failure, island change, explicit
    /// request.
    Forced,
}

impl Retract {
    /// Raise to `level` if it is higher; never lowers.
    pub fn escalate(&mut self, level: Retract) {
        if level > *self {
            *self = level;
        }
    }
}

/// A queued destination with optional per-point overrides
/// (zero = inherit from the segment's style).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathPoint {
    pub pos: Point,
    pub width: Coord,
    pub speed: f64,
}

impl PathPoint {
    pub fn new(pos: Point) -> Self {
        Self {
            pos,
            width: 0,
            speed: 0.0,
        }
    }
}

/// One queued run of moves sharing a style.
#[derive(Debug, Clone)]
struct PathSegment {
    style: Arc<Style>,
    points: Vec<PathPoint>,
    /// Closed to further appends.
    done: bool,
    retract: Retract,
    travel: bool,
    extruder: u8,
}

/// Printer state the flush phase threads across layers.
#[derive(Debug, Clone)]
pub struct FlushState {
    pub position: Point,
    pub extruder: u8,
    pub retracted: bool,
    pub fan: Option<f64>,
}

impl Default for FlushState {
    fn default() -> Self {
        Self {
            position: Point::ZERO,
            extruder: 0,
            retracted: false,
            fan: None,
        }
    }
}

/// The move queue and cursor state for one layer.
pub struct LayerPlan<'a> {
    settings: &'a SliceSettings,
    styles: StyleSet,
    layer_index: u32,
    z: Coord,
    segments: Vec<PathSegment>,
    start_position: Point,
    last_position: Point,
    extruder: u8,
    boundary: Option<&'a Polygons>,
    next_retract: Retract,
    /// Deferred (segment index, percent) fan requests; resolved by
    /// [`LayerPlan::finalize_fan`] once the layer duration is known.
    fan_requests: Vec<(usize, f64)>,
    speed_ratio: f64,
    duration: f64,
}

impl<'a> LayerPlan<'a> {
    pub fn new(
        settings: &'a SliceSettings,
        styles: StyleSet,
        layer_index: u32,
        z: Coord,
        start: Point,
    ) -> Self {
        Self {
            settings,
            styles,
            layer_index,
            z,
            segments: Vec::new(),
            start_position: start,
            last_position: start,
            extruder: 0,
            boundary: None,
            next_retract: Retract::None,
            fan_requests: Vec::new(),
            speed_ratio: 1.0,
            duration: 0.0,
        }
    }

    pub fn layer_index(&self) -> u32 {
        self.layer_index
    }

    pub fn z(&self) -> Coord {
        self.z
    }

    pub fn last_position(&self) -> Point {
        self.last_position
    }

    pub fn speed_ratio(&self) -> f64 {
        self.speed_ratio
    }

    /// Estimated duration, valid after [`LayerPlan::enforce_minimum_time`].
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn styles(&self) -> &StyleSet {
        &self.styles
    }

    /// Switch to a new island's boundary. Travels within the old island
    /// no longer apply, so the next travel is forced to retract.
    pub fn set_island(&mut self, boundary: &'a Polygons) {
        self.boundary = Some(boundary);
        self.next_retract.escalate(Retract::Forced);
    }

    /// Force the next travel to retract.
    pub fn force_retract(&mut self) {
        self.next_retract.escalate(Retract::Forced);
    }

    pub fn set_extruder(&mut self, extruder: u8) {
        if extruder != self.extruder {
            self.extruder = extruder;
            self.next_retract.escalate(Retract::Forced);
        }
    }

    /// Queue a fan change taking effect before the next queued segment.
    /// The percent may still be raised by [`LayerPlan::finalize_fan`].
    pub fn request_fan(&mut self, percent: f64) {
        self.fan_requests.push((self.segments.len(), percent));
    }

    /// Queue a travel to `dest`, consulting the router against the
    /// active island boundary. At most one retraction is attached.
    pub fn travel(&mut self, dest: Point) {
        if dest == self.last_position {
            return;
        }
        let direct = dest - self.last_position;
        let mut retract = mem::take(&mut self.next_retract);
        let mut via: Vec<Point> = Vec::new();

        if retract < Retract::Forced {
            match self.boundary {
                Some(boundary) if !boundary.is_empty() => {
                    let comb = CombPlanner::new(boundary);
                    if comb.calc(self.last_position, dest, &mut via) {
                        let mut detour = 0.0;
                        let mut prev = self.last_position;
                        for &p in via.iter().chain(std::iter::once(&dest)) {
                            detour += prev.distance_to(p);
                            prev = p;
                        }
                        let cap = direct.length() * self.settings.retraction.comb_detour_ratio;
                        if detour > cap {
                            debug!(
                                layer = self.layer_index,
                                detour_um = detour as i64,
                                "detour too long, retracting instead"
                            );
                            via.clear();
                            retract.escalate(Retract::Forced);
                        }
                    } else {
                        via.clear();
                        retract.escalate(Retract::Forced);
                    }
                }
                _ => {
                    if !direct.shorter_than(scale(self.settings.retraction.min_travel)) {
                        retract.escalate(Retract::Requested);
                    }
                }
            }
        }

        if let Some(last) = self.segments.last_mut() {
            last.done = true;
        }
        let mut points: Vec<PathPoint> = via.into_iter().map(PathPoint::new).collect();
        points.push(PathPoint::new(dest));
        self.segments.push(PathSegment {
            style: Arc::clone(&self.styles.travel),
            points,
            done: true,
            retract,
            travel: true,
            extruder: self.extruder,
        });
        self.last_position = dest;
    }

    /// Append one extrusion destination to the open segment of `style`,
    /// starting a new segment if none is open.
    pub fn extrude(&mut self, point: PathPoint, style: &Arc<Style>) {
        let reuse = matches!(
            self.segments.last(),
            Some(seg) if !seg.done
                && !seg.travel
                && Arc::ptr_eq(&seg.style, style)
                && seg.extruder == self.extruder
        );
        if !reuse {
            self.segments.push(PathSegment {
                style: Arc::clone(style),
                points: Vec::new(),
                done: false,
                retract: Retract::None,
                travel: false,
                extruder: self.extruder,
            });
        }
        let idx = self.segments.len() - 1;
        self.segments[idx].points.push(point);
        self.last_position = point.pos;
    }

    /// Queue one polygon starting at `start_index`, travelling to it
    /// first. Emitted in canonical counter-clockwise winding; closed
    /// styles return to the start vertex, trimmed when seam-hiding.
    pub fn extrude_polygon(&mut self, polygon: &Polygon, start_index: usize, style: &Arc<Style>) {
        let len = polygon.len();
        if len < 2 {
            return;
        }
        let mut points: Vec<Point> = polygon.iter().copied().collect();
        let mut start = start_index.min(len - 1);
        if len > 2 && !polygon.is_ccw() {
            points.reverse();
            start = len - 1 - start;
        }

        let seam = points[start];
        self.travel(seam);
        for i in 1..len {
            self.extrude(PathPoint::new(points[(start + i) % len]), style);
        }
        if style.closed && len > 2 {
            let last = points[(start + len - 1) % len];
            if style.seam_hiding {
                let trim = (style.line_width as f64
                    * self.settings.extrusion.seam_overlap_fraction)
                    as Coord;
                let closing = seam - last;
                if closing.shorter_than(trim) {
                    return;
                }
                let dest = seam - closing.normalized_to(trim);
                self.extrude(PathPoint::new(dest), style);
            } else {
                self.extrude(PathPoint::new(seam), style);
            }
        }
    }

    /// Queue a batch of polygons in optimizer order.
    pub fn extrude_polygons_ordered(&mut self, polygons: &[Polygon], style: &Arc<Style>) {
        let optimizer = PathOrderOptimizer::new(&self.settings.seam, self.layer_index)
            .with_anchor(self.last_position);
        let ordered = optimizer.optimize(polygons, self.last_position);
        for &j in &ordered.order {
            self.extrude_polygon(&polygons[j], ordered.start_index[j], style);
        }
    }

    /// Queue parallel raster lines in monotonic order, each traversed
    /// from its nearer to its farther endpoint.
    pub fn extrude_lines(&mut self, lines: &[(Point, Point)], style: &Arc<Style>) {
        for (a, b) in order_monotonic(lines, self.last_position, style.line_width) {
            self.travel(a);
            self.extrude(PathPoint::new(b), style);
        }
    }

    fn effective_speed(&self, seg: &PathSegment) -> f64 {
        if seg.travel || seg.style.speed_locked {
            seg.style.speed
        } else {
            (seg.style.speed * self.speed_ratio).max(self.settings.cooling.min_print_speed)
        }
    }

    /// Simulate the queued moves and return the layer's time estimate,
    /// split into governor-fixed and governor-variable parts.
    pub fn estimate(&self, calc: &mut TimeEstimateCalculator) -> TimeEstimate {
        let layer_height = self.settings.extrusion.layer_height;
        let filament_area =
            PI / 4.0 * self.settings.extrusion.filament_diameter.powi(2);
        let z_mm = unscale(self.z);

        let mut e = 0.0;
        let mut cursor = self.start_position;
        calc.reset(Position::new(
            unscale(cursor.x),
            unscale(cursor.y),
            z_mm,
            0.0,
        ));
        for seg in &self.segments {
            let adjustable = !seg.travel && !seg.style.speed_locked;
            let speed = self.effective_speed(seg);
            for pt in &seg.points {
                let dist_mm = cursor.distance_to(pt.pos) / 1000.0;
                let width = if pt.width != 0 { pt.width } else { seg.style.line_width };
                if !seg.travel && width > 0 {
                    e += dist_mm * unscale(width) * layer_height / filament_area;
                }
                let feedrate = if pt.speed != 0.0 { pt.speed } else { speed };
                calc.plan(
                    Position::new(unscale(pt.pos.x), unscale(pt.pos.y), z_mm, e),
                    feedrate,
                    seg.style.acceleration,
                    adjustable && pt.speed == 0.0,
                );
                cursor = pt.pos;
            }
        }
        calc.calculate()
    }

    /// Slow variable-speed moves toward the minimum-layer-time floor.
    ///
    /// The resulting ratio lies in `[ratio floor, 1]` and differs from
    /// `previous_ratio` by at most 0.1 in either direction. The floor is
    /// soft: when it cannot be met within those bounds the best ratio
    /// found is kept.
    pub fn enforce_minimum_time(
        &mut self,
        calc: &mut TimeEstimateCalculator,
        previous_ratio: f64,
    ) -> f64 {
        let cooling = &self.settings.cooling;
        let max_adjustable = self
            .segments
            .iter()
            .filter(|s| !s.travel && !s.style.speed_locked)
            .map(|s| s.style.speed)
            .fold(0.0f64, f64::max);
        let ratio_floor = if max_adjustable > 0.0 {
            (cooling.min_print_speed / max_adjustable).min(1.0)
        } else {
            1.0
        };
        let low = (previous_ratio - 0.1).max(ratio_floor).min(1.0);

        let mut ratio = (previous_ratio + 0.1).min(1.0);
        self.speed_ratio = ratio;
        let mut estimate = self.estimate(calc);
        for _ in 0..10 {
            if estimate.total >= cooling.min_layer_time || estimate.variable <= 0.0 {
                break;
            }
            let needed = cooling.min_layer_time - estimate.fixed;
            if needed <= 0.0 {
                break;
            }
            let next = (ratio * estimate.variable / needed).clamp(low, 1.0);
            if (next - ratio).abs() < 1e-4 {
                break;
            }
            ratio = next;
            self.speed_ratio = ratio;
            estimate = self.estimate(calc);
        }
        if self.speed_ratio < 1.0 {
            debug!(
                layer = self.layer_index,
                ratio = self.speed_ratio,
                "slowed for minimum layer time"
            );
        }
        self.duration = estimate.total;
        self.speed_ratio
    }

    /// Resolve the layer fan percent from the estimated duration and
    /// raise (never lower) every queued fan request to it. Call after
    /// [`LayerPlan::enforce_minimum_time`].
    pub fn finalize_fan(&mut self) {
        let cooling = &self.settings.cooling;
        let mut percent = if self.duration >= cooling.fan_min_time {
            cooling.fan_speed_min
        } else if self.duration <= cooling.fan_max_time {
            cooling.fan_speed_max
        } else {
            let t = (self.duration - cooling.fan_max_time)
                / (cooling.fan_min_time - cooling.fan_max_time);
            cooling.fan_speed_max + t * (cooling.fan_speed_min - cooling.fan_speed_max)
        };
        if self.layer_index < cooling.first_fan_layer {
            percent = 0.0;
        } else if percent > 0.0 {
            percent = percent.max(cooling.fan_speed_floor);
        }
        for (_, requested) in &mut self.fan_requests {
            if *requested < percent {
                *requested = percent;
            }
        }
        if self.fan_requests.is_empty() {
            self.fan_requests.push((0, percent));
        }
    }

    /// Emit the queue to the sink in order, merging runs of tiny
    /// same-style moves and applying per-point overrides.
    pub fn flush(&self, sink: &mut dyn GcodeSink, state: &mut FlushState) {
        sink.set_z(self.z);
        let zhop = scale(self.settings.extrusion.zhop_height);
        let spiral_index = self
            .segments
            .iter()
            .rposition(|s| !s.travel && s.style.spiralize);

        let mut fan_queue = self.fan_requests.iter().peekable();
        let mut n = 0;
        while n < self.segments.len() {
            while let Some(&&(at, percent)) = fan_queue.peek() {
                if at > n {
                    break;
                }
                fan_queue.next();
                if state.fan != Some(percent) {
                    sink.set_fan(percent);
                    state.fan = Some(percent);
                }
            }

            let seg = &self.segments[n];
            if seg.extruder != state.extruder {
                if !state.retracted {
                    sink.retract();
                    state.retracted = true;
                }
                sink.switch_extruder(seg.extruder);
                state.extruder = seg.extruder;
            }
            let speed = self.effective_speed(seg);

            if seg.travel {
                if seg.retract >= Retract::Requested && !state.retracted {
                    sink.retract();
                    state.retracted = true;
                }
                let lift = state.retracted && seg.style.zhop && zhop > 0;
                if lift {
                    sink.set_z(self.z + zhop);
                }
                for pt in &seg.points {
                    sink.move_to(pt.pos, speed, 0);
                    state.position = pt.pos;
                }
                if lift {
                    sink.set_z(self.z);
                }
                n += 1;
                continue;
            }

            if state.retracted {
                sink.unretract();
                state.retracted = false;
            }

            if let Some(end) = self.merge_run(n, state.position) {
                // Emit pairwise midpoints, extruding straight through the
                // consumed hop travels. Only the originally extruding
                // distance feeds the width compensation, so the deposited
                // volume tracks the unmerged moves.
                let run: Vec<(Point, bool)> = self.segments[n..end]
                    .iter()
                    .map(|s| (s.points[0].pos, !s.travel))
                    .collect();
                let mut virtual_pos = state.position;
                let mut x = 0;
                while x + 1 < run.len() {
                    let (a, a_extrudes) = run[x];
                    let (b, b_extrudes) = run[x + 1];
                    let mut extruded = 0.0;
                    if a_extrudes {
                        extruded += virtual_pos.distance_to(a);
                    }
                    if b_extrudes {
                        extruded += a.distance_to(b);
                    }
                    let mid = Point::new((a.x + b.x) / 2, (a.y + b.y) / 2);
                    let new_len = state.position.distance_to(mid);
                    if new_len > 0.0 {
                        let width =
                            (seg.style.line_width as f64 * extruded / new_len) as Coord;
                        sink.move_to(mid, speed, width);
                        state.position = mid;
                    }
                    virtual_pos = b;
                    x += 2;
                }
                let last = self.segments[end - 1].points[0].pos;
                sink.move_to(last, speed, seg.style.line_width);
                state.position = last;
                n = end;
                continue;
            }

            if spiral_index == Some(n) {
                self.flush_spiral(seg, speed, sink, state);
            } else {
                for pt in &seg.points {
                    let width = if pt.width != 0 { pt.width } else { seg.style.line_width };
                    let pt_speed = if pt.speed != 0.0 { pt.speed } else { speed };
                    sink.move_to(pt.pos, pt_speed, width);
                    state.position = pt.pos;
                }
            }
            n += 1;
        }
        for &(_, percent) in fan_queue {
            if state.fan != Some(percent) {
                sink.set_fan(percent);
                state.fan = Some(percent);
            }
        }
    }

    /// Extent of a mergeable run starting at `n`: single-point extrusion
    /// segments of one style, optionally interleaved with the short
    /// retraction-free hop travels a raster queue puts between them.
    /// `None` when merging does not pay off.
    fn merge_run(&self, n: usize, position: Point) -> Option<usize> {
        let seg = &self.segments[n];
        let near = seg.style.line_width * 2;
        let extrusion = |s: &PathSegment| {
            !s.travel
                && !s.style.spiralize
                && s.points.len() == 1
                && Arc::ptr_eq(&s.style, &seg.style)
                && s.extruder == seg.extruder
                && s.points[0].width == 0
                && s.points[0].speed == 0.0
        };
        let hop = |s: &PathSegment| {
            s.travel
                && s.points.len() == 1
                && s.retract == Retract::None
                && s.extruder == seg.extruder
        };
        if !extrusion(seg) || !(seg.points[0].pos - position).shorter_than(near) {
            return None;
        }
        let mut prev = seg.points[0].pos;
        let mut end = n + 1;
        while end < self.segments.len() {
            let s = &self.segments[end];
            if !(extrusion(s) || hop(s)) || !(s.points[0].pos - prev).shorter_than(near) {
                break;
            }
            prev = s.points[0].pos;
            end += 1;
        }
        // A trailing travel is a real move, not a gap to close over.
        while end > n && self.segments[end - 1].travel {
            end -= 1;
        }
        // Merging one or two extruding moves saves nothing.
        let extrusions = self.segments[n..end].iter().filter(|s| !s.travel).count();
        if extrusions > 2 {
            Some(end)
        } else {
            None
        }
    }

    /// Ramp Z linearly over the path by arc length, ending at layer Z.
    fn flush_spiral(
        &self,
        seg: &PathSegment,
        speed: f64,
        sink: &mut dyn GcodeSink,
        state: &mut FlushState,
    ) {
        let layer_height = scale(self.settings.extrusion.layer_height);
        let mut total = 0.0;
        let mut prev = state.position;
        for pt in &seg.points {
            total += prev.distance_to(pt.pos);
            prev = pt.pos;
        }
        if total <= 0.0 {
            return;
        }
        let z_start = self.z - layer_height;
        let mut walked = 0.0;
        for pt in &seg.points {
            walked += state.position.distance_to(pt.pos);
            let z = z_start + (layer_height as f64 * walked / total) as Coord;
            sink.set_z(z);
            let width = if pt.width != 0 { pt.width } else { seg.style.line_width };
            sink.move_to(pt.pos, speed, width);
            state.position = pt.pos;
        }
        sink.set_z(self.z);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::{RecordingSink, SinkOp};
    use slicekit_core::Polygons;

    fn settings() -> SliceSettings {
        SliceSettings::default()
    }

    fn plan<'a>(settings: &'a SliceSettings, layer: u32) -> LayerPlan<'a> {
        let styles = StyleSet::from_settings(settings);
        LayerPlan::new(settings, styles, layer, 200, Point::ZERO)
    }

    fn flush(plan: &LayerPlan<'_>) -> RecordingSink {
        let mut sink = RecordingSink::new();
        let mut state = FlushState::default();
        plan.flush(&mut sink, &mut state);
        sink
    }

    fn square(size: Coord) -> Polygon {
        Polygon::rectangle(Point::ZERO, Point::new(size, size))
    }

    #[test]
    fn retract_only_escalates() {
        let mut r = Retract::Forced;
        r.escalate(Retract::Requested);
        assert_eq!(r, Retract::Forced);
        r = Retract::None;
        r.escalate(Retract::Requested);
        assert_eq!(r, Retract::Requested);
    }

    #[test]
    fn short_travel_does_not_retract() {
        let settings = settings();
        let mut p = plan(&settings, 0);
        p.travel(Point::new(1000, 0)); // 1 mm < min_travel 1.5 mm
        let sink = flush(&p);
        assert_eq!(sink.count_retracts(), 0);
        assert_eq!(sink.travels().count(), 1);
    }

    #[test]
    fn long_travel_retracts_once_and_unretracts_on_extrusion() {
        let settings = settings();
        let mut p = plan(&settings, 0);
        p.travel(Point::new(20_000, 0));
        let infill = Arc::clone(&p.styles().infill);
        p.extrude(PathPoint::new(Point::new(20_000, 5000)), &infill);
        let sink = flush(&p);
        assert_eq!(sink.count_retracts(), 1);
        let retract_at = sink.ops.iter().position(|op| *op == SinkOp::Retract);
        let unretract_at = sink.ops.iter().position(|op| *op == SinkOp::Unretract);
        let travel_at = sink
            .ops
            .iter()
            .position(|op| matches!(op, SinkOp::Move { line_width: 0, .. }));
        assert!(retract_at < travel_at);
        assert!(travel_at < unretract_at);
    }

    #[test]
    fn island_change_forces_retraction_on_short_travel() {
        let settings = settings();
        let boundary = Polygons::new(vec![square(100_000)]);
        let mut p = plan(&settings, 0);
        p.travel(Point::new(1000, 1000)); // 1.4 mm: below the threshold
        p.set_island(&boundary);
        p.travel(Point::new(1500, 1000)); // 0.5 mm
        let sink = flush(&p);
        assert_eq!(sink.count_retracts(), 1);
    }

    #[test]
    fn absurd_detour_is_replaced_by_retraction() {
        // A deep U: the only safe route between the arms runs ~193 mm
        // around the slot while the direct travel is 18 mm, far past the
        // detour ratio. The travel must go direct with a retraction.
        let settings = settings();
        let u_shape = Polygon::new(vec![
            Point::new(0, 0),
            Point::new(12_000, 0),
            Point::new(12_000, 95_000),
            Point::new(18_000, 95_000),
            Point::new(18_000, 0),
            Point::new(30_000, 0),
            Point::new(30_000, 100_000),
            Point::new(0, 100_000),
        ]);
        let boundary = Polygons::new(vec![u_shape]);
        let styles = StyleSet::from_settings(&settings);
        let mut p = LayerPlan::new(&settings, styles, 0, 200, Point::new(6000, 2000));
        p.boundary = Some(&boundary);
        p.travel(Point::new(24_000, 2000));
        let sink = flush(&p);
        assert_eq!(sink.count_retracts(), 1);
        assert_eq!(sink.travels().count(), 1, "no detour points expected");
    }

    #[test]
    fn clockwise_polygon_is_emitted_counter_clockwise() {
        let settings = settings();
        let mut cw = square(10_000);
        cw.reverse();
        let mut p = plan(&settings, 0);
        let inner = Arc::clone(&p.styles().inner_wall);
        p.extrude_polygon(&cw, 0, &inner);
        let sink = flush(&p);
        let dests: Vec<Point> = sink
            .extrusions()
            .filter_map(|op| match op {
                SinkOp::Move { dest, .. } => Some(*dest),
                _ => None,
            })
            .collect();
        // Three vertices plus the closing move back to the seam.
        assert_eq!(dests.len(), 4);
        let seam = dests[3];
        let loop_points = Polygon::new(vec![seam, dests[0], dests[1], dests[2]]);
        assert!(loop_points.is_ccw());
    }

    #[test]
    fn seam_hiding_trims_the_closing_move() {
        let settings = settings();
        let mut p = plan(&settings, 0);
        let outer = Arc::clone(&p.styles().outer_wall);
        p.extrude_polygon(&square(10_000), 0, &outer);
        let sink = flush(&p);
        let dests: Vec<Point> = sink
            .extrusions()
            .filter_map(|op| match op {
                SinkOp::Move { dest, .. } => Some(*dest),
                _ => None,
            })
            .collect();
        // line_width 400 um * overlap 0.2 = 80 um short of the seam.
        let last = dests[dests.len() - 1];
        let seam = Point::ZERO;
        let gap = (seam - last).length();
        assert!((gap - 80.0).abs() < 2.0, "gap was {gap}");
    }

    #[test]
    fn tiny_moves_are_merged_and_endpoint_preserved() {
        let settings = settings();
        let mut p = plan(&settings, 0);
        let infill = Arc::clone(&p.styles().infill);
        // Eight segments 0.5 mm apart, well under 2 * line width.
        for i in 1..=8 {
            p.extrude(PathPoint::new(Point::new(i * 500, 0)), &infill);
            if let Some(seg) = p.segments.last_mut() {
                seg.done = true;
            }
        }
        assert_eq!(p.segments.len(), 8);
        let sink = flush(&p);
        let moves = sink.extrusions().count();
        assert!(moves < 8, "expected merged moves, got {moves}");
        let last = sink
            .extrusions()
            .filter_map(|op| match op {
                SinkOp::Move { dest, .. } => Some(*dest),
                _ => None,
            })
            .last();
        assert_eq!(last, Some(Point::new(4000, 0)));
    }

    #[test]
    fn raster_queue_merges_across_hop_travels() {
        // Twenty 0.3 mm raster lines 0.3 mm apart: every queued point is
        // within the merge threshold (2 * 0.4 mm line width), so the
        // lines and the hop travels between them collapse into one
        // extruding run.
        let settings = settings();
        let mut p = plan(&settings, 0);
        let infill = Arc::clone(&p.styles().infill);
        let lines: Vec<(Point, Point)> = (0..20i64)
            .map(|i| (Point::new(i * 300, 0), Point::new(i * 300, 300)))
            .collect();
        p.extrude_lines(&lines, &infill);
        let sink = flush(&p);
        assert_eq!(sink.travels().count(), 0, "hop travels must be merged away");
        let moves = sink.extrusions().count();
        assert!(moves < 39, "expected fewer than the 39 queued moves, got {moves}");
        let last = sink
            .extrusions()
            .filter_map(|op| match op {
                SinkOp::Move { dest, .. } => Some(*dest),
                _ => None,
            })
            .last();
        // Serpentine order ends at the far line's near endpoint.
        assert_eq!(last, Some(Point::new(5700, 0)));
    }

    #[test]
    fn fan_requests_are_raised_never_lowered() {
        let settings = settings();
        let mut p = plan(&settings, 5);
        p.request_fan(10.0);
        p.request_fan(90.0);
        p.duration = 2.0; // faster than fan_max_time: full fan
        p.finalize_fan();
        assert_eq!(p.fan_requests[0].1, 100.0);
        assert_eq!(p.fan_requests[1].1, 100.0);
    }

    #[test]
    fn fan_is_zero_below_first_fan_layer() {
        let settings = settings();
        let mut p = plan(&settings, 0);
        p.duration = 1.0;
        p.finalize_fan();
        assert_eq!(p.fan_requests, vec![(0, 0.0)]);
    }

    #[test]
    fn fan_ramp_interpolates_and_clamps_to_floor() {
        let settings = settings();
        let mut p = plan(&settings, 5);
        p.duration = 7.5; // halfway between fan_max_time 5 and fan_min_time 10
        p.finalize_fan();
        let percent = p.fan_requests[0].1;
        assert!((percent - 67.5).abs() < 1e-9, "got {percent}");
        assert!(percent >= settings.cooling.fan_speed_floor);
    }

    #[test]
    fn governor_ratio_moves_at_most_a_tenth_per_layer() {
        let settings = settings();
        let mut calc = TimeEstimateCalculator::new(&settings.kinematics);
        let mut p = plan(&settings, 3);
        let infill = Arc::clone(&p.styles().infill);
        // ~20 mm of extrusion at 80 mm/s: far under the 5 s floor.
        p.extrude(PathPoint::new(Point::new(20_000, 0)), &infill);
        let ratio = p.enforce_minimum_time(&mut calc, 1.0);
        assert!((ratio - 0.9).abs() < 1e-9, "got {ratio}");
        let ratio = p.enforce_minimum_time(&mut calc, ratio);
        assert!((ratio - 0.8).abs() < 1e-9, "got {ratio}");
        assert!(p.duration() > 0.0);
    }

    #[test]
    fn governor_ratio_bottoms_out_at_the_configured_minimum() {
        // A layer far under the time floor, re-planned across many
        // layers: the ratio steps down by at most 0.1 per layer and
        // settles exactly where the slowest adjustable speed reaches
        // min_print_speed, never below.
        let settings = settings();
        let floor = settings.cooling.min_print_speed / settings.speed.infill;
        let mut calc = TimeEstimateCalculator::new(&settings.kinematics);
        let mut ratio = 1.0;
        for layer in 0..20 {
            let mut p = plan(&settings, layer);
            let infill = Arc::clone(&p.styles().infill);
            p.extrude(PathPoint::new(Point::new(20_000, 0)), &infill);
            let next = p.enforce_minimum_time(&mut calc, ratio);
            assert!(next >= floor - 1e-12, "ratio {next} under floor {floor}");
            assert!((next - ratio).abs() <= 0.1 + 1e-12);
            ratio = next;
        }
        assert!((ratio - floor).abs() < 1e-9, "got {ratio}, floor {floor}");
    }

    #[test]
    fn governor_leaves_slow_layers_alone() {
        let settings = settings();
        let mut calc = TimeEstimateCalculator::new(&settings.kinematics);
        let mut p = plan(&settings, 3);
        let infill = Arc::clone(&p.styles().infill);
        // One point-speed-locked crawl: far over the floor already.
        p.extrude(
            PathPoint {
                pos: Point::new(100_000, 0),
                width: 0,
                speed: 5.0,
            },
            &infill,
        );
        let ratio = p.enforce_minimum_time(&mut calc, 1.0);
        assert_eq!(ratio, 1.0);
    }

    #[test]
    fn flush_starts_with_layer_z() {
        let settings = settings();
        let mut p = plan(&settings, 0);
        let infill = Arc::clone(&p.styles().infill);
        p.extrude(PathPoint::new(Point::new(5000, 0)), &infill);
        let sink = flush(&p);
        assert_eq!(sink.ops[0], SinkOp::SetZ(200));
    }

    #[test]
    fn spiralize_ramps_z_across_the_last_spiral_path() {
        let mut settings = settings();
        settings.extrusion.spiralize = true;
        let styles = StyleSet::from_settings(&settings);
        let mut p = LayerPlan::new(&settings, styles, 4, 1000, Point::ZERO);
        let outer = Arc::clone(&p.styles().outer_wall);
        p.extrude_polygon(&square(10_000), 0, &outer);
        let sink = flush(&p);
        let zs: Vec<Coord> = sink
            .ops
            .iter()
            .filter_map(|op| match op {
                SinkOp::SetZ(z) => Some(*z),
                _ => None,
            })
            .collect();
        // Layer Z first, then a strictly rising ramp ending at layer Z.
        assert_eq!(zs[0], 1000);
        let ramp = &zs[1..];
        assert!(ramp.len() > 2);
        assert!(ramp.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*ramp.last().unwrap(), 1000);
        assert!(ramp[0] > 1000 - scale(settings.extrusion.layer_height));
    }

    #[test]
    fn zhop_lifts_around_retracted_travels() {
        let mut settings = settings();
        settings.extrusion.zhop_height = 0.5;
        let styles = StyleSet::from_settings(&settings);
        let mut p = LayerPlan::new(&settings, styles, 0, 1000, Point::ZERO);
        p.travel(Point::new(50_000, 0));
        let sink = flush(&p);
        let zs: Vec<Coord> = sink
            .ops
            .iter()
            .filter_map(|op| match op {
                SinkOp::SetZ(z) => Some(*z),
                _ => None,
            })
            .collect();
        assert_eq!(zs, vec![1000, 1500, 1000]);
    }
}
