//! Boundary-aware travel routing ("combing").
//!
//! Routes a travel move so it stays inside an island's boundary instead
//! of crossing walls. The travel line is rotated into a local sweep
//! frame; every boundary polygon the line pierces contributes a detour
//! that walks the shorter way around the polygon's vertices, offset
//! slightly into the printable area. A visibility pass then drops every
//! detour point the neighbouring kept points can already see past.
//!
//! `calc` returning `false` means no safe detour exists; the caller
//! falls back to a forced retraction with a direct travel.
//!
//! The planner holds only a shared reference to the boundary set and
//! keeps all scratch state on the stack, so one instance can serve many
//! queries and be shared across threads.

use slicekit_core::{scale, Coord, Point, PointMatrix, Polygons};
use tracing::debug;

/// Travels shorter than this are never worth combing.
const MIN_COMB_DISTANCE_MM: f64 = 1.5;
/// Detour points are pushed this far into the printable area.
const BOUNDARY_OFFSET_MM: f64 = 0.2;
/// An endpoint outside the boundary is only nudged inside if the
/// boundary is within this distance.
const MOVE_INSIDE_RANGE_MM: f64 = 2.0;
/// How far inside the boundary a nudged endpoint lands.
const MOVE_INSIDE_DEPTH_MM: f64 = 0.1;

/// Sweep frame for one travel line: rotated so the line runs along +X.
struct SweepFrame {
    matrix: PointMatrix,
    start: Point,
    end: Point,
}

impl SweepFrame {
    fn new(start: Point, end: Point) -> Self {
        let matrix = PointMatrix::from_direction(end - start);
        Self {
            matrix,
            start: matrix.apply(start),
            end: matrix.apply(end),
        }
    }
}

/// Where the sweep line enters and leaves one boundary polygon.
#[derive(Debug, Clone, Copy)]
struct Crossing {
    min_x: Coord,
    max_x: Coord,
    min_idx: usize,
    max_idx: usize,
}

/// Routes travel moves around the boundary polygons of one island.
pub struct CombPlanner<'a> {
    boundary: &'a Polygons,
}

impl<'a> CombPlanner<'a> {
    pub fn new(boundary: &'a Polygons) -> Self {
        Self { boundary }
    }

    /// Compute a boundary-safe detour from `start` to `end`.
    ///
    /// On success the points to visit between the two (possibly empty)
    /// are left in `comb_points` and `true` is returned. `false` means
    /// the caller must retract and travel directly.
    pub fn calc(&self, mut start: Point, mut end: Point, comb_points: &mut Vec<Point>) -> bool {
        comb_points.clear();
        if (end - start).shorter_than(scale(MIN_COMB_DISTANCE_MM)) {
            return true;
        }

        let mut end_moved = false;
        if !self.boundary.inside(start) {
            match self.move_inside(start) {
                Some(p) => {
                    start = p;
                    comb_points.push(start);
                }
                None => return false,
            }
        }
        if !self.boundary.inside(end) {
            match self.move_inside(end) {
                Some(p) => {
                    end = p;
                    end_moved = true;
                }
                None => return false,
            }
        }

        let frame = SweepFrame::new(start, end);
        if !self.collides(&frame) && !end_moved && comb_points.is_empty() {
            return true;
        }

        let crossings = self.calc_crossings(&frame);
        let raw = self.collect_detour(&frame, &crossings);

        // Visibility pruning: keep a raw point only when the segment from
        // the last kept point to the raw point's successor still crosses
        // the boundary. `end` acts as the successor of the final point.
        let mut p0 = start;
        for n in 1..=raw.len() {
            let next = if n == raw.len() { end } else { raw[n] };
            if self.crosses_between(p0, next) {
                if self.crosses_between(p0, raw[n - 1]) {
                    debug!("comb detour could not be reconnected, caller must retract");
                    comb_points.clear();
                    return false;
                }
                p0 = raw[n - 1];
                comb_points.push(p0);
            }
        }
        if end_moved {
            comb_points.push(end);
        }
        true
    }

    /// True when the open segment `a`-`b` pierces any boundary edge.
    fn crosses_between(&self, a: Point, b: Point) -> bool {
        self.collides(&SweepFrame::new(a, b))
    }

    fn collides(&self, frame: &SweepFrame) -> bool {
        let y = frame.start.y;
        for polygon in self.boundary.iter() {
            if polygon.len() < 2 {
                continue;
            }
            let mut p0 = frame.matrix.apply(polygon[polygon.len() - 1]);
            for &point in polygon.iter() {
                let p1 = frame.matrix.apply(point);
                if (p0.y > y) != (p1.y > y) {
                    let x = p0.x as i128
                        + (p1.x - p0.x) as i128 * (y - p0.y) as i128 / (p1.y - p0.y) as i128;
                    if x > frame.start.x as i128 && x < frame.end.x as i128 {
                        return true;
                    }
                }
                p0 = p1;
            }
        }
        false
    }

    /// Min/max sweep-frame crossing per polygon, restricted to the
    /// travel's X interval. Polygons the line never pierces yield `None`.
    fn calc_crossings(&self, frame: &SweepFrame) -> Vec<Option<Crossing>> {
        let y = frame.start.y;
        let mut crossings = Vec::with_capacity(self.boundary.len());
        for polygon in self.boundary.iter() {
            if polygon.len() < 2 {
                crossings.push(None);
                continue;
            }
            let mut entry: Option<Crossing> = None;
            let mut p0 = frame.matrix.apply(polygon[polygon.len() - 1]);
            for (i, &point) in polygon.iter().enumerate() {
                let p1 = frame.matrix.apply(point);
                if (p0.y > y) != (p1.y > y) {
                    let x = (p0.x as i128
                        + (p1.x - p0.x) as i128 * (y - p0.y) as i128 / (p1.y - p0.y) as i128)
                        as Coord;
                    if x >= frame.start.x && x <= frame.end.x {
                        let c = entry.get_or_insert(Crossing {
                            min_x: x,
                            max_x: x,
                            min_idx: i,
                            max_idx: i,
                        });
                        if x < c.min_x {
                            c.min_x = x;
                            c.min_idx = i;
                        }
                        if x > c.max_x {
                            c.max_x = x;
                            c.max_idx = i;
                        }
                    }
                }
                p0 = p1;
            }
            crossings.push(entry);
        }
        crossings
    }

    /// Walk the sweep axis, detouring around every pierced polygon in
    /// turn. Produces the raw (unpruned) detour.
    fn collect_detour(&self, frame: &SweepFrame, crossings: &[Option<Crossing>]) -> Vec<Point> {
        let clearance = scale(BOUNDARY_OFFSET_MM);
        let mut raw = Vec::new();
        let mut x = frame.start.x;
        while let Some((n, c)) = next_polygon_ahead(crossings, x) {
            raw.push(
                frame
                    .matrix
                    .unapply(Point::new(c.min_x - clearance, frame.start.y)),
            );

            let polygon = &self.boundary[n];
            let len = polygon.len();
            let forward = (c.max_idx + len - c.min_idx) % len;
            let backward = (c.min_idx + len - c.max_idx) % len;
            if backward > forward {
                let mut i = c.min_idx;
                while i != c.max_idx {
                    raw.push(self.boundary_point_with_offset(n, i));
                    i = (i + 1) % len;
                }
            } else {
                // Crossing indices name the edge-end vertex; the backward
                // walk passes through the edge-start vertices instead.
                let from = (c.min_idx + len - 1) % len;
                let to = (c.max_idx + len - 1) % len;
                let mut i = from;
                while i != to {
                    raw.push(self.boundary_point_with_offset(n, i));
                    i = (i + len - 1) % len;
                }
            }

            raw.push(
                frame
                    .matrix
                    .unapply(Point::new(c.max_x + clearance, frame.start.y)),
            );
            x = c.max_x;
        }
        raw
    }

    /// Boundary vertex pushed into the printable area along the average
    /// of its two edge normals.
    fn boundary_point_with_offset(&self, polygon_idx: usize, idx: usize) -> Point {
        let polygon = &self.boundary[polygon_idx];
        let len = polygon.len();
        let p0 = polygon[(idx + len - 1) % len];
        let p1 = polygon[idx];
        let p2 = polygon[(idx + 1) % len];

        let off0 = (p1 - p0).normalized_to(scale(1.0)).turn90_ccw();
        let off1 = (p2 - p1).normalized_to(scale(1.0)).turn90_ccw();
        p1 + (off0 + off1).normalized_to(scale(BOUNDARY_OFFSET_MM))
    }

    /// Nudge a point to just inside the nearest boundary edge, if one is
    /// within range.
    fn move_inside(&self, p: Point) -> Option<Point> {
        let range2 = {
            let r = scale(MOVE_INSIDE_RANGE_MM) as i128;
            r * r
        };
        let mut best_dist2 = range2;
        let mut best: Option<Point> = None;

        for polygon in self.boundary.iter() {
            if polygon.is_empty() {
                continue;
            }
            let mut p0 = polygon[polygon.len() - 1];
            for &p1 in polygon.iter() {
                let edge = p1 - p0;
                let edge_len = edge.length() as Coord;
                if edge_len < 1 {
                    p0 = p1;
                    continue;
                }
                // Project onto the edge, staying clear of the endpoints.
                let mut along = (edge.dot(p - p0) / edge_len as i128) as Coord;
                if along < 10 {
                    along = 10;
                }
                if along > edge_len - 10 {
                    along = edge_len - 10;
                }
                let q = p0 + edge.normalized_to(along);
                let dist2 = (q - p).length2();
                if dist2 < best_dist2 {
                    best_dist2 = dist2;
                    best = Some(q + edge.normalized_to(scale(MOVE_INSIDE_DEPTH_MM)).turn90_ccw());
                }
                p0 = p1;
            }
        }
        best
    }
}

/// The crossing interval that begins soonest after `x`, with its
/// polygon index.
fn next_polygon_ahead(crossings: &[Option<Crossing>], x: Coord) -> Option<(usize, Crossing)> {
    let mut best: Option<(usize, Crossing)> = None;
    for (n, crossing) in crossings.iter().enumerate() {
        if let Some(c) = crossing {
            if c.min_x > x && best.map_or(true, |(_, b)| c.min_x < b.min_x) {
                best = Some((n, *c));
            }
        }
    }
    best
}
