//! Path ordering and seam placement.
//!
//! Three deliberately local heuristics live here:
//!
//! - a greedy nearest-unvisited tour over the polygons of one feature,
//! - seam selection for closed perimeters (curvature pools with
//!   layer-index staggering so shallow seams do not stack into a line),
//! - monotonic ordering for parallel raster lines, so no line is ever
//!   crossed before it is printed.
//!
//! None of these aim for the optimal tour; the exact tie-break order is
//! part of the contract because seam and time results depend on it.

use slicekit_core::{scale, Coord, Point, Polygon, SeamMode, SeamSettings};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Arc-length lookahead for the corner angle estimate.
const CORNER_LOOKAHEAD_MM: f64 = 1.0;
/// Turns flatter than this are measurement noise, never seam candidates.
const NOISE_TURN_RAD: f64 = 0.0873; // 5 degrees
/// Turns at least this sharp get a stable seam; flatter winners are
/// staggered across layers.
const BIG_TURN_RAD: f64 = 0.785; // 45 degrees
/// Candidates within this band of the sharpest turn stay in the pool.
const ANGLE_BAND_RAD: f64 = 0.175; // 10 degrees

/// Result of ordering one batch of polygons.
#[derive(Debug, Clone, Default)]
pub struct OrderedPaths {
    /// Visiting sequence as indices into the input slice.
    pub order: Vec<usize>,
    /// Chosen start vertex per input polygon.
    pub start_index: Vec<usize>,
}

/// Orders polygons for minimal travel and picks their seam vertices.
#[derive(Debug, Clone)]
pub struct PathOrderOptimizer {
    seam: SeamSettings,
    layer_index: u32,
    anchor: Option<Point>,
}

impl PathOrderOptimizer {
    pub fn new(seam: &SeamSettings, layer_index: u32) -> Self {
        Self {
            seam: seam.clone(),
            layer_index,
            anchor: None,
        }
    }

    /// Supply the anchor used by [`SeamMode::Nearest`].
    pub fn with_anchor(mut self, anchor: Point) -> Self {
        self.anchor = Some(anchor);
        self
    }

    /// Greedy nearest-unvisited-start tour from `start`.
    ///
    /// Closed polygons start at their seam vertex; 2-point segments may
    /// run either direction, so their nearer endpoint is chosen on the
    /// fly. Degenerate polygons (fewer than 2 points) are skipped.
    pub fn optimize(&self, polygons: &[Polygon], start: Point) -> OrderedPaths {
        let n = polygons.len();
        let mut start_index: Vec<usize> = polygons
            .iter()
            .map(|p| {
                if p.len() > 2 {
                    self.select_seam(p, Some(start))
                } else {
                    0
                }
            })
            .collect();

        let mut picked = vec![false; n];
        let mut order = Vec::with_capacity(n);
        let mut pos = start;
        loop {
            let mut best: Option<(usize, usize)> = None;
            let mut best_dist = i128::MAX;
            for (j, poly) in polygons.iter().enumerate() {
                if picked[j] || poly.len() < 2 {
                    continue;
                }
                if poly.len() == 2 {
                    let d0 = (poly[0] - pos).length2();
                    let d1 = (poly[1] - pos).length2();
                    let (d, s) = if d0 <= d1 { (d0, 0) } else { (d1, 1) };
                    if d < best_dist {
                        best_dist = d;
                        best = Some((j, s));
                    }
                } else {
                    let d = (poly[start_index[j]] - pos).length2();
                    if d < best_dist {
                        best_dist = d;
                        best = Some((j, start_index[j]));
                    }
                }
            }
            let Some((j, s)) = best else { break };
            picked[j] = true;
            start_index[j] = s;
            order.push(j);
            let poly = &polygons[j];
            pos = if poly.len() == 2 {
                poly[1 - s]
            } else {
                poly[s]
            };
        }
        OrderedPaths { order, start_index }
    }

    /// Pick the seam vertex of one closed polygon.
    pub fn select_seam(&self, polygon: &Polygon, near: Option<Point>) -> usize {
        if polygon.len() < 3 {
            return 0;
        }
        match self.seam.mode {
            SeamMode::Random => content_hash_vertex(polygon),
            SeamMode::Rearmost => rearmost_vertex(polygon.points().iter().copied().enumerate()),
            SeamMode::Nearest => match self.anchor.or(near) {
                Some(anchor) => nearest_vertex(polygon, anchor),
                None => rearmost_vertex(polygon.points().iter().copied().enumerate()),
            },
            SeamMode::Sharpest => self.select_sharpest(polygon, near),
        }
    }

    fn select_sharpest(&self, polygon: &Polygon, near: Option<Point>) -> usize {
        let angles = turn_angles(polygon);

        let concave: Vec<(usize, f64)> = angles
            .iter()
            .enumerate()
            .filter(|(_, a)| **a <= -NOISE_TURN_RAD)
            .map(|(i, a)| (i, *a))
            .collect();
        if !concave.is_empty() {
            return self.pick_from_pool(polygon, &concave, self.seam.concave_stagger, near);
        }

        let convex: Vec<(usize, f64)> = angles
            .iter()
            .enumerate()
            .filter(|(_, a)| **a >= NOISE_TURN_RAD)
            .map(|(i, a)| (i, *a))
            .collect();
        if !convex.is_empty() {
            return self.pick_from_pool(polygon, &convex, self.seam.convex_stagger, near);
        }

        rearmost_vertex(polygon.points().iter().copied().enumerate())
    }

    /// Keep candidates within the angular band of the sharpest turn,
    /// then either settle on a stable corner (big turns) or rotate the
    /// choice with the layer index (shallow turns).
    fn pick_from_pool(
        &self,
        polygon: &Polygon,
        pool: &[(usize, f64)],
        stagger: u32,
        near: Option<Point>,
    ) -> usize {
        let sharpest = pool.iter().map(|(_, a)| a.abs()).fold(0.0, f64::max);
        let banded: Vec<usize> = pool
            .iter()
            .filter(|(_, a)| a.abs() >= sharpest - ANGLE_BAND_RAD)
            .map(|(i, _)| *i)
            .collect();

        if sharpest >= BIG_TURN_RAD {
            if let Some(p) = near {
                return banded
                    .iter()
                    .copied()
                    .min_by_key(|&i| (polygon[i] - p).length2())
                    .unwrap_or(0);
            }
            return rearmost_vertex(banded.iter().map(|&i| (i, polygon[i])));
        }

        let period = stagger.max(1) as usize;
        let k = banded.len();
        let offset = (self.layer_index as usize % period) * k / period;
        banded[offset % k]
    }
}

/// Signed turn angle per vertex at a fixed arc-length lookahead.
/// Positive is convex (turning with the interior winding).
fn turn_angles(polygon: &Polygon) -> Vec<f64> {
    let lookahead = scale(CORNER_LOOKAHEAD_MM);
    let sign = if polygon.is_ccw() { 1.0 } else { -1.0 };
    (0..polygon.len())
        .map(|i| {
            let v = polygon[i];
            let back = point_at_arc(polygon, i, lookahead, false);
            let ahead = point_at_arc(polygon, i, lookahead, true);
            let a = v - back;
            let b = ahead - v;
            sign * (a.cross(b) as f64).atan2(a.dot(b) as f64)
        })
        .collect()
}

/// Vertex roughly `lookahead` of arc length away from vertex `i`.
fn point_at_arc(polygon: &Polygon, i: usize, lookahead: Coord, forward: bool) -> Point {
    let len = polygon.len();
    let mut remaining = lookahead as f64;
    let mut cur = i;
    loop {
        let next = if forward {
            (cur + 1) % len
        } else {
            (cur + len - 1) % len
        };
        remaining -= polygon[cur].distance_to(polygon[next]);
        cur = next;
        if remaining <= 0.0 || cur == i {
            return polygon[cur];
        }
    }
}

fn rearmost_vertex(points: impl Iterator<Item = (usize, Point)>) -> usize {
    points
        .max_by_key(|(_, p)| (p.y, p.x))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn nearest_vertex(polygon: &Polygon, to: Point) -> usize {
    (0..polygon.len())
        .min_by_key(|&i| (polygon[i] - to).length2())
        .unwrap_or(0)
}

/// Stable pseudo-random vertex from the polygon's own content.
fn content_hash_vertex(polygon: &Polygon) -> usize {
    let mut hasher = DefaultHasher::new();
    for p in polygon.iter() {
        p.hash(&mut hasher);
    }
    (hasher.finish() % polygon.len() as u64) as usize
}

/// Order parallel 2-point raster segments monotonically.
///
/// Segments are ranked by their projection on the raster-perpendicular
/// axis, oriented so `last` sits on the low side. A segment may only be
/// emitted once no unprinted segment touches it from the already-printed
/// side; within the eligible set the one nearest the current position
/// wins, re-oriented to run from its nearer to its farther endpoint.
/// When a chain runs out the scan restarts, which is what makes concave
/// regions work.
pub fn order_monotonic(
    segments: &[(Point, Point)],
    last: Point,
    line_width: Coord,
) -> Vec<(Point, Point)> {
    if segments.is_empty() {
        return Vec::new();
    }

    let dir = segments[0].1 - segments[0].0;
    let mut perp = dir.turn90_ccw();
    if perp == Point::ZERO {
        return segments.to_vec();
    }
    let perp_len = perp.length();

    // Orient the axis so printing moves away from the start position.
    {
        let mut pmin = i128::MAX;
        let mut pmax = i128::MIN;
        for s in segments {
            let p = s.0.dot(perp);
            pmin = pmin.min(p);
            pmax = pmax.max(p);
        }
        let at_last = last.dot(perp);
        if (at_last - pmax).abs() < (at_last - pmin).abs() {
            perp = -perp;
        }
    }
    let proj = |p: Point| p.dot(perp);
    let along = |p: Point| p.dot(dir);

    // Adjacent lines touch when their spacing is under twice the width.
    let touch_distance = 2.0 * line_width as f64 * perp_len;

    let touching = |a: &(Point, Point), b: &(Point, Point)| -> bool {
        let d = (proj(a.0) - proj(b.0)).abs() as f64;
        if d > touch_distance {
            return false;
        }
        let (a_lo, a_hi) = minmax(along(a.0), along(a.1));
        let (b_lo, b_hi) = minmax(along(b.0), along(b.1));
        a_lo.max(b_lo) <= a_hi.min(b_hi)
    };

    let n = segments.len();
    let mut printed = vec![false; n];
    let mut result = Vec::with_capacity(n);
    let mut pos = last;

    for _ in 0..n {
        let mut best: Option<usize> = None;
        let mut best_dist = i128::MAX;
        'scan: for i in 0..n {
            if printed[i] {
                continue;
            }
            for j in 0..n {
                if j == i || printed[j] {
                    continue;
                }
                if proj(segments[j].0) < proj(segments[i].0) && touching(&segments[i], &segments[j])
                {
                    // Something unprinted still touches from the printed side.
                    continue 'scan;
                }
            }
            let d = (segments[i].0 - pos)
                .length2()
                .min((segments[i].1 - pos).length2());
            if d < best_dist {
                best_dist = d;
                best = Some(i);
            }
        }
        let Some(i) = best else { break };
        printed[i] = true;
        let (a, b) = segments[i];
        let (near, far) = if (a - pos).length2() <= (b - pos).length2() {
            (a, b)
        } else {
            (b, a)
        };
        result.push((near, far));
        pos = far;
    }
    result
}

fn minmax(a: i128, b: i128) -> (i128, i128) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slicekit_core::SeamSettings;

    fn optimizer(layer: u32) -> PathOrderOptimizer {
        PathOrderOptimizer::new(&SeamSettings::default(), layer)
    }

    fn square_at(x: Coord, y: Coord, size: Coord) -> Polygon {
        Polygon::rectangle(Point::new(x, y), Point::new(x + size, y + size))
    }

    fn regular_polygon(sides: usize, radius_mm: f64) -> Polygon {
        let r = scale(radius_mm) as f64;
        Polygon::new(
            (0..sides)
                .map(|i| {
                    let theta = i as f64 / sides as f64 * std::f64::consts::TAU;
                    Point::new(
                        (r * theta.cos()).round() as Coord,
                        (r * theta.sin()).round() as Coord,
                    )
                })
                .collect(),
        )
    }

    /// Ring with alternating radii: shallow concave turns at the inner
    /// vertices, all of equal magnitude.
    fn notched_ring(vertices: usize, outer_mm: f64, inner_mm: f64) -> Polygon {
        Polygon::new(
            (0..vertices)
                .map(|i| {
                    let r = scale(if i % 2 == 0 { outer_mm } else { inner_mm }) as f64;
                    let theta = i as f64 / vertices as f64 * std::f64::consts::TAU;
                    Point::new(
                        (r * theta.cos()).round() as Coord,
                        (r * theta.sin()).round() as Coord,
                    )
                })
                .collect(),
        )
    }

    #[test]
    fn greedy_tour_visits_nearest_first() {
        let polys = vec![
            square_at(scale(50.0), 0, scale(5.0)),
            square_at(0, 0, scale(5.0)),
            square_at(scale(20.0), 0, scale(5.0)),
        ];
        let ordered = optimizer(0).optimize(&polys, Point::ZERO);
        assert_eq!(ordered.order, vec![1, 2, 0]);
    }

    #[test]
    fn two_point_segment_picks_nearer_endpoint() {
        let polys = vec![Polygon::new(vec![
            Point::new(scale(10.0), 0),
            Point::new(scale(1.0), 0),
        ])];
        let ordered = optimizer(0).optimize(&polys, Point::ZERO);
        assert_eq!(ordered.order, vec![0]);
        assert_eq!(ordered.start_index[0], 1);
    }

    #[test]
    fn degenerate_polygons_are_skipped() {
        let polys = vec![
            Polygon::new(vec![]),
            Polygon::new(vec![Point::ZERO]),
            square_at(0, 0, scale(5.0)),
        ];
        let ordered = optimizer(0).optimize(&polys, Point::ZERO);
        assert_eq!(ordered.order, vec![2]);
    }

    #[test]
    fn sharp_corner_seam_is_stable_across_layers() {
        // A square's 90 degree corners are all "big" turns; the seam must
        // not wander as layers advance.
        let poly = square_at(0, 0, scale(10.0));
        let near = Point::new(scale(-5.0), scale(-5.0));
        let first = optimizer(0).select_seam(&poly, Some(near));
        for layer in 1..20 {
            assert_eq!(optimizer(layer).select_seam(&poly, Some(near)), first);
        }
        // Proximity tie-break: the corner nearest the start position.
        assert_eq!(first, 0);
    }

    #[test]
    fn shallow_convex_seam_staggers_with_period_3() {
        // 30 degree turns everywhere: above noise, below the big-turn
        // threshold, so the convex stagger applies.
        let poly = regular_polygon(12, 10.0);
        let seams: Vec<usize> = (0..100)
            .map(|layer| optimizer(layer).select_seam(&poly, None))
            .collect();
        for layer in 0..97 {
            assert_eq!(seams[layer], seams[layer + 3], "layer {layer}");
        }
        let distinct: std::collections::BTreeSet<_> = seams.iter().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn shallow_concave_seam_staggers_with_period_5() {
        let poly = notched_ring(36, 10.0, 9.3);
        let seams: Vec<usize> = (0..100)
            .map(|layer| optimizer(layer).select_seam(&poly, None))
            .collect();
        for layer in 0..95 {
            assert_eq!(seams[layer], seams[layer + 5], "layer {layer}");
        }
        let distinct: std::collections::BTreeSet<_> = seams.iter().collect();
        assert_eq!(distinct.len(), 5);
        // Concave pool only: every chosen vertex is an inner one.
        for s in distinct {
            assert_eq!(s % 2, 1, "seam {s} is not a concave vertex");
        }
    }

    #[test]
    fn random_seam_is_content_stable() {
        let poly = regular_polygon(16, 8.0);
        let settings = SeamSettings {
            mode: SeamMode::Random,
            ..SeamSettings::default()
        };
        let a = PathOrderOptimizer::new(&settings, 0).select_seam(&poly, None);
        let b = PathOrderOptimizer::new(&settings, 57).select_seam(&poly, None);
        assert_eq!(a, b);
        assert!(a < poly.len());
    }

    #[test]
    fn nearest_seam_uses_anchor() {
        let poly = square_at(0, 0, scale(10.0));
        let settings = SeamSettings {
            mode: SeamMode::Nearest,
            ..SeamSettings::default()
        };
        let opt = PathOrderOptimizer::new(&settings, 0).with_anchor(Point::new(scale(11.0), 0));
        assert_eq!(opt.select_seam(&poly, None), 1);
    }

    #[test]
    fn monotonic_emits_left_to_right_near_to_far() {
        // Four parallel lines at x = 0, 10, 20, 30 over y in [0, 1000],
        // line width 5: each touches its neighbour, so ordering must be
        // strictly increasing in x.
        let segments: Vec<(Point, Point)> = [0, 10, 20, 30]
            .iter()
            .map(|&x| (Point::new(x, 0), Point::new(x, 1000)))
            .collect();
        let ordered = order_monotonic(&segments, Point::ZERO, 5);
        assert_eq!(ordered.len(), 4);
        let xs: Vec<Coord> = ordered.iter().map(|s| s.0.x).collect();
        assert_eq!(xs, vec![0, 10, 20, 30]);
        // Serpentine near-to-far orientation.
        assert_eq!(ordered[0], (Point::new(0, 0), Point::new(0, 1000)));
        assert_eq!(ordered[1], (Point::new(10, 1000), Point::new(10, 0)));
        assert_eq!(ordered[2], (Point::new(20, 0), Point::new(20, 1000)));
        assert_eq!(ordered[3], (Point::new(30, 1000), Point::new(30, 0)));
    }

    #[test]
    fn monotonic_restarts_across_disjoint_groups() {
        let segments: Vec<(Point, Point)> = [0, 10, 1000, 1010]
            .iter()
            .map(|&x| (Point::new(x, 0), Point::new(x, 1000)))
            .collect();
        let ordered = order_monotonic(&segments, Point::new(1020, 0), 5);
        let xs: Vec<Coord> = ordered.iter().map(|s| s.0.x).collect();
        // The right group is nearer, but each group is still printed
        // low-to-high on the monotonic axis.
        assert_eq!(xs, vec![1010, 1000, 10, 0]);
    }

    #[test]
    fn monotonic_of_empty_input_is_empty() {
        assert!(order_monotonic(&[], Point::ZERO, 5).is_empty());
    }
}
