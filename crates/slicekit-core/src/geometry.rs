//! Planar geometry primitives.
//!
//! Fixed-point points, a rotation frame for sweep-line work, closed
//! polygons, and the per-island boundary set. Products that would
//! overflow `i64` (dot/cross of micrometer vectors) are computed in
//! `i128`.

use crate::units::Coord;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Index, Mul, Neg, Sub, SubAssign};

/// A 2D point in micrometers. Plain value type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: Coord,
    pub y: Coord,
}

impl Point {
    pub const ZERO: Point = Point { x: 0, y: 0 };

    pub const fn new(x: Coord, y: Coord) -> Self {
        Self { x, y }
    }

    /// Dot product, exact.
    pub fn dot(self, other: Point) -> i128 {
        self.x as i128 * other.x as i128 + self.y as i128 * other.y as i128
    }

    /// Z component of the cross product, exact.
    pub fn cross(self, other: Point) -> i128 {
        self.x as i128 * other.y as i128 - self.y as i128 * other.x as i128
    }

    /// Squared length, exact.
    pub fn length2(self) -> i128 {
        self.dot(self)
    }

    /// Euclidean length.
    pub fn length(self) -> f64 {
        (self.length2() as f64).sqrt()
    }

    pub fn distance_to(self, other: Point) -> f64 {
        (other - self).length()
    }

    /// True when this vector is strictly shorter than `len`.
    /// Cheap component rejection before the exact squared compare.
    pub fn shorter_than(self, len: Coord) -> bool {
        if self.x.abs() > len || self.y.abs() > len {
            return false;
        }
        self.length2() < len as i128 * len as i128
    }

    /// Scale this vector to the given length. Zero vectors stay zero.
    pub fn normalized_to(self, len: Coord) -> Point {
        let length = self.length();
        if length < 1.0 {
            return Point::ZERO;
        }
        let f = len as f64 / length;
        Point::new(
            (self.x as f64 * f).round() as Coord,
            (self.y as f64 * f).round() as Coord,
        )
    }

    /// Rotate 90 degrees counter-clockwise.
    pub fn turn90_ccw(self) -> Point {
        Point::new(-self.y, self.x)
    }
}

impl Add for Point {
    type Output = Point;
    fn add(self, rhs: Point) -> Point {
        Point::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Point {
    fn add_assign(&mut self, rhs: Point) {
        *self = *self + rhs;
    }
}

impl Sub for Point {
    type Output = Point;
    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl SubAssign for Point {
    fn sub_assign(&mut self, rhs: Point) {
        *self = *self - rhs;
    }
}

impl Neg for Point {
    type Output = Point;
    fn neg(self) -> Point {
        Point::new(-self.x, -self.y)
    }
}

impl Mul<Coord> for Point {
    type Output = Point;
    fn mul(self, rhs: Coord) -> Point {
        Point::new(self.x * rhs, self.y * rhs)
    }
}

/// Rotation frame built from a direction vector.
///
/// Maps the direction onto the +X axis; `apply` rotates into the frame,
/// `unapply` rotates back. Used to turn an arbitrary travel line into a
/// local sweep axis.
#[derive(Debug, Clone, Copy)]
pub struct PointMatrix {
    cos: f64,
    sin: f64,
}

impl PointMatrix {
    /// Identity frame.
    pub fn identity() -> Self {
        Self { cos: 1.0, sin: 0.0 }
    }

    /// Frame whose +X axis points along `dir`.
    pub fn from_direction(dir: Point) -> Self {
        let length = dir.length();
        if length < 1.0 {
            return Self::identity();
        }
        Self {
            cos: dir.x as f64 / length,
            sin: dir.y as f64 / length,
        }
    }

    /// Rotate a point into the frame.
    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            (p.x as f64 * self.cos + p.y as f64 * self.sin).round() as Coord,
            (p.x as f64 * -self.sin + p.y as f64 * self.cos).round() as Coord,
        )
    }

    /// Rotate a frame-local point back to world coordinates.
    pub fn unapply(&self, p: Point) -> Point {
        Point::new(
            (p.x as f64 * self.cos - p.y as f64 * self.sin).round() as Coord,
            (p.x as f64 * self.sin + p.y as f64 * self.cos).round() as Coord,
        )
    }
}

/// A closed polygon, stored without a repeated end point.
///
/// Orientation convention throughout the planner: outer contours are
/// counter-clockwise, holes clockwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Polygon {
    points: Vec<Point>,
}

impl Polygon {
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Axis-aligned rectangle from two opposite corners, counter-clockwise.
    pub fn rectangle(min: Point, max: Point) -> Self {
        Self::new(vec![
            min,
            Point::new(max.x, min.y),
            max,
            Point::new(min.x, max.y),
        ])
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn push(&mut self, p: Point) {
        self.points.push(p);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.points.iter()
    }

    /// Twice the signed area. Positive for counter-clockwise winding.
    pub fn signed_area2(&self) -> i128 {
        let mut sum = 0i128;
        let mut p0 = match self.points.last() {
            Some(p) => *p,
            None => return 0,
        };
        for &p1 in &self.points {
            sum += p0.cross(p1);
            p0 = p1;
        }
        sum
    }

    pub fn is_ccw(&self) -> bool {
        self.signed_area2() > 0
    }

    pub fn reverse(&mut self) {
        self.points.reverse();
    }

    /// Even-odd point containment. Points on an edge are unspecified.
    pub fn contains(&self, p: Point) -> bool {
        if self.points.len() < 3 {
            return false;
        }
        let mut inside = false;
        let mut p0 = self.points[self.points.len() - 1];
        for &p1 in &self.points {
            if (p0.y > p.y) != (p1.y > p.y) {
                let x = p0.x as i128
                    + (p1.x - p0.x) as i128 * (p.y - p0.y) as i128 / (p1.y - p0.y) as i128;
                if x > p.x as i128 {
                    inside = !inside;
                }
            }
            p0 = p1;
        }
        inside
    }
}

impl Index<usize> for Polygon {
    type Output = Point;
    fn index(&self, index: usize) -> &Point {
        &self.points[index]
    }
}

/// The boundary set for one island: outer contour plus holes.
///
/// Immutable for the life of any layer plan referencing it, so it can be
/// shared across concurrent layer tasks without locking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Polygons(Vec<Polygon>);

impl Polygons {
    pub fn new(polygons: Vec<Polygon>) -> Self {
        Self(polygons)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, polygon: Polygon) {
        self.0.push(polygon);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Polygon> {
        self.0.iter()
    }

    /// Even-odd containment over the whole set, so holes are handled by
    /// crossing parity without orientation checks.
    pub fn inside(&self, p: Point) -> bool {
        let mut crossings = 0usize;
        for polygon in &self.0 {
            if polygon.len() < 3 {
                continue;
            }
            let mut p0 = polygon[polygon.len() - 1];
            for &p1 in polygon.iter() {
                if (p0.y > p.y) != (p1.y > p.y) {
                    let x = p0.x as i128
                        + (p1.x - p0.x) as i128 * (p.y - p0.y) as i128 / (p1.y - p0.y) as i128;
                    if x > p.x as i128 {
                        crossings += 1;
                    }
                }
                p0 = p1;
            }
        }
        crossings % 2 == 1
    }
}

impl Index<usize> for Polygons {
    type Output = Polygon;
    fn index(&self, index: usize) -> &Polygon {
        &self.0[index]
    }
}

impl FromIterator<Polygon> for Polygons {
    fn from_iter<T: IntoIterator<Item = Polygon>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
