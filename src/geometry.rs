//! Planar geometry in frame-pixel coordinates.
//!
//! - `Point`: a 2-D position, serialised as `[x, y]`.
//! - `BoundingBox`: axis-aligned detection box with IoU helpers.
//! - `Polygon`: validated simple polygon with an inclusive containment test.

use serde::{Deserialize, Serialize};

use crate::error::{HazardError, HazardResult};

/// Tolerance for "on the boundary" decisions, in pixels.
const BOUNDARY_EPS: f64 = 1e-9;

/// Minimum absolute area for a committed polygon, in square pixels.
const MIN_AREA: f64 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<[f64; 2]> for Point {
    fn from([x, y]: [f64; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box `(x_min, y_min, x_max, y_max)` in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl BoundingBox {
    pub const fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.x_min.is_finite()
            && self.y_min.is_finite()
            && self.x_max.is_finite()
            && self.y_max.is_finite()
    }

    pub fn is_ordered(&self) -> bool {
        self.x_min <= self.x_max && self.y_min <= self.y_max
    }

    /// Midpoint of the bottom edge: the ground-contact point of an upright object.
    pub fn bottom_center(&self) -> Point {
        Point::new((self.x_min + self.x_max) / 2.0, self.y_max)
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn intersection(&self, other: &BoundingBox) -> f64 {
        let w = self.x_max.min(other.x_max) - self.x_min.max(other.x_min);
        let h = self.y_max.min(other.y_max) - self.y_min.max(other.y_min);
        if w <= 0.0 || h <= 0.0 {
            return 0.0;
        }
        w * h
    }

    /// Intersection over union; zero when both boxes are empty.
    pub fn iou(&self, other: &BoundingBox) -> f64 {
        let inter = self.intersection(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }
}

/// Simple (non-self-intersecting) polygon with at least three vertices.
///
/// Construction is the only validation point: a `Polygon` value is always
/// simple, finite and of non-zero area. The ring is stored open (the first
/// vertex is not repeated at the end).
#[derive(Clone, Debug, PartialEq)]
pub struct Polygon {
    vertices: Vec<Point>,
}

impl Polygon {
    pub fn new(points: Vec<Point>) -> HazardResult<Self> {
        if let Some(bad) = points.iter().find(|p| !p.is_finite()) {
            return Err(HazardError::InvalidZone(format!(
                "vertex ({}, {}) is not finite",
                bad.x, bad.y
            )));
        }

        let mut vertices: Vec<Point> = Vec::with_capacity(points.len());
        for p in points {
            // Double clicks produce repeated vertices; they carry no shape.
            if vertices.last() != Some(&p) {
                vertices.push(p);
            }
        }
        while vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }

        if vertices.len() < 3 {
            return Err(HazardError::InvalidZone(format!(
                "polygon needs at least 3 distinct vertices, got {}",
                vertices.len()
            )));
        }

        let polygon = Self { vertices };
        if let Some((i, j)) = polygon.first_self_intersection() {
            return Err(HazardError::InvalidZone(format!(
                "polygon is self-intersecting (edges {} and {})",
                i, j
            )));
        }
        if polygon.signed_area().abs() < MIN_AREA {
            return Err(HazardError::InvalidZone("polygon has zero area".to_string()));
        }
        Ok(polygon)
    }

    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Iterate edges as `(start, end)` pairs, closing the ring.
    pub fn edges(&self) -> impl Iterator<Item = (Point, Point)> + '_ {
        let n = self.vertices.len();
        (0..n).map(move |i| (self.vertices[i], self.vertices[(i + 1) % n]))
    }

    /// Shoelace area; positive for counter-clockwise rings in a y-up frame.
    pub fn signed_area(&self) -> f64 {
        self.edges()
            .map(|(a, b)| a.x * b.y - b.x * a.y)
            .sum::<f64>()
            / 2.0
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let mut bbox = BoundingBox::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for p in &self.vertices {
            bbox.x_min = bbox.x_min.min(p.x);
            bbox.y_min = bbox.y_min.min(p.y);
            bbox.x_max = bbox.x_max.max(p.x);
            bbox.y_max = bbox.y_max.max(p.y);
        }
        bbox
    }

    /// Inclusive point-in-polygon test.
    ///
    /// Boundary points are inside. Interior points use the crossing number
    /// with a half-open y-range per edge (`y_i <= y < y_j` or the reverse),
    /// so a vertex shared by two edges is counted exactly once.
    pub fn contains(&self, p: Point) -> bool {
        if !p.is_finite() {
            return false;
        }
        if self.edges().any(|(a, b)| on_segment(a, b, p)) {
            return true;
        }

        let mut inside = false;
        for (a, b) in self.edges() {
            if (a.y > p.y) != (b.y > p.y) {
                let x_cross = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
                if p.x < x_cross {
                    inside = !inside;
                }
            }
        }
        inside
    }

    fn first_self_intersection(&self) -> Option<(usize, usize)> {
        let n = self.vertices.len();
        let edges: Vec<(Point, Point)> = self.edges().collect();
        for i in 0..n {
            for j in (i + 1)..n {
                let (a, b) = edges[i];
                let (c, d) = edges[j];
                let adjacent = j == i + 1 || (i == 0 && j == n - 1);
                if adjacent {
                    // Shared vertex is expected; folding back along the
                    // previous edge is not.
                    let (prev, shared, next) = if j == i + 1 { (a, b, d) } else { (c, a, b) };
                    if folds_back(prev, shared, next) {
                        return Some((i, j));
                    }
                } else if segments_intersect(a, b, c, d) {
                    return Some((i, j));
                }
            }
        }
        None
    }
}

fn cross(o: Point, a: Point, b: Point) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    let len = ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt();
    if cross(a, b, p).abs() > BOUNDARY_EPS * len.max(1.0) {
        return false;
    }
    p.x >= a.x.min(b.x) - BOUNDARY_EPS
        && p.x <= a.x.max(b.x) + BOUNDARY_EPS
        && p.y >= a.y.min(b.y) - BOUNDARY_EPS
        && p.y <= a.y.max(b.y) + BOUNDARY_EPS
}

fn folds_back(prev: Point, shared: Point, next: Point) -> bool {
    let collinear = cross(prev, shared, next).abs() <= BOUNDARY_EPS;
    let dot = (shared.x - prev.x) * (next.x - shared.x) + (shared.y - prev.y) * (next.y - shared.y);
    collinear && dot < 0.0
}

fn segments_intersect(a: Point, b: Point, c: Point, d: Point) -> bool {
    let d1 = cross(c, d, a);
    let d2 = cross(c, d, b);
    let d3 = cross(a, b, c);
    let d4 = cross(a, b, d);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    on_segment(c, d, a) || on_segment(c, d, b) || on_segment(a, b, c) || on_segment(a, b, d)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn poly(points: &[(f64, f64)]) -> Polygon {
        Polygon::new(points.iter().map(|&p| Point::from(p)).collect()).expect("valid polygon")
    }

    fn square() -> Polygon {
        poly(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)])
    }

    /// Independent reference: sum of signed angles subtended by each edge.
    fn winding_inside(polygon: &Polygon, p: Point) -> bool {
        let total: f64 = polygon
            .edges()
            .map(|(a, b)| {
                let (ax, ay) = (a.x - p.x, a.y - p.y);
                let (bx, by) = (b.x - p.x, b.y - p.y);
                (ax * by - ay * bx).atan2(ax * bx + ay * by)
            })
            .sum();
        total.abs() > std::f64::consts::PI
    }

    fn distance_to_boundary(polygon: &Polygon, p: Point) -> f64 {
        polygon
            .edges()
            .map(|(a, b)| {
                let (dx, dy) = (b.x - a.x, b.y - a.y);
                let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / (dx * dx + dy * dy)).clamp(0.0, 1.0);
                ((a.x + t * dx - p.x).powi(2) + (a.y + t * dy - p.y).powi(2)).sqrt()
            })
            .fold(f64::MAX, f64::min)
    }

    #[test]
    fn rejects_fewer_than_three_vertices() {
        let err = Polygon::new(vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)]).unwrap_err();
        assert!(matches!(err, HazardError::InvalidZone(_)));
    }

    #[test]
    fn rejects_bowtie() {
        let err = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(10.0, 0.0),
            Point::new(0.0, 10.0),
        ])
        .unwrap_err();
        assert!(matches!(err, HazardError::InvalidZone(msg) if msg.contains("self-intersecting")));
    }

    #[test]
    fn rejects_collinear_and_non_finite() {
        assert!(Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(5.0, 5.0),
            Point::new(10.0, 10.0)
        ])
        .is_err());
        assert!(Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(f64::NAN, 5.0),
            Point::new(10.0, 0.0)
        ])
        .is_err());
    }

    #[test]
    fn rejects_fold_back_along_edge() {
        let err = Polygon::new(vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(5.0, 0.0),
            Point::new(5.0, 10.0),
        ]);
        assert!(err.is_err());
    }

    #[test]
    fn closing_and_repeated_vertices_are_dropped() {
        let p = poly(&[
            (0.0, 0.0),
            (10.0, 0.0),
            (10.0, 0.0),
            (10.0, 10.0),
            (0.0, 10.0),
            (0.0, 0.0),
        ]);
        assert_eq!(p.len(), 4);
        assert_eq!(p.signed_area().abs(), 100.0);
    }

    #[test]
    fn unit_square_interior_and_exterior() {
        let sq = square();
        assert!(sq.contains(Point::new(5.0, 5.0)));
        assert!(!sq.contains(Point::new(15.0, 5.0)));
        assert!(!sq.contains(Point::new(-0.5, 5.0)));
        assert!(!sq.contains(Point::new(f64::NAN, 5.0)));
    }

    #[test]
    fn boundary_points_are_inside_and_deterministic() {
        let sq = square();
        let boundary = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
            Point::new(5.0, 0.0),
            Point::new(10.0, 5.0),
            Point::new(5.0, 10.0),
            Point::new(0.0, 5.0),
        ];
        for p in boundary {
            for _ in 0..3 {
                assert!(sq.contains(p), "boundary point {:?} must be inside", p);
            }
        }
    }

    #[test]
    fn ray_through_vertex_counts_once() {
        // Diamond: the horizontal ray from (0, 0) passes exactly through the
        // right-hand vertex (5, 0).
        let diamond = poly(&[(0.0, -5.0), (5.0, 0.0), (0.0, 5.0), (-5.0, 0.0)]);
        assert!(diamond.contains(Point::new(0.0, 0.0)));
        assert!(!diamond.contains(Point::new(-6.0, 0.0)));
        assert!(!diamond.contains(Point::new(6.0, 0.0)));
    }

    #[test]
    fn agrees_with_winding_reference_on_random_points() {
        let shapes = [
            square(),
            poly(&[(0.0, 0.0), (20.0, 0.0), (20.0, 20.0), (10.0, 5.0), (0.0, 20.0)]),
            poly(&[(100.0, 400.0), (300.0, 380.0), (420.0, 600.0), (90.0, 640.0)]),
            poly(&[
                (0.0, 0.0),
                (30.0, 0.0),
                (30.0, 30.0),
                (20.0, 30.0),
                (20.0, 10.0),
                (10.0, 10.0),
                (10.0, 30.0),
                (0.0, 30.0),
            ]),
        ];
        let mut rng = StdRng::seed_from_u64(7);
        for shape in &shapes {
            let bbox = shape.bounding_box();
            for _ in 0..2_000 {
                let p = Point::new(
                    rng.gen_range(bbox.x_min - 5.0..bbox.x_max + 5.0),
                    rng.gen_range(bbox.y_min - 5.0..bbox.y_max + 5.0),
                );
                if distance_to_boundary(shape, p) < 1e-6 {
                    continue;
                }
                assert_eq!(
                    shape.contains(p),
                    winding_inside(shape, p),
                    "disagreement at {:?}",
                    p
                );
            }
        }
    }

    #[test]
    fn bottom_center_and_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(a.bottom_center(), Point::new(5.0, 10.0));

        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-12);
        assert_eq!(a.iou(&BoundingBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
    }

    #[test]
    fn point_serialises_as_pair() {
        let json = serde_json::to_string(&Point::new(1.5, 2.0)).unwrap();
        assert_eq!(json, "[1.5,2.0]");
        let p: Point = serde_json::from_str("[3, 4]").unwrap();
        assert_eq!(p, Point::new(3.0, 4.0));
    }
}
