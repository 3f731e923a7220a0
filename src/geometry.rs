//! Tolerance-aware geometric primitives in 3D space.
//!
//! Coordinates are never compared exactly.
//! Every predicate takes a tolerance `tol`
//! and treats two features as coincident if they are within `tol` of each other,
//! so the same value must be used consistently throughout a fracture network
//! (see [`FractureNetwork`][crate::FractureNetwork]).
//!
//! Degenerate configurations (parallel planes, very short segments)
//! always produce a definite classification.
//! [`GeometryError`] is only returned for malformed input such as
//! a polygon with fewer than three vertices.

mod polygon;
pub use polygon::{
    clip_by_half_space, convex_polygon_intersection, convex_polygons_overlap_2d, is_convex_2d,
    point_in_polygon_2d, point_on_polygon_boundary_2d, polygon_area_2d, polygon_area_3d,
    polygon_centroid, segment_polygon_intersection, PolygonIntersection,
    SegmentPolygonIntersection,
};

use crate::{Vec2, Vec3};

/// Error in constructing a geometric primitive from malformed input.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum GeometryError {
    /// A polygon needs at least three vertices.
    #[error("polygon has {0} vertices, at least 3 are required")]
    TooFewVertices(usize),
    /// Two consecutive vertices of a polygon are within tolerance of each other.
    #[error("polygon vertices {0} and {1} coincide")]
    DuplicateVertex(usize, usize),
    /// The vertices of a polygon do not span a plane.
    #[error("polygon has zero area")]
    ZeroArea,
    /// A vertex is further than the tolerance from the plane of the polygon.
    #[error("polygon vertex {vertex} is {distance:.3e} away from the polygon plane (tolerance {tol:.3e})")]
    NonCoplanar {
        /// Index of the offending vertex.
        vertex: usize,
        /// Its distance from the best-fit plane.
        distance: f64,
        /// The tolerance it was compared against.
        tol: f64,
    },
    /// The polygon turns the wrong way at the given vertex.
    #[error("polygon is not convex at vertex {0}")]
    NonConvex(usize),
    /// A domain box with an empty extent along some axis.
    #[error("invalid domain: {axis}min = {min} is not below {axis}max = {max}")]
    InvalidDomain {
        /// Name of the axis (`x`, `y` or `z`).
        axis: char,
        /// Lower bound along the axis.
        min: f64,
        /// Upper bound along the axis.
        max: f64,
    },
    /// Ellipse parameters that don't describe a polygon.
    #[error("invalid ellipse: {0}")]
    InvalidEllipse(&'static str),
    /// Tolerances must be finite and non-negative.
    #[error("tolerance must be finite and non-negative, got {0}")]
    InvalidTolerance(f64),
}

/// Check that a tolerance is usable.
pub fn validate_tolerance(tol: f64) -> Result<f64, GeometryError> {
    if tol.is_finite() && tol >= 0. {
        Ok(tol)
    } else {
        Err(GeometryError::InvalidTolerance(tol))
    }
}

/// Check if two points are within `tol` of each other.
#[inline]
pub fn points_coincide(p: &Vec3, q: &Vec3, tol: f64) -> bool {
    (p - q).norm() <= tol
}

/// Distance from a point to the closed segment `a`–`b`.
pub fn distance_point_segment(p: &Vec3, a: &Vec3, b: &Vec3) -> f64 {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq <= f64::MIN_POSITIVE {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len_sq).clamp(0., 1.);
    (p - (a + t * ab)).norm()
}

/// Distance from a point to the closed segment `a`–`b` in the plane.
pub fn distance_point_segment_2d(p: &Vec2, a: &Vec2, b: &Vec2) -> f64 {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq <= f64::MIN_POSITIVE {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len_sq).clamp(0., 1.);
    (p - (a + t * ab)).norm()
}

/// Check if three points lie on a common line.
///
/// The test measures the smallest height of the triangle spanned by the points,
/// which makes it independent of the order the points are given in.
pub fn is_collinear(p: &Vec3, q: &Vec3, r: &Vec3, tol: f64) -> bool {
    let longest = [(q - p).norm(), (r - q).norm(), (p - r).norm()]
        .into_iter()
        .fold(0., f64::max);
    if longest <= tol {
        return true;
    }
    let twice_area = (q - p).cross(&(r - p)).norm();
    twice_area / longest <= tol
}

/// Check if all the given points are within `tol` of a common plane.
///
/// Sets of three or fewer points are always coplanar.
pub fn are_coplanar(points: &[Vec3], tol: f64) -> bool {
    if points.len() <= 3 {
        return true;
    }
    match Plane::from_points(points) {
        Some(plane) => points.iter().all(|p| plane.distance(p) <= tol),
        // all points on a line
        None => true,
    }
}

/// Order two points lexicographically by their coordinates.
///
/// Used to give intersection segments a representation
/// that doesn't depend on the order their parents were processed in.
pub fn canonical_segment(a: Vec3, b: Vec3) -> (Vec3, Vec3) {
    let key = |p: &Vec3| (p.x, p.y, p.z);
    match key(&a).partial_cmp(&key(&b)) {
        Some(std::cmp::Ordering::Greater) => (b, a),
        _ => (a, b),
    }
}

/// A plane `normal · x = offset` with a unit normal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Plane {
    /// Unit normal of the plane.
    pub normal: Vec3,
    /// Signed distance of the plane from the origin along the normal.
    pub offset: f64,
}

impl Plane {
    /// Create a plane through a point with the given normal.
    ///
    /// Returns None if the normal has zero length.
    pub fn new(point: &Vec3, normal: &Vec3) -> Option<Self> {
        let normal = normal.try_normalize(f64::MIN_POSITIVE)?;
        Some(Self {
            offset: normal.dot(point),
            normal,
        })
    }

    /// Fit a plane to the vertices of a polygon using Newell's method.
    ///
    /// The normal follows the right-hand rule with respect to the vertex order,
    /// so a polygon is always counterclockwise when seen from the tip of the normal.
    /// Returns None if the points have no spread in two directions.
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        if points.len() < 3 {
            return None;
        }
        let center = polygon_centroid(points);
        let mut normal = Vec3::zeros();
        for (i, p) in points.iter().enumerate() {
            let q = &points[(i + 1) % points.len()];
            normal += (p - center).cross(&(q - center));
        }
        // scale-aware degeneracy check against the size of the point set
        let extent = points
            .iter()
            .map(|p| (p - center).norm())
            .fold(0., f64::max);
        if normal.norm() <= 1e-14 * extent * extent {
            return None;
        }
        Self::new(&center, &normal)
    }

    /// Signed distance of a point from the plane.
    #[inline]
    pub fn signed_distance(&self, p: &Vec3) -> f64 {
        self.normal.dot(p) - self.offset
    }

    /// Unsigned distance of a point from the plane.
    #[inline]
    pub fn distance(&self, p: &Vec3) -> f64 {
        self.signed_distance(p).abs()
    }

    /// Project a point onto the plane.
    #[inline]
    pub fn project(&self, p: &Vec3) -> Vec3 {
        p - self.signed_distance(p) * self.normal
    }

    /// Check if two planes are parallel,
    /// i.e. the sine of the angle between their normals is negligible.
    #[inline]
    pub fn is_parallel(&self, other: &Plane) -> bool {
        self.normal.cross(&other.normal).norm() <= PARALLEL_EPS
    }

    /// Compute the line of intersection of two non-parallel planes.
    ///
    /// The result is symmetric: swapping the planes
    /// gives the same point and the opposite direction.
    pub fn intersection_line(&self, other: &Plane) -> Option<Line> {
        let direction = self.normal.cross(&other.normal);
        let len_sq = direction.norm_squared();
        if len_sq.sqrt() <= PARALLEL_EPS {
            return None;
        }
        // closed form point on both planes closest to the origin
        let n1n2 = self.normal.dot(&other.normal);
        let c1 = self.offset - other.offset * n1n2;
        let c2 = other.offset - self.offset * n1n2;
        let point = (c1 * self.normal + c2 * other.normal) / len_sq;
        Some(Line {
            point,
            direction: direction / len_sq.sqrt(),
        })
    }
}

/// Below this sine of the angle between two normals, planes are treated as parallel.
pub(crate) const PARALLEL_EPS: f64 = 1e-12;

/// An infinite line `point + t * direction` with a unit direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Line {
    /// A point on the line.
    pub point: Vec3,
    /// Unit direction of the line.
    pub direction: Vec3,
}

impl Line {
    /// Evaluate the line at parameter `t`.
    #[inline]
    pub fn at(&self, t: f64) -> Vec3 {
        self.point + t * self.direction
    }
}

/// An orthonormal 2D coordinate system embedded in a plane.
///
/// Used to run planar algorithms on fractures, which live in 3D.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlaneFrame {
    /// Origin of the 2D coordinates.
    pub origin: Vec3,
    /// First in-plane axis.
    pub u: Vec3,
    /// Second in-plane axis, `normal × u`.
    pub v: Vec3,
    /// Unit normal of the plane.
    pub normal: Vec3,
}

impl PlaneFrame {
    /// Build a frame with the given origin and plane normal.
    ///
    /// The axes are chosen so that counterclockwise orientation in the frame
    /// agrees with the right-hand rule around `normal`.
    pub fn new(origin: Vec3, normal: &Vec3) -> Self {
        let normal = normal.normalize();
        // seed with the coordinate axis least aligned with the normal
        let seed = if normal.x.abs() < 0.9 {
            Vec3::x()
        } else {
            Vec3::y()
        };
        let u = (seed - seed.dot(&normal) * normal).normalize();
        let v = normal.cross(&u);
        Self {
            origin,
            u,
            v,
            normal,
        }
    }

    /// Frame of a plane, with the origin at the plane's closest point to `near`.
    pub fn from_plane(plane: &Plane, near: &Vec3) -> Self {
        Self::new(plane.project(near), &plane.normal)
    }

    /// Express a point in the 2D coordinates of the frame
    /// (dropping its distance from the plane).
    #[inline]
    pub fn project(&self, p: &Vec3) -> Vec2 {
        let rel = p - self.origin;
        Vec2::new(rel.dot(&self.u), rel.dot(&self.v))
    }

    /// Map 2D frame coordinates back into 3D.
    #[inline]
    pub fn lift(&self, q: &Vec2) -> Vec3 {
        self.origin + q.x * self.u + q.y * self.v
    }
}

/// 2D cross product (z component of the 3D cross product).
#[inline]
pub fn cross_2d(a: &Vec2, b: &Vec2) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Classification of the intersection of two segments.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SegmentIntersection<P> {
    /// The segments don't meet (including parallel non-collinear segments).
    Disjoint,
    /// The segments cross at a point interior to both.
    Proper(P),
    /// The segments meet at a point which is an endpoint of at least one of them.
    Touching(P),
    /// The segments are collinear and share a sub-segment longer than the tolerance.
    Overlap(P, P),
}

/// Intersect the 2D segments `a`–`b` and `c`–`d`.
///
/// Symmetric in the two segments up to the orientation of an overlap.
pub fn segment_segment_2d(
    a: &Vec2,
    b: &Vec2,
    c: &Vec2,
    d: &Vec2,
    tol: f64,
) -> SegmentIntersection<Vec2> {
    let d1 = b - a;
    let d2 = d - c;
    let len1 = d1.norm();
    let len2 = d2.norm();

    // point-like segments
    if len1 <= tol || len2 <= tol {
        let (p, s0, s1) = if len1 <= tol { (a, c, d) } else { (c, a, b) };
        if distance_point_segment_2d(p, s0, s1) <= tol {
            return SegmentIntersection::Touching(*p);
        }
        return SegmentIntersection::Disjoint;
    }

    let line_dist = |p: &Vec2, o: &Vec2, dir: &Vec2, len: f64| cross_2d(dir, &(p - o)).abs() / len;
    let collinear = line_dist(c, a, &d1, len1) <= tol
        && line_dist(d, a, &d1, len1) <= tol
        && line_dist(a, c, &d2, len2) <= tol
        && line_dist(b, c, &d2, len2) <= tol;

    if collinear {
        let len_sq = len1 * len1;
        let tc = (c - a).dot(&d1) / len_sq;
        let td = (d - a).dot(&d1) / len_sq;
        let lo = tc.min(td).max(0.);
        let hi = tc.max(td).min(1.);
        let param_tol = tol / len1;
        if hi - lo > param_tol {
            return SegmentIntersection::Overlap(a + lo * d1, a + hi * d1);
        } else if hi - lo >= -param_tol {
            return SegmentIntersection::Touching(a + 0.5 * (lo + hi) * d1);
        }
        return SegmentIntersection::Disjoint;
    }

    let denom = cross_2d(&d1, &d2);
    if denom.abs() <= PARALLEL_EPS * len1 * len2 {
        return SegmentIntersection::Disjoint;
    }
    let t = cross_2d(&(c - a), &d2) / denom;
    let s = cross_2d(&(c - a), &d1) / denom;
    let t_tol = tol / len1;
    let s_tol = tol / len2;
    if t < -t_tol || t > 1. + t_tol || s < -s_tol || s > 1. + s_tol {
        return SegmentIntersection::Disjoint;
    }
    // average of the two evaluations so that swapping the segments
    // gives a bitwise identical point
    let p = 0.5 * ((a + t * d1) + (c + s * d2));
    let at_end = |u: f64, u_tol: f64| u.abs() <= u_tol || (1. - u).abs() <= u_tol;
    if at_end(t, t_tol) || at_end(s, s_tol) {
        SegmentIntersection::Touching(p)
    } else {
        SegmentIntersection::Proper(p)
    }
}

/// Intersect the 3D segments `a`–`b` and `c`–`d`.
///
/// Segments that are not coplanar within `tol` are disjoint;
/// otherwise the problem is solved in their common plane.
pub fn segment_segment_3d(
    a: &Vec3,
    b: &Vec3,
    c: &Vec3,
    d: &Vec3,
    tol: f64,
) -> SegmentIntersection<Vec3> {
    let points = [*a, *b, *c, *d];
    let (ab, cd) = (b - a, d - c);
    if ab.norm() <= tol && cd.norm() <= tol {
        return if points_coincide(a, c, tol) {
            SegmentIntersection::Touching(0.5 * (a + c))
        } else {
            SegmentIntersection::Disjoint
        };
    }
    // a plane containing both segments, or any plane through their common line
    // if they're parallel
    let longer = if ab.norm() >= cd.norm() { ab } else { cd };
    let normal = [ab.cross(&cd), longer.cross(&(c - a)), longer.cross(&(d - a))]
        .into_iter()
        .find(|n| n.norm() > PARALLEL_EPS * longer.norm_squared())
        .unwrap_or_else(|| {
            let seed = if longer.x.abs() < 0.9 * longer.norm() {
                Vec3::x()
            } else {
                Vec3::y()
            };
            longer.cross(&seed)
        });
    let Some(plane) = Plane::new(&(0.25 * points.iter().sum::<Vec3>()), &normal) else {
        return SegmentIntersection::Disjoint;
    };
    if points.iter().any(|p| plane.distance(p) > tol) {
        return SegmentIntersection::Disjoint;
    }
    let frame = PlaneFrame::from_plane(&plane, a);
    let [a2, b2, c2, d2] = points.map(|p| frame.project(&p));
    match segment_segment_2d(&a2, &b2, &c2, &d2, tol) {
        SegmentIntersection::Disjoint => SegmentIntersection::Disjoint,
        SegmentIntersection::Proper(p) => SegmentIntersection::Proper(frame.lift(&p)),
        SegmentIntersection::Touching(p) => SegmentIntersection::Touching(frame.lift(&p)),
        SegmentIntersection::Overlap(p, q) => {
            SegmentIntersection::Overlap(frame.lift(&p), frame.lift(&q))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const TOL: f64 = 1e-8;

    #[test]
    fn coincidence_is_tolerance_based() {
        let p = Vec3::new(1., 2., 3.);
        assert!(points_coincide(&p, &(p + Vec3::new(0., 1e-9, 0.)), TOL));
        assert!(!points_coincide(&p, &(p + Vec3::new(0., 1e-7, 0.)), TOL));
        // reflexive and symmetric
        let q = p + Vec3::new(5e-9, 0., 0.);
        assert!(points_coincide(&p, &p, 0.));
        assert_eq!(points_coincide(&p, &q, TOL), points_coincide(&q, &p, TOL));
    }

    #[test]
    fn collinearity_ignores_point_order() {
        let p = Vec3::new(0., 0., 0.);
        let q = Vec3::new(1., 1., 1.);
        let r = Vec3::new(3., 3., 3. + 1e-9);
        for (a, b, c) in [(p, q, r), (q, r, p), (r, p, q), (q, p, r)] {
            assert!(is_collinear(&a, &b, &c, TOL));
        }
        assert!(!is_collinear(&p, &q, &Vec3::new(3., 3., 3.1), TOL));
    }

    #[test]
    fn coplanarity() {
        let square = [
            Vec3::new(0., 0., 1.),
            Vec3::new(1., 0., 1.),
            Vec3::new(1., 1., 1.),
            Vec3::new(0., 1., 1.),
        ];
        assert!(are_coplanar(&square, TOL));
        let mut bent = square;
        bent[2].z += 1e-3;
        assert!(!are_coplanar(&bent, TOL));
        assert!(are_coplanar(&bent, 1e-2));
    }

    #[test]
    fn plane_intersection_line_is_symmetric() {
        let p1 = Plane::new(&Vec3::new(0.5, 0., 0.), &Vec3::x()).unwrap();
        let p2 = Plane::new(&Vec3::zeros(), &Vec3::new(0., 1., -1.)).unwrap();
        let l12 = p1.intersection_line(&p2).unwrap();
        let l21 = p2.intersection_line(&p1).unwrap();
        assert_eq!(l12.point, l21.point);
        assert_eq!(l12.direction, -l21.direction);
        assert_relative_eq!(p1.signed_distance(&l12.point), 0., epsilon = 1e-14);
        assert_relative_eq!(p2.signed_distance(&l12.at(3.)), 0., epsilon = 1e-14);
        assert!(p1.intersection_line(&p1).is_none());
    }

    #[test]
    fn plane_frame_roundtrip_and_orientation() {
        let normal = Vec3::new(1., 2., -0.5);
        let frame = PlaneFrame::new(Vec3::new(1., 1., 1.), &normal);
        let p = frame.lift(&Vec2::new(0.3, -2.));
        assert_relative_eq!(frame.project(&p), Vec2::new(0.3, -2.), epsilon = 1e-12);
        assert_relative_eq!(frame.u.cross(&frame.v), frame.normal, epsilon = 1e-12);
    }

    #[test]
    fn segment_classification_2d() {
        let o = Vec2::new(0., 0.);
        let a = Vec2::new(2., 0.);
        let b = Vec2::new(1., -1.);
        let c = Vec2::new(1., 1.);

        assert_eq!(
            segment_segment_2d(&o, &a, &b, &c, TOL),
            SegmentIntersection::Proper(Vec2::new(1., 0.))
        );
        // touching at an endpoint
        assert!(matches!(
            segment_segment_2d(&o, &a, &Vec2::new(1., 0.), &c, TOL),
            SegmentIntersection::Touching(_)
        ));
        // collinear overlap
        match segment_segment_2d(&o, &a, &Vec2::new(1., 0.), &Vec2::new(3., 0.), TOL) {
            SegmentIntersection::Overlap(p, q) => {
                assert_relative_eq!(p, Vec2::new(1., 0.));
                assert_relative_eq!(q, Vec2::new(2., 0.));
            }
            other => panic!("expected overlap, got {other:?}"),
        }
        // parallel
        assert_eq!(
            segment_segment_2d(&o, &a, &Vec2::new(0., 1.), &Vec2::new(2., 1.), TOL),
            SegmentIntersection::Disjoint
        );
        // zero-length segment gets a definite answer
        assert!(matches!(
            segment_segment_2d(&o, &a, &Vec2::new(1., 0.), &Vec2::new(1., 0.), TOL),
            SegmentIntersection::Touching(_)
        ));
    }

    #[test]
    fn segment_intersection_is_symmetric() {
        let segs = [
            (Vec2::new(0., 0.), Vec2::new(1., 0.3)),
            (Vec2::new(0.2, -1.), Vec2::new(0.7, 2.)),
            (Vec2::new(1., 0.3), Vec2::new(2., 0.)),
            (Vec2::new(0.5, 0.15), Vec2::new(3., 0.9)),
        ];
        for (a, b) in &segs {
            for (c, d) in &segs {
                let ab = segment_segment_2d(a, b, c, d, TOL);
                let cd = segment_segment_2d(c, d, a, b, TOL);
                match (ab, cd) {
                    (SegmentIntersection::Overlap(p, q), SegmentIntersection::Overlap(r, s)) => {
                        let sorted = |p: Vec2, q: Vec2| {
                            if (p.x, p.y) <= (q.x, q.y) {
                                (p, q)
                            } else {
                                (q, p)
                            }
                        };
                        let (p, q) = sorted(p, q);
                        let (r, s) = sorted(r, s);
                        assert_relative_eq!(p, r, epsilon = 1e-12);
                        assert_relative_eq!(q, s, epsilon = 1e-12);
                    }
                    (SegmentIntersection::Proper(p), SegmentIntersection::Proper(q))
                    | (SegmentIntersection::Touching(p), SegmentIntersection::Touching(q)) => {
                        assert_relative_eq!(p, q, epsilon = 1e-12)
                    }
                    (x, y) => assert_eq!(x, y),
                }
            }
        }
    }

    #[test]
    fn segment_classification_3d() {
        let a = Vec3::new(0., 0., 0.);
        let b = Vec3::new(1., 1., 1.);
        let c = Vec3::new(1., 0., 0.);
        let d = Vec3::new(0., 1., 1.);
        match segment_segment_3d(&a, &b, &c, &d, TOL) {
            SegmentIntersection::Proper(p) => {
                assert_relative_eq!(p, Vec3::new(0.5, 0.5, 0.5), epsilon = 1e-12)
            }
            other => panic!("expected proper intersection, got {other:?}"),
        }
        // skew lines
        let e = Vec3::new(1., 0., 1.);
        let f = Vec3::new(0., 1., 2.);
        assert_eq!(
            segment_segment_3d(&a, &b, &e, &f, TOL),
            SegmentIntersection::Disjoint
        );
    }
}
