use super::{canonical_segment, cross_2d, distance_point_segment_2d, Line, Plane, PlaneFrame};
use crate::{Vec2, Vec3};

/// Average of the vertices of a polygon.
///
/// For the convex polygons used as fractures this is always an interior point.
pub fn polygon_centroid(points: &[Vec3]) -> Vec3 {
    points.iter().sum::<Vec3>() / points.len().max(1) as f64
}

/// Signed area of a 2D polygon (positive if counterclockwise).
pub fn polygon_area_2d(points: &[Vec2]) -> f64 {
    let n = points.len();
    0.5 * (0..n)
        .map(|i| cross_2d(&points[i], &points[(i + 1) % n]))
        .sum::<f64>()
}

/// Unsigned area of a planar polygon in 3D.
pub fn polygon_area_3d(points: &[Vec3]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.;
    }
    let center = polygon_centroid(points);
    let normal: Vec3 = (0..n)
        .map(|i| (points[i] - center).cross(&(points[(i + 1) % n] - center)))
        .sum();
    0.5 * normal.norm()
}

/// Check if a point lies strictly inside a simple 2D polygon
/// using the even-odd crossing rule.
///
/// Points on the boundary may be classified either way;
/// combine with [`point_on_polygon_boundary_2d`] where it matters.
pub fn point_in_polygon_2d(p: &Vec2, polygon: &[Vec2]) -> bool {
    let n = polygon.len();
    let mut inside = false;
    for i in 0..n {
        let a = &polygon[i];
        let b = &polygon[(i + 1) % n];
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = a.x + (p.y - a.y) / (b.y - a.y) * (b.x - a.x);
            if p.x < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}

/// Check if a point is within `tol` of the boundary of a 2D polygon.
pub fn point_on_polygon_boundary_2d(p: &Vec2, polygon: &[Vec2], tol: f64) -> bool {
    let n = polygon.len();
    (0..n).any(|i| distance_point_segment_2d(p, &polygon[i], &polygon[(i + 1) % n]) <= tol)
}

/// Check that a 2D polygon is convex.
///
/// Vertices that are collinear with their neighbours within `tol` are accepted.
/// Returns the index of the first vertex where the polygon turns the wrong way.
pub fn is_convex_2d(points: &[Vec2], tol: f64) -> Result<(), usize> {
    let n = points.len();
    let orientation = polygon_area_2d(points).signum();
    for i in 0..n {
        let prev = &points[(i + n - 1) % n];
        let curr = &points[i];
        let next = &points[(i + 1) % n];
        let edge = curr - prev;
        let len = edge.norm();
        if len <= tol {
            continue;
        }
        // distance of `next` to the left of the line through the previous edge
        let left = orientation * cross_2d(&edge, &(next - curr)) / len;
        if left < -tol {
            return Err(i);
        }
    }
    Ok(())
}

/// Clip a planar polygon to the half-space `normal · x <= offset`
/// (Sutherland–Hodgman).
///
/// Vertices within `tol` of the bounding plane count as inside,
/// and consecutive vertices closer than `tol` are merged.
/// Clipping a convex polygon gives a convex polygon,
/// possibly with fewer than 3 vertices if little or nothing remains.
pub fn clip_by_half_space(polygon: &[Vec3], normal: &Vec3, offset: f64, tol: f64) -> Vec<Vec3> {
    let n = polygon.len();
    let dist: Vec<f64> = polygon.iter().map(|p| normal.dot(p) - offset).collect();
    let inside = |s: f64| s <= tol;
    let crossing = |i: usize, j: usize| {
        let t = dist[i] / (dist[i] - dist[j]);
        polygon[i] + t * (polygon[j] - polygon[i])
    };

    let mut clipped: Vec<Vec3> = Vec::with_capacity(n + 2);
    for i in 0..n {
        let j = (i + 1) % n;
        match (inside(dist[i]), inside(dist[j])) {
            (true, true) => clipped.push(polygon[j]),
            (false, true) => {
                // if `j` is within the tolerance band it is the crossing point itself
                if dist[j] < -tol {
                    clipped.push(crossing(i, j));
                }
                clipped.push(polygon[j]);
            }
            (true, false) => {
                if dist[i] < -tol {
                    clipped.push(crossing(i, j));
                }
            }
            (false, false) => {}
        }
    }

    dedup_cyclic(&mut clipped, tol);
    clipped
}

/// Remove consecutive (cyclically) duplicate points.
pub(crate) fn dedup_cyclic(points: &mut Vec<Vec3>, tol: f64) {
    points.dedup_by(|a, b| (*a - *b).norm() <= tol);
    while points.len() > 1 && (points[0] - points[points.len() - 1]).norm() <= tol {
        points.pop();
    }
}

/// Parameter intervals of a line inside a convex polygon.
///
/// `exact` is the interval inside the polygon itself,
/// `expanded` the interval inside the polygon grown by the tolerance.
/// Either may be empty (`lo > hi`).
#[derive(Clone, Copy, Debug)]
struct LineClip {
    exact: (f64, f64),
    expanded: (f64, f64),
}

fn clip_line_to_convex(line: &Line, polygon: &[Vec3], normal: &Vec3, tol: f64) -> LineClip {
    let n = polygon.len();
    let center = polygon_centroid(polygon);
    let mut exact = (f64::NEG_INFINITY, f64::INFINITY);
    let mut expanded = exact;

    for i in 0..n {
        let v = &polygon[i];
        let edge = polygon[(i + 1) % n] - v;
        let Some(mut inward) = normal.cross(&edge).try_normalize(f64::MIN_POSITIVE) else {
            continue;
        };
        if inward.dot(&(center - v)) < 0. {
            inward = -inward;
        }
        // constraint: inward · (point + t * direction - v) >= 0 (or >= -tol)
        let rate = inward.dot(&line.direction);
        let base = inward.dot(&(line.point - v));
        if rate.abs() <= 1e-14 {
            // line parallel to the edge: either entirely inside the strip or outside
            if base < -tol {
                exact = (f64::INFINITY, f64::NEG_INFINITY);
                expanded = exact;
                break;
            }
            continue;
        }
        let t_exact = -base / rate;
        let t_expanded = (-tol - base) / rate;
        if rate > 0. {
            exact.0 = exact.0.max(t_exact);
            expanded.0 = expanded.0.max(t_expanded);
        } else {
            exact.1 = exact.1.min(t_exact);
            expanded.1 = expanded.1.min(t_expanded);
        }
    }

    LineClip { exact, expanded }
}

/// Intersection of two convex planar polygons.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PolygonIntersection {
    /// The polygons don't meet (including parallel planes).
    None,
    /// The polygons meet at a single point (within tolerance).
    Point(Vec3),
    /// The polygons share a segment.
    /// The endpoints are in lexicographic order,
    /// so the result doesn't depend on the order of the polygons.
    Segment(Vec3, Vec3),
    /// The polygons lie in a common plane and their interiors overlap.
    Coplanar,
}

/// Intersect two convex planar polygons given with their planes.
///
/// The line of intersection of the two planes is clipped to each polygon
/// and the resulting parameter intervals are overlapped.
/// The computation is exactly symmetric in its arguments.
pub fn convex_polygon_intersection(
    p: &[Vec3],
    p_plane: &Plane,
    q: &[Vec3],
    q_plane: &Plane,
    tol: f64,
) -> PolygonIntersection {
    let Some(line) = p_plane.intersection_line(q_plane) else {
        // parallel planes: only a coplanar overlap is possible
        let coplanar = q.iter().all(|v| p_plane.distance(v) <= tol)
            && p.iter().all(|v| q_plane.distance(v) <= tol);
        if !coplanar {
            return PolygonIntersection::None;
        }
        let frame = PlaneFrame::from_plane(p_plane, &p[0]);
        let p2: Vec<Vec2> = p.iter().map(|v| frame.project(v)).collect();
        let q2: Vec<Vec2> = q.iter().map(|v| frame.project(v)).collect();
        return if convex_polygons_overlap_2d(&p2, &q2, tol) {
            PolygonIntersection::Coplanar
        } else {
            PolygonIntersection::None
        };
    };

    let clip_p = clip_line_to_convex(&line, p, &p_plane.normal, tol);
    let clip_q = clip_line_to_convex(&line, q, &q_plane.normal, tol);
    let lo = clip_p.exact.0.max(clip_q.exact.0);
    let hi = clip_p.exact.1.min(clip_q.exact.1);
    let lo_tol = clip_p.expanded.0.max(clip_q.expanded.0);
    let hi_tol = clip_p.expanded.1.min(clip_q.expanded.1);

    if !(lo_tol <= hi_tol) || !lo_tol.is_finite() || !hi_tol.is_finite() {
        return PolygonIntersection::None;
    }
    if hi - lo > tol {
        let (a, b) = canonical_segment(line.at(lo), line.at(hi));
        return PolygonIntersection::Segment(a, b);
    }
    let t = if hi >= lo {
        0.5 * (lo + hi)
    } else {
        0.5 * (lo_tol + hi_tol)
    };
    PolygonIntersection::Point(line.at(t))
}

/// Check if the interiors of two convex 2D polygons overlap
/// by more than `tol` (separating axis test).
///
/// Polygons that only touch along an edge or at a vertex don't overlap.
pub fn convex_polygons_overlap_2d(p: &[Vec2], q: &[Vec2], tol: f64) -> bool {
    let axes = p
        .iter()
        .zip(p.iter().cycle().skip(1))
        .chain(q.iter().zip(q.iter().cycle().skip(1)))
        .filter_map(|(a, b)| {
            let e = b - a;
            Vec2::new(-e.y, e.x).try_normalize(f64::MIN_POSITIVE)
        });
    let project = |poly: &[Vec2], axis: &Vec2| {
        poly.iter()
            .map(|v| v.dot(axis))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
                (lo.min(x), hi.max(x))
            })
    };
    for axis in axes {
        let (p_lo, p_hi) = project(p, &axis);
        let (q_lo, q_hi) = project(q, &axis);
        if p_hi.min(q_hi) - p_lo.max(q_lo) <= tol {
            return false;
        }
    }
    true
}

/// Intersection of a segment with a convex planar polygon.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SegmentPolygonIntersection {
    /// The segment misses the polygon.
    Disjoint,
    /// The segment pierces or touches the polygon at a single point.
    Point(Vec3),
    /// The segment lies in the plane of the polygon and overlaps it.
    Segment(Vec3, Vec3),
}

/// Intersect the segment `a`–`b` with a convex planar polygon.
pub fn segment_polygon_intersection(
    a: &Vec3,
    b: &Vec3,
    polygon: &[Vec3],
    plane: &Plane,
    tol: f64,
) -> SegmentPolygonIntersection {
    let sa = plane.signed_distance(a);
    let sb = plane.signed_distance(b);

    if sa.abs() <= tol && sb.abs() <= tol {
        // segment in the plane: clip it like a line and restrict to the segment
        let len = (b - a).norm();
        let Some(direction) = (b - a).try_normalize(f64::MIN_POSITIVE) else {
            return point_if_inside(a, polygon, plane, tol);
        };
        let line = Line {
            point: *a,
            direction,
        };
        let clip = clip_line_to_convex(&line, polygon, &plane.normal, tol);
        let lo = clip.exact.0.max(0.);
        let hi = clip.exact.1.min(len);
        let lo_tol = clip.expanded.0.max(-tol);
        let hi_tol = clip.expanded.1.min(len + tol);
        if !(lo_tol <= hi_tol) {
            return SegmentPolygonIntersection::Disjoint;
        }
        if hi - lo > tol {
            return SegmentPolygonIntersection::Segment(line.at(lo), line.at(hi));
        }
        let t = if hi >= lo {
            0.5 * (lo + hi)
        } else {
            0.5 * (lo_tol + hi_tol)
        };
        return SegmentPolygonIntersection::Point(line.at(t.clamp(0., len)));
    }

    if (sa > tol && sb > tol) || (sa < -tol && sb < -tol) {
        return SegmentPolygonIntersection::Disjoint;
    }
    let crossing = if sa.abs() <= tol {
        *a
    } else if sb.abs() <= tol {
        *b
    } else {
        a + sa / (sa - sb) * (b - a)
    };
    point_if_inside(&crossing, polygon, plane, tol)
}

fn point_if_inside(
    p: &Vec3,
    polygon: &[Vec3],
    plane: &Plane,
    tol: f64,
) -> SegmentPolygonIntersection {
    let frame = PlaneFrame::from_plane(plane, &polygon[0]);
    let poly_2d: Vec<Vec2> = polygon.iter().map(|v| frame.project(v)).collect();
    let p_2d = frame.project(p);
    if point_in_polygon_2d(&p_2d, &poly_2d) || point_on_polygon_boundary_2d(&p_2d, &poly_2d, tol)
    {
        SegmentPolygonIntersection::Point(*p)
    } else {
        SegmentPolygonIntersection::Disjoint
    }
}
