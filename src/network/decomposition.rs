//! Splitting polygons into sub-polygons that conform to their intersections.
//!
//! All points of the network go into a single registry
//! which merges points closer than the tolerance,
//! so sub-polygons of different fractures share point indices
//! wherever they meet.
//! Polygon edges and intersection segments are split at every registered
//! point lying on them, and the resulting planar graph of each polygon
//! is broken into faces by walking around its vertices in angular order.

use itertools::Itertools;
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::{Intersection, IntersectionShape, ToleranceConflict};
use crate::{
    fracture::{Domain, Fracture, FractureKind},
    geometry::{
        is_collinear, point_in_polygon_2d, polygon_area_2d, polygon_area_3d,
        segment_segment_2d, PlaneFrame, SegmentIntersection,
    },
    Vec2, Vec3,
};

/// Points further apart than the tolerance but within this multiple of it
/// are reported as near-coincident.
const CONFLICT_FACTOR: f64 = 10.;

/// Polygons of a fracture network split along their intersections.
///
/// Everything is expressed through indices into a common point list,
/// which is what a mesher needs to produce a conforming mesh.
#[derive(Clone, Debug)]
pub struct Decomposition {
    points: Vec<Vec3>,
    edges: Vec<Edge>,
    polygons: Vec<SubPolygon>,
    lines: Vec<IntersectionLine>,
    intersection_points: Vec<usize>,
    domain: Option<Domain>,
    tol: f64,
}

/// A straight edge between two points of a [`Decomposition`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Edge {
    /// Indices of the endpoints, smaller first.
    pub points: [usize; 2],
    /// Indices of the network intersections this edge is a part of.
    pub intersections: Vec<usize>,
    /// Indices of the [`IntersectionLine`]s this edge is a part of.
    pub lines: Vec<usize>,
}

/// A piece of a fracture or domain boundary face
/// bounded by polygon edges and intersection segments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubPolygon {
    /// Id of the fracture this is a part of.
    pub parent: usize,
    /// Kind of the parent.
    pub kind: FractureKind,
    /// Point indices of the outer boundary, counterclockwise around the parent's normal.
    pub outer: Vec<usize>,
    /// Point indices of the boundaries of holes.
    /// Holes appear where an isolated group of intersections forms a closed loop.
    pub holes: Vec<Vec<usize>>,
    /// Edges lying inside the polygon without bounding it,
    /// like an intersection segment ending in the middle of a fracture.
    pub embedded: Vec<usize>,
    /// Points lying inside the polygon without being on any of its edges,
    /// where another fracture touches it with a single point.
    pub embedded_points: Vec<usize>,
}

impl SubPolygon {
    /// Check if this is a piece of the domain boundary.
    #[inline]
    pub fn is_domain_boundary(&self) -> bool {
        self.kind == FractureKind::DomainBoundary
    }
}

/// A segment where two fractures (not domain boundary faces) meet,
/// which becomes a 1D grid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntersectionLine {
    /// Index of the intersection in the network.
    pub intersection: usize,
    /// Ids of the two fractures.
    pub fractures: [usize; 2],
    /// Edges the line was split into.
    pub edges: Vec<usize>,
}

impl Decomposition {
    /// All points of the decomposition.
    #[inline]
    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    /// All edges, each appearing once even if shared by several polygons.
    #[inline]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Sub-polygons of every fracture and domain boundary face,
    /// grouped by parent in order of id.
    #[inline]
    pub fn polygons(&self) -> &[SubPolygon] {
        &self.polygons
    }

    /// Intersection lines between pairs of fractures.
    #[inline]
    pub fn lines(&self) -> &[IntersectionLine] {
        &self.lines
    }

    /// Indices of points where two or more intersection lines meet.
    #[inline]
    pub fn intersection_points(&self) -> &[usize] {
        &self.intersection_points
    }

    /// The domain box, if the network had one.
    #[inline]
    pub fn domain(&self) -> Option<&Domain> {
        self.domain.as_ref()
    }

    /// Geometric tolerance the decomposition was computed with.
    #[inline]
    pub fn tol(&self) -> f64 {
        self.tol
    }

    /// Ids of the fractures (not domain boundary faces) with at least one sub-polygon.
    pub fn fracture_ids(&self) -> Vec<usize> {
        self.polygons
            .iter()
            .filter(|p| !p.is_domain_boundary())
            .map(|p| p.parent)
            .dedup()
            .collect()
    }

    /// Sub-polygons of the fracture with the given id.
    pub fn polygons_of(&self, fracture: usize) -> impl Iterator<Item = &SubPolygon> {
        self.polygons.iter().filter(move |p| p.parent == fracture)
    }

    /// Area of a sub-polygon with its holes removed.
    pub fn polygon_area(&self, polygon: &SubPolygon) -> f64 {
        let area_of = |cycle: &[usize]| {
            let pts: Vec<Vec3> = cycle.iter().map(|&p| self.points[p]).collect();
            polygon_area_3d(&pts)
        };
        area_of(&polygon.outer) - polygon.holes.iter().map(|h| area_of(h)).sum::<f64>()
    }

    /// Length of an edge.
    pub fn edge_length(&self, edge: usize) -> f64 {
        let [a, b] = self.edges[edge].points;
        (self.points[a] - self.points[b]).norm()
    }
}

/// Deduplicating point storage.
struct PointRegistry {
    points: Vec<Vec3>,
    tol: f64,
    conflicts: Vec<ToleranceConflict>,
}

impl PointRegistry {
    fn new(tol: f64) -> Self {
        Self {
            points: Vec::new(),
            tol,
            conflicts: Vec::new(),
        }
    }

    /// Index of the registered point nearest to `p` if it is within tolerance,
    /// otherwise the index of `p` newly added.
    fn insert(&mut self, p: Vec3) -> usize {
        let nearest = self
            .points
            .iter()
            .map(|q| (p - q).norm())
            .enumerate()
            .min_by(|(_, l), (_, r)| l.total_cmp(r));
        if let Some((idx, distance)) = nearest {
            if distance <= self.tol {
                return idx;
            }
            if distance <= CONFLICT_FACTOR * self.tol {
                self.conflicts.push(ToleranceConflict::NearCoincidentPoints {
                    first: self.points[idx],
                    second: p,
                    distance,
                });
            }
        }
        self.points.push(p);
        self.points.len() - 1
    }
}

/// Split every polygon along its intersections.
///
/// Returns the decomposition along with tolerance conflicts encountered.
pub(crate) fn decompose(
    fractures: &[Fracture],
    intersections: &[Intersection],
    domain: Option<Domain>,
    tol: f64,
) -> (Decomposition, Vec<ToleranceConflict>) {
    let mut registry = PointRegistry::new(tol);
    let position: HashMap<usize, usize> = fractures
        .iter()
        .enumerate()
        .map(|(idx, f)| (f.id(), idx))
        .collect();

    let outlines: Vec<Vec<usize>> = fractures
        .iter()
        .map(|f| {
            let mut ids: Vec<usize> = f.vertices().iter().map(|v| registry.insert(*v)).collect();
            ids.dedup();
            while ids.len() > 1 && ids.first() == ids.last() {
                ids.pop();
            }
            ids
        })
        .collect();

    // intersection segments constrain both polygons they belong to,
    // touching points are kept as vertices of both
    let mut segments: Vec<Option<[usize; 2]>> = Vec::with_capacity(intersections.len());
    let mut constraints: Vec<Vec<(usize, [usize; 2])>> = vec![Vec::new(); fractures.len()];
    let mut touches: Vec<Vec<usize>> = vec![Vec::new(); fractures.len()];
    for (k, isect) in intersections.iter().enumerate() {
        let segment = match isect.shape {
            IntersectionShape::Segment(a, b) => {
                let ends = [registry.insert(a), registry.insert(b)];
                if ends[0] == ends[1] {
                    for id in [isect.first, isect.second] {
                        if let Some(&idx) = position.get(&id) {
                            touches[idx].push(ends[0]);
                        }
                    }
                }
                (ends[0] != ends[1]).then_some(ends)
            }
            IntersectionShape::Point(p) => {
                let point = registry.insert(p);
                for id in [isect.first, isect.second] {
                    if let Some(&idx) = position.get(&id) {
                        touches[idx].push(point);
                    }
                }
                None
            }
        };
        if let Some(ends) = segment {
            for id in [isect.first, isect.second] {
                if let Some(&idx) = position.get(&id) {
                    constraints[idx].push((k, ends));
                }
            }
        }
        segments.push(segment);
    }

    let frames: Vec<PlaneFrame> = fractures.iter().map(Fracture::frame).collect();
    for (frame, cons) in frames.iter().zip(&constraints) {
        for ((_, s), (_, t)) in cons.iter().tuple_combinations() {
            if s.iter().any(|p| t.contains(p)) {
                continue;
            }
            let [a, b, c, d] = [s[0], s[1], t[0], t[1]].map(|p| frame.project(&registry.points[p]));
            if let SegmentIntersection::Proper(crossing) = segment_segment_2d(&a, &b, &c, &d, tol) {
                registry.insert(frame.lift(&crossing));
            }
        }
    }

    //
    // split edges at registered points
    //

    let mut edges: Vec<Edge> = Vec::new();
    let mut edge_index: HashMap<[usize; 2], usize> = HashMap::new();
    let mut polygon_edges: Vec<Vec<usize>> = Vec::with_capacity(fractures.len());
    for (idx, fracture) in fractures.iter().enumerate() {
        let outline = &outlines[idx];
        if outline.len() < 3 {
            warn!(
                "fracture {} collapses to {} points within the tolerance, skipping",
                fracture.id(),
                outline.len()
            );
            polygon_edges.push(Vec::new());
            continue;
        }

        let nearby: Vec<usize> = (0..registry.points.len())
            .filter(|&p| fracture.plane().distance(&registry.points[p]) <= tol)
            .collect();
        let boundary = outline
            .iter()
            .circular_tuple_windows()
            .map(|(&a, &b)| (None, [a, b]));
        let interior = constraints[idx].iter().map(|&(k, ends)| (Some(k), ends));

        let mut own: BTreeSet<usize> = BTreeSet::new();
        for (isect, ends) in boundary.chain(interior) {
            for [a, b] in split_segment(&registry.points, ends, &nearby, tol) {
                let key = if a < b { [a, b] } else { [b, a] };
                let e = *edge_index.entry(key).or_insert_with(|| {
                    edges.push(Edge {
                        points: key,
                        intersections: Vec::new(),
                        lines: Vec::new(),
                    });
                    edges.len() - 1
                });
                if let Some(k) = isect {
                    if !edges[e].intersections.contains(&k) {
                        edges[e].intersections.push(k);
                    }
                }
                own.insert(e);
            }
        }
        polygon_edges.push(own.into_iter().collect());
    }

    //
    // faces of each polygon
    //

    let mut conflicts = std::mem::take(&mut registry.conflicts);
    let mut polygons: Vec<SubPolygon> = Vec::new();
    for (idx, fracture) in fractures.iter().enumerate() {
        let own = &polygon_edges[idx];
        if own.is_empty() {
            continue;
        }
        let frame = &frames[idx];
        let global: Vec<usize> = own
            .iter()
            .flat_map(|&e| edges[e].points)
            .sorted_unstable()
            .dedup()
            .collect();
        let local: HashMap<usize, usize> = global.iter().enumerate().map(|(l, &g)| (g, l)).collect();
        let coords: Vec<Vec2> = global
            .iter()
            .map(|&g| frame.project(&registry.points[g]))
            .collect();
        let local_edges: Vec<[usize; 2]> = own
            .iter()
            .map(|&e| edges[e].points.map(|g| local[&g]))
            .collect();

        let faces = planar_faces(&coords, &local_edges, local[&outlines[idx][0]]);
        if !faces.unassigned.is_empty() {
            warn!(
                "{} edges inside fracture {} could not be placed in a sub-polygon",
                faces.unassigned.len(),
                fracture.id()
            );
        }

        // touching points that are already vertices need nothing more
        let mut face_points: Vec<Vec<usize>> = vec![Vec::new(); faces.faces.len()];
        for &p in touches[idx].iter().sorted_unstable().dedup() {
            if local.contains_key(&p) {
                continue;
            }
            let at = frame.project(&registry.points[p]);
            match host_face(&faces.faces, &coords, &at) {
                Some(f) => face_points[f].push(p),
                None => debug!(
                    "point {} touching fracture {} lies outside its sub-polygons",
                    p,
                    fracture.id()
                ),
            }
        }

        let covered: f64 = faces.faces.iter().map(PlanarFace::net_area).sum();
        let missing = fracture.area() - covered;
        let perimeter: f64 = fracture
            .vertices()
            .iter()
            .circular_tuple_windows()
            .map(|(a, b)| (a - b).norm())
            .sum();
        if missing.abs() > tol * perimeter {
            conflicts.push(ToleranceConflict::UncoveredArea {
                fracture: fracture.id(),
                missing,
            });
        }

        let to_global = |cycle: &[usize]| cycle.iter().map(|&l| global[l]).collect::<Vec<_>>();
        polygons.extend(faces.faces.into_iter().zip(face_points).map(|(face, points)| {
            SubPolygon {
                parent: fracture.id(),
                kind: fracture.kind(),
                outer: to_global(&face.outer),
                holes: face.holes.iter().map(|h| to_global(h)).collect(),
                embedded: face.embedded.iter().map(|&e| own[e]).collect(),
                embedded_points: points,
            }
        }));
    }

    //
    // intersection lines and the points where they meet
    //

    let mut lines: Vec<IntersectionLine> = Vec::new();
    let mut line_of: HashMap<usize, usize> = HashMap::new();
    for (k, isect) in intersections.iter().enumerate() {
        if segments[k].is_none() {
            continue;
        }
        let between_fractures = [isect.first, isect.second].iter().all(|id| {
            position
                .get(id)
                .is_some_and(|&idx| fractures[idx].kind() == FractureKind::Fracture)
        });
        if between_fractures {
            line_of.insert(k, lines.len());
            lines.push(IntersectionLine {
                intersection: k,
                fractures: [isect.first, isect.second],
                edges: Vec::new(),
            });
        }
    }
    for (e, edge) in edges.iter_mut().enumerate() {
        for k in &edge.intersections {
            if let Some(&l) = line_of.get(k) {
                edge.lines.push(l);
                lines[l].edges.push(e);
            }
        }
        edge.lines.sort_unstable();
        edge.lines.dedup();
    }

    let mut point_lines: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
    for edge in &edges {
        for &l in &edge.lines {
            for p in edge.points {
                point_lines.entry(p).or_default().insert(l);
            }
        }
    }
    let intersection_points: Vec<usize> = point_lines
        .into_iter()
        .filter(|(_, lines)| lines.len() >= 2)
        .map(|(p, _)| p)
        .collect();
    debug!(
        "{} intersection lines meet at {} points",
        lines.len(),
        intersection_points.len()
    );

    let decomposition = Decomposition {
        points: registry.points,
        edges,
        polygons,
        lines,
        intersection_points,
        domain,
        tol,
    };
    (decomposition, conflicts)
}

/// Split the segment between two registered points at every point of `candidates`
/// lying on it, returning the pieces in order.
fn split_segment(
    points: &[Vec3],
    [a, b]: [usize; 2],
    candidates: &[usize],
    tol: f64,
) -> Vec<[usize; 2]> {
    let (pa, pb) = (points[a], points[b]);
    let dir = pb - pa;
    let len_sq = dir.norm_squared();
    let mut inner: Vec<(f64, usize)> = candidates
        .iter()
        .filter(|&&p| p != a && p != b)
        .filter_map(|&p| {
            let t = (points[p] - pa).dot(&dir) / len_sq;
            (t > 0. && t < 1. && is_collinear(&pa, &points[p], &pb, tol)).then_some((t, p))
        })
        .collect();
    inner.sort_by(|l, r| l.0.total_cmp(&r.0));

    std::iter::once(a)
        .chain(inner.into_iter().map(|(_, p)| p))
        .chain(std::iter::once(b))
        .tuple_windows()
        .filter(|(p, q)| p != q)
        .map(|(p, q)| [p, q])
        .collect()
}

struct PlanarFaces {
    faces: Vec<PlanarFace>,
    /// edges not inside any face
    unassigned: Vec<usize>,
}

struct PlanarFace {
    outer: Vec<usize>,
    holes: Vec<Vec<usize>>,
    embedded: Vec<usize>,
    outer_area: f64,
    hole_area: f64,
}

impl PlanarFace {
    fn net_area(&self) -> f64 {
        self.outer_area - self.hole_area
    }
}

fn in_cycle(coords: &[Vec2], p: &Vec2, cycle: &[usize]) -> bool {
    let pts: Vec<Vec2> = cycle.iter().map(|&v| coords[v]).collect();
    point_in_polygon_2d(p, &pts)
}

/// Index of the smallest face containing `p` outside its holes.
fn host_face(faces: &[PlanarFace], coords: &[Vec2], p: &Vec2) -> Option<usize> {
    smallest(faces.iter().enumerate().filter(|(_, f)| {
        in_cycle(coords, p, &f.outer) && !f.holes.iter().any(|h| in_cycle(coords, p, h))
    }))
}

/// Index of the face with the smallest outer area.
fn smallest<'a>(candidates: impl Iterator<Item = (usize, &'a PlanarFace)>) -> Option<usize> {
    candidates
        .min_by(|(_, l), (_, r)| l.outer_area.total_cmp(&r.outer_area))
        .map(|(i, _)| i)
}

fn find_root(parent: &mut [usize], mut v: usize) -> usize {
    while parent[v] != v {
        parent[v] = parent[parent[v]];
        v = parent[v];
    }
    v
}

/// Faces of a planar straight-line graph
/// whose outer boundary passes through `outline_vertex`.
///
/// Trees hanging off the cycles of the graph don't bound anything,
/// so they are pruned first and returned as edges embedded in the face containing them.
/// Connected components other than the one containing the outline
/// become holes in the smallest face around them.
fn planar_faces(coords: &[Vec2], edges: &[[usize; 2]], outline_vertex: usize) -> PlanarFaces {
    let nv = coords.len();

    let mut incident: Vec<Vec<usize>> = vec![Vec::new(); nv];
    for (e, &[a, b]) in edges.iter().enumerate() {
        incident[a].push(e);
        incident[b].push(e);
    }
    let mut alive = vec![true; edges.len()];
    let mut degree: Vec<usize> = incident.iter().map(Vec::len).collect();
    let mut leaves: Vec<usize> = (0..nv).filter(|&v| degree[v] == 1).collect();
    while let Some(v) = leaves.pop() {
        if degree[v] != 1 {
            continue;
        }
        let Some(&e) = incident[v].iter().find(|&&e| alive[e]) else {
            continue;
        };
        alive[e] = false;
        let [a, b] = edges[e];
        let other = if a == v { b } else { a };
        degree[v] -= 1;
        degree[other] -= 1;
        if degree[other] == 1 {
            leaves.push(other);
        }
    }

    // neighbours of every vertex in counterclockwise order
    let mut parent: Vec<usize> = (0..nv).collect();
    let mut neighbours: Vec<Vec<usize>> = vec![Vec::new(); nv];
    for (&[a, b], _) in edges.iter().zip(&alive).filter(|&(_, &live)| live) {
        neighbours[a].push(b);
        neighbours[b].push(a);
        let (ra, rb) = (find_root(&mut parent, a), find_root(&mut parent, b));
        parent[ra] = rb;
    }
    for (v, around) in neighbours.iter_mut().enumerate() {
        let angle = |w: &usize| {
            let d = coords[*w] - coords[v];
            d.y.atan2(d.x)
        };
        around.sort_by(|p, q| angle(p).total_cmp(&angle(q)));
    }

    // walk every directed edge once, keeping the face on the left
    let mut visited: HashSet<(usize, usize)> = HashSet::new();
    let mut cycles: Vec<Vec<usize>> = Vec::new();
    for u in 0..nv {
        for &v in &neighbours[u] {
            if visited.contains(&(u, v)) {
                continue;
            }
            let mut cycle = Vec::new();
            let (mut a, mut b) = (u, v);
            loop {
                visited.insert((a, b));
                cycle.push(a);
                let around = &neighbours[b];
                let back = around.iter().position(|&w| w == a).unwrap_or(0);
                let next = around[(back + around.len() - 1) % around.len()];
                (a, b) = (b, next);
                if visited.contains(&(a, b)) {
                    break;
                }
            }
            cycles.push(cycle);
        }
    }

    let cycle_area = |cycle: &[usize]| {
        let pts: Vec<Vec2> = cycle.iter().map(|&v| coords[v]).collect();
        polygon_area_2d(&pts)
    };
    let primary = find_root(&mut parent, outline_vertex);
    let mut faces: Vec<PlanarFace> = Vec::new();
    let mut face_components: Vec<usize> = Vec::new();
    let mut component_outlines: Vec<(usize, Vec<usize>)> = Vec::new();
    for cycle in cycles {
        let area = cycle_area(&cycle);
        let component = find_root(&mut parent, cycle[0]);
        if area > 0. {
            face_components.push(component);
            faces.push(PlanarFace {
                outer: cycle,
                holes: Vec::new(),
                embedded: Vec::new(),
                outer_area: area,
                hole_area: 0.,
            });
        } else if component != primary {
            component_outlines.push((component, cycle));
        }
    }

    for (component, cycle) in component_outlines {
        let start = coords[cycle[0]];
        let host = smallest(
            faces
                .iter()
                .enumerate()
                .filter(|(i, f)| {
                    face_components[*i] != component && in_cycle(coords, &start, &f.outer)
                }),
        );
        match host {
            Some(i) => {
                faces[i].hole_area += cycle_area(&cycle).abs();
                faces[i].holes.push(cycle);
            }
            None => debug!("isolated loop of edges outside every face"),
        }
    }

    let mut unassigned = Vec::new();
    for e in (0..edges.len()).filter(|&e| !alive[e]) {
        let [a, b] = edges[e];
        let mid = 0.5 * (coords[a] + coords[b]);
        match host_face(&faces, coords, &mid) {
            Some(i) => faces[i].embedded.push(e),
            None => unassigned.push(e),
        }
    }

    PlanarFaces { faces, unassigned }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        network::tests::{crossing_pair, three_fracture_domain, three_fractures},
        FractureNetwork,
    };
    use approx::assert_relative_eq;

    fn unit_square() -> Vec<Vec2> {
        vec![
            Vec2::new(0., 0.),
            Vec2::new(1., 0.),
            Vec2::new(1., 1.),
            Vec2::new(0., 1.),
        ]
    }

    #[test]
    fn square_with_diagonal() {
        let coords = unit_square();
        let edges = [[0, 1], [1, 2], [2, 3], [3, 0], [0, 2]];
        let faces = planar_faces(&coords, &edges, 0);
        assert_eq!(faces.faces.len(), 2);
        for face in &faces.faces {
            assert_eq!(face.outer.len(), 3);
            assert_relative_eq!(face.net_area(), 0.5);
        }
        assert!(faces.unassigned.is_empty());
    }

    #[test]
    fn dangling_edges_are_embedded() {
        let mut coords = unit_square();
        coords.push(Vec2::new(0.5, 0.5));
        coords.push(Vec2::new(0.25, 0.5));
        // one edge from the boundary into the interior, one floating
        let edges = [[0, 1], [1, 2], [2, 3], [3, 0], [1, 4], [4, 5]];
        let faces = planar_faces(&coords, &edges, 0);
        assert_eq!(faces.faces.len(), 1);
        let face = &faces.faces[0];
        assert_eq!(face.outer.len(), 4);
        let mut embedded = face.embedded.clone();
        embedded.sort_unstable();
        assert_eq!(embedded, vec![4, 5]);
    }

    #[test]
    fn disconnected_loop_becomes_hole() {
        let mut coords: Vec<Vec2> = unit_square().into_iter().map(|p| 4. * p).collect();
        coords.extend(unit_square().into_iter().map(|p| p + Vec2::new(1., 1.)));
        let edges = [
            [0, 1],
            [1, 2],
            [2, 3],
            [3, 0],
            [4, 5],
            [5, 6],
            [6, 7],
            [7, 4],
        ];
        let faces = planar_faces(&coords, &edges, 0);
        assert_eq!(faces.faces.len(), 2);
        let (outer, inner): (Vec<_>, Vec<_>) = faces.faces.iter().partition(|f| f.outer.contains(&0));
        assert_eq!(outer[0].holes.len(), 1);
        assert_relative_eq!(outer[0].net_area(), 15.);
        assert!(inner[0].holes.is_empty());
        assert_relative_eq!(inner[0].net_area(), 1.);
    }

    fn assert_areas_complete(network: &FractureNetwork) {
        let decomposition = network.decomposition().expect("decomposed");
        for fracture in network.fractures() {
            let covered: f64 = decomposition
                .polygons_of(fracture.id())
                .map(|p| decomposition.polygon_area(p))
                .sum();
            assert_relative_eq!(covered, fracture.area(), epsilon = 1e-8);
        }
    }

    #[test]
    fn crossing_pair_decomposition() {
        let mut network = FractureNetwork::new(crossing_pair());
        let decomposition = network.split_intersections().clone();

        // the segment cuts the first fracture in two
        // and ends on the boundary of the second one in its interior
        assert_eq!(decomposition.polygons_of(0).count(), 2);
        let second: Vec<&SubPolygon> = decomposition.polygons_of(1).collect();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].embedded.len(), 1);
        assert_eq!(decomposition.fracture_ids(), vec![0, 1]);

        assert_eq!(decomposition.lines().len(), 1);
        let line = &decomposition.lines()[0];
        assert_eq!(line.fractures, [0, 1]);
        let length: f64 = line.edges.iter().map(|&e| decomposition.edge_length(e)).sum();
        assert_relative_eq!(length, 2f64.sqrt(), epsilon = 1e-10);
        assert!(decomposition.intersection_points().is_empty());

        assert_areas_complete(&network);
        assert!(network.warnings().is_empty());
    }

    #[test]
    fn three_fractures_in_a_box_decomposition() {
        let mut network = FractureNetwork::new(three_fractures());
        network
            .impose_external_boundary(three_fracture_domain())
            .unwrap();
        network.split_intersections();
        assert_areas_complete(&network);
        assert!(!network
            .warnings()
            .iter()
            .any(|w| matches!(w, ToleranceConflict::UncoveredArea { .. })));

        let decomposition = network.decomposition().unwrap();
        assert_eq!(decomposition.lines().len(), 3);
        // every intersection segment is covered by the edges tagged with it
        for (k, isect) in network.intersections().iter().enumerate() {
            let (a, b) = isect.segment().unwrap();
            let covered: f64 = decomposition
                .edges()
                .iter()
                .enumerate()
                .filter(|(_, e)| e.intersections.contains(&k))
                .map(|(e, _)| decomposition.edge_length(e))
                .sum();
            assert_relative_eq!(covered, (b - a).norm(), epsilon = 1e-8);
        }
        // boundary faces are split only along their edges and fracture traces
        let boundary_polygons = decomposition
            .polygons()
            .iter()
            .filter(|p| p.is_domain_boundary())
            .count();
        assert!(boundary_polygons >= 6);
    }

    #[test]
    fn three_orthogonal_squares() {
        let square = |axis: usize| {
            let mut vertices = Vec::new();
            for (u, v) in [(-1., -1.), (1., -1.), (1., 1.), (-1., 1.)] {
                let mut p = Vec3::zeros();
                p[(axis + 1) % 3] = u;
                p[(axis + 2) % 3] = v;
                vertices.push(p);
            }
            Fracture::new(vertices).unwrap()
        };
        let mut network = FractureNetwork::new((0..3).map(square));
        let decomposition = network.split_intersections().clone();
        for id in 0..3 {
            assert_eq!(decomposition.polygons_of(id).count(), 4);
        }
        assert_eq!(decomposition.lines().len(), 3);
        assert_eq!(decomposition.intersection_points().len(), 1);
        let center = decomposition.points()[decomposition.intersection_points()[0]];
        assert_relative_eq!(center, Vec3::zeros(), epsilon = 1e-10);
        assert_areas_complete(&network);
    }

    #[test]
    fn near_coincident_points_are_reported() {
        let square = |x0: f64| {
            Fracture::from_coordinates([
                [x0, x0 + 1., x0 + 1., x0],
                [0., 0., 1., 1.],
                [0., 0., 0., 0.],
            ])
            .unwrap()
        };
        let mut network = FractureNetwork::new([square(0.), square(1. + 5e-4)]);
        network.split_intersections();
        assert!(network
            .warnings()
            .iter()
            .any(|w| matches!(w, ToleranceConflict::NearCoincidentPoints { .. })));

        // within the tolerance the points merge silently
        let mut network = FractureNetwork::new([square(0.), square(1. + 5e-5)]);
        let decomposition = network.split_intersections();
        assert_eq!(decomposition.points().len(), 6);
        assert!(network.warnings().is_empty());
    }

    #[test]
    fn touching_corner_becomes_embedded_point() {
        // a triangle standing on the square with its apex in the middle
        let square =
            Fracture::from_coordinates([[0., 1., 1., 0.], [0., 0., 1., 1.], [0., 0., 0., 0.]])
                .unwrap();
        let triangle =
            Fracture::from_coordinates([[0.5, 1., 0.], [0.5, 0.5, 0.5], [0., 1., 1.]]).unwrap();
        let mut network = FractureNetwork::new([square, triangle]);
        assert!(matches!(
            network.find_intersections(),
            [Intersection {
                shape: IntersectionShape::Point(_),
                ..
            }]
        ));
        let decomposition = network.split_intersections().clone();

        let on_square: Vec<&SubPolygon> = decomposition.polygons_of(0).collect();
        assert_eq!(on_square.len(), 1);
        assert_eq!(on_square[0].embedded_points.len(), 1);
        let apex = on_square[0].embedded_points[0];
        assert_relative_eq!(
            decomposition.points()[apex],
            Vec3::new(0.5, 0.5, 0.),
            epsilon = 1e-10
        );
        assert!(!on_square[0].outer.contains(&apex));

        // the triangle already has the apex as a vertex
        let on_triangle: Vec<&SubPolygon> = decomposition.polygons_of(1).collect();
        assert_eq!(on_triangle.len(), 1);
        assert!(on_triangle[0].outer.contains(&apex));
        assert!(on_triangle[0].embedded_points.is_empty());

        assert!(decomposition.lines().is_empty());
        assert_areas_complete(&network);
    }

    #[test]
    fn corner_touching_an_edge_splits_it() {
        let square =
            Fracture::from_coordinates([[0., 1., 1., 0.], [0., 0., 1., 1.], [0., 0., 0., 0.]])
                .unwrap();
        // apex on the edge y = 0 of the square
        let triangle =
            Fracture::from_coordinates([[0.5, 1., 0.], [0., -0.5, -0.5], [0., 1., 1.]]).unwrap();
        let mut network = FractureNetwork::new([square, triangle]);
        let decomposition = network.split_intersections().clone();

        let on_square: Vec<&SubPolygon> = decomposition.polygons_of(0).collect();
        assert_eq!(on_square.len(), 1);
        assert_eq!(on_square[0].outer.len(), 5);
        assert!(on_square[0].embedded_points.is_empty());
        let apex = decomposition
            .points()
            .iter()
            .position(|p| (p - Vec3::new(0.5, 0., 0.)).norm() < 1e-10)
            .unwrap();
        assert!(on_square[0].outer.contains(&apex));
    }

    /// Sample points on a grid over each polygon of the network
    /// and check that every point inside it lies in exactly one sub-polygon.
    fn assert_sub_polygons_tile(network: &FractureNetwork) {
        const SAMPLES: usize = 40;
        let decomposition = network.decomposition().expect("decomposed");
        for fracture in network.fractures() {
            let frame = fracture.frame();
            let outline: Vec<Vec2> = fracture.vertices().iter().map(|v| frame.project(v)).collect();
            let cycles: Vec<(Vec<Vec2>, Vec<Vec<Vec2>>)> = decomposition
                .polygons_of(fracture.id())
                .map(|polygon| {
                    let project = |cycle: &[usize]| -> Vec<Vec2> {
                        cycle
                            .iter()
                            .map(|&p| frame.project(&decomposition.points()[p]))
                            .collect()
                    };
                    let holes = polygon.holes.iter().map(|h| project(h)).collect();
                    (project(&polygon.outer), holes)
                })
                .collect();

            let (lo, hi) = outline.iter().fold(
                (Vec2::repeat(f64::INFINITY), Vec2::repeat(f64::NEG_INFINITY)),
                |(lo, hi), p| (lo.inf(p), hi.sup(p)),
            );
            // offsets off the rational grid keep samples away from edges
            let at = |i: usize, lo: f64, hi: f64| {
                lo + (hi - lo) * (i as f64 + 0.318_309_886) / SAMPLES as f64
            };
            for (i, j) in (0..SAMPLES).cartesian_product(0..SAMPLES) {
                let p = Vec2::new(at(i, lo.x, hi.x), at(j, lo.y, hi.y));
                if !point_in_polygon_2d(&p, &outline) {
                    continue;
                }
                let containing = cycles
                    .iter()
                    .filter(|(outer, holes)| {
                        point_in_polygon_2d(&p, outer)
                            && !holes.iter().any(|h| point_in_polygon_2d(&p, h))
                    })
                    .count();
                assert_eq!(
                    containing, 1,
                    "point {:?} of fracture {} is in {} sub-polygons",
                    p,
                    fracture.id(),
                    containing
                );
            }
        }
    }

    #[test]
    fn sub_polygons_do_not_overlap() {
        let mut network = FractureNetwork::new(three_fractures());
        network
            .impose_external_boundary(three_fracture_domain())
            .unwrap();
        network.split_intersections();
        assert_sub_polygons_tile(&network);

        let mut network = FractureNetwork::new(crossing_pair());
        network.split_intersections();
        assert_sub_polygons_tile(&network);
    }

    #[test]
    fn decomposition_is_repeatable() {
        let build = || {
            let mut network = FractureNetwork::new(three_fractures());
            network
                .impose_external_boundary(three_fracture_domain())
                .unwrap();
            network
        };
        let mut network = build();
        let first = network.split_intersections().clone();
        let second = network.split_intersections().clone();
        let fresh = build().split_intersections().clone();
        for other in [&second, &fresh] {
            assert_eq!(first.points(), other.points());
            assert_eq!(first.edges(), other.edges());
            assert_eq!(first.polygons(), other.polygons());
            assert_eq!(first.lines(), other.lines());
            assert_eq!(first.intersection_points(), other.intersection_points());
        }
        // no new warnings from the second call
        let warnings = network.warnings().len();
        network.split_intersections();
        assert_eq!(network.warnings().len(), warnings);
    }

    #[test]
    fn split_segment_at_points() {
        let points = vec![
            Vec3::zeros(),
            Vec3::new(1., 0., 0.),
            Vec3::new(0.75, 0., 0.),
            Vec3::new(0.25, 1e-6, 0.),
            Vec3::new(0.5, 0.1, 0.),
        ];
        let pieces = split_segment(&points, [0, 1], &[0, 1, 2, 3, 4], 1e-4);
        assert_eq!(pieces, vec![[0, 3], [3, 2], [2, 1]]);
    }
}
