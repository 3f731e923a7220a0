//! Fractures and the box-shaped domain containing them.

use nalgebra as na;

use crate::{
    geometry::{
        clip_by_half_space, convex_polygon_intersection, is_convex_2d, polygon_area_2d,
        polygon_area_3d, polygon_centroid, GeometryError, Plane, PlaneFrame, PolygonIntersection,
    },
    Vec2, Vec3, DEFAULT_TOL,
};

/// Whether a polygon in a network is a real fracture
/// or one of the faces of the domain box added by
/// [`impose_external_boundary`][crate::FractureNetwork::impose_external_boundary].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FractureKind {
    /// A fracture given by the user.
    Fracture,
    /// A face of the domain boundary.
    DomainBoundary,
}

/// A planar convex polygon in 3D space.
///
/// Fractures are immutable once constructed.
/// Truncating a fracture to a domain produces a new one with the same id.
#[derive(Clone, Debug, PartialEq)]
pub struct Fracture {
    id: usize,
    vertices: Vec<Vec3>,
    plane: Plane,
    kind: FractureKind,
}

impl Fracture {
    /// Create a fracture from its vertices in cyclic order,
    /// validating with the [default tolerance][DEFAULT_TOL].
    ///
    /// The id is assigned when the fracture is added to a
    /// [`FractureNetwork`][crate::FractureNetwork].
    pub fn new(vertices: Vec<Vec3>) -> Result<Self, GeometryError> {
        Self::with_tolerance(vertices, DEFAULT_TOL)
    }

    /// Create a fracture from its vertices in cyclic order.
    ///
    /// The polygon must have at least three distinct consecutive vertices,
    /// all within `tol` of a common plane, a width of more than `tol`
    /// and a convex shape.
    pub fn with_tolerance(vertices: Vec<Vec3>, tol: f64) -> Result<Self, GeometryError> {
        crate::geometry::validate_tolerance(tol)?;
        let n = vertices.len();
        if n < 3 {
            return Err(GeometryError::TooFewVertices(n));
        }
        for i in 0..n {
            let j = (i + 1) % n;
            if (vertices[i] - vertices[j]).norm() <= tol {
                return Err(GeometryError::DuplicateVertex(i, j));
            }
        }

        let plane = Plane::from_points(&vertices).ok_or(GeometryError::ZeroArea)?;
        for (vertex, v) in vertices.iter().enumerate() {
            let distance = plane.distance(v);
            if distance > tol {
                return Err(GeometryError::NonCoplanar {
                    vertex,
                    distance,
                    tol,
                });
            }
        }

        let frame = PlaneFrame::from_plane(&plane, &vertices[0]);
        let flat: Vec<Vec2> = vertices.iter().map(|v| frame.project(v)).collect();
        // a sliver thinner than the tolerance counts as degenerate
        let diameter = vertices
            .iter()
            .flat_map(|a| vertices.iter().map(move |b| (a - b).norm()))
            .fold(0., f64::max);
        if polygon_area_2d(&flat).abs() <= tol * diameter {
            return Err(GeometryError::ZeroArea);
        }
        is_convex_2d(&flat, tol).map_err(GeometryError::NonConvex)?;

        Ok(Self {
            id: 0,
            vertices,
            plane,
            kind: FractureKind::Fracture,
        })
    }

    /// Create a fracture from a 3×N array of coordinates,
    /// one column per vertex.
    ///
    /// ```
    /// # use fracmesh::Fracture;
    /// let f = Fracture::from_coordinates([
    ///     [0., 1., 1., 0.],
    ///     [0., 0., 1., 1.],
    ///     [0., 0., 0., 0.],
    /// ])?;
    /// assert_eq!(f.vertices().len(), 4);
    /// # Ok::<(), fracmesh::GeometryError>(())
    /// ```
    pub fn from_coordinates<const N: usize>(coords: [[f64; N]; 3]) -> Result<Self, GeometryError> {
        let vertices = (0..N)
            .map(|i| Vec3::new(coords[0][i], coords[1][i], coords[2][i]))
            .collect();
        Self::new(vertices)
    }

    /// Approximate an ellipse with a polygon.
    ///
    /// See [`EllipseParameters`] for the placement conventions.
    pub fn elliptic(params: &EllipseParameters) -> Result<Self, GeometryError> {
        Self::new(params.vertices()?)
    }

    /// Build a domain boundary face without the checks of [`new`][Self::new].
    /// The vertices come from a validated [`Domain`].
    pub(crate) fn domain_face(id: usize, vertices: Vec<Vec3>) -> Option<Self> {
        let plane = Plane::from_points(&vertices)?;
        Some(Self {
            id,
            vertices,
            plane,
            kind: FractureKind::DomainBoundary,
        })
    }

    pub(crate) fn with_id(mut self, id: usize) -> Self {
        self.id = id;
        self
    }

    /// Clip the fracture to a domain box.
    ///
    /// Returns `None` if nothing of positive area remains inside the box.
    /// The plane and id of the fracture are kept.
    pub(crate) fn truncated(&self, domain: &Domain, tol: f64) -> Option<Self> {
        let mut vertices = self.vertices.clone();
        for (normal, offset) in domain.half_spaces() {
            vertices = clip_by_half_space(&vertices, &normal, offset, tol);
            if vertices.len() < 3 {
                return None;
            }
        }
        if polygon_area_3d(&vertices) <= tol * tol {
            return None;
        }
        Some(Self {
            vertices,
            ..self.clone()
        })
    }

    /// Identifier of the fracture, unique within a network.
    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Vertices of the polygon in cyclic order.
    #[inline]
    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    /// The plane the polygon lies in.
    #[inline]
    pub fn plane(&self) -> &Plane {
        &self.plane
    }

    /// Unit normal of the fracture plane.
    #[inline]
    pub fn normal(&self) -> Vec3 {
        self.plane.normal
    }

    /// Average of the vertices, an interior point of the polygon.
    pub fn center(&self) -> Vec3 {
        polygon_centroid(&self.vertices)
    }

    /// Area of the polygon.
    pub fn area(&self) -> f64 {
        polygon_area_3d(&self.vertices)
    }

    /// Whether this is a real fracture or a domain boundary face.
    #[inline]
    pub fn kind(&self) -> FractureKind {
        self.kind
    }

    /// Shorthand for checking if this is a domain boundary face.
    #[inline]
    pub fn is_domain_boundary(&self) -> bool {
        self.kind == FractureKind::DomainBoundary
    }

    /// A 2D coordinate system in the plane of the fracture,
    /// in which the vertices go counterclockwise.
    pub fn frame(&self) -> PlaneFrame {
        PlaneFrame::from_plane(&self.plane, &self.vertices[0])
    }

    /// Intersect with another fracture.
    pub fn intersect(&self, other: &Fracture, tol: f64) -> PolygonIntersection {
        convex_polygon_intersection(
            &self.vertices,
            &self.plane,
            &other.vertices,
            &other.plane,
            tol,
        )
    }
}

/// Placement of an elliptic fracture.
///
/// The ellipse is first laid out in the xy-plane with its major axis along x,
/// then rotated by `major_axis_angle` around the z axis.
/// The strike direction is the x axis rotated by `strike_angle` around z,
/// and the ellipse is tilted by `dip_angle` around the strike direction
/// before being moved to `center`. All angles are in radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EllipseParameters {
    /// Center point of the ellipse.
    pub center: Vec3,
    /// Length of the major semi-axis.
    pub major_axis: f64,
    /// Length of the minor semi-axis.
    pub minor_axis: f64,
    /// Rotation of the major axis in the xy-plane.
    pub major_axis_angle: f64,
    /// Direction of the rotation axis for the dip, measured from the x axis.
    pub strike_angle: f64,
    /// Rotation around the strike direction.
    pub dip_angle: f64,
    /// Number of polygon vertices.
    pub num_points: usize,
}

impl Default for EllipseParameters {
    fn default() -> Self {
        Self {
            center: Vec3::zeros(),
            major_axis: 1.,
            minor_axis: 1.,
            major_axis_angle: 0.,
            strike_angle: 0.,
            dip_angle: 0.,
            num_points: 16,
        }
    }
}

impl EllipseParameters {
    /// Compute the vertices of the polygon approximating this ellipse.
    pub fn vertices(&self) -> Result<Vec<Vec3>, GeometryError> {
        if self.num_points < 3 {
            return Err(GeometryError::InvalidEllipse("at least 3 points are required"));
        }
        if !(self.major_axis > 0. && self.minor_axis > 0.) {
            return Err(GeometryError::InvalidEllipse("axis lengths must be positive"));
        }

        let major_rot = na::Rotation3::from_axis_angle(&Vec3::z_axis(), self.major_axis_angle);
        let strike_dir =
            na::Rotation3::from_axis_angle(&Vec3::z_axis(), self.strike_angle) * Vec3::x_axis();
        let dip_rot = na::Rotation3::from_axis_angle(&strike_dir, self.dip_angle);
        let rot = dip_rot * major_rot;

        let step = std::f64::consts::TAU / self.num_points as f64;
        Ok((0..self.num_points)
            .map(|i| {
                let angle = i as f64 * step;
                let reference = Vec3::new(
                    self.major_axis * angle.cos(),
                    self.minor_axis * angle.sin(),
                    0.,
                );
                self.center + rot * reference
            })
            .collect())
    }
}

/// An axis-aligned box bounding the computational domain.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Domain {
    /// Lower corner.
    pub min: Vec3,
    /// Upper corner.
    pub max: Vec3,
}

/// Relative margin added around the fractures by [`Domain::bounding`].
const BOUNDING_MARGIN: f64 = 0.05;

impl Domain {
    /// Create a domain from its lower and upper corners.
    pub fn new(min: Vec3, max: Vec3) -> Result<Self, GeometryError> {
        let domain = Self { min, max };
        domain.validate()?;
        Ok(domain)
    }

    /// Create a domain from its extents along each axis.
    pub fn from_bounds(
        xmin: f64,
        xmax: f64,
        ymin: f64,
        ymax: f64,
        zmin: f64,
        zmax: f64,
    ) -> Result<Self, GeometryError> {
        Self::new(Vec3::new(xmin, ymin, zmin), Vec3::new(xmax, ymax, zmax))
    }

    /// Check that the box has positive extent along every axis.
    pub fn validate(&self) -> Result<(), GeometryError> {
        for (axis, (min, max)) in ['x', 'y', 'z']
            .into_iter()
            .zip(self.min.iter().zip(self.max.iter()))
        {
            if !(min < max) {
                return Err(GeometryError::InvalidDomain {
                    axis,
                    min: *min,
                    max: *max,
                });
            }
        }
        Ok(())
    }

    /// The bounding box of a set of fractures,
    /// enlarged by a small margin on every side.
    ///
    /// Returns `None` if there are no fractures.
    pub fn bounding<'a>(fractures: impl IntoIterator<Item = &'a Fracture>) -> Option<Self> {
        let mut vertices = fractures.into_iter().flat_map(|f| f.vertices.iter());
        let first = vertices.next()?;
        let (min, max) = vertices.fold((*first, *first), |(min, max), v| {
            (min.inf(v), max.sup(v))
        });
        // fractures in an axis-aligned plane would give a flat box,
        // so the margin falls back to the largest extent
        let extent = max - min;
        let largest = extent.max().max(1.);
        let margin = extent.map(|e| BOUNDING_MARGIN * if e > 0. { e } else { largest });
        Some(Self {
            min: min - margin,
            max: max + margin,
        })
    }

    /// Center point of the box.
    pub fn center(&self) -> Vec3 {
        0.5 * (self.min + self.max)
    }

    /// Check if a point is inside the box or within `tol` of it.
    pub fn contains(&self, p: &Vec3, tol: f64) -> bool {
        (0..3).all(|i| p[i] >= self.min[i] - tol && p[i] <= self.max[i] + tol)
    }

    /// Check if a point inside the box is within `tol` of its boundary.
    pub fn on_boundary(&self, p: &Vec3, tol: f64) -> bool {
        self.contains(p, tol)
            && (0..3).any(|i| (p[i] - self.min[i]).abs() <= tol || (p[i] - self.max[i]).abs() <= tol)
    }

    /// The six half-spaces `normal · x <= offset` whose intersection is the box.
    pub fn half_spaces(&self) -> [(Vec3, f64); 6] {
        [
            (-Vec3::x(), -self.min.x),
            (Vec3::x(), self.max.x),
            (-Vec3::y(), -self.min.y),
            (Vec3::y(), self.max.y),
            (-Vec3::z(), -self.min.z),
            (Vec3::z(), self.max.z),
        ]
    }

    /// The six faces of the box as quadrilaterals
    /// in the order xmin, xmax, ymin, ymax, zmin, zmax,
    /// oriented counterclockwise when seen from outside.
    pub fn faces(&self) -> [[Vec3; 4]; 6] {
        let (lo, hi) = (self.min, self.max);
        let p = |x: f64, y: f64, z: f64| Vec3::new(x, y, z);
        [
            [
                p(lo.x, lo.y, lo.z),
                p(lo.x, lo.y, hi.z),
                p(lo.x, hi.y, hi.z),
                p(lo.x, hi.y, lo.z),
            ],
            [
                p(hi.x, lo.y, lo.z),
                p(hi.x, hi.y, lo.z),
                p(hi.x, hi.y, hi.z),
                p(hi.x, lo.y, hi.z),
            ],
            [
                p(lo.x, lo.y, lo.z),
                p(hi.x, lo.y, lo.z),
                p(hi.x, lo.y, hi.z),
                p(lo.x, lo.y, hi.z),
            ],
            [
                p(lo.x, hi.y, lo.z),
                p(lo.x, hi.y, hi.z),
                p(hi.x, hi.y, hi.z),
                p(hi.x, hi.y, lo.z),
            ],
            [
                p(lo.x, lo.y, lo.z),
                p(lo.x, hi.y, lo.z),
                p(hi.x, hi.y, lo.z),
                p(hi.x, lo.y, lo.z),
            ],
            [
                p(lo.x, lo.y, hi.z),
                p(hi.x, lo.y, hi.z),
                p(hi.x, hi.y, hi.z),
                p(lo.x, hi.y, hi.z),
            ],
        ]
    }
}
