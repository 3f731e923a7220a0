//! Collections of fractures and the geometric processing done on them
//! before meshing.
//!
//! A [`FractureNetwork`] moves through the [`Stage`]s
//! `Constructed → IntersectionsFound → Decomposed`.
//! Requesting a later stage runs the earlier ones first,
//! so [`split_intersections`][FractureNetwork::split_intersections]
//! can be called on a fresh network.
//! Operations that would invalidate computed results,
//! like imposing a domain after intersections are known,
//! fail with a [`SequenceError`].

mod decomposition;
pub use decomposition::{Decomposition, Edge, IntersectionLine, SubPolygon};

use log::{debug, info, warn};

use crate::{
    fracture::{Domain, Fracture, FractureKind},
    geometry::{validate_tolerance, GeometryError, PolygonIntersection},
    Vec3, DEFAULT_TOL,
};

/// Processing stage of a [`FractureNetwork`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Fractures (and possibly the domain) have been given.
    Constructed,
    /// Pairwise intersections are known.
    IntersectionsFound,
    /// Fractures have been split into sub-polygons along intersections.
    Decomposed,
}

/// An operation was requested at a stage where it is no longer valid.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum SequenceError {
    /// The operation must happen before intersections are computed.
    #[error("cannot {operation} in stage {stage:?}, this must be done before finding intersections")]
    StageRegression {
        /// What was attempted.
        operation: &'static str,
        /// The stage the network was in.
        stage: Stage,
    },
    /// A domain can only be imposed once.
    #[error("the external boundary has already been imposed")]
    BoundaryAlreadyImposed,
}

/// A geometric situation that is resolved by the tolerance
/// but may indicate a problem with the input.
///
/// These never abort processing. They are logged as warnings and collected in
/// [`FractureNetwork::warnings`].
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum ToleranceConflict {
    /// Two points are further apart than the tolerance but only barely,
    /// so they were kept as separate points.
    #[error("points {first:?} and {second:?} are only {distance:.3e} apart")]
    NearCoincidentPoints {
        /// The point that was registered first.
        first: Vec3,
        /// The point that nearly coincided with it.
        second: Vec3,
        /// Distance between the two.
        distance: f64,
    },
    /// Two fractures lie in the same plane and overlap.
    /// Their intersection is not representable as a line and is ignored.
    #[error("fractures {first} and {second} are coplanar and overlap")]
    CoplanarFractures {
        /// Id of the first fracture.
        first: usize,
        /// Id of the second fracture.
        second: usize,
    },
    /// The sub-polygons of a fracture don't add up to its area.
    #[error("decomposition of fracture {fracture} misses an area of {missing:.3e}")]
    UncoveredArea {
        /// Id of the fracture.
        fracture: usize,
        /// Difference between the fracture area and the total area of its sub-polygons.
        missing: f64,
    },
}

/// Geometry of an intersection between two fractures.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IntersectionShape {
    /// The fractures touch at a single point.
    Point(Vec3),
    /// The fractures meet along a segment,
    /// with endpoints in lexicographic order.
    Segment(Vec3, Vec3),
}

/// An intersection between two fractures of a network.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intersection {
    /// Id of the fracture with the smaller id.
    pub first: usize,
    /// Id of the fracture with the larger id.
    pub second: usize,
    /// Where the fractures meet.
    pub shape: IntersectionShape,
}

impl Intersection {
    /// Check if the given fracture is part of this intersection.
    #[inline]
    pub fn involves(&self, fracture: usize) -> bool {
        self.first == fracture || self.second == fracture
    }

    /// The fracture on the other side of the intersection from `fracture`.
    pub fn other(&self, fracture: usize) -> Option<usize> {
        if self.first == fracture {
            Some(self.second)
        } else if self.second == fracture {
            Some(self.first)
        } else {
            None
        }
    }

    /// Endpoints of the intersection if it is a segment.
    pub fn segment(&self) -> Option<(Vec3, Vec3)> {
        match self.shape {
            IntersectionShape::Segment(a, b) => Some((a, b)),
            IntersectionShape::Point(_) => None,
        }
    }
}

/// A set of fractures, optionally bounded by a domain box.
///
/// Fractures are stored in an arena ordered by id.
/// Ids are assigned in insertion order and stay stable
/// when fractures are truncated to the domain,
/// so intersections and sub-polygons can refer to fractures by id.
#[derive(Clone, Debug)]
pub struct FractureNetwork {
    fractures: Vec<Fracture>,
    domain: Option<Domain>,
    tol: f64,
    stage: Stage,
    intersections: Vec<Intersection>,
    decomposition: Option<Decomposition>,
    warnings: Vec<ToleranceConflict>,
}

impl FractureNetwork {
    /// Create a network using the [default tolerance][DEFAULT_TOL].
    pub fn new(fractures: impl IntoIterator<Item = Fracture>) -> Self {
        Self::build(fractures, DEFAULT_TOL)
    }

    /// Create a network with a custom geometric tolerance.
    pub fn with_tolerance(
        fractures: impl IntoIterator<Item = Fracture>,
        tol: f64,
    ) -> Result<Self, GeometryError> {
        Ok(Self::build(fractures, validate_tolerance(tol)?))
    }

    fn build(fractures: impl IntoIterator<Item = Fracture>, tol: f64) -> Self {
        let fractures = fractures
            .into_iter()
            .enumerate()
            .map(|(id, f)| f.with_id(id))
            .collect();
        Self {
            fractures,
            domain: None,
            tol,
            stage: Stage::Constructed,
            intersections: Vec::new(),
            decomposition: None,
            warnings: Vec::new(),
        }
    }

    /// Add a fracture to the network, returning its id.
    ///
    /// If a domain has already been imposed the fracture is truncated to it
    /// (and dropped if nothing remains, in which case the id is not used).
    pub fn push(&mut self, fracture: Fracture) -> Result<usize, SequenceError> {
        self.require_constructed("add a fracture")?;
        let id = self.next_id();
        let fracture = fracture.with_id(id);
        match &self.domain {
            None => self.fractures.push(fracture),
            Some(domain) => match fracture.truncated(domain, self.tol) {
                Some(truncated) => self.fractures.push(truncated),
                None => info!("fracture {id} is outside the domain, removing"),
            },
        }
        Ok(id)
    }

    fn next_id(&self) -> usize {
        self.fractures.last().map_or(0, |f| f.id() + 1)
    }

    fn require_constructed(&self, operation: &'static str) -> Result<(), SequenceError> {
        if self.stage == Stage::Constructed {
            Ok(())
        } else {
            Err(SequenceError::StageRegression {
                operation,
                stage: self.stage,
            })
        }
    }

    /// The geometric tolerance used for all computations on this network.
    #[inline]
    pub fn tol(&self) -> f64 {
        self.tol
    }

    /// Current processing stage.
    #[inline]
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The domain box, if one has been imposed.
    #[inline]
    pub fn domain(&self) -> Option<&Domain> {
        self.domain.as_ref()
    }

    /// All polygons in the network ordered by id,
    /// including domain boundary faces once a domain is imposed.
    #[inline]
    pub fn fractures(&self) -> &[Fracture] {
        &self.fractures
    }

    /// Look up a fracture by id.
    pub fn fracture(&self, id: usize) -> Option<&Fracture> {
        self.fractures
            .binary_search_by_key(&id, |f| f.id())
            .ok()
            .map(|idx| &self.fractures[idx])
    }

    /// Number of real fractures (not counting domain boundary faces).
    pub fn num_fractures(&self) -> usize {
        self.fractures
            .iter()
            .filter(|f| f.kind() == FractureKind::Fracture)
            .count()
    }

    /// Intersections found so far (empty before
    /// [`find_intersections`][Self::find_intersections]).
    #[inline]
    pub fn intersections(&self) -> &[Intersection] {
        &self.intersections
    }

    /// The decomposition, if it has been computed.
    #[inline]
    pub fn decomposition(&self) -> Option<&Decomposition> {
        self.decomposition.as_ref()
    }

    /// Tolerance conflicts encountered so far.
    #[inline]
    pub fn warnings(&self) -> &[ToleranceConflict] {
        &self.warnings
    }

    fn warn(&mut self, conflict: ToleranceConflict) {
        warn!("{conflict}");
        self.warnings.push(conflict);
    }

    /// Truncate every fracture to the domain box and add the six faces
    /// of the box to the network as [`DomainBoundary`][FractureKind::DomainBoundary]
    /// polygons.
    ///
    /// Fractures with nothing of positive area inside the box are removed.
    /// Boundary faces get ids after the largest fracture id.
    /// This must be done before intersections are computed.
    pub fn impose_external_boundary(&mut self, domain: Domain) -> Result<(), crate::Error> {
        self.require_constructed("impose the external boundary")?;
        if self.domain.is_some() {
            return Err(SequenceError::BoundaryAlreadyImposed.into());
        }
        domain.validate()?;

        let next_id = self.next_id();
        let mut kept = Vec::with_capacity(self.fractures.len() + 6);
        for fracture in &self.fractures {
            match fracture.truncated(&domain, self.tol) {
                Some(truncated) => kept.push(truncated),
                None => info!("fracture {} is outside the domain, removing", fracture.id()),
            }
        }
        let remaining = kept.len();
        kept.extend(
            domain
                .faces()
                .into_iter()
                .enumerate()
                .filter_map(|(i, face)| Fracture::domain_face(next_id + i, face.to_vec())),
        );
        debug!(
            "imposed domain {:?}..{:?}, {} of {} fractures remain",
            domain.min,
            domain.max,
            remaining,
            self.fractures.len()
        );

        self.fractures = kept;
        self.domain = Some(domain);
        Ok(())
    }

    /// Compute all pairwise intersections between polygons in the network.
    ///
    /// Every unordered pair is tested once, in order of id.
    /// Pairs that are coplanar and overlap are reported as
    /// [`ToleranceConflict::CoplanarFractures`] and otherwise ignored.
    /// Calling this again returns the same intersections without recomputing.
    pub fn find_intersections(&mut self) -> &[Intersection] {
        if self.stage >= Stage::IntersectionsFound {
            return &self.intersections;
        }

        let mut intersections = Vec::new();
        let mut conflicts = Vec::new();
        for (i, first) in self.fractures.iter().enumerate() {
            for second in &self.fractures[i + 1..] {
                let shape = match first.intersect(second, self.tol) {
                    PolygonIntersection::None => continue,
                    PolygonIntersection::Point(p) => IntersectionShape::Point(p),
                    PolygonIntersection::Segment(a, b) => IntersectionShape::Segment(a, b),
                    PolygonIntersection::Coplanar => {
                        conflicts.push(ToleranceConflict::CoplanarFractures {
                            first: first.id(),
                            second: second.id(),
                        });
                        continue;
                    }
                };
                intersections.push(Intersection {
                    first: first.id(),
                    second: second.id(),
                    shape,
                });
            }
        }
        for conflict in conflicts {
            self.warn(conflict);
        }

        info!(
            "{} fractures intersect in {} intersections",
            self.fractures.len(),
            intersections.len()
        );
        self.intersections = intersections;
        self.stage = Stage::IntersectionsFound;
        &self.intersections
    }

    /// Split every polygon along its intersections into non-overlapping
    /// sub-polygons whose union is the original polygon,
    /// with shared points and edges between polygons identified.
    ///
    /// Finds intersections first if that hasn't been done yet.
    /// Calling this again returns the same decomposition.
    pub fn split_intersections(&mut self) -> &Decomposition {
        if self.stage < Stage::IntersectionsFound {
            self.find_intersections();
        }
        let decomposition = match self.decomposition.take() {
            Some(decomposition) => decomposition,
            None => {
                let (decomposition, conflicts) = decomposition::decompose(
                    &self.fractures,
                    &self.intersections,
                    self.domain,
                    self.tol,
                );
                for conflict in conflicts {
                    self.warn(conflict);
                }
                info!(
                    "split {} polygons into {} sub-polygons with {} points and {} edges",
                    self.fractures.len(),
                    decomposition.polygons().len(),
                    decomposition.points().len(),
                    decomposition.edges().len()
                );
                self.stage = Stage::Decomposed;
                decomposition
            }
        };
        self.decomposition.insert(decomposition)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fracture::EllipseParameters;
    use approx::assert_relative_eq;

    /// Two quadrilaterals crossing along a single segment.
    pub(crate) fn crossing_pair() -> Vec<Fracture> {
        vec![
            Fracture::from_coordinates([
                [0., 1., 2., 0.],
                [0., 0., 1., 1.],
                [0., 0., 1., 1.],
            ])
            .unwrap(),
            Fracture::from_coordinates([
                [0.5, 0.5, 0.5, 0.5],
                [-1., 2., 2., -1.],
                [-1., -1., 2., 2.],
            ])
            .unwrap(),
        ]
    }

    /// The crossing pair plus an elliptic fracture cutting both.
    pub(crate) fn three_fractures() -> Vec<Fracture> {
        let mut fractures = crossing_pair();
        fractures.push(
            Fracture::elliptic(&EllipseParameters {
                center: Vec3::new(0.1, 0.3, 0.2),
                major_axis: 1.5,
                minor_axis: 0.5,
                major_axis_angle: std::f64::consts::PI / 6.,
                strike_angle: -std::f64::consts::PI / 3.,
                dip_angle: -std::f64::consts::PI / 3.,
                num_points: 12,
            })
            .unwrap(),
        );
        fractures
    }

    pub(crate) fn three_fracture_domain() -> Domain {
        Domain::from_bounds(-2., 3., -2., 3., -3., 3.).unwrap()
    }

    #[test]
    fn two_crossing_fractures() {
        let mut network = FractureNetwork::new(crossing_pair());
        assert_eq!(network.stage(), Stage::Constructed);
        let intersections = network.find_intersections().to_vec();
        assert_eq!(intersections.len(), 1);
        let isect = intersections[0];
        assert_eq!((isect.first, isect.second), (0, 1));
        assert_eq!(isect.other(1), Some(0));
        let (a, b) = isect.segment().expect("should be a segment");
        assert_relative_eq!(a, Vec3::new(0.5, 0., 0.), epsilon = 1e-10);
        assert_relative_eq!(b, Vec3::new(0.5, 1., 1.), epsilon = 1e-10);
        assert_eq!(network.stage(), Stage::IntersectionsFound);
    }

    #[test]
    fn three_fractures_in_a_box() {
        let mut network = FractureNetwork::new(three_fractures());
        network
            .impose_external_boundary(three_fracture_domain())
            .unwrap();
        assert_eq!(network.fractures().len(), 9);
        assert_eq!(network.num_fractures(), 3);
        let boundary_ids: Vec<usize> = network
            .fractures()
            .iter()
            .filter(|f| f.is_domain_boundary())
            .map(|f| f.id())
            .collect();
        assert_eq!(boundary_ids, vec![3, 4, 5, 6, 7, 8]);

        assert_eq!(network.find_intersections().len(), 15);
        let between_fractures = network
            .intersections()
            .iter()
            .filter(|i| i.second < 3)
            .count();
        assert_eq!(between_fractures, 3);
    }

    #[test]
    fn find_intersections_is_idempotent() {
        let mut network = FractureNetwork::new(three_fractures());
        let first = network.find_intersections().to_vec();
        let second = network.find_intersections().to_vec();
        assert_eq!(first, second);
    }

    #[test]
    fn intersections_do_not_depend_on_order() {
        let mut forward = FractureNetwork::new(three_fractures());
        let mut backward = FractureNetwork::new(three_fractures().into_iter().rev());
        fn segments(network: &mut FractureNetwork) -> Vec<[f64; 6]> {
            let mut segs: Vec<[f64; 6]> = network
                .find_intersections()
                .iter()
                .filter_map(|i| i.segment())
                .map(|(a, b)| [a.x, a.y, a.z, b.x, b.y, b.z])
                .collect();
            segs.sort_by(|l, r| l.partial_cmp(r).unwrap());
            segs
        }
        let f = segments(&mut forward);
        let b = segments(&mut backward);
        assert_eq!(f.len(), b.len());
        for (l, r) in f.iter().zip(&b) {
            for (x, y) in l.iter().zip(r) {
                assert_relative_eq!(x, y, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn stage_ordering() {
        let mut network = FractureNetwork::new(crossing_pair());
        network.find_intersections();
        let res = network.impose_external_boundary(three_fracture_domain());
        assert!(matches!(
            res,
            Err(crate::Error::Sequence(SequenceError::StageRegression {
                stage: Stage::IntersectionsFound,
                ..
            }))
        ));
        assert!(network.push(crossing_pair().remove(0)).is_err());

        // splitting runs the missing stage
        let mut network = FractureNetwork::new(crossing_pair());
        network.split_intersections();
        assert_eq!(network.stage(), Stage::Decomposed);
        assert_eq!(network.intersections().len(), 1);

        let mut network = FractureNetwork::new(crossing_pair());
        network
            .impose_external_boundary(three_fracture_domain())
            .unwrap();
        assert_eq!(
            network
                .impose_external_boundary(three_fracture_domain())
                .unwrap_err()
                .to_string(),
            SequenceError::BoundaryAlreadyImposed.to_string()
        );
    }

    #[test]
    fn fractures_outside_domain_are_removed() {
        let mut fractures = crossing_pair();
        fractures.push(
            Fracture::from_coordinates([
                [10., 11., 11., 10.],
                [0., 0., 1., 1.],
                [0., 0., 0., 0.],
            ])
            .unwrap(),
        );
        let mut network = FractureNetwork::new(fractures);
        network
            .impose_external_boundary(three_fracture_domain())
            .unwrap();
        assert_eq!(network.num_fractures(), 2);
        assert!(network.fracture(2).is_none());
        // boundary ids continue after the removed fracture
        assert_eq!(network.fracture(3).map(|f| f.kind()), Some(FractureKind::DomainBoundary));
    }

    #[test]
    fn coplanar_overlap_is_a_warning() {
        let square = |x0: f64| {
            Fracture::from_coordinates([
                [x0, x0 + 1., x0 + 1., x0],
                [0., 0., 1., 1.],
                [0., 0., 0., 0.],
            ])
            .unwrap()
        };
        let mut network = FractureNetwork::new([square(0.), square(0.5)]);
        assert!(network.find_intersections().is_empty());
        assert_eq!(
            network.warnings(),
            &[ToleranceConflict::CoplanarFractures {
                first: 0,
                second: 1
            }]
        );
    }

    #[test]
    fn invalid_tolerance_is_rejected() {
        assert!(FractureNetwork::with_tolerance(crossing_pair(), -1.).is_err());
        assert!(FractureNetwork::with_tolerance(crossing_pair(), f64::NAN).is_err());
        let network = FractureNetwork::with_tolerance(crossing_pair(), 1e-6).unwrap();
        assert_eq!(network.tol(), 1e-6);
    }
}
