//! Conforming mixed-dimensional meshes of three-dimensional fracture networks.
//!
//! The pipeline goes from a set of planar convex polygons (the fractures)
//! to a [`GridBucket`]: a 3D simplex grid of the domain,
//! a 2D grid per fracture, a 1D grid per line where two fractures meet
//! and a 0D grid per point where intersection lines cross,
//! connected by mappings between the cells of each lower-dimensional grid
//! and the faces of the grid one dimension above.
//!
//! The steps are
//! 1. describe the fractures ([`Fracture`]) and collect them into a [`FractureNetwork`],
//! 2. clip the network to a [`Domain`] box,
//!    find pairwise intersections and split the fractures into
//!    non-overlapping sub-polygons that respect every intersection
//!    (see [`FractureNetwork`] for the stages involved),
//! 3. generate a conforming simplex mesh with a [`Mesher`]
//!    (by default [`GmshMesher`], which drives the external `gmsh` program),
//! 4. convert the mesh into grids, tag their faces,
//!    assemble them into a [`GridBucket`] and split the 3D grid along the fractures.
//!
//! [`meshing::simplex_grid`] runs all of these in order.

#![warn(missing_docs)]

pub mod geometry;
pub use geometry::{GeometryError, Plane, PlaneFrame};

pub mod fracture;
pub use fracture::{Domain, EllipseParameters, Fracture, FractureKind};

pub mod network;
pub use network::{
    Decomposition, FractureNetwork, Intersection, IntersectionShape, SequenceError, Stage,
    ToleranceConflict,
};

pub mod mesher;
pub use mesher::{MeshConfig, MeshGenerationError, MeshRegion, Mesher, RawMesh};

pub mod gmsh;
pub use gmsh::GmshMesher;

pub mod grid;
pub use grid::{FaceKind, Grid, GridError};

pub mod bucket;
pub use bucket::{Coupling, GridBucket};

pub mod meshing;
pub use meshing::simplex_grid;

//
// re-exports and type aliases
//

pub use nalgebra as na;
pub use nalgebra_sparse as nas;

/// Type alias for a 2D vector, used for coordinates inside the plane of a fracture.
pub type Vec2 = na::Vector2<f64>;
/// Type alias for a 3D vector.
pub type Vec3 = na::Vector3<f64>;

/// Default geometric tolerance.
///
/// Points closer than this are treated as the same point
/// throughout a [`FractureNetwork`].
pub const DEFAULT_TOL: f64 = 1e-4;

/// Any error that can end the meshing pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed geometric input.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    /// An operation was requested at the wrong stage of network processing.
    #[error(transparent)]
    Sequence(#[from] SequenceError),
    /// The mesher failed or its output couldn't be used.
    #[error(transparent)]
    MeshGeneration(#[from] MeshGenerationError),
    /// A grid could not be built from the mesh.
    #[error(transparent)]
    Grid(#[from] GridError),
    /// There is nothing to mesh.
    #[error("the fracture network contains no fractures and has no domain")]
    EmptyNetwork,
}
