//! The seam between a decomposed fracture network and a volumetric mesher.
//!
//! A [`Mesher`] takes the [`Decomposition`] of a network
//! and produces a [`RawMesh`]: one node list shared by all regions,
//! tetrahedra for the volume and lower-dimensional elements
//! for every fracture, intersection line and intersection point.
//! The raw mesh is then cut into one [`Grid`] per region.

use log::debug;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::{
    grid::{Grid, GridError},
    network::Decomposition,
    Vec3,
};

/// Error in generating a mesh or reading it back.
#[derive(thiserror::Error, Debug)]
pub enum MeshGenerationError {
    /// The mesh configuration is unusable.
    #[error("invalid mesh configuration: {0}")]
    InvalidConfig(String),
    /// The geometry has nothing to mesh.
    #[error("nothing to mesh: {0}")]
    EmptyGeometry(&'static str),
    /// The mesher process couldn't be started.
    #[error("failed to launch mesher `{program}`")]
    Launch {
        /// Program that was run.
        program: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The mesher exited with an error.
    #[error("mesher failed ({status}):\n{diagnostics}")]
    Failed {
        /// Exit status as reported by the OS.
        status: String,
        /// Output of the mesher.
        diagnostics: String,
    },
    /// The mesher didn't finish within the time limit and was killed.
    #[error("mesher did not finish within {limit:?}:\n{diagnostics}")]
    Timeout {
        /// The time limit.
        limit: Duration,
        /// Output of the mesher up to the point it was killed.
        diagnostics: String,
    },
    /// The mesher exited successfully but wrote no mesh.
    #[error("mesher produced no output:\n{diagnostics}")]
    MissingOutput {
        /// Output of the mesher.
        diagnostics: String,
    },
    /// Error parsing the mesh file.
    ///
    /// (parser errors are converted to strings
    /// because they borrow from the input bytes)
    #[error("parsing the mesh failed: {0}")]
    Parse(String),
    /// The mesh contains no nodes.
    #[error("invalid mesh: no nodes")]
    MissingNodes,
    /// The mesh contains no elements of a required kind.
    #[error("invalid mesh: no {0}")]
    MissingElements(&'static str),
    /// Cells of a lower-dimensional grid don't match faces of the grid around it.
    #[error(
        "{unmatched} of {total} cells of grid {lower} have no matching face in grid {higher}"
    )]
    FaceCellMismatch {
        /// Index of the higher-dimensional grid.
        higher: usize,
        /// Index of the lower-dimensional grid.
        lower: usize,
        /// Number of cells without a matching face.
        unmatched: usize,
        /// Number of cells in the lower grid.
        total: usize,
    },
    /// A lower-dimensional grid isn't embedded in any grid one dimension higher.
    #[error("grid {grid} ({dim}D) is not embedded in any grid of dimension {}", dim + 1)]
    UncoupledGrid {
        /// Index of the grid.
        grid: usize,
        /// Its dimension.
        dim: usize,
    },
    /// The mesh elements don't form a valid grid.
    #[error(transparent)]
    Grid(#[from] GridError),
    /// I/O error around the mesher's files.
    #[error("mesher I/O failed")]
    Io(#[from] std::io::Error),
}

/// Parameters controlling mesh generation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshConfig {
    /// Target element size on and away from the fractures.
    pub mesh_size_frac: f64,
    /// Smallest element size, used where geometry points are close together.
    pub mesh_size_min: f64,
    /// Target element size on the domain boundary.
    /// Defaults to `mesh_size_frac` when not given.
    pub mesh_size_bound: Option<f64>,
    /// If true, every cell of a lower-dimensional grid must coincide with
    /// a face of the grid around it, and any mismatch is an error.
    /// If false, unmatched cells are left out of the coupling with a warning.
    pub ensure_matching_face_cell: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            mesh_size_frac: 0.5,
            mesh_size_min: 0.1,
            mesh_size_bound: None,
            ensure_matching_face_cell: true,
        }
    }
}

impl MeshConfig {
    /// Check that the sizes are positive, finite and consistently ordered.
    pub fn validate(&self) -> Result<(), MeshGenerationError> {
        let sizes = [
            ("mesh_size_frac", Some(self.mesh_size_frac)),
            ("mesh_size_min", Some(self.mesh_size_min)),
            ("mesh_size_bound", self.mesh_size_bound),
        ];
        for (name, size) in sizes {
            if let Some(size) = size {
                if !size.is_finite() || size <= 0. {
                    return Err(MeshGenerationError::InvalidConfig(format!(
                        "{name} must be positive, got {size}"
                    )));
                }
            }
        }
        if self.mesh_size_min > self.mesh_size_frac {
            return Err(MeshGenerationError::InvalidConfig(format!(
                "mesh_size_min ({}) exceeds mesh_size_frac ({})",
                self.mesh_size_min, self.mesh_size_frac
            )));
        }
        Ok(())
    }

    /// Target size on the domain boundary.
    #[inline]
    pub fn boundary_size(&self) -> f64 {
        self.mesh_size_bound.unwrap_or(self.mesh_size_frac)
    }
}

/// A region of the mesh, which becomes one grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MeshRegion {
    /// The volume inside the domain.
    Domain,
    /// The fracture with the given id.
    Fracture(usize),
    /// The intersection line with the given index in the decomposition.
    IntersectionLine(usize),
    /// The intersection point with the given index in the decomposition.
    IntersectionPoint(usize),
}

const FRACTURE_TAG_OFFSET: i32 = 1_000_000;
const LINE_TAG_OFFSET: i32 = 2_000_000;
const POINT_TAG_OFFSET: i32 = 3_000_000;

impl MeshRegion {
    /// Dimension of the grid made from this region.
    pub fn dim(&self) -> usize {
        match self {
            Self::Domain => 3,
            Self::Fracture(_) => 2,
            Self::IntersectionLine(_) => 1,
            Self::IntersectionPoint(_) => 0,
        }
    }

    /// Physical group tag identifying this region in a mesh file.
    pub fn physical_tag(&self) -> i32 {
        match *self {
            Self::Domain => 1,
            Self::Fracture(id) => FRACTURE_TAG_OFFSET + id as i32,
            Self::IntersectionLine(i) => LINE_TAG_OFFSET + i as i32,
            Self::IntersectionPoint(i) => POINT_TAG_OFFSET + i as i32,
        }
    }

    /// Inverse of [`physical_tag`][Self::physical_tag],
    /// checking that the tag belongs to an entity of the right dimension.
    pub fn from_physical_tag(dim: usize, tag: i32) -> Option<Self> {
        let region = match tag {
            1 => Self::Domain,
            t if t >= POINT_TAG_OFFSET => Self::IntersectionPoint((t - POINT_TAG_OFFSET) as usize),
            t if t >= LINE_TAG_OFFSET => Self::IntersectionLine((t - LINE_TAG_OFFSET) as usize),
            t if t >= FRACTURE_TAG_OFFSET => Self::Fracture((t - FRACTURE_TAG_OFFSET) as usize),
            _ => return None,
        };
        (region.dim() == dim).then_some(region)
    }
}

/// An external program or function that meshes a decomposed network.
///
/// The produced mesh must conform to the decomposition:
/// every sub-polygon is covered by triangles that are faces of tetrahedra,
/// every intersection line by segments that are edges of those triangles,
/// and every intersection point is a node.
pub trait Mesher {
    /// Mesh the volume bounded by the domain boundary polygons
    /// with the fracture polygons embedded in it.
    fn generate(
        &self,
        geometry: &Decomposition,
        config: &MeshConfig,
    ) -> Result<RawMesh, MeshGenerationError>;
}

impl<F> Mesher for F
where
    F: Fn(&Decomposition, &MeshConfig) -> Result<RawMesh, MeshGenerationError>,
{
    fn generate(
        &self,
        geometry: &Decomposition,
        config: &MeshConfig,
    ) -> Result<RawMesh, MeshGenerationError> {
        self(geometry, config)
    }
}

/// Mesh elements of every region indexing into a shared node list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawMesh {
    /// Coordinates of all nodes.
    pub nodes: Vec<Vec3>,
    /// Tetrahedra of the volume.
    pub tetrahedra: Vec<[usize; 4]>,
    /// Triangles of each fracture, keyed by fracture id.
    pub fracture_triangles: BTreeMap<usize, Vec<[usize; 3]>>,
    /// Segments of each intersection line, keyed by line index.
    pub line_segments: BTreeMap<usize, Vec<[usize; 2]>>,
    /// Node of each intersection point, keyed by point index.
    pub points: BTreeMap<usize, usize>,
}

impl RawMesh {
    /// Cut the mesh into one grid per region,
    /// ordered by decreasing dimension and then by region.
    ///
    /// Each grid gets its own compact set of nodes,
    /// with the index of each node in [`nodes`][Self::nodes]
    /// stored as its global point index.
    pub fn grids(&self) -> Result<Vec<Grid>, GridError> {
        let mut grids = Vec::with_capacity(
            1 + self.fracture_triangles.len() + self.line_segments.len() + self.points.len(),
        );
        if !self.tetrahedra.is_empty() {
            grids.push(self.sub_grid(3, &self.tetrahedra, MeshRegion::Domain)?);
        }
        for (&id, triangles) in &self.fracture_triangles {
            grids.push(self.sub_grid(2, triangles, MeshRegion::Fracture(id))?);
        }
        for (&idx, segments) in &self.line_segments {
            grids.push(self.sub_grid(1, segments, MeshRegion::IntersectionLine(idx))?);
        }
        for (&idx, &node) in &self.points {
            let Some(&p) = self.nodes.get(node) else {
                return Err(GridError::NodeOutOfRange {
                    cell: 0,
                    node,
                    num_nodes: self.nodes.len(),
                });
            };
            grids.push(
                Grid::point(p)
                    .with_global_point_ind(vec![node])
                    .with_region(MeshRegion::IntersectionPoint(idx)),
            );
        }
        debug!(
            "Raw mesh with {} nodes cut into {} grids",
            self.nodes.len(),
            grids.len()
        );
        Ok(grids)
    }

    fn sub_grid<const N: usize>(
        &self,
        dim: usize,
        cells: &[[usize; N]],
        region: MeshRegion,
    ) -> Result<Grid, GridError> {
        let simplex_size = N;
        let cells: Vec<usize> = cells.iter().flatten().copied().collect();
        if let Some((pos, &node)) = cells
            .iter()
            .enumerate()
            .find(|(_, &n)| n >= self.nodes.len())
        {
            return Err(GridError::NodeOutOfRange {
                cell: pos / simplex_size,
                node,
                num_nodes: self.nodes.len(),
            });
        }

        let mut used: Vec<usize> = cells.clone();
        used.sort_unstable();
        used.dedup();
        let mut local = vec![usize::MAX; self.nodes.len()];
        for (i, &g) in used.iter().enumerate() {
            local[g] = i;
        }
        let nodes: Vec<Vec3> = used.iter().map(|&g| self.nodes[g]).collect();
        let cells: Vec<usize> = cells.iter().map(|&g| local[g]).collect();

        Ok(Grid::from_simplices(dim, nodes, cells)?
            .with_global_point_ind(used)
            .with_region(region))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::grid::tests::cube_tets;
    use approx::assert_relative_eq;

    /// Tetrahedra of `[0, 2]^3` with the plane x = 1 as fracture 0,
    /// the plane y = 1 as fracture 1 and their intersection line as line 0.
    pub(crate) fn crossing_planes_mesh() -> RawMesh {
        let (nodes, cells) = cube_tets(2);
        let tetrahedra: Vec<[usize; 4]> = cells
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect();
        let on = |axis: usize, n: usize| (nodes[n][axis] - 1.).abs() < 1e-12;

        // boundary faces of tets lying in a plane are triangles of that plane
        let mut planes: [Vec<[usize; 3]>; 2] = [Vec::new(), Vec::new()];
        for tet in &tetrahedra {
            for exclude in 0..4 {
                let tri: Vec<usize> = (0..4).filter(|&i| i != exclude).map(|i| tet[i]).collect();
                let mut tri = [tri[0], tri[1], tri[2]];
                tri.sort_unstable();
                for (axis, plane) in planes.iter_mut().enumerate() {
                    if tri.iter().all(|&n| on(axis, n)) && !plane.contains(&tri) {
                        plane.push(tri);
                    }
                }
            }
        }
        let idx = |i: usize, j: usize, k: usize| i + 3 * (j + 3 * k);
        let segments = vec![[idx(1, 1, 0), idx(1, 1, 1)], [idx(1, 1, 1), idx(1, 1, 2)]];
        let [x_plane, y_plane] = planes;

        RawMesh {
            nodes,
            tetrahedra,
            fracture_triangles: BTreeMap::from([(0, x_plane), (1, y_plane)]),
            line_segments: BTreeMap::from([(0, segments)]),
            points: BTreeMap::new(),
        }
    }

    #[test]
    fn config_validation() {
        assert!(MeshConfig::default().validate().is_ok());
        let bad = [
            MeshConfig {
                mesh_size_frac: 0.,
                ..Default::default()
            },
            MeshConfig {
                mesh_size_min: f64::NAN,
                ..Default::default()
            },
            MeshConfig {
                mesh_size_bound: Some(-1.),
                ..Default::default()
            },
            MeshConfig {
                mesh_size_frac: 0.2,
                mesh_size_min: 0.7,
                ..Default::default()
            },
        ];
        for config in bad {
            assert!(matches!(
                config.validate(),
                Err(MeshGenerationError::InvalidConfig(_))
            ));
        }
        let config = MeshConfig {
            mesh_size_frac: 0.7,
            mesh_size_min: 0.2,
            ..Default::default()
        };
        assert_relative_eq!(config.boundary_size(), 0.7);
    }

    #[test]
    fn physical_tags() {
        let regions = [
            MeshRegion::Domain,
            MeshRegion::Fracture(0),
            MeshRegion::Fracture(12),
            MeshRegion::IntersectionLine(3),
            MeshRegion::IntersectionPoint(0),
        ];
        for region in regions {
            assert_eq!(
                MeshRegion::from_physical_tag(region.dim(), region.physical_tag()),
                Some(region)
            );
        }
        // wrong dimension or unknown tag
        assert_eq!(MeshRegion::from_physical_tag(2, 1), None);
        assert_eq!(MeshRegion::from_physical_tag(1, 1_000_004), None);
        assert_eq!(MeshRegion::from_physical_tag(3, 7), None);
    }

    #[test]
    fn raw_mesh_into_grids() {
        let mut mesh = crossing_planes_mesh();
        let center = 1 + 3 * (1 + 3);
        mesh.points.insert(0, center);
        let grids = mesh.grids().unwrap();

        let dims: Vec<usize> = grids.iter().map(|g| g.dim()).collect();
        assert_eq!(dims, vec![3, 2, 2, 1, 0]);
        assert_eq!(grids[0].num_nodes(), 27);
        assert_eq!(grids[0].region(), Some(MeshRegion::Domain));
        assert_eq!(grids[2].region(), Some(MeshRegion::Fracture(1)));

        // each plane is a 2x2 square of 8 triangles with 9 nodes
        for g in &grids[1..3] {
            assert_eq!(g.num_cells(), 8);
            assert_eq!(g.num_nodes(), 9);
            let area: f64 = g.geometry().cell_volumes.iter().sum();
            assert_relative_eq!(area, 4.);
            // local nodes sit where their global counterparts are
            for (local, &global) in g.global_point_ind().iter().enumerate() {
                assert_relative_eq!(g.nodes()[local], mesh.nodes[global]);
            }
        }
        assert_eq!(grids[3].num_cells(), 2);
        assert_eq!(grids[3].global_point_ind(), &[4, 13, 22]);
        assert_eq!(grids[4].global_point_ind(), &[center]);
        assert_relative_eq!(grids[4].nodes()[0], Vec3::new(1., 1., 1.));
    }

    #[test]
    fn closure_mesher() {
        let mesher = |_: &Decomposition,
                      config: &MeshConfig|
         -> Result<RawMesh, MeshGenerationError> {
            config.validate()?;
            Ok(crossing_planes_mesh())
        };
        let mut network = crate::FractureNetwork::new([]);
        let domain = crate::Domain::new(Vec3::zeros(), Vec3::new(2., 2., 2.)).unwrap();
        network.impose_external_boundary(domain).unwrap();
        let decomposition = network.split_intersections().clone();
        let mesh = mesher.generate(&decomposition, &MeshConfig::default()).unwrap();
        assert_eq!(mesh.tetrahedra.len(), 48);
    }

    #[test]
    fn out_of_range_node() {
        let mesh = RawMesh {
            nodes: vec![Vec3::zeros(), Vec3::x()],
            line_segments: BTreeMap::from([(0, vec![[0, 2]])]),
            ..Default::default()
        };
        assert_eq!(
            mesh.grids().unwrap_err(),
            GridError::NodeOutOfRange {
                cell: 0,
                node: 2,
                num_nodes: 2
            }
        );
    }
}
