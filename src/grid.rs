//! Simplex grids of dimension 0 to 3 described through their faces.
//!
//! Connectivity is stored as two sparse matrices with one row per face:
//! `face_nodes` with the nodes of each face,
//! and `cell_faces` with the (at most two) cells each face separates.
//! The sign of a face-cell entry tells whether the face normal
//! points out of (+1) or into (-1) the cell.
//! Geometric quantities are computed lazily from the nodes.

mod construction;
mod split;

use fixedbitset as fb;
use nalgebra_sparse as nas;

use itertools::Itertools;
use std::cell::OnceCell;

use crate::{mesher::MeshRegion, Vec3};

/// Error in building a grid from cells.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum GridError {
    /// Only grids of dimension 0 to 3 exist.
    #[error("grids of dimension {0} are not supported")]
    UnsupportedDimension(usize),
    /// The flat cell array doesn't divide into whole simplices.
    #[error("cell array of length {len} can't be split into simplices of {simplex_size} nodes")]
    RaggedCells {
        /// Length of the cell array.
        len: usize,
        /// Nodes per cell.
        simplex_size: usize,
    },
    /// A cell refers to a node that doesn't exist.
    #[error("cell {cell} refers to node {node} but the grid has {num_nodes} nodes")]
    NodeOutOfRange {
        /// Index of the cell.
        cell: usize,
        /// The invalid node index.
        node: usize,
        /// Number of nodes in the grid.
        num_nodes: usize,
    },
    /// A cell has the same node more than once.
    #[error("cell {0} has a repeated node")]
    DegenerateCell(usize),
    /// More than two cells share a face.
    #[error("face with nodes {nodes:?} is shared by more than two cells")]
    NonManifoldFace {
        /// Nodes of the face.
        nodes: Vec<usize>,
    },
}

/// Boolean face tags of a grid.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FaceTags {
    /// Faces on the boundary of the domain.
    pub domain_boundary: fb::FixedBitSet,
    /// Faces coinciding with a cell of a grid one dimension lower.
    pub fracture: fb::FixedBitSet,
    /// Boundary faces ending inside the domain.
    pub tip: fb::FixedBitSet,
}

impl FaceTags {
    fn with_capacity(num_faces: usize) -> Self {
        Self {
            domain_boundary: fb::FixedBitSet::with_capacity(num_faces),
            fracture: fb::FixedBitSet::with_capacity(num_faces),
            tip: fb::FixedBitSet::with_capacity(num_faces),
        }
    }

    fn grow(&mut self, num_faces: usize) {
        self.domain_boundary.grow(num_faces);
        self.fracture.grow(num_faces);
        self.tip.grow(num_faces);
    }
}

/// Classification of a face by its tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FaceKind {
    /// An interior face with no tags.
    Interior,
    /// On the domain boundary.
    DomainBoundary,
    /// On a lower-dimensional grid.
    Fracture,
    /// A boundary face inside the domain.
    Tip,
    /// A non-tip face of a 1D grid.
    /// These lie on the line where two fractures meet.
    Intersection,
}

/// Lazily computed geometry of a grid.
#[derive(Clone, Debug)]
pub struct GridGeometry {
    /// Length, area or volume of each cell (1 for 0D cells).
    pub cell_volumes: Vec<f64>,
    /// Barycenter of each cell.
    pub cell_centers: Vec<Vec3>,
    /// Length or area of each face (1 for the point faces of 1D grids).
    pub face_areas: Vec<f64>,
    /// Barycenter of each face.
    pub face_centers: Vec<Vec3>,
    /// Normal of each face scaled by its area,
    /// pointing out of the cell with a +1 in `cell_faces`.
    pub face_normals: Vec<Vec3>,
}

/// A simplex grid.
#[derive(Clone, Debug)]
pub struct Grid {
    dim: usize,
    nodes: Vec<Vec3>,
    /// faces × nodes, values 1
    face_nodes: nas::CsrMatrix<i8>,
    /// faces × cells, values ±1
    cell_faces: nas::CsrMatrix<i8>,
    global_point_ind: Vec<usize>,
    tags: FaceTags,
    region: Option<MeshRegion>,
    /// transpose of `cell_faces`
    faces_of_cells: OnceCell<nas::CsrMatrix<i8>>,
    geometry: OnceCell<GridGeometry>,
}

impl Grid {
    /// Build a grid of dimension 1 to 3 from nodes and simplex cells.
    ///
    /// The cells are given as a flat array,
    /// where every `dim + 1` node indices make up one cell.
    /// Global point indices default to the local ones.
    pub fn from_simplices(
        dim: usize,
        nodes: Vec<Vec3>,
        cells: Vec<usize>,
    ) -> Result<Self, GridError> {
        if !(1..=3).contains(&dim) {
            return Err(GridError::UnsupportedDimension(dim));
        }
        let (face_nodes, cell_faces) =
            construction::simplex_connectivity(dim, nodes.len(), cells)?;
        Ok(Self::from_parts(dim, nodes, face_nodes, cell_faces))
    }

    /// A 0D grid consisting of a single point cell with no faces.
    pub fn point(node: Vec3) -> Self {
        Self::from_parts(
            0,
            vec![node],
            nas::CsrMatrix::zeros(0, 1),
            nas::CsrMatrix::zeros(0, 1),
        )
    }

    fn from_parts(
        dim: usize,
        nodes: Vec<Vec3>,
        face_nodes: nas::CsrMatrix<i8>,
        cell_faces: nas::CsrMatrix<i8>,
    ) -> Self {
        let num_faces = face_nodes.nrows();
        Self {
            dim,
            global_point_ind: (0..nodes.len()).collect(),
            nodes,
            face_nodes,
            cell_faces,
            tags: FaceTags::with_capacity(num_faces),
            region: None,
            faces_of_cells: OnceCell::new(),
            geometry: OnceCell::new(),
        }
    }

    /// Set the indices of the nodes in the mesh the grid was cut from.
    ///
    /// # Panics
    /// If the number of indices doesn't match the number of nodes.
    pub fn with_global_point_ind(mut self, global_point_ind: Vec<usize>) -> Self {
        assert_eq!(
            global_point_ind.len(),
            self.nodes.len(),
            "every node needs a global index"
        );
        self.global_point_ind = global_point_ind;
        self
    }

    /// Set the mesh region the grid represents.
    pub fn with_region(mut self, region: MeshRegion) -> Self {
        self.region = Some(region);
        self
    }

    /// Drop cached data derived from the connectivity.
    fn invalidate(&mut self) {
        self.faces_of_cells = OnceCell::new();
        self.geometry = OnceCell::new();
    }

    /// Dimension of the cells.
    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The mesh region this grid represents, if known.
    #[inline]
    pub fn region(&self) -> Option<MeshRegion> {
        self.region
    }

    /// Number of nodes, including copies made by splitting.
    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of faces.
    #[inline]
    pub fn num_faces(&self) -> usize {
        self.face_nodes.nrows()
    }

    /// Number of cells.
    #[inline]
    pub fn num_cells(&self) -> usize {
        self.cell_faces.ncols()
    }

    /// Node coordinates.
    #[inline]
    pub fn nodes(&self) -> &[Vec3] {
        &self.nodes
    }

    /// For each node, its index in the mesh the grid was cut from.
    /// Nodes duplicated by splitting share a global index.
    #[inline]
    pub fn global_point_ind(&self) -> &[usize] {
        &self.global_point_ind
    }

    /// Face-node incidence, faces × nodes.
    #[inline]
    pub fn face_nodes(&self) -> &nas::CsrMatrix<i8> {
        &self.face_nodes
    }

    /// Signed face-cell incidence, faces × cells.
    #[inline]
    pub fn cell_faces(&self) -> &nas::CsrMatrix<i8> {
        &self.cell_faces
    }

    /// Face tags.
    #[inline]
    pub fn tags(&self) -> &FaceTags {
        &self.tags
    }

    /// Mutable access to the face tags.
    #[inline]
    pub fn tags_mut(&mut self) -> &mut FaceTags {
        &mut self.tags
    }

    /// Nodes of a face.
    #[inline]
    pub fn nodes_of_face(&self, face: usize) -> &[usize] {
        row_slices(&self.face_nodes, face).0
    }

    /// Cells on either side of a face and the signs of the face relative to them.
    #[inline]
    pub fn cells_of_face(&self, face: usize) -> (&[usize], &[i8]) {
        row_slices(&self.cell_faces, face)
    }

    /// Faces of a cell and their signs relative to it.
    pub fn faces_of_cell(&self, cell: usize) -> (&[usize], &[i8]) {
        let transpose = self
            .faces_of_cells
            .get_or_init(|| self.cell_faces.transpose());
        row_slices(transpose, cell)
    }

    /// Nodes of a cell in ascending order.
    pub fn nodes_of_cell(&self, cell: usize) -> Vec<usize> {
        if self.dim == 0 {
            return vec![0];
        }
        self.faces_of_cell(cell)
            .0
            .iter()
            .flat_map(|&f| self.nodes_of_face(f).iter().copied())
            .sorted_unstable()
            .dedup()
            .collect()
    }

    /// Faces with a cell on only one side.
    pub fn boundary_faces(&self) -> impl '_ + Iterator<Item = usize> {
        (0..self.num_faces()).filter(|&f| self.cell_faces.row(f).nnz() == 1)
    }

    /// Classify a face by its tags.
    ///
    /// Tips take precedence over other tags.
    /// In a 1D grid every face that isn't a tip is an
    /// [`Intersection`][FaceKind::Intersection] face.
    pub fn face_kind(&self, face: usize) -> FaceKind {
        if self.tags.tip.contains(face) {
            FaceKind::Tip
        } else if self.dim == 1 {
            FaceKind::Intersection
        } else if self.tags.fracture.contains(face) {
            FaceKind::Fracture
        } else if self.tags.domain_boundary.contains(face) {
            FaceKind::DomainBoundary
        } else {
            FaceKind::Interior
        }
    }

    /// Geometric quantities of the grid, computed on first access.
    pub fn geometry(&self) -> &GridGeometry {
        self.geometry.get_or_init(|| self.compute_geometry())
    }

    fn compute_geometry(&self) -> GridGeometry {
        let cell_nodes: Vec<Vec<usize>> =
            (0..self.num_cells()).map(|c| self.nodes_of_cell(c)).collect();
        let centroid = |nodes: &[usize]| {
            nodes.iter().map(|&n| self.nodes[n]).sum::<Vec3>() / nodes.len().max(1) as f64
        };

        let cell_centers: Vec<Vec3> = cell_nodes.iter().map(|ns| centroid(ns)).collect();
        let cell_volumes: Vec<f64> = cell_nodes
            .iter()
            .map(|ns| {
                let p: Vec<Vec3> = ns.iter().map(|&n| self.nodes[n]).collect();
                simplex_volume(&p)
            })
            .collect();

        let mut face_areas = Vec::with_capacity(self.num_faces());
        let mut face_centers = Vec::with_capacity(self.num_faces());
        let mut face_normals = Vec::with_capacity(self.num_faces());
        for face in 0..self.num_faces() {
            let nodes = self.nodes_of_face(face);
            let p: Vec<Vec3> = nodes.iter().map(|&n| self.nodes[n]).collect();
            let center = centroid(nodes);
            let (cells, signs) = self.cells_of_face(face);
            let (cell, sign) = (cells[0], signs[0]);
            let outward = center - cell_centers[cell];

            let (area, normal) = match self.dim {
                1 => (1., outward.normalize()),
                2 => {
                    let edge = p[1] - p[0];
                    let cn = &cell_nodes[cell];
                    let cell_normal = (self.nodes[cn[1]] - self.nodes[cn[0]])
                        .cross(&(self.nodes[cn[2]] - self.nodes[cn[0]]));
                    let length = edge.norm();
                    (length, edge.cross(&cell_normal).normalize() * length)
                }
                _ => {
                    let n = 0.5 * (p[1] - p[0]).cross(&(p[2] - p[0]));
                    (n.norm(), n)
                }
            };
            let normal = if normal.dot(&outward) < 0. {
                -normal
            } else {
                normal
            };

            face_areas.push(area);
            face_centers.push(center);
            face_normals.push(normal * sign as f64);
        }

        GridGeometry {
            cell_volumes,
            cell_centers,
            face_areas,
            face_centers,
            face_normals,
        }
    }
}

/// Column indices and values of a row of a sparse matrix,
/// borrowed from the matrix rather than a row view.
pub(crate) fn row_slices<T>(mat: &nas::CsrMatrix<T>, row: usize) -> (&[usize], &[T]) {
    let offsets = mat.row_offsets();
    let range = offsets[row]..offsets[row + 1];
    (&mat.col_indices()[range.clone()], &mat.values()[range])
}

/// Length, area or volume of a simplex given by its vertices
/// (1 for a single point).
fn simplex_volume(p: &[Vec3]) -> f64 {
    match p.len() {
        2 => (p[1] - p[0]).norm(),
        3 => 0.5 * (p[1] - p[0]).cross(&(p[2] - p[0])).norm(),
        4 => (p[1] - p[0]).dot(&(p[2] - p[0]).cross(&(p[3] - p[0]))).abs() / 6.,
        _ => 1.,
    }
}
