//! Grids of different dimensions connected into a graph.
//!
//! A [`GridBucket`] holds every grid of a mixed-dimensional mesh
//! and a [`Coupling`] for each pair of grids where the cells of one
//! coincide with faces of the other, one dimension higher.

use fixedbitset as fb;
use nalgebra_sparse as nas;

use itertools::Itertools;
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};

use crate::{
    grid::{row_slices, Grid},
    mesher::MeshGenerationError,
};

/// Mapping between the cells of a grid
/// and the faces they coincide with in a grid one dimension higher.
#[derive(Clone, Debug)]
pub struct Coupling {
    higher: usize,
    lower: usize,
    /// lower cells × higher faces, values 1
    face_cells: nas::CsrMatrix<i8>,
}

impl Coupling {
    /// Index of the higher-dimensional grid in the bucket.
    #[inline]
    pub fn higher(&self) -> usize {
        self.higher
    }

    /// Index of the lower-dimensional grid in the bucket.
    #[inline]
    pub fn lower(&self) -> usize {
        self.lower
    }

    /// The mapping as a sparse matrix
    /// with a row per cell of the lower grid
    /// and a column per face of the higher grid.
    #[inline]
    pub fn face_cells(&self) -> &nas::CsrMatrix<i8> {
        &self.face_cells
    }

    /// Faces of the higher grid coinciding with a cell of the lower grid.
    /// After splitting there are two, one for each side.
    #[inline]
    pub fn faces_of_cell(&self, cell: usize) -> &[usize] {
        row_slices(&self.face_cells, cell).0
    }

    /// Number of lower cells with at least one face.
    pub fn num_matched_cells(&self) -> usize {
        self.face_cells
            .row_iter()
            .filter(|row| row.nnz() > 0)
            .count()
    }
}

/// A mixed-dimensional grid: grids as nodes of a graph,
/// couplings between grids of adjacent dimensions as its edges.
#[derive(Clone, Debug, Default)]
pub struct GridBucket {
    grids: Vec<Grid>,
    couplings: Vec<Coupling>,
}

impl GridBucket {
    /// All grids, in decreasing order of dimension.
    #[inline]
    pub fn grids(&self) -> &[Grid] {
        &self.grids
    }

    /// The grid with the given index.
    #[inline]
    pub fn grid(&self, idx: usize) -> &Grid {
        &self.grids[idx]
    }

    /// Number of grids.
    #[inline]
    pub fn num_grids(&self) -> usize {
        self.grids.len()
    }

    /// Grids of the given dimension with their indices.
    pub fn grids_of_dim(&self, dim: usize) -> impl '_ + Iterator<Item = (usize, &Grid)> {
        self.grids
            .iter()
            .enumerate()
            .filter(move |(_, g)| g.dim() == dim)
    }

    /// All couplings.
    #[inline]
    pub fn couplings(&self) -> &[Coupling] {
        &self.couplings
    }

    /// The coupling between two grids, if there is one.
    pub fn coupling(&self, higher: usize, lower: usize) -> Option<&Coupling> {
        self.couplings
            .iter()
            .find(|c| c.higher == higher && c.lower == lower)
    }

    /// Indices of the grids coupled to the given one, in either direction.
    pub fn neighbours(&self, grid: usize) -> impl '_ + Iterator<Item = usize> {
        self.couplings.iter().filter_map(move |c| {
            if c.higher == grid {
                Some(c.lower)
            } else if c.lower == grid {
                Some(c.higher)
            } else {
                None
            }
        })
    }

    /// Highest dimension of any grid, or `None` if the bucket is empty.
    pub fn dim_max(&self) -> Option<usize> {
        self.grids.iter().map(|g| g.dim()).max()
    }

    /// Number of cells summed over all grids.
    pub fn num_cells_total(&self) -> usize {
        self.grids.iter().map(|g| g.num_cells()).sum()
    }

    /// Take the grids out of the bucket.
    pub fn into_grids(self) -> Vec<Grid> {
        self.grids
    }
}

/// Sorted global indices of the given local nodes of a grid.
fn global_key(grid: &Grid, nodes: &[usize]) -> Vec<usize> {
    nodes
        .iter()
        .map(|&n| grid.global_point_ind()[n])
        .sorted_unstable()
        .collect()
}

/// Tag the boundary faces of every grid.
///
/// Boundary faces of the highest-dimensional grid are on the domain boundary.
/// Boundary faces of lower-dimensional grids are on the domain boundary
/// if their nodes make up part of a boundary face of the highest grid,
/// and otherwise are tips.
/// The exception are end points of 1D grids shared with another 1D grid
/// or a 0D grid, where an intersection line meets other fractures;
/// these get no tag.
pub fn tag_faces(grids: &mut [Grid]) {
    let Some(top) = grids.iter().position_max_by_key(|g| g.dim()) else {
        return;
    };

    let top_grid = &grids[top];
    let top_boundary: Vec<Vec<usize>> = top_grid
        .boundary_faces()
        .map(|f| global_key(top_grid, top_grid.nodes_of_face(f)))
        .collect();
    // every sub-simplex of a boundary face is on the boundary
    let mut on_boundary: HashSet<Vec<usize>> = HashSet::new();
    for key in &top_boundary {
        for size in 1..=key.len() {
            on_boundary.extend(key.iter().copied().combinations(size));
        }
    }

    // how many 1D grids and whether a 0D grid contain each global node
    let mut line_count: HashMap<usize, usize> = HashMap::new();
    let mut at_point: HashSet<usize> = HashSet::new();
    for grid in grids.iter() {
        match grid.dim() {
            1 => {
                for &g in grid.global_point_ind().iter().unique() {
                    *line_count.entry(g).or_default() += 1;
                }
            }
            0 => at_point.extend(grid.global_point_ind().iter().copied()),
            _ => {}
        }
    }
    let is_junction =
        |g: &usize| at_point.contains(g) || line_count.get(g).is_some_and(|&count| count >= 2);

    for (idx, grid) in grids.iter_mut().enumerate() {
        let boundary: Vec<usize> = grid.boundary_faces().collect();
        let (mut num_domain, mut num_tip) = (0, 0);
        for face in boundary {
            let key = global_key(grid, grid.nodes_of_face(face));
            if idx == top || on_boundary.contains(&key) {
                grid.tags_mut().domain_boundary.insert(face);
                num_domain += 1;
            } else if grid.dim() == 1 && key.iter().all(is_junction) {
                continue;
            } else {
                grid.tags_mut().tip.insert(face);
                num_tip += 1;
            }
        }
        debug!(
            "grid {} ({}D): {} domain boundary faces, {} tip faces",
            idx,
            grid.dim(),
            num_domain,
            num_tip
        );
    }
}

/// Connect grids whose cells coincide with faces of a grid one dimension higher.
///
/// A cell matches a face if they have the same global nodes
/// and their centers are within `tol` of each other.
/// Grids with no matching cells aren't coupled.
/// If only some cells of a grid match, `ensure_matching_face_cell`
/// decides whether that's an error or the unmatched cells are left out
/// of the coupling with a warning.
/// The same holds for grids below the top dimension
/// that end up with no coupling at all.
///
/// Matched faces of the higher grid get the `fracture` tag
/// and lose the `tip` tag, since they are bounded by another grid.
pub fn assemble_in_bucket(
    grids: Vec<Grid>,
    tol: f64,
    ensure_matching_face_cell: bool,
) -> Result<GridBucket, MeshGenerationError> {
    let mut grids = grids;
    // keep the order stable within each dimension
    grids.sort_by_key(|g| std::cmp::Reverse(g.dim()));
    let dim_max = grids.first().map(|g| g.dim());

    let mut couplings = Vec::new();
    for higher in 0..grids.len() {
        let hi = &grids[higher];
        if hi.dim() == 0 || !grids.iter().any(|g| g.dim() + 1 == hi.dim()) {
            continue;
        }
        let face_keys: HashMap<Vec<usize>, usize> = (0..hi.num_faces())
            .map(|f| (global_key(hi, hi.nodes_of_face(f)), f))
            .collect();

        for lower in (0..grids.len()).filter(|&l| grids[l].dim() + 1 == hi.dim()) {
            let lo = &grids[lower];
            let mut coo = nas::CooMatrix::new(lo.num_cells(), hi.num_faces());
            let mut matched = 0;
            for cell in 0..lo.num_cells() {
                let key = global_key(lo, &lo.nodes_of_cell(cell));
                let Some(&face) = face_keys.get(&key) else {
                    continue;
                };
                let distance = (lo.geometry().cell_centers[cell]
                    - hi.geometry().face_centers[face])
                    .norm();
                if distance <= tol {
                    coo.push(cell, face, 1);
                    matched += 1;
                } else {
                    debug!(
                        "cell {} of grid {} shares nodes with face {} of grid {} but is {} away",
                        cell, lower, face, higher, distance
                    );
                }
            }
            if matched == 0 {
                continue;
            }
            let unmatched = lo.num_cells() - matched;
            if unmatched > 0 {
                if ensure_matching_face_cell {
                    return Err(MeshGenerationError::FaceCellMismatch {
                        higher,
                        lower,
                        unmatched,
                        total: lo.num_cells(),
                    });
                }
                warn!(
                    "{} of {} cells of grid {} have no matching face in grid {}, leaving them out",
                    unmatched,
                    lo.num_cells(),
                    lower,
                    higher
                );
            }
            couplings.push(Coupling {
                higher,
                lower,
                face_cells: nas::CsrMatrix::from(&coo),
            });
        }
    }

    for coupling in &couplings {
        let faces: Vec<usize> = coupling.face_cells.col_indices().to_vec();
        let tags = grids[coupling.higher].tags_mut();
        for face in faces {
            tags.fracture.insert(face);
            tags.tip.set(face, false);
        }
    }

    for (idx, grid) in grids.iter().enumerate() {
        if Some(grid.dim()) == dim_max || couplings.iter().any(|c| c.lower == idx) {
            continue;
        }
        if ensure_matching_face_cell {
            return Err(MeshGenerationError::UncoupledGrid {
                grid: idx,
                dim: grid.dim(),
            });
        }
        warn!(
            "grid {} ({}D) is not embedded in any grid of dimension {}",
            idx,
            grid.dim(),
            grid.dim() + 1
        );
    }

    info!(
        "assembled {} grids with {} couplings",
        grids.len(),
        couplings.len()
    );
    Ok(GridBucket { grids, couplings })
}

/// Open up every grid along the grids coupled to it from below.
///
/// Each face coinciding with a lower-dimensional cell is split in two,
/// one for the cell on each side,
/// and nodes on those faces are duplicated where the cells around them
/// are no longer connected.
/// The couplings are updated to map each lower cell to both faces.
/// Cell counts don't change.
pub fn split_fractures(bucket: &mut GridBucket) {
    for higher in 0..bucket.grids.len() {
        let coupled: Vec<usize> = (0..bucket.couplings.len())
            .filter(|&c| bucket.couplings[c].higher == higher)
            .collect();
        if coupled.is_empty() {
            continue;
        }
        let faces: Vec<usize> = coupled
            .iter()
            .flat_map(|&c| bucket.couplings[c].face_cells.col_indices().iter().copied())
            .sorted_unstable()
            .dedup()
            .collect();

        let grid = &mut bucket.grids[higher];
        let before = (grid.num_cells(), grid.num_faces(), grid.num_nodes());
        let copies: HashMap<usize, usize> = faces
            .iter()
            .zip(grid.split_faces(&faces))
            .filter_map(|(&face, copy)| Some((face, copy?)))
            .collect();
        let num_faces = grid.num_faces();

        let mut fracture_faces = fb::FixedBitSet::with_capacity(num_faces);
        for (&face, &copy) in &copies {
            fracture_faces.insert(face);
            fracture_faces.insert(copy);
        }
        let added_nodes = grid.split_nodes(&fracture_faces);

        for &c in &coupled {
            let coupling = &mut bucket.couplings[c];
            let mut coo = nas::CooMatrix::new(coupling.face_cells.nrows(), num_faces);
            for (cell, row) in coupling.face_cells.row_iter().enumerate() {
                for &face in row.col_indices() {
                    coo.push(cell, face, 1);
                    if let Some(&copy) = copies.get(&face) {
                        coo.push(cell, copy, 1);
                    }
                }
            }
            coupling.face_cells = nas::CsrMatrix::from(&coo);
        }

        let after = (grid.num_cells(), grid.num_faces(), grid.num_nodes());
        info!(
            "split grid {} ({}D): cells {} -> {}, faces {} -> {}, nodes {} -> {}",
            higher,
            grid.dim(),
            before.0,
            after.0,
            before.1,
            after.1,
            before.2,
            after.2
        );
        debug!(
            "grid {}: {} faces and {} nodes duplicated",
            higher,
            copies.len(),
            added_nodes
        );
    }
}
