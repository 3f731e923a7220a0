use nalgebra_sparse as nas;

use itertools::{izip, Itertools};

use super::GridError;

/// Face-node and face-cell incidence of a simplex grid
/// given as a flat array where every `dim + 1` node indices make up one cell.
///
/// Faces are the `(dim - 1)`-simplices on the boundaries of cells,
/// deduplicated and ordered lexicographically by their sorted node indices.
/// In the face-cell matrix the cell with the smaller index gets the value 1
/// and the other one (if any) -1.
pub(super) fn simplex_connectivity(
    dim: usize,
    num_nodes: usize,
    mut cells: Vec<usize>,
) -> Result<(nas::CsrMatrix<i8>, nas::CsrMatrix<i8>), GridError> {
    let simplex_size = dim + 1;
    if cells.len() % simplex_size != 0 {
        return Err(GridError::RaggedCells {
            len: cells.len(),
            simplex_size,
        });
    }
    let num_cells = cells.len() / simplex_size;

    // sort node indices within each cell
    // so that a face can be identified by its nodes
    for (cell, simplex) in cells.chunks_exact_mut(simplex_size).enumerate() {
        simplex.sort_unstable();
        if let Some(&node) = simplex.iter().find(|&&n| n >= num_nodes) {
            return Err(GridError::NodeOutOfRange {
                cell,
                node,
                num_nodes,
            });
        }
        if simplex.windows(2).any(|w| w[0] == w[1]) {
            return Err(GridError::DegenerateCell(cell));
        }
    }

    // every combination of all but one node of a cell is a face
    let face_size = dim;
    let face_count = num_cells * simplex_size;
    let mut face_vert_indices: Vec<usize> = Vec::with_capacity(face_count * face_size);
    let mut face_cells: Vec<usize> = Vec::with_capacity(face_count);
    for (cell, simplex) in cells.chunks_exact(simplex_size).enumerate() {
        for exclude_idx in 0..simplex_size {
            face_vert_indices.extend(
                simplex
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != exclude_idx)
                    .map(|(_, node)| *node),
            );
            face_cells.push(cell);
        }
    }

    // sort in lexicographic order by nodes to group duplicates,
    // with the cell index as tiebreaker to fix the signs
    let sorted: Vec<(&[usize], usize)> = izip!(
        face_vert_indices.chunks_exact(face_size),
        face_cells.iter().copied()
    )
    .sorted_unstable()
    .collect();

    let mut node_offsets: Vec<usize> = vec![0];
    let mut node_indices: Vec<usize> = Vec::with_capacity(sorted.len() * face_size);
    let mut cell_offsets: Vec<usize> = vec![0];
    let mut cell_indices: Vec<usize> = Vec::with_capacity(sorted.len());
    let mut signs: Vec<i8> = Vec::with_capacity(sorted.len());

    let mut face_iter = sorted.iter().peekable();
    while let Some(&(nodes, cell)) = face_iter.next() {
        node_indices.extend_from_slice(nodes);
        node_offsets.push(node_indices.len());
        cell_indices.push(cell);
        signs.push(1);
        // further occurrences of the same face are other cells sharing it
        while let Some((_, other)) = face_iter.next_if(|(next, _)| *next == nodes) {
            if cell_indices.len() - cell_offsets[cell_offsets.len() - 1] >= 2 {
                return Err(GridError::NonManifoldFace {
                    nodes: nodes.to_vec(),
                });
            }
            cell_indices.push(*other);
            signs.push(-1);
        }
        cell_offsets.push(cell_indices.len());
    }

    let num_faces = node_offsets.len() - 1;
    let node_values = vec![1; node_indices.len()];
    let face_nodes = nas::CsrMatrix::try_from_unsorted_csr_data(
        num_faces,
        num_nodes,
        node_offsets,
        node_indices,
        node_values,
    )
    .expect("Error in face-node matrix construction. This is a bug in fracmesh");
    let cell_faces = nas::CsrMatrix::try_from_unsorted_csr_data(
        num_faces,
        num_cells,
        cell_offsets,
        cell_indices,
        signs,
    )
    .expect("Error in face-cell matrix construction. This is a bug in fracmesh");

    Ok((face_nodes, cell_faces))
}

/// Build a CSR matrix from rows of (column, value) pairs.
pub(super) fn csr_from_rows(ncols: usize, rows: &[Vec<(usize, i8)>]) -> nas::CsrMatrix<i8> {
    let mut offsets = Vec::with_capacity(rows.len() + 1);
    offsets.push(0);
    let mut cols = Vec::new();
    let mut values = Vec::new();
    for row in rows {
        for &(col, val) in row {
            cols.push(col);
            values.push(val);
        }
        offsets.push(cols.len());
    }
    nas::CsrMatrix::try_from_unsorted_csr_data(rows.len(), ncols, offsets, cols, values)
        .expect("Error in matrix reconstruction. This is a bug in fracmesh")
}

/// Rows of a CSR matrix as (column, value) pairs.
pub(super) fn csr_rows(matrix: &nas::CsrMatrix<i8>) -> Vec<Vec<(usize, i8)>> {
    matrix
        .row_iter()
        .map(|row| {
            row.col_indices()
                .iter()
                .copied()
                .zip(row.values().iter().copied())
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_triangles() {
        // 3---2
        // | / |
        // 0---1
        let (face_nodes, cell_faces) =
            simplex_connectivity(2, 4, vec![0, 1, 2, 0, 2, 3]).unwrap();
        assert_eq!(face_nodes.nrows(), 5);
        assert_eq!(cell_faces.ncols(), 2);

        let faces: Vec<Vec<usize>> = face_nodes
            .row_iter()
            .map(|row| row.col_indices().to_vec())
            .collect();
        assert_eq!(
            faces,
            vec![vec![0, 1], vec![0, 2], vec![0, 3], vec![1, 2], vec![2, 3]]
        );
        // the diagonal is shared, positive for the first cell
        let diagonal = cell_faces.row(1);
        assert_eq!(diagonal.col_indices(), &[0, 1]);
        assert_eq!(diagonal.values(), &[1, -1]);
        for f in [0, 2, 3, 4] {
            assert_eq!(cell_faces.row(f).nnz(), 1);
            assert_eq!(cell_faces.row(f).values(), &[1]);
        }
    }

    #[test]
    fn malformed_cells() {
        assert_eq!(
            simplex_connectivity(2, 3, vec![0, 1]).unwrap_err(),
            GridError::RaggedCells {
                len: 2,
                simplex_size: 3
            }
        );
        assert_eq!(
            simplex_connectivity(1, 2, vec![0, 5]).unwrap_err(),
            GridError::NodeOutOfRange {
                cell: 0,
                node: 5,
                num_nodes: 2
            }
        );
        assert_eq!(
            simplex_connectivity(2, 3, vec![0, 1, 1]).unwrap_err(),
            GridError::DegenerateCell(0)
        );
        // three triangles around one edge
        assert_eq!(
            simplex_connectivity(2, 5, vec![0, 1, 2, 0, 1, 3, 0, 1, 4]).unwrap_err(),
            GridError::NonManifoldFace { nodes: vec![0, 1] }
        );
    }

    #[test]
    fn rows_roundtrip() {
        let (_, cell_faces) = simplex_connectivity(1, 3, vec![0, 1, 1, 2]).unwrap();
        let rows = csr_rows(&cell_faces);
        assert_eq!(rows, vec![vec![(0, 1)], vec![(0, 1), (1, -1)], vec![(1, 1)]]);
        assert_eq!(csr_from_rows(2, &rows), cell_faces);
    }
}
