//! Duplicating faces and nodes of a grid to open it up along fractures.

use fixedbitset as fb;

use itertools::Itertools;
use std::collections::{BTreeSet, HashMap};

use super::{
    construction::{csr_from_rows, csr_rows},
    Grid,
};

impl Grid {
    /// Split each given face shared by two cells into two faces,
    /// one per cell.
    ///
    /// The original face keeps the cell it points out of,
    /// and the new copy, appended after all existing faces,
    /// takes the other cell with the same orientation.
    /// Tags are copied to the new face.
    /// Returns the index of the copy for each face,
    /// or `None` for faces that didn't have two cells.
    pub fn split_faces(&mut self, faces: &[usize]) -> Vec<Option<usize>> {
        let mut node_rows = csr_rows(&self.face_nodes);
        let mut cell_rows = csr_rows(&self.cell_faces);

        let copies: Vec<Option<usize>> = faces
            .iter()
            .map(|&face| {
                if cell_rows[face].len() != 2 {
                    return None;
                }
                let moved_idx = cell_rows[face]
                    .iter()
                    .position(|&(_, sign)| sign < 0)
                    .unwrap_or(1);
                let moved = cell_rows[face].remove(moved_idx);
                let copy = node_rows.len();
                node_rows.push(node_rows[face].clone());
                cell_rows.push(vec![moved]);
                Some(copy)
            })
            .collect();

        let num_faces = node_rows.len();
        self.tags.grow(num_faces);
        for (&face, copy) in faces.iter().zip(&copies) {
            if let Some(copy) = *copy {
                for set in [
                    &mut self.tags.domain_boundary,
                    &mut self.tags.fracture,
                    &mut self.tags.tip,
                ] {
                    let bit = set.contains(face);
                    set.set(copy, bit);
                }
            }
        }

        self.face_nodes = csr_from_rows(self.num_nodes(), &node_rows);
        self.cell_faces = csr_from_rows(self.num_cells(), &cell_rows);
        self.invalidate();
        copies
    }

    /// Duplicate every node on the given faces whose surrounding cells
    /// fall into more than one group connected through shared faces.
    ///
    /// After faces along a fracture are split, the cells around a node
    /// on the fracture are disconnected across it.
    /// Each group of cells except the one containing the lowest cell index
    /// gets its own copy of the node,
    /// with the same coordinates and global index.
    /// Nodes on the tip of a fracture stay connected around the tip and are kept.
    /// Returns the number of nodes added.
    pub fn split_nodes(&mut self, faces: &fb::FixedBitSet) -> usize {
        let mut node_rows = csr_rows(&self.face_nodes);
        let cell_rows = csr_rows(&self.cell_faces);

        let mut faces_of_node: Vec<Vec<usize>> = vec![Vec::new(); self.num_nodes()];
        for (face, row) in node_rows.iter().enumerate() {
            for &(node, _) in row {
                faces_of_node[node].push(face);
            }
        }
        let targets: BTreeSet<usize> = faces
            .ones()
            .filter(|&f| f < node_rows.len())
            .flat_map(|f| node_rows[f].iter().map(|&(node, _)| node).collect_vec())
            .collect();

        let mut added = 0;
        for node in targets {
            let around = &faces_of_node[node];
            let cells: Vec<usize> = around
                .iter()
                .flat_map(|&f| cell_rows[f].iter().map(|&(cell, _)| cell))
                .sorted_unstable()
                .dedup()
                .collect();
            let local: HashMap<usize, usize> =
                cells.iter().enumerate().map(|(i, &c)| (c, i)).collect();

            // group cells connected through faces around the node
            let mut group: Vec<usize> = (0..cells.len()).collect();
            let root = |group: &mut Vec<usize>, mut i: usize| {
                while group[i] != i {
                    group[i] = group[group[i]];
                    i = group[i];
                }
                i
            };
            for &f in around {
                if let [(a, _), (b, _)] = cell_rows[f][..] {
                    let ra = root(&mut group, local[&a]);
                    let rb = root(&mut group, local[&b]);
                    // keep the smaller index as root so the lowest cell's group comes first
                    group[ra.max(rb)] = ra.min(rb);
                }
            }
            let roots: Vec<usize> = (0..cells.len())
                .map(|i| root(&mut group, i))
                .collect();
            let distinct: Vec<usize> = roots.iter().copied().sorted_unstable().dedup().collect();
            if distinct.len() <= 1 {
                continue;
            }

            // the first group keeps the node
            let mut replacement: HashMap<usize, usize> = HashMap::new();
            for &r in &distinct[1..] {
                replacement.insert(r, self.nodes.len());
                self.nodes.push(self.nodes[node]);
                self.global_point_ind.push(self.global_point_ind[node]);
            }
            for &f in around {
                let Some(&(cell, _)) = cell_rows[f].first() else {
                    continue;
                };
                if let Some(&copy) = replacement.get(&roots[local[&cell]]) {
                    for entry in node_rows[f].iter_mut().filter(|(n, _)| *n == node) {
                        entry.0 = copy;
                    }
                }
            }
            added += distinct.len() - 1;
        }

        self.face_nodes = csr_from_rows(self.num_nodes(), &node_rows);
        self.invalidate();
        added
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::cube_tets;
    use super::*;
    use crate::Vec3;
    use approx::assert_relative_eq;

    /// A strip of four triangles with a vertical edge at x = 1 in the middle.
    ///
    /// ```text
    /// 3---4---5
    /// | / | / |
    /// 0---1---2
    /// ```
    fn strip() -> Grid {
        let nodes = vec![
            Vec3::new(0., 0., 0.),
            Vec3::new(1., 0., 0.),
            Vec3::new(2., 0., 0.),
            Vec3::new(0., 1., 0.),
            Vec3::new(1., 1., 0.),
            Vec3::new(2., 1., 0.),
        ];
        Grid::from_simplices(2, nodes, vec![0, 1, 4, 0, 4, 3, 1, 2, 5, 1, 5, 4]).unwrap()
    }

    fn face_with_nodes(grid: &Grid, nodes: [usize; 2]) -> usize {
        (0..grid.num_faces())
            .find(|&f| grid.nodes_of_face(f) == nodes)
            .unwrap()
    }

    #[test]
    fn split_faces_in_strip() {
        let mut grid = strip();
        let middle = face_with_nodes(&grid, [1, 4]);
        grid.tags_mut().fracture.insert(middle);
        let num_faces = grid.num_faces();
        let normal_before = grid.geometry().face_normals[middle];

        let copies = grid.split_faces(&[middle, 0]);
        // face 0 is on the boundary and can't be split
        assert_eq!(copies, vec![Some(num_faces), None]);
        assert_eq!(grid.num_faces(), num_faces + 1);
        assert_eq!(grid.num_cells(), 4);
        assert!(grid.tags().fracture.contains(num_faces));

        let (cells, _) = grid.cells_of_face(middle);
        let (copy_cells, copy_signs) = grid.cells_of_face(num_faces);
        assert_eq!(cells.len(), 1);
        assert_eq!(copy_cells.len(), 1);
        assert_eq!(copy_signs, &[-1]);
        assert_ne!(cells[0], copy_cells[0]);
        // same orientation on both copies
        let geom = grid.geometry();
        assert_relative_eq!(geom.face_normals[middle], normal_before);
        assert_relative_eq!(geom.face_normals[num_faces], normal_before);
    }

    #[test]
    fn nodes_split_only_where_fracture_cuts_through() {
        let mut grid = strip();
        let middle = face_with_nodes(&grid, [1, 4]);
        grid.split_faces(&[middle]);
        let mut fracture = fb::FixedBitSet::with_capacity(grid.num_faces());
        fracture.insert(middle);
        fracture.insert(grid.num_faces() - 1);

        // both ends of the cut are on the grid boundary, so the strip comes apart
        let added = grid.split_nodes(&fracture);
        assert_eq!(added, 2);
        assert_eq!(grid.num_nodes(), 8);
        assert_eq!(&grid.global_point_ind()[6..], &[1, 4]);
        let copy = grid.num_faces() - 1;
        assert_ne!(grid.nodes_of_face(middle), grid.nodes_of_face(copy));

        // cells keep their shape
        let geom = grid.geometry();
        for volume in &geom.cell_volumes {
            assert_relative_eq!(*volume, 0.5);
        }
    }

    #[test]
    fn tip_nodes_are_kept() {
        // fracture along one interior face of a tet mesh of [0, 2]^3
        let (nodes, cells) = cube_tets(2);
        let mut grid = crate::Grid::from_simplices(3, nodes, cells).unwrap();
        let interior = (0..grid.num_faces())
            .find(|&f| {
                grid.cells_of_face(f).0.len() == 2
                    && grid
                        .nodes_of_face(f)
                        .iter()
                        .all(|&n| (grid.nodes()[n].x - 1.).abs() < 1e-12)
            })
            .unwrap();
        grid.split_faces(&[interior]);
        let mut fracture = fb::FixedBitSet::with_capacity(grid.num_faces());
        fracture.insert(interior);
        fracture.insert(grid.num_faces() - 1);

        // the cells around each node of a single face stay connected around the edges
        // unless the node is on the outer boundary
        let boundary_nodes_on_face = grid
            .nodes_of_face(interior)
            .iter()
            .filter(|&&n| {
                let p = grid.nodes()[n];
                p.iter().any(|&c| c.abs() < 1e-12 || (c - 2.).abs() < 1e-12)
            })
            .count();
        let added = grid.split_nodes(&fracture);
        assert!(added <= boundary_nodes_on_face);
        let total: f64 = grid.geometry().cell_volumes.iter().sum();
        assert_relative_eq!(total, 8., epsilon = 1e-12);
    }
}
