//! The whole pipeline from a fracture network to a split grid bucket.

use log::info;

use crate::{
    bucket::{assemble_in_bucket, split_fractures, tag_faces, GridBucket},
    fracture::Domain,
    mesher::{MeshConfig, Mesher},
    network::FractureNetwork,
    Error,
};

/// Mesh a fracture network into a bucket of simplex grids.
///
/// If the network has no domain yet, it is clipped to a box slightly larger
/// than its bounding box.
/// The network is then decomposed along its intersections,
/// meshed with `mesher`, and the mesh cut into grids
/// which are tagged, coupled and split along the fractures.
///
/// ```no_run
/// # use fracmesh::{meshing::simplex_grid, *};
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let f1 = Fracture::from_coordinates([[0., 1., 2., 0.], [0., 0., 1., 1.], [0., 0., 1., 1.]])?;
/// let f2 = Fracture::from_coordinates([
///     [0.5, 0.5, 0.5, 0.5],
///     [-1., 2., 2., -1.],
///     [-1., -1., 2., 2.],
/// ])?;
/// let mut network = FractureNetwork::new([f1, f2]);
/// network.impose_external_boundary(Domain::from_bounds(-2., 3., -2., 3., -3., 3.)?)?;
/// let config = MeshConfig {
///     mesh_size_frac: 0.7,
///     mesh_size_min: 0.2,
///     ..Default::default()
/// };
/// let bucket = simplex_grid(&mut network, &GmshMesher::default(), &config)?;
/// assert_eq!(bucket.grids_of_dim(2).count(), 2);
/// # Ok(())
/// # }
/// ```
pub fn simplex_grid(
    network: &mut FractureNetwork,
    mesher: &impl Mesher,
    config: &MeshConfig,
) -> Result<GridBucket, Error> {
    config.validate()?;
    if network.domain().is_none() {
        let domain = Domain::bounding(network.fractures()).ok_or(Error::EmptyNetwork)?;
        info!(
            "no domain given, using the box from {:?} to {:?}",
            domain.min, domain.max
        );
        network.impose_external_boundary(domain)?;
    }

    let tol = network.tol();
    let geometry = network.split_intersections();
    let raw = mesher.generate(geometry, config)?;
    let mut grids = raw.grids()?;
    for dim in (0..=3).rev() {
        let (count, cells) = grids
            .iter()
            .filter(|g| g.dim() == dim)
            .fold((0, 0), |(n, c), g| (n + 1, c + g.num_cells()));
        info!("{} grids of dimension {} with {} cells", count, dim, cells);
    }

    tag_faces(&mut grids);
    let mut bucket = assemble_in_bucket(grids, tol, config.ensure_matching_face_cell)?;
    split_fractures(&mut bucket);
    Ok(bucket)
}
