//! Meshing with [`gmsh`](https://www.gmsh.info/).
//!
//! The decomposition is written as a `.geo` script,
//! gmsh is run on it in a scratch directory,
//! and the resulting mesh is read back from version 4.1 of the MSH format
//! as per the [`mshio`] library.
//! Regions are identified through physical groups
//! tagged as described in [`MeshRegion::physical_tag`].

use itertools::Itertools;
use log::{debug, info, warn};
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::{Duration, Instant},
};

use crate::{
    mesher::{MeshConfig, MeshGenerationError, MeshRegion, Mesher, RawMesh},
    network::Decomposition,
    Vec3,
};

/// Environment variable that overrides the default gmsh executable.
pub const GMSH_PATH_VAR: &str = "GMSH_PATH";

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A [`Mesher`] running the external gmsh program.
#[derive(Clone, Debug)]
pub struct GmshMesher {
    executable: PathBuf,
    timeout: Option<Duration>,
    extra_args: Vec<String>,
}

impl Default for GmshMesher {
    /// Uses the executable named by the `GMSH_PATH` environment variable,
    /// or `gmsh` from the search path if it isn't set.
    fn default() -> Self {
        let executable = std::env::var_os(GMSH_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("gmsh"));
        Self::new(executable)
    }
}

impl GmshMesher {
    /// Mesher running the given executable with no time limit.
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            timeout: None,
            extra_args: Vec::new(),
        }
    }

    /// Kill gmsh and fail if it runs for longer than `limit`.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    /// Pass additional command line arguments to gmsh,
    /// e.g. `["-v", "2"]` to reduce its output.
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// The executable that is run.
    #[inline]
    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Run gmsh on `geo` writing the mesh to `msh`,
    /// with its output collected in `log`.
    fn run(&self, geo: &Path, msh: &Path, log: &Path) -> Result<(), MeshGenerationError> {
        let log_file = fs::File::create(log)?;
        let program = self.executable.display().to_string();
        let mut child = Command::new(&self.executable)
            .arg(geo)
            .args(["-3", "-format", "msh41", "-o"])
            .arg(msh)
            .args(&self.extra_args)
            .stdin(Stdio::null())
            .stdout(log_file.try_clone()?)
            .stderr(log_file)
            .spawn()
            .map_err(|source| MeshGenerationError::Launch { program, source })?;
        let diagnostics = || fs::read_to_string(log).unwrap_or_default();

        let start = Instant::now();
        let status = match self.timeout {
            None => child.wait()?,
            Some(limit) => loop {
                if let Some(status) = child.try_wait()? {
                    break status;
                }
                if start.elapsed() >= limit {
                    if let Err(e) = child.kill() {
                        warn!("Failed to kill gmsh after timeout: {}", e);
                    }
                    child.wait()?;
                    return Err(MeshGenerationError::Timeout {
                        limit,
                        diagnostics: diagnostics(),
                    });
                }
                std::thread::sleep(POLL_INTERVAL);
            },
        };
        debug!("gmsh finished in {:?} with {}", start.elapsed(), status);

        if !status.success() {
            return Err(MeshGenerationError::Failed {
                status: status.to_string(),
                diagnostics: diagnostics(),
            });
        }
        if !msh.is_file() {
            return Err(MeshGenerationError::MissingOutput {
                diagnostics: diagnostics(),
            });
        }
        Ok(())
    }
}

impl Mesher for GmshMesher {
    fn generate(
        &self,
        geometry: &Decomposition,
        config: &MeshConfig,
    ) -> Result<RawMesh, MeshGenerationError> {
        config.validate()?;
        if !geometry.polygons().iter().any(|p| p.is_domain_boundary()) {
            return Err(MeshGenerationError::EmptyGeometry(
                "the decomposition has no domain boundary",
            ));
        }

        let dir = tempfile::tempdir()?;
        let geo = dir.path().join("network.geo");
        let msh = dir.path().join("network.msh");
        let log = dir.path().join("gmsh.log");
        fs::write(&geo, write_geo(geometry, config))?;
        info!(
            "Meshing {} polygons with {}",
            geometry.polygons().len(),
            self.executable.display()
        );

        self.run(&geo, &msh, &log)?;
        let bytes = fs::read(&msh)?;
        parse_msh(&bytes)
    }
}

/// Target element size at each point of the decomposition.
///
/// Points on fractures get the distance to the nearest other point,
/// kept between the minimum and fracture sizes.
/// Points used only by the domain boundary get the boundary size.
pub fn point_mesh_sizes(geometry: &Decomposition, config: &MeshConfig) -> Vec<f64> {
    let points = geometry.points();
    let mut on_fracture = vec![false; points.len()];
    for polygon in geometry.polygons().iter().filter(|p| !p.is_domain_boundary()) {
        let embedded = polygon
            .embedded
            .iter()
            .flat_map(|&e| geometry.edges()[e].points);
        let cycles = polygon.outer.iter().chain(polygon.holes.iter().flatten());
        let touching = polygon.embedded_points.iter();
        for p in cycles.chain(touching).copied().chain(embedded) {
            on_fracture[p] = true;
        }
    }

    points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            if !on_fracture[i] {
                return config.boundary_size();
            }
            let nearest = points
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, q)| (p - q).norm())
                .fold(f64::INFINITY, f64::min);
            nearest.clamp(config.mesh_size_min, config.mesh_size_frac)
        })
        .collect()
}

/// Describe the decomposition as a gmsh `.geo` script.
///
/// Every point, edge and sub-polygon becomes an entity with the same index
/// (plus one, since gmsh counts from 1).
/// The domain boundary polygons enclose the single volume
/// and the fracture polygons are embedded in it.
pub fn write_geo(geometry: &Decomposition, config: &MeshConfig) -> String {
    let sizes = point_mesh_sizes(geometry, config);
    let edge_ids: HashMap<[usize; 2], usize> = geometry
        .edges()
        .iter()
        .enumerate()
        .map(|(i, e)| (e.points, i))
        .collect();
    let mut geo = String::new();
    let mut line = |text: String| {
        geo.push_str(&text);
        geo.push('\n');
    };

    line("// fracture network".to_string());
    line(format!("Geometry.Tolerance = {:?};", geometry.tol()));
    // keep every node so that node tags run consecutively
    line("Mesh.SaveAll = 1;".to_string());

    line("\n// points".to_string());
    for (i, (p, size)) in geometry.points().iter().zip(&sizes).enumerate() {
        line(format!(
            "Point({}) = {{{:?}, {:?}, {:?}, {:?}}};",
            i + 1,
            p.x,
            p.y,
            p.z,
            size
        ));
    }

    line("\n// edges".to_string());
    for (i, edge) in geometry.edges().iter().enumerate() {
        let [a, b] = edge.points;
        line(format!("Line({}) = {{{}, {}}};", i + 1, a + 1, b + 1));
    }

    line("\n// polygons".to_string());
    let mut next_loop = 1;
    let mut boundary_surfaces = Vec::new();
    let mut fracture_surfaces: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (k, polygon) in geometry.polygons().iter().enumerate() {
        let surface = k + 1;
        let mut loops = Vec::with_capacity(1 + polygon.holes.len());
        for cycle in std::iter::once(&polygon.outer).chain(&polygon.holes) {
            let curves = cycle
                .iter()
                .circular_tuple_windows()
                .map(|(&a, &b)| {
                    let key = [a.min(b), a.max(b)];
                    let id = edge_ids[&key] as i64 + 1;
                    if a < b {
                        id
                    } else {
                        -id
                    }
                })
                .join(", ");
            line(format!("Curve Loop({}) = {{{}}};", next_loop, curves));
            loops.push(next_loop);
            next_loop += 1;
        }
        line(format!(
            "Plane Surface({}) = {{{}}};",
            surface,
            loops.iter().join(", ")
        ));
        if !polygon.embedded.is_empty() {
            line(format!(
                "Line{{{}}} In Surface{{{}}};",
                polygon.embedded.iter().map(|e| e + 1).join(", "),
                surface
            ));
        }
        if !polygon.embedded_points.is_empty() {
            line(format!(
                "Point{{{}}} In Surface{{{}}};",
                polygon.embedded_points.iter().map(|p| p + 1).join(", "),
                surface
            ));
        }
        if polygon.is_domain_boundary() {
            boundary_surfaces.push(surface);
        } else {
            fracture_surfaces.entry(polygon.parent).or_default().push(surface);
        }
    }

    line("\n// volume".to_string());
    line(format!(
        "Surface Loop(1) = {{{}}};",
        boundary_surfaces.iter().join(", ")
    ));
    line("Volume(1) = {1};".to_string());
    if !fracture_surfaces.is_empty() {
        line(format!(
            "Surface{{{}}} In Volume{{1}};",
            fracture_surfaces.values().flatten().join(", ")
        ));
    }

    line("\n// physical groups".to_string());
    line(format!(
        "Physical Volume({}) = {{1}};",
        MeshRegion::Domain.physical_tag()
    ));
    for (&id, surfaces) in &fracture_surfaces {
        line(format!(
            "Physical Surface({}) = {{{}}};",
            MeshRegion::Fracture(id).physical_tag(),
            surfaces.iter().join(", ")
        ));
    }
    for (i, intersection) in geometry.lines().iter().enumerate() {
        line(format!(
            "Physical Line({}) = {{{}}};",
            MeshRegion::IntersectionLine(i).physical_tag(),
            intersection.edges.iter().map(|e| e + 1).join(", ")
        ));
    }
    for (i, &p) in geometry.intersection_points().iter().enumerate() {
        line(format!(
            "Physical Point({}) = {{{}}};",
            MeshRegion::IntersectionPoint(i).physical_tag(),
            p + 1
        ));
    }

    debug!(
        "Wrote .geo description with {} points, {} edges and {} surfaces",
        sizes.len(),
        geometry.edges().len(),
        geometry.polygons().len()
    );
    geo
}

/// Read a mesh written by gmsh for a script from [`write_geo`].
///
/// Tetrahedra are taken from every volume entity,
/// and lower-dimensional elements and nodes from entities
/// in the physical groups of fractures, intersection lines and points.
/// Node tags are assumed to be numbered consecutively from 1.
pub fn parse_msh(bytes: &[u8]) -> Result<RawMesh, MeshGenerationError> {
    let msh = mshio::parse_msh_bytes(bytes)
        .map_err(|e| MeshGenerationError::Parse(format!("{}", e)))?;
    let nodes = msh.data.nodes.ok_or(MeshGenerationError::MissingNodes)?;
    let elements = msh
        .data
        .elements
        .ok_or(MeshGenerationError::MissingElements("elements"))?;

    // regions of each (dim, entity tag)
    let mut regions: HashMap<(usize, i32), Vec<MeshRegion>> = HashMap::new();
    if let Some(entities) = &msh.data.entities {
        let tagged = (entities.points.iter().map(|e| (0, e.tag, &e.physical_tags)))
            .chain(entities.curves.iter().map(|e| (1, e.tag, &e.physical_tags)))
            .chain(entities.surfaces.iter().map(|e| (2, e.tag, &e.physical_tags)))
            .chain(entities.volumes.iter().map(|e| (3, e.tag, &e.physical_tags)));
        for (dim, tag, physical_tags) in tagged {
            let found: Vec<MeshRegion> = physical_tags
                .iter()
                .filter_map(|&t| MeshRegion::from_physical_tag(dim, t))
                .collect();
            if !found.is_empty() {
                regions.insert((dim, tag), found);
            }
        }
    }
    let regions_of = |dim: usize, tag: i32| regions.get(&(dim, tag)).into_iter().flatten();

    let mut mesh = RawMesh::default();
    for block in &nodes.node_blocks {
        let first = mesh.nodes.len();
        mesh.nodes
            .extend(block.nodes.iter().map(|node| Vec3::new(node.x, node.y, node.z)));
        if block.entity_dim as usize == 0 && !block.nodes.is_empty() {
            for region in regions_of(0, block.entity_tag) {
                if let MeshRegion::IntersectionPoint(idx) = region {
                    mesh.points.insert(*idx, first);
                }
            }
        }
    }
    if mesh.nodes.is_empty() {
        return Err(MeshGenerationError::MissingNodes);
    }

    let num_nodes = mesh.nodes.len();
    // gmsh tags start at 1, subtract 1 to get the index in the array
    let node_index = |tag: u64| -> Result<usize, MeshGenerationError> {
        match tag as usize {
            t if t >= 1 && t <= num_nodes => Ok(t - 1),
            t => Err(MeshGenerationError::Parse(format!(
                "node tag {} out of range 1..={}",
                t, num_nodes
            ))),
        }
    };
    fn simplex<const N: usize>(
        nodes: &[u64],
        node_index: impl Fn(u64) -> Result<usize, MeshGenerationError>,
    ) -> Result<[usize; N], MeshGenerationError> {
        let mut simplex = [0; N];
        if nodes.len() < N {
            return Err(MeshGenerationError::Parse(format!(
                "element with {} nodes, expected {}",
                nodes.len(),
                N
            )));
        }
        for (s, &n) in simplex.iter_mut().zip(nodes) {
            *s = node_index(n)?;
        }
        Ok(simplex)
    }

    let mut skipped = 0;
    for block in &elements.element_blocks {
        let dim = block.entity_dim as usize;
        match block.element_type {
            mshio::ElementType::Tet4 => {
                for el in &block.elements {
                    mesh.tetrahedra.push(simplex(&el.nodes, node_index)?);
                }
            }
            mshio::ElementType::Tri3 => {
                for region in regions_of(dim, block.entity_tag) {
                    if let MeshRegion::Fracture(id) = region {
                        let triangles = mesh.fracture_triangles.entry(*id).or_default();
                        for el in &block.elements {
                            triangles.push(simplex(&el.nodes, node_index)?);
                        }
                    }
                }
            }
            mshio::ElementType::Lin2 => {
                for region in regions_of(dim, block.entity_tag) {
                    if let MeshRegion::IntersectionLine(idx) = region {
                        let segments = mesh.line_segments.entry(*idx).or_default();
                        for el in &block.elements {
                            segments.push(simplex(&el.nodes, node_index)?);
                        }
                    }
                }
            }
            _ => skipped += block.elements.len(),
        }
    }
    if skipped > 0 {
        debug!("Ignored {} elements of other types", skipped);
    }
    if mesh.tetrahedra.is_empty() {
        return Err(MeshGenerationError::MissingElements("tetrahedra"));
    }

    info!(
        "Read mesh with {} nodes, {} tetrahedra, {} fracture surfaces, {} intersection lines and {} intersection points",
        mesh.nodes.len(),
        mesh.tetrahedra.len(),
        mesh.fracture_triangles.len(),
        mesh.line_segments.len(),
        mesh.points.len()
    );
    Ok(mesh)
}
