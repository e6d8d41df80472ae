//! Terrain-following computational mesh
//!
//! Nodes sit above the centres of a regular horizontal grid. Each column has `nz`
//! nodes stretching from the ground to a flat domain top, with layer thickness growing
//! geometrically away from the ground:
//!
//! ```text
//! z(k) = (H - e) · (g^(k-n+1) - g^(1-n)) / (1 - g^(1-n)) + e      k = 0..n-1
//! ```
//!
//! where `e` is the ground elevation of the column, `H` the domain top, `g` the growth
//! factor and `n = nz`. The first cell thickness is chosen from the horizontal
//! resolution and a maximum aspect ratio, which fixes the domain depth:
//!
//! ```text
//! Δz₁ = Δx / aspect
//! H - e_max = Δz₁ · (g^(n-1) - 1) / (g - 1)
//! ```
//!
//! Flattened node index: `k * (nx * ny) + j * nx + i` (layer-major, row 0 south).

use crate::error::{try_alloc, RunError, RunResult};
use crate::grid::surface::SurfaceProperties;
use crate::grid::terrain::TerrainData;
use crate::simulation::config::RunConfiguration;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Horizontal resolution choice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MeshResolution {
    /// About 4000 horizontal cells.
    Coarse,
    /// About 10000 horizontal cells.
    Medium,
    /// About 20000 horizontal cells.
    Fine,
    /// Explicit cell size in meters.
    Meters(f64),
}

impl MeshResolution {
    pub fn target_cells(&self) -> Option<f64> {
        match self {
            MeshResolution::Coarse => Some(4000.0),
            MeshResolution::Medium => Some(10000.0),
            MeshResolution::Fine => Some(20000.0),
            MeshResolution::Meters(_) => None,
        }
    }

    /// Cell size for a domain of `x_extent` by `y_extent` meters.
    pub fn cell_size(&self, x_extent: f64, y_extent: f64) -> RunResult<f64> {
        let Some(cells) = self.target_cells() else {
            return match self {
                MeshResolution::Meters(r) if *r > 0.0 && r.is_finite() => Ok(*r),
                _ => Err(RunError::Configuration(format!(
                    "mesh resolution must be positive, got {self:?}"
                ))),
            };
        };
        // Split the target count between the axes in proportion to their extents
        let n_x = 2.0 * cells.sqrt() * x_extent / (x_extent + y_extent);
        let n_y = 2.0 * cells.sqrt() * y_extent / (x_extent + y_extent);
        Ok((x_extent / n_x + y_extent / n_y) / 2.0)
    }
}

/// Mesh construction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshSpec {
    pub resolution: MeshResolution,
    /// Nodes per column.
    pub num_vertical_layers: usize,
    /// Ratio of consecutive layer thicknesses.
    pub vertical_growth: f64,
    /// Maximum horizontal-to-vertical aspect ratio of the first cell.
    pub max_aspect_ratio: f64,
    /// Domain depth above the highest terrain (m); derived when `None`.
    pub domain_height: Option<f64>,
}

impl Default for MeshSpec {
    fn default() -> Self {
        Self {
            resolution: MeshResolution::Coarse,
            num_vertical_layers: 20,
            vertical_growth: 1.3,
            max_aspect_ratio: 400.0,
            domain_height: None,
        }
    }
}

impl MeshSpec {
    pub fn validate(&self) -> RunResult<()> {
        if self.num_vertical_layers < 3 {
            return Err(RunError::Configuration(format!(
                "mesh needs at least 3 vertical layers, got {}",
                self.num_vertical_layers
            )));
        }
        if self.vertical_growth.is_nan() || self.vertical_growth < 1.0 || self.vertical_growth.is_infinite() {
            return Err(RunError::Configuration(format!(
                "vertical growth factor must be at least 1, got {}",
                self.vertical_growth
            )));
        }
        if self.max_aspect_ratio.is_nan() || self.max_aspect_ratio <= 0.0 {
            return Err(RunError::Configuration(format!(
                "maximum cell aspect ratio must be positive, got {}",
                self.max_aspect_ratio
            )));
        }
        if let Some(h) = self.domain_height {
            if h.is_nan() || h <= 0.0 {
                return Err(RunError::Configuration(format!(
                    "domain height must be positive, got {h}"
                )));
            }
        }
        if let MeshResolution::Meters(r) = self.resolution {
            if r.is_nan() || r <= 0.0 {
                return Err(RunError::Configuration(format!(
                    "mesh resolution must be positive, got {r}"
                )));
            }
        }
        Ok(())
    }

    /// Domain depth above the highest terrain for a given cell size.
    ///
    /// Sums `n - 1` geometrically growing cells so the lowest cell is exactly
    /// `cell_size / max_aspect_ratio` thick.
    pub fn derived_domain_height(&self, cell_size: f64) -> f64 {
        let first = cell_size / self.max_aspect_ratio;
        let g = self.vertical_growth;
        let cells = (self.num_vertical_layers - 1) as f64;
        if (g - 1.0).abs() < 1e-12 {
            first * cells
        } else {
            first * (g.powf(cells) - 1.0) / (g - 1.0)
        }
    }
}

/// Position of a point inside the mesh, as a base node plus fractional offsets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshPoint {
    pub i: usize,
    pub j: usize,
    pub k: usize,
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
}

/// Terrain-following mesh.
#[derive(Debug, Clone)]
pub struct Mesh {
    nx: usize,
    ny: usize,
    nz: usize,
    resolution: f64,
    domain_top: f64,
    z: Vec<f64>,
    terrain: TerrainData,
    surface: SurfaceProperties,
}

impl Mesh {
    /// Stack `nz` geometrically growing layers over every terrain cell.
    ///
    /// `terrain` and `surface` must already be on the mesh's horizontal grid.
    pub fn terrain_following(
        terrain: TerrainData,
        surface: SurfaceProperties,
        nz: usize,
        vertical_growth: f64,
        domain_top: f64,
    ) -> RunResult<Self> {
        let dem = terrain.dem();
        let (nx, ny) = (dem.ncols(), dem.nrows());
        if nx < 2 || ny < 2 || nz < 3 {
            return Err(RunError::Configuration(format!(
                "mesh of {nx}x{ny}x{nz} nodes is too small"
            )));
        }
        if surface.roughness.ncols() != nx || surface.roughness.nrows() != ny {
            return Err(RunError::Configuration(
                "surface grid does not match the mesh grid".to_string(),
            ));
        }
        if domain_top <= terrain.max_elevation() {
            return Err(RunError::Configuration(format!(
                "domain top {domain_top} m does not clear the terrain ({} m)",
                terrain.max_elevation()
            )));
        }

        let total = nx
            .checked_mul(ny)
            .and_then(|n| n.checked_mul(nz))
            .ok_or_else(|| RunError::ResourceExhaustion("mesh node count overflows".into()))?;
        let mut z = try_alloc(total, 0.0, "mesh node heights")?;

        let fractions = layer_fractions(nz, vertical_growth);
        let layer = nx * ny;
        for j in 0..ny {
            for i in 0..nx {
                let ground = dem.get(j, i);
                for (k, frac) in fractions.iter().enumerate() {
                    z[k * layer + j * nx + i] = (domain_top - ground) * frac + ground;
                }
            }
        }

        Ok(Self {
            nx,
            ny,
            nz,
            resolution: dem.cell_size(),
            domain_top,
            z,
            terrain,
            surface,
        })
    }

    #[inline]
    pub fn nx(&self) -> usize {
        self.nx
    }

    #[inline]
    pub fn ny(&self) -> usize {
        self.ny
    }

    #[inline]
    pub fn nz(&self) -> usize {
        self.nz
    }

    /// Horizontal node spacing (m).
    #[inline]
    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn domain_top(&self) -> f64 {
        self.domain_top
    }

    pub fn num_nodes(&self) -> usize {
        self.z.len()
    }

    #[inline]
    pub fn layer_size(&self) -> usize {
        self.nx * self.ny
    }

    pub fn terrain(&self) -> &TerrainData {
        &self.terrain
    }

    pub fn surface(&self) -> &SurfaceProperties {
        &self.surface
    }

    #[inline]
    pub fn index(&self, i: usize, j: usize, k: usize) -> usize {
        k * self.nx * self.ny + j * self.nx + i
    }

    /// Node elevation (m above datum).
    #[inline]
    pub fn z(&self, i: usize, j: usize, k: usize) -> f64 {
        self.z[self.index(i, j, k)]
    }

    /// All node elevations, flattened.
    pub fn z_values(&self) -> &[f64] {
        &self.z
    }

    #[inline]
    pub fn ground(&self, i: usize, j: usize) -> f64 {
        self.z[j * self.nx + i]
    }

    /// Node height above the column's ground.
    #[inline]
    pub fn height_agl(&self, i: usize, j: usize, k: usize) -> f64 {
        self.z(i, j, k) - self.ground(i, j)
    }

    /// Projected horizontal position of a column.
    #[inline]
    pub fn node_xy(&self, i: usize, j: usize) -> (f64, f64) {
        self.terrain.dem().cell_center(j, i)
    }

    fn fractional_ij(&self, x: f64, y: f64) -> (f64, f64) {
        let dem = self.terrain.dem();
        (
            (x - dem.xll()) / self.resolution - 0.5,
            (y - dem.yll()) / self.resolution - 0.5,
        )
    }

    /// Whether `(x, y)` lies within the hull of node columns.
    pub fn in_mesh_xy(&self, x: f64, y: f64) -> bool {
        let (fx, fy) = self.fractional_ij(x, y);
        (0.0..=(self.nx - 1) as f64).contains(&fx) && (0.0..=(self.ny - 1) as f64).contains(&fy)
    }

    /// Locate a point for trilinear interpolation. `None` outside the mesh.
    pub fn locate(&self, x: f64, y: f64, z: f64) -> Option<MeshPoint> {
        if !self.in_mesh_xy(x, y) {
            return None;
        }
        let (fx, fy) = self.fractional_ij(x, y);
        let i = (fx.floor() as usize).min(self.nx - 2);
        let j = (fy.floor() as usize).min(self.ny - 2);
        let tx = fx - i as f64;
        let ty = fy - j as f64;

        // Layer surfaces are blended bilinearly across the four surrounding columns
        let layer_z = |k: usize| {
            let s = self.z(i, j, k) * (1.0 - tx) + self.z(i + 1, j, k) * tx;
            let n = self.z(i, j + 1, k) * (1.0 - tx) + self.z(i + 1, j + 1, k) * tx;
            s * (1.0 - ty) + n * ty
        };

        let mut below = layer_z(0);
        if z < below {
            return None;
        }
        for k in 0..self.nz - 1 {
            let above = layer_z(k + 1);
            if z <= above {
                let tz = if above > below {
                    (z - below) / (above - below)
                } else {
                    0.0
                };
                return Some(MeshPoint {
                    i,
                    j,
                    k,
                    tx,
                    ty,
                    tz,
                });
            }
            below = above;
        }
        None
    }
}

/// Normalized node heights `(z - e) / (H - e)` for each layer.
fn layer_fractions(nz: usize, growth: f64) -> Vec<f64> {
    let n = nz as f64;
    if (growth - 1.0).abs() < 1e-12 {
        return (0..nz).map(|k| k as f64 / (n - 1.0)).collect();
    }
    let bottom = growth.powf(1.0 - n);
    (0..nz)
        .map(|k| (growth.powf(k as f64 - n + 1.0) - bottom) / (1.0 - bottom))
        .collect()
}

/// Builds the computational mesh for a run.
pub trait MeshBuilder: Send + Sync {
    /// Get the builder name for logging
    fn name(&self) -> &'static str;

    /// Build a mesh over the run's terrain and surface.
    fn build_mesh(&self, config: &RunConfiguration) -> RunResult<Mesh>;
}

/// Resamples the terrain to the requested resolution and stacks growing layers on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardMeshBuilder;

impl MeshBuilder for StandardMeshBuilder {
    fn name(&self) -> &'static str {
        "terrain-following"
    }

    fn build_mesh(&self, config: &RunConfiguration) -> RunResult<Mesh> {
        let spec = &config.mesh;
        spec.validate()?;
        let dem = config.terrain.dem();
        let cell_size = spec
            .resolution
            .cell_size(dem.x_extent(), dem.y_extent())?;

        let terrain = config.terrain.resampled(cell_size)?;
        let surface = config.surface.rasterize(terrain.dem())?;

        let tallest = config
            .mode
            .stations()
            .iter()
            .map(|s| s.height)
            .fold(config.output.height, f64::max);
        let vegetation_top = tallest + surface.max_rough_h();
        let depth = spec
            .domain_height
            .unwrap_or_else(|| spec.derived_domain_height(cell_size))
            .max(3.0 * vegetation_top);
        let domain_top = terrain.max_elevation() + depth;

        debug!(
            "Mesh resolution {:.2} m, {}x{}x{} nodes, domain top {:.1} m",
            cell_size,
            terrain.dem().ncols(),
            terrain.dem().nrows(),
            spec.num_vertical_layers,
            domain_top
        );

        Mesh::terrain_following(
            terrain,
            surface,
            spec.num_vertical_layers,
            spec.vertical_growth,
            domain_top,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::surface::{SurfaceSpec, Vegetation};
    use approx::assert_relative_eq;

    fn flat_mesh(n: usize, nz: usize) -> Mesh {
        let terrain = TerrainData::flat(n, n, 100.0, 50.0);
        let surface = SurfaceSpec::Uniform(Vegetation::Grass)
            .rasterize(terrain.dem())
            .unwrap();
        Mesh::terrain_following(terrain, surface, nz, 1.3, 250.0).unwrap()
    }

    #[test]
    fn test_layer_fractions_span_column() {
        let f = layer_fractions(20, 1.3);
        assert_relative_eq!(f[0], 0.0, epsilon = 1e-15);
        assert_relative_eq!(f[19], 1.0, epsilon = 1e-12);
        for k in 1..20 {
            assert!(f[k] > f[k - 1]);
        }
        // Thicknesses grow by the growth factor
        let r = (f[3] - f[2]) / (f[2] - f[1]);
        assert_relative_eq!(r, 1.3, epsilon = 1e-9);
    }

    #[test]
    fn test_derived_domain_height_matches_first_cell() {
        let spec = MeshSpec::default();
        let depth = spec.derived_domain_height(100.0);
        let f = layer_fractions(spec.num_vertical_layers, spec.vertical_growth);
        assert_relative_eq!(depth * f[1], 100.0 / 400.0, epsilon = 1e-9);
    }

    #[test]
    fn test_shrinking_layers_rejected() {
        let shrinking = MeshSpec {
            vertical_growth: 0.8,
            ..MeshSpec::default()
        };
        assert!(matches!(shrinking.validate(), Err(RunError::Configuration(_))));
        let uniform = MeshSpec {
            vertical_growth: 1.0,
            ..MeshSpec::default()
        };
        assert!(uniform.validate().is_ok());
        assert_relative_eq!(uniform.derived_domain_height(400.0), 19.0, epsilon = 1e-12);
    }

    #[test]
    fn test_domain_clears_tallest_station() {
        use crate::core_types::station::{Station, StationSample};
        use crate::simulation::config::{InitializationMode, MatchingSettings, PointInput};

        let tall = Station::legacy("mast", 500.0, 500.0, 200.0, StationSample::new(10.0, 270.0));
        let mut config = RunConfiguration {
            mode: InitializationMode::PointMatching(PointInput {
                stations: vec![tall],
                matching: Some(MatchingSettings::default()),
                time_step: 0,
            }),
            ..RunConfiguration::default()
        };
        config.mesh.resolution = MeshResolution::Meters(100.0);
        let mesh = StandardMeshBuilder.build_mesh(&config).unwrap();
        assert!(mesh.domain_top() >= 3.0 * 200.0);
        assert!(mesh.locate(500.0, 500.0, 200.0).is_some());
    }

    #[test]
    fn test_resolution_from_target_cells() {
        let r = MeshResolution::Coarse.cell_size(1000.0, 1000.0).unwrap();
        assert_relative_eq!(r, 2000.0 / (2.0 * 4000.0_f64.sqrt()), epsilon = 1e-9);
        assert!(MeshResolution::Meters(-1.0).cell_size(1.0, 1.0).is_err());
    }

    #[test]
    fn test_node_positions() {
        let mesh = flat_mesh(10, 5);
        assert_eq!(mesh.node_xy(0, 0), (50.0, 50.0));
        assert_relative_eq!(mesh.ground(3, 3), 50.0);
        assert_relative_eq!(mesh.z(3, 3, 4), 250.0, epsilon = 1e-9);
        assert_relative_eq!(mesh.height_agl(1, 2, 0), 0.0);
        assert_eq!(mesh.index(1, 2, 3), 3 * 100 + 2 * 10 + 1);
    }

    #[test]
    fn test_locate() {
        let mesh = flat_mesh(10, 5);
        assert!(!mesh.in_mesh_xy(20.0, 500.0));
        assert!(mesh.in_mesh_xy(50.0, 950.0));
        let z_mid = 0.5 * (mesh.z(2, 3, 1) + mesh.z(2, 3, 2));
        let p = mesh.locate(300.0, 375.0, z_mid).unwrap();
        assert_eq!((p.i, p.j, p.k), (2, 3, 1));
        assert_relative_eq!(p.tx, 0.5, epsilon = 1e-12);
        assert_relative_eq!(p.ty, 0.25, epsilon = 1e-12);
        assert_relative_eq!(p.tz, 0.5, epsilon = 1e-12);
        assert!(mesh.locate(300.0, 375.0, 10.0).is_none());
        assert!(mesh.locate(300.0, 375.0, 300.0).is_none());
    }

    #[test]
    fn test_too_small_mesh_rejected() {
        let terrain = TerrainData::flat(4, 4, 100.0, 0.0);
        let surface = SurfaceSpec::default().rasterize(terrain.dem()).unwrap();
        assert!(Mesh::terrain_following(terrain.clone(), surface.clone(), 2, 1.3, 100.0).is_err());
        assert!(Mesh::terrain_following(terrain, surface, 5, 1.3, -5.0).is_err());
    }
}
