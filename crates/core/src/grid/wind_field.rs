//! Node-based 3D velocity fields
//!
//! A [`VolumeVelocityField`] stores the east (`u`), north (`v`) and up (`w`) components
//! at every mesh node as three flat buffers using the mesh's node index. The run keeps
//! two of them: `U0`, the initialized field, and `U`, the mass-consistent result.

use crate::core_types::vec3::Vec3;
use crate::error::{try_alloc, RunError, RunResult};
use crate::grid::mesh::{Mesh, MeshPoint};

/// Three scalar component fields on the mesh nodes.
///
/// The default value is an empty field matching no mesh; taking a field out of its
/// owner with `std::mem::take` leaves one behind and releases the buffers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeVelocityField {
    nx: usize,
    ny: usize,
    nz: usize,
    pub u: Vec<f64>,
    pub v: Vec<f64>,
    pub w: Vec<f64>,
}

impl VolumeVelocityField {
    /// Zero field shaped like `mesh`.
    pub fn zeros(mesh: &Mesh) -> RunResult<Self> {
        let n = mesh.num_nodes();
        Ok(Self {
            nx: mesh.nx(),
            ny: mesh.ny(),
            nz: mesh.nz(),
            u: try_alloc(n, 0.0, "u velocity field")?,
            v: try_alloc(n, 0.0, "v velocity field")?,
            w: try_alloc(n, 0.0, "w velocity field")?,
        })
    }

    /// Whether the field shares `mesh`'s topology.
    pub fn matches(&self, mesh: &Mesh) -> bool {
        self.nx == mesh.nx() && self.ny == mesh.ny() && self.nz == mesh.nz()
    }

    pub(crate) fn ensure_matches(&self, mesh: &Mesh) -> RunResult<()> {
        if self.matches(mesh) {
            Ok(())
        } else {
            Err(RunError::Configuration(format!(
                "velocity field is {}x{}x{} but the mesh is {}x{}x{}",
                self.nx,
                self.ny,
                self.nz,
                mesh.nx(),
                mesh.ny(),
                mesh.nz()
            )))
        }
    }

    pub fn len(&self) -> usize {
        self.u.len()
    }

    pub fn is_empty(&self) -> bool {
        self.u.is_empty()
    }

    #[inline]
    pub fn get(&self, idx: usize) -> Vec3 {
        Vec3::new(self.u[idx], self.v[idx], self.w[idx])
    }

    #[inline]
    pub fn set(&mut self, idx: usize, value: Vec3) {
        self.u[idx] = value.x;
        self.v[idx] = value.y;
        self.w[idx] = value.z;
    }

    /// True when every component is exactly zero at every node (a "null run").
    pub fn is_all_zero(&self) -> bool {
        self.u
            .iter()
            .chain(&self.v)
            .chain(&self.w)
            .all(|c| *c == 0.0)
    }

    /// Trilinear interpolation at a located mesh point.
    pub fn interpolate(&self, mesh: &Mesh, p: &MeshPoint) -> Vec3 {
        let mut acc = Vec3::zeros();
        for (dk, wz) in [(0, 1.0 - p.tz), (1, p.tz)] {
            for (dj, wy) in [(0, 1.0 - p.ty), (1, p.ty)] {
                for (di, wx) in [(0, 1.0 - p.tx), (1, p.tx)] {
                    let weight = wx * wy * wz;
                    if weight == 0.0 {
                        continue;
                    }
                    let k = (p.k + dk).min(mesh.nz() - 1);
                    acc += self.get(mesh.index(p.i + di, p.j + dj, k)) * weight;
                }
            }
        }
        acc
    }

    /// Velocity at a projected position; `None` outside the mesh.
    pub fn sample(&self, mesh: &Mesh, x: f64, y: f64, z: f64) -> Option<Vec3> {
        mesh.locate(x, y, z).map(|p| self.interpolate(mesh, &p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::surface::SurfaceSpec;
    use crate::grid::terrain::TerrainData;
    use approx::assert_relative_eq;

    fn mesh() -> Mesh {
        let terrain = TerrainData::flat(6, 5, 10.0, 0.0);
        let surface = SurfaceSpec::default().rasterize(terrain.dem()).unwrap();
        Mesh::terrain_following(terrain, surface, 6, 1.2, 100.0).unwrap()
    }

    #[test]
    fn test_zero_field() {
        let mesh = mesh();
        let field = VolumeVelocityField::zeros(&mesh).unwrap();
        assert_eq!(field.len(), 6 * 5 * 6);
        assert!(field.is_all_zero());
        assert!(field.matches(&mesh));
    }

    #[test]
    fn test_trilinear_reproduces_linear_field() {
        let mesh = mesh();
        let mut field = VolumeVelocityField::zeros(&mesh).unwrap();
        for k in 0..mesh.nz() {
            for j in 0..mesh.ny() {
                for i in 0..mesh.nx() {
                    let (x, y) = mesh.node_xy(i, j);
                    let z = mesh.z(i, j, k);
                    field.set(mesh.index(i, j, k), Vec3::new(x, 2.0 * y, z));
                }
            }
        }
        assert!(!field.is_all_zero());
        let s = field.sample(&mesh, 23.0, 31.0, 40.0).unwrap();
        assert_relative_eq!(s.x, 23.0, epsilon = 1e-9);
        assert_relative_eq!(s.y, 62.0, epsilon = 1e-9);
        assert_relative_eq!(s.z, 40.0, epsilon = 1e-9);
        assert!(field.sample(&mesh, 1.0, 31.0, 40.0).is_none());
    }
}
