//! Finite-difference mass-consistent wind solver
//!
//! Based on:
//! - Sherman, C.A. (1978). "A Mass-Consistent Model for Wind Fields Over Complex Terrain."
//!   Journal of Applied Meteorology, 17(3), 312-319.
//! - Forthofer, J.M. (2007). "Modeling Wind in Complex Terrain for Use in Fire Spread Prediction."
//!   `PhD` Thesis, Colorado State University.
//!
//! # Theory
//!
//! The adjusted field minimizes the weighted deviation from the initial field
//! `(u₀, v₀, w₀)` subject to continuity. With a Lagrange multiplier potential `φ`:
//!
//! ```text
//! ∂²φ/∂x² + ∂²φ/∂y² + σ² ∂²φ/∂z² = ∂u₀/∂x + ∂v₀/∂y + ∂w₀/∂z
//!
//! u = u₀ - ∂φ/∂x
//! v = v₀ - ∂φ/∂y
//! w = w₀ - σ² ∂φ/∂z
//! ```
//!
//! so that `∇·(u, v, w) = 0`. `σ` weights vertical against horizontal adjustment.
//!
//! Boundary conditions: `φ = 0` on the lateral faces and the domain top (flow may
//! leave freely), `∂φ/∂z = 0` at the ground (no adjustment through the terrain).
//!
//! Vertical spacing is non-uniform, so the vertical second derivative uses
//!
//! ```text
//! ∂²φ/∂z² ≈ 2/(Δz⁻ + Δz⁺) · [(φₖ₊₁ - φₖ)/Δz⁺ - (φₖ - φₖ₋₁)/Δz⁻]
//! ```
//!
//! Horizontal derivatives are taken along mesh layers; terrain-following metric terms
//! are neglected.
//!
//! The primary solve is red-black successive over-relaxation; the alternate solve is
//! plain Gauss-Seidel with twice the iteration budget.

use super::r#trait::{EquationEngine, SolveOutcome};
use crate::error::{try_alloc, RunError, RunResult};
use crate::grid::{Mesh, VolumeVelocityField};
use crate::simulation::config::{RunConfiguration, SolverSettings};
use rayon::prelude::*;
use tracing::debug;

/// Assembled system state between `discretize` and `solve`.
#[derive(Debug, Clone)]
struct System {
    nx: usize,
    ny: usize,
    nz: usize,
    dx: f64,
    /// Node elevations, mesh index order
    z: Vec<f64>,
    /// Divergence of the initial field (right-hand side)
    rhs: Vec<f64>,
    u0: VolumeVelocityField,
}

impl System {
    #[inline]
    fn index(&self, ix: usize, iy: usize, iz: usize) -> usize {
        iz * self.nx * self.ny + iy * self.nx + ix
    }

    fn has_interior(&self) -> bool {
        self.nx > 2 && self.ny > 2 && self.nz > 2
    }
}

/// Mass-consistent engine on the terrain-following mesh.
#[derive(Debug, Default)]
pub struct MassConsistentEngine {
    system: Option<System>,
}

impl MassConsistentEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn system(&self) -> RunResult<&System> {
        self.system.as_ref().ok_or_else(|| {
            RunError::Configuration("equation engine solved before discretization".to_string())
        })
    }

    /// One full solve with relaxation factor `omega`.
    fn run(&self, settings: &SolverSettings, omega: f64, max_iterations: usize) -> RunResult<SolveOutcome> {
        let sys = self.system()?;
        if !sys.has_interior() {
            return Ok(SolveOutcome::Converged(sys.u0.clone()));
        }

        let (nx, ny, nz) = (sys.nx, sys.ny, sys.nz);
        let sigma2 = settings.sigma * settings.sigma;
        let inv_dx2 = 1.0 / (sys.dx * sys.dx);
        let inv_dy2 = inv_dx2;

        let mut phi = try_alloc(sys.z.len(), 0.0, "multiplier potential")?;

        let mut iterations = 0;
        let mut residual = f64::INFINITY;
        let mut converged = false;
        while iterations < max_iterations {
            iterations += 1;
            let mut max_delta: f64 = 0.0;
            let mut max_phi: f64 = 0.0;

            // Red pass (ix + iy + iz even), then black pass (odd)
            for parity in 0..2 {
                for iz in 1..nz - 1 {
                    for iy in 1..ny - 1 {
                        for ix in 1..nx - 1 {
                            if (ix + iy + iz) % 2 != parity {
                                continue;
                            }
                            let idx = sys.index(ix, iy, iz);
                            let z_here = sys.z[idx];
                            let dz_up = sys.z[sys.index(ix, iy, iz + 1)] - z_here;
                            let dz_down = z_here - sys.z[sys.index(ix, iy, iz - 1)];
                            let a_up = 2.0 / ((dz_up + dz_down) * dz_up);
                            let a_down = 2.0 / ((dz_up + dz_down) * dz_down);

                            let horizontal = (phi[sys.index(ix + 1, iy, iz)]
                                + phi[sys.index(ix - 1, iy, iz)])
                                * inv_dx2
                                + (phi[sys.index(ix, iy + 1, iz)] + phi[sys.index(ix, iy - 1, iz)])
                                    * inv_dy2;

                            // Ground Neumann condition folds the node below into the diagonal
                            let (below, diag_down) = if iz == 1 {
                                (0.0, 0.0)
                            } else {
                                (phi[sys.index(ix, iy, iz - 1)], a_down)
                            };
                            let vertical =
                                sigma2 * (a_up * phi[sys.index(ix, iy, iz + 1)] + diag_down * below);
                            let denom = 2.0 * inv_dx2 + 2.0 * inv_dy2 + sigma2 * (a_up + diag_down);

                            let gs = (horizontal + vertical - sys.rhs[idx]) / denom;
                            let new_val = phi[idx] + omega * (gs - phi[idx]);
                            max_delta = max_delta.max((new_val - phi[idx]).abs());
                            max_phi = max_phi.max(new_val.abs());
                            phi[idx] = new_val;
                        }
                    }
                }
            }

            if !max_delta.is_finite() {
                break;
            }
            // Relative update size; an all-zero potential is trivially converged
            residual = if max_phi > 0.0 { max_delta / max_phi } else { 0.0 };
            if residual < settings.tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            return Ok(SolveOutcome::Failed {
                iterations,
                residual,
            });
        }
        debug!("Poisson solve converged in {} iterations", iterations);

        // Ground nodes mirror the first interior layer
        for iy in 0..ny {
            for ix in 0..nx {
                phi[sys.index(ix, iy, 0)] = phi[sys.index(ix, iy, 1)];
            }
        }

        let mut out = sys.u0.clone();
        apply_correction(sys, &phi, sigma2, &mut out);
        Ok(SolveOutcome::Converged(out))
    }
}

/// `U = U0 - (∂φ/∂x, ∂φ/∂y, σ² ∂φ/∂z)` at interior nodes; boundaries keep `U0`.
fn apply_correction(sys: &System, phi: &[f64], sigma2: f64, out: &mut VolumeVelocityField) {
    let (nx, ny, nz) = (sys.nx, sys.ny, sys.nz);
    let layer = nx * ny;
    let inv_2dx = 1.0 / (2.0 * sys.dx);

    // Process interior Z layers in parallel
    let interior = layer..(nz - 1) * layer;
    out.u[interior.clone()]
        .par_chunks_mut(layer)
        .zip(out.v[interior.clone()].par_chunks_mut(layer))
        .zip(out.w[interior].par_chunks_mut(layer))
        .enumerate()
        .for_each(|(layer_idx, ((u_layer, v_layer), w_layer))| {
            let iz = layer_idx + 1;
            for iy in 1..ny - 1 {
                for ix in 1..nx - 1 {
                    let idx = sys.index(ix, iy, iz);
                    let local = iy * nx + ix;

                    let dphi_dx =
                        (phi[sys.index(ix + 1, iy, iz)] - phi[sys.index(ix - 1, iy, iz)]) * inv_2dx;
                    let dphi_dy =
                        (phi[sys.index(ix, iy + 1, iz)] - phi[sys.index(ix, iy - 1, iz)]) * inv_2dx;
                    let dz = sys.z[sys.index(ix, iy, iz + 1)] - sys.z[sys.index(ix, iy, iz - 1)];
                    let dphi_dz =
                        (phi[sys.index(ix, iy, iz + 1)] - phi[sys.index(ix, iy, iz - 1)]) / dz;

                    u_layer[local] = sys.u0.u[idx] - dphi_dx;
                    v_layer[local] = sys.u0.v[idx] - dphi_dy;
                    w_layer[local] = sys.u0.w[idx] - sigma2 * dphi_dz;
                }
            }
        });
}

impl EquationEngine for MassConsistentEngine {
    fn name(&self) -> &'static str {
        "mass-consistent finite difference"
    }

    fn discretize(
        &mut self,
        mesh: &Mesh,
        _config: &RunConfiguration,
        u0: &VolumeVelocityField,
    ) -> RunResult<()> {
        u0.ensure_matches(mesh)?;
        let (nx, ny, nz) = (mesh.nx(), mesh.ny(), mesh.nz());
        let layer = nx * ny;
        let dx = mesh.resolution();
        let z = mesh.z_values().to_vec();
        let mut rhs = try_alloc(z.len(), 0.0, "divergence")?;

        if nx > 2 && ny > 2 && nz > 2 {
            let inv_2dx = 1.0 / (2.0 * dx);
            let index = |ix: usize, iy: usize, iz: usize| iz * layer + iy * nx + ix;

            // Precompute divergence of the initial field, parallel over Z layers
            rhs[layer..(nz - 1) * layer]
                .par_chunks_mut(layer)
                .enumerate()
                .for_each(|(layer_idx, div_layer)| {
                    let iz = layer_idx + 1;
                    for iy in 1..ny - 1 {
                        for ix in 1..nx - 1 {
                            let du_dx = (u0.u[index(ix + 1, iy, iz)] - u0.u[index(ix - 1, iy, iz)])
                                * inv_2dx;
                            let dv_dy = (u0.v[index(ix, iy + 1, iz)] - u0.v[index(ix, iy - 1, iz)])
                                * inv_2dx;
                            let dz = z[index(ix, iy, iz + 1)] - z[index(ix, iy, iz - 1)];
                            let dw_dz =
                                (u0.w[index(ix, iy, iz + 1)] - u0.w[index(ix, iy, iz - 1)]) / dz;
                            div_layer[iy * nx + ix] = du_dx + dv_dy + dw_dz;
                        }
                    }
                });
        }

        self.system = Some(System {
            nx,
            ny,
            nz,
            dx,
            z,
            rhs,
            u0: u0.clone(),
        });
        Ok(())
    }

    fn solve(&mut self, config: &RunConfiguration) -> RunResult<SolveOutcome> {
        let settings = &config.solver;
        self.run(settings, settings.sor_omega, settings.max_iterations)
    }

    fn solve_alternate(&mut self, config: &RunConfiguration) -> RunResult<SolveOutcome> {
        let settings = &config.solver;
        self.run(settings, 1.0, settings.max_iterations.saturating_mul(2))
    }
}

/// Create the default equation engine.
pub fn create_equation_engine() -> Box<dyn EquationEngine> {
    Box::new(MassConsistentEngine::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::vec3::Vec3;
    use crate::grid::{SurfaceSpec, TerrainData};

    fn mesh() -> Mesh {
        let terrain = TerrainData::flat(9, 9, 50.0, 0.0);
        let surface = SurfaceSpec::default().rasterize(terrain.dem()).unwrap();
        Mesh::terrain_following(terrain, surface, 9, 1.2, 200.0).unwrap()
    }

    fn divergence(mesh: &Mesh, f: &VolumeVelocityField, i: usize, j: usize, k: usize) -> f64 {
        let dx = mesh.resolution();
        let du = (f.u[mesh.index(i + 1, j, k)] - f.u[mesh.index(i - 1, j, k)]) / (2.0 * dx);
        let dv = (f.v[mesh.index(i, j + 1, k)] - f.v[mesh.index(i, j - 1, k)]) / (2.0 * dx);
        let dz = mesh.z(i, j, k + 1) - mesh.z(i, j, k - 1);
        let dw = (f.w[mesh.index(i, j, k + 1)] - f.w[mesh.index(i, j, k - 1)]) / dz;
        du + dv + dw
    }

    #[test]
    fn test_uniform_field_unchanged() {
        let mesh = mesh();
        let config = RunConfiguration::default();
        let mut u0 = VolumeVelocityField::zeros(&mesh).unwrap();
        for idx in 0..u0.len() {
            u0.set(idx, Vec3::new(4.0, -1.0, 0.0));
        }
        let mut engine = MassConsistentEngine::new();
        engine.discretize(&mesh, &config, &u0).unwrap();
        match engine.solve(&config).unwrap() {
            SolveOutcome::Converged(u) => assert_eq!(u, u0),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_reduces_divergence() {
        let mesh = mesh();
        let mut config = RunConfiguration::default();
        config.solver.tolerance = 1e-8;
        config.solver.max_iterations = 20_000;
        let mut u0 = VolumeVelocityField::zeros(&mesh).unwrap();
        // Converging jet toward the centre column
        for k in 0..mesh.nz() {
            for j in 0..mesh.ny() {
                for i in 0..mesh.nx() {
                    let (x, _) = mesh.node_xy(i, j);
                    u0.set(mesh.index(i, j, k), Vec3::new((225.0 - x) * 0.01, 0.0, 0.0));
                }
            }
        }
        let before = divergence(&mesh, &u0, 4, 4, 4).abs();
        let mut engine = MassConsistentEngine::new();
        engine.discretize(&mesh, &config, &u0).unwrap();
        let u = match engine.solve(&config).unwrap() {
            SolveOutcome::Converged(u) => u,
            other => panic!("unexpected outcome {other:?}"),
        };
        let after = divergence(&mesh, &u, 4, 4, 4).abs();
        assert!(before > 1e-3);
        assert!(after < 0.5 * before, "divergence {before} -> {after}");
    }

    #[test]
    fn test_budget_exhaustion_reports_failure() {
        let mesh = mesh();
        let mut config = RunConfiguration::default();
        config.solver.tolerance = 1e-30;
        config.solver.max_iterations = 2;
        let mut u0 = VolumeVelocityField::zeros(&mesh).unwrap();
        u0.u[mesh.index(4, 4, 4)] = 5.0;
        let mut engine = MassConsistentEngine::new();
        engine.discretize(&mesh, &config, &u0).unwrap();
        assert!(!engine.solve(&config).unwrap().is_converged());
        match engine.solve_alternate(&config).unwrap() {
            SolveOutcome::Failed { iterations, .. } => assert_eq!(iterations, 4),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_solve_before_discretize_is_error() {
        let mut engine = MassConsistentEngine::new();
        assert!(engine.solve(&RunConfiguration::default()).is_err());
    }
}
