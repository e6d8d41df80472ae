//! Optional surface products derived from the solved field.

use crate::core_types::raster::Raster;
use crate::error::{RunError, RunResult};
use crate::grid::{Mesh, VolumeVelocityField};
use crate::physics::surface_stress::{log_friction_velocity, pm10_flux};
use rayon::prelude::*;

/// Friction velocity (m/s) per mesh column.
///
/// Uses the horizontal speed at the first node above `d + 7·z0`, where the log law
/// holds.
pub fn friction_velocity(mesh: &Mesh, field: &VolumeVelocityField) -> RunResult<Raster> {
    field.ensure_matches(mesh)?;
    let nx = mesh.nx();
    let mut ustar = mesh.terrain().dem().like(0.0);
    ustar
        .data_mut()
        .par_chunks_mut(nx)
        .enumerate()
        .for_each(|(j, row)| {
            for (i, cell) in row.iter_mut().enumerate() {
                let (z0, _, d) = mesh.surface().at(j, i);
                let k = (1..mesh.nz())
                    .find(|k| mesh.height_agl(i, j, *k) > d + 7.0 * z0)
                    .unwrap_or(mesh.nz() - 1);
                let idx = mesh.index(i, j, k);
                let speed = field.u[idx].hypot(field.v[idx]);
                *cell = log_friction_velocity(speed, mesh.height_agl(i, j, k), z0, d);
            }
        });
    Ok(ustar)
}

/// Carry an erodible-source grid onto the mesh's horizontal grid.
///
/// Each mesh cell takes the source cell under its centre. Cells the source does not
/// cover become no-data and therefore non-erodible.
pub fn dust_source_on_mesh(source: &Raster, mesh: &Mesh) -> Raster {
    let dem = mesh.terrain().dem();
    let mut mask = dem.like(source.no_data()).with_no_data(source.no_data());
    for row in 0..dem.nrows() {
        for col in 0..dem.ncols() {
            let (x, y) = dem.cell_center(row, col);
            if let Some(v) = source.nearest(x, y) {
                mask.set(row, col, v);
            }
        }
    }
    mask
}

/// PM10 emission flux per mesh column from a friction-velocity grid.
///
/// `source` marks erodible cells with any non-zero value and must share the mesh's
/// horizontal grid; without it every cell is erodible.
pub fn dust_emission(ustar: &Raster, source: Option<&Raster>) -> RunResult<Raster> {
    if let Some(mask) = source {
        if mask.ncols() != ustar.ncols() || mask.nrows() != ustar.nrows() {
            return Err(RunError::Configuration(format!(
                "dust source grid is {}x{} but the mesh grid is {}x{}",
                mask.ncols(),
                mask.nrows(),
                ustar.ncols(),
                ustar.nrows()
            )));
        }
    }
    let mut flux = ustar.like(0.0);
    for (n, (out, u_star)) in flux.data_mut().iter_mut().zip(ustar.data()).enumerate() {
        let erodible = source.is_none_or(|m| {
            let v = m.data()[n];
            v != 0.0 && !m.is_no_data(v)
        });
        if erodible {
            *out = pm10_flux(*u_star);
        }
    }
    Ok(flux)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::vec3::Vec3;
    use crate::grid::{MeshBuilder, StandardMeshBuilder};
    use crate::physics::surface_stress::constants::USTAR_THRESHOLD;
    use crate::simulation::config::RunConfiguration;

    fn windy_mesh(speed: f64) -> (Mesh, VolumeVelocityField) {
        let mesh = StandardMeshBuilder.build_mesh(&RunConfiguration::default()).unwrap();
        let mut field = VolumeVelocityField::zeros(&mesh).unwrap();
        for idx in 0..field.len() {
            field.set(idx, Vec3::new(speed, 0.0, 0.0));
        }
        (mesh, field)
    }

    #[test]
    fn test_friction_velocity_positive_in_wind() {
        let (mesh, field) = windy_mesh(8.0);
        let ustar = friction_velocity(&mesh, &field).unwrap();
        assert!(ustar.data().iter().all(|u| *u > 0.0));
        let (calm_mesh, calm) = windy_mesh(0.0);
        let still = friction_velocity(&calm_mesh, &calm).unwrap();
        assert!(still.data().iter().all(|u| *u == 0.0));
    }

    #[test]
    fn test_dust_source_carried_onto_mesh_grid() {
        let mesh = StandardMeshBuilder.build_mesh(&RunConfiguration::default()).unwrap();
        // Coarse 2x2 source over the default 1 km domain: only the east half erodes
        let mut source = Raster::new(2, 2, 0.0, 0.0, 500.0, 0.0);
        source.set(0, 1, 1.0);
        source.set(1, 1, 1.0);

        let mask = dust_source_on_mesh(&source, &mesh);
        assert_eq!(mask.ncols(), mesh.nx());
        assert_eq!(mask.nrows(), mesh.ny());
        let dem = mesh.terrain().dem();
        for row in 0..mask.nrows() {
            for col in 0..mask.ncols() {
                let (x, _) = dem.cell_center(row, col);
                let expected = if x > 500.0 { 1.0 } else { 0.0 };
                assert_eq!(mask.get(row, col), expected);
            }
        }

        let ustar = dem.like(1.0);
        let flux = dust_emission(&ustar, Some(&mask)).unwrap();
        assert_eq!(flux.get(0, 0), 0.0);
        assert!(flux.get(0, mask.ncols() - 1) > 0.0);
    }

    #[test]
    fn test_dust_masked_and_thresholded() {
        let ustar = Raster::new(2, 1, 0.0, 0.0, 1.0, 0.5);
        let mut mask = ustar.like(0.0);
        mask.set(0, 1, 1.0);
        let flux = dust_emission(&ustar, Some(&mask)).unwrap();
        assert_eq!(flux.get(0, 0), 0.0);
        assert!(flux.get(0, 1) > 0.0);

        let weak = Raster::new(2, 1, 0.0, 0.0, 1.0, USTAR_THRESHOLD * 0.5);
        let none = dust_emission(&weak, None).unwrap();
        assert!(none.data().iter().all(|f| *f == 0.0));

        let wrong = Raster::new(3, 1, 0.0, 0.0, 1.0, 1.0);
        assert!(dust_emission(&ustar, Some(&wrong)).is_err());
    }
}
