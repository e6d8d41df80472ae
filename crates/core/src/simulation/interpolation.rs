//! Height interpolation of the volume field
//!
//! For every mesh column the layers bracketing the output height are found by walking
//! up from the first layer above ground. Inside the first layer the boundary-layer
//! profile carries the first node's value down (or up) to the output height; higher
//! up the two bracketing nodes are interpolated linearly.

use crate::core_types::polar::wind_uv_to_sd;
use crate::core_types::raster::Raster;
use crate::core_types::vec3::Vec3;
use crate::error::RunResult;
use crate::grid::{Mesh, VolumeVelocityField};
use crate::initialization::InitializedFlow;
use crate::physics::wind_profile::WindProfile;
use crate::simulation::config::RunConfiguration;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Wind at the output height on the mesh's horizontal grid.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceWind {
    pub u: Raster,
    pub v: Raster,
    pub w: Raster,
    /// Horizontal speed `hypot(u, v)`; `w` is excluded
    pub speed: Raster,
    /// Direction the wind blows from, degrees clockwise from north
    pub direction: Raster,
}

impl SurfaceWind {
    /// Speed and direction grids from `u` and `v`.
    pub fn from_components(u: Raster, v: Raster, w: Raster) -> Self {
        let mut speed = u.like(0.0);
        let mut direction = u.like(0.0);
        for (n, (cu, cv)) in u.data().iter().zip(v.data()).enumerate() {
            if u.is_no_data(*cu) || v.is_no_data(*cv) {
                speed.data_mut()[n] = u.no_data();
                direction.data_mut()[n] = u.no_data();
                continue;
            }
            let (s, d) = wind_uv_to_sd(*cu, *cv);
            speed.data_mut()[n] = s;
            direction.data_mut()[n] = d;
        }
        Self {
            u,
            v,
            w,
            speed,
            direction,
        }
    }
}

/// Component values of one column at `output_height` above the vegetation.
pub fn column_value(
    mesh: &Mesh,
    field: &VolumeVelocityField,
    profile: &WindProfile,
    i: usize,
    j: usize,
    output_height: f64,
) -> Vec3 {
    let target = output_height + profile.rough_h;
    let nz = mesh.nz();

    let mut k = 1;
    let (mut h1, mut h2) = (0.0, 0.0);
    while h2 < target && k < nz {
        h2 = mesh.height_agl(i, j, k);
        h1 = mesh.height_agl(i, j, k - 1);
        k += 1;
    }
    k -= 1;

    let upper = field.get(mesh.index(i, j, k));
    if k <= 1 {
        let input_height = h2 - profile.rough_h;
        return upper.map(|c| profile.evaluate(c, input_height, target));
    }
    let lower = field.get(mesh.index(i, j, k - 1));
    let slope = (upper - lower) / (h2 - h1);
    slope * target + lower - slope * h1
}

/// Interpolate `field` to `output_height` over every mesh column.
///
/// Runs on the current rayon pool; rows are processed independently.
pub fn interpolate_to_height(
    config: &RunConfiguration,
    mesh: &Mesh,
    field: &VolumeVelocityField,
    flow: &InitializedFlow,
    output_height: f64,
) -> RunResult<SurfaceWind> {
    field.ensure_matches(mesh)?;
    let dem = mesh.terrain().dem();
    let nx = mesh.nx();
    let mut u = dem.like(0.0);
    let mut v = dem.like(0.0);
    let mut w = dem.like(0.0);

    u.data_mut()
        .par_chunks_mut(nx)
        .zip(v.data_mut().par_chunks_mut(nx))
        .zip(w.data_mut().par_chunks_mut(nx))
        .enumerate()
        .for_each(|(j, ((u_row, v_row), w_row))| {
            for i in 0..nx {
                let profile = flow.column_profile(mesh, config, i, j);
                let value = column_value(mesh, field, &profile, i, j, output_height);
                u_row[i] = value.x;
                v_row[i] = value.y;
                w_row[i] = value.z;
            }
        });

    Ok(SurfaceWind::from_components(u, v, w))
}

/// Wind reported at one requested location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointWind {
    pub name: String,
    pub x: f64,
    pub y: f64,
    /// Height above the vegetation (m)
    pub height: f64,
    pub u: f64,
    pub v: f64,
    pub w: f64,
    pub speed: f64,
    pub direction: f64,
}

/// Sample `field` at the configured output points.
///
/// Points below the first layer use the profile of the column they fall in; points
/// outside the mesh are skipped.
pub fn interpolate_points(
    config: &RunConfiguration,
    mesh: &Mesh,
    field: &VolumeVelocityField,
    flow: &InitializedFlow,
) -> Vec<PointWind> {
    let dem = mesh.terrain().dem();
    config
        .output
        .points
        .iter()
        .filter_map(|p| {
            let located = dem.cell_of(p.x, p.y).zip(dem.bilinear(p.x, p.y));
            let (Some(((row, col), ground)), true) = (located, mesh.in_mesh_xy(p.x, p.y)) else {
                warn!("Output point '{}' at ({:.1}, {:.1}) is outside the mesh", p.name, p.x, p.y);
                return None;
            };
            let profile = flow.column_profile(mesh, config, col, row);
            let target = p.height + profile.rough_h;
            let first = mesh.height_agl(col, row, 1);
            let value = if target >= first {
                field.sample(mesh, p.x, p.y, ground + target)?
            } else {
                let at_first = field.sample(mesh, p.x, p.y, ground + first)?;
                at_first.map(|c| profile.evaluate(c, first - profile.rough_h, target))
            };
            let (speed, direction) = wind_uv_to_sd(value.x, value.y);
            Some(PointWind {
                name: p.name.clone(),
                x: p.x,
                y: p.y,
                height: p.height,
                u: value.x,
                v: value.y,
                w: value.z,
                speed,
                direction,
            })
        })
        .collect()
}
