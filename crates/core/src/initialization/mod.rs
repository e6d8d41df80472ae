//! Flow initialization
//!
//! A [`FlowInitializer`] turns the run inputs into the initial volume field `U0`
//! plus the 2D grids the rest of the run needs (cloud cover, air temperature and
//! boundary-layer depth per column). There is one implementation per
//! [`InitializationMode`]; [`create_initializer`] picks it.
//!
//! Every initializer reduces its inputs to a reference wind per column and fills the
//! column with the boundary-layer profile:
//!
//! ```text
//! u(k) = profile(u_ref, input_height, z(k) - ground)
//! ```

pub mod domain_average;
pub mod point;
pub mod weather_model;

pub use domain_average::DomainAverageInitializer;
pub use point::PointInitializer;
pub use weather_model::WeatherModelInitializer;

use crate::core_types::raster::Raster;
use crate::core_types::station::Station;
use crate::error::RunResult;
use crate::grid::{Mesh, VolumeVelocityField};
use crate::physics::boundary_layer::neutral_bl_height;
use crate::physics::wind_profile::WindProfile;
use crate::simulation::config::{InitializationMode, PointInput, RunConfiguration};
use rayon::prelude::*;

/// Initial state handed to the equation engine and the output stage.
#[derive(Debug, Clone)]
pub struct InitializedFlow {
    /// Initial velocity at every mesh node
    pub u0: VolumeVelocityField,
    /// Cloud cover fraction per mesh column
    pub cloud: Raster,
    /// Air temperature per mesh column (K)
    pub air_temperature: Raster,
    /// Boundary-layer depth per mesh column (m)
    pub bl_height: Raster,
}

impl InitializedFlow {
    /// Profile parameters of column `(i, j)`.
    pub fn column_profile(&self, mesh: &Mesh, config: &RunConfiguration, i: usize, j: usize) -> WindProfile {
        let base = WindProfile {
            shape: config.profile_shape,
            obukhov_length: config.obukhov_length,
            bl_height: self.bl_height.get(j, i),
            ..WindProfile::default()
        };
        mesh.surface().profile(j, i, &base)
    }
}

/// Builds `U0` for one initialization mode.
pub trait FlowInitializer: Send + Sync {
    /// Get the initializer name for logging
    fn name(&self) -> &'static str;

    /// Build the initial fields on `mesh`
    fn initialize_fields(&self, config: &RunConfiguration, mesh: &Mesh) -> RunResult<InitializedFlow>;
}

/// Pick the initializer for `mode`.
///
/// `scratch` replaces the configured stations of a point run; the matching loop
/// passes its working inputs here on every outer iteration.
pub fn create_initializer(
    mode: &InitializationMode,
    scratch: Option<&[Station]>,
) -> RunResult<Box<dyn FlowInitializer>> {
    Ok(match mode {
        InitializationMode::DomainAverage(input) => Box::new(DomainAverageInitializer::new(input.clone())),
        InitializationMode::PointMatching(input) => {
            let stations = match scratch {
                Some(s) => s.to_vec(),
                None => observations(input)?,
            };
            Box::new(PointInitializer::new(stations))
        }
        InitializationMode::WeatherModel(input) => Box::new(WeatherModelInitializer::new(input.clone())),
    })
}

/// The configured stations with the run's time step selected.
pub fn observations(input: &PointInput) -> RunResult<Vec<Station>> {
    input
        .stations
        .iter()
        .map(|s| {
            let mut s = s.clone();
            s.select_step(input.time_step)?;
            Ok(s)
        })
        .collect()
}

/// Reference wind of one column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ColumnInput {
    pub u: f64,
    pub v: f64,
    /// Height of `u`, `v` above the vegetation top (m)
    pub input_height: f64,
}

/// Fill every column of `mesh` from its reference wind.
///
/// Returns the field and the neutral boundary-layer depth used per column.
pub(crate) fn fill_columns<F>(
    config: &RunConfiguration,
    mesh: &Mesh,
    column_input: F,
) -> RunResult<(VolumeVelocityField, Raster)>
where
    F: Fn(usize, usize) -> RunResult<ColumnInput> + Sync,
{
    let (nx, ny, nz) = (mesh.nx(), mesh.ny(), mesh.nz());
    let columns: Vec<(f64, Vec<(f64, f64)>)> = (0..nx * ny)
        .into_par_iter()
        .map(|c| {
            let (i, j) = (c % nx, c / nx);
            let input = column_input(i, j)?;
            let mut profile = mesh.surface().profile(
                j,
                i,
                &WindProfile {
                    shape: config.profile_shape,
                    obukhov_length: config.obukhov_length,
                    ..WindProfile::default()
                },
            );
            profile.bl_height =
                neutral_bl_height(input.u.hypot(input.v), input.input_height, &profile, config.latitude);
            let values = (0..nz)
                .map(|k| {
                    let agl = mesh.height_agl(i, j, k);
                    (
                        profile.evaluate(input.u, input.input_height, agl),
                        profile.evaluate(input.v, input.input_height, agl),
                    )
                })
                .collect();
            Ok((profile.bl_height, values))
        })
        .collect::<RunResult<_>>()?;

    let mut field = VolumeVelocityField::zeros(mesh)?;
    let mut bl_height = mesh.terrain().dem().like(0.0);
    for (c, (bl, values)) in columns.into_iter().enumerate() {
        let (i, j) = (c % nx, c / nx);
        bl_height.set(j, i, bl);
        for (k, (u, v)) in values.into_iter().enumerate() {
            let idx = mesh.index(i, j, k);
            field.u[idx] = u;
            field.v[idx] = v;
        }
    }
    Ok((field, bl_height))
}
