//! Weather-model initialization
//!
//! Gridded model output for one time step is sampled onto the mesh columns. Speed and
//! direction are converted to `(u, v)` grids first so that directions near north do
//! not average across the 0/360 seam.

use super::{fill_columns, ColumnInput, FlowInitializer, InitializedFlow};
use crate::core_types::polar::wind_sd_to_uv;
use crate::core_types::raster::Raster;
use crate::error::{RunError, RunResult};
use crate::grid::Mesh;
use crate::simulation::config::{RunConfiguration, WeatherModelInput, WeatherModelStep};

const DEFAULT_TEMPERATURE: f64 = 288.15;

/// Initializes from gridded weather-model output.
#[derive(Debug, Clone)]
pub struct WeatherModelInitializer {
    input: WeatherModelInput,
}

impl WeatherModelInitializer {
    pub fn new(input: WeatherModelInput) -> Self {
        Self { input }
    }

    fn step(&self) -> RunResult<&WeatherModelStep> {
        self.input.steps.get(self.input.time_step).ok_or_else(|| {
            RunError::Configuration(format!(
                "weather model time step {} is not available",
                self.input.time_step
            ))
        })
    }
}

/// Split speed/direction grids into `(u, v)` grids.
fn uv_grids(speed: &Raster, direction: &Raster) -> RunResult<(Raster, Raster)> {
    let mut u = speed.clone();
    let mut v = speed.clone();
    for row in 0..speed.nrows() {
        for col in 0..speed.ncols() {
            let s = speed.get(row, col);
            let d = direction.get(row, col);
            if speed.is_no_data(s) || direction.is_no_data(d) {
                u.set(row, col, speed.no_data());
                v.set(row, col, speed.no_data());
                continue;
            }
            let (cu, cv) = wind_sd_to_uv(s, d)?;
            u.set(row, col, cu);
            v.set(row, col, cv);
        }
    }
    Ok((u, v))
}

/// Value of `grid` at `(x, y)`; bilinear where possible, else the nearest cell.
fn sample(grid: &Raster, what: &str, x: f64, y: f64) -> RunResult<f64> {
    grid.bilinear(x, y)
        .or_else(|| grid.nearest(x, y).filter(|v| !grid.is_no_data(*v)))
        .ok_or_else(|| {
            RunError::Configuration(format!(
                "weather model {what} grid does not cover ({x:.1}, {y:.1})"
            ))
        })
}

fn sample_onto(mesh: &Mesh, grid: Option<&Raster>, what: &str, default: f64) -> RunResult<Raster> {
    let mut out = mesh.terrain().dem().like(default);
    if let Some(grid) = grid {
        for j in 0..mesh.ny() {
            for i in 0..mesh.nx() {
                let (x, y) = mesh.node_xy(i, j);
                out.set(j, i, sample(grid, what, x, y)?);
            }
        }
    }
    Ok(out)
}

impl FlowInitializer for WeatherModelInitializer {
    fn name(&self) -> &'static str {
        "weather model"
    }

    fn initialize_fields(&self, config: &RunConfiguration, mesh: &Mesh) -> RunResult<InitializedFlow> {
        let step = self.step()?;
        let (u_grid, v_grid) = uv_grids(&step.speed, &step.direction)?;
        let input_height = self.input.input_height;

        let (u0, bl_height) = fill_columns(config, mesh, |i, j| {
            let (x, y) = mesh.node_xy(i, j);
            Ok(ColumnInput {
                u: sample(&u_grid, "u", x, y)?,
                v: sample(&v_grid, "v", x, y)?,
                input_height,
            })
        })?;

        Ok(InitializedFlow {
            u0,
            cloud: sample_onto(mesh, step.cloud_cover.as_ref(), "cloud cover", 0.0)?,
            air_temperature: sample_onto(
                mesh,
                step.temperature.as_ref(),
                "temperature",
                DEFAULT_TEMPERATURE,
            )?,
            bl_height,
        })
    }
}
