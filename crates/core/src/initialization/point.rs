//! Station-based initialization
//!
//! Stations are first brought to a common layer, the height of the tallest station
//! above the vegetation, using each station's local profile. The layer is then
//! filled horizontally by inverse-distance-squared weighting, where each station
//! only reaches the columns inside its radius of influence (negative = everywhere).

use super::{fill_columns, ColumnInput, FlowInitializer, InitializedFlow};
use crate::core_types::raster::Raster;
use crate::core_types::station::Station;
use crate::error::{RunError, RunResult};
use crate::grid::Mesh;
use crate::physics::boundary_layer::neutral_bl_height;
use crate::physics::wind_profile::WindProfile;
use crate::simulation::config::RunConfiguration;
use tracing::debug;

const DISTANCE_POWER: i32 = 2;

/// Initializes from weather stations.
#[derive(Debug, Clone)]
pub struct PointInitializer {
    stations: Vec<Station>,
}

/// Station values reduced to the common interpolation layer.
#[derive(Debug, Clone, Copy)]
struct LayerValue {
    x: f64,
    y: f64,
    radius: f64,
    u: f64,
    v: f64,
    temperature: f64,
    cloud_cover: f64,
}

impl PointInitializer {
    /// `stations` must already be on the run's time step.
    pub fn new(stations: Vec<Station>) -> Self {
        Self { stations }
    }

    pub fn stations(&self) -> &[Station] {
        &self.stations
    }

    /// Height above the vegetation of the interpolation layer.
    pub fn layer_height(&self) -> f64 {
        self.stations.iter().map(|s| s.height).fold(f64::MIN, f64::max)
    }

    fn station_profile(config: &RunConfiguration, mesh: &Mesh, station: &Station) -> WindProfile {
        let base = WindProfile {
            shape: config.profile_shape,
            obukhov_length: config.obukhov_length,
            ..WindProfile::default()
        };
        // Outside the grid the station is assumed to stand in grass
        match mesh.terrain().dem().cell_of(station.x, station.y) {
            Some((row, col)) => mesh.surface().profile(row, col, &base),
            None => base,
        }
    }

    fn layer_values(&self, config: &RunConfiguration, mesh: &Mesh) -> RunResult<Vec<LayerValue>> {
        let layer = self.layer_height();
        self.stations
            .iter()
            .map(|s| {
                let (mut u, mut v) = s.uv()?;
                if s.height != layer {
                    let mut profile = Self::station_profile(config, mesh, s);
                    profile.bl_height = neutral_bl_height(u.hypot(v), s.height, &profile, config.latitude);
                    let agl = layer + profile.rough_h;
                    u = profile.evaluate(u, s.height, agl);
                    v = profile.evaluate(v, s.height, agl);
                    debug!(
                        "Station {} moved from {:.1} m to {:.1} m: u={:.3}, v={:.3}",
                        s.name, s.height, layer, u, v
                    );
                }
                Ok(LayerValue {
                    x: s.x,
                    y: s.y,
                    radius: s.influence_radius(),
                    u,
                    v,
                    temperature: s.temperature(),
                    cloud_cover: s.cloud_cover(),
                })
            })
            .collect()
    }
}

/// Inverse-distance weights of every station reaching `(x, y)`.
///
/// A station exactly at the point takes all the weight. `None` when no station
/// reaches the point.
fn weights(values: &[LayerValue], x: f64, y: f64) -> Option<Vec<f64>> {
    let mut w = vec![0.0; values.len()];
    let mut total = 0.0;
    for (n, s) in values.iter().enumerate() {
        let d = (s.x - x).hypot(s.y - y);
        if s.radius >= 0.0 && d > s.radius {
            continue;
        }
        if d == 0.0 {
            let mut exact = vec![0.0; values.len()];
            exact[n] = 1.0;
            return Some(exact);
        }
        w[n] = 1.0 / d.powi(DISTANCE_POWER);
        total += w[n];
    }
    if total == 0.0 {
        return None;
    }
    w.iter_mut().for_each(|wi| *wi /= total);
    Some(w)
}

fn weighted(values: &[LayerValue], w: &[f64], pick: impl Fn(&LayerValue) -> f64) -> f64 {
    values.iter().zip(w).map(|(s, wi)| pick(s) * wi).sum()
}

fn unfilled(x: f64, y: f64) -> RunError {
    RunError::Configuration(format!(
        "no weather station reaches the point ({x:.1}, {y:.1}); \
         let at least one wx station have an infinite influence radius"
    ))
}

impl FlowInitializer for PointInitializer {
    fn name(&self) -> &'static str {
        "point"
    }

    fn initialize_fields(&self, config: &RunConfiguration, mesh: &Mesh) -> RunResult<InitializedFlow> {
        if self.stations.is_empty() {
            return Err(RunError::Configuration(
                "point initialization needs at least one weather station".to_string(),
            ));
        }
        let values = self.layer_values(config, mesh)?;
        let layer = self.layer_height();

        let (u0, bl_height) = fill_columns(config, mesh, |i, j| {
            let (x, y) = mesh.node_xy(i, j);
            let w = weights(&values, x, y).ok_or_else(|| unfilled(x, y))?;
            Ok(ColumnInput {
                u: weighted(&values, &w, |s| s.u),
                v: weighted(&values, &w, |s| s.v),
                input_height: layer,
            })
        })?;

        let dem = mesh.terrain().dem();
        let mut cloud = dem.like(0.0);
        let mut air_temperature = dem.like(0.0);
        fill_scalar(mesh, &values, &mut cloud, |s| s.cloud_cover)?;
        fill_scalar(mesh, &values, &mut air_temperature, |s| s.temperature)?;

        Ok(InitializedFlow {
            u0,
            cloud,
            air_temperature,
            bl_height,
        })
    }
}

fn fill_scalar(
    mesh: &Mesh,
    values: &[LayerValue],
    grid: &mut Raster,
    pick: impl Fn(&LayerValue) -> f64,
) -> RunResult<()> {
    for j in 0..mesh.ny() {
        for i in 0..mesh.nx() {
            let (x, y) = mesh.node_xy(i, j);
            let w = weights(values, x, y).ok_or_else(|| unfilled(x, y))?;
            grid.set(j, i, weighted(values, &w, &pick));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::station::StationSample;
    use crate::grid::{MeshBuilder, StandardMeshBuilder};
    use crate::physics::wind_profile::ProfileShape;
    use approx::assert_relative_eq;

    fn value(x: f64, y: f64, radius: f64, u: f64) -> LayerValue {
        LayerValue {
            x,
            y,
            radius,
            u,
            v: 0.0,
            temperature: 288.0,
            cloud_cover: 0.0,
        }
    }

    #[test]
    fn test_idw_midpoint_average() {
        let values = [value(0.0, 0.0, -1.0, 2.0), value(10.0, 0.0, -1.0, 4.0)];
        let w = weights(&values, 5.0, 0.0).unwrap();
        assert_relative_eq!(weighted(&values, &w, |s| s.u), 3.0);
        let w = weights(&values, 10.0, 0.0).unwrap();
        assert_relative_eq!(weighted(&values, &w, |s| s.u), 4.0);
    }

    #[test]
    fn test_idw_honors_radius() {
        let values = [value(0.0, 0.0, 3.0, 2.0), value(10.0, 0.0, -1.0, 4.0)];
        let w = weights(&values, 5.0, 0.0).unwrap();
        assert_relative_eq!(weighted(&values, &w, |s| s.u), 4.0);
        let finite_only = [value(0.0, 0.0, 3.0, 2.0)];
        assert!(weights(&finite_only, 5.0, 0.0).is_none());
    }

    #[test]
    fn test_single_station_fills_domain() {
        let config = RunConfiguration {
            profile_shape: ProfileShape::Uniform,
            ..RunConfiguration::default()
        };
        let mesh = StandardMeshBuilder.build_mesh(&config).unwrap();
        let station = Station::legacy(
            "only",
            500.0,
            500.0,
            10.0,
            StationSample::new(6.0, 180.0).with_cloud_cover(0.5),
        );
        let flow = PointInitializer::new(vec![station])
            .initialize_fields(&config, &mesh)
            .unwrap();
        let idx = mesh.index(3, 7, mesh.nz() - 1);
        assert_relative_eq!(flow.u0.u[idx], 0.0, epsilon = 1e-12);
        assert_relative_eq!(flow.u0.v[idx], 6.0, epsilon = 1e-12);
        assert_relative_eq!(flow.cloud.get(2, 2), 0.5);
        assert_relative_eq!(flow.air_temperature.get(2, 2), 288.15);
    }

    #[test]
    fn test_unreachable_columns_are_an_error() {
        let config = RunConfiguration::default();
        let mesh = StandardMeshBuilder.build_mesh(&config).unwrap();
        let station = Station::legacy(
            "near",
            500.0,
            500.0,
            10.0,
            StationSample::new(6.0, 180.0).with_influence_radius(50.0),
        );
        let err = PointInitializer::new(vec![station])
            .initialize_fields(&config, &mesh)
            .unwrap_err();
        match err {
            RunError::Configuration(msg) => assert!(msg.contains("infinite influence radius")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_layer_is_tallest_station() {
        let a = Station::legacy("a", 0.0, 0.0, 10.0, StationSample::new(1.0, 0.0));
        let b = Station::legacy("b", 0.0, 0.0, 20.0, StationSample::new(1.0, 0.0));
        assert_relative_eq!(PointInitializer::new(vec![a, b]).layer_height(), 20.0);
    }
}
