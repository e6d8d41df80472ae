//! Station-matching convergence state
//!
//! The outer loop re-initializes the flow from a set of "scratch" station inputs,
//! solves, and nudges each scratch input towards the observation until the solved
//! field agrees with every station within tolerance. Each enforced component
//! (east, north) follows a relaxation step with one level of backoff:
//!
//! ```text
//! worse than last time (iteration > 1, no retry yet):
//!     next = old_input + relax * (truth - old_output) / 2      keep old pair
//! otherwise:
//!     next = try_input + relax * (truth - try_output)          old pair <- try pair
//! ```
//!
//! The vertical component is reported but never enforced.

use crate::core_types::station::Station;
use crate::core_types::vec3::Vec3;
use crate::error::{RunError, RunResult};
use crate::grid::{Mesh, VolumeVelocityField};
use crate::simulation::config::MatchingSettings;
use std::fmt;
use tracing::{debug, info};

/// States of the matching loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchingPhase {
    Initializing,
    Solving,
    Comparing,
    Converged,
    IterationBudgetExhausted,
    Cancelled,
}

impl MatchingPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MatchingPhase::Converged | MatchingPhase::IterationBudgetExhausted | MatchingPhase::Cancelled
        )
    }
}

impl fmt::Display for MatchingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Outcome of comparing one solved field with the observations.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonReport {
    /// Every enforced component of every in-mesh station is within tolerance.
    pub matched: bool,
    /// Largest |Δu| or |Δv| over the stations compared this iteration
    pub max_mismatch: f64,
    /// Number of stations inside the mesh
    pub compared: usize,
    /// Remapped progress, 0 to 100
    pub progress: u8,
}

#[derive(Debug, Clone, Copy)]
struct ComponentStep {
    next_input: f64,
    keep_old: bool,
}

/// Relaxation step with at most one halving per iteration.
fn step_component(
    try_input: f64,
    try_output: f64,
    old_input: f64,
    old_output: f64,
    truth: f64,
    iteration: usize,
    retries: &mut u32,
    relaxation: f64,
) -> ComponentStep {
    if (try_output - truth).abs() > (old_output - truth).abs() && iteration > 1 && *retries < 1 {
        *retries += 1;
        ComponentStep {
            next_input: old_input
                + relaxation * (truth - old_output) / 2_f64.powi(*retries as i32),
            keep_old: true,
        }
    } else {
        *retries = 0;
        ComponentStep {
            next_input: try_input + relaxation * (truth - try_output),
            keep_old: false,
        }
    }
}

/// Working copies and counters owned by one matching loop.
///
/// `scratch`, `old_input` and `old_output` are indexed like the observations the
/// state was created from; their lengths never change.
#[derive(Debug, Clone)]
pub struct MatchingState {
    scratch: Vec<Station>,
    old_input: Vec<Station>,
    old_output: Vec<Station>,
    retries: Vec<[u32; 2]>,
    starting_mismatch: f64,
    current_mismatch: f64,
    phase: MatchingPhase,
    iteration: usize,
}

impl MatchingState {
    /// All working copies start as the observations themselves.
    pub fn new(observations: &[Station]) -> Self {
        Self {
            scratch: observations.to_vec(),
            old_input: observations.to_vec(),
            old_output: observations.to_vec(),
            retries: vec![[0, 0]; observations.len()],
            starting_mismatch: 0.0,
            current_mismatch: 0.0,
            phase: MatchingPhase::Initializing,
            iteration: 0,
        }
    }

    /// Inputs for the next initialization.
    pub fn scratch(&self) -> &[Station] {
        &self.scratch
    }

    pub fn len(&self) -> usize {
        self.scratch.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scratch.is_empty()
    }

    /// Backoff counters `[u, v]` of station `index`.
    pub fn retries(&self, index: usize) -> [u32; 2] {
        self.retries[index]
    }

    pub fn phase(&self) -> MatchingPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: MatchingPhase) {
        debug!("Matching phase {} -> {}", self.phase, phase);
        self.phase = phase;
    }

    /// Outer iterations started so far (1-based once running).
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn starting_mismatch(&self) -> f64 {
        self.starting_mismatch
    }

    pub fn current_mismatch(&self) -> f64 {
        self.current_mismatch
    }

    /// Start the next outer iteration.
    pub fn begin_iteration(&mut self) -> usize {
        self.iteration += 1;
        self.set_phase(MatchingPhase::Initializing);
        self.iteration
    }

    /// Compare computed velocities with the observations and prepare the next inputs.
    ///
    /// `computed[i]` is the solved velocity at station `i`, or `None` when the
    /// station lies outside the mesh and is skipped.
    pub fn compare(
        &mut self,
        observations: &[Station],
        computed: &[Option<Vec3>],
        settings: &MatchingSettings,
    ) -> RunResult<ComparisonReport> {
        if observations.len() != self.scratch.len() || computed.len() != self.scratch.len() {
            return Err(RunError::Configuration(format!(
                "matching state holds {} stations but {} observations and {} samples were given",
                self.scratch.len(),
                observations.len(),
                computed.len()
            )));
        }
        self.phase = MatchingPhase::Comparing;

        let tol = settings.tolerance;
        let first = self.iteration <= 1;
        let mut matched = true;
        let mut max_mismatch: f64 = 0.0;
        let mut compared = 0;

        for (i, (truth_station, sample)) in observations.iter().zip(computed).enumerate() {
            let Some(out) = sample else {
                continue;
            };
            compared += 1;

            let (true_u, true_v) = truth_station.uv()?;
            let true_w = truth_station.w_speed();
            let du = (true_u - out.x).abs();
            let dv = (true_v - out.y).abs();
            if du > tol || dv > tol {
                matched = false;
            }
            max_mismatch = max_mismatch.max(du).max(dv);

            let (try_in_u, try_in_v) = self.scratch[i].uv()?;
            let (old_in_u, old_in_v) = self.old_input[i].uv()?;
            let (old_out_u, old_out_v) = self.old_output[i].uv()?;

            debug!(
                "{}\t{}\tU_diff = {:.6}\tV_diff = {:.6}\tW_diff = {:.6}",
                i,
                truth_station.name,
                true_u - out.x,
                true_v - out.y,
                true_w - out.z
            );

            let relax = settings.relaxation;
            let [retry_u, retry_v] = &mut self.retries[i];
            let u = step_component(try_in_u, out.x, old_in_u, old_out_u, true_u, self.iteration, retry_u, relax);
            let v = step_component(try_in_v, out.y, old_in_v, old_out_v, true_v, self.iteration, retry_v, relax);
            if u.keep_old {
                debug!("Last u step at {} was worse, trying half that step", truth_station.name);
            }
            if v.keep_old {
                debug!("Last v step at {} was worse, trying half that step", truth_station.name);
            }

            let (keep_in_u, keep_out_u) = if u.keep_old { (old_in_u, old_out_u) } else { (try_in_u, out.x) };
            let (keep_in_v, keep_out_v) = if v.keep_old { (old_in_v, old_out_v) } else { (try_in_v, out.y) };
            self.old_input[i].set_uv(keep_in_u, keep_in_v);
            self.old_output[i].set_uv(keep_out_u, keep_out_v);
            self.scratch[i].set_uv(u.next_input, v.next_input);
        }

        if compared == 0 {
            return Err(RunError::Configuration(format!(
                "none of the {} station(s) lies inside the mesh",
                observations.len()
            )));
        }
        if first {
            self.starting_mismatch = max_mismatch;
        }
        self.current_mismatch = max_mismatch;

        let progress = matching_progress_percent(self.starting_mismatch, self.current_mismatch, tol);
        info!(
            "Matching iteration {}: largest mismatch {:.4} m/s over {} station(s), {}% complete",
            self.iteration, max_mismatch, compared, progress
        );

        Ok(ComparisonReport {
            matched,
            max_mismatch,
            compared,
            progress,
        })
    }
}

/// Progress of the matching loop, decelerating towards convergence.
///
/// The linear fraction of the starting mismatch removed so far is warped through
/// `2^a · (x / (1 + x²))^a` with `a = 0.46371` and rounded to a whole percent.
pub fn matching_progress_percent(starting: f64, current: f64, tolerance: f64) -> u8 {
    const WARP: f64 = 0.46371;

    let percent = if starting <= tolerance {
        100.0
    } else {
        (100.0 - 100.0 * ((current - tolerance) / (starting - tolerance))).clamp(0.0, 100.0)
    };
    let x = 1.0 - percent / 100.0;
    let warped = 2_f64.powf(WARP) * (x / (1.0 + x * x)).powf(WARP);
    let mut time_percent = -100.0 * (warped - 1.0);
    if time_percent >= 100.0 {
        time_percent = 100.0;
    } else if time_percent >= 99.0 {
        time_percent = 99.0;
    }
    (time_percent + 0.5).clamp(0.0, 100.0) as u8
}

/// Solved velocity at every station; `None` for stations outside the mesh footprint.
///
/// Stations sit `height` meters above the vegetation top of their location. A station
/// inside the footprint that cannot be located vertically is a configuration error.
pub fn sample_stations(
    mesh: &Mesh,
    field: &VolumeVelocityField,
    stations: &[Station],
) -> RunResult<Vec<Option<Vec3>>> {
    stations
        .iter()
        .map(|s| {
            if !mesh.in_mesh_xy(s.x, s.y) {
                return Ok(None);
            }
            let ground = mesh.terrain().dem().bilinear(s.x, s.y).ok_or_else(|| {
                RunError::Configuration(format!("no terrain elevation under station {}", s.name))
            })?;
            let rough_h = mesh.surface().rough_h.bilinear(s.x, s.y).unwrap_or(0.0);
            let z = ground + rough_h + s.height;
            field.sample(mesh, s.x, s.y, z).map(Some).ok_or_else(|| {
                RunError::Configuration(format!(
                    "station {} at {:.1} m lies outside the mesh column (domain top {:.1} m)",
                    s.name,
                    z,
                    mesh.domain_top()
                ))
            })
        })
        .collect()
}

/// Smallest finite influence radius among `stations`.
pub fn smallest_influence_radius(stations: &[Station]) -> Option<f64> {
    stations
        .iter()
        .map(Station::influence_radius)
        .filter(|r| *r > 0.0)
        .min_by(f64::total_cmp)
}

/// The error a run reports when matching runs out of iterations.
pub fn convergence_failure(mesh_resolution: f64, stations: &[Station]) -> RunError {
    let smallest = smallest_influence_radius(stations);
    let radius_to_resolution = smallest.map(|r| r / mesh_resolution);
    let radius_text = match smallest {
        Some(r) => format!(
            "the smallest radius of influence is {:.2E} meters,\nwhich means that the radius of influence is {:.2E} cells in distance",
            r,
            r / mesh_resolution
        ),
        None => "every station has an infinite radius of influence".to_string(),
    };
    let diagnostic = format!(
        "Solution did not converge to match weather stations.\n\
         Sometimes this is caused by a very low radius of influence when compared to the mesh resolution.\n\
         Your horizontal mesh resolution is {mesh_resolution:.6} meters and {radius_text}.\n\
         It is usually a good idea to have at least 10 cells of distance ({:.2E} meters in this case).\n\
         If convergence is still not reached, try increasing the radius of influence even more.",
        10.0 * mesh_resolution
    );
    RunError::ConvergenceFailure {
        diagnostic,
        radius_to_resolution,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::polar::wind_sd_to_uv;
    use crate::core_types::station::StationSample;
    use crate::grid::{SurfaceSpec, TerrainData, Vegetation};
    use approx::assert_abs_diff_eq;

    fn station(speed: f64, dir: f64) -> Station {
        Station::legacy("S", 0.0, 0.0, 10.0, StationSample::new(speed, dir))
    }

    #[test]
    fn test_first_iteration_full_step() {
        let truth = vec![station(5.0, 270.0)];
        let mut state = MatchingState::new(&truth);
        state.begin_iteration();
        // Field came out at half the observed westerly
        let report = state
            .compare(&truth, &[Some(Vec3::new(2.5, 0.0, 0.0))], &MatchingSettings::default())
            .unwrap();
        assert!(!report.matched);
        assert_abs_diff_eq!(report.max_mismatch, 2.5, epsilon = 1e-9);
        assert_abs_diff_eq!(state.starting_mismatch(), 2.5, epsilon = 1e-9);

        let (u, v) = state.scratch()[0].uv().unwrap();
        assert_abs_diff_eq!(u, 7.5, epsilon = 1e-9);
        assert_abs_diff_eq!(v, 0.0, epsilon = 1e-9);
        assert_eq!(state.retries(0), [0, 0]);
    }

    #[test]
    fn test_backoff_only_for_worsened_component() {
        let truth = vec![station(5.0, 225.0)];
        let (tu, tv) = wind_sd_to_uv(5.0, 225.0).unwrap();
        let settings = MatchingSettings::default();
        let mut state = MatchingState::new(&truth);

        state.begin_iteration();
        state
            .compare(&truth, &[Some(Vec3::new(tu - 1.0, tv - 1.0, 0.0))], &settings)
            .unwrap();
        let (in1_u, in1_v) = state.scratch()[0].uv().unwrap();

        // u got worse, v improved
        state.begin_iteration();
        state
            .compare(&truth, &[Some(Vec3::new(tu - 2.0, tv - 0.5, 0.0))], &settings)
            .unwrap();
        assert_eq!(state.retries(0), [1, 0]);

        let (next_u, next_v) = state.scratch()[0].uv().unwrap();
        // u restarts from the first pair with half the step
        let first_in_u = tu;
        assert_abs_diff_eq!(next_u, first_in_u + 0.5, epsilon = 1e-9);
        // v takes the full step from the latest pair
        assert_abs_diff_eq!(next_v, in1_v + 0.5, epsilon = 1e-9);
        assert!(in1_u > first_in_u);
    }

    #[test]
    fn test_backoff_at_most_once() {
        let mut retries = 1;
        // Worse again, but the halving was already spent
        let step = step_component(1.0, 1.0, 0.0, 3.0, 5.0, 3, &mut retries, 1.0);
        assert!(!step.keep_old);
        assert_eq!(retries, 0);
        assert_abs_diff_eq!(step.next_input, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_outside_stations_are_skipped() {
        let truth = vec![station(5.0, 270.0), station(3.0, 180.0)];
        let mut state = MatchingState::new(&truth);
        state.begin_iteration();
        let report = state
            .compare(&truth, &[Some(Vec3::new(5.0, 0.0, 0.0)), None], &MatchingSettings::default())
            .unwrap();
        assert!(report.matched);
        assert_eq!(report.compared, 1);
        assert_eq!(state.scratch()[1], truth[1]);
        assert_eq!(report.progress, 100);
    }

    #[test]
    fn test_all_stations_outside_is_an_error() {
        let truth = vec![station(5.0, 270.0)];
        let mut state = MatchingState::new(&truth);
        state.begin_iteration();
        let err = state
            .compare(&truth, &[None], &MatchingSettings::default())
            .unwrap_err();
        assert!(matches!(err, RunError::Configuration(_)));
    }

    #[test]
    fn test_station_above_domain_top_is_an_error() {
        let terrain = TerrainData::flat(6, 6, 100.0, 0.0);
        let surface = SurfaceSpec::Uniform(Vegetation::Grass)
            .rasterize(terrain.dem())
            .unwrap();
        let mesh = Mesh::terrain_following(terrain, surface, 6, 1.2, 120.0).unwrap();
        let field = VolumeVelocityField::zeros(&mesh).unwrap();

        let low = Station::legacy("low", 300.0, 300.0, 10.0, StationSample::new(5.0, 270.0));
        let far = Station::legacy("far", 9_000.0, 300.0, 10.0, StationSample::new(5.0, 270.0));
        let sampled = sample_stations(&mesh, &field, &[low.clone(), far]).unwrap();
        assert!(sampled[0].is_some());
        assert!(sampled[1].is_none());

        let tall = Station::legacy("tall", 300.0, 300.0, 200.0, StationSample::new(5.0, 270.0));
        let err = sample_stations(&mesh, &field, &[low, tall]).unwrap_err();
        match err {
            RunError::Configuration(msg) => assert!(msg.contains("tall"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_progress_remap_values() {
        assert_eq!(matching_progress_percent(2.22, 2.22, 0.22), 0);
        assert_eq!(matching_progress_percent(2.22, 0.22, 0.22), 100);
        assert_eq!(matching_progress_percent(0.1, 0.5, 0.22), 100);
        // Halfway in mismatch is far less than halfway in reported progress
        assert_eq!(matching_progress_percent(2.22, 1.22, 0.22), 10);
        // Worse than the start clamps to zero
        assert_eq!(matching_progress_percent(1.0, 3.0, 0.22), 0);
    }

    #[test]
    fn test_convergence_failure_diagnostic() {
        let stations = vec![
            station(1.0, 90.0),
            Station::legacy("B", 0.0, 0.0, 10.0, StationSample::new(1.0, 90.0).with_influence_radius(500.0)),
        ];
        let err = convergence_failure(100.0, &stations);
        match err {
            RunError::ConvergenceFailure {
                diagnostic,
                radius_to_resolution,
            } => {
                assert_eq!(radius_to_resolution, Some(5.0));
                assert!(diagnostic.contains("smallest radius of influence is 5.00E2 meters"));
                assert!(diagnostic.contains("1.00E3 meters"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(smallest_influence_radius(&stations[..1]), None);
    }
}
