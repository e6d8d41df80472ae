//! Run orchestration
//!
//! [`WindSimulation`] drives one run through its stages:
//!
//! ```text
//! ReadInputs -> BuildMesh -> (MatchingLoop | SingleSolve) -> PostProcess
//!            -> Interpolate -> Dispatch -> Done | Cancelled | Failed
//! ```
//!
//! Cancellation is polled after the mesh is built, after every solve, after each
//! matching iteration and after post-processing. A run whose initial field is zero
//! everywhere skips the equation engine and continues with a zero field.

use crate::core_types::station::Station;
use crate::error::{RunError, RunResult};
use crate::grid::{Mesh, MeshBuilder, StandardMeshBuilder, VolumeVelocityField};
use crate::initialization::{create_initializer, observations, InitializedFlow};
use crate::output::{dispatch, OutputSet, OutputWriter, SurfaceProducts};
use crate::simulation::cancel::CancellationToken;
use crate::simulation::config::{InitializationMode, MatchingSettings, PointInput, RunConfiguration};
use crate::simulation::interpolation::{interpolate_points, interpolate_to_height};
use crate::simulation::matching::{convergence_failure, sample_stations, MatchingPhase, MatchingState};
use crate::simulation::postprocess::{dust_emission, dust_source_on_mesh, friction_velocity};
use crate::simulation::progress::{NullProgress, ProgressReporter, RunStage};
use crate::solver::{create_equation_engine, EquationEngine, SolveOutcome};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    ReadInputs,
    BuildMesh,
    MatchingLoop,
    SingleSolve,
    PostProcess,
    Interpolate,
    Dispatch,
    Done,
    Cancelled,
    Failed,
}

/// Wall-clock time spent per stage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunTimings {
    pub mesh: Duration,
    pub initialization: Duration,
    pub solve: Duration,
    pub post_process: Duration,
    pub interpolation: Duration,
    pub output: Duration,
    pub total: Duration,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub outputs: OutputSet,
    /// Paths created by the output writers
    pub written: Vec<PathBuf>,
    /// Outer matching iterations performed; 0 without matching
    pub matching_iterations: usize,
    /// The initial field was zero and the solve was skipped
    pub null_run: bool,
    pub timings: RunTimings,
}

/// Caller-facing summary of a run, successful or not.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub success: bool,
    /// Human-readable failure message
    pub diagnostic: Option<String>,
    /// Smallest influence radius over mesh resolution, for matching failures
    pub radius_to_resolution: Option<f64>,
    pub outputs: Option<OutputSet>,
}

impl From<RunResult<RunOutcome>> for RunReport {
    fn from(result: RunResult<RunOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                diagnostic: None,
                radius_to_resolution: None,
                outputs: Some(outcome.outputs),
            },
            Err(err) => Self {
                success: false,
                radius_to_resolution: match &err {
                    RunError::ConvergenceFailure {
                        radius_to_resolution,
                        ..
                    } => *radius_to_resolution,
                    _ => None,
                },
                diagnostic: Some(err.to_string()),
                outputs: None,
            },
        }
    }
}

/// Flow and solved field handed from the solve stage to post-processing.
struct SolvedFlow {
    flow: InitializedFlow,
    field: VolumeVelocityField,
    matching_iterations: usize,
    null_run: bool,
}

/// One wind run and its collaborators.
pub struct WindSimulation {
    config: RunConfiguration,
    mesh_builder: Box<dyn MeshBuilder>,
    engine: Box<dyn EquationEngine>,
    writers: Vec<Box<dyn OutputWriter>>,
    progress: Arc<dyn ProgressReporter>,
    cancel: CancellationToken,
    phase: RunPhase,
}

impl WindSimulation {
    /// Create a run with the standard mesh builder and the default equation engine
    ///
    /// # Arguments
    ///
    /// * `config` - Settings for this run; validated when the run starts
    pub fn new(config: RunConfiguration) -> Self {
        Self {
            config,
            mesh_builder: Box::new(StandardMeshBuilder),
            engine: create_equation_engine(),
            writers: Vec::new(),
            progress: Arc::new(NullProgress),
            cancel: CancellationToken::new(),
            phase: RunPhase::ReadInputs,
        }
    }

    pub fn with_mesh_builder(mut self, builder: Box<dyn MeshBuilder>) -> Self {
        self.mesh_builder = builder;
        self
    }

    pub fn with_equation_engine(mut self, engine: Box<dyn EquationEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_writer(mut self, writer: Box<dyn OutputWriter>) -> Self {
        self.writers.push(writer);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Handle the caller keeps to cancel the run from another thread.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// Execute the run.
    pub fn run(&mut self) -> RunResult<RunOutcome> {
        let result = self.run_stages();
        self.phase = match &result {
            Ok(_) => RunPhase::Done,
            Err(RunError::CancelledByUser) => RunPhase::Cancelled,
            Err(_) => RunPhase::Failed,
        };
        match &result {
            Ok(outcome) => info!(
                "Run finished in {:.2} s ({} matching iteration(s), null run: {})",
                outcome.timings.total.as_secs_f64(),
                outcome.matching_iterations,
                outcome.null_run
            ),
            Err(RunError::CancelledByUser) => {
                warn!("Run cancelled");
                self.progress.status("Run cancelled by user");
            }
            Err(e) => {
                error!("Run failed: {}", e);
                self.progress.status(&e.to_string());
            }
        }
        result
    }

    /// Run every time step of the inputs in order, stopping at the first failure.
    pub fn run_time_series(&mut self) -> RunResult<Vec<RunOutcome>> {
        let steps = self.config.mode.time_step_count();
        let mut outcomes = Vec::with_capacity(steps);
        for step in 0..steps {
            self.config.mode.set_time_step(step);
            info!("Time step {} of {}", step + 1, steps);
            outcomes.push(self.run()?);
        }
        Ok(outcomes)
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!("Run phase {:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    fn status(&self, message: &str) {
        info!("{}", message);
        self.progress.status(message);
    }

    fn complete(&self, stage: RunStage) {
        const STAGES: usize = 7;
        let n = match stage {
            RunStage::Validate => 1,
            RunStage::BuildMesh => 2,
            RunStage::Initialize => 3,
            RunStage::Solve => 4,
            RunStage::PostProcess => 5,
            RunStage::Interpolate => 6,
            RunStage::Write => 7,
        };
        self.progress.stage_completed(stage);
        self.progress.step(n, STAGES);
    }

    fn build_pool(&self) -> RunResult<ThreadPool> {
        let mut builder = ThreadPoolBuilder::new();
        if self.config.num_threads > 0 {
            builder = builder.num_threads(self.config.num_threads);
        }
        builder
            .build()
            .map_err(|e| RunError::ResourceExhaustion(format!("cannot start worker pool: {e}")))
    }

    fn run_stages(&mut self) -> RunResult<RunOutcome> {
        let start = Instant::now();
        let mut timings = RunTimings::default();

        self.enter(RunPhase::ReadInputs);
        self.config.validate()?;
        let matching = self
            .config
            .mode
            .matching()
            .cloned()
            .map(MatchingSettings::with_env_overrides)
            .transpose()?;
        if let Some(settings) = &matching {
            settings.validate()?;
        }
        if let Some(time) = self.config.mode.current_time() {
            self.status(&format!("Simulation time is {time}"));
        }
        let pool = self.build_pool()?;
        info!(
            "Run started with {} thread(s), {} initialization",
            pool.current_num_threads(),
            self.config.mode.name()
        );
        self.complete(RunStage::Validate);

        self.enter(RunPhase::BuildMesh);
        self.status("Generating mesh...");
        let t = Instant::now();
        let mesh = self.mesh_builder.build_mesh(&self.config)?;
        timings.mesh = t.elapsed();
        info!(
            "{} mesh: {}x{}x{} nodes at {:.2} m",
            self.mesh_builder.name(),
            mesh.nx(),
            mesh.ny(),
            mesh.nz(),
            mesh.resolution()
        );
        let dust_source = self
            .config
            .dust_source
            .as_ref()
            .map(|source| dust_source_on_mesh(source, &mesh));
        self.complete(RunStage::BuildMesh);
        self.cancel.check()?;

        let point_input = match &self.config.mode {
            InitializationMode::PointMatching(input) => Some(input.clone()),
            _ => None,
        };
        let solved = match (point_input, matching) {
            (Some(input), Some(settings)) => {
                self.enter(RunPhase::MatchingLoop);
                self.matching_loop(&pool, &mesh, &input, &settings, &mut timings)?
            }
            _ => {
                self.enter(RunPhase::SingleSolve);
                self.single_solve(&pool, &mesh, &mut timings)?
            }
        };
        let SolvedFlow {
            flow,
            field,
            matching_iterations,
            null_run,
        } = solved;

        self.enter(RunPhase::PostProcess);
        let t = Instant::now();
        let mut products = SurfaceProducts::default();
        if self.config.friction_velocity {
            self.status("Computing friction velocities...");
            let ustar = pool.install(|| friction_velocity(&mesh, &field))?;
            if self.config.dust {
                self.status("Computing dust emissions...");
                products.dust = Some(dust_emission(&ustar, dust_source.as_ref())?);
            }
            products.friction_velocity = Some(ustar);
        }
        timings.post_process = t.elapsed();
        self.complete(RunStage::PostProcess);
        self.cancel.check()?;

        self.enter(RunPhase::Interpolate);
        let t = Instant::now();
        self.status("Interpolating to output height...");
        let config = &self.config;
        let (wind, points) = pool.install(|| -> RunResult<_> {
            let wind = interpolate_to_height(config, &mesh, &field, &flow, config.output.height)?;
            let points = interpolate_points(config, &mesh, &field, &flow);
            Ok((wind, points))
        })?;
        drop(field);
        let InitializedFlow { cloud, .. } = flow;
        timings.interpolation = t.elapsed();
        self.complete(RunStage::Interpolate);

        self.enter(RunPhase::Dispatch);
        let t = Instant::now();
        let outputs = OutputSet::assemble(
            &self.config,
            wind,
            cloud,
            products,
            points,
            self.config.mode.current_time(),
        )?;
        let written = if self.writers.is_empty() {
            Vec::new()
        } else {
            self.status("Writing output files...");
            let writers = &self.writers;
            pool.install(|| dispatch(writers, &outputs))?
        };
        timings.output = t.elapsed();
        self.complete(RunStage::Write);

        timings.total = start.elapsed();
        debug!("Stage timings: {:?}", timings);
        Ok(RunOutcome {
            outputs,
            written,
            matching_iterations,
            null_run,
            timings,
        })
    }

    fn initialize(
        &self,
        pool: &ThreadPool,
        mesh: &Mesh,
        scratch: Option<&[Station]>,
    ) -> RunResult<InitializedFlow> {
        self.status("Initializing flow...");
        let initializer = create_initializer(&self.config.mode, scratch)?;
        debug!("Using {} initializer", initializer.name());
        let config = &self.config;
        pool.install(|| initializer.initialize_fields(config, mesh))
    }

    /// Assemble and solve; the alternate method runs only if the primary one fails.
    ///
    /// `flow.u0` is released once the engine has taken it in.
    fn solve(&mut self, mesh: &Mesh, flow: &mut InitializedFlow) -> RunResult<VolumeVelocityField> {
        self.status("Building equations...");
        let u0 = std::mem::take(&mut flow.u0);
        self.engine.discretize(mesh, &self.config, &u0)?;
        drop(u0);
        self.cancel.check()?;

        self.status("Solving...");
        let field = match self.engine.solve(&self.config)? {
            SolveOutcome::Converged(field) => field,
            SolveOutcome::Failed {
                iterations,
                residual,
            } => {
                warn!(
                    "{} primary solve failed after {} iterations (residual {:.3e}), trying alternate",
                    self.engine.name(),
                    iterations,
                    residual
                );
                match self.engine.solve_alternate(&self.config)? {
                    SolveOutcome::Converged(field) => field,
                    SolveOutcome::Failed {
                        iterations,
                        residual,
                    } => {
                        return Err(RunError::NumericDivergence(format!(
                            "{} did not converge with either method (alternate stopped after {} iterations at residual {:.3e})",
                            self.engine.name(),
                            iterations,
                            residual
                        )))
                    }
                }
            }
        };
        field.ensure_matches(mesh)?;
        self.complete(RunStage::Solve);
        self.cancel.check()?;
        Ok(field)
    }

    fn single_solve(&mut self, pool: &ThreadPool, mesh: &Mesh, timings: &mut RunTimings) -> RunResult<SolvedFlow> {
        let t = Instant::now();
        let mut flow = self.initialize(pool, mesh, None)?;
        timings.initialization = t.elapsed();
        self.complete(RunStage::Initialize);

        if flow.u0.is_all_zero() {
            info!("Initial field is zero everywhere, skipping the solve");
            let field = std::mem::take(&mut flow.u0);
            return Ok(SolvedFlow {
                flow,
                field,
                matching_iterations: 0,
                null_run: true,
            });
        }

        let t = Instant::now();
        let field = self.solve(mesh, &mut flow)?;
        timings.solve = t.elapsed();
        Ok(SolvedFlow {
            flow,
            field,
            matching_iterations: 0,
            null_run: false,
        })
    }

    fn matching_loop(
        &mut self,
        pool: &ThreadPool,
        mesh: &Mesh,
        input: &PointInput,
        settings: &MatchingSettings,
        timings: &mut RunTimings,
    ) -> RunResult<SolvedFlow> {
        self.status("Starting outer wx station \"matching\" loop...");
        let truth = observations(input)?;
        let mut state = MatchingState::new(&truth);

        loop {
            let iteration = state.begin_iteration();
            info!("\"matching\" loop iteration {}...", iteration);

            let t = Instant::now();
            let mut flow = self.initialize(pool, mesh, Some(state.scratch()))?;
            timings.initialization += t.elapsed();
            if iteration == 1 {
                self.complete(RunStage::Initialize);
            }

            if flow.u0.is_all_zero() {
                info!("Initial field is zero everywhere, skipping the solve and matching");
                let field = std::mem::take(&mut flow.u0);
                return Ok(SolvedFlow {
                    flow,
                    field,
                    matching_iterations: iteration,
                    null_run: true,
                });
            }

            state.set_phase(MatchingPhase::Solving);
            let t = Instant::now();
            let field = match self.solve(mesh, &mut flow) {
                Ok(field) => field,
                Err(RunError::CancelledByUser) => {
                    state.set_phase(MatchingPhase::Cancelled);
                    return Err(RunError::CancelledByUser);
                }
                Err(e) => return Err(e),
            };
            timings.solve += t.elapsed();

            let computed = sample_stations(mesh, &field, &truth)?;
            let report = state.compare(&truth, &computed, settings)?;
            self.progress.matching_progress(report.progress);

            if report.matched {
                state.set_phase(MatchingPhase::Converged);
                self.progress.matching_progress(100);
                info!("Stations matched after {} iteration(s)", iteration);
                return Ok(SolvedFlow {
                    flow,
                    field,
                    matching_iterations: iteration,
                    null_run: false,
                });
            }
            if iteration >= settings.max_iterations {
                state.set_phase(MatchingPhase::IterationBudgetExhausted);
                let err = convergence_failure(mesh.resolution(), &truth);
                warn!("{}", err);
                return Err(err);
            }
            if self.cancel.is_cancelled() {
                state.set_phase(MatchingPhase::Cancelled);
                return Err(RunError::CancelledByUser);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::progress::RecordingProgress;

    #[test]
    fn test_report_from_failure_carries_ratio() {
        let report = RunReport::from(Err(RunError::ConvergenceFailure {
            diagnostic: "did not converge".into(),
            radius_to_resolution: Some(2.5),
        }));
        assert!(!report.success);
        assert_eq!(report.radius_to_resolution, Some(2.5));
        assert_eq!(report.diagnostic.as_deref(), Some("did not converge"));
        assert!(report.outputs.is_none());
    }

    #[test]
    fn test_invalid_configuration_fails_before_mesh() {
        let progress = Arc::new(RecordingProgress::new());
        let config = RunConfiguration {
            diurnal_winds: true,
            ..RunConfiguration::default()
        };
        let mut sim = WindSimulation::new(config).with_progress(progress.clone());
        assert!(matches!(sim.run(), Err(RunError::Configuration(_))));
        assert_eq!(sim.phase(), RunPhase::Failed);
        assert!(progress.completed_stages().is_empty());
    }

    #[test]
    fn test_cancel_before_start() {
        let mut sim = WindSimulation::new(RunConfiguration::default());
        sim.cancellation_token().cancel();
        assert_eq!(sim.run().unwrap_err(), RunError::CancelledByUser);
        assert_eq!(sim.phase(), RunPhase::Cancelled);
    }

    #[test]
    fn test_stage_timings_do_not_overlap() {
        let outcome = WindSimulation::new(RunConfiguration::default()).run().unwrap();
        let t = outcome.timings;
        let stages = t.mesh + t.initialization + t.solve + t.post_process + t.interpolation + t.output;
        assert!(stages <= t.total, "{t:?}");
    }
}
