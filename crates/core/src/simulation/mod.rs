//! Wind run orchestration
//!
//! `WindSimulation` sequences a run:
//! - Mesh generation through a [`MeshBuilder`](crate::grid::MeshBuilder)
//! - Flow initialization for the configured mode
//! - Mass-consistent solve, optionally inside the station-matching loop
//! - Friction velocity and dust emission
//! - Interpolation to the output height and output dispatch

pub mod cancel;
pub mod config;
pub mod interpolation;
pub mod matching;
pub mod postprocess;
pub mod progress;
pub mod wind_simulation;

pub use cancel::CancellationToken;
pub use config::{
    DomainAverageInput, InitializationMode, MatchingSettings, OutputPoint, OutputSettings, PointInput,
    RunConfiguration, SolverSettings, WeatherModelInput, WeatherModelStep,
};
pub use interpolation::{PointWind, SurfaceWind};
pub use matching::{matching_progress_percent, MatchingPhase, MatchingState};
pub use progress::{NullProgress, ProgressEvent, ProgressReporter, RecordingProgress, RunStage};
pub use wind_simulation::{RunOutcome, RunPhase, RunReport, RunTimings, WindSimulation};
