//! Wind Field Core Library
//!
//! Computes a steady, mass-conserving 3D wind field over a terrain mesh, optionally
//! adjusted to match observed winds at weather stations, and projects it onto a 2D
//! surface at a requested height above the vegetation.
//!
//! ## Run pipeline
//!
//! - Terrain-following mesh over a DEM with per-cell roughness
//! - Flow initialization from a domain average, weather stations or a weather model
//! - Mass-consistent adjustment through an [`EquationEngine`]
//! - Station matching with relaxation and backoff
//! - Boundary-layer profile interpolation to the output height
//! - Friction velocity and dust emission products
//!
//! ```no_run
//! use windfield_core::{RunConfiguration, WindSimulation};
//!
//! let mut sim = WindSimulation::new(RunConfiguration::default());
//! let outcome = sim.run().expect("run failed");
//! println!("max speed {:?}", outcome.outputs.speed.max_value());
//! ```

// Core types and utilities
pub mod core_types;
pub mod error;

// Physics, grid and solver
pub mod grid;
pub mod physics;
pub mod solver;

// Run stages
pub mod initialization;
pub mod output;
pub mod simulation;

// Re-export core types
pub use core_types::{Raster, Station, StationSample, Vec3};
pub use core_types::{CoverUnit, LengthUnit, TemperatureUnit, UnitFamily, VelocityUnit};
pub use error::{RunError, RunResult, UnitError};

// Re-export grid and solver types
pub use grid::{Mesh, MeshBuilder, MeshResolution, MeshSpec, SurfaceSpec, TerrainData, Vegetation};
pub use grid::VolumeVelocityField;
pub use initialization::{FlowInitializer, InitializedFlow};
pub use output::{OutputSet, OutputWriter};
pub use physics::{ProfileShape, WindProfile};
pub use solver::{EquationEngine, SolveOutcome};

// Re-export run types
pub use simulation::{
    CancellationToken, InitializationMode, MatchingSettings, ProgressReporter, RunConfiguration,
    RunOutcome, RunReport, WindSimulation,
};
