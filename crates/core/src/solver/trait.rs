//! Equation engine trait definition
//!
//! This module defines the `EquationEngine` trait, the narrow interface through which a
//! run assembles and solves the mass-conservation system. The run never looks inside:
//! it hands over the mesh and the initialized field, then asks for a solution.

use crate::error::RunResult;
use crate::grid::{Mesh, VolumeVelocityField};
use crate::simulation::config::RunConfiguration;

/// Result of one solve attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SolveOutcome {
    /// The method reached its tolerance; carries the adjusted field `U`.
    Converged(VolumeVelocityField),
    /// The method gave up.
    Failed {
        /// Iterations performed before giving up
        iterations: usize,
        /// Last relative update size
        residual: f64,
    },
}

impl SolveOutcome {
    pub fn is_converged(&self) -> bool {
        matches!(self, SolveOutcome::Converged(_))
    }
}

/// Assembles and solves the sparse mass-conservation system.
///
/// Calls always come in the order `discretize` → `solve` → (`solve_alternate` only if
/// `solve` failed), from a single thread.
pub trait EquationEngine: Send {
    /// Get the engine name for logging
    fn name(&self) -> &'static str;

    /// Assemble the system for the initial field `u0` on `mesh`
    ///
    /// # Arguments
    ///
    /// * `mesh` - Computational mesh; `u0` must share its topology
    /// * `config` - Run settings (solver tolerances, vertical weighting)
    /// * `u0` - Initialized velocity field
    fn discretize(
        &mut self,
        mesh: &Mesh,
        config: &RunConfiguration,
        u0: &VolumeVelocityField,
    ) -> RunResult<()>;

    /// Solve with the primary method
    fn solve(&mut self, config: &RunConfiguration) -> RunResult<SolveOutcome>;

    /// Solve with the fallback method after the primary one failed
    fn solve_alternate(&mut self, config: &RunConfiguration) -> RunResult<SolveOutcome>;
}
