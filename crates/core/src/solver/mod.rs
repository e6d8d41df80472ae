//! Mass-conservation equation engine
//!
//! The run talks to the solver only through the [`EquationEngine`] trait:
//! `discretize(mesh, config, U0)`, then `solve(config)`, then `solve_alternate(config)`
//! if the primary method failed. [`MassConsistentEngine`] is the built-in
//! finite-difference implementation; callers may supply their own engine.
//!
//! # Example
//!
//! ```rust
//! use windfield_core::solver::{create_equation_engine, EquationEngine};
//!
//! let engine = create_equation_engine();
//! assert!(!engine.name().is_empty());
//! ```

mod mass_consistent;
#[allow(clippy::module_name_repetitions)]
mod r#trait;

// Re-exports
pub use mass_consistent::{create_equation_engine, MassConsistentEngine};
pub use r#trait::{EquationEngine, SolveOutcome};
