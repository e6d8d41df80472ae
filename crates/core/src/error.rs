//! Error taxonomy for wind runs.
//!
//! Every failure a run can surface maps onto one [`RunError`] variant. Configuration
//! and unit problems are raised before any expensive work; numeric and convergence
//! failures only after the documented fallbacks are exhausted.

use thiserror::Error;

/// Errors produced by the unit conversion layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnitError {
    /// A unit symbol that is not part of the fixed table for its family.
    #[error("unrecognized {family} unit '{symbol}'")]
    UnknownSymbol {
        family: &'static str,
        symbol: String,
    },
    /// A value that cannot be represented in the categorical canopy scale.
    #[error("value {value} cannot be converted to {unit}")]
    OutOfRange { unit: &'static str, value: f64 },
}

/// Failure modes of a wind run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    /// Missing or contradictory settings, detected before any solve.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Both the primary and the alternate solver failed to converge.
    #[error("solver diverged: {0}")]
    NumericDivergence(String),

    /// Station matching ran out of outer iterations.
    #[error("{diagnostic}")]
    ConvergenceFailure {
        diagnostic: String,
        /// Smallest influence radius divided by the mesh resolution, when known.
        radius_to_resolution: Option<f64>,
    },

    /// A mesh-sized buffer or worker pool could not be allocated.
    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    /// The caller raised the cancellation flag.
    #[error("run cancelled by user")]
    CancelledByUser,

    #[error(transparent)]
    UnrecognizedUnit(#[from] UnitError),

    /// A named output writer failed during dispatch.
    #[error("output writer '{writer}' failed: {message}")]
    OutputWriter { writer: String, message: String },
}

impl RunError {
    /// Whether retrying on a coarser mesh might help.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, RunError::ResourceExhaustion(_))
    }
}

/// Result alias used throughout the crate.
pub type RunResult<T> = Result<T, RunError>;

/// Allocate a zero-filled buffer, mapping allocation failure to
/// [`RunError::ResourceExhaustion`].
pub(crate) fn try_alloc<T: Clone>(len: usize, fill: T, what: &str) -> RunResult<Vec<T>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|e| {
        RunError::ResourceExhaustion(format!("cannot allocate {what} ({len} elements): {e}"))
    })?;
    buf.resize(len, fill);
    Ok(buf)
}
