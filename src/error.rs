//! =============================================================================================
//! Crate-wide error taxonomy
//! =============================================================================================
//!
//! Every fatal condition in the crate maps to one variant here. Non-convergence of the
//! power iteration is deliberately NOT an error: it is surfaced as a flagged
//! `StationaryResult` so callers cannot mistake an iteration-budget exhaustion for an
//! exact answer.
//!
//! =============================================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StationaryError {
    /// Malformed construction input (population / type count / rate out of range).
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The incentive model returned an all-zero vector at a reachable state.
    /// Transition generation divides by the incentive sum, so this is fatal;
    /// a Fermi incentive guarantees it cannot happen.
    #[error("degenerate incentive: zero total weight at state {state:?}")]
    DegenerateIncentive { state: Vec<usize> },

    /// The external solver could not be spawned, exited nonzero, timed out, or
    /// produced a results file that does not parse into a probability distribution.
    #[error("external solver failure: {0}")]
    ExternalSolverFailure(String),

    /// The exported enumeration and the live state space disagree. Continuing
    /// would silently attach masses to the wrong states.
    #[error("enumeration mismatch: manifest checksum {expected}, live state space {actual}")]
    EnumerationMismatch { expected: String, actual: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization: {0}")]
    Serde(String),
}

pub type Result<T> = std::result::Result<T, StationaryError>;
