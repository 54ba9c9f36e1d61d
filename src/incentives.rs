//! =============================================================================================
//! Incentives: pluggable state -> per-type reproductive weight models
//! =============================================================================================
//!
//! An incentive maps a population composition to a vector of relative reproductive
//! weights, one per type. The transition generators consume incentives through the
//! single-operation `Incentive` trait and normalize the result into reproduction
//! probabilities, so the only hard contract is:
//!
//!     an incentive must not return an all-zero vector at a reachable state when the
//!     consuming process divides by the incentive sum (Wright-Fisher does).
//!
//! `FermiIncentive` exists specifically to satisfy that contract: exp(β f) is strictly
//! positive, so the weight of any surviving type is positive.
//!
//! =============================================================================================

use ndarray::{Array1, Array2};

use crate::error::{Result, StationaryError};
use crate::simplex::Simplex;
use crate::state::PopulationState;

/// The one seam between fitness modeling and transition generation.
pub trait Incentive {
    /// Per-type relative reproductive weight at `state`. Entries are nonnegative;
    /// see the module contract about all-zero results.
    fn evaluate(&self, state: &PopulationState) -> Array1<f64>;
}

/// ==============================================================================================
/// ================================ Linear Fitness Landscape ====================================
/// ==============================================================================================

/// Game-matrix fitness: f(x) = m · x at composition frequencies x.
#[derive(Clone, Debug)]
pub struct LinearLandscape {
    matrix: Array2<f64>,
}

impl LinearLandscape {
    pub fn new(matrix: Array2<f64>) -> Result<Self> {
        if matrix.nrows() != matrix.ncols() || matrix.nrows() == 0 {
            return Err(StationaryError::InvalidParameter(format!(
                "LinearLandscape::new: game matrix must be square and nonempty, got {}x{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        Ok(Self { matrix })
    }

    /// Convenience constructor from row slices.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n = rows.len();
        let mut flat = Vec::with_capacity(n * n);
        for row in rows {
            if row.len() != n {
                return Err(StationaryError::InvalidParameter(
                    "LinearLandscape::from_rows: ragged game matrix".to_string(),
                ));
            }
            flat.extend_from_slice(row);
        }
        let matrix = Array2::from_shape_vec((n, n), flat)
            .map_err(|e| StationaryError::InvalidParameter(format!("LinearLandscape: {e}")))?;
        Self::new(matrix)
    }

    #[inline]
    pub fn num_types(&self) -> usize {
        self.matrix.nrows()
    }

    /// Fitness vector f = m · x.
    pub fn fitness(&self, freqs: &Simplex) -> Array1<f64> {
        debug_assert_eq!(
            freqs.dim(),
            self.num_types(),
            "LinearLandscape::fitness: dimension mismatch"
        );
        self.matrix.dot(freqs.as_array())
    }
}

/// ==============================================================================================
/// =================================== Concrete Incentives ======================================
/// ==============================================================================================

/// Replicator incentive: inc_i = x_i · f_i(x). Extinct types carry zero weight;
/// the total can vanish on degenerate landscapes, which the generators report as
/// `DegenerateIncentive`.
#[derive(Clone, Debug)]
pub struct ReplicatorIncentive {
    landscape: LinearLandscape,
}

impl ReplicatorIncentive {
    #[inline]
    pub fn new(landscape: LinearLandscape) -> Self {
        Self { landscape }
    }
}

impl Incentive for ReplicatorIncentive {
    fn evaluate(&self, state: &PopulationState) -> Array1<f64> {
        let freqs = Simplex::from_counts(state);
        let fitness = self.landscape.fitness(&freqs);
        freqs.as_array() * &fitness
    }
}

/// Fermi (logit) incentive: inc_i = x_i^q · exp(β f_i(x)).
///     - β is the selection intensity; β=0 is neutral drift.
///     - q weights the frequency dependence; q=1 recovers the replicator form
///       with exponential fitness.
/// The exponential keeps every surviving type's weight strictly positive, so the
/// incentive sum is positive at every reachable state.
#[derive(Clone, Debug)]
pub struct FermiIncentive {
    landscape: LinearLandscape,
    beta: f64,
    q: f64,
}

impl FermiIncentive {
    #[inline]
    pub fn new(landscape: LinearLandscape, beta: f64, q: f64) -> Self {
        Self { landscape, beta, q }
    }
}

impl Incentive for FermiIncentive {
    fn evaluate(&self, state: &PopulationState) -> Array1<f64> {
        let freqs = Simplex::from_counts(state);
        let fitness = self.landscape.fitness(&freqs);

        let mut inc = Array1::zeros(freqs.dim());
        for i in 0..freqs.dim() {
            let x = freqs.as_slice()[i];
            inc[i] = x.powf(self.q) * (self.beta * fitness[i]).exp();
        }
        inc
    }
}
