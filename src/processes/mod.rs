//! =============================================================================================
//! Processes: update rules turning an incentive model into a Markov transition relation
//! =============================================================================================

pub mod moran;
pub mod wright_fisher;

use std::collections::HashMap;

use ndarray::Array1;

use crate::error::{Result, StationaryError};
use crate::state::{PopulationState, StateSpace};

/// A weighted transition between two compositions.
pub type Edge = (PopulationState, PopulationState, f64);

/// Update rule selection.
///     - `Moran`: single birth-death replacement per step (two types only).
///     - `WrightFisher`: full-generation multinomial resampling (general n).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateRule {
    Moran,
    WrightFisher,
}

/// Mutation-perturbed reproduction probabilities for one source state:
///
///     p_k = Σ_j inc_j · m_jk / Σ_j inc_j,
///         m_jj = 1 - μ, m_jk = μ/(n-1) for k != j
///
/// The uniform split of μ across the n-1 other types keeps every p_k strictly
/// positive whenever μ > 0 and some incentive weight is positive, which is what
/// makes the resulting chain irreducible.
///     Errors:
///         - `DegenerateIncentive` when Σ inc <= 0 (callers must use a Fermi-style
///           incentive to rule this out)
pub fn reproduction_vector(
    incentive_weights: &Array1<f64>,
    mu: f64,
    state: &PopulationState,
) -> Result<Array1<f64>> {
    let n = incentive_weights.len();
    let total: f64 = incentive_weights.sum();

    if !(total > 0.0) {
        return Err(StationaryError::DegenerateIncentive {
            state: state.counts().to_vec(),
        });
    }

    let off = if n > 1 { mu / (n as f64 - 1.0) } else { 0.0 };
    let mut ps = Array1::zeros(n);
    for k in 0..n {
        // Σ_j inc_j m_jk = (1-μ) inc_k + off · (Σ inc - inc_k)
        let w = (1.0 - mu) * incentive_weights[k] + off * (total - incentive_weights[k]);
        ps[k] = w / total;
    }
    Ok(ps)
}

/// Validate a mutation rate: probabilities stay in range only for μ in [0, 1].
pub(crate) fn check_mutation_rate(mu: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&mu) {
        return Err(StationaryError::InvalidParameter(format!(
            "mutation rate must lie in [0, 1], got {mu}"
        )));
    }
    Ok(())
}

/// ==============================================================================================
/// ================================= Kernel Abstraction =========================================
/// ==============================================================================================

/// Evaluator view of a transition relation over state-space indices. Implemented by
/// the cached Wright-Fisher kernel and by materialized edge lists; the divergence
/// analyzer consumes either interchangeably.
pub trait TransitionKernel {
    /// Number of enumerated states.
    fn num_states(&self) -> usize;

    /// One-step probability source -> target (state-space indices).
    fn probability(&self, source: usize, target: usize) -> f64;
}

/// Sparse kernel adapter over a materialized edge list.
pub struct EdgeKernel {
    num_states: usize,
    weights: HashMap<(usize, usize), f64>,
}

impl EdgeKernel {
    /// Index every edge against `space`.
    ///     Errors:
    ///         - `InvalidParameter` if an edge endpoint does not belong to the space
    pub fn new(space: &StateSpace, edges: &[Edge]) -> Result<Self> {
        let mut weights = HashMap::with_capacity(edges.len());
        for (source, target, weight) in edges {
            let s = space.index(source).ok_or_else(|| {
                StationaryError::InvalidParameter(format!(
                    "EdgeKernel::new: source state {source:?} outside the state space"
                ))
            })?;
            let t = space.index(target).ok_or_else(|| {
                StationaryError::InvalidParameter(format!(
                    "EdgeKernel::new: target state {target:?} outside the state space"
                ))
            })?;
            weights.insert((s, t), *weight);
        }
        Ok(Self {
            num_states: space.len(),
            weights,
        })
    }
}

impl TransitionKernel for EdgeKernel {
    #[inline]
    fn num_states(&self) -> usize {
        self.num_states
    }

    #[inline]
    fn probability(&self, source: usize, target: usize) -> f64 {
        self.weights.get(&(source, target)).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reproduction_vector_is_stochastic_and_positive() {
        let state = PopulationState::new(vec![3, 4, 5]);
        let inc = Array1::from_vec(vec![0.5, 1.5, 2.0]);
        let ps = reproduction_vector(&inc, 0.01, &state).unwrap();
        assert!((ps.sum() - 1.0).abs() < 1e-12);
        for &p in ps.iter() {
            assert!(p > 0.0);
        }
    }

    #[test]
    fn zero_incentive_total_is_degenerate() {
        let state = PopulationState::new(vec![0, 10]);
        let inc = Array1::from_vec(vec![0.0, 0.0]);
        assert!(matches!(
            reproduction_vector(&inc, 0.01, &state),
            Err(StationaryError::DegenerateIncentive { .. })
        ));
    }

    #[test]
    fn mutation_keeps_extinct_type_reachable() {
        let state = PopulationState::new(vec![0, 10]);
        let inc = Array1::from_vec(vec![0.0, 1.0]);
        let ps = reproduction_vector(&inc, 0.1, &state).unwrap();
        // All mass diverted to type 0 comes from the mutation split.
        assert!((ps[0] - 0.1).abs() < 1e-12);
        assert!((ps[1] - 0.9).abs() < 1e-12);
    }
}
