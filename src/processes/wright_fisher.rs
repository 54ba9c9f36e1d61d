//! =============================================================================================
//! Wright-Fisher process: full-generation multinomial resampling on the simplex
//! =============================================================================================
//!
//! One step redraws the entire population: the next state y is multinomial(N, p)
//! where p is the mutation-perturbed, incentive-normalized reproduction vector at
//! the current state x. The transition probability is the multinomial pmf
//!
//!     P(x -> y) = C(N; y_1..y_n) · Π_k p_k^{y_k}
//!
//! evaluated entirely in log space: both the coefficient and the powers underflow
//! or overflow direct evaluation long before realistic N. Two caches amortize the
//! work across the O(states²) pairs of a full transition relation:
//!
//!     - a ln(k!) table (length N+1), built once,
//!     - per-target log-multinomial coefficients ln C(N; y), one per enumerated
//!       state, shared by every source row.
//!
//! The kernel is an evaluator rather than an edge list because the explicit matrix
//! is dense: `materialize` exists for small spaces, `cache_dense` trades O(states²)
//! memory for amortized evaluation when the matrix is iterated repeatedly.
//!
//! =============================================================================================

use ndarray::{Array1, Array2};
use rayon::prelude::*;
use tracing::debug;

use crate::error::Result;
use crate::incentives::Incentive;
use crate::math;
use crate::state::StateSpace;

use super::{check_mutation_rate, reproduction_vector, Edge, TransitionKernel};

/// ==============================================================================================
/// ======================================= Kernel Type ==========================================
/// ==============================================================================================

pub struct WrightFisherKernel<'a> {
    space: &'a StateSpace,

    /// Reproduction probability vector per source state index (each sums to 1).
    reproduction: Vec<Array1<f64>>,

    /// ln C(N; y) per target state index, shared across all source rows.
    ln_coeff: Vec<f64>,

    /// Optional fully materialized matrix, indexed (source, target).
    dense: Option<Array2<f64>>,
}

impl<'a> WrightFisherKernel<'a> {
    /// Build the kernel for `space` under `incentive` and mutation rate `mu`.
    ///     Errors:
    ///         - `InvalidParameter` when μ is outside [0, 1]
    ///         - `DegenerateIncentive` when the incentive sums to zero at any state
    pub fn new(space: &'a StateSpace, incentive: &dyn Incentive, mu: f64) -> Result<Self> {
        check_mutation_rate(mu)?;

        let population = space.population();

        // ------------------------------------------------------------------------------------
        // (1) ln(k!) table, then per-target log-multinomial coefficients
        // ------------------------------------------------------------------------------------
        let ln_fact = math::ln_factorial_table(population);
        let ln_coeff: Vec<f64> = space
            .states()
            .iter()
            .map(|state| {
                let mut c = ln_fact[population];
                for &y in state.counts() {
                    c -= ln_fact[y];
                }
                c
            })
            .collect();

        // ------------------------------------------------------------------------------------
        // (2) Mutation-perturbed reproduction vector per source state
        // ------------------------------------------------------------------------------------
        let mut reproduction = Vec::with_capacity(space.len());
        for state in space.states() {
            let weights = incentive.evaluate(state);
            reproduction.push(reproduction_vector(&weights, mu, state)?);
        }

        debug!(
            states = space.len(),
            population,
            num_types = space.num_types(),
            "wright-fisher kernel constructed"
        );

        Ok(Self {
            space,
            reproduction,
            ln_coeff,
            dense: None,
        })
    }

    #[inline]
    pub fn space(&self) -> &StateSpace {
        self.space
    }

    /// Reproduction probability vector of a source state.
    #[inline]
    pub fn reproduction(&self, source: usize) -> &Array1<f64> {
        &self.reproduction[source]
    }

    /// Log-space pmf evaluation, bypassing the dense cache.
    fn evaluate(&self, source: usize, target: usize) -> f64 {
        let ps = &self.reproduction[source];
        let target_state = &self.space.states()[target];

        let mut log_p = self.ln_coeff[target];
        for (k, &y) in target_state.counts().iter().enumerate() {
            if y == 0 {
                continue;
            }
            let p = ps[k];
            if p <= 0.0 {
                // A required type has zero reproduction probability.
                return 0.0;
            }
            log_p += y as f64 * p.ln();
        }
        log_p.exp()
    }

    /// One full row of transition probabilities out of `source`.
    pub fn row(&self, source: usize) -> Vec<f64> {
        (0..self.space.len())
            .map(|t| self.probability(source, t))
            .collect()
    }

    /// Fill the dense (states × states) matrix so subsequent lookups are O(1).
    /// Memory is O(states²), i.e. O(N⁴) for three types, which is exactly the
    /// trade-off that pushes very large N to the external-solver path instead.
    pub fn cache_dense(&mut self) {
        let n = self.space.len();
        let mut data = vec![0.0; n * n];

        let this: &Self = &*self;
        data.par_chunks_mut(n).enumerate().for_each(|(source, row)| {
            for (target, slot) in row.iter_mut().enumerate() {
                *slot = this.evaluate(source, target);
            }
        });

        self.dense = Some(
            Array2::from_shape_vec((n, n), data)
                .expect("WrightFisherKernel::cache_dense: shape"),
        );
        debug!(states = n, "wright-fisher dense cache filled");
    }

    /// Materialize every positive edge. Intended for small spaces; the result is
    /// dense (every pair is positive under a Fermi incentive with μ > 0).
    pub fn materialize(&self) -> Vec<Edge> {
        let states = self.space.states();
        let mut edges = Vec::new();
        for s in 0..states.len() {
            for t in 0..states.len() {
                let w = self.probability(s, t);
                if w > 0.0 {
                    edges.push((states[s].clone(), states[t].clone(), w));
                }
            }
        }
        edges
    }
}

impl TransitionKernel for WrightFisherKernel<'_> {
    #[inline]
    fn num_states(&self) -> usize {
        self.space.len()
    }

    #[inline]
    fn probability(&self, source: usize, target: usize) -> f64 {
        match &self.dense {
            Some(matrix) => matrix[[source, target]],
            None => self.evaluate(source, target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incentives::{FermiIncentive, LinearLandscape, ReplicatorIncentive};
    use crate::state::PopulationState;

    fn neutral_fermi(n: usize) -> FermiIncentive {
        FermiIncentive::new(
            LinearLandscape::from_rows(&vec![vec![1.0; n]; n]).unwrap(),
            0.0,
            1.0,
        )
    }

    fn rps_fermi(beta: f64) -> FermiIncentive {
        let m = LinearLandscape::from_rows(&[
            vec![0.0, -1.0, 1.0],
            vec![1.0, 0.0, -1.0],
            vec![-1.0, 1.0, 0.0],
        ])
        .unwrap();
        FermiIncentive::new(m, beta, 1.0)
    }

    #[test]
    fn rows_are_stochastic() {
        let space = StateSpace::new(6, 3).unwrap();
        let incentive = rps_fermi(1.5);
        let kernel = WrightFisherKernel::new(&space, &incentive, 0.05).unwrap();

        for s in 0..space.len() {
            let total: f64 = kernel.row(s).iter().sum();
            assert!(
                (total - 1.0).abs() < 1e-10,
                "row {s} sums to {total}"
            );
        }
    }

    #[test]
    fn two_type_case_matches_binomial_pmf() {
        // Neutral incentive, no mutation: p = (1/2, 1/2) at state (2, 2), so the
        // transition row is Binomial(4, 1/2).
        let space = StateSpace::new(4, 2).unwrap();
        let incentive = neutral_fermi(2);
        let kernel = WrightFisherKernel::new(&space, &incentive, 0.0).unwrap();

        let source = space.index(&PopulationState::new(vec![2, 2])).unwrap();
        let expected = [1.0, 4.0, 6.0, 4.0, 1.0].map(|c| c / 16.0);
        for k in 0..=4usize {
            let target = space.index(&PopulationState::new(vec![k, 4 - k])).unwrap();
            let got = kernel.probability(source, target);
            assert!(
                (got - expected[k]).abs() < 1e-12,
                "P((2,2) -> ({k}, {})) = {got}, want {}",
                4 - k,
                expected[k]
            );
        }
    }

    #[test]
    fn positive_mutation_makes_every_transition_positive() {
        let space = StateSpace::new(5, 3).unwrap();
        let incentive = rps_fermi(1.0);
        let kernel = WrightFisherKernel::new(&space, &incentive, 0.02).unwrap();

        for s in 0..space.len() {
            for t in 0..space.len() {
                assert!(kernel.probability(s, t) > 0.0);
            }
        }
    }

    #[test]
    fn dense_cache_agrees_with_lazy_evaluation() {
        let space = StateSpace::new(5, 3).unwrap();
        let incentive = rps_fermi(0.8);
        let lazy = WrightFisherKernel::new(&space, &incentive, 0.03).unwrap();
        let mut cached = WrightFisherKernel::new(&space, &incentive, 0.03).unwrap();
        cached.cache_dense();

        for s in 0..space.len() {
            for t in 0..space.len() {
                assert_eq!(lazy.probability(s, t), cached.probability(s, t));
            }
        }
    }

    #[test]
    fn zero_sum_incentive_is_rejected() {
        // A zero game matrix under the replicator incentive gives all-zero weights.
        let space = StateSpace::new(4, 3).unwrap();
        let landscape = LinearLandscape::from_rows(&vec![vec![0.0; 3]; 3]).unwrap();
        let incentive = ReplicatorIncentive::new(landscape);
        assert!(WrightFisherKernel::new(&space, &incentive, 0.01).is_err());
    }

    #[test]
    fn materialized_edges_match_evaluator() {
        let space = StateSpace::new(3, 2).unwrap();
        let incentive = neutral_fermi(2);
        let kernel = WrightFisherKernel::new(&space, &incentive, 0.1).unwrap();
        let edges = kernel.materialize();
        assert_eq!(edges.len(), space.len() * space.len());
        for (source, target, weight) in edges {
            let s = space.index(&source).unwrap();
            let t = space.index(&target).unwrap();
            assert_eq!(kernel.probability(s, t), weight);
        }
    }
}
