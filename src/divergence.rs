//! =============================================================================================
//! Divergence diagnostics: deviation of the stochastic process from deterministic drift
//! =============================================================================================
//!
//! For each interior state x the expected next state under the transition kernel is
//!
//!     E(x) = Σ_y y · P(x -> y)
//!
//! and the q-divergence D_q(normalize(E(x)), normalize(x)) measures how far one step
//! of the process drifts from staying put: zero exactly where the dynamics are
//! locally drift-free. q = 1 is classical Kullback-Leibler divergence; other q give
//! the generalized (Tsallis-type) family. Boundary states are skipped: the
//! divergence is ill-defined when a coordinate is zero.
//!
//! This is a read-only diagnostic; nothing here feeds back into the stationary
//! computation.
//!
//! =============================================================================================

use std::collections::BTreeMap;
use std::hash::Hash;

use rayon::prelude::*;

use crate::graph::TransitionGraph;
use crate::processes::TransitionKernel;
use crate::simplex::Simplex;
use crate::state::{PopulationState, StateSpace};

/// ==============================================================================================
/// ==================================== q-Divergence ============================================
/// ==============================================================================================

/// The q-parameterized divergence family between probability vectors.
#[derive(Clone, Copy, Debug)]
pub struct QDivergence {
    q: f64,
}

impl QDivergence {
    #[inline]
    pub fn new(q: f64) -> Self {
        Self { q }
    }

    /// D_q(x, y) for probability vectors of equal length.
    ///     - q = 0: half squared Euclidean distance
    ///     - q = 1: Kullback-Leibler divergence Σ x_i ln(x_i / y_i)
    ///     - q = 2: -Σ (ln(x_i/y_i) + 1 - x_i/y_i)
    ///     - otherwise: the generalized Tsallis form
    pub fn divergence(&self, x: &[f64], y: &[f64]) -> f64 {
        debug_assert_eq!(x.len(), y.len(), "QDivergence: length mismatch");

        if self.q == 0.0 {
            let mut s = 0.0;
            for i in 0..x.len() {
                let d = x[i] - y[i];
                s += d * d;
            }
            return 0.5 * s;
        }

        if self.q == 1.0 {
            return kl_divergence(x, y);
        }

        if self.q == 2.0 {
            let mut s = 0.0;
            for i in 0..x.len() {
                s += (x[i] / y[i]).ln() + 1.0 - x[i] / y[i];
            }
            return -s;
        }

        let q = self.q;
        let mut s = 0.0;
        for i in 0..x.len() {
            s += (y[i].powf(2.0 - q) - x[i].powf(2.0 - q)) / (2.0 - q);
            s -= y[i].powf(1.0 - q) * (y[i] - x[i]);
        }
        -s / (1.0 - q)
    }
}

/// Kullback-Leibler divergence Σ x_i ln(x_i / y_i), with the 0·ln 0 = 0 convention.
pub fn kl_divergence(x: &[f64], y: &[f64]) -> f64 {
    debug_assert_eq!(x.len(), y.len(), "kl_divergence: length mismatch");
    let mut s = 0.0;
    for i in 0..x.len() {
        if x[i] > 0.0 {
            s += x[i] * (x[i] / y[i]).ln();
        }
    }
    s
}

/// ==============================================================================================
/// ============================== Expected-State Divergence =====================================
/// ==============================================================================================

/// D_q(normalize(E(x)), normalize(x)) for every interior state of `space`.
/// Boundary states (any zero coordinate) are omitted from the result.
pub fn expected_state_divergence<K>(
    space: &StateSpace,
    kernel: &K,
    q: f64,
) -> BTreeMap<PopulationState, f64>
where
    K: TransitionKernel + Sync,
{
    let div = QDivergence::new(q);
    let states = space.states();
    let num_types = space.num_types();

    (0..states.len())
        .into_par_iter()
        .filter_map(|s| {
            let state = &states[s];
            if !state.is_interior() {
                return None;
            }

            // E(x) = Σ_y y · P(x -> y), accumulated coordinate-wise.
            let mut expected = vec![0.0; num_types];
            for (t, target) in states.iter().enumerate() {
                let w = kernel.probability(s, t);
                if w == 0.0 {
                    continue;
                }
                for (k, &y) in target.counts().iter().enumerate() {
                    expected[k] += y as f64 * w;
                }
            }

            let e = Simplex::from_vec(expected);
            let x = Simplex::from_counts(state);
            Some((state.clone(), div.divergence(e.as_slice(), x.as_slice())))
        })
        .collect::<Vec<_>>()
        .into_iter()
        .collect()
}

/// ==============================================================================================
/// ===================================== Entropy Rate ===========================================
/// ==============================================================================================

/// Entropy rate of a chain with stationary distribution π over a row-stochastic
/// graph: H = -Σ_x π(x) Σ_y T(x,y) ln T(x,y).
pub fn entropy_rate<V>(graph: &TransitionGraph<V>, stationary: &BTreeMap<V, f64>) -> f64
where
    V: Clone + Eq + Hash + Ord,
{
    let mut h = 0.0;
    for (source, _, weight) in graph.edges() {
        if *weight > 0.0 {
            if let Some(pi) = stationary.get(source) {
                h -= pi * weight * weight.ln();
            }
        }
    }
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incentives::{FermiIncentive, LinearLandscape};
    use crate::processes::wright_fisher::WrightFisherKernel;

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
    fn divergence_is_zero_at_equality() {
        let x = [0.2, 0.3, 0.5];
        for q in [0.0, 1.0, 2.0, 1.5, 0.5] {
            let d = QDivergence::new(q).divergence(&x, &x);
            assert!(d.abs() < 1e-12, "q={q}: D(x,x)={d}");
        }
    }

    #[test]
    fn divergence_is_nonnegative() {
        let pairs = [
            ([0.2, 0.3, 0.5], [0.4, 0.4, 0.2]),
            ([0.1, 0.1, 0.8], [1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0]),
            ([0.6, 0.3, 0.1], [0.5, 0.25, 0.25]),
        ];
        for q in [0.0, 0.5, 1.0, 1.5, 2.0] {
            let div = QDivergence::new(q);
            for (x, y) in &pairs {
                let d = div.divergence(x, y);
                assert!(d >= -1e-12, "q={q}: D={d} for {x:?} vs {y:?}");
            }
        }
    }

    #[test]
    fn kl_matches_direct_formula() {
        let x = [0.5, 0.5];
        let y = [0.25, 0.75];
        let expected = 0.5 * (0.5f64 / 0.25).ln() + 0.5 * (0.5f64 / 0.75).ln();
        assert!((kl_divergence(&x, &y) - expected).abs() < 1e-12);
    }

    #[test]
    fn drift_free_process_has_zero_divergence() {
        // Neutral Wright-Fisher without mutation: E(x) = N·(x/N) = x at every
        // interior state, so every divergence vanishes.
        let space = StateSpace::new(6, 3).unwrap();
        let incentive = neutral_fermi(3);
        let kernel = WrightFisherKernel::new(&space, &incentive, 0.0).unwrap();

        let d = expected_state_divergence(&space, &kernel, 1.0);
        assert!(!d.is_empty());
        for (state, value) in d {
            assert!(
                value.abs() < 1e-9,
                "drift-free state {state:?} has divergence {value}"
            );
        }
    }

    #[test]
    fn boundary_states_are_skipped_and_values_nonnegative() {
        let space = StateSpace::new(5, 3).unwrap();
        let incentive = rps_fermi(1.5);
        let kernel = WrightFisherKernel::new(&space, &incentive, 0.02).unwrap();

        for q in [0.0, 1.0, 1.5] {
            let d = expected_state_divergence(&space, &kernel, q);
            let interior = space.states().iter().filter(|s| s.is_interior()).count();
            assert_eq!(d.len(), interior);
            for (state, value) in d {
                assert!(state.is_interior());
                assert!(value >= -1e-12);
            }
        }
    }

    #[test]
    fn entropy_rate_of_fair_coin_chain_is_ln_two() {
        let mut graph = TransitionGraph::new();
        for s in 0u32..2 {
            for t in 0u32..2 {
                graph.add_edge(s, t, 0.5);
            }
        }
        let stationary = BTreeMap::from([(0u32, 0.5), (1u32, 0.5)]);
        let h = entropy_rate(&graph, &stationary);
        assert!((h - (2.0f64).ln()).abs() < 1e-12);
    }
}
