//! =============================================================================================
//! Simplex: probability-vector wrapper + feasibility restoration
//! =============================================================================================
//!
//! This module centralizes logic for working on the probability simplex:
//!     - Nonnegative entries: p_i >= 0
//!     - Unit mass: Σ_i p_i = 1
//!
//! Every vector-valued quantity in the stationary computation that must be a
//! probability distribution over types passes through here: incentive-derived
//! reproduction vectors, composition frequencies, and expected next states.
//!
//! DESIGN NOTES
//! -----------
//! - We do not enforce invariants via type tricks; instead, we provide a canonical
//!   `sanitize()` routine and call it after any operation that can violate feasibility.
//! - An all-zero (or all-invalid) vector falls back to uniform.
//!
//! =============================================================================================

use ndarray::Array1;

use crate::math;
use crate::state::PopulationState;

/// A thin, opinionated wrapper around an `ndarray::Array1<f64>` intended to represent a
/// probability simplex point.
#[derive(Clone, Debug)]
pub struct Simplex {
    data: Array1<f64>,
}

impl Simplex {
    /// Construct from an owned vector and immediately sanitize.
    #[inline]
    pub fn from_vec(v: Vec<f64>) -> Self {
        debug_assert!(!v.is_empty(), "Simplex::from_vec: empty vector");
        let mut s = Self {
            data: Array1::from_vec(v),
        };
        s.sanitize();
        s
    }

    /// Construct from a borrowed slice (copies) and immediately sanitize.
    #[inline]
    pub fn from_slice(slice: &[f64]) -> Self {
        debug_assert!(!slice.is_empty(), "Simplex::from_slice: empty slice");
        Self::from_vec(slice.to_vec())
    }

    /// Per-type frequencies of a composition: p_i = c_i / N.
    #[inline]
    pub fn from_counts(state: &PopulationState) -> Self {
        Self::from_vec(state.counts().iter().map(|&c| c as f64).collect())
    }

    /// The uniform simplex point of dim `d`: p_i = 1/d for all i.
    #[inline]
    pub fn uniform(d: usize) -> Self {
        assert!(d > 0, "Simplex::uniform: dim must be > 0");
        Self {
            data: Array1::from_elem(d, 1.0 / (d as f64)),
        }
    }

    /// Dimension of the simplex (number of types).
    #[inline]
    pub fn dim(&self) -> usize {
        self.data.len()
    }

    /// Borrow as an `ndarray` view for numeric work.
    #[inline]
    pub fn as_array(&self) -> &Array1<f64> {
        &self.data
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        self.data.as_slice().expect("Simplex: contiguous")
    }

    /// Canonical projection onto the simplex:
    ///     1) Non-finite or negative entries → 0
    ///     2) Renormalize to sum=1; if everything becomes zero, fall back to uniform
    #[inline]
    pub fn sanitize(&mut self) {
        debug_assert!(self.dim() > 0);

        for x in self.data.iter_mut() {
            if !x.is_finite() || *x <= 0.0 {
                *x = 0.0;
            }
        }

        math::normalize(self.data.as_slice_mut().expect("Simplex: contiguous"));
    }

    /// Round this simplex point to the nearest composition of `population`:
    ///     floor the expected counts p_i * N, then distribute the shortfall to the
    ///     largest fractional parts so the total matches `population` exactly.
    pub fn to_composition(&self, population: usize) -> PopulationState {
        let d = self.dim();

        let raw: Vec<f64> = self
            .data
            .iter()
            .map(|&p| p * population as f64)
            .collect();
        let mut counts: Vec<usize> = raw.iter().map(|&x| x.floor() as usize).collect();

        let sum_now: usize = counts.iter().sum();
        let diff: isize = population as isize - sum_now as isize;

        if diff != 0 {
            let mut idx: Vec<usize> = (0..d).collect();
            idx.sort_by(|&a, &b| {
                let fa = raw[a] - counts[a] as f64;
                let fb = raw[b] - counts[b] as f64;
                fb.partial_cmp(&fa).unwrap() // descending by fractional part
            });

            if diff > 0 {
                for &i in idx.iter().take(diff as usize) {
                    counts[i] += 1;
                }
            } else {
                for &i in idx.iter().rev().take((-diff) as usize) {
                    if counts[i] > 0 {
                        counts[i] -= 1;
                    }
                }
            }
        }

        PopulationState::new(counts)
    }
}
