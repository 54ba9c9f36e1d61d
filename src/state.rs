/// ==============================================================================================
/// ========================== Population Compositions & State Space =============================
/// ==============================================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StationaryError};
use crate::math;

/// A population composition: one nonnegative count per type, summing to the
/// population size N. Immutable value type, usable as a map key after enumeration.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PopulationState(Vec<usize>);

impl PopulationState {
    #[inline]
    pub fn new(counts: Vec<usize>) -> Self {
        Self(counts)
    }

    #[inline]
    pub fn counts(&self) -> &[usize] {
        &self.0
    }

    /// Number of interacting types n.
    #[inline]
    pub fn num_types(&self) -> usize {
        self.0.len()
    }

    /// Total population N (sum of all counts).
    #[inline]
    pub fn population(&self) -> usize {
        self.0.iter().sum()
    }

    /// True when every coordinate is strictly positive (no type extinct).
    /// Divergence diagnostics are only defined on such states.
    #[inline]
    pub fn is_interior(&self) -> bool {
        self.0.iter().all(|&c| c > 0)
    }

    /// Per-type frequencies x_i = c_i / N as a plain vector.
    ///     Empty population falls back to uniform (matches the simplex convention).
    pub fn frequencies(&self) -> Vec<f64> {
        let mut xs: Vec<f64> = self.0.iter().map(|&c| c as f64).collect();
        math::normalize(&mut xs);
        xs
    }
}

/// ==============================================================================================
/// ======================================= State Space ==========================================
/// ==============================================================================================

/// The full discretized simplex for fixed (N, n): all C(N+n-1, n-1) compositions,
/// enumerated in lexicographic order over the first n-1 coordinates.
///
/// The enumeration order is load-bearing: `index` / `state_of` form the bijection
/// that the export/import round trip of the external-solver bridge depends on, so
/// it must be stable and deterministic for a fixed (N, n).
pub struct StateSpace {
    population: usize,
    num_types: usize,
    states: Vec<PopulationState>,
    index_of: HashMap<PopulationState, usize>,
}

impl StateSpace {
    /// Enumerate the state space for population `population` and `num_types` types.
    ///     Errors:
    ///         - `InvalidParameter` when `num_types < 1`
    pub fn new(population: usize, num_types: usize) -> Result<Self> {
        if num_types < 1 {
            return Err(StationaryError::InvalidParameter(format!(
                "StateSpace::new: num_types must be >= 1, got {num_types}"
            )));
        }

        let expected = math::num_states(population, num_types);
        let mut states = Vec::with_capacity(expected);
        let mut scratch = vec![0usize; num_types];
        enumerate_into(population, 0, &mut scratch, &mut states);
        debug_assert_eq!(states.len(), expected, "StateSpace::new: enumeration count");

        let index_of = states
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();

        Ok(Self {
            population,
            num_types,
            states,
            index_of,
        })
    }

    #[inline]
    pub fn population(&self) -> usize {
        self.population
    }

    #[inline]
    pub fn num_types(&self) -> usize {
        self.num_types
    }

    /// Total number of states, C(N+n-1, n-1).
    #[inline]
    pub fn len(&self) -> usize {
        self.states.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// All states in enumeration order.
    #[inline]
    pub fn states(&self) -> &[PopulationState] {
        &self.states
    }

    /// Enumeration index of `state`, or `None` if it does not belong to this space.
    #[inline]
    pub fn index(&self, state: &PopulationState) -> Option<usize> {
        self.index_of.get(state).copied()
    }

    /// Inverse of `index`.
    #[inline]
    pub fn state_of(&self, index: usize) -> Option<&PopulationState> {
        self.states.get(index)
    }

    /// Content digest of the enumeration ordering (blake3 over the ordered count
    /// vectors). Two state spaces agree on indexing iff their digests match; the
    /// external-solver bridge persists this next to exported edges and refuses to
    /// re-attach results when it differs.
    pub fn ordering_digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(self.population as u64).to_le_bytes());
        hasher.update(&(self.num_types as u64).to_le_bytes());
        for state in &self.states {
            for &c in state.counts() {
                hasher.update(&(c as u64).to_le_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Recursive lexicographic enumeration: the first n-1 coordinates range freely,
/// the last absorbs the remainder.
fn enumerate_into(
    remaining: usize,
    position: usize,
    scratch: &mut Vec<usize>,
    out: &mut Vec<PopulationState>,
) {
    let num_types = scratch.len();

    // Last coordinate is determined by the others.
    if position == num_types - 1 {
        scratch[position] = remaining;
        out.push(PopulationState::new(scratch.clone()));
        return;
    }

    for value in 0..=remaining {
        scratch[position] = value;
        enumerate_into(remaining - value, position + 1, scratch, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn rejects_zero_types() {
        assert!(matches!(
            StateSpace::new(10, 0),
            Err(StationaryError::InvalidParameter(_))
        ));
    }

    #[test]
    fn enumeration_count_sum_and_distinctness() {
        for &(n_pop, n_types) in &[(0, 1), (5, 1), (10, 2), (7, 3), (4, 4), (30, 3)] {
            let space = StateSpace::new(n_pop, n_types).unwrap();
            assert_eq!(space.len(), math::num_states(n_pop, n_types));

            let mut seen = HashSet::new();
            for state in space.states() {
                assert_eq!(state.num_types(), n_types);
                assert_eq!(state.population(), n_pop);
                assert!(seen.insert(state.clone()), "duplicate state {state:?}");
            }
        }
    }

    #[test]
    fn index_and_state_of_are_inverse() {
        let space = StateSpace::new(12, 3).unwrap();
        for (i, state) in space.states().iter().enumerate() {
            assert_eq!(space.index(state), Some(i));
            assert_eq!(space.state_of(i), Some(state));
        }
        assert_eq!(space.state_of(space.len()), None);
        assert_eq!(space.index(&PopulationState::new(vec![13, 0, 0])), None);
    }

    #[test]
    fn ordering_is_lexicographic() {
        let space = StateSpace::new(2, 3).unwrap();
        let expected: Vec<Vec<usize>> = vec![
            vec![0, 0, 2],
            vec![0, 1, 1],
            vec![0, 2, 0],
            vec![1, 0, 1],
            vec![1, 1, 0],
            vec![2, 0, 0],
        ];
        let got: Vec<Vec<usize>> = space
            .states()
            .iter()
            .map(|s| s.counts().to_vec())
            .collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn digest_is_stable_and_discriminating() {
        let a = StateSpace::new(10, 3).unwrap();
        let b = StateSpace::new(10, 3).unwrap();
        let c = StateSpace::new(11, 3).unwrap();
        assert_eq!(a.ordering_digest(), b.ordering_digest());
        assert_ne!(a.ordering_digest(), c.ordering_digest());
    }

    #[test]
    fn interior_detection() {
        assert!(PopulationState::new(vec![1, 2, 3]).is_interior());
        assert!(!PopulationState::new(vec![0, 2, 4]).is_interior());
    }
}
