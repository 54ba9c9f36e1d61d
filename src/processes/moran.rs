//! =============================================================================================
//! Moran-type process: single birth-death replacement on two types
//! =============================================================================================
//!
//! The state is the number of type-A individuals i out of N. One step replaces a
//! single individual: the reproducing type is drawn from the mutation-perturbed
//! incentive probabilities, the dying individual uniformly from the population, so
//!
//!     P(i -> i+1) = p_A · (N-i)/N        (A reproduces, B dies)
//!     P(i -> i-1) = p_B · i/N            (B reproduces, A dies)
//!     P(i -> i)   = 1 - up - down        (self-transition)
//!
//! with p = `reproduction_vector(incentive(i), μ)`. This design is two-type only;
//! general n goes through the Wright-Fisher kernel.
//!
//! =============================================================================================

use crate::error::{Result, StationaryError};
use crate::incentives::Incentive;
use crate::state::{PopulationState, StateSpace};

use super::{check_mutation_rate, reproduction_vector, Edge};

/// Up/down transition probabilities out of `state` = (i, N-i).
pub fn birth_death_rates(
    state: &PopulationState,
    incentive: &dyn Incentive,
    mu: f64,
) -> Result<(f64, f64)> {
    debug_assert_eq!(state.num_types(), 2, "birth_death_rates: two types only");

    let population = state.population();
    if population == 0 {
        return Ok((0.0, 0.0));
    }

    let weights = incentive.evaluate(state);
    let ps = reproduction_vector(&weights, mu, state)?;

    let i = state.counts()[0];
    let up = ps[0] * (population - i) as f64 / population as f64;
    let down = ps[1] * i as f64 / population as f64;
    Ok((up, down))
}

/// Materialize the full edge list of the Moran-type process over `space`.
///     Errors:
///         - `InvalidParameter` unless `space.num_types() == 2` and μ in [0, 1]
///         - `DegenerateIncentive` if the incentive sums to zero at any state
pub fn transition_edges(
    space: &StateSpace,
    incentive: &dyn Incentive,
    mu: f64,
) -> Result<Vec<Edge>> {
    if space.num_types() != 2 {
        return Err(StationaryError::InvalidParameter(format!(
            "moran::transition_edges: birth-death rule is defined for 2 types, got {}",
            space.num_types()
        )));
    }
    check_mutation_rate(mu)?;

    let population = space.population();
    let mut edges = Vec::with_capacity(3 * space.len());

    for state in space.states() {
        let (up, down) = birth_death_rates(state, incentive, mu)?;
        let i = state.counts()[0];

        if up > 0.0 {
            let target = PopulationState::new(vec![i + 1, population - i - 1]);
            edges.push((state.clone(), target, up));
        }
        if down > 0.0 {
            let target = PopulationState::new(vec![i - 1, population - i + 1]);
            edges.push((state.clone(), target, down));
        }

        let stay = 1.0 - up - down;
        if stay > 0.0 {
            edges.push((state.clone(), state.clone(), stay));
        }
    }

    Ok(edges)
}
