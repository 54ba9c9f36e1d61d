// simulation.rs
//! =============================================================================================
//! Monte Carlo sampling of the chain: empirical cross-checks for the exact engine
//! =============================================================================================
//!
//! Samples trajectories of the Moran / Wright-Fisher process directly, without ever
//! touching the transition matrix. Visit frequencies after burn-in estimate the
//! stationary distribution, which gives an independent check on the power-iteration
//! result for small state spaces.
//!
//! `SampleContext` owns the RNG and scratch buffers so the per-step sampling does
//! not allocate.
//!
//! =============================================================================================

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Binomial, Distribution};

use crate::error::{Result, StationaryError};
use crate::incentives::Incentive;
use crate::processes::{moran, reproduction_vector, UpdateRule};
use crate::simplex::Simplex;
use crate::state::{PopulationState, StateSpace};
use crate::stationary::DistributionTable;

/// Reusable RNG + scratch for trajectory sampling.
pub struct SampleContext {
    rng: SmallRng,
    counts: Vec<usize>,
}

impl SampleContext {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::try_from_os_rng().expect("Failed to initialize RNG"),
            counts: Vec::new(),
        }
    }

    /// Deterministic context for reproducible runs and tests.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
            counts: Vec::new(),
        }
    }
}

impl Default for SampleContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One birth-death step of the Moran-type process (two types).
pub fn moran_step(
    state: &PopulationState,
    incentive: &dyn Incentive,
    mu: f64,
    ctx: &mut SampleContext,
) -> Result<PopulationState> {
    let (up, down) = moran::birth_death_rates(state, incentive, mu)?;
    let i = state.counts()[0];
    let population = state.population();

    let u: f64 = ctx.rng.random();
    let next = if u < up {
        vec![i + 1, population - i - 1]
    } else if u < up + down {
        vec![i - 1, population - i + 1]
    } else {
        return Ok(state.clone());
    };
    Ok(PopulationState::new(next))
}

/// One full-generation resampling step of the Wright-Fisher process (general n).
/// The multinomial draw is decomposed into conditional binomials per type.
pub fn wright_fisher_step(
    state: &PopulationState,
    incentive: &dyn Incentive,
    mu: f64,
    ctx: &mut SampleContext,
) -> Result<PopulationState> {
    let weights = incentive.evaluate(state);
    let ps = reproduction_vector(&weights, mu, state)?;
    let n = ps.len();

    ctx.counts.clear();
    ctx.counts.resize(n, 0);

    let mut remaining = state.population() as u64;
    let mut rest = 1.0f64;
    for k in 0..n - 1 {
        if remaining == 0 {
            break;
        }
        let p = if rest > 0.0 { (ps[k] / rest).min(1.0) } else { 1.0 };
        let draw = Binomial::new(remaining, p)
            .expect("Binomial ctor")
            .sample(&mut ctx.rng);
        ctx.counts[k] = draw as usize;
        remaining -= draw;
        rest -= ps[k];
    }
    ctx.counts[n - 1] = remaining as usize;

    Ok(PopulationState::new(ctx.counts.clone()))
}

/// Advance one step under the selected update rule.
pub fn step(
    rule: UpdateRule,
    state: &PopulationState,
    incentive: &dyn Incentive,
    mu: f64,
    ctx: &mut SampleContext,
) -> Result<PopulationState> {
    match rule {
        UpdateRule::Moran => moran_step(state, incentive, mu, ctx),
        UpdateRule::WrightFisher => wright_fisher_step(state, incentive, mu, ctx),
    }
}

/// Visit-frequency estimate of the stationary distribution: run the chain from
/// `initial`, discard `burn_in` steps, then tally `samples` visited states.
pub fn empirical_distribution(
    space: &StateSpace,
    rule: UpdateRule,
    incentive: &dyn Incentive,
    mu: f64,
    initial: &PopulationState,
    burn_in: usize,
    samples: usize,
    ctx: &mut SampleContext,
) -> Result<DistributionTable> {
    if samples == 0 {
        return Err(StationaryError::InvalidParameter(
            "empirical_distribution: samples must be > 0".to_string(),
        ));
    }
    if space.index(initial).is_none() {
        return Err(StationaryError::InvalidParameter(format!(
            "empirical_distribution: initial state {initial:?} outside the state space"
        )));
    }

    let mut visits = vec![0usize; space.len()];
    let mut current = initial.clone();

    for _ in 0..burn_in {
        current = step(rule, &current, incentive, mu, ctx)?;
    }

    for _ in 0..samples {
        current = step(rule, &current, incentive, mu, ctx)?;
        let index = space.index(&current).ok_or_else(|| {
            StationaryError::InvalidParameter(format!(
                "empirical_distribution: trajectory left the state space at {current:?}"
            ))
        })?;
        visits[index] += 1;
    }

    let entries = space
        .states()
        .iter()
        .zip(visits.iter())
        .filter(|(_, &v)| v > 0)
        .map(|(state, &v)| (state.clone(), v as f64 / samples as f64))
        .collect();
    Ok(DistributionTable::from_entries(entries))
}

/// As `empirical_distribution`, but seeded from a point on the simplex: the
/// frequency vector is rounded to the nearest composition of N.
pub fn empirical_distribution_from_freqs(
    space: &StateSpace,
    rule: UpdateRule,
    incentive: &dyn Incentive,
    mu: f64,
    initial_freqs: &Simplex,
    burn_in: usize,
    samples: usize,
    ctx: &mut SampleContext,
) -> Result<DistributionTable> {
    let initial = initial_freqs.to_composition(space.population());
    empirical_distribution(space, rule, incentive, mu, &initial, burn_in, samples, ctx)
}
