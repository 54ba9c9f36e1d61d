// stationary.rs
//! =============================================================================================
//! Stationary approximation: sparse power iteration to a flagged fixed point
//! =============================================================================================
//!
//! This module approximates the stationary distribution of the Markov chain defined
//! by a `TransitionGraph` (or a transition kernel) by repeated application of the
//! transition operator:
//!
//!     s_{k+1}[y] = Σ_x w(x -> y) · s_k[x]
//!
//! accumulated over the sparse in-edge lists, never through an explicit dense matrix
//! (except when a kernel row is inherently dense, as for Wright-Fisher).
//!
//! CONVERGENCE
//! -----------
//! Iteration stops when the L1 change between successive distributions falls below
//! the configured tolerance, or at the iteration cap. Exhausting the cap is NOT an
//! error: the best available approximation is returned with `converged = false`,
//! which callers must not silently treat as exact.
//!
//! Chains with absorbing vertices (self-loop weight ≈ 1) have no unique stationary
//! distribution; the result is then initial-condition dependent and flagged via
//! `absorbing = true`.
//!
//! =============================================================================================

use std::collections::{BTreeMap, VecDeque};
use std::fs::File;
use std::hash::Hash;
use std::io::Write;
use std::path::Path;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, StationaryError};
use crate::graph::TransitionGraph;
use crate::math;
use crate::processes::TransitionKernel;
use crate::state::PopulationState;

/// Keep a short rolling window of recent residuals (for debugging/inspection),
/// instead of storing the full residual history.
const RESIDUAL_RING_KEEP: usize = 32;

/// Self-loop weight above which a vertex is treated as absorbing.
const ABSORBING_EPS: f64 = 1e-12;

/// ==============================================================================================
/// ==================================== Configuration ===========================================
/// ==============================================================================================

#[derive(Clone, Copy, Debug)]
pub struct IterationConfig {
    /// Hard cap on iterations; reaching it yields `converged = false`.
    pub max_iters: usize,
    /// L1 convergence tolerance on successive distributions.
    pub tolerance: f64,
    /// Emit a debug log line every this many iterations (0 disables).
    pub log_interval: usize,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            max_iters: 10_000,
            tolerance: 1e-10,
            log_interval: 500,
        }
    }
}

/// Outcome of a stationary approximation.
#[derive(Clone, Debug)]
pub struct StationaryResult<V: Ord> {
    /// State -> probability mass; sums to 1 within tolerance over reachable states.
    pub distribution: BTreeMap<V, f64>,
    /// False when the iteration cap was exhausted before the tolerance was met.
    pub converged: bool,
    pub iterations: usize,
    /// Final L1 residual.
    pub residual: f64,
    /// True when some vertex is absorbing; the limit then depends on the initial
    /// distribution.
    pub absorbing: bool,
}

/// ==============================================================================================
/// ============================= Power iteration over a graph ===================================
/// ==============================================================================================

/// Stateful power-iteration solver that owns all buffers.
///
/// Minimum usage:
///     - Construct with `new(graph, config)`
///     - Call `run()` to iterate to convergence or the cap
///
/// You can also drive it manually via repeated calls to `step()`.
pub struct PowerIteration<V> {
    // Enumerated vertices, in the graph's deterministic order.
    vertices: Vec<V>,

    // Per-target list of (source, normalized weight).
    in_edges: Vec<Vec<(usize, f64)>>,
    absorbing: bool,

    config: IterationConfig,

    // Distribution buffers, swapped each step.
    curr: Vec<f64>,
    next: Vec<f64>,

    iterations: usize,
    residual: f64,
    recent_residuals: VecDeque<f64>,
}

impl<V> PowerIteration<V>
where
    V: Clone + Eq + Hash + Ord,
{
    /// Build the solver from `graph`, normalizing each vertex's outgoing weights
    /// into transition probabilities. The initial distribution is uniform.
    pub fn new(graph: &TransitionGraph<V>, config: IterationConfig) -> Self {
        let vertices: Vec<V> = graph.vertices().iter().cloned().collect();
        let index: BTreeMap<&V, usize> =
            vertices.iter().enumerate().map(|(i, v)| (v, i)).collect();
        let num = vertices.len();

        // --------------------------------------------------------------------------------------
        // (1) Outgoing totals for row normalization
        // --------------------------------------------------------------------------------------
        let mut out_totals = vec![0.0; num];
        for (source, _, weight) in graph.edges() {
            out_totals[index[source]] += weight;
        }

        // --------------------------------------------------------------------------------------
        // (2) In-edge adjacency with normalized weights + absorbing scan
        // --------------------------------------------------------------------------------------
        let mut in_edges: Vec<Vec<(usize, f64)>> = vec![Vec::new(); num];
        let mut absorbing = false;
        for (source, target, weight) in graph.edges() {
            let s = index[source];
            let t = index[target];
            let total = out_totals[s];
            let w = if total > 0.0 { weight / total } else { *weight };
            if s == t && w >= 1.0 - ABSORBING_EPS {
                absorbing = true;
            }
            in_edges[t].push((s, w));
        }

        // --------------------------------------------------------------------------------------
        // (3) Uniform initial distribution
        // --------------------------------------------------------------------------------------
        let uniform = if num > 0 { 1.0 / num as f64 } else { 0.0 };

        Self {
            vertices,
            in_edges,
            absorbing,
            config,
            curr: vec![uniform; num],
            next: vec![0.0; num],
            iterations: 0,
            residual: f64::INFINITY,
            recent_residuals: VecDeque::with_capacity(RESIDUAL_RING_KEEP),
        }
    }

    /// Replace the initial distribution (clamped and renormalized).
    ///     Errors:
    ///         - `InvalidParameter` if a keyed vertex is not in the graph
    pub fn set_initial(&mut self, initial: &BTreeMap<V, f64>) -> Result<()> {
        let index: BTreeMap<&V, usize> = self
            .vertices
            .iter()
            .enumerate()
            .map(|(i, v)| (v, i))
            .collect();

        self.curr.iter_mut().for_each(|x| *x = 0.0);
        for (vertex, mass) in initial {
            let i = *index.get(vertex).ok_or_else(|| {
                StationaryError::InvalidParameter(
                    "PowerIteration::set_initial: vertex not in graph".to_string(),
                )
            })?;
            self.curr[i] = mass.max(0.0);
        }
        math::normalize(&mut self.curr);
        Ok(())
    }

    /// Recent residuals, oldest first.
    #[inline]
    pub fn recent_residuals(&self) -> impl Iterator<Item = f64> + '_ {
        self.recent_residuals.iter().copied()
    }

    /// Perform one application of the transition operator. Returns the L1 change.
    pub fn step(&mut self) -> f64 {
        let curr = &self.curr;
        let in_edges = &self.in_edges;

        // Disjoint writes per target; sources are read-only.
        self.next
            .par_iter_mut()
            .enumerate()
            .for_each(|(target, slot)| {
                let mut acc = 0.0;
                for &(source, weight) in &in_edges[target] {
                    acc += weight * curr[source];
                }
                *slot = acc;
            });

        let residual: f64 = self
            .next
            .iter()
            .zip(self.curr.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();

        std::mem::swap(&mut self.curr, &mut self.next);
        self.iterations += 1;
        self.residual = residual;

        if self.recent_residuals.len() == RESIDUAL_RING_KEEP {
            self.recent_residuals.pop_front();
        }
        self.recent_residuals.push_back(residual);

        residual
    }

    /// Iterate until the tolerance is met or the cap is reached.
    pub fn run(mut self) -> StationaryResult<V> {
        let mut converged = false;

        for iter in 1..=self.config.max_iters {
            let residual = self.step();

            if self.config.log_interval > 0 && iter % self.config.log_interval == 0 {
                debug!(iter, residual, "power iteration progress");
            }

            if residual < self.config.tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                iterations = self.iterations,
                residual = self.residual,
                "power iteration exhausted its budget without converging"
            );
        }

        let distribution = self
            .vertices
            .into_iter()
            .zip(self.curr)
            .collect();

        StationaryResult {
            distribution,
            converged,
            iterations: self.iterations,
            residual: self.residual,
            absorbing: self.absorbing,
        }
    }
}

/// One-call convenience wrapper over `PowerIteration`.
pub fn approximate_stationary<V>(
    graph: &TransitionGraph<V>,
    config: IterationConfig,
) -> StationaryResult<V>
where
    V: Clone + Eq + Hash + Ord,
{
    PowerIteration::new(graph, config).run()
}

/// ==============================================================================================
/// ============================ Power iteration over a kernel ===================================
/// ==============================================================================================

/// Iterate directly against a transition kernel (dense rows), without building a
/// graph. Rows are assumed stochastic, which the generators guarantee.
pub fn approximate_stationary_kernel<K>(
    states: &[PopulationState],
    kernel: &K,
    config: IterationConfig,
) -> StationaryResult<PopulationState>
where
    K: TransitionKernel + Sync,
{
    let num = states.len();
    assert_eq!(
        num,
        kernel.num_states(),
        "approximate_stationary_kernel: state/kernel size mismatch"
    );

    let mut curr = vec![1.0 / num as f64; num];
    let mut next = vec![0.0; num];

    let absorbing = (0..num).any(|s| kernel.probability(s, s) >= 1.0 - ABSORBING_EPS);

    let mut converged = false;
    let mut iterations = 0;
    let mut residual = f64::INFINITY;

    for iter in 1..=config.max_iters {
        {
            let curr_ref = &curr;
            next.par_iter_mut().enumerate().for_each(|(target, slot)| {
                let mut acc = 0.0;
                for source in 0..num {
                    acc += kernel.probability(source, target) * curr_ref[source];
                }
                *slot = acc;
            });
        }

        residual = next
            .iter()
            .zip(curr.iter())
            .map(|(a, b)| (a - b).abs())
            .sum();
        std::mem::swap(&mut curr, &mut next);
        iterations = iter;

        if config.log_interval > 0 && iter % config.log_interval == 0 {
            debug!(iter, residual, "kernel power iteration progress");
        }

        if residual < config.tolerance {
            converged = true;
            break;
        }
    }

    if !converged {
        warn!(
            iterations,
            residual, "kernel power iteration exhausted its budget without converging"
        );
    }

    StationaryResult {
        distribution: states.iter().cloned().zip(curr).collect(),
        converged,
        iterations,
        residual,
        absorbing,
    }
}

/// ==============================================================================================
/// ================================ Distribution container ======================================
/// ==============================================================================================

/// A persisted distribution over compositions, sorted by state for binary-search
/// lookup and stable JSON output.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DistributionTable {
    entries: Vec<(PopulationState, f64)>,
}

impl DistributionTable {
    pub fn from_entries(mut entries: Vec<(PopulationState, f64)>) -> Self {
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Self { entries }
    }

    pub fn from_result(result: &StationaryResult<PopulationState>) -> Self {
        Self::from_entries(
            result
                .distribution
                .iter()
                .map(|(state, mass)| (state.clone(), *mass))
                .collect(),
        )
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &(PopulationState, f64)> {
        self.entries.iter()
    }

    /// Mass at `state` (0 for absent states).
    pub fn mass(&self, state: &PopulationState) -> f64 {
        self.entries
            .binary_search_by(|(s, _)| s.cmp(state))
            .map(|i| self.entries[i].1)
            .unwrap_or(0.0)
    }

    pub fn total_mass(&self) -> f64 {
        self.entries.iter().map(|(_, m)| m).sum()
    }

    /// Write this table to JSON at `output_path` (pretty-printed).
    pub fn save_to_json(&self, output_path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| StationaryError::Serde(format!("DistributionTable: {e}")))?;
        let mut file = File::create(output_path).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "DistributionTable::save_to_json: create {}: {e}",
                    output_path.display()
                ),
            )
        })?;
        file.write_all(json.as_bytes()).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "DistributionTable::save_to_json: write {}: {e}",
                    output_path.display()
                ),
            )
        })?;
        Ok(())
    }

    /// Read a `DistributionTable` from an exact JSON file path.
    pub fn read_from_json(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("DistributionTable::read_from_json: open {}: {e}", path.display()),
            )
        })?;
        serde_json::from_reader::<_, Self>(file)
            .map_err(|e| StationaryError::Serde(format!("DistributionTable: parse {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incentives::{FermiIncentive, LinearLandscape};
    use crate::processes::{moran, wright_fisher::WrightFisherKernel};
    use crate::state::StateSpace;

    fn neutral_fermi(n: usize) -> FermiIncentive {
        FermiIncentive::new(
            LinearLandscape::from_rows(&vec![vec![1.0; n]; n]).unwrap(),
            0.0,
            1.0,
        )
    }

    #[test]
    fn two_absorbing_states_return_initial_distribution_flagged() {
        let mut graph = TransitionGraph::new();
        graph.add_edges([(0u32, 0u32, 1.0), (1, 1, 1.0)]);

        let result = approximate_stationary(&graph, IterationConfig::default());
        assert!(result.converged);
        assert_eq!(result.iterations, 1);
        assert!(result.absorbing, "identity chain must be flagged absorbing");
        assert_eq!(result.distribution[&0], 0.5);
        assert_eq!(result.distribution[&1], 0.5);
    }

    #[test]
    fn uniform_cycle_converges_to_uniform() {
        let mut graph = TransitionGraph::new();
        for s in 0u32..3 {
            for t in 0u32..3 {
                graph.add_edge(s, t, 1.0 / 3.0);
            }
        }

        let mut solver = PowerIteration::new(&graph, IterationConfig::default());
        let initial = BTreeMap::from([(0u32, 1.0)]);
        solver.set_initial(&initial).unwrap();
        let result = solver.run();

        assert!(result.converged);
        assert!(!result.absorbing);
        for (_, mass) in result.distribution {
            assert!((mass - 1.0 / 3.0).abs() < 1e-9);
        }
    }

    #[test]
    fn unnormalized_weights_are_row_normalized_internally() {
        let mut graph = TransitionGraph::new();
        // Row sums deliberately not 1.
        graph.add_edges([(0u32, 0u32, 3.0), (0, 1, 1.0), (1, 0, 2.0), (1, 1, 2.0)]);

        let result = approximate_stationary(&graph, IterationConfig::default());
        assert!(result.converged);
        let total: f64 = result.distribution.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn exhausted_budget_is_flagged_not_exact() {
        let space = StateSpace::new(30, 2).unwrap();
        let incentive = neutral_fermi(2);
        let edges = moran::transition_edges(&space, &incentive, 0.01).unwrap();
        let mut graph = TransitionGraph::new();
        graph.add_edges(edges);

        let config = IterationConfig {
            max_iters: 3,
            tolerance: 1e-15,
            log_interval: 0,
        };
        let result = approximate_stationary(&graph, config);
        assert!(!result.converged);
        assert_eq!(result.iterations, 3);
        assert!(result.residual > 1e-15);
    }

    #[test]
    fn neutral_moran_stationary_is_symmetric() {
        let n_pop = 12;
        let space = StateSpace::new(n_pop, 2).unwrap();
        let incentive = neutral_fermi(2);
        let edges = moran::transition_edges(&space, &incentive, 0.05).unwrap();
        let mut graph = TransitionGraph::new();
        graph.add_edges(edges);

        let config = IterationConfig {
            max_iters: 200_000,
            tolerance: 1e-13,
            log_interval: 0,
        };
        let result = approximate_stationary(&graph, config);
        assert!(result.converged);

        let total: f64 = result.distribution.values().sum();
        assert!((total - 1.0).abs() < 1e-8);

        for i in 0..=n_pop {
            let a = result.distribution[&PopulationState::new(vec![i, n_pop - i])];
            let b = result.distribution[&PopulationState::new(vec![n_pop - i, i])];
            assert!(
                (a - b).abs() < 1e-8,
                "neutral chain must be symmetric: pi({i}) = {a}, pi({}) = {b}",
                n_pop - i
            );
        }
    }

    #[test]
    fn kernel_and_graph_iterations_agree() {
        let space = StateSpace::new(6, 2).unwrap();
        let incentive = neutral_fermi(2);
        let kernel = WrightFisherKernel::new(&space, &incentive, 0.1).unwrap();

        let from_kernel =
            approximate_stationary_kernel(space.states(), &kernel, IterationConfig::default());

        let mut graph = TransitionGraph::new();
        graph.add_edges(kernel.materialize());
        let from_graph = approximate_stationary(&graph, IterationConfig::default());

        assert!(from_kernel.converged && from_graph.converged);
        for (state, mass) in &from_kernel.distribution {
            assert!((mass - from_graph.distribution[state]).abs() < 1e-9);
        }
    }

    #[test]
    fn distribution_table_lookup_and_json_round_trip() {
        let entries = vec![
            (PopulationState::new(vec![2, 0]), 0.25),
            (PopulationState::new(vec![0, 2]), 0.5),
            (PopulationState::new(vec![1, 1]), 0.25),
        ];
        let table = DistributionTable::from_entries(entries);
        assert!((table.total_mass() - 1.0).abs() < 1e-12);
        assert_eq!(table.mass(&PopulationState::new(vec![1, 1])), 0.25);
        assert_eq!(table.mass(&PopulationState::new(vec![2, 1])), 0.0);

        let path = std::env::temp_dir().join(format!(
            "stationary-rs-table-{}.json",
            std::process::id()
        ));
        table.save_to_json(&path).unwrap();
        let back = DistributionTable::read_from_json(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(back.len(), table.len());
        for (state, mass) in table.iter() {
            assert_eq!(back.mass(state), *mass);
        }
    }
}
