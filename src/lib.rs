//! =============================================================================================
//! stationary-rs: stationary distributions of finite-population evolutionary processes
//! =============================================================================================
//!
//! This crate computes the long-run (stationary) probability distribution of a
//! multi-type Moran or Wright-Fisher process on the discretized simplex, together
//! with divergence and entropy diagnostics that characterize how far the stochastic
//! process drifts from the deterministic replicator dynamics.
//!
//! PIPELINE
//! --------
//!     StateSpace -> processes (needs an Incentive) -> TransitionGraph / kernel
//!                -> { stationary | divergence | bridge }
//!
//! - `state`:      enumerates all compositions of N individuals into n types and
//!                 provides the index bijection everything else relies on.
//! - `incentives`: pluggable state -> per-type reproductive weight models.
//! - `processes`:  Moran-type (birth-death) and Wright-Fisher-type (multinomial
//!                 resampling, log-space) transition generation.
//! - `stationary`: sparse power iteration to a flagged approximate fixed point.
//! - `divergence`: q-divergence of expected motion vs. staying put; entropy rate.
//! - `bridge`:     file-based hand-off of the heavy fixed-point step to an
//!                 external high-performance solver, with checksummed re-import.
//! - `simulation`: Monte Carlo trajectory sampling for empirical cross-checks.
//!
//! =============================================================================================

pub mod bridge;
pub mod divergence;
pub mod error;
pub mod graph;
pub mod incentives;
pub mod math;
pub mod processes;
pub mod simplex;
pub mod simulation;
pub mod state;
pub mod stationary;
pub mod tasks;

pub use error::{Result, StationaryError};
pub use graph::TransitionGraph;
pub use incentives::{FermiIncentive, Incentive, LinearLandscape, ReplicatorIncentive};
pub use processes::{Edge, TransitionKernel, UpdateRule};
pub use simplex::Simplex;
pub use state::{PopulationState, StateSpace};
pub use stationary::{
    approximate_stationary, approximate_stationary_kernel, DistributionTable, IterationConfig,
    PowerIteration, StationaryResult,
};
