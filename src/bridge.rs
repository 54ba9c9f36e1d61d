//! =============================================================================================
//! ExternalSolverBridge: exchange-file export, subprocess invocation, result import
//! =============================================================================================
//!
//! For state spaces whose dense transition matrix no longer fits in memory, the
//! heavy fixed-point iteration is offloaded to an external high-performance solver.
//! The hand-off is file-based and batch:
//!
//!     edges file:    line 1 = total enumerated state count
//!                    line 2 = number of types n
//!                    then   `source_index,target_index,weight` rows, weight printed
//!                           to 50 decimal places so no precision is lost across the
//!                           process boundary
//!     invocation:    `solver <edges_path> <iterations>` (blocking, single-shot)
//!     results file:  `enumerated_state_index,probability` rows
//!
//! The solver knows nothing about compositions, only indices. The manifest written
//! next to the edges file carries the inverse enumeration needed to re-attach the
//! result to states, plus a format version and a blake3 digest of the enumeration
//! ordering: an export/import ordering mismatch would otherwise corrupt results
//! silently, so import recomputes the digest from the live state space and refuses
//! to proceed on disagreement.
//!
//! =============================================================================================

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, StationaryError};
use crate::math;
use crate::processes::{Edge, TransitionKernel};
use crate::state::{PopulationState, StateSpace};
use crate::stationary::DistributionTable;

/// Bumped whenever the exchange layout changes incompatibly.
pub const EXCHANGE_FORMAT_VERSION: u32 = 1;

/// File the external solver writes its result to, inside its working directory.
pub const RESULTS_FILENAME: &str = "enumerated_stationary.txt";

/// Default names for the exported pair of files.
pub const EDGES_FILENAME: &str = "enumerated_edges.csv";
pub const MANIFEST_FILENAME: &str = "inverse_enumeration.json";

/// ==============================================================================================
/// ======================================== Manifest ============================================
/// ==============================================================================================

/// Sidecar metadata persisted next to the edges file. The exchange file itself keeps
/// the bare two-line header the external solver expects; everything needed to
/// validate and reverse the enumeration lives here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExportManifest {
    pub format_version: u32,
    pub population: usize,
    pub num_types: usize,
    pub num_states: usize,
    pub enumeration_checksum: String,
    /// index -> state, in enumeration order.
    pub inverse_enumeration: Vec<PopulationState>,
}

impl ExportManifest {
    pub fn for_space(space: &StateSpace) -> Self {
        Self {
            format_version: EXCHANGE_FORMAT_VERSION,
            population: space.population(),
            num_types: space.num_types(),
            num_states: space.len(),
            enumeration_checksum: space.ordering_digest(),
            inverse_enumeration: space.states().to_vec(),
        }
    }

    pub fn save_to_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string(self)
            .map_err(|e| StationaryError::Serde(format!("ExportManifest: {e}")))?;
        let mut file = File::create(path).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("ExportManifest::save_to_json: create {}: {e}", path.display()),
            )
        })?;
        file.write_all(json.as_bytes()).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("ExportManifest::save_to_json: write {}: {e}", path.display()),
            )
        })?;
        Ok(())
    }

    pub fn read_from_json(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!("ExportManifest::read_from_json: open {}: {e}", path.display()),
            )
        })?;
        serde_json::from_reader::<_, Self>(file)
            .map_err(|e| StationaryError::Serde(format!("ExportManifest: parse {e}")))
    }
}

/// ==============================================================================================
/// ========================================= Export =============================================
/// ==============================================================================================

/// Write a materialized edge list in the exchange format.
///     Errors:
///         - `InvalidParameter` if an edge endpoint does not belong to `space`
pub fn write_enumerated_edges(
    space: &StateSpace,
    edges: &[Edge],
    path: &Path,
) -> Result<()> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);

    writeln!(out, "{}", space.len())?;
    writeln!(out, "{}", space.num_types())?;

    for (source, target, weight) in edges {
        let s = space.index(source).ok_or_else(|| {
            StationaryError::InvalidParameter(format!(
                "write_enumerated_edges: source state {source:?} outside the state space"
            ))
        })?;
        let t = space.index(target).ok_or_else(|| {
            StationaryError::InvalidParameter(format!(
                "write_enumerated_edges: target state {target:?} outside the state space"
            ))
        })?;
        writeln!(out, "{s},{t},{weight:.50}")?;
    }

    out.flush()?;
    debug!(edges = edges.len(), path = %path.display(), "enumerated edges written");
    Ok(())
}

/// Stream every positive transition of a kernel in the exchange format, without
/// materializing the edge list (the kernel's matrix may be dense and large).
pub fn write_enumerated_kernel<K>(space: &StateSpace, kernel: &K, path: &Path) -> Result<()>
where
    K: TransitionKernel,
{
    let num = space.len();
    assert_eq!(
        num,
        kernel.num_states(),
        "write_enumerated_kernel: state/kernel size mismatch"
    );

    let file = File::create(path)?;
    let mut out = BufWriter::new(file);

    writeln!(out, "{num}")?;
    writeln!(out, "{}", space.num_types())?;

    let mut written = 0usize;
    for s in 0..num {
        for t in 0..num {
            let w = kernel.probability(s, t);
            if w > 0.0 {
                writeln!(out, "{s},{t},{w:.50}")?;
                written += 1;
            }
        }
    }

    out.flush()?;
    debug!(edges = written, path = %path.display(), "enumerated kernel written");
    Ok(())
}

/// ==============================================================================================
/// ========================================= Import =============================================
/// ==============================================================================================

/// Parse the external solver's results file into (index, mass) pairs.
pub fn read_enumerated_stationary(path: &Path) -> Result<Vec<(usize, f64)>> {
    let file = File::open(path).map_err(|e| {
        StationaryError::ExternalSolverFailure(format!(
            "results file {} unreadable: {e}",
            path.display()
        ))
    })?;

    let mut entries = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (index, value) = line.split_once(',').ok_or_else(|| {
            StationaryError::ExternalSolverFailure(format!(
                "results line {} is not `index,probability`: {line:?}",
                lineno + 1
            ))
        })?;
        let index: usize = index.trim().parse().map_err(|e| {
            StationaryError::ExternalSolverFailure(format!(
                "results line {}: bad index: {e}",
                lineno + 1
            ))
        })?;
        let value: f64 = value.trim().parse().map_err(|e| {
            StationaryError::ExternalSolverFailure(format!(
                "results line {}: bad probability: {e}",
                lineno + 1
            ))
        })?;
        entries.push((index, value));
    }
    Ok(entries)
}

/// Re-attach an externally computed distribution to states.
///     Checks, in order:
///         1) manifest format version is supported
///         2) the manifest checksum matches the live state space (`EnumerationMismatch`)
///         3) every result index is in range
///         4) the masses sum to 1 within tolerance
pub fn import_stationary(
    space: &StateSpace,
    manifest: &ExportManifest,
    results_path: &Path,
) -> Result<DistributionTable> {
    if manifest.format_version != EXCHANGE_FORMAT_VERSION {
        return Err(StationaryError::ExternalSolverFailure(format!(
            "unsupported manifest format version {} (expected {EXCHANGE_FORMAT_VERSION})",
            manifest.format_version
        )));
    }

    let live = space.ordering_digest();
    if manifest.enumeration_checksum != live {
        return Err(StationaryError::EnumerationMismatch {
            expected: manifest.enumeration_checksum.clone(),
            actual: live,
        });
    }

    let raw = read_enumerated_stationary(results_path)?;

    let mut entries = Vec::with_capacity(raw.len());
    let mut total = 0.0;
    for (index, mass) in raw {
        let state = manifest.inverse_enumeration.get(index).ok_or_else(|| {
            StationaryError::ExternalSolverFailure(format!(
                "result index {index} out of range (num_states = {})",
                manifest.num_states
            ))
        })?;
        total += mass;
        entries.push((state.clone(), mass));
    }

    if (total - 1.0).abs() > math::MASS_TOLERANCE {
        return Err(StationaryError::ExternalSolverFailure(format!(
            "imported masses sum to {total}, not a probability distribution"
        )));
    }

    Ok(DistributionTable::from_entries(entries))
}

/// ==============================================================================================
/// ====================================== Invocation ============================================
/// ==============================================================================================

/// Handle on the external high-power solver executable.
pub struct ExternalSolverBridge {
    executable: PathBuf,
    timeout: Duration,
}

impl ExternalSolverBridge {
    /// Default wall-clock budget for one solver run.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(6 * 3600);

    /// Poll cadence while waiting on the subprocess.
    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Iteration-count heuristic used when no explicit count is supplied.
    #[inline]
    pub fn default_iterations(population: usize) -> usize {
        200 * population
    }

    /// Run the solver on an exported edges file. Blocks until the subprocess
    /// exits, fails hard on nonzero exit, and kills the subprocess when the
    /// timeout elapses.
    pub fn invoke(&self, edges_path: &Path, iterations: usize, workdir: &Path) -> Result<()> {
        info!(
            executable = %self.executable.display(),
            edges = %edges_path.display(),
            iterations,
            "invoking external solver"
        );

        let started = Instant::now();
        let mut child = Command::new(&self.executable)
            .arg(edges_path)
            .arg(iterations.to_string())
            .current_dir(workdir)
            .spawn()
            .map_err(|e| {
                StationaryError::ExternalSolverFailure(format!(
                    "spawn {}: {e}",
                    self.executable.display()
                ))
            })?;

        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    if status.success() {
                        info!(elapsed = ?started.elapsed(), "external solver finished");
                        return Ok(());
                    }
                    return Err(StationaryError::ExternalSolverFailure(format!(
                        "solver exited with {status}"
                    )));
                }
                Ok(None) => {
                    if started.elapsed() > self.timeout {
                        child.kill().ok();
                        child.wait().ok();
                        return Err(StationaryError::ExternalSolverFailure(format!(
                            "solver timed out after {:?}",
                            self.timeout
                        )));
                    }
                    std::thread::sleep(Self::POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(StationaryError::ExternalSolverFailure(format!(
                        "wait on solver: {e}"
                    )));
                }
            }
        }
    }

    /// Full export -> invoke -> import round trip against a kernel, using the
    /// conventional file names inside `workdir`.
    pub fn run_kernel<K>(
        &self,
        space: &StateSpace,
        kernel: &K,
        workdir: &Path,
        iterations: usize,
    ) -> Result<DistributionTable>
    where
        K: TransitionKernel,
    {
        std::fs::create_dir_all(workdir)?;

        let edges_path = workdir.join(EDGES_FILENAME);
        let manifest_path = workdir.join(MANIFEST_FILENAME);

        write_enumerated_kernel(space, kernel, &edges_path)?;
        let manifest = ExportManifest::for_space(space);
        manifest.save_to_json(&manifest_path)?;

        self.invoke(&edges_path, iterations, workdir)?;

        import_stationary(space, &manifest, &workdir.join(RESULTS_FILENAME))
    }
}
