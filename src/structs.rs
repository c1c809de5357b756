//! Consolidated public types for the tfce-perm crate
//!
//! This module contains the configuration, result and trait types shared by the
//! converter, the MAT-file codec and the permutation test.

use crate::error::{Result, TfceError};
use ndarray::{Array1, ArrayView2};
use serde::Serialize;

// ============================================================================
// Test Configuration
// ============================================================================

/// Threshold sweep for threshold-free cluster enhancement
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TfceThreshold {
    /// First threshold of the sweep
    pub start: f64,
    /// Increment between thresholds
    pub step: f64,
    /// Exponent applied to the threshold height (H)
    pub h_power: f64,
    /// Exponent applied to the cluster extent (E)
    pub e_power: f64,
}

impl TfceThreshold {
    /// Sweep starting at `start` in increments of `step`, with the usual
    /// H = 2, E = 0.5 exponents
    #[must_use]
    pub const fn new(start: f64, step: f64) -> Self {
        Self {
            start,
            step,
            h_power: 2.0,
            e_power: 0.5,
        }
    }

    /// Reject sweeps that would never terminate or start below zero
    ///
    /// # Errors
    /// Returns error if step is not strictly positive or start is negative
    pub fn validate(&self) -> Result<()> {
        if !(self.step.is_finite() && self.step > 0.0) {
            return Err(TfceError::Computation(format!(
                "TFCE step must be positive, got {}",
                self.step
            )));
        }
        if !(self.start.is_finite() && self.start >= 0.0) {
            return Err(TfceError::Computation(format!(
                "TFCE start must be non-negative, got {}",
                self.start
            )));
        }
        Ok(())
    }
}

/// Which excursions of the statistic count as evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Tail {
    /// Two-sided: positive and negative excursions
    #[default]
    Both,
    /// Positive excursions only
    Upper,
    /// Negative excursions only
    Lower,
}

/// Neighbour graph over sample positions
///
/// When no adjacency is supplied the test uses linear adjacency: position `j`
/// neighbours `j - 1` and `j + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjacency {
    neighbors: Vec<Vec<usize>>,
}

impl Adjacency {
    /// Build an undirected graph on `n` positions from an edge list
    ///
    /// The command line always uses linear adjacency, so only tests build a
    /// graph today.
    ///
    /// # Errors
    /// Returns error if an edge references a position outside `0..n`
    #[allow(dead_code)]
    pub fn from_edges(n: usize, edges: &[(usize, usize)]) -> Result<Self> {
        let mut neighbors = vec![Vec::new(); n];
        for &(a, b) in edges {
            if a >= n || b >= n {
                return Err(TfceError::Config(format!(
                    "adjacency edge ({a}, {b}) out of range for {n} positions"
                )));
            }
            if a == b {
                continue;
            }
            neighbors[a].push(b);
            neighbors[b].push(a);
        }
        for list in &mut neighbors {
            list.sort_unstable();
            list.dedup();
        }
        Ok(Self { neighbors })
    }

    /// Number of positions in the graph
    #[must_use]
    pub fn len(&self) -> usize {
        self.neighbors.len()
    }

    /// Only exercised by tests, like [`Adjacency::from_edges`]
    #[allow(dead_code)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Neighbours of position `i`
    #[must_use]
    pub fn neighbors(&self, i: usize) -> &[usize] {
        &self.neighbors[i]
    }
}

/// Configuration of the one-sample permutation test
#[derive(Debug, Clone)]
pub struct PermutationConfig {
    pub threshold: TfceThreshold,
    pub tail: Tail,
    /// Total size of the null distribution, observed data included
    pub n_permutations: usize,
    /// RNG seed; `None` seeds from OS entropy
    pub seed: Option<u64>,
    /// Worker threads; `None` uses the global rayon pool
    pub n_jobs: Option<usize>,
    /// `None` means linear adjacency along the sample axis
    pub adjacency: Option<Adjacency>,
}

impl Default for PermutationConfig {
    fn default() -> Self {
        Self {
            threshold: TfceThreshold::new(0.0, 0.005),
            tail: Tail::Both,
            n_permutations: 1024,
            seed: None,
            n_jobs: None,
            adjacency: None,
        }
    }
}

// ============================================================================
// Test Results
// ============================================================================

/// The four outputs of a cluster permutation test
#[derive(Debug, Clone)]
pub struct TestOutcome {
    /// Signed TFCE-enhanced statistic per sample position
    pub t_obs: Array1<f64>,
    /// Member positions of each cluster; in TFCE mode every position is its
    /// own cluster. Nothing outside the tests reads it yet.
    #[allow(dead_code)]
    pub clusters: Vec<Vec<usize>>,
    /// One p-value per cluster
    pub cluster_pv: Array1<f64>,
    /// Maximum score under each permutation, observed data first
    pub h0: Array1<f64>,
    /// Whether every sign-flip pattern was enumerated
    pub exact: bool,
}

impl TestOutcome {
    /// Number of permutations the null distribution was built from
    #[must_use]
    pub fn n_permutations(&self) -> usize {
        self.h0.len()
    }

    /// Smallest cluster p-value, `None` when there are no clusters
    #[must_use]
    pub fn min_pvalue(&self) -> Option<f64> {
        self.cluster_pv.iter().copied().reduce(f64::min)
    }

    /// Count clusters with p below `alpha`
    #[must_use]
    pub fn significant_count(&self, alpha: f64) -> usize {
        self.cluster_pv.iter().filter(|&&p| p < alpha).count()
    }
}

// ============================================================================
// Test Trait
// ============================================================================

/// One-sample cluster test over a (cases x samples) matrix
///
/// The converter only depends on this trait, so the statistic, threshold
/// policy and inference scheme can change without touching it.
pub trait ClusterTest: Send + Sync {
    /// Run the test on `data`, rows are cases and columns are samples
    ///
    /// # Errors
    /// Returns error if the data is degenerate or the test cannot be computed
    fn run(&self, data: ArrayView2<'_, f64>) -> Result<TestOutcome>;

    /// Configuration in effect, for reporting
    fn config(&self) -> &PermutationConfig;
}
