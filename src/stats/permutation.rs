//! One-sample sign-flip permutation test with TFCE
//!
//! Under the null hypothesis each case is symmetric around zero, so flipping
//! the sign of whole cases leaves the distribution unchanged. The null
//! distribution of the maximum TFCE score is built from sign-flipped copies of
//! the data, and each sample's p-value is the fraction of that distribution
//! at or above its observed score.

use crate::error::{Result, TfceError};
use crate::stats::tfce::tfce_scores;
use crate::stats::ttest::t_statistic;
use crate::structs::{ClusterTest, PermutationConfig, Tail, TestOutcome};
use ndarray::{Array1, ArrayView2, Zip};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// Largest case count for which distinct sign patterns are sampled without
/// replacement; above it patterns are drawn independently
const MAX_CASES_FOR_DISTINCT_SAMPLING: usize = 20;

/// Threshold-free cluster enhancement permutation test over the sample axis
#[derive(Debug, Clone)]
pub struct TfcePermutationTest {
    config: PermutationConfig,
}

impl TfcePermutationTest {
    /// # Errors
    /// Returns error if the threshold sweep is invalid, fewer than one
    /// permutation is requested, or zero worker threads are requested
    pub fn new(config: PermutationConfig) -> Result<Self> {
        config.threshold.validate()?;
        if config.n_permutations == 0 {
            return Err(TfceError::Config(
                "n_permutations must be at least 1".into(),
            ));
        }
        if config.n_jobs == Some(0) {
            return Err(TfceError::Config("jobs must be at least 1".into()));
        }
        Ok(Self { config })
    }

    /// Maximum TFCE score of the data with rows multiplied by `signs`
    fn max_score(&self, data: ArrayView2<'_, f64>, signs: &Array1<f64>) -> Result<f64> {
        let t = t_statistic(data, signs.view());
        let scores = tfce_scores(
            t.view(),
            &self.config.threshold,
            self.config.tail,
            self.config.adjacency.as_ref(),
        )?;
        Ok(scores.iter().copied().fold(0.0, f64::max))
    }

    /// Evaluate every order, on a dedicated pool when a job count is set
    fn null_distribution(&self, data: ArrayView2<'_, f64>, orders: &[SignOrder]) -> Result<Vec<f64>> {
        let n_cases = data.nrows();
        let work = || {
            orders
                .par_iter()
                .map(|order| self.max_score(data, &order.signs(n_cases)))
                .collect::<Result<Vec<f64>>>()
        };

        match self.config.n_jobs {
            Some(n) => rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()?
                .install(work),
            None => work(),
        }
    }
}

impl ClusterTest for TfcePermutationTest {
    fn run(&self, data: ArrayView2<'_, f64>) -> Result<TestOutcome> {
        validate_data(data)?;
        let (n_cases, n_samples) = data.dim();

        let t_obs = t_statistic(data, Array1::<f64>::ones(n_cases).view());
        let scores = tfce_scores(
            t_obs.view(),
            &self.config.threshold,
            self.config.tail,
            self.config.adjacency.as_ref(),
        )?;
        let observed_max = scores.iter().copied().fold(0.0, f64::max);

        let mut rng = match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let (orders, exact) = draw_orders(
            n_cases,
            self.config.n_permutations,
            self.config.tail,
            &mut rng,
        );
        tracing::info!(
            "running {} permutations{} over {} cases x {} samples",
            orders.len() + 1,
            if exact { " (exact test)" } else { "" },
            n_cases,
            n_samples
        );

        let mut h0 = Vec::with_capacity(orders.len() + 1);
        h0.push(observed_max);
        h0.extend(self.null_distribution(data, &orders)?);

        let cluster_pv = pvalues(&scores, &h0);
        let signed = Zip::from(&scores)
            .and(&t_obs)
            .map_collect(|&s, &t| s * t.signum());

        Ok(TestOutcome {
            t_obs: signed,
            clusters: (0..n_samples).map(|j| vec![j]).collect(),
            cluster_pv,
            h0: Array1::from(h0),
            exact,
        })
    }

    fn config(&self) -> &PermutationConfig {
        &self.config
    }
}

/// Reject inputs the one-sample t statistic is undefined for
fn validate_data(data: ArrayView2<'_, f64>) -> Result<()> {
    let (n_cases, n_samples) = data.dim();
    if n_cases < 2 {
        return Err(TfceError::Computation(format!(
            "a one-sample test needs at least 2 cases, got {n_cases}"
        )));
    }
    if n_samples == 0 {
        return Err(TfceError::Computation("input has no samples".into()));
    }
    if let Some(((r, c), v)) = data.indexed_iter().find(|(_, v)| !v.is_finite()) {
        return Err(TfceError::Computation(format!(
            "non-finite value {v} at case {r}, sample {c}"
        )));
    }
    for (j, column) in data.columns().into_iter().enumerate() {
        let first = column[0];
        if column.iter().all(|&v| v == first) {
            return Err(TfceError::Computation(format!(
                "sample {j} has zero variance across cases"
            )));
        }
    }
    Ok(())
}

/// `p[j] = #{k : h0[k] >= score[j]} / len(h0)`
#[allow(clippy::cast_precision_loss)]
fn pvalues(scores: &Array1<f64>, h0: &[f64]) -> Array1<f64> {
    let mut sorted = h0.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len() as f64;
    scores.mapv(|s| {
        let below = sorted.partition_point(|&m| m < s);
        (sorted.len() - below) as f64 / n
    })
}

/// A sign-flip pattern: an enumerated code, or a seed for drawing signs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SignOrder {
    /// Bit `n - 1 - i` set flips case `i`
    Code(u64),
    Seed(u64),
}

impl SignOrder {
    fn signs(self, n_cases: usize) -> Array1<f64> {
        match self {
            Self::Code(code) => (0..n_cases)
                .map(|i| {
                    if (code >> (n_cases - 1 - i)) & 1 == 1 {
                        -1.0
                    } else {
                        1.0
                    }
                })
                .collect(),
            Self::Seed(seed) => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                (0..n_cases)
                    .map(|_| if rng.gen_bool(0.5) { -1.0 } else { 1.0 })
                    .collect()
            }
        }
    }
}

/// Choose the non-identity sign patterns to evaluate
///
/// Flipping every case only negates the statistic, which the two-sided test
/// cannot tell apart, so with `Tail::Both` the first case is never flipped and
/// the pattern space halves. Returns the orders and whether they are exhaustive.
fn draw_orders(
    n_cases: usize,
    n_permutations: usize,
    tail: Tail,
    rng: &mut ChaCha8Rng,
) -> (Vec<SignOrder>, bool) {
    let free_bits = if tail == Tail::Both {
        n_cases - 1
    } else {
        n_cases
    };
    let max_perms: u64 = if free_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << free_bits) - 1
    };
    let wanted = (n_permutations - 1) as u64;

    if wanted >= max_perms {
        return ((1..=max_perms).map(SignOrder::Code).collect(), true);
    }

    let orders = if n_cases <= MAX_CASES_FOR_DISTINCT_SAMPLING {
        // max_perms < 2^20 here, and wanted < max_perms
        #[allow(clippy::cast_possible_truncation)]
        let sampled = rand::seq::index::sample(rng, max_perms as usize, wanted as usize);
        sampled
            .into_iter()
            .map(|i| SignOrder::Code(i as u64 + 1))
            .collect()
    } else {
        // Drawn independently: patterns may repeat or reproduce the identity
        (0..wanted).map(|_| SignOrder::Seed(rng.gen())).collect()
    };
    (orders, false)
}
