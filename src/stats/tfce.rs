//! Threshold-free cluster enhancement
//!
//! For each threshold `h = start + i * step` below the largest excursion, the
//! points exceeding `h` are grouped into clusters by adjacency, and every
//! point of a cluster gains `step * h^H * extent^E`. Positive and negative
//! excursions are clustered separately, so a two-sided score never merges a
//! positive run with an adjacent negative one.

use crate::error::{Result, TfceError};
use crate::structs::{Adjacency, Tail, TfceThreshold};
use ndarray::{Array1, ArrayView1};

/// Most thresholds one direction of the sweep may visit
///
/// At the default step of 0.005 this admits |t| up to 5000. Larger values come
/// from near-constant columns and would stall every permutation.
pub const MAX_THRESHOLDS: f64 = 1_000_000.0;

/// TFCE score of every point of `stat`
///
/// Scores are non-negative magnitudes; the sign of the excursion that
/// produced them is the sign of `stat`.
///
/// # Errors
/// Returns error if `stat` contains a non-finite value, `adjacency` does
/// not cover exactly `stat.len()` positions, or the largest excursion needs
/// more than [`MAX_THRESHOLDS`] thresholds
#[allow(clippy::cast_precision_loss)]
pub fn tfce_scores(
    stat: ArrayView1<'_, f64>,
    threshold: &TfceThreshold,
    tail: Tail,
    adjacency: Option<&Adjacency>,
) -> Result<Array1<f64>> {
    if let Some((j, v)) = stat.iter().enumerate().find(|(_, v)| !v.is_finite()) {
        return Err(TfceError::Computation(format!(
            "statistic at sample {j} is not finite ({v})"
        )));
    }
    if let Some(adj) = adjacency {
        if adj.len() != stat.len() {
            return Err(TfceError::Config(format!(
                "adjacency covers {} positions but the statistic has {}",
                adj.len(),
                stat.len()
            )));
        }
    }

    let directions: &[f64] = match tail {
        Tail::Both => &[1.0, -1.0],
        Tail::Upper => &[1.0],
        Tail::Lower => &[-1.0],
    };

    let mut scores = vec![0.0; stat.len()];
    let mut scratch = Scratch::new(stat.len());
    for &direction in directions {
        let values: Vec<f64> = stat.iter().map(|v| v * direction).collect();
        let Some((peak, &top)) = values.iter().enumerate().max_by(|a, b| a.1.total_cmp(b.1))
        else {
            continue;
        };

        let sweep_len = ((top - threshold.start) / threshold.step).ceil();
        if sweep_len > MAX_THRESHOLDS {
            return Err(TfceError::Computation(format!(
                "statistic {} at sample {peak} needs {sweep_len:.0} TFCE thresholds \
                 (limit {MAX_THRESHOLDS:.0}); the sample is nearly constant across cases",
                stat[peak]
            )));
        }

        let mut i = 0usize;
        loop {
            let h = (i as f64).mul_add(threshold.step, threshold.start);
            if h >= top {
                break;
            }
            let weight = threshold.step * h.powf(threshold.h_power);
            if weight > 0.0 {
                for_each_cluster(&values, h, adjacency, &mut scratch, |members| {
                    let gain = weight * (members.len() as f64).powf(threshold.e_power);
                    for &p in members {
                        scores[p] += gain;
                    }
                });
            }
            i += 1;
        }
    }

    Ok(Array1::from(scores))
}

/// Reusable buffers for cluster search
struct Scratch {
    members: Vec<usize>,
    visited: Vec<bool>,
}

impl Scratch {
    fn new(n: usize) -> Self {
        Self {
            members: Vec::with_capacity(n),
            visited: vec![false; n],
        }
    }
}

/// Call `f` with the members of each cluster of points above `h`
fn for_each_cluster(
    values: &[f64],
    h: f64,
    adjacency: Option<&Adjacency>,
    scratch: &mut Scratch,
    mut f: impl FnMut(&[usize]),
) {
    match adjacency {
        None => {
            scratch.members.clear();
            for (j, &v) in values.iter().enumerate() {
                if v > h {
                    scratch.members.push(j);
                } else if !scratch.members.is_empty() {
                    f(&scratch.members);
                    scratch.members.clear();
                }
            }
            if !scratch.members.is_empty() {
                f(&scratch.members);
            }
        }
        Some(adj) => {
            scratch.visited.fill(false);
            for seed in 0..values.len() {
                if scratch.visited[seed] || values[seed] <= h {
                    continue;
                }
                // Breadth-first over supra-threshold neighbours; members doubles as the queue
                scratch.members.clear();
                scratch.members.push(seed);
                scratch.visited[seed] = true;
                let mut head = 0;
                while head < scratch.members.len() {
                    let p = scratch.members[head];
                    head += 1;
                    for &q in adj.neighbors(p) {
                        if !scratch.visited[q] && values[q] > h {
                            scratch.visited[q] = true;
                            scratch.members.push(q);
                        }
                    }
                }
                f(&scratch.members);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn coarse() -> TfceThreshold {
        TfceThreshold::new(0.0, 0.5)
    }

    #[test]
    fn test_contiguous_cluster() {
        // Only h = 0.5 contributes: 0.5 * 0.5^2 * sqrt(2)
        let scores = tfce_scores(array![1.0, 1.0, 0.0].view(), &coarse(), Tail::Upper, None)
            .expect("tfce");
        let expected = 0.125 * 2.0_f64.sqrt();
        assert!((scores[0] - expected).abs() < 1e-12);
        assert!((scores[1] - expected).abs() < 1e-12);
        assert_eq!(scores[2], 0.0);
    }

    #[test]
    fn test_signs_cluster_separately() {
        let stat = array![1.0, -1.0];
        let both = tfce_scores(stat.view(), &coarse(), Tail::Both, None).expect("tfce");
        assert!((both[0] - 0.125).abs() < 1e-12);
        assert!((both[1] - 0.125).abs() < 1e-12);

        let upper = tfce_scores(stat.view(), &coarse(), Tail::Upper, None).expect("tfce");
        assert!((upper[0] - 0.125).abs() < 1e-12);
        assert_eq!(upper[1], 0.0);

        let lower = tfce_scores(stat.view(), &coarse(), Tail::Lower, None).expect("tfce");
        assert_eq!(lower[0], 0.0);
        assert!((lower[1] - 0.125).abs() < 1e-12);
    }

    #[test]
    fn test_taller_peak_scores_higher() {
        let stat = array![0.2, 1.5, 3.0, 1.5, 0.2];
        let scores = tfce_scores(stat.view(), &TfceThreshold::new(0.0, 0.005), Tail::Both, None)
            .expect("tfce");
        assert!(scores[2] > scores[1]);
        assert!(scores[1] > scores[0]);
        assert!((scores[1] - scores[3]).abs() < 1e-9);
    }

    #[test]
    fn test_chain_adjacency_matches_linear() {
        let stat = array![0.4, 1.2, -0.8, -1.9, 0.0, 2.2, 2.1];
        let chain = Adjacency::from_edges(7, &[(0, 1), (1, 2), (2, 3), (3, 4), (4, 5), (5, 6)])
            .expect("chain");
        let threshold = TfceThreshold::new(0.0, 0.01);

        let linear = tfce_scores(stat.view(), &threshold, Tail::Both, None).expect("linear");
        let graph = tfce_scores(stat.view(), &threshold, Tail::Both, Some(&chain)).expect("graph");
        for (a, b) in linear.iter().zip(&graph) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_graph_joins_distant_positions() {
        let stat = array![1.0, 0.0, 1.0];
        let linear = tfce_scores(stat.view(), &coarse(), Tail::Upper, None).expect("linear");
        assert!((linear[0] - 0.125).abs() < 1e-12);

        let adj = Adjacency::from_edges(3, &[(0, 2)]).expect("adj");
        let graph = tfce_scores(stat.view(), &coarse(), Tail::Upper, Some(&adj)).expect("graph");
        let expected = 0.125 * 2.0_f64.sqrt();
        assert!((graph[0] - expected).abs() < 1e-12);
        assert!((graph[2] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_start_above_peak_gives_zero() {
        let scores = tfce_scores(
            array![0.5, 0.7].view(),
            &TfceThreshold::new(1.0, 0.1),
            Tail::Both,
            None,
        )
        .expect("tfce");
        assert!(scores.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_rejects_non_finite() {
        let err = tfce_scores(array![1.0, f64::INFINITY].view(), &coarse(), Tail::Both, None);
        assert!(matches!(err, Err(TfceError::Computation(_))));
    }

    #[test]
    fn test_rejects_oversized_sweep() {
        let threshold = TfceThreshold::new(0.0, 0.005);
        assert!(tfce_scores(array![4000.0].view(), &threshold, Tail::Both, None).is_ok());

        let err = tfce_scores(array![0.5, -3.5e9].view(), &threshold, Tail::Both, None);
        match err {
            Err(TfceError::Computation(msg)) => assert!(msg.contains("sample 1")),
            other => panic!("expected computation error, got {other:?}"),
        }
    }

    #[test]
    fn test_rejects_adjacency_size_mismatch() {
        let adj = Adjacency::from_edges(2, &[(0, 1)]).expect("adj");
        let err = tfce_scores(array![1.0, 1.0, 1.0].view(), &coarse(), Tail::Both, Some(&adj));
        assert!(matches!(err, Err(TfceError::Config(_))));
    }
}
