use ndarray::{Array1, ArrayView1, ArrayView2, Zip};

/// One-sample t statistic per column after multiplying each row by its sign
///
/// `mean / sqrt(var / n)` with the unbiased (n - 1) variance. Passing all-ones
/// signs gives the observed statistic through the same arithmetic as every
/// permutation, so the identity permutation reproduces it exactly. Columns
/// with zero variance yield a non-finite value.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn t_statistic(data: ArrayView2<'_, f64>, signs: ArrayView1<'_, f64>) -> Array1<f64> {
    let n = data.nrows() as f64;
    let mean = signs.dot(&data) / n;

    let mut sum_sq = Array1::<f64>::zeros(data.ncols());
    for (row, &s) in data.outer_iter().zip(signs) {
        Zip::from(&mut sum_sq)
            .and(&row)
            .and(&mean)
            .for_each(|acc, &x, &m| {
                let d = s * x - m;
                *acc += d * d;
            });
    }

    Zip::from(&mean)
        .and(&sum_sq)
        .map_collect(|&m, &ss| m / (ss / (n - 1.0) / n).sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_unflipped_statistic() {
        let data = array![[1.0, 2.0], [2.0, 4.0], [3.0, 6.0]];
        let t = t_statistic(data.view(), Array1::<f64>::ones(3).view());

        // mean 2, var 1 -> 2 / sqrt(1/3)
        let expected = 2.0 / (1.0_f64 / 3.0).sqrt();
        assert!((t[0] - expected).abs() < 1e-12);
        // scaling a column leaves t unchanged
        assert!((t[1] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_sign_flipped_statistic() {
        let data = array![[1.0], [2.0], [3.0]];
        let t = t_statistic(data.view(), array![-1.0, 1.0, 1.0].view());

        // values -1, 2, 3: mean 4/3, var 39/9
        let mean = 4.0 / 3.0;
        let var: f64 = 39.0 / 9.0;
        let expected = mean / (var / 3.0).sqrt();
        assert!((t[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_all_flipped_negates() {
        let data = array![[0.3, -1.2], [1.1, 0.4], [0.7, -0.9], [1.8, -0.1]];
        let up = t_statistic(data.view(), Array1::<f64>::ones(4).view());
        let down = t_statistic(data.view(), Array1::from_elem(4, -1.0).view());
        for (a, b) in up.iter().zip(&down) {
            assert!((a + b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_zero_variance_is_not_finite() {
        let data = array![[2.0, 1.0], [2.0, 3.0]];
        let t = t_statistic(data.view(), Array1::<f64>::ones(2).view());
        assert!(!t[0].is_finite());
        assert!(t[1].is_finite());
    }
}
