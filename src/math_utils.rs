//! Numerical constants and small statistics helpers shared by the HMM and LQR engines.

use nalgebra::{DMatrix, DVector};

/// Numerical safety constants.
pub mod constants {
    /// Smallest positive normal double. Added wherever a division could hit exact zero.
    pub const REALMIN: f64 = f64::MIN_POSITIVE;

    /// Largest finite double. Upper clip for the rescaled backward messages.
    pub const REALMAX: f64 = f64::MAX;

    /// ln(2π) - logarithm of 2π for likelihood calculations
    pub const LN_TWO_PI: f64 = 1.8378770664093454835606594728112; // ln(2π)

    /// Regularization parameter for ill-conditioned matrices
    pub const MATRIX_REGULARIZATION: f64 = 1e-8;

    /// Tolerance used when checking that probabilities sum to one
    pub const PROBABILITY_TOLERANCE: f64 = 1e-8;
}

/// Column-wise mean of a `[n_samples, dim]` data matrix.
pub fn column_mean(data: &DMatrix<f64>) -> DVector<f64> {
    let n = data.nrows().max(1) as f64;
    DVector::from_iterator(data.ncols(), data.column_iter().map(|c| c.sum() / n))
}

/// Unbiased sample covariance of a `[n_samples, dim]` data matrix.
///
/// Returns `None` when fewer than two samples are available; callers fall back to the
/// regularization term alone in that case.
pub fn sample_covariance(data: &DMatrix<f64>, mean: &DVector<f64>) -> Option<DMatrix<f64>> {
    let n = data.nrows();
    if n < 2 {
        return None;
    }
    let centered = centered_rows(data, mean);
    Some(centered.transpose() * &centered / (n as f64 - 1.0))
}

/// Responsibility-weighted scatter `Σ_t w_t (x_t - μ)(x_t - μ)ᵀ` over the rows of `data`.
///
/// The weights are expected to be normalized already.
pub fn weighted_scatter(data: &DMatrix<f64>, weights: &[f64], mean: &DVector<f64>) -> DMatrix<f64> {
    let mut centered = centered_rows(data, mean);
    for (mut row, &w) in centered.row_iter_mut().zip(weights) {
        row *= w.sqrt();
    }
    centered.transpose() * &centered
}

/// Responsibility-weighted mean of the rows of `data`.
pub fn weighted_mean(data: &DMatrix<f64>, weights: &[f64]) -> DVector<f64> {
    let mut mean = DVector::zeros(data.ncols());
    for (row, &w) in data.row_iter().zip(weights) {
        mean += row.transpose() * w;
    }
    mean
}

fn centered_rows(data: &DMatrix<f64>, mean: &DVector<f64>) -> DMatrix<f64> {
    let mut centered = data.clone();
    for mut row in centered.row_iter_mut() {
        row -= mean.transpose();
    }
    centered
}

/// Divides every row of a non-negative matrix by its sum (plus `REALMIN`).
pub fn normalize_rows(m: &mut DMatrix<f64>) {
    for mut row in m.row_iter_mut() {
        let total = row.sum() + constants::REALMIN;
        row /= total;
    }
}

/// Index of the maximum entry, first occurrence on ties. The first NaN, if any, is returned
/// instead, so that it propagates like `max` over a NumPy array.
pub fn argmax(values: impl IntoIterator<Item = f64>) -> (usize, f64) {
    let mut best = (0, f64::NEG_INFINITY);
    for (i, v) in values.into_iter().enumerate() {
        if v.is_nan() {
            return (i, v);
        }
        if v > best.1 {
            best = (i, v);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_sample_covariance_matches_hand_computation() {
        let data = DMatrix::from_row_slice(3, 2, &[1.0, 2.0, 2.0, 4.0, 3.0, 6.0]);
        let mean = column_mean(&data);
        assert_approx_eq!(mean[0], 2.0);
        assert_approx_eq!(mean[1], 4.0);

        let cov = sample_covariance(&data, &mean).unwrap();
        assert_approx_eq!(cov[(0, 0)], 1.0);
        assert_approx_eq!(cov[(0, 1)], 2.0);
        assert_approx_eq!(cov[(1, 1)], 4.0);
    }

    #[test]
    fn test_sample_covariance_single_row() {
        let data = DMatrix::from_row_slice(1, 2, &[1.0, 2.0]);
        let mean = column_mean(&data);
        assert!(sample_covariance(&data, &mean).is_none());
    }

    #[test]
    fn test_weighted_statistics() {
        let data = DMatrix::from_row_slice(4, 1, &[0.0, 1.0, 10.0, 11.0]);
        let weights = [0.5, 0.5, 0.0, 0.0];
        let mean = weighted_mean(&data, &weights);
        assert_approx_eq!(mean[0], 0.5);

        let scatter = weighted_scatter(&data, &weights, &mean);
        assert_approx_eq!(scatter[(0, 0)], 0.25);
    }

    #[test]
    fn test_normalize_rows_and_argmax() {
        let mut m = DMatrix::from_row_slice(2, 2, &[1.0, 3.0, 0.0, 0.0]);
        normalize_rows(&mut m);
        assert_approx_eq!(m[(0, 1)], 0.75);
        assert_eq!(m[(1, 0)], 0.0);

        let (idx, val) = argmax(vec![0.1, 0.7, 0.3, 0.7]);
        assert_eq!(idx, 1);
        assert_approx_eq!(val, 0.7);

        let (idx, val) = argmax(vec![0.1, f64::NAN, 0.7]);
        assert_eq!(idx, 1);
        assert!(val.is_nan());
    }
}
