//! Linear algebra operations for Gaussian models and LQR solvers
//!
//! Thin wrappers over nalgebra factorizations that turn failures into [`ModelError`]s,
//! plus the block assembly routines used by the lifted formulation.

use crate::{
    errors::{validate_square, ModelError, ModelResult},
    math_utils::constants,
};
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};

/// Cholesky factorization with progressive diagonal jitter.
///
/// The plain matrix is tried first. If it is not numerically positive definite, increasing
/// multiples of the identity are added until the factorization succeeds.
pub fn cholesky_with_jitter(m: &DMatrix<f64>, operation: &str) -> ModelResult<Cholesky<f64, Dyn>> {
    validate_square(m, m.nrows(), operation)?;

    if let Some(chol) = try_factor(m.clone()) {
        return Ok(chol);
    }

    let n = m.nrows();
    let regularization_levels = [
        constants::MATRIX_REGULARIZATION,
        constants::MATRIX_REGULARIZATION * 10.0,
        constants::MATRIX_REGULARIZATION * 100.0,
        1e-6,
        1e-4,
    ];

    for &reg_level in &regularization_levels {
        let regularized = m + DMatrix::<f64>::identity(n, n) * reg_level;
        if let Some(chol) = try_factor(regularized) {
            log::debug!(
                "{}: Cholesky succeeded after adding {:.1e} to the diagonal",
                operation,
                reg_level
            );
            return Ok(chol);
        }
    }

    Err(ModelError::numerical(
        "Cannot compute Cholesky decomposition even with progressive regularization",
        operation,
    ))
}

/// Rejects factorizations with a zero or non-finite pivot.
fn try_factor(m: DMatrix<f64>) -> Option<Cholesky<f64, Dyn>> {
    let chol = Cholesky::new(m)?;
    let pivots_ok = chol
        .l_dirty()
        .diagonal()
        .iter()
        .all(|&d| d > 0.0 && d.is_finite());
    pivots_ok.then_some(chol)
}

/// Log-determinant of the factored matrix.
pub fn log_det(chol: &Cholesky<f64, Dyn>) -> f64 {
    2.0 * chol.l_dirty().diagonal().iter().map(|x| x.ln()).sum::<f64>()
}

/// Inverse of a symmetric positive-definite matrix.
pub fn spd_inverse(m: &DMatrix<f64>, operation: &str) -> ModelResult<DMatrix<f64>> {
    Ok(cholesky_with_jitter(m, operation)?.inverse())
}

/// Solves `m x = b` for a general square matrix via LU.
pub fn general_solve(m: &DMatrix<f64>, b: &DVector<f64>, operation: &str) -> ModelResult<DVector<f64>> {
    validate_square(m, m.nrows(), operation)?;
    m.clone()
        .lu()
        .solve(b)
        .ok_or_else(|| ModelError::numerical("Matrix is singular", operation))
}

/// Restores exact symmetry, `(m + mᵀ) / 2`.
pub fn symmetrize(m: &mut DMatrix<f64>) {
    let t = m.transpose();
    *m += t;
    *m *= 0.5;
}

/// Assembles a block-diagonal matrix from square or rectangular blocks.
pub fn block_diagonal(blocks: &[DMatrix<f64>]) -> DMatrix<f64> {
    let rows: usize = blocks.iter().map(|b| b.nrows()).sum();
    let cols: usize = blocks.iter().map(|b| b.ncols()).sum();
    let mut out = DMatrix::zeros(rows, cols);
    let (mut r, mut c) = (0, 0);
    for block in blocks {
        out.view_mut((r, c), (block.nrows(), block.ncols()))
            .copy_from(block);
        r += block.nrows();
        c += block.ncols();
    }
    out
}

/// Stacks vectors end to end.
pub fn concat_vectors(parts: &[DVector<f64>]) -> DVector<f64> {
    let len: usize = parts.iter().map(|p| p.len()).sum();
    let mut out = DVector::zeros(len);
    let mut offset = 0;
    for part in parts {
        out.rows_mut(offset, part.len()).copy_from(part);
        offset += part.len();
    }
    out
}

/// Splits a stacked vector into consecutive chunks of length `chunk`.
pub fn split_vector(v: &DVector<f64>, chunk: usize) -> Vec<DVector<f64>> {
    if chunk == 0 {
        return Vec::new();
    }
    (0..v.len() / chunk)
        .map(|i| v.rows(i * chunk, chunk).into_owned())
        .collect()
}

/// Selects the sub-matrix `m[idx, idx]`.
pub fn select_square(m: &DMatrix<f64>, idx: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(idx.len(), idx.len(), |i, j| m[(idx[i], idx[j])])
}

/// Selects the sub-matrix `m[rows, cols]`.
pub fn select(m: &DMatrix<f64>, rows: &[usize], cols: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(rows.len(), cols.len(), |i, j| m[(rows[i], cols[j])])
}

/// Selects the entries `v[idx]`.
pub fn select_vector(v: &DVector<f64>, idx: &[usize]) -> DVector<f64> {
    DVector::from_iterator(idx.len(), idx.iter().map(|&i| v[i]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_spd_inverse_and_log_det() {
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let inv = spd_inverse(&m, "test").unwrap();
        let id = &m * &inv;
        assert_approx_eq!(id[(0, 0)], 1.0, 1e-12);
        assert_approx_eq!(id[(0, 1)], 0.0, 1e-12);

        let chol = cholesky_with_jitter(&m, "test").unwrap();
        assert_approx_eq!(log_det(&chol), (8.0f64).ln(), 1e-12);
    }

    #[test]
    fn test_cholesky_jitter_rescues_semidefinite() {
        // Rank one, positive semi-definite
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        assert!(cholesky_with_jitter(&m, "test").is_ok());

        let negative = DMatrix::from_row_slice(2, 2, &[-1.0, 0.0, 0.0, -1.0]);
        assert!(matches!(
            cholesky_with_jitter(&negative, "test"),
            Err(ModelError::NumericalError { .. })
        ));
    }

    #[test]
    fn test_block_diagonal_layout() {
        let a = DMatrix::from_element(1, 1, 2.0);
        let b = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 1.0]);
        let d = block_diagonal(&[a, b]);
        assert_eq!(d.shape(), (3, 3));
        assert_eq!(d[(0, 0)], 2.0);
        assert_eq!(d[(1, 2)], 0.5);
        assert_eq!(d[(0, 2)], 0.0);
    }

    #[test]
    fn test_concat_and_split() {
        let parts = vec![DVector::from_vec(vec![1.0, 2.0]), DVector::from_vec(vec![3.0, 4.0])];
        let joined = concat_vectors(&parts);
        assert_eq!(joined.len(), 4);
        let back = split_vector(&joined, 2);
        assert_eq!(back, parts);
    }

    #[test]
    fn test_selection() {
        let m = DMatrix::from_fn(3, 3, |i, j| (i * 3 + j) as f64);
        let s = select_square(&m, &[0, 2]);
        assert_eq!(s, DMatrix::from_row_slice(2, 2, &[0.0, 2.0, 6.0, 8.0]));
        let r = select(&m, &[1], &[0, 2]);
        assert_eq!(r, DMatrix::from_row_slice(1, 2, &[3.0, 5.0]));
    }
}
