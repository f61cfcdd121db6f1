//! Lifted transfer matrices of a linear system.
//!
//! Stacking the states of a horizon gives `x = S_xi x0 + S_u u`, with block `t` of `S_xi`
//! equal to `A^t` and block `(t, k)` of `S_u` equal to `A^(t-1-k) B` for `k < t`.

use crate::{
    errors::{ModelError, ModelResult},
    lqr::LinearSystem,
};
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};

/// Dense `(S_xi [n·H, n], S_u [n·H, m·H])`.
pub fn lifted_transfer_matrix(
    system: &LinearSystem,
    horizon: usize,
) -> ModelResult<(DMatrix<f64>, DMatrix<f64>)> {
    check_horizon(horizon)?;
    let n = system.state_dim();
    let m = system.control_dim();
    let powers = matrix_powers(&system.a, horizon);

    let mut s_xi = DMatrix::zeros(n * horizon, n);
    for (t, p) in powers.iter().enumerate() {
        s_xi.view_mut((t * n, 0), (n, n)).copy_from(p);
    }

    // A^j B for j = 0..horizon-1
    let propagated: Vec<DMatrix<f64>> = powers.iter().map(|p| p * &system.b).collect();
    let mut s_u = DMatrix::zeros(n * horizon, m * horizon);
    for t in 1..horizon {
        for k in 0..t {
            s_u.view_mut((t * n, k * m), (n, m))
                .copy_from(&propagated[t - 1 - k]);
        }
    }
    Ok((s_xi, s_u))
}

/// Sparse counterpart of [`lifted_transfer_matrix`]; structurally zero blocks are not stored.
pub fn lifted_transfer_matrix_sparse(
    system: &LinearSystem,
    horizon: usize,
) -> ModelResult<(CsrMatrix<f64>, CsrMatrix<f64>)> {
    let (s_xi, s_u) = lifted_transfer_matrix(system, horizon)?;
    Ok((dense_to_csr(&s_xi), dense_to_csr(&s_u)))
}

/// CSR copy of a dense matrix, keeping only non-zero entries.
pub fn dense_to_csr(m: &DMatrix<f64>) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(m.nrows(), m.ncols());
    for j in 0..m.ncols() {
        for i in 0..m.nrows() {
            let v = m[(i, j)];
            if v != 0.0 {
                coo.push(i, j, v);
            }
        }
    }
    CsrMatrix::from(&coo)
}

fn matrix_powers(a: &DMatrix<f64>, count: usize) -> Vec<DMatrix<f64>> {
    let n = a.nrows();
    let mut powers = Vec::with_capacity(count);
    let mut current = DMatrix::identity(n, n);
    for _ in 0..count {
        let next = a * &current;
        powers.push(current);
        current = next;
    }
    powers
}

fn check_horizon(horizon: usize) -> ModelResult<()> {
    if horizon < 2 {
        return Err(ModelError::InvalidParameter {
            parameter: "horizon".to_string(),
            value: horizon as f64,
            constraint: "at least 2 steps".to_string(),
        });
    }
    Ok(())
}
