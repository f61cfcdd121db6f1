//! Multivariate Gaussians in moment and information form.
//!
//! [`Gaussian`] carries a mean and covariance and evaluates log-densities in batch.
//! [`GaussianPrecision`] carries a mean and precision, the natural parametrization of
//! quadratic costs. [`InformationForm`] is the canonical `(Λ, Λμ)` pair in which the
//! Product of Gaussians reduces to a sum.

use crate::{
    errors::{ModelError, ModelResult},
    linear_algebra::{cholesky_with_jitter, log_det, select, select_square, select_vector, spd_inverse},
    math_utils::constants,
};
use nalgebra::{DMatrix, DVector};
use std::ops::Mul;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Gaussian in moment form.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Gaussian {
    /// Mean vector
    pub mean: DVector<f64>,
    /// Covariance matrix
    pub covariance: DMatrix<f64>,
}

impl Gaussian {
    /// Creates a Gaussian after checking that the shapes agree.
    pub fn new(mean: DVector<f64>, covariance: DMatrix<f64>) -> ModelResult<Self> {
        let d = mean.len();
        if covariance.nrows() != d || covariance.ncols() != d {
            return Err(ModelError::dimension("gaussian covariance", d, covariance.nrows()));
        }
        Ok(Self { mean, covariance })
    }

    /// Dimensionality.
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Precision matrix (inverse covariance).
    pub fn precision(&self) -> ModelResult<DMatrix<f64>> {
        spd_inverse(&self.covariance, "gaussian_precision")
    }

    /// Log-density of every row of `data` (`[n_samples, dim]`).
    ///
    /// Observations with zero density yield `-inf`; this never errors on the data itself.
    pub fn log_pdf_rows(&self, data: &DMatrix<f64>) -> ModelResult<DVector<f64>> {
        let d = self.dim();
        if data.ncols() != d {
            return Err(ModelError::dimension("gaussian log_pdf", d, data.ncols()));
        }
        let chol = cholesky_with_jitter(&self.covariance, "gaussian_log_pdf")?;
        let half_log_norm = 0.5 * (d as f64 * constants::LN_TWO_PI + log_det(&chol));

        let mut diffs = data.transpose();
        for mut col in diffs.column_iter_mut() {
            col -= &self.mean;
        }
        let whitened = chol
            .l()
            .solve_lower_triangular(&diffs)
            .ok_or_else(|| ModelError::numerical("Triangular solve failed", "gaussian_log_pdf"))?;

        Ok(DVector::from_iterator(
            data.nrows(),
            whitened.column_iter().zip(diffs.column_iter()).map(|(z, diff)| {
                let unbounded = diff.iter().any(|v| v.is_infinite()) && !diff.iter().any(|v| v.is_nan());
                let maha = z.norm_squared();
                if unbounded || maha.is_infinite() {
                    f64::NEG_INFINITY
                } else {
                    -0.5 * maha - half_log_norm
                }
            }),
        ))
    }

    /// Marginal over the selected dimensions.
    pub fn marginal(&self, idx: &[usize]) -> Gaussian {
        Gaussian {
            mean: select_vector(&self.mean, idx),
            covariance: select_square(&self.covariance, idx),
        }
    }

    /// Conditional mean of `out` given the `input` dimensions fixed at `x_in`.
    ///
    /// `μ_out + Σ_oi Σ_ii⁻¹ (x_in - μ_in)`
    pub fn conditional_mean(
        &self,
        x_in: &DVector<f64>,
        input: &[usize],
        out: &[usize],
    ) -> ModelResult<DVector<f64>> {
        if x_in.len() != input.len() {
            return Err(ModelError::dimension("conditional input", input.len(), x_in.len()));
        }
        let sigma_in = select_square(&self.covariance, input);
        let sigma_out_in = select(&self.covariance, out, input);
        let chol = cholesky_with_jitter(&sigma_in, "gaussian_condition")?;
        let delta = x_in - select_vector(&self.mean, input);
        Ok(select_vector(&self.mean, out) + sigma_out_in * chol.solve(&delta))
    }

    /// Distribution of `y = A x + b` for `x` following this Gaussian.
    pub fn transform(&self, a: &DMatrix<f64>, b: &DVector<f64>) -> ModelResult<Gaussian> {
        if a.ncols() != self.dim() {
            return Err(ModelError::dimension("gaussian transform", self.dim(), a.ncols()));
        }
        if b.len() != a.nrows() {
            return Err(ModelError::dimension("gaussian transform offset", a.nrows(), b.len()));
        }
        Ok(Gaussian {
            mean: a * &self.mean + b,
            covariance: a * &self.covariance * a.transpose(),
        })
    }
}

/// Gaussian in mean/precision form, the parametrization used for quadratic costs.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GaussianPrecision {
    /// Mean (target) vector
    pub mean: DVector<f64>,
    /// Precision matrix
    pub precision: DMatrix<f64>,
}

impl GaussianPrecision {
    /// Creates a precision-form Gaussian after checking that the shapes agree.
    pub fn new(mean: DVector<f64>, precision: DMatrix<f64>) -> ModelResult<Self> {
        let d = mean.len();
        if precision.nrows() != d || precision.ncols() != d {
            return Err(ModelError::dimension("gaussian precision", d, precision.nrows()));
        }
        Ok(Self { mean, precision })
    }

    /// Zero-mean Gaussian with precision `10^exponent * I`.
    pub fn isotropic(dim: usize, exponent: f64) -> Self {
        Self {
            mean: DVector::zeros(dim),
            precision: DMatrix::identity(dim, dim) * 10f64.powf(exponent),
        }
    }

    /// Dimensionality.
    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    /// Information vector `Λ μ`.
    pub fn information(&self) -> DVector<f64> {
        &self.precision * &self.mean
    }

    /// Canonical form of this Gaussian.
    pub fn to_information(&self) -> InformationForm {
        InformationForm {
            precision: self.precision.clone(),
            info: self.information(),
        }
    }

    /// Pulls this distribution over `y` back onto `x` through `y = A x + b`.
    ///
    /// The result is `(AᵀΛA, AᵀΛ(μ - b))`. `A` may be rectangular or rank deficient, so the
    /// result stays in information form until it is fused with a proper prior.
    pub fn pull_back(&self, a: &DMatrix<f64>, b: &DVector<f64>) -> ModelResult<InformationForm> {
        if a.nrows() != self.dim() {
            return Err(ModelError::dimension("pull back", self.dim(), a.nrows()));
        }
        if b.len() != self.dim() {
            return Err(ModelError::dimension("pull back offset", self.dim(), b.len()));
        }
        let at_lambda = a.transpose() * &self.precision;
        Ok(InformationForm {
            precision: &at_lambda * a,
            info: at_lambda * (&self.mean - b),
        })
    }
}

impl TryFrom<&Gaussian> for GaussianPrecision {
    type Error = ModelError;

    fn try_from(g: &Gaussian) -> ModelResult<Self> {
        Ok(Self {
            mean: g.mean.clone(),
            precision: g.precision()?,
        })
    }
}

/// Canonical (information) form `(Λ, η = Λμ)`.
#[derive(Debug, Clone, PartialEq)]
pub struct InformationForm {
    /// Precision matrix
    pub precision: DMatrix<f64>,
    /// Information vector
    pub info: DVector<f64>,
}

impl InformationForm {
    /// Product of Gaussians: precisions and information vectors add.
    pub fn fuse(&self, other: &InformationForm) -> ModelResult<InformationForm> {
        if self.info.len() != other.info.len() {
            return Err(ModelError::dimension("product of gaussians", self.info.len(), other.info.len()));
        }
        Ok(InformationForm {
            precision: &self.precision + &other.precision,
            info: &self.info + &other.info,
        })
    }

    /// Moment form. Fails when the precision is not positive definite.
    pub fn to_gaussian(&self) -> ModelResult<Gaussian> {
        let chol = cholesky_with_jitter(&self.precision, "information_to_moment")?;
        Ok(Gaussian {
            mean: chol.solve(&self.info),
            covariance: chol.inverse(),
        })
    }
}

impl Mul for &InformationForm {
    type Output = ModelResult<InformationForm>;

    fn mul(self, rhs: &InformationForm) -> Self::Output {
        self.fuse(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_log_pdf_standard_normal() {
        let g = Gaussian::new(DVector::zeros(2), DMatrix::identity(2, 2)).unwrap();
        let data = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.0, 1.0]);
        let lp = g.log_pdf_rows(&data).unwrap();
        assert_approx_eq!(lp[0], -constants::LN_TWO_PI, 1e-12);
        assert_approx_eq!(lp[1], -constants::LN_TWO_PI - 1.0, 1e-12);
    }

    #[test]
    fn test_log_pdf_infinite_observation_is_neg_infinity() {
        let g = Gaussian::new(DVector::zeros(1), DMatrix::identity(1, 1)).unwrap();
        let data = DMatrix::from_row_slice(1, 1, &[f64::INFINITY]);
        let lp = g.log_pdf_rows(&data).unwrap();
        assert_eq!(lp[0], f64::NEG_INFINITY);
    }

    #[test]
    fn test_log_pdf_dimension_mismatch() {
        let g = Gaussian::new(DVector::zeros(2), DMatrix::identity(2, 2)).unwrap();
        let data = DMatrix::zeros(3, 1);
        assert!(matches!(
            g.log_pdf_rows(&data),
            Err(ModelError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_conditional_mean() {
        let cov = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.5, 1.0]);
        let g = Gaussian::new(DVector::from_vec(vec![1.0, 2.0]), cov).unwrap();
        let x_in = DVector::from_vec(vec![3.0]);
        let m = g.conditional_mean(&x_in, &[0], &[1]).unwrap();
        assert_approx_eq!(m[0], 2.0 + 0.5 * 2.0, 1e-12);
    }

    #[test]
    fn test_product_of_two_scalar_gaussians() {
        let a = GaussianPrecision::new(DVector::from_vec(vec![0.0]), DMatrix::from_element(1, 1, 1.0)).unwrap();
        let b = GaussianPrecision::new(DVector::from_vec(vec![2.0]), DMatrix::from_element(1, 1, 3.0)).unwrap();
        let fused = (&a.to_information() * &b.to_information()).unwrap();
        let g = fused.to_gaussian().unwrap();
        assert_approx_eq!(g.mean[0], 1.5, 1e-12);
        assert_approx_eq!(g.covariance[(0, 0)], 0.25, 1e-12);
    }

    #[test]
    fn test_pull_back_of_identity_is_same_distribution() {
        let target = GaussianPrecision::new(
            DVector::from_vec(vec![1.0, -1.0]),
            DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 0.0, 4.0]),
        )
        .unwrap();
        let offset = DVector::from_vec(vec![0.5, 0.5]);
        let pulled = target.pull_back(&DMatrix::identity(2, 2), &offset).unwrap();
        let g = pulled.to_gaussian().unwrap();
        assert_approx_eq!(g.mean[0], 0.5, 1e-12);
        assert_approx_eq!(g.mean[1], -1.5, 1e-12);
    }

    #[test]
    fn test_transform_and_isotropic() {
        let g = Gaussian::new(DVector::from_vec(vec![1.0]), DMatrix::from_element(1, 1, 2.0)).unwrap();
        let a = DMatrix::from_row_slice(2, 1, &[1.0, 2.0]);
        let b = DVector::from_vec(vec![0.0, 1.0]);
        let y = g.transform(&a, &b).unwrap();
        assert_approx_eq!(y.mean[1], 3.0);
        assert_approx_eq!(y.covariance[(1, 1)], 8.0);

        let iso = GaussianPrecision::isotropic(3, -2.0);
        assert_approx_eq!(iso.precision[(2, 2)], 0.01, 1e-15);
        assert_eq!(iso.mean, DVector::zeros(3));
    }
}
