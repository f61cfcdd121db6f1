//! Gaussian mixture parameter storage.
//!
//! Holds per-component priors, means and covariances, and provides the slicing and
//! regression operations the HMM builds on: marginal sub-models, dependency masking and
//! Gaussian mixture regression with externally supplied responsibilities.

use crate::{
    errors::{validate_data_length, ModelError, ModelResult},
    gaussian::Gaussian,
    math_utils::constants,
};
use nalgebra::{DMatrix, DVector};
use std::ops::Range;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Per-component Gaussian parameters of a mixture (or of the emissions of an HMM).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GaussianMixture {
    nb_states: usize,
    nb_dim: usize,
    /// Mixing weights
    pub priors: DVector<f64>,
    /// Component means, empty until initialized
    pub mu: Vec<DVector<f64>>,
    /// Component covariances, empty until initialized
    pub sigma: Vec<DMatrix<f64>>,
}

impl GaussianMixture {
    /// Empty mixture with uniform priors and no component parameters yet.
    pub fn new(nb_states: usize, nb_dim: usize) -> Self {
        Self {
            nb_states,
            nb_dim,
            priors: DVector::from_element(nb_states, 1.0 / nb_states.max(1) as f64),
            mu: Vec::new(),
            sigma: Vec::new(),
        }
    }

    /// Mixture from explicit parameters.
    pub fn from_parameters(
        priors: DVector<f64>,
        mu: Vec<DVector<f64>>,
        sigma: Vec<DMatrix<f64>>,
    ) -> ModelResult<Self> {
        let nb_states = priors.len();
        let nb_dim = mu.first().map(|m| m.len()).unwrap_or(0);
        let mut gmm = Self {
            nb_states,
            nb_dim,
            priors,
            mu: Vec::new(),
            sigma: Vec::new(),
        };
        gmm.set_components(mu, sigma)?;
        Ok(gmm)
    }

    /// Number of components.
    pub fn nb_states(&self) -> usize {
        self.nb_states
    }

    /// Dimensionality of each component.
    pub fn nb_dim(&self) -> usize {
        self.nb_dim
    }

    /// Whether means and covariances have been set.
    pub fn is_initialized(&self) -> bool {
        self.mu.len() == self.nb_states && self.sigma.len() == self.nb_states && self.nb_states > 0
    }

    /// Replaces all component means and covariances, checking shapes.
    pub fn set_components(&mut self, mu: Vec<DVector<f64>>, sigma: Vec<DMatrix<f64>>) -> ModelResult<()> {
        if mu.len() != self.nb_states {
            return Err(ModelError::dimension("mixture means", self.nb_states, mu.len()));
        }
        if sigma.len() != self.nb_states {
            return Err(ModelError::dimension("mixture covariances", self.nb_states, sigma.len()));
        }
        for (m, s) in mu.iter().zip(&sigma) {
            if m.len() != self.nb_dim {
                return Err(ModelError::dimension("mixture mean", self.nb_dim, m.len()));
            }
            if s.nrows() != self.nb_dim || s.ncols() != self.nb_dim {
                return Err(ModelError::dimension("mixture covariance", self.nb_dim, s.nrows()));
            }
        }
        self.mu = mu;
        self.sigma = sigma;
        Ok(())
    }

    /// Appends one component; the count grows by one.
    pub fn push_component(&mut self, prior: f64, mu: DVector<f64>, sigma: DMatrix<f64>) -> ModelResult<()> {
        if mu.len() != self.nb_dim {
            return Err(ModelError::dimension("appended mean", self.nb_dim, mu.len()));
        }
        if sigma.nrows() != self.nb_dim || sigma.ncols() != self.nb_dim {
            return Err(ModelError::dimension("appended covariance", self.nb_dim, sigma.nrows()));
        }
        self.nb_states += 1;
        self.priors = self.priors.clone().push(prior);
        self.mu.push(mu);
        self.sigma.push(sigma);
        Ok(())
    }

    /// Component `i` as a standalone Gaussian.
    pub fn component(&self, i: usize) -> ModelResult<Gaussian> {
        self.ensure_initialized()?;
        Gaussian::new(self.mu[i].clone(), self.sigma[i].clone())
    }

    /// Mixture restricted to a contiguous dimension range.
    pub fn marginal(&self, dims: Range<usize>) -> ModelResult<GaussianMixture> {
        self.ensure_initialized()?;
        if dims.end > self.nb_dim || dims.start > dims.end {
            return Err(ModelError::InvalidParameter {
                parameter: "marginal".to_string(),
                value: dims.end as f64,
                constraint: format!("range within 0..{}", self.nb_dim),
            });
        }
        let len = dims.end - dims.start;
        Ok(GaussianMixture {
            nb_states: self.nb_states,
            nb_dim: len,
            priors: self.priors.clone(),
            mu: self.mu.iter().map(|m| m.rows(dims.start, len).into_owned()).collect(),
            sigma: self
                .sigma
                .iter()
                .map(|s| s.view((dims.start, dims.start), (len, len)).into_owned())
                .collect(),
        })
    }

    /// Zeroes the covariance entries outside the mask.
    pub fn apply_mask(&mut self, mask: &DMatrix<f64>) -> ModelResult<()> {
        if mask.nrows() != self.nb_dim || mask.ncols() != self.nb_dim {
            return Err(ModelError::dimension("covariance mask", self.nb_dim, mask.nrows()));
        }
        for s in &mut self.sigma {
            s.component_mul_assign(mask);
        }
        Ok(())
    }

    /// Gaussian mixture regression with fixed responsibilities.
    ///
    /// `data_in` is `[T, |dim_in|]` and `h` is `[nb_states, T]`. Returns `[T, |dim_out|]`
    /// whose row `t` is `Σ_i h[i,t] E[x_out | x_in(t), i]`.
    pub fn condition_with_weights(
        &self,
        data_in: &DMatrix<f64>,
        dim_in: &[usize],
        dim_out: &[usize],
        h: &DMatrix<f64>,
    ) -> ModelResult<DMatrix<f64>> {
        self.ensure_initialized()?;
        if data_in.ncols() != dim_in.len() {
            return Err(ModelError::dimension("regression input", dim_in.len(), data_in.ncols()));
        }
        if h.nrows() != self.nb_states || h.ncols() != data_in.nrows() {
            return Err(ModelError::dimension("regression weights", data_in.nrows(), h.ncols()));
        }

        let components: Vec<Gaussian> = (0..self.nb_states)
            .map(|i| self.component(i))
            .collect::<ModelResult<_>>()?;

        let mut out = DMatrix::zeros(data_in.nrows(), dim_out.len());
        for t in 0..data_in.nrows() {
            let x_in = data_in.row(t).transpose();
            let mut acc = DVector::zeros(dim_out.len());
            for (i, comp) in components.iter().enumerate() {
                let w = h[(i, t)];
                if w == 0.0 {
                    continue;
                }
                acc += comp.conditional_mean(&x_in, dim_in, dim_out)? * w;
            }
            out.set_row(t, &acc.transpose());
        }
        Ok(out)
    }

    /// Plain mixture regression: responsibilities come from priors and the input marginal.
    pub fn condition(
        &self,
        data_in: &DMatrix<f64>,
        dim_in: &[usize],
        dim_out: &[usize],
    ) -> ModelResult<DMatrix<f64>> {
        validate_data_length(data_in.nrows(), 1)?;
        let h = self.responsibilities(data_in, dim_in)?;
        self.condition_with_weights(data_in, dim_in, dim_out, &h)
    }

    /// Posterior component weights `[nb_states, T]` of the rows of `data` restricted to `dims`.
    pub fn responsibilities(&self, data: &DMatrix<f64>, dims: &[usize]) -> ModelResult<DMatrix<f64>> {
        self.ensure_initialized()?;
        let mut log_h = DMatrix::zeros(self.nb_states, data.nrows());
        for i in 0..self.nb_states {
            let lp = self.component(i)?.marginal(dims).log_pdf_rows(data)?;
            let log_prior = (self.priors[i] + constants::REALMIN).ln();
            log_h.set_row(i, &(lp.add_scalar(log_prior)).transpose());
        }
        for mut col in log_h.column_iter_mut() {
            let max = col.max();
            if max.is_finite() {
                col.apply(|v| *v = (*v - max).exp());
            } else {
                col.fill(1.0);
            }
            let total = col.sum();
            col /= total;
        }
        Ok(log_h)
    }

    fn ensure_initialized(&self) -> ModelResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(ModelError::Unset {
                name: "mixture means and covariances".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn two_component() -> GaussianMixture {
        GaussianMixture::from_parameters(
            DVector::from_vec(vec![0.5, 0.5]),
            vec![DVector::from_vec(vec![0.0, 0.0]), DVector::from_vec(vec![10.0, 20.0])],
            vec![
                DMatrix::from_row_slice(2, 2, &[1.0, 0.8, 0.8, 1.0]),
                DMatrix::from_row_slice(2, 2, &[1.0, -0.5, -0.5, 1.0]),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_marginal_slices_parameters() {
        let gmm = two_component();
        let m = gmm.marginal(1..2).unwrap();
        assert_eq!(m.nb_dim(), 1);
        assert_eq!(m.mu[1][0], 20.0);
        assert_eq!(m.sigma[0][(0, 0)], 1.0);
        assert!(gmm.marginal(1..3).is_err());
    }

    #[test]
    fn test_uninitialized_access_is_unset() {
        let gmm = GaussianMixture::new(2, 3);
        assert!(!gmm.is_initialized());
        assert!(matches!(gmm.component(0), Err(ModelError::Unset { .. })));
    }

    #[test]
    fn test_condition_with_one_hot_weights() {
        let gmm = two_component();
        let data_in = DMatrix::from_row_slice(2, 1, &[1.0, 11.0]);
        let h = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        let out = gmm.condition_with_weights(&data_in, &[0], &[1], &h).unwrap();
        assert_approx_eq!(out[(0, 0)], 0.8, 1e-12);
        assert_approx_eq!(out[(1, 0)], 20.0 - 0.5, 1e-12);
    }

    #[test]
    fn test_plain_regression_picks_nearest_component() {
        let gmm = two_component();
        let data_in = DMatrix::from_row_slice(1, 1, &[10.0]);
        let out = gmm.condition(&data_in, &[0], &[1]).unwrap();
        assert_approx_eq!(out[(0, 0)], 20.0, 1e-6);

        let h = gmm.responsibilities(&data_in, &[0]).unwrap();
        assert_approx_eq!(h.column(0).sum(), 1.0, 1e-12);
    }

    #[test]
    fn test_push_component_and_mask() {
        let mut gmm = two_component();
        gmm.push_component(0.0, DVector::zeros(2), DMatrix::identity(2, 2)).unwrap();
        assert_eq!(gmm.nb_states(), 3);
        assert_eq!(gmm.priors.len(), 3);

        gmm.apply_mask(&DMatrix::identity(2, 2)).unwrap();
        assert_eq!(gmm.sigma[0][(0, 1)], 0.0);
    }
}
