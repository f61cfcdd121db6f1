//! Gaussian emission model for the HMM.
//!
//! Evaluates per-state observation log-likelihoods `[nb_states, T]` from the mixture
//! parameters. A dependency partition evaluates the likelihood as a sum of independent
//! block likelihoods (a block-diagonal covariance without building it), and a marginal
//! range evaluates a sliced sub-model.

use crate::{
    config::DependencyBlock,
    errors::{ModelError, ModelResult},
    mixture::GaussianMixture,
};
use nalgebra::DMatrix;
use std::borrow::Cow;
use std::ops::Range;

/// Borrowed view of emission parameters with an optional dependency structure and marginal.
#[derive(Debug, Clone)]
pub struct EmissionModel<'a> {
    params: &'a GaussianMixture,
    dep: Option<&'a [DependencyBlock]>,
    marginal: Option<Range<usize>>,
}

impl<'a> EmissionModel<'a> {
    /// Full-covariance emissions from the given parameters.
    pub fn new(params: &'a GaussianMixture) -> Self {
        Self {
            params,
            dep: None,
            marginal: None,
        }
    }

    /// Evaluates likelihoods block by block over the given partition.
    pub fn with_dep(mut self, dep: Option<&'a [DependencyBlock]>) -> Self {
        self.dep = dep;
        self
    }

    /// Restricts the model to a contiguous dimension range.
    ///
    /// An empty range means "no observation": every state gets log-likelihood 0.
    pub fn with_marginal(mut self, marginal: Option<Range<usize>>) -> Self {
        self.marginal = marginal;
        self
    }

    /// Per-state log-likelihood of every row of `obs`, shape `[nb_states, T]`.
    ///
    /// `obs` may carry either the full dimensionality or, when a marginal is set, only the
    /// marginal columns.
    pub fn log_likelihood(&self, obs: &DMatrix<f64>) -> ModelResult<DMatrix<f64>> {
        let nb_states = self.params.nb_states();
        let nb_data = obs.nrows();

        if let Some(range) = &self.marginal {
            if range.is_empty() {
                return Ok(DMatrix::zeros(nb_states, nb_data));
            }
        }

        let (params, obs) = self.resolve(obs)?;
        let mut log_b = DMatrix::zeros(nb_states, nb_data);

        for i in 0..nb_states {
            let component = params.component(i)?;
            match self.dep {
                None => {
                    let lp = component.log_pdf_rows(&obs)?;
                    log_b.set_row(i, &lp.transpose());
                }
                Some(blocks) => {
                    for block in blocks {
                        let idx = block.indices();
                        let sub_obs = obs.select_columns(idx.iter());
                        let lp = component.marginal(&idx).log_pdf_rows(&sub_obs)?;
                        let mut row = log_b.row_mut(i);
                        row += lp.transpose();
                    }
                }
            }
        }
        Ok(log_b)
    }

    /// Likelihood and log-likelihood matrices `(B, log B)`.
    pub fn likelihood(&self, obs: &DMatrix<f64>) -> ModelResult<(DMatrix<f64>, DMatrix<f64>)> {
        let log_b = self.log_likelihood(obs)?;
        Ok((log_b.map(f64::exp), log_b))
    }

    fn resolve(&self, obs: &DMatrix<f64>) -> ModelResult<(Cow<'a, GaussianMixture>, DMatrix<f64>)> {
        let nb_dim = self.params.nb_dim();
        match &self.marginal {
            None => {
                if obs.ncols() != nb_dim {
                    return Err(ModelError::dimension("emission observations", nb_dim, obs.ncols()));
                }
                Ok((Cow::Borrowed(self.params), obs.clone()))
            }
            Some(range) => {
                let sub = self.params.marginal(range.clone())?;
                let width = range.end - range.start;
                let sliced = if obs.ncols() == width {
                    obs.clone()
                } else if obs.ncols() == nb_dim {
                    obs.columns(range.start, width).into_owned()
                } else {
                    return Err(ModelError::dimension("marginal observations", width, obs.ncols()));
                };
                Ok((Cow::Owned(sub), sliced))
            }
        }
    }
}
