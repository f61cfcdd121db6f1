//! Expectation-Maximization for the Gaussian HMM.
//!
//! The E-step runs the scaled forward-backward pass of every demonstration (on the rayon
//! pool when the `parallel` feature is enabled), then the M-step re-estimates emissions,
//! initial priors and transitions from the pooled responsibilities.

use crate::{
    config::{CovarianceType, DependencyBlock, EmConfig, TransitionStructure},
    errors::{
        validate_data_length, validate_finite_matrix, validate_no_nan, validate_probability_vector,
        ModelError, ModelResult,
    },
    hmm_core::{Hmm, Messages, Observations},
    linear_algebra::symmetrize,
    math_utils::{constants, normalize_rows, weighted_mean, weighted_scatter},
    results::EmReport,
};
use nalgebra::{DMatrix, DVector};

impl Hmm {
    /// Fits the model to a set of demonstrations.
    ///
    /// Unset parameters are initialized randomly from the pooled data (left-to-right when
    /// the configured structure asks for it). Returns a report with the per-iteration
    /// average log-likelihood; running out of iterations is not an error but yields
    /// `converged == false`.
    pub fn em<D: Observations + Sync>(&mut self, demos: &[D], config: &EmConfig) -> ModelResult<EmReport> {
        validate_data_length(demos.len(), 1)?;
        let nb_dim = self.nb_dim();
        config.validate(nb_dim)?;
        let data = self.pool(demos)?;

        self.reg = config.reg.clone();
        if !self.params().is_initialized() {
            self.init_params_random(
                &data,
                config.structure == TransitionStructure::LeftToRight,
                config.self_trans,
                config.seed,
            )?;
        }
        self.materialize_defaults();

        let reg = self.reg.to_matrix(nb_dim)?;
        let dep_mask = config.resolved_mask(nb_dim)?;
        let trans_mask = config.structure.mask(self.nb_states());

        if let Some(mask) = &dep_mask {
            self.params_mut().apply_mask(mask)?;
        }
        if let Some(mask) = &trans_mask {
            self.apply_trans_mask(mask);
        }

        let nb_samples = demos.len() as f64;
        let mut log_likelihoods = Vec::with_capacity(config.nb_max_steps);

        for it in 0..config.nb_max_steps {
            let messages = self.e_step(demos, config.dep.as_deref(), config.parallel)?;

            let gamma = concat_gammas(&messages, self.nb_states());
            validate_no_nan(&gamma, "gamma")?;

            // Responsibilities normalized per state over all frames
            let mut gamma2 = gamma;
            normalize_rows(&mut gamma2);

            if !config.obs_fixed {
                self.update_emissions(&data, &gamma2, Some(&reg), config.cov_type, dep_mask.as_ref())?;
            }
            self.update_init_priors(&messages)?;
            self.update_trans(&messages, config.trans_reg)?;
            if let Some(mask) = &trans_mask {
                self.apply_trans_mask(mask);
            }
            self.check_parameters()?;

            let ll = messages.iter().map(Messages::log_likelihood).sum::<f64>() / nb_samples;
            log::debug!("EM iteration {}: average log-likelihood {}", it, ll);
            log_likelihoods.push(ll);
            self.gammas = messages.into_iter().map(|m| m.gamma).collect();

            if it > config.nb_min_steps && log_likelihoods[it] - log_likelihoods[it - 1] < config.max_diff_ll {
                log::info!("EM converged after {} iterations, log-likelihood {}", it + 1, ll);
                if config.recompute_end_covariance() && !config.obs_fixed {
                    if let Some(reg_finish) = &config.reg_finish {
                        self.reg = reg_finish.clone();
                    }
                    let finish = config.reg_finish.as_ref().map(|r| r.to_matrix(nb_dim)).transpose()?;
                    self.update_covariances(&data, &gamma2, finish.as_ref(), config.cov_type, dep_mask.as_ref())?;
                    self.check_parameters()?;
                }
                return Ok(EmReport {
                    converged: true,
                    iterations: it + 1,
                    final_log_likelihood: ll,
                    log_likelihoods,
                });
            }
        }

        log::warn!(
            "EM did not converge within {} iterations, consider increasing nb_max_steps",
            config.nb_max_steps
        );
        let final_log_likelihood = log_likelihoods.last().copied().unwrap_or(f64::NEG_INFINITY);
        Ok(EmReport {
            converged: false,
            iterations: config.nb_max_steps,
            final_log_likelihood,
            log_likelihoods,
        })
    }

    fn e_step<D: Observations + Sync>(
        &self,
        demos: &[D],
        dep: Option<&[DependencyBlock]>,
        parallel: bool,
    ) -> ModelResult<Vec<Messages>> {
        #[cfg(feature = "parallel")]
        {
            if parallel {
                use rayon::prelude::*;
                return demos
                    .par_iter()
                    .map(|demo| self.compute_messages(demo.observations(), dep, None))
                    .collect();
            }
        }
        #[cfg(not(feature = "parallel"))]
        let _ = parallel;

        demos
            .iter()
            .map(|demo| self.compute_messages(demo.observations(), dep, None))
            .collect()
    }

    fn update_emissions(
        &mut self,
        data: &DMatrix<f64>,
        gamma2: &DMatrix<f64>,
        reg: Option<&DMatrix<f64>>,
        cov_type: CovarianceType,
        dep_mask: Option<&DMatrix<f64>>,
    ) -> ModelResult<()> {
        let mu: Vec<DVector<f64>> = gamma2
            .row_iter()
            .zip(&self.params().mu)
            .map(|(w, previous)| {
                if w.sum() == 0.0 {
                    // Unvisited state keeps its parameters
                    return previous.clone();
                }
                let w: Vec<f64> = w.iter().copied().collect();
                weighted_mean(data, &w)
            })
            .collect();
        let sigma = self.params().sigma.clone();
        self.params_mut().set_components(mu, sigma)?;
        self.update_covariances(data, gamma2, reg, cov_type, dep_mask)
    }

    fn update_covariances(
        &mut self,
        data: &DMatrix<f64>,
        gamma2: &DMatrix<f64>,
        reg: Option<&DMatrix<f64>>,
        cov_type: CovarianceType,
        dep_mask: Option<&DMatrix<f64>>,
    ) -> ModelResult<()> {
        let sigma: Vec<DMatrix<f64>> = gamma2
            .row_iter()
            .zip(self.params().mu.iter().zip(&self.params().sigma))
            .map(|(w, (mu, previous))| {
                if w.sum() == 0.0 {
                    return previous.clone();
                }
                let w: Vec<f64> = w.iter().copied().collect();
                let mut s = weighted_scatter(data, &w, mu);
                symmetrize(&mut s);
                if let Some(reg) = reg {
                    s += reg;
                }
                if cov_type == CovarianceType::Diag {
                    s = DMatrix::from_diagonal(&s.diagonal());
                }
                s
            })
            .collect();
        let mu = self.params().mu.clone();
        self.params_mut().set_components(mu, sigma)?;
        if let Some(mask) = dep_mask {
            self.params_mut().apply_mask(mask)?;
        }
        Ok(())
    }

    fn update_init_priors(&mut self, messages: &[Messages]) -> ModelResult<()> {
        let n = self.nb_states();
        let mut priors = DVector::zeros(n);
        for m in messages {
            priors += m.gamma.column(0);
        }
        priors /= messages.len() as f64;
        self.set_init_priors(priors)
    }

    fn update_trans(&mut self, messages: &[Messages], trans_reg: Option<f64>) -> ModelResult<()> {
        let n = self.nb_states();
        let mut expected = DMatrix::zeros(n, n);
        let mut occupancy = DVector::zeros(n);
        for m in messages {
            for (t, z) in m.zeta.iter().enumerate() {
                expected += z;
                occupancy += m.gamma.column(t);
            }
        }
        validate_no_nan(&expected, "zeta")?;

        let previous = self.trans().into_owned();
        let mut trans = DMatrix::zeros(n, n);
        for i in 0..n {
            if occupancy[i] > 0.0 {
                let row = expected.row(i) / (occupancy[i] + constants::REALMIN);
                trans.set_row(i, &row);
            } else {
                // Never visited before the last frame: nothing to learn from
                trans.set_row(i, &previous.row(i));
            }
        }

        if let Some(r) = trans_reg {
            trans.add_scalar_mut(r);
        }
        normalize_rows(&mut trans);
        self.set_trans(trans)
    }

    fn apply_trans_mask(&mut self, mask: &DMatrix<f64>) {
        if let Some(trans) = self.trans_mut() {
            trans.component_mul_assign(mask);
        }
        self.renormalize_trans();
    }

    fn check_parameters(&self) -> ModelResult<()> {
        let trans = self.trans();
        validate_no_nan(&trans, "transition matrix")?;
        let params = self.params();
        let bad_mean = params.mu.iter().any(|m| m.iter().any(|v| v.is_nan()));
        let init_priors = self.init_priors();
        if bad_mean || init_priors.iter().any(|v| v.is_nan()) {
            return Err(ModelError::numerical("NaN in updated HMM parameters", "em"));
        }
        for s in &params.sigma {
            validate_finite_matrix(s, "covariance")?;
        }

        let tol = constants::PROBABILITY_TOLERANCE;
        validate_probability_vector(&init_priors, tol, "initial state priors")?;
        for row in trans.row_iter() {
            validate_probability_vector(&row.transpose(), tol, "transition matrix row")?;
        }
        Ok(())
    }
}

/// Horizontal concatenation of the gammas of every demonstration, `[nb_states, total_T]`.
fn concat_gammas(messages: &[Messages], nb_states: usize) -> DMatrix<f64> {
    let total: usize = messages.iter().map(Messages::len).sum();
    let mut out = DMatrix::zeros(nb_states, total);
    let mut offset = 0;
    for m in messages {
        out.view_mut((0, offset), (nb_states, m.len())).copy_from(&m.gamma);
        offset += m.len();
    }
    out
}
