//! State decoding: most likely path (Viterbi) and causal online filtering.

use crate::{
    errors::{validate_data_length, ModelError, ModelResult},
    hmm_core::Hmm,
    math_utils::{argmax, constants},
    mixture::GaussianMixture,
    emission_models::EmissionModel,
};
use nalgebra::{DMatrix, DVector};
use std::ops::Range;

impl Hmm {
    /// Most likely state sequence of a demonstration, computed in the log domain.
    ///
    /// With `reg`, `REALMIN` is added inside the logarithms of priors and transitions so
    /// that forbidden transitions stay finite.
    pub fn viterbi(&self, demo: &DMatrix<f64>, reg: bool) -> ModelResult<Vec<usize>> {
        let nb_data = demo.nrows();
        validate_data_length(nb_data, 1)?;
        let n = self.nb_states();
        let eps = if reg { constants::REALMIN } else { 0.0 };

        let (_, log_b) = self.obs_likelihood(demo, None, None)?;
        let log_priors = self.init_priors().map(|p| (p + eps).ln());
        let log_trans = self.trans().map(|p| (p + eps).ln());

        let mut log_delta = DMatrix::zeros(n, nb_data);
        let mut psi = DMatrix::<usize>::zeros(n, nb_data);
        log_delta.set_column(0, &(log_priors + log_b.column(0)));

        for t in 1..nb_data {
            for i in 0..n {
                let (best, value) =
                    argmax((0..n).map(|j| log_delta[(j, t - 1)] + log_trans[(j, i)]));
                psi[(i, t)] = best;
                log_delta[(i, t)] = value + log_b[(i, t)];
            }
        }

        if log_delta.iter().any(|v| v.is_nan()) {
            return Err(ModelError::InvariantViolation {
                operation: "viterbi".to_string(),
                reason: "NaN in log-delta".to_string(),
            });
        }

        // Backtracking
        let mut path = vec![0; nb_data];
        path[nb_data - 1] = argmax(log_delta.column(nb_data - 1).iter().copied()).0;
        for t in (0..nb_data - 1).rev() {
            path[t] = psi[(path[t + 1], t + 1)];
        }
        Ok(path)
    }
}

/// Causal forward filter fed one observation at a time.
#[derive(Debug, Clone, Default)]
pub struct OnlineFilter {
    alpha: Option<DVector<f64>>,
    marginal_model: Option<(Range<usize>, GaussianMixture)>,
}

impl OnlineFilter {
    /// Creates a filter that seeds on its first step.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the running message and the cached marginal model.
    pub fn reset(&mut self) {
        self.alpha = None;
        self.marginal_model = None;
    }

    /// Current normalized forward message, if any observation was processed.
    pub fn alpha(&self) -> Option<&DVector<f64>> {
        self.alpha.as_ref()
    }

    /// Incorporates observation `x` and returns the normalized state responsibilities.
    ///
    /// `x` carries either all dimensions or only the `marginal` ones. The marginal
    /// sub-model is built once and cached until `reset`.
    pub fn step(
        &mut self,
        hmm: &Hmm,
        x: &DVector<f64>,
        marginal: Option<Range<usize>>,
        reset: bool,
    ) -> ModelResult<&DVector<f64>> {
        if reset {
            self.reset();
        }
        let obs = DMatrix::from_row_slice(1, x.len(), x.as_slice());

        let log_b = match marginal {
            Some(range) if !range.is_empty() => {
                let stale = self.marginal_model.as_ref().map_or(true, |(r, _)| *r != range);
                if stale {
                    let sub = hmm.params().marginal(range.clone())?;
                    self.marginal_model = Some((range.clone(), sub));
                }
                let (_, sub) = self
                    .marginal_model
                    .as_ref()
                    .ok_or_else(|| ModelError::Unset { name: "marginal model".to_string() })?;
                let sliced = if x.len() == range.len() {
                    obs
                } else {
                    obs.columns(range.start, range.len()).into_owned()
                };
                EmissionModel::new(sub).log_likelihood(&sliced)?
            }
            other => hmm.emission_model().with_marginal(other).log_likelihood(&obs)?,
        };
        let b = log_b.column(0).map(f64::exp);

        let mut alpha = match self.alpha.take() {
            None => hmm.init_priors().component_mul(&b),
            Some(prev) => (hmm.trans().tr_mul(&prev)).component_mul(&b),
        };

        if alpha.iter().all(|&a| a == 0.0) {
            log::warn!("online forward message vanished, observation is unlikely under every state");
            alpha.fill(constants::REALMIN);
        }
        let total = alpha.sum();
        alpha /= total;

        Ok(self.alpha.insert(alpha))
    }
}
